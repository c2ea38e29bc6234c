use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::queue::RedisJobQueue;

#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub queue: Arc<RedisJobQueue>,
}

/// Prometheus scrape endpoint. Refreshes the queue gauges before rendering.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.queue.queue_depth().await {
        Ok(depth) => metrics::gauge!("detection_queue_depth").set(depth as f64),
        Err(e) => tracing::warn!(error = %e, "Could not read queue depth"),
    }
    if let Ok(depth) = state.queue.dead_letter_depth().await {
        metrics::gauge!("detection_dead_letter_depth").set(depth as f64);
    }
    state.handle.render()
}
