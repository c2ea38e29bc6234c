use label_detect_jobs::{
    config::AppConfig,
    db::{self, queries::PgJobStatusStore},
    services::{
        detector::HttpLabelDetector, queue::RedisJobQueue, storage::S3ArtifactStore,
        worker::Worker,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting detection worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        tracing::info!(%addr, "Serving worker metrics");
    }
    metrics::describe_histogram!(
        "detection_processing_seconds",
        "Time from claim to terminal status for a detection job"
    );
    metrics::describe_counter!("detection_jobs_completed_total", "Jobs completed");
    metrics::describe_counter!("detection_jobs_failed_total", "Jobs failed");
    metrics::describe_counter!(
        "detection_messages_dead_lettered_total",
        "Queue messages that could never be processed"
    );
    metrics::describe_counter!(
        "detection_messages_skipped_total",
        "Redelivered messages for jobs already terminal"
    );

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let storage = S3ArtifactStore::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
        config.s3_path_style,
    )
    .expect("Failed to initialize artifact storage");

    let queue = Arc::new(
        RedisJobQueue::new(&config.redis_url, config.visibility_timeout())
            .expect("Failed to initialize job queue"),
    );

    let detector = HttpLabelDetector::new(
        config.detector_url.clone(),
        config.detector_api_token.clone(),
        config.dependency_timeout(),
    )
    .expect("Failed to initialize label detector");

    let worker = Worker::new(
        Arc::new(storage),
        Arc::new(PgJobStatusStore::new(db_pool)),
        queue.clone(),
        Arc::new(detector),
        config.dependency_timeout(),
    );

    let poll_interval = config.poll_interval();

    tokio::spawn(reap_expired_leases(queue, poll_interval));

    tracing::info!(
        concurrency = config.worker_concurrency,
        "Worker ready, starting job processing loops"
    );

    let mut loops = Vec::with_capacity(config.worker_concurrency);
    for slot in 0..config.worker_concurrency.max(1) {
        loops.push(tokio::spawn(consume(worker.clone(), slot, poll_interval)));
    }
    for handle in loops {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker loop terminated");
        }
    }
}

/// One consumer: handles a single message at a time.
async fn consume(worker: Worker, slot: usize, poll_interval: Duration) {
    loop {
        match worker.run_once().await {
            Ok(true) => {
                tracing::debug!(slot, "Message processed, checking for next");
            }
            Ok(false) => {
                tracing::trace!(slot, "No messages available, sleeping");
                sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(slot, error = %e, "Error processing message, it will be redelivered");
                sleep(poll_interval).await;
            }
        }
    }
}

/// Returns messages whose visibility lease ran out to the queue.
async fn reap_expired_leases(queue: Arc<RedisJobQueue>, interval: Duration) {
    loop {
        match queue.requeue_expired().await {
            Ok(0) => {}
            Ok(count) => tracing::warn!(count, "Requeued messages with expired leases"),
            Err(e) => tracing::error!(error = %e, "Lease reaper failed"),
        }
        if let Ok(depth) = queue.queue_depth().await {
            metrics::gauge!("detection_queue_depth").set(depth as f64);
        }
        sleep(interval).await;
    }
}
