use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use label_detect_jobs::app_state::AppState;
use label_detect_jobs::config::AppConfig;
use label_detect_jobs::db::{self, queries::PgJobStatusStore};
use label_detect_jobs::routes::{self, metrics::MetricsState};
use label_detect_jobs::services::{queue::RedisJobQueue, storage::S3ArtifactStore};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing label-detect-jobs API server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "detection_jobs_submitted_total",
        "Total detection jobs admitted by intake"
    );
    metrics::describe_gauge!(
        "detection_queue_depth",
        "Current number of messages waiting in the queue"
    );
    metrics::describe_gauge!(
        "detection_dead_letter_depth",
        "Messages parked in the dead-letter list"
    );

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing artifact storage client");
    let storage = S3ArtifactStore::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
        config.s3_path_style,
    )
    .expect("Failed to initialize artifact storage");

    tracing::info!("Connecting to Redis job queue");
    let queue = Arc::new(
        RedisJobQueue::new(&config.redis_url, config.visibility_timeout())
            .expect("Failed to initialize job queue"),
    );

    let state = AppState::new(
        Arc::new(storage),
        Arc::new(PgJobStatusStore::new(db_pool)),
        queue.clone(),
        config.url_ttl(),
    );
    let metrics_state = MetricsState {
        handle: prometheus_handle,
        queue,
    };

    let app = routes::api_router(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(metrics_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes));

    tracing::info!("Starting label-detect-jobs on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
