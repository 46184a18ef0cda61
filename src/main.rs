use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use restyle_orchestrator::{
    config::{AppConfig, RunConfig},
    db,
    models::remote::{ImagePayload, StageParams},
    services::{
        collaborators::{LogNotifier, MemoryResultStore, ResultStore},
        orchestrator::{JobEvent, JobOrchestrator},
        transport::HttpTransport,
    },
    Stage, StyleId,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let run = RunConfig::from_env().expect("Failed to load IMAGE_PATH / STYLE_ID from environment");

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");

        metrics::describe_counter!("restyle_jobs_started_total", "Jobs started");
        metrics::describe_counter!("restyle_jobs_completed_total", "Jobs that reached Complete");
        metrics::describe_counter!("restyle_jobs_failed_total", "Job failures by stage and kind");
        metrics::describe_counter!("restyle_poll_attempts_total", "Status checks by stage");
        metrics::describe_histogram!("restyle_stage_seconds", "Time spent per stage");
        tracing::info!(%addr, "Prometheus exporter listening");
    }

    let style = StyleId::parse(run.style_id.as_str()).expect("Invalid STYLE_ID");

    let store: Arc<dyn ResultStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL");
            let pool = db::init_pool(url).await.expect("Failed to connect to database");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            Arc::new(db::PgResultStore::new(pool))
        }
        None => Arc::new(MemoryResultStore::new()),
    };

    let transport = HttpTransport::new(&config.service_url, config.request_timeout())
        .expect("Failed to build HTTP client");

    let orchestrator = Arc::new(
        JobOrchestrator::new(Arc::new(transport), config.orchestrator_settings())
            .with_store(store)
            .with_notifier(Arc::new(LogNotifier)),
    );

    let mut events = orchestrator.subscribe_events();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                JobEvent::StageChanged { from, to, .. } => {
                    tracing::info!(%from, %to, "Stage changed");
                }
                JobEvent::Status { stage, status } => {
                    tracing::debug!(%stage, %status, "Remote status");
                }
                JobEvent::Progress { stage, progress } => {
                    tracing::info!(%stage, progress = %format!("{:.0}%", progress * 100.0), "Progress");
                }
                JobEvent::Failed(error) => {
                    tracing::error!(stage = %error.stage, kind = %error.kind, "{}", error.message);
                }
            }
        }
    });

    let image = ImagePayload::from_path(&run.image_path)
        .await
        .expect("Failed to read image");
    let params = StageParams {
        room_type: run.room_type.clone(),
        ..Default::default()
    };

    tracing::info!(image = %run.image_path, style = %style, "Starting restyle job");

    let pipeline = {
        let orchestrator = orchestrator.clone();
        async move {
            orchestrator.start(image, params).await;
            orchestrator.apply_style(style).await;
        }
    };

    tokio::select! {
        _ = pipeline => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted");
            orchestrator.cancel();
        }
    }

    let job = orchestrator.snapshot();
    match job.stage {
        Stage::Complete => {
            println!(
                "{}",
                serde_json::to_string_pretty(&job).expect("Job serializes to JSON")
            );
            ExitCode::SUCCESS
        }
        _ => {
            if let Some(error) = &job.last_error {
                tracing::error!(
                    stage = %error.stage,
                    kind = %error.kind,
                    retryable = error.retryable,
                    "Job did not complete: {}",
                    error.message
                );
            }
            ExitCode::FAILURE
        }
    }
}
