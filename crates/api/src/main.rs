//! API server entry point.

use std::sync::Arc;

use anyhow::Context;
use api::config::{Config, LogFormat};
use api::seed::Seed;
use engine::{
    CourseCatalog, InMemoryCertificateRenderer, InMemoryCourseCatalog, InMemoryStudentDirectory,
    StudentDirectory,
};
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Collaborators the engine reads from, filled from the seed file.
struct Collaborators {
    catalog: Arc<dyn CourseCatalog>,
    directory: Arc<dyn StudentDirectory>,
}

fn load_collaborators(config: &Config) -> anyhow::Result<Collaborators> {
    let seed = match &config.seed_file {
        Some(path) => Seed::load(path)?,
        None => Seed::default(),
    };
    let courses = seed.courses()?;
    let students = seed.students();
    tracing::info!(
        courses = courses.len(),
        students = students.len(),
        "collaborators seeded"
    );

    Ok(Collaborators {
        catalog: Arc::new(InMemoryCourseCatalog::with_courses(courses)),
        directory: Arc::new(InMemoryStudentDirectory::with_students(students)),
    })
}

async fn serve<S: EventStore + Clone + 'static>(
    event_store: S,
    config: &Config,
    collaborators: Collaborators,
    metrics_handle: PrometheusHandle,
) -> anyhow::Result<()> {
    let (state, worker) = api::create_state(
        event_store,
        collaborators.catalog,
        collaborators.directory,
        Arc::new(InMemoryCertificateRenderer::new()),
        config.engine_config(),
    );

    // Replay the log into the read models before taking traffic
    let replayed = state
        .projection_processor
        .run_catch_up()
        .await
        .context("projection catch-up failed")?;
    tracing::info!(replayed, "read models caught up");

    // The worker sweeps on start, so anything a previous run left pending
    // is rendered without waiting for new traffic
    let (stop_worker, worker_stopped) = oneshot::channel::<()>();
    let worker_task = tokio::spawn(worker.run(async move {
        let _ = worker_stopped.await;
    }));

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = stop_worker.send(());
    worker_task.await.context("artifact worker panicked")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    // 3. Load the course catalog and student directory
    let collaborators = load_collaborators(&config)?;

    // 4. Pick the event store and serve
    match &config.database_url {
        Some(url) => {
            let store = PostgresEventStore::connect(url, config.database_max_connections)
                .await
                .context("failed to connect to Postgres")?;
            store
                .run_migrations()
                .await
                .context("failed to run migrations")?;
            tracing::info!("using Postgres event store");
            serve(store, &config, collaborators, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, events are kept in memory only");
            serve(InMemoryEventStore::new(), &config, collaborators, metrics_handle).await
        }
    }
}
