//! HTTP API for the enrollment lifecycle engine.
//!
//! Provides REST endpoints for enrollment, lesson progress and
//! certificates, with structured logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod seed;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use engine::{
    ArtifactWorker, CertificateRenderer, CourseCatalog, EngineConfig, InMemoryCertificateRenderer,
    InMemoryCourseCatalog, InMemoryStudentDirectory, LifecycleEngine, StudentDirectory,
};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{
    Projection, ProjectionProcessor, RevenueView, StudentCertificatesView, StudentEnrollmentsView,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::{admin, certificates, enrollments, progress};

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/enrollments/initiate", post(enrollments::initiate::<S>))
        .route("/enrollments/confirm", post(enrollments::confirm::<S>))
        .route("/enrollments/payment-failed", post(enrollments::payment_failed::<S>))
        .route("/enrollments/status/{course_id}", get(enrollments::status::<S>))
        .route("/enrollments/mine", get(enrollments::mine::<S>))
        .route("/progress/update", post(progress::update::<S>))
        .route("/progress/complete", post(progress::complete::<S>))
        .route("/progress/course/{course_id}", get(progress::course::<S>))
        .route("/progress/{course_id}/{lesson_id}", get(progress::lesson::<S>))
        .route("/certificates/generate", post(certificates::generate::<S>))
        .route("/certificates/mine", get(certificates::mine::<S>))
        .route("/certificates/verify/{certificate_id}", get(certificates::verify::<S>))
        .route("/certificates/{certificate_id}/download", get(certificates::download::<S>))
        .route("/certificates/{certificate_id}", get(certificates::get::<S>))
        .route(
            "/admin/certificates/{certificate_id}/revoke",
            post(admin::revoke_certificate::<S>),
        )
        .route(
            "/admin/certificates/{certificate_id}/render",
            post(admin::render_certificate::<S>),
        )
        .route(
            "/admin/transactions/{transaction_id}/refund",
            post(admin::refund_transaction::<S>),
        )
        .route("/admin/transactions/stats", get(admin::transaction_stats::<S>))
        .route("/admin/enrollments/cancel", post(admin::cancel_enrollment::<S>))
        .route("/admin/streams/{id}/events", get(admin::stream_events::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the engine, read models and projection processor to one store.
///
/// Returns the state for the router and the artifact worker, which the
/// caller must run (or drain) for certificates to be rendered.
pub fn create_state<S: EventStore + Clone + 'static>(
    event_store: S,
    catalog: Arc<dyn CourseCatalog>,
    directory: Arc<dyn StudentDirectory>,
    renderer: Arc<dyn CertificateRenderer>,
    config: EngineConfig,
) -> (Arc<AppState<S>>, ArtifactWorker<S>) {
    let (engine, worker) =
        LifecycleEngine::new(event_store.clone(), catalog, directory, renderer, config);

    let enrollments = StudentEnrollmentsView::new();
    let certificates = StudentCertificatesView::new();
    let revenue = RevenueView::new();

    let mut processor = ProjectionProcessor::new(event_store.clone());
    processor.register(Box::new(enrollments.clone()) as Box<dyn Projection>);
    processor.register(Box::new(certificates.clone()) as Box<dyn Projection>);
    processor.register(Box::new(revenue.clone()) as Box<dyn Projection>);

    let state = Arc::new(AppState {
        engine,
        enrollments,
        certificates,
        revenue,
        event_store,
        projection_processor: Arc::new(processor),
    });

    (state, worker)
}

/// Creates the default application state with empty in-memory
/// collaborators and default engine settings.
pub fn create_default_state<S: EventStore + Clone + 'static>(
    event_store: S,
) -> (Arc<AppState<S>>, ArtifactWorker<S>) {
    create_state(
        event_store,
        Arc::new(InMemoryCourseCatalog::new()),
        Arc::new(InMemoryStudentDirectory::new()),
        Arc::new(InMemoryCertificateRenderer::new()),
        EngineConfig::default(),
    )
}
