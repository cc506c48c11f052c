//! Shared application state.

use std::sync::Arc;

use engine::LifecycleEngine;
use event_store::EventStore;
use projections::{
    ProjectionProcessor, RevenueView, StudentCertificatesView, StudentEnrollmentsView,
};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub engine: LifecycleEngine<S>,
    pub enrollments: StudentEnrollmentsView,
    pub certificates: StudentCertificatesView,
    pub revenue: RevenueView,
    pub event_store: S,
    pub projection_processor: Arc<ProjectionProcessor<S>>,
}

impl<S: EventStore + Clone + 'static> AppState<S> {
    /// Brings the read models up to date with the log before a query.
    pub async fn catch_up(&self) -> Result<(), ApiError> {
        self.projection_processor.run_catch_up().await?;
        Ok(())
    }
}
