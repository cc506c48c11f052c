//! Domain error types.

use event_store::EventStoreError;
use thiserror::Error;

use crate::certificate::CertificateError;
use crate::enrollment::EnrollmentError;
use crate::ledger::TransactionError;
use crate::progress::LessonProgressError;
use crate::roster::RosterError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Enrollment error: {0}")]
    Enrollment(#[from] EnrollmentError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Lesson progress error: {0}")]
    LessonProgress(#[from] LessonProgressError),

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    #[error("Roster error: {0}")]
    Roster(#[from] RosterError),

    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// True when the write lost an optimistic concurrency race.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_concurrency_conflict())
    }
}
