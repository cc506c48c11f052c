//! Engine error types.

use common::{AggregateId, CourseId, LessonId, StudentId};
use domain::{
    CertificateError, DomainError, EnrollmentError, LessonProgressError, RosterError,
    TransactionError,
};
use event_store::EventStoreError;
use thiserror::Error;

use crate::services::RenderError;

/// Errors surfaced by the lifecycle engine.
///
/// Variants group into not-found, conflict, forbidden, validation and
/// transient failures; the HTTP layer maps each group to a status.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Course not found: {0}")]
    CourseNotFound(CourseId),

    #[error("Lesson {lesson_id} is not part of course {course_id}")]
    LessonNotFound {
        course_id: CourseId,
        lesson_id: LessonId,
    },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(AggregateId),

    #[error("No enrollment for student {student_id} in course {course_id}")]
    EnrollmentNotFound {
        student_id: StudentId,
        course_id: CourseId,
    },

    #[error("Certificate not found: {0}")]
    CertificateNotFound(String),

    #[error("Student not found: {0}")]
    StudentNotFound(StudentId),

    #[error("Already enrolled in this course")]
    AlreadyEnrolled,

    #[error("Not enrolled in this course")]
    NotEnrolled,

    #[error("Access denied: {0}")]
    Forbidden(&'static str),

    #[error("Course not completed yet")]
    CourseNotCompleted,

    #[error("Certificate has been revoked: {reason}")]
    CertificateRevoked { reason: String },

    #[error("Certificate is still being generated, please retry")]
    ArtifactNotReady,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{operation} kept conflicting with concurrent writers after {attempts} attempts")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
    },

    #[error("Certificate rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Domain error: {0}")]
    Domain(DomainError),
}

impl EngineError {
    /// True when the operation lost an optimistic concurrency race and
    /// may succeed if re-run against fresh state.
    pub fn is_concurrency_conflict(&self) -> bool {
        match self {
            EngineError::EventStore(e) => e.is_concurrency_conflict(),
            EngineError::Domain(e) => e.is_concurrency_conflict(),
            _ => false,
        }
    }
}

impl From<DomainError> for EngineError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::EventStore(e) => EngineError::EventStore(e),
            DomainError::Enrollment(EnrollmentError::AlreadyEnrolled) => {
                EngineError::AlreadyEnrolled
            }
            DomainError::Enrollment(EnrollmentError::NotEnrolled) => EngineError::NotEnrolled,
            DomainError::Enrollment(
                e @ (EnrollmentError::NotInitiated
                | EnrollmentError::PaymentPending { .. }
                | EnrollmentError::TransactionMismatch { .. }
                | EnrollmentError::InvalidStateTransition { .. }),
            ) => EngineError::InvalidState(e.to_string()),
            DomainError::Transaction(e) => EngineError::InvalidState(e.to_string()),
            DomainError::LessonProgress(LessonProgressError::InvalidReport(message)) => {
                EngineError::Validation(message)
            }
            DomainError::Certificate(CertificateError::Revoked { reason }) => {
                EngineError::CertificateRevoked { reason }
            }
            other => EngineError::Domain(other),
        }
    }
}

macro_rules! via_domain_error {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for EngineError {
                fn from(err: $err) -> Self {
                    DomainError::from(err).into()
                }
            }
        )*
    };
}

via_domain_error!(
    EnrollmentError,
    TransactionError,
    LessonProgressError,
    CertificateError,
    RosterError,
);

pub type Result<T> = std::result::Result<T, EngineError>;
