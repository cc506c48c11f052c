//! Enrollment aggregate and related types.

mod aggregate;
mod events;
mod state;

pub use aggregate::{Enrollment, progress_percent};
pub use events::{
    EnrollmentCancelledData, EnrollmentCompletedData, EnrollmentEvent, EnrollmentInitiatedData,
    LessonAccessedData, LessonCompletedData, PaymentConfirmedData, PaymentFailedData,
    ProgressRecalculatedData, TransactionAttachedData,
};
pub use state::{EnrollmentStatus, PaymentStatus};

use common::AggregateId;
use thiserror::Error;

/// Errors that can occur during enrollment operations.
#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("Already enrolled in this course")]
    AlreadyEnrolled,

    #[error("Enrollment has not been initiated")]
    NotInitiated,

    /// The enrollment does not grant access to the course.
    #[error("Not enrolled in this course")]
    NotEnrolled,

    #[error("Payment {transaction_id} is still pending")]
    PaymentPending { transaction_id: AggregateId },

    #[error("Transaction {given} does not back this enrollment")]
    TransactionMismatch {
        current: Option<AggregateId>,
        given: AggregateId,
    },

    #[error("Invalid state transition: cannot {action} from {current} state")]
    InvalidStateTransition {
        current: EnrollmentStatus,
        action: &'static str,
    },
}
