//! Payment transaction events.

use chrono::{DateTime, Utc};
use common::{AggregateId, CourseId, StudentId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::money::Money;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransactionEvent {
    TransactionOpened(TransactionOpenedData),
    TransactionCompleted(TransactionCompletedData),
    TransactionFailed(TransactionFailedData),
    TransactionRefunded(TransactionRefundedData),
}

impl DomainEvent for TransactionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransactionEvent::TransactionOpened(_) => "TransactionOpened",
            TransactionEvent::TransactionCompleted(_) => "TransactionCompleted",
            TransactionEvent::TransactionFailed(_) => "TransactionFailed",
            TransactionEvent::TransactionRefunded(_) => "TransactionRefunded",
        }
    }
}

/// Everything fixed at the moment a payment attempt starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionOpenedData {
    pub transaction_id: AggregateId,
    pub enrollment_id: AggregateId,
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub course_title: String,

    /// Course price when the payment was initiated.
    pub amount: Money,

    pub payment_method: String,
    pub upi_id: String,
    pub qr_code_data: String,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionCompletedData {
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRefundedData {
    pub reason: String,
    pub refunded_at: DateTime<Utc>,
}

impl TransactionEvent {
    pub fn completed() -> Self {
        TransactionEvent::TransactionCompleted(TransactionCompletedData {
            completed_at: Utc::now(),
        })
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        TransactionEvent::TransactionFailed(TransactionFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }

    pub fn refunded(reason: impl Into<String>) -> Self {
        TransactionEvent::TransactionRefunded(TransactionRefundedData {
            reason: reason.into(),
            refunded_at: Utc::now(),
        })
    }
}
