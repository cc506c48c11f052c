//! Enrollment domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, CourseId, LessonId, StudentId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::money::Money;

/// Events recorded on an enrollment stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EnrollmentEvent {
    /// The student started enrolling, or re-enrolled after a cancellation.
    EnrollmentInitiated(EnrollmentInitiatedData),

    /// A payment attempt now backs the enrollment.
    TransactionAttached(TransactionAttachedData),

    PaymentConfirmed(PaymentConfirmedData),

    PaymentFailed(PaymentFailedData),

    LessonAccessed(LessonAccessedData),

    /// A lesson joined the completed set. Never recorded twice for a lesson.
    LessonCompleted(LessonCompletedData),

    /// Course progress moved up.
    ProgressRecalculated(ProgressRecalculatedData),

    EnrollmentCompleted(EnrollmentCompletedData),

    EnrollmentCancelled(EnrollmentCancelledData),
}

impl DomainEvent for EnrollmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            EnrollmentEvent::EnrollmentInitiated(_) => "EnrollmentInitiated",
            EnrollmentEvent::TransactionAttached(_) => "TransactionAttached",
            EnrollmentEvent::PaymentConfirmed(_) => "PaymentConfirmed",
            EnrollmentEvent::PaymentFailed(_) => "PaymentFailed",
            EnrollmentEvent::LessonAccessed(_) => "LessonAccessed",
            EnrollmentEvent::LessonCompleted(_) => "LessonCompleted",
            EnrollmentEvent::ProgressRecalculated(_) => "ProgressRecalculated",
            EnrollmentEvent::EnrollmentCompleted(_) => "EnrollmentCompleted",
            EnrollmentEvent::EnrollmentCancelled(_) => "EnrollmentCancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentInitiatedData {
    pub enrollment_id: AggregateId,
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub initiated_at: DateTime<Utc>,

    /// True when a cancelled enrollment was reopened.
    #[serde(default)]
    pub reopened: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionAttachedData {
    pub transaction_id: AggregateId,
    pub amount: Money,
    pub attached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmedData {
    pub transaction_id: AggregateId,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedData {
    pub transaction_id: AggregateId,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonAccessedData {
    pub lesson_id: LessonId,
    pub accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonCompletedData {
    pub lesson_id: LessonId,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecalculatedData {
    /// Whole percent, 0 to 100.
    pub progress: u8,
    pub completed_lessons: usize,
    pub total_lessons: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentCompletedData {
    pub completed_at: DateTime<Utc>,
    pub progress: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentCancelledData {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

impl EnrollmentEvent {
    pub fn initiated(
        enrollment_id: AggregateId,
        student_id: StudentId,
        course_id: CourseId,
        reopened: bool,
    ) -> Self {
        EnrollmentEvent::EnrollmentInitiated(EnrollmentInitiatedData {
            enrollment_id,
            student_id,
            course_id,
            initiated_at: Utc::now(),
            reopened,
        })
    }

    pub fn transaction_attached(transaction_id: AggregateId, amount: Money) -> Self {
        EnrollmentEvent::TransactionAttached(TransactionAttachedData {
            transaction_id,
            amount,
            attached_at: Utc::now(),
        })
    }

    pub fn payment_confirmed(transaction_id: AggregateId) -> Self {
        EnrollmentEvent::PaymentConfirmed(PaymentConfirmedData {
            transaction_id,
            confirmed_at: Utc::now(),
        })
    }

    pub fn payment_failed(transaction_id: AggregateId, reason: impl Into<String>) -> Self {
        EnrollmentEvent::PaymentFailed(PaymentFailedData {
            transaction_id,
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }

    pub fn lesson_accessed(lesson_id: LessonId) -> Self {
        EnrollmentEvent::LessonAccessed(LessonAccessedData {
            lesson_id,
            accessed_at: Utc::now(),
        })
    }

    pub fn lesson_completed(lesson_id: LessonId) -> Self {
        EnrollmentEvent::LessonCompleted(LessonCompletedData {
            lesson_id,
            completed_at: Utc::now(),
        })
    }

    pub fn progress_recalculated(
        progress: u8,
        completed_lessons: usize,
        total_lessons: usize,
    ) -> Self {
        EnrollmentEvent::ProgressRecalculated(ProgressRecalculatedData {
            progress,
            completed_lessons,
            total_lessons,
        })
    }

    pub fn completed(progress: u8) -> Self {
        EnrollmentEvent::EnrollmentCompleted(EnrollmentCompletedData {
            completed_at: Utc::now(),
            progress,
        })
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        EnrollmentEvent::EnrollmentCancelled(EnrollmentCancelledData {
            reason: reason.into(),
            cancelled_at: Utc::now(),
        })
    }
}
