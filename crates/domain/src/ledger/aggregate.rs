use chrono::{DateTime, Utc};
use common::{AggregateId, CourseId, StudentId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::money::Money;

use super::{
    PAYMENT_METHOD_UPI, TransactionError, TransactionEvent, TransactionOpenedData,
    TransactionStatus,
};

/// Input for opening a payment attempt.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub transaction_id: AggregateId,
    pub enrollment_id: AggregateId,
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub course_title: String,
    pub amount: Money,
    pub upi_id: String,
}

impl NewTransaction {
    /// UPI deep link the payer's app scans.
    pub fn qr_code_data(&self) -> String {
        format!(
            "upi://pay?pa={}&pn=ELearning&am={}&tn=Course-{}&cu=INR",
            self.upi_id, self.amount, self.course_title
        )
    }
}

/// One payment attempt for an enrollment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentTransaction {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    enrollment_id: Option<AggregateId>,
    student_id: Option<StudentId>,
    course_id: Option<CourseId>,
    course_title: String,
    amount: Money,
    status: TransactionStatus,
    payment_method: String,
    upi_id: String,
    qr_code_data: String,
    opened_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    refund_reason: Option<String>,
}

impl Aggregate for PaymentTransaction {
    type Event = TransactionEvent;
    type Error = TransactionError;

    fn aggregate_type() -> &'static str {
        "PaymentTransaction"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            TransactionEvent::TransactionOpened(data) => {
                self.id = Some(data.transaction_id);
                self.enrollment_id = Some(data.enrollment_id);
                self.student_id = Some(data.student_id);
                self.course_id = Some(data.course_id);
                self.course_title = data.course_title;
                self.amount = data.amount;
                self.payment_method = data.payment_method;
                self.upi_id = data.upi_id;
                self.qr_code_data = data.qr_code_data;
                self.opened_at = Some(data.opened_at);
                self.status = TransactionStatus::Pending;
            }
            TransactionEvent::TransactionCompleted(data) => {
                self.status = TransactionStatus::Completed;
                self.completed_at = Some(data.completed_at);
            }
            TransactionEvent::TransactionFailed(data) => {
                self.status = TransactionStatus::Failed;
                self.failure_reason = Some(data.reason);
            }
            TransactionEvent::TransactionRefunded(data) => {
                self.status = TransactionStatus::Refunded;
                self.refund_reason = Some(data.reason);
            }
        }
    }
}

impl PaymentTransaction {
    pub fn enrollment_id(&self) -> Option<AggregateId> {
        self.enrollment_id
    }

    pub fn student_id(&self) -> Option<StudentId> {
        self.student_id
    }

    pub fn course_id(&self) -> Option<CourseId> {
        self.course_id
    }

    pub fn course_title(&self) -> &str {
        &self.course_title
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn payment_method(&self) -> &str {
        &self.payment_method
    }

    pub fn upi_id(&self) -> &str {
        &self.upi_id
    }

    pub fn qr_code_data(&self) -> &str {
        &self.qr_code_data
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn refund_reason(&self) -> Option<&str> {
        self.refund_reason.as_deref()
    }
}

impl PaymentTransaction {
    pub fn open(&self, new: &NewTransaction) -> Result<Vec<TransactionEvent>, TransactionError> {
        if self.id.is_some() {
            return Err(TransactionError::AlreadyOpened);
        }

        Ok(vec![TransactionEvent::TransactionOpened(
            TransactionOpenedData {
                transaction_id: new.transaction_id,
                enrollment_id: new.enrollment_id,
                student_id: new.student_id,
                course_id: new.course_id,
                course_title: new.course_title.clone(),
                amount: new.amount,
                payment_method: PAYMENT_METHOD_UPI.to_string(),
                upi_id: new.upi_id.clone(),
                qr_code_data: new.qr_code_data(),
                opened_at: Utc::now(),
            },
        )])
    }

    /// Marks the payment as received. Completing twice is a no-op.
    pub fn complete(&self) -> Result<Vec<TransactionEvent>, TransactionError> {
        match self.ensure_opened()? {
            TransactionStatus::Pending => Ok(vec![TransactionEvent::completed()]),
            TransactionStatus::Completed => Ok(vec![]),
            current => Err(TransactionError::InvalidStateTransition {
                current,
                action: "complete",
            }),
        }
    }

    pub fn fail(&self, reason: &str) -> Result<Vec<TransactionEvent>, TransactionError> {
        match self.ensure_opened()? {
            TransactionStatus::Pending => Ok(vec![TransactionEvent::failed(reason)]),
            TransactionStatus::Failed => Ok(vec![]),
            current => Err(TransactionError::InvalidStateTransition {
                current,
                action: "fail",
            }),
        }
    }

    /// Refunds a completed payment. Refunding twice is a no-op.
    pub fn refund(&self, reason: &str) -> Result<Vec<TransactionEvent>, TransactionError> {
        match self.ensure_opened()? {
            TransactionStatus::Completed => Ok(vec![TransactionEvent::refunded(reason)]),
            TransactionStatus::Refunded => Ok(vec![]),
            current => Err(TransactionError::InvalidStateTransition {
                current,
                action: "refund",
            }),
        }
    }

    fn ensure_opened(&self) -> Result<TransactionStatus, TransactionError> {
        if self.id.is_none() {
            return Err(TransactionError::NotOpened);
        }
        Ok(self.status)
    }
}
