//! Payment transactions.
//!
//! Each payment attempt is its own stream. A transaction is opened in the
//! same batch that creates or re-arms its enrollment, and completed in the
//! same batch that activates it.

mod aggregate;
mod events;

pub use aggregate::{NewTransaction, PaymentTransaction};
pub use events::{
    TransactionCompletedData, TransactionEvent, TransactionFailedData, TransactionOpenedData,
    TransactionRefundedData,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payment method recorded on every transaction.
pub const PAYMENT_METHOD_UPI: &str = "UPI";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Transaction already opened")]
    AlreadyOpened,

    #[error("Transaction has not been opened")]
    NotOpened,

    #[error("Invalid state transition: cannot {action} a {current} transaction")]
    InvalidStateTransition {
        current: TransactionStatus,
        action: &'static str,
    },
}
