//! Enrollment and payment status machines.

use serde::{Deserialize, Serialize};

/// Where a student's enrollment in a course stands.
///
/// State transitions:
/// ```text
/// Pending ──► Active ──► Completed
///    │          │
///    └──────────┴──► Cancelled ──► Pending (re-initiation)
/// ```
///
/// `Paid` is a legacy name for `Active` and is treated identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    #[default]
    Pending,
    Paid,
    Active,
    Completed,
    Cancelled,
}

impl EnrollmentStatus {
    /// The single access rule: the student may use the course content.
    pub fn grants_access(&self) -> bool {
        matches!(
            self,
            EnrollmentStatus::Active | EnrollmentStatus::Paid | EnrollmentStatus::Completed
        )
    }

    /// A new payment attempt may be opened.
    pub fn can_initiate(&self) -> bool {
        matches!(self, EnrollmentStatus::Pending | EnrollmentStatus::Cancelled)
    }

    pub fn can_confirm_payment(&self) -> bool {
        matches!(self, EnrollmentStatus::Pending)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            EnrollmentStatus::Pending | EnrollmentStatus::Active | EnrollmentStatus::Paid
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "pending",
            EnrollmentStatus::Paid => "paid",
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment side of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
