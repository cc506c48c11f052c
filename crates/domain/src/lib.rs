//! Domain layer for the enrollment lifecycle engine.
//!
//! This crate provides:
//! - the Aggregate and DomainEvent traits for event-sourced records
//! - CommandHandler, which loads a stream, decides and appends
//! - the enrollment, payment transaction, course roster, lesson progress
//!   and certificate aggregates

pub mod aggregate;
pub mod certificate;
pub mod command;
pub mod enrollment;
pub mod error;
pub mod ledger;
pub mod money;
pub mod progress;
pub mod roster;

pub use aggregate::{Aggregate, DomainEvent, SnapshotCapable};
pub use certificate::{
    ArtifactState, Certificate, CertificateError, CertificateEvent, CertificateId,
    CertificateLookup, Grade, NewCertificate,
};
pub use command::{CommandHandler, CommandResult};
pub use enrollment::{
    Enrollment, EnrollmentError, EnrollmentEvent, EnrollmentStatus, PaymentStatus,
    progress_percent,
};
pub use error::DomainError;
pub use ledger::{
    NewTransaction, PAYMENT_METHOD_UPI, PaymentTransaction, TransactionError, TransactionEvent,
    TransactionStatus,
};
pub use money::Money;
pub use progress::{COMPLETION_THRESHOLD, LessonKey, LessonProgress, LessonProgressError};
pub use roster::{CourseRoster, RosterError, RosterEvent};
