//! Read models for the query side.
//!
//! - [`Projection`] folds log entries into a read model
//! - [`ProjectionProcessor`] feeds the global log to projections
//! - views: student enrollments, student certificates, revenue statistics

pub mod error;
pub mod processor;
pub mod projection;
pub mod read_model;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
pub use read_model::ReadModel;
pub use views::{
    CertificateSummary, CourseRevenue, EnrollmentSummary, MonthlyRevenue, RevenueStats,
    RevenueView, StudentCertificatesView, StudentEnrollmentsView,
};
