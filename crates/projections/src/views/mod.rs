//! Read model views built from the event log.

pub mod revenue;
pub mod student_certificates;
pub mod student_enrollments;

pub use revenue::{CourseRevenue, MonthlyRevenue, RevenueStats, RevenueView};
pub use student_certificates::{CertificateSummary, StudentCertificatesView};
pub use student_enrollments::{EnrollmentSummary, StudentEnrollmentsView};
