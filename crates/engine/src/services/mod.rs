//! Collaborators the engine calls out to.
//!
//! Each is a trait so deployments can plug in the real catalog, directory
//! and renderer; the in-memory versions back tests and local runs.

pub mod catalog;
pub mod directory;
pub mod renderer;

pub use catalog::{Course, CourseCatalog, InMemoryCourseCatalog};
pub use directory::{InMemoryStudentDirectory, Student, StudentDirectory};
pub use renderer::{
    CertificateDocument, CertificateRenderer, InMemoryCertificateRenderer, RenderError,
    certificate_pdf,
};
