//! Certificates of completion and their rendered artifacts.

mod aggregate;
mod events;
mod grade;
mod id;
mod lookup;

pub use aggregate::{ArtifactState, Certificate, NewCertificate};
pub use events::{
    ArtifactRenderFailedData, ArtifactRenderRequestedData, ArtifactRenderedData,
    CertificateEvent, CertificateIssuedData, CertificateRevokedData,
};
pub use grade::Grade;
pub use id::CertificateId;
pub use lookup::{CertificateLookup, CertificateLookupEvent, CertificateRegisteredData};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Certificate already issued")]
    AlreadyIssued,

    #[error("Certificate has not been issued")]
    NotIssued,

    #[error("Certificate has been revoked: {reason}")]
    Revoked { reason: String },

    #[error("Certificate id is already registered")]
    AlreadyRegistered,
}
