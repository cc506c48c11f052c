//! Certificate domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, CourseId, StudentId};
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::aggregate::DomainEvent;

use super::{CertificateId, Grade};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CertificateEvent {
    /// The certificate record exists; its artifact is not rendered yet.
    CertificateIssued(CertificateIssuedData),

    ArtifactRendered(ArtifactRenderedData),

    ArtifactRenderFailed(ArtifactRenderFailedData),

    /// An administrator asked for the artifact to be rendered again.
    ArtifactRenderRequested(ArtifactRenderRequestedData),

    CertificateRevoked(CertificateRevokedData),
}

impl DomainEvent for CertificateEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CertificateEvent::CertificateIssued(_) => "CertificateIssued",
            CertificateEvent::ArtifactRendered(_) => "ArtifactRendered",
            CertificateEvent::ArtifactRenderFailed(_) => "ArtifactRenderFailed",
            CertificateEvent::ArtifactRenderRequested(_) => "ArtifactRenderRequested",
            CertificateEvent::CertificateRevoked(_) => "CertificateRevoked",
        }
    }
}

/// Everything printed on the certificate, captured at issue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateIssuedData {
    pub certificate_id: CertificateId,
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub enrollment_id: AggregateId,
    pub student_name: String,
    pub course_title: String,
    pub grade: Grade,
    pub progress: u8,
    pub verification_url: String,
    pub completed_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRenderedData {
    #[serde_as(as = "Base64")]
    pub bytes: Vec<u8>,
    pub attempt: u32,
    pub rendered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRenderFailedData {
    pub attempt: u32,
    pub error: String,

    /// No further automatic attempts will be made.
    pub exhausted: bool,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRenderRequestedData {
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRevokedData {
    pub reason: String,
    pub revoked_at: DateTime<Utc>,
}
