//! Certificate aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, CourseId, StudentId};
use event_store::Version;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::aggregate::Aggregate;

use super::events::{
    ArtifactRenderFailedData, ArtifactRenderRequestedData, ArtifactRenderedData,
    CertificateIssuedData, CertificateRevokedData,
};
use super::{CertificateError, CertificateEvent, CertificateId, Grade};

/// Rendering state of the downloadable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ArtifactState {
    /// Waiting for (another) render attempt.
    Pending {
        attempts: u32,
        last_error: Option<String>,
    },
    Ready { rendered_at: DateTime<Utc> },
    /// Automatic attempts are exhausted; only an explicit request re-renders.
    Failed { attempts: u32, last_error: String },
}

impl Default for ArtifactState {
    fn default() -> Self {
        ArtifactState::Pending {
            attempts: 0,
            last_error: None,
        }
    }
}

impl ArtifactState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ArtifactState::Ready { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ArtifactState::Pending { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ArtifactState::Pending { attempts, .. } | ArtifactState::Failed { attempts, .. } => {
                *attempts
            }
            ArtifactState::Ready { .. } => 0,
        }
    }
}

/// Input for issuing a certificate.
#[derive(Debug, Clone)]
pub struct NewCertificate {
    pub certificate_id: CertificateId,
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub enrollment_id: AggregateId,
    pub student_name: String,
    pub course_title: String,
    pub progress: u8,
    pub verification_url: String,
    pub completed_at: DateTime<Utc>,
}

/// Proof that a student completed a course.
///
/// One stream per (student, course), keyed by [`Certificate::stream_id`].
/// Issuing appends to that stream expecting it to be new, so a second
/// issuer loses at the store.
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Certificate {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    certificate_id: Option<CertificateId>,
    student_id: Option<StudentId>,
    course_id: Option<CourseId>,
    enrollment_id: Option<AggregateId>,
    student_name: String,
    course_title: String,
    grade: Option<Grade>,
    progress: u8,
    verification_url: String,
    completed_at: Option<DateTime<Utc>>,
    issued_at: Option<DateTime<Utc>>,
    artifact_state: ArtifactState,

    #[serde_as(as = "Option<Base64>")]
    artifact: Option<Vec<u8>>,

    revoked_reason: Option<String>,
    revoked_at: Option<DateTime<Utc>>,
}

impl Aggregate for Certificate {
    type Event = CertificateEvent;
    type Error = CertificateError;

    fn aggregate_type() -> &'static str {
        "Certificate"
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
            CertificateEvent::CertificateIssued(data) => self.apply_issued(data),
            CertificateEvent::ArtifactRendered(data) => {
                self.artifact = Some(data.bytes);
                self.artifact_state = ArtifactState::Ready {
                    rendered_at: data.rendered_at,
                };
            }
            CertificateEvent::ArtifactRenderFailed(data) => {
                self.artifact_state = if data.exhausted {
                    ArtifactState::Failed {
                        attempts: data.attempt,
                        last_error: data.error,
                    }
                } else {
                    ArtifactState::Pending {
                        attempts: data.attempt,
                        last_error: Some(data.error),
                    }
                };
            }
            CertificateEvent::ArtifactRenderRequested(_) => {
                self.artifact = None;
                self.artifact_state = ArtifactState::default();
            }
            CertificateEvent::CertificateRevoked(data) => {
                self.revoked_reason = Some(data.reason);
                self.revoked_at = Some(data.revoked_at);
            }
        }
    }
}

impl Certificate {
    pub fn stream_id(student_id: StudentId, course_id: CourseId) -> AggregateId {
        AggregateId::derived("certificate", &[student_id.as_uuid(), course_id.as_uuid()])
    }

    fn apply_issued(&mut self, data: CertificateIssuedData) {
        self.id = Some(Self::stream_id(data.student_id, data.course_id));
        self.certificate_id = Some(data.certificate_id);
        self.student_id = Some(data.student_id);
        self.course_id = Some(data.course_id);
        self.enrollment_id = Some(data.enrollment_id);
        self.student_name = data.student_name;
        self.course_title = data.course_title;
        self.grade = Some(data.grade);
        self.progress = data.progress;
        self.verification_url = data.verification_url;
        self.completed_at = Some(data.completed_at);
        self.issued_at = Some(data.issued_at);
        self.artifact_state = ArtifactState::default();
    }
}

// Query methods
impl Certificate {
    pub fn certificate_id(&self) -> Option<&CertificateId> {
        self.certificate_id.as_ref()
    }

    pub fn student_id(&self) -> Option<StudentId> {
        self.student_id
    }

    pub fn course_id(&self) -> Option<CourseId> {
        self.course_id
    }

    pub fn enrollment_id(&self) -> Option<AggregateId> {
        self.enrollment_id
    }

    pub fn student_name(&self) -> &str {
        &self.student_name
    }

    pub fn course_title(&self) -> &str {
        &self.course_title
    }

    pub fn grade(&self) -> Option<Grade> {
        self.grade
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn verification_url(&self) -> &str {
        &self.verification_url
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    pub fn artifact_state(&self) -> &ArtifactState {
        &self.artifact_state
    }

    pub fn artifact(&self) -> Option<&[u8]> {
        self.artifact.as_deref()
    }

    pub fn is_valid(&self) -> bool {
        self.revoked_reason.is_none()
    }

    pub fn revoked_reason(&self) -> Option<&str> {
        self.revoked_reason.as_deref()
    }

    pub fn revoked_at(&self) -> Option<DateTime<Utc>> {
        self.revoked_at
    }

    pub fn is_owned_by(&self, student_id: StudentId) -> bool {
        self.student_id == Some(student_id)
    }
}

// Command methods (return events)
impl Certificate {
    pub fn issue(&self, new: NewCertificate) -> Result<Vec<CertificateEvent>, CertificateError> {
        if self.id.is_some() {
            return Err(CertificateError::AlreadyIssued);
        }

        Ok(vec![CertificateEvent::CertificateIssued(
            CertificateIssuedData {
                certificate_id: new.certificate_id,
                student_id: new.student_id,
                course_id: new.course_id,
                enrollment_id: new.enrollment_id,
                student_name: new.student_name,
                course_title: new.course_title,
                grade: Grade::from_progress(new.progress),
                progress: new.progress,
                verification_url: new.verification_url,
                completed_at: new.completed_at,
                issued_at: Utc::now(),
            },
        )])
    }

    /// Stores rendered bytes. A second successful render is dropped.
    pub fn record_render(&self, bytes: Vec<u8>) -> Result<Vec<CertificateEvent>, CertificateError> {
        self.ensure_issued()?;

        if self.artifact_state.is_ready() || !self.is_valid() {
            return Ok(vec![]);
        }

        Ok(vec![CertificateEvent::ArtifactRendered(
            ArtifactRenderedData {
                bytes,
                attempt: self.artifact_state.attempts() + 1,
                rendered_at: Utc::now(),
            },
        )])
    }

    /// Records a failed attempt; the artifact is marked failed once
    /// `max_attempts` attempts have failed.
    pub fn record_render_failure(
        &self,
        error: &str,
        max_attempts: u32,
    ) -> Result<Vec<CertificateEvent>, CertificateError> {
        self.ensure_issued()?;

        if !self.artifact_state.is_pending() {
            return Ok(vec![]);
        }

        let attempt = self.artifact_state.attempts() + 1;
        Ok(vec![CertificateEvent::ArtifactRenderFailed(
            ArtifactRenderFailedData {
                attempt,
                error: error.to_string(),
                exhausted: attempt >= max_attempts,
                failed_at: Utc::now(),
            },
        )])
    }

    /// Puts the artifact back in the render queue. Pending artifacts are
    /// already queued and are left alone.
    pub fn request_render(&self) -> Result<Vec<CertificateEvent>, CertificateError> {
        self.ensure_issued()?;

        if let Some(reason) = &self.revoked_reason {
            return Err(CertificateError::Revoked {
                reason: reason.clone(),
            });
        }

        if self.artifact_state.is_pending() {
            return Ok(vec![]);
        }

        Ok(vec![CertificateEvent::ArtifactRenderRequested(
            ArtifactRenderRequestedData {
                requested_at: Utc::now(),
            },
        )])
    }

    /// Revokes the certificate. Revoking twice keeps the first reason.
    pub fn revoke(&self, reason: &str) -> Result<Vec<CertificateEvent>, CertificateError> {
        self.ensure_issued()?;

        if self.revoked_reason.is_some() {
            return Ok(vec![]);
        }

        Ok(vec![CertificateEvent::CertificateRevoked(
            CertificateRevokedData {
                reason: reason.to_string(),
                revoked_at: Utc::now(),
            },
        )])
    }

    fn ensure_issued(&self) -> Result<(), CertificateError> {
        if self.id.is_none() {
            return Err(CertificateError::NotIssued);
        }
        Ok(())
    }
}
