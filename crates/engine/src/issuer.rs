//! Certificate issuance, lookup and administration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{AggregateId, CourseId, StudentId};
use domain::{
    Aggregate, Certificate, CertificateId, CertificateLookup, Enrollment, Grade, NewCertificate,
};
use event_store::EventStore;
use tokio::sync::mpsc;

use crate::access::Requester;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::retry::with_conflict_retry;
use crate::services::{CourseCatalog, StudentDirectory};
use crate::streams::Streams;

/// Public view of a valid certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub certificate_id: String,
    pub student_name: String,
    pub course_title: String,
    pub grade: Grade,
    pub progress: u8,
    pub issued_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub verification_url: String,
    pub is_valid: bool,
    pub artifact_ready: bool,
}

impl Verification {
    fn of(certificate: &Certificate) -> Self {
        Self {
            certificate_id: certificate
                .certificate_id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            student_name: certificate.student_name().to_string(),
            course_title: certificate.course_title().to_string(),
            grade: certificate.grade().unwrap_or(Grade::Pass),
            progress: certificate.progress(),
            issued_at: certificate.issued_at(),
            completed_at: certificate.completed_at(),
            verification_url: certificate.verification_url().to_string(),
            is_valid: certificate.is_valid(),
            artifact_ready: certificate.artifact_state().is_ready(),
        }
    }
}

/// A rendered certificate ready to send.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Issues at most one certificate per (student, course).
///
/// The certificate stream id is derived from the pair, so two issuers
/// racing for the same completion collide on the stream's first version.
/// The loser reads back the winner's record.
pub struct CertificateIssuer<S: EventStore> {
    streams: Arc<Streams<S>>,
    catalog: Arc<dyn CourseCatalog>,
    directory: Arc<dyn StudentDirectory>,
    config: Arc<EngineConfig>,
    render_queue: mpsc::UnboundedSender<AggregateId>,
}

impl<S> CertificateIssuer<S>
where
    S: EventStore + Clone + 'static,
{
    pub(crate) fn new(
        streams: Arc<Streams<S>>,
        catalog: Arc<dyn CourseCatalog>,
        directory: Arc<dyn StudentDirectory>,
        config: Arc<EngineConfig>,
        render_queue: mpsc::UnboundedSender<AggregateId>,
    ) -> Self {
        Self {
            streams,
            catalog,
            directory,
            config,
            render_queue,
        }
    }

    /// Returns the enrollment's certificate, issuing it if there is none.
    ///
    /// A new certificate starts with its artifact pending and is queued for
    /// rendering.
    #[tracing::instrument(skip(self, enrollment), fields(enrollment_id = ?enrollment.id()))]
    pub async fn issue_if_absent(&self, enrollment: &Enrollment) -> Result<Certificate> {
        let (Some(enrollment_id), Some(student_id), Some(course_id)) =
            (enrollment.id(), enrollment.student_id(), enrollment.course_id())
        else {
            return Err(EngineError::InvalidState(
                "enrollment has not been initiated".to_string(),
            ));
        };

        let stream = Certificate::stream_id(student_id, course_id);
        if let Some(existing) = self.streams.certificates.load_existing(stream).await? {
            return Ok(existing);
        }

        if !enrollment.is_completed() {
            return Err(EngineError::CourseNotCompleted);
        }

        let student = self
            .directory
            .get_student(student_id)
            .await?
            .ok_or(EngineError::StudentNotFound(student_id))?;
        let course = self
            .catalog
            .get_course(course_id)
            .await?
            .ok_or(EngineError::CourseNotFound(course_id))?;

        let certificate_id = CertificateId::generate();
        let new = NewCertificate {
            certificate_id: certificate_id.clone(),
            student_id,
            course_id,
            enrollment_id,
            student_name: student.name,
            course_title: course.title,
            progress: enrollment.progress(),
            verification_url: self.config.verification_url(certificate_id.as_str()),
            completed_at: enrollment.completed_at().unwrap_or_else(Utc::now),
        };

        let certificate = Certificate::default();
        let certificate_events = certificate.issue(new)?;
        let lookup_id = CertificateLookup::stream_id(&certificate_id);
        let lookup = CertificateLookup::default();
        let lookup_events = lookup.register(&certificate_id, stream)?;

        let committed = self
            .streams
            .commit([
                self.streams
                    .certificates
                    .stage(stream, &certificate, &certificate_events)?,
                self.streams
                    .lookups
                    .stage(lookup_id, &lookup, &lookup_events)?,
            ])
            .await;

        match committed {
            Ok(_) => {}
            Err(e) if e.is_concurrency_conflict() => {
                tracing::debug!(%stream, "certificate issued concurrently, using the existing one");
                return self.load(stream).await;
            }
            Err(e) => return Err(e),
        }

        metrics::counter!("certificates_issued_total").increment(1);
        tracing::info!(
            certificate_id = %certificate_id,
            %student_id,
            %course_id,
            "certificate issued"
        );

        self.enqueue(stream);
        self.load(stream).await
    }

    /// The certificate for a completed course, issuing it now if the
    /// automatic path did not.
    #[tracing::instrument(skip(self))]
    pub async fn generate(&self, student_id: StudentId, course_id: CourseId) -> Result<Certificate> {
        let enrollment = self
            .streams
            .enrollments
            .load_existing(Enrollment::stream_id(student_id, course_id))
            .await?
            .filter(Enrollment::is_completed)
            .ok_or(EngineError::CourseNotCompleted)?;

        self.issue_if_absent(&enrollment).await
    }

    /// Resolves a public certificate id to its stream and state.
    pub async fn find(&self, certificate_id: &str) -> Result<(AggregateId, Certificate)> {
        let not_found = || EngineError::CertificateNotFound(certificate_id.to_string());

        let parsed = CertificateId::parse(certificate_id).ok_or_else(not_found)?;
        let stream = self
            .streams
            .lookups
            .load_existing(CertificateLookup::stream_id(&parsed))
            .await?
            .and_then(|lookup| lookup.certificate_stream())
            .ok_or_else(not_found)?;
        let certificate = self
            .streams
            .certificates
            .load_existing(stream)
            .await?
            .ok_or_else(not_found)?;

        Ok((stream, certificate))
    }

    /// Public verification. Revoked certificates report the reason instead
    /// of their details.
    #[tracing::instrument(skip(self))]
    pub async fn verify(&self, certificate_id: &str) -> Result<Verification> {
        let (_, certificate) = self.find(certificate_id).await?;
        if let Some(reason) = certificate.revoked_reason() {
            return Err(EngineError::CertificateRevoked {
                reason: reason.to_string(),
            });
        }
        Ok(Verification::of(&certificate))
    }

    /// A certificate, visible to its owner and to admins.
    pub async fn get_for(&self, certificate_id: &str, requester: &Requester) -> Result<Certificate> {
        let (_, certificate) = self.find(certificate_id).await?;
        let owner = certificate
            .student_id()
            .ok_or_else(|| EngineError::CertificateNotFound(certificate_id.to_string()))?;
        if !requester.can_access(owner) {
            return Err(EngineError::Forbidden("certificate belongs to another student"));
        }
        Ok(certificate)
    }

    /// The rendered PDF. Fails with `ArtifactNotReady` until rendering has
    /// succeeded.
    #[tracing::instrument(skip(self, requester))]
    pub async fn download(&self, certificate_id: &str, requester: &Requester) -> Result<Artifact> {
        let certificate = self.get_for(certificate_id, requester).await?;
        if let Some(reason) = certificate.revoked_reason() {
            return Err(EngineError::CertificateRevoked {
                reason: reason.to_string(),
            });
        }

        let bytes = certificate
            .artifact()
            .ok_or(EngineError::ArtifactNotReady)?
            .to_vec();
        Ok(Artifact {
            file_name: format!("certificate-{certificate_id}.pdf"),
            bytes,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn revoke(&self, certificate_id: &str, reason: &str) -> Result<Certificate> {
        let (stream, _) = self.find(certificate_id).await?;
        let result = with_conflict_retry(
            "revoke_certificate",
            self.config.command_retry_limit,
            move || async move {
                Ok(self
                    .streams
                    .certificates
                    .execute(stream, |certificate| certificate.revoke(reason))
                    .await?)
            },
        )
        .await?;

        if !result.is_noop() {
            tracing::info!(certificate_id, reason, "certificate revoked");
        }
        Ok(result.aggregate)
    }

    /// Puts a certificate back in the render queue, typically after
    /// automatic rendering gave up.
    #[tracing::instrument(skip(self))]
    pub async fn request_render(&self, certificate_id: &str) -> Result<Certificate> {
        let (stream, _) = self.find(certificate_id).await?;
        let result = with_conflict_retry(
            "request_render",
            self.config.command_retry_limit,
            move || async move {
                Ok(self
                    .streams
                    .certificates
                    .execute(stream, |certificate| certificate.request_render())
                    .await?)
            },
        )
        .await?;

        if !result.is_noop() {
            tracing::info!(certificate_id, "certificate re-render requested");
        }
        if result.aggregate.artifact_state().is_pending() {
            self.enqueue(stream);
        }
        Ok(result.aggregate)
    }

    /// Hands a certificate stream to the artifact worker. A closed queue
    /// only delays rendering until the next sweep.
    pub fn enqueue(&self, stream: AggregateId) {
        if self.render_queue.send(stream).is_err() {
            tracing::warn!(%stream, "render queue closed, the sweep will pick this certificate up");
        }
    }

    async fn load(&self, stream: AggregateId) -> Result<Certificate> {
        self.streams
            .certificates
            .load_existing(stream)
            .await?
            .ok_or_else(|| EngineError::CertificateNotFound(stream.to_string()))
    }
}
