//! Student certificates read model.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, CourseId, StudentId};
use domain::{Aggregate, Certificate, CertificateEvent, CertificateId, Grade};
use event_store::EventEnvelope;
use tokio::sync::RwLock;

use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;
use crate::{ProjectionError, Result};

#[derive(Debug, Clone)]
pub struct CertificateSummary {
    pub certificate_id: CertificateId,
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub student_name: String,
    pub course_title: String,
    pub grade: Grade,
    pub verification_url: String,
    pub issued_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub artifact_ready: bool,
    pub revoked_reason: Option<String>,
}

impl CertificateSummary {
    pub fn is_valid(&self) -> bool {
        self.revoked_reason.is_none()
    }
}

struct StudentCertificatesState {
    /// Keyed by certificate stream.
    certificates: HashMap<AggregateId, CertificateSummary>,
    by_student: HashMap<StudentId, Vec<AggregateId>>,
    position: ProjectionPosition,
}

impl StudentCertificatesState {
    fn new() -> Self {
        Self {
            certificates: HashMap::new(),
            by_student: HashMap::new(),
            position: ProjectionPosition::zero(),
        }
    }
}

/// Certificates per student, newest first.
#[derive(Clone)]
pub struct StudentCertificatesView {
    state: Arc<RwLock<StudentCertificatesState>>,
}

impl StudentCertificatesView {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StudentCertificatesState::new())),
        }
    }

    pub async fn for_student(&self, student_id: StudentId) -> Vec<CertificateSummary> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state
            .by_student
            .get(&student_id)
            .into_iter()
            .flatten()
            .filter_map(|stream| state.certificates.get(stream).cloned())
            .collect();
        rows.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        rows
    }

    pub async fn issued_count(&self) -> usize {
        self.state.read().await.certificates.len()
    }
}

impl Default for StudentCertificatesView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for StudentCertificatesView {
    fn name(&self) -> &'static str {
        "StudentCertificatesView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;
        state.position = state.position.advance();

        if !event.is_for(Certificate::aggregate_type()) {
            return Ok(());
        }

        let certificate_event: CertificateEvent = event
            .decode()
            .map_err(|e| ProjectionError::decode(event, e))?;
        let stream = event.aggregate_id;

        match certificate_event {
            CertificateEvent::CertificateIssued(data) => {
                let student_id = data.student_id;
                let summary = CertificateSummary {
                    certificate_id: data.certificate_id,
                    student_id,
                    course_id: data.course_id,
                    student_name: data.student_name,
                    course_title: data.course_title,
                    grade: data.grade,
                    verification_url: data.verification_url,
                    issued_at: data.issued_at,
                    completed_at: data.completed_at,
                    artifact_ready: false,
                    revoked_reason: None,
                };
                if state.certificates.insert(stream, summary).is_none() {
                    state.by_student.entry(student_id).or_default().push(stream);
                }
            }
            CertificateEvent::ArtifactRendered(_) => {
                if let Some(summary) = state.certificates.get_mut(&stream) {
                    summary.artifact_ready = true;
                }
            }
            CertificateEvent::ArtifactRenderRequested(_) => {
                if let Some(summary) = state.certificates.get_mut(&stream) {
                    summary.artifact_ready = false;
                }
            }
            CertificateEvent::CertificateRevoked(data) => {
                if let Some(summary) = state.certificates.get_mut(&stream) {
                    summary.revoked_reason = Some(data.reason);
                }
            }
            CertificateEvent::ArtifactRenderFailed(_) => {}
        }

        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        *self.state.write().await = StudentCertificatesState::new();
        Ok(())
    }
}

impl ReadModel for StudentCertificatesView {
    fn name(&self) -> &'static str {
        "StudentCertificatesView"
    }

    fn count(&self) -> usize {
        self.state
            .try_read()
            .map(|s| s.certificates.len())
            .unwrap_or(0)
    }
}
