//! Student enrollments read model: every enrollment a student holds.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, CourseId, StudentId};
use domain::{Aggregate, Enrollment, EnrollmentEvent, EnrollmentStatus, Money, PaymentStatus};
use event_store::EventEnvelope;
use tokio::sync::RwLock;

use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;
use crate::{ProjectionError, Result};

/// Denormalized enrollment row.
#[derive(Debug, Clone)]
pub struct EnrollmentSummary {
    pub enrollment_id: AggregateId,
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub status: EnrollmentStatus,
    pub payment_status: PaymentStatus,
    pub progress: u8,
    pub completed_lessons: usize,
    pub transaction_id: Option<AggregateId>,
    pub amount: Money,
    pub enrolled_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl EnrollmentSummary {
    pub fn grants_access(&self) -> bool {
        self.status.grants_access()
    }
}

struct StudentEnrollmentsState {
    enrollments: HashMap<AggregateId, EnrollmentSummary>,
    by_student: HashMap<StudentId, Vec<AggregateId>>,
    position: ProjectionPosition,
}

impl StudentEnrollmentsState {
    fn new() -> Self {
        Self {
            enrollments: HashMap::new(),
            by_student: HashMap::new(),
            position: ProjectionPosition::zero(),
        }
    }
}

/// Read model view listing enrollments per student.
#[derive(Clone)]
pub struct StudentEnrollmentsView {
    state: Arc<RwLock<StudentEnrollmentsState>>,
}

impl StudentEnrollmentsView {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StudentEnrollmentsState::new())),
        }
    }

    pub async fn get(&self, enrollment_id: AggregateId) -> Option<EnrollmentSummary> {
        self.state
            .read()
            .await
            .enrollments
            .get(&enrollment_id)
            .cloned()
    }

    /// All of a student's enrollments, most recent first.
    pub async fn for_student(&self, student_id: StudentId) -> Vec<EnrollmentSummary> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state
            .by_student
            .get(&student_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.enrollments.get(id).cloned())
            .collect();
        rows.sort_by(|a, b| b.enrolled_at.cmp(&a.enrolled_at));
        rows
    }

    /// The student's enrollments that currently grant course access.
    pub async fn accessible_for_student(&self, student_id: StudentId) -> Vec<EnrollmentSummary> {
        self.for_student(student_id)
            .await
            .into_iter()
            .filter(EnrollmentSummary::grants_access)
            .collect()
    }

    pub async fn count_by_status(&self, status: EnrollmentStatus) -> usize {
        self.state
            .read()
            .await
            .enrollments
            .values()
            .filter(|e| e.status == status)
            .count()
    }
}

impl Default for StudentEnrollmentsView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for StudentEnrollmentsView {
    fn name(&self) -> &'static str {
        "StudentEnrollmentsView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;
        state.position = state.position.advance();

        if !event.is_for(Enrollment::aggregate_type()) {
            return Ok(());
        }

        let enrollment_event: EnrollmentEvent = event
            .decode()
            .map_err(|e| ProjectionError::decode(event, e))?;
        let enrollment_id = event.aggregate_id;

        if let EnrollmentEvent::EnrollmentInitiated(data) = &enrollment_event {
            let existing = state.enrollments.get(&enrollment_id).cloned();
            let summary = EnrollmentSummary {
                enrollment_id,
                student_id: data.student_id,
                course_id: data.course_id,
                status: EnrollmentStatus::Pending,
                payment_status: PaymentStatus::Pending,
                progress: existing.as_ref().map_or(0, |e| e.progress),
                completed_lessons: existing.as_ref().map_or(0, |e| e.completed_lessons),
                transaction_id: None,
                amount: Money::zero(),
                enrolled_at: data.initiated_at,
                last_accessed_at: existing.and_then(|e| e.last_accessed_at),
                completed_at: None,
            };
            if state.enrollments.insert(enrollment_id, summary).is_none() {
                state
                    .by_student
                    .entry(data.student_id)
                    .or_default()
                    .push(enrollment_id);
            }
            return Ok(());
        }

        let Some(summary) = state.enrollments.get_mut(&enrollment_id) else {
            tracing::warn!(%enrollment_id, "event for unknown enrollment");
            return Ok(());
        };

        match enrollment_event {
            EnrollmentEvent::EnrollmentInitiated(_) => {}
            EnrollmentEvent::TransactionAttached(data) => {
                summary.transaction_id = Some(data.transaction_id);
                summary.amount = data.amount;
                summary.payment_status = PaymentStatus::Pending;
            }
            EnrollmentEvent::PaymentConfirmed(_) => {
                summary.status = EnrollmentStatus::Active;
                summary.payment_status = PaymentStatus::Completed;
            }
            EnrollmentEvent::PaymentFailed(_) => {
                summary.payment_status = PaymentStatus::Failed;
            }
            EnrollmentEvent::LessonAccessed(data) => {
                summary.last_accessed_at = Some(data.accessed_at);
            }
            EnrollmentEvent::LessonCompleted(_) => {
                summary.completed_lessons += 1;
            }
            EnrollmentEvent::ProgressRecalculated(data) => {
                summary.progress = summary.progress.max(data.progress);
            }
            EnrollmentEvent::EnrollmentCompleted(data) => {
                summary.status = EnrollmentStatus::Completed;
                summary.progress = summary.progress.max(data.progress);
                summary.completed_at = Some(data.completed_at);
            }
            EnrollmentEvent::EnrollmentCancelled(_) => {
                summary.status = EnrollmentStatus::Cancelled;
            }
        }

        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        *self.state.write().await = StudentEnrollmentsState::new();
        Ok(())
    }
}

impl ReadModel for StudentEnrollmentsView {
    fn name(&self) -> &'static str {
        "StudentEnrollmentsView"
    }

    fn count(&self) -> usize {
        self.state
            .try_read()
            .map(|s| s.enrollments.len())
            .unwrap_or(0)
    }
}
