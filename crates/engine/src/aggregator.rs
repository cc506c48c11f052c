//! Course progress recomputation and completion.

use std::sync::Arc;

use common::AggregateId;
use domain::{Enrollment, EnrollmentEvent};
use event_store::EventStore;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::issuer::CertificateIssuer;
use crate::retry::with_conflict_retry;
use crate::services::Course;
use crate::streams::Streams;

/// Turns finished lessons into course progress, and a finished course into
/// a certificate.
pub struct CompletionAggregator<S: EventStore> {
    streams: Arc<Streams<S>>,
    issuer: Arc<CertificateIssuer<S>>,
    config: Arc<EngineConfig>,
}

impl<S> CompletionAggregator<S>
where
    S: EventStore + Clone + 'static,
{
    pub(crate) fn new(
        streams: Arc<Streams<S>>,
        issuer: Arc<CertificateIssuer<S>>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            streams,
            issuer,
            config,
        }
    }

    /// Recomputes progress against the course's lesson list.
    ///
    /// Progress is only written when it goes up and completion is recorded
    /// once, in the same append. A completed enrollment then gets its
    /// certificate; issuance failures are logged and left to the sweep,
    /// they never fail the caller.
    #[tracing::instrument(skip(self, course), fields(course_id = %course.id))]
    pub async fn recompute(&self, enrollment_id: AggregateId, course: &Course) -> Result<Enrollment> {
        let lessons = course.lesson_ids.as_slice();
        let result = with_conflict_retry(
            "recompute_progress",
            self.config.command_retry_limit,
            move || async move {
                Ok(self
                    .streams
                    .enrollments
                    .execute_with_snapshot(enrollment_id, |enrollment| {
                        enrollment.recompute(lessons)
                    })
                    .await?)
            },
        )
        .await?;

        let enrollment = result.aggregate;
        let completed_now = result
            .events
            .iter()
            .any(|event| matches!(event, EnrollmentEvent::EnrollmentCompleted(_)));

        if completed_now {
            metrics::counter!("courses_completed_total").increment(1);
            tracing::info!(
                %enrollment_id,
                progress = enrollment.progress(),
                "course completed"
            );
        }

        if enrollment.is_completed()
            && let Err(error) = self.issuer.issue_if_absent(&enrollment).await
        {
            tracing::error!(
                %enrollment_id,
                %error,
                "certificate issuance failed, leaving it to the sweep"
            );
        }

        Ok(enrollment)
    }
}
