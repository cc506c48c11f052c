//! Background rendering of certificate artifacts.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::AggregateId;
use domain::{Aggregate, Certificate, Enrollment};
use event_store::{EventQuery, EventStore};
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::issuer::CertificateIssuer;
use crate::retry::with_conflict_retry;
use crate::services::{CertificateDocument, CertificateRenderer};
use crate::streams::Streams;

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Certificates issued for completed enrollments that had none.
    pub issued: usize,

    /// Pending artifacts that were rendered.
    pub rendered: usize,

    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Render(AggregateId),
    Sweep,
}

/// Renders queued certificates and periodically reconciles the log.
///
/// The queue is an optimisation: the event log records which artifacts are
/// still pending, so [`ArtifactWorker::sweep`] can always rebuild the work
/// list after a crash or a dropped message.
pub struct ArtifactWorker<S: EventStore> {
    streams: Arc<Streams<S>>,
    issuer: Arc<CertificateIssuer<S>>,
    renderer: Arc<dyn CertificateRenderer>,
    config: Arc<EngineConfig>,
    queue: mpsc::UnboundedReceiver<AggregateId>,
}

impl<S> ArtifactWorker<S>
where
    S: EventStore + Clone + 'static,
{
    pub(crate) fn new(
        streams: Arc<Streams<S>>,
        issuer: Arc<CertificateIssuer<S>>,
        renderer: Arc<dyn CertificateRenderer>,
        config: Arc<EngineConfig>,
        queue: mpsc::UnboundedReceiver<AggregateId>,
    ) -> Self {
        Self {
            streams,
            issuer,
            renderer,
            config,
            queue,
        }
    }

    /// Runs until `shutdown` resolves: renders queued certificates as they
    /// arrive and sweeps on start and then every `sweep_interval`.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            "artifact worker started"
        );

        loop {
            let job = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                Some(stream) = self.queue.recv() => Job::Render(stream),
                _ = ticker.tick() => Job::Sweep,
            };

            // A render cut short here stays pending in the log and is
            // picked up by the next sweep.
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!(?job, "shutdown requested, abandoning artifact work");
                    break;
                }
                _ = self.perform(job) => {}
            }
        }

        tracing::info!("artifact worker stopped");
    }

    async fn perform(&self, job: Job) {
        match job {
            Job::Render(stream) => self.process(stream).await,
            Job::Sweep => {
                if let Err(error) = self.sweep().await {
                    tracing::error!(%error, "certificate sweep failed");
                }
            }
        }
    }

    /// Processes everything currently queued and returns how many
    /// certificates were handled.
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(stream) = self.queue.try_recv() {
            self.process(stream).await;
            handled += 1;
        }
        handled
    }

    /// One reconciliation pass.
    ///
    /// Issues certificates for completed enrollments that have none, then
    /// renders every artifact still pending.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let completions = self
            .streams
            .store
            .query_events(
                EventQuery::new()
                    .aggregate_type(Enrollment::aggregate_type())
                    .event_type("EnrollmentCompleted"),
            )
            .await?;
        let mut seen = HashSet::new();
        for envelope in completions {
            if !seen.insert(envelope.aggregate_id) {
                continue;
            }
            match self.issue_missing(envelope.aggregate_id).await {
                Ok(true) => report.issued += 1,
                Ok(false) => {}
                Err(error) => {
                    report.failed += 1;
                    tracing::error!(
                        enrollment_id = %envelope.aggregate_id,
                        %error,
                        "sweep could not issue certificate"
                    );
                }
            }
        }

        let queued = self
            .streams
            .store
            .query_events(
                EventQuery::new()
                    .aggregate_type(Certificate::aggregate_type())
                    .event_type("CertificateIssued")
                    .event_type("ArtifactRenderRequested"),
            )
            .await?;
        let mut seen = HashSet::new();
        for envelope in queued {
            if !seen.insert(envelope.aggregate_id) {
                continue;
            }
            let stream = envelope.aggregate_id;
            let Some(certificate) = self.streams.certificates.load_existing(stream).await? else {
                continue;
            };
            if !needs_render(&certificate) {
                continue;
            }
            match self.render_with_retries(stream).await {
                Ok(certificate) if certificate.artifact_state().is_ready() => report.rendered += 1,
                Ok(_) => report.failed += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::error!(%stream, %error, "sweep could not render certificate");
                }
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                issued = report.issued,
                rendered = report.rendered,
                failed = report.failed,
                "certificate sweep finished"
            );
        }
        Ok(report)
    }

    /// Renders until the artifact is ready or rendering has given up.
    pub async fn render_with_retries(&self, stream: AggregateId) -> Result<Certificate> {
        loop {
            let certificate = self.render(stream).await?;
            if !needs_render(&certificate) {
                return Ok(certificate);
            }
            tokio::time::sleep(self.config.render_retry_backoff).await;
        }
    }

    /// Makes one render attempt, bounded by `render_timeout`, and records
    /// the outcome on the certificate stream.
    #[tracing::instrument(skip(self))]
    pub async fn render(&self, stream: AggregateId) -> Result<Certificate> {
        let certificate = self
            .streams
            .certificates
            .load_existing(stream)
            .await?
            .ok_or_else(|| EngineError::CertificateNotFound(stream.to_string()))?;
        if !needs_render(&certificate) {
            return Ok(certificate);
        }

        let document = document_for(&certificate);
        let started = Instant::now();
        let outcome =
            match tokio::time::timeout(self.config.render_timeout, self.renderer.render(&document))
                .await
            {
                Ok(Ok(bytes)) => Ok(bytes),
                Ok(Err(error)) => Err(error.to_string()),
                Err(_) => Err(format!(
                    "render timed out after {}s",
                    self.config.render_timeout.as_secs_f64()
                )),
            };
        metrics::histogram!("certificate_render_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let limit = self.config.command_retry_limit;
        let result = match outcome {
            Ok(bytes) => {
                let bytes = &bytes;
                let result = with_conflict_retry("record_render", limit, move || async move {
                    Ok(self
                        .streams
                        .certificates
                        .execute(stream, |certificate| certificate.record_render(bytes.clone()))
                        .await?)
                })
                .await?;
                tracing::info!(
                    certificate_id = %document.certificate_id,
                    size = bytes.len(),
                    "certificate rendered"
                );
                result
            }
            Err(error) => {
                metrics::counter!("certificate_render_failures_total").increment(1);
                let max_attempts = self.config.render_max_attempts;
                let error = error.as_str();
                let result = with_conflict_retry("record_render_failure", limit, move || async move {
                    Ok(self
                        .streams
                        .certificates
                        .execute(stream, |certificate| {
                            certificate.record_render_failure(error, max_attempts)
                        })
                        .await?)
                })
                .await?;
                tracing::warn!(
                    certificate_id = %document.certificate_id,
                    attempts = result.aggregate.artifact_state().attempts(),
                    error,
                    "certificate render failed"
                );
                result
            }
        };

        Ok(result.aggregate)
    }

    async fn process(&self, stream: AggregateId) {
        if let Err(error) = self.render_with_retries(stream).await {
            tracing::error!(%stream, %error, "certificate render aborted");
        }
    }

    /// Issues the certificate for a completed enrollment that has none.
    /// Returns whether one was issued.
    async fn issue_missing(&self, enrollment_id: AggregateId) -> Result<bool> {
        let Some(enrollment) = self.streams.enrollments.load_existing(enrollment_id).await? else {
            return Ok(false);
        };
        let (Some(student_id), Some(course_id)) = (enrollment.student_id(), enrollment.course_id())
        else {
            return Ok(false);
        };
        if !enrollment.is_completed() {
            return Ok(false);
        }

        let stream = Certificate::stream_id(student_id, course_id);
        if self.streams.certificates.load_existing(stream).await?.is_some() {
            return Ok(false);
        }

        self.issuer.issue_if_absent(&enrollment).await?;
        Ok(true)
    }
}

fn needs_render(certificate: &Certificate) -> bool {
    certificate.is_valid() && certificate.artifact_state().is_pending()
}

fn document_for(certificate: &Certificate) -> CertificateDocument {
    CertificateDocument {
        student_name: certificate.student_name().to_string(),
        course_name: certificate.course_title().to_string(),
        completion_date: certificate.completed_at().unwrap_or_else(Utc::now),
        certificate_id: certificate
            .certificate_id()
            .map(|id| id.to_string())
            .unwrap_or_default(),
        grade: certificate
            .grade()
            .map(|grade| grade.to_string())
            .unwrap_or_default(),
        verification_url: certificate.verification_url().to_string(),
    }
}
