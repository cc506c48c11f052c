//! Enrollment lifecycle engine.
//!
//! Drives a student from payment through lesson progress to a verified
//! certificate:
//!
//! - [`EnrollmentService`] opens and confirms payments and gates access.
//! - [`ProgressTracker`] records lesson progress.
//! - [`CompletionAggregator`] turns finished lessons into course progress
//!   and completion.
//! - [`CertificateIssuer`] issues one certificate per completed course and
//!   answers verification and download requests.
//! - [`ArtifactWorker`] renders certificate PDFs off the request path and
//!   reconciles anything a crash left behind.
//!
//! Every state change is an event appended with optimistic concurrency;
//! commands that lose a race are re-run against fresh state.

pub mod access;
pub mod aggregator;
pub mod config;
pub mod enrollments;
pub mod error;
pub mod issuer;
pub mod retry;
pub mod services;
mod streams;
pub mod tracker;
pub mod worker;

use std::sync::Arc;

use event_store::EventStore;
use tokio::sync::mpsc;

pub use access::{Requester, Role};
pub use aggregator::CompletionAggregator;
pub use config::EngineConfig;
pub use enrollments::{Confirmation, EnrollmentService, Initiation};
pub use error::{EngineError, Result};
pub use issuer::{Artifact, CertificateIssuer, Verification};
pub use services::{
    CertificateDocument, CertificateRenderer, Course, CourseCatalog, InMemoryCertificateRenderer,
    InMemoryCourseCatalog, InMemoryStudentDirectory, RenderError, Student, StudentDirectory,
};
pub use tracker::{CourseProgress, ProgressTracker, ProgressUpdate};
pub use worker::{ArtifactWorker, SweepReport};

use streams::Streams;

/// The engine's services, wired to one event store.
///
/// Cloning is cheap; every clone shares the same services and render queue.
pub struct LifecycleEngine<S: EventStore> {
    enrollments: Arc<EnrollmentService<S>>,
    progress: Arc<ProgressTracker<S>>,
    completion: Arc<CompletionAggregator<S>>,
    certificates: Arc<CertificateIssuer<S>>,
    catalog: Arc<dyn CourseCatalog>,
    directory: Arc<dyn StudentDirectory>,
    config: Arc<EngineConfig>,
}

impl<S: EventStore> Clone for LifecycleEngine<S> {
    fn clone(&self) -> Self {
        Self {
            enrollments: Arc::clone(&self.enrollments),
            progress: Arc::clone(&self.progress),
            completion: Arc::clone(&self.completion),
            certificates: Arc::clone(&self.certificates),
            catalog: Arc::clone(&self.catalog),
            directory: Arc::clone(&self.directory),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S> LifecycleEngine<S>
where
    S: EventStore + Clone + 'static,
{
    /// Builds the engine and the worker that renders its certificates.
    ///
    /// The worker must be run (see [`ArtifactWorker::run`]) or drained for
    /// artifacts to be produced.
    pub fn new(
        store: S,
        catalog: Arc<dyn CourseCatalog>,
        directory: Arc<dyn StudentDirectory>,
        renderer: Arc<dyn CertificateRenderer>,
        config: EngineConfig,
    ) -> (Self, ArtifactWorker<S>) {
        let streams = Arc::new(Streams::new(store));
        let config = Arc::new(config);
        let (render_tx, render_rx) = mpsc::unbounded_channel();

        let certificates = Arc::new(CertificateIssuer::new(
            Arc::clone(&streams),
            Arc::clone(&catalog),
            Arc::clone(&directory),
            Arc::clone(&config),
            render_tx,
        ));
        let completion = Arc::new(CompletionAggregator::new(
            Arc::clone(&streams),
            Arc::clone(&certificates),
            Arc::clone(&config),
        ));
        let progress = Arc::new(ProgressTracker::new(
            Arc::clone(&streams),
            Arc::clone(&catalog),
            Arc::clone(&completion),
            Arc::clone(&config),
        ));
        let enrollments = Arc::new(EnrollmentService::new(
            Arc::clone(&streams),
            Arc::clone(&catalog),
            Arc::clone(&config),
        ));

        let worker = ArtifactWorker::new(
            streams,
            Arc::clone(&certificates),
            renderer,
            Arc::clone(&config),
            render_rx,
        );

        let engine = Self {
            enrollments,
            progress,
            completion,
            certificates,
            catalog,
            directory,
            config,
        };
        (engine, worker)
    }

    pub fn enrollments(&self) -> &EnrollmentService<S> {
        &self.enrollments
    }

    pub fn progress(&self) -> &ProgressTracker<S> {
        &self.progress
    }

    pub fn completion(&self) -> &CompletionAggregator<S> {
        &self.completion
    }

    pub fn certificates(&self) -> &CertificateIssuer<S> {
        &self.certificates
    }

    pub fn catalog(&self) -> &dyn CourseCatalog {
        self.catalog.as_ref()
    }

    pub fn directory(&self) -> &dyn StudentDirectory {
        self.directory.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
