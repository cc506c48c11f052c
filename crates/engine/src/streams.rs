//! Typed handlers for every stream the engine writes.

use domain::{
    Certificate, CertificateLookup, CommandHandler, CourseRoster, Enrollment, LessonProgress,
    PaymentTransaction,
};
use event_store::{EventStore, StreamAppend};

use crate::error::Result;

pub(crate) struct Streams<S: EventStore> {
    pub store: S,
    pub enrollments: CommandHandler<S, Enrollment>,
    pub transactions: CommandHandler<S, PaymentTransaction>,
    pub rosters: CommandHandler<S, CourseRoster>,
    pub lessons: CommandHandler<S, LessonProgress>,
    pub certificates: CommandHandler<S, Certificate>,
    pub lookups: CommandHandler<S, CertificateLookup>,
}

impl<S: EventStore + Clone> Streams<S> {
    pub fn new(store: S) -> Self {
        Self {
            enrollments: CommandHandler::new(store.clone()),
            transactions: CommandHandler::new(store.clone()),
            rosters: CommandHandler::new(store.clone()),
            lessons: CommandHandler::new(store.clone()),
            certificates: CommandHandler::new(store.clone()),
            lookups: CommandHandler::new(store.clone()),
            store,
        }
    }

    /// Appends the staged writes as one atomic batch and returns how many
    /// streams changed. Nothing staged means nothing to do.
    pub async fn commit(
        &self,
        staged: impl IntoIterator<Item = Option<StreamAppend>>,
    ) -> Result<usize> {
        let batch: Vec<StreamAppend> = staged.into_iter().flatten().collect();
        let written = batch.len();
        if written > 0 {
            self.store.append_batch(batch).await?;
        }
        Ok(written)
    }
}
