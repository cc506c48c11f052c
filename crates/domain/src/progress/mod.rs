//! Per-lesson watch progress.
//!
//! One stream per (student, course, lesson). Watch reports are cumulative:
//! the recorded position only moves forward, and a lesson stays finished
//! once it crosses [`COMPLETION_THRESHOLD`] of its duration.

use chrono::{DateTime, Utc};
use common::{AggregateId, CourseId, LessonId, StudentId};
use event_store::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::{Aggregate, DomainEvent, SnapshotCapable};

/// Fraction of a lesson that must be watched for it to count as finished.
pub const COMPLETION_THRESHOLD: f64 = 0.9;

#[derive(Debug, Error)]
pub enum LessonProgressError {
    #[error("Invalid watch report: {0}")]
    InvalidReport(String),

    #[error("Lesson progress belongs to a different lesson")]
    KeyMismatch,
}

/// Identifies the lesson a report is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LessonKey {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub lesson_id: LessonId,
}

impl LessonKey {
    pub fn new(student_id: StudentId, course_id: CourseId, lesson_id: LessonId) -> Self {
        Self {
            student_id,
            course_id,
            lesson_id,
        }
    }

    pub fn stream_id(&self) -> AggregateId {
        AggregateId::derived(
            "lesson-progress",
            &[
                self.student_id.as_uuid(),
                self.course_id.as_uuid(),
                self.lesson_id.as_uuid(),
            ],
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishedVia {
    Watched,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LessonProgressEvent {
    LessonProgressStarted(LessonProgressStartedData),
    WatchRecorded(WatchRecordedData),
    LessonFinished(LessonFinishedData),
}

impl DomainEvent for LessonProgressEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LessonProgressEvent::LessonProgressStarted(_) => "LessonProgressStarted",
            LessonProgressEvent::WatchRecorded(_) => "WatchRecorded",
            LessonProgressEvent::LessonFinished(_) => "LessonFinished",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonProgressStartedData {
    pub progress_id: AggregateId,
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub lesson_id: LessonId,
    pub enrollment_id: AggregateId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchRecordedData {
    /// Furthest position reached so far, in seconds.
    pub seconds_watched: f64,
    pub total_duration: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonFinishedData {
    pub via: FinishedVia,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LessonProgress {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    student_id: Option<StudentId>,
    course_id: Option<CourseId>,
    lesson_id: Option<LessonId>,
    enrollment_id: Option<AggregateId>,
    seconds_watched: f64,
    total_duration: f64,
    completed: bool,
    last_watched_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl Aggregate for LessonProgress {
    type Event = LessonProgressEvent;
    type Error = LessonProgressError;

    fn aggregate_type() -> &'static str {
        "LessonProgress"
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
            LessonProgressEvent::LessonProgressStarted(data) => {
                self.id = Some(data.progress_id);
                self.student_id = Some(data.student_id);
                self.course_id = Some(data.course_id);
                self.lesson_id = Some(data.lesson_id);
                self.enrollment_id = Some(data.enrollment_id);
            }
            LessonProgressEvent::WatchRecorded(data) => {
                self.seconds_watched = self.seconds_watched.max(data.seconds_watched);
                self.total_duration = data.total_duration;
                self.last_watched_at = Some(data.recorded_at);
            }
            LessonProgressEvent::LessonFinished(data) => {
                self.completed = true;
                self.completed_at = Some(data.finished_at);
                self.last_watched_at = Some(data.finished_at);
            }
        }
    }
}

impl SnapshotCapable for LessonProgress {
    fn snapshot_interval() -> usize {
        20
    }
}

impl LessonProgress {
    pub fn lesson_id(&self) -> Option<LessonId> {
        self.lesson_id
    }

    pub fn enrollment_id(&self) -> Option<AggregateId> {
        self.enrollment_id
    }

    pub fn seconds_watched(&self) -> f64 {
        self.seconds_watched
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn last_watched_at(&self) -> Option<DateTime<Utc>> {
        self.last_watched_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}

impl LessonProgress {
    /// Records a watch position report.
    ///
    /// The stored position is the furthest ever reported. The lesson is
    /// finished once that position reaches the completion threshold.
    /// Reports that change neither position nor duration write nothing.
    pub fn record_watch(
        &self,
        key: LessonKey,
        enrollment_id: AggregateId,
        seconds_watched: f64,
        total_duration: f64,
    ) -> Result<Vec<LessonProgressEvent>, LessonProgressError> {
        Self::validate_report(seconds_watched, total_duration)?;

        let mut events = self.start_if_new(key, enrollment_id)?;

        let furthest = self.seconds_watched.max(seconds_watched);
        let moved = !events.is_empty()
            || furthest > self.seconds_watched
            || total_duration != self.total_duration;
        if moved {
            events.push(LessonProgressEvent::WatchRecorded(WatchRecordedData {
                seconds_watched: furthest,
                total_duration,
                recorded_at: Utc::now(),
            }));
        }

        if !self.completed && furthest >= COMPLETION_THRESHOLD * total_duration {
            events.push(finished(FinishedVia::Watched));
        }

        Ok(events)
    }

    /// Marks the lesson finished regardless of watch position.
    pub fn mark_complete(
        &self,
        key: LessonKey,
        enrollment_id: AggregateId,
    ) -> Result<Vec<LessonProgressEvent>, LessonProgressError> {
        let mut events = self.start_if_new(key, enrollment_id)?;
        if !self.completed {
            events.push(finished(FinishedVia::Manual));
        }
        Ok(events)
    }

    /// Rejects reports that are not finite, have a negative position or a
    /// non-positive duration.
    pub fn validate_report(
        seconds_watched: f64,
        total_duration: f64,
    ) -> Result<(), LessonProgressError> {
        if !seconds_watched.is_finite() || !total_duration.is_finite() {
            return Err(LessonProgressError::InvalidReport(
                "values must be finite numbers".to_string(),
            ));
        }
        if seconds_watched < 0.0 {
            return Err(LessonProgressError::InvalidReport(
                "seconds watched cannot be negative".to_string(),
            ));
        }
        if total_duration <= 0.0 {
            return Err(LessonProgressError::InvalidReport(
                "total duration must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn start_if_new(
        &self,
        key: LessonKey,
        enrollment_id: AggregateId,
    ) -> Result<Vec<LessonProgressEvent>, LessonProgressError> {
        match self.id {
            Some(id) if id != key.stream_id() => Err(LessonProgressError::KeyMismatch),
            Some(_) => Ok(vec![]),
            None => Ok(vec![LessonProgressEvent::LessonProgressStarted(
                LessonProgressStartedData {
                    progress_id: key.stream_id(),
                    student_id: key.student_id,
                    course_id: key.course_id,
                    lesson_id: key.lesson_id,
                    enrollment_id,
                    started_at: Utc::now(),
                },
            )]),
        }
    }
}

fn finished(via: FinishedVia) -> LessonProgressEvent {
    LessonProgressEvent::LessonFinished(LessonFinishedData {
        via,
        finished_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> LessonKey {
        LessonKey::new(StudentId::new(), CourseId::new(), LessonId::new())
    }

    fn watch(progress: &mut LessonProgress, key: LessonKey, seconds: f64, total: f64) {
        let events = progress
            .record_watch(key, AggregateId::new(), seconds, total)
            .unwrap();
        progress.apply_events(events);
    }

    #[test]
    fn first_report_starts_the_record() {
        let key = key();
        let mut progress = LessonProgress::default();
        watch(&mut progress, key, 30.0, 600.0);

        assert_eq!(progress.id(), Some(key.stream_id()));
        assert_eq!(progress.lesson_id(), Some(key.lesson_id));
        assert_eq!(progress.seconds_watched(), 30.0);
        assert!(!progress.is_completed());
        assert!(progress.last_watched_at().is_some());
    }

    #[test]
    fn position_only_moves_forward() {
        let key = key();
        let mut progress = LessonProgress::default();
        watch(&mut progress, key, 300.0, 600.0);
        watch(&mut progress, key, 120.0, 600.0);
        assert_eq!(progress.seconds_watched(), 300.0);
    }

    #[test]
    fn finishes_at_ninety_percent_and_stays_finished() {
        let key = key();
        let mut progress = LessonProgress::default();

        watch(&mut progress, key, 539.0, 600.0);
        assert!(!progress.is_completed());

        let events = progress
            .record_watch(key, AggregateId::new(), 540.0, 600.0)
            .unwrap();
        assert!(
            events
                .iter()
                .any(|e| matches!(e, LessonProgressEvent::LessonFinished(_)))
        );
        progress.apply_events(events);
        assert!(progress.is_completed());

        // Re-watching from the start never un-finishes the lesson.
        let events = progress
            .record_watch(key, AggregateId::new(), 0.0, 600.0)
            .unwrap();
        assert!(events.is_empty());
        assert!(progress.is_completed());
    }

    #[test]
    fn repeated_or_earlier_positions_write_nothing() {
        let key = key();
        let mut progress = LessonProgress::default();
        watch(&mut progress, key, 300.0, 600.0);

        for seconds in [300.0, 120.0, 0.0] {
            assert!(
                progress
                    .record_watch(key, AggregateId::new(), seconds, 600.0)
                    .unwrap()
                    .is_empty()
            );
        }

        // A corrected duration is still recorded.
        let events = progress
            .record_watch(key, AggregateId::new(), 120.0, 650.0)
            .unwrap();
        assert_eq!(events.len(), 1);
        progress.apply_events(events);
        assert_eq!(progress.total_duration(), 650.0);
        assert_eq!(progress.seconds_watched(), 300.0);
    }

    #[test]
    fn rejects_invalid_reports() {
        let progress = LessonProgress::default();
        for (seconds, total) in [
            (f64::NAN, 600.0),
            (10.0, f64::INFINITY),
            (-1.0, 600.0),
            (10.0, 0.0),
            (10.0, -5.0),
        ] {
            assert!(matches!(
                progress.record_watch(key(), AggregateId::new(), seconds, total),
                Err(LessonProgressError::InvalidReport(_))
            ));
        }
    }

    #[test]
    fn manual_completion() {
        let key = key();
        let mut progress = LessonProgress::default();
        let events = progress.mark_complete(key, AggregateId::new()).unwrap();
        assert_eq!(events.len(), 2);
        progress.apply_events(events);
        assert!(progress.is_completed());

        assert!(
            progress
                .mark_complete(key, AggregateId::new())
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn rejects_reports_for_another_lesson() {
        let mut progress = LessonProgress::default();
        watch(&mut progress, key(), 10.0, 100.0);
        assert!(matches!(
            progress.record_watch(key(), AggregateId::new(), 10.0, 100.0),
            Err(LessonProgressError::KeyMismatch)
        ));
    }
}
