//! Lesson watch reports and explicit lesson completion.

use std::sync::Arc;

use common::{AggregateId, CourseId, LessonId, StudentId};
use domain::{Enrollment, LessonKey, LessonProgress};
use event_store::EventStore;

use crate::aggregator::CompletionAggregator;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::retry::with_conflict_retry;
use crate::services::{Course, CourseCatalog};
use crate::streams::Streams;

/// Outcome of a progress report.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub lesson: LessonProgress,
    pub enrollment: Enrollment,
}

impl ProgressUpdate {
    pub fn course_progress(&self) -> u8 {
        self.enrollment.progress()
    }

    pub fn course_completed(&self) -> bool {
        self.enrollment.is_completed()
    }
}

/// Every lesson record a student has for a course, with the enrollment.
#[derive(Debug, Clone)]
pub struct CourseProgress {
    pub enrollment: Enrollment,
    pub total_lessons: usize,
    pub lessons: Vec<LessonProgress>,
}

pub struct ProgressTracker<S: EventStore> {
    streams: Arc<Streams<S>>,
    catalog: Arc<dyn CourseCatalog>,
    aggregator: Arc<CompletionAggregator<S>>,
    config: Arc<EngineConfig>,
}

impl<S> ProgressTracker<S>
where
    S: EventStore + Clone + 'static,
{
    pub(crate) fn new(
        streams: Arc<Streams<S>>,
        catalog: Arc<dyn CourseCatalog>,
        aggregator: Arc<CompletionAggregator<S>>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            streams,
            catalog,
            aggregator,
            config,
        }
    }

    /// Records how far a student has watched a lesson.
    ///
    /// Reports are cumulative, so the furthest position wins. Crossing the
    /// completion threshold finishes the lesson and recomputes the course.
    #[tracing::instrument(skip(self))]
    pub async fn report_progress(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        lesson_id: LessonId,
        seconds_watched: f64,
        total_duration: f64,
    ) -> Result<ProgressUpdate> {
        let course = self.course(course_id).await?;
        let enrollment_id = self.require_access(student_id, course_id).await?;
        LessonProgress::validate_report(seconds_watched, total_duration)?;
        ensure_lesson(&course, lesson_id)?;

        let key = LessonKey::new(student_id, course_id, lesson_id);
        let lesson = with_conflict_retry(
            "record_watch",
            self.config.command_retry_limit,
            move || async move {
                let result = self
                    .streams
                    .lessons
                    .execute_with_snapshot(key.stream_id(), |progress| {
                        progress.record_watch(key, enrollment_id, seconds_watched, total_duration)
                    })
                    .await?;
                Ok(result.aggregate)
            },
        )
        .await?;

        metrics::counter!("lesson_progress_reports_total").increment(1);
        self.after_lesson(&course, enrollment_id, lesson).await
    }

    /// Finishes a lesson regardless of how much of it was watched.
    #[tracing::instrument(skip(self))]
    pub async fn mark_complete(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        lesson_id: LessonId,
    ) -> Result<ProgressUpdate> {
        let course = self.course(course_id).await?;
        let enrollment_id = self.require_access(student_id, course_id).await?;
        ensure_lesson(&course, lesson_id)?;

        let key = LessonKey::new(student_id, course_id, lesson_id);
        let lesson = with_conflict_retry(
            "mark_lesson_complete",
            self.config.command_retry_limit,
            move || async move {
                let result = self
                    .streams
                    .lessons
                    .execute_with_snapshot(key.stream_id(), |progress| {
                        progress.mark_complete(key, enrollment_id)
                    })
                    .await?;
                Ok(result.aggregate)
            },
        )
        .await?;

        self.after_lesson(&course, enrollment_id, lesson).await
    }

    /// A student's record for one lesson; zero progress when there is none.
    pub async fn lesson_progress(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        lesson_id: LessonId,
    ) -> Result<LessonProgress> {
        let key = LessonKey::new(student_id, course_id, lesson_id);
        Ok(self.streams.lessons.load(key.stream_id()).await?)
    }

    pub async fn course_progress(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<CourseProgress> {
        let course = self.course(course_id).await?;
        let enrollment = self
            .streams
            .enrollments
            .load_existing(Enrollment::stream_id(student_id, course_id))
            .await?
            .ok_or(EngineError::EnrollmentNotFound {
                student_id,
                course_id,
            })?;

        let mut lessons = Vec::new();
        for lesson_id in &course.lesson_ids {
            let key = LessonKey::new(student_id, course_id, *lesson_id);
            if let Some(progress) = self.streams.lessons.load_existing(key.stream_id()).await? {
                lessons.push(progress);
            }
        }

        Ok(CourseProgress {
            enrollment,
            total_lessons: course.total_lessons(),
            lessons,
        })
    }

    /// Mirrors the lesson onto the enrollment and, once the lesson is
    /// finished, recomputes course progress.
    async fn after_lesson(
        &self,
        course: &Course,
        enrollment_id: AggregateId,
        lesson: LessonProgress,
    ) -> Result<ProgressUpdate> {
        let lesson_id = lesson.lesson_id().ok_or_else(|| {
            EngineError::InvalidState("lesson progress has no lesson".to_string())
        })?;
        let finished = lesson.is_completed();

        let tracked = with_conflict_retry(
            "track_lesson",
            self.config.command_retry_limit,
            move || async move {
                Ok(self
                    .streams
                    .enrollments
                    .execute_with_snapshot(enrollment_id, |enrollment| {
                        enrollment.track_lesson(lesson_id, finished)
                    })
                    .await?)
            },
        )
        .await?;

        let enrollment = if finished {
            self.aggregator.recompute(enrollment_id, course).await?
        } else {
            tracked.aggregate
        };

        Ok(ProgressUpdate { lesson, enrollment })
    }

    async fn course(&self, course_id: CourseId) -> Result<Course> {
        self.catalog
            .get_course(course_id)
            .await?
            .ok_or(EngineError::CourseNotFound(course_id))
    }

    async fn require_access(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<AggregateId> {
        let enrollment_id = Enrollment::stream_id(student_id, course_id);
        let enrollment = self.streams.enrollments.load(enrollment_id).await?;
        if !enrollment.grants_access() {
            return Err(EngineError::NotEnrolled);
        }
        Ok(enrollment_id)
    }
}

fn ensure_lesson(course: &Course, lesson_id: LessonId) -> Result<()> {
    if course.has_lesson(lesson_id) {
        Ok(())
    } else {
        Err(EngineError::LessonNotFound {
            course_id: course.id,
            lesson_id,
        })
    }
}
