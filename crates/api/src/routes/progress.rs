//! Lesson progress endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::{CourseId, LessonId};
use domain::LessonProgress;
use engine::ProgressUpdate;
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::auth::Caller;
use crate::error::ApiError;
use crate::routes::parse_id;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdateRequest {
    pub course_id: String,
    pub lesson_id: String,
    /// Seconds watched so far.
    pub video_progress: f64,
    pub total_duration: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonCompleteRequest {
    pub course_id: String,
    pub lesson_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgressResponse {
    pub lesson_id: Option<LessonId>,
    pub video_progress: f64,
    pub total_duration: f64,
    pub is_completed: bool,
    pub last_watched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&LessonProgress> for LessonProgressResponse {
    fn from(progress: &LessonProgress) -> Self {
        Self {
            lesson_id: progress.lesson_id(),
            video_progress: progress.seconds_watched(),
            total_duration: progress.total_duration(),
            is_completed: progress.is_completed(),
            last_watched_at: progress.last_watched_at(),
            completed_at: progress.completed_at(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdateResponse {
    #[serde(flatten)]
    pub lesson: LessonProgressResponse,
    pub course_progress: u8,
    pub course_completed: bool,
}

impl From<&ProgressUpdate> for ProgressUpdateResponse {
    fn from(update: &ProgressUpdate) -> Self {
        Self {
            lesson: LessonProgressResponse::from(&update.lesson),
            course_progress: update.course_progress(),
            course_completed: update.course_completed(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonCompleteResponse {
    pub success: bool,
    pub course_progress: u8,
    pub course_completed: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgressResponse {
    pub course_id: String,
    pub status: String,
    pub progress: u8,
    pub total_lessons: usize,
    pub completed_lessons: usize,
    pub last_accessed_lesson: Option<LessonId>,
    pub lessons: Vec<LessonProgressResponse>,
}

/// POST /progress/update: report how far a lesson has been watched.
#[tracing::instrument(skip(state, caller, req), fields(student_id = %caller.student_id()))]
pub async fn update<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(req): Json<ProgressUpdateRequest>,
) -> Result<Json<ProgressUpdateResponse>, ApiError> {
    let course_id: CourseId = parse_id(&req.course_id, "courseId")?;
    let lesson_id: LessonId = parse_id(&req.lesson_id, "lessonId")?;

    let update = state
        .engine
        .progress()
        .report_progress(
            caller.student_id(),
            course_id,
            lesson_id,
            req.video_progress,
            req.total_duration,
        )
        .await?;

    Ok(Json(ProgressUpdateResponse::from(&update)))
}

/// POST /progress/complete: finish a lesson explicitly.
#[tracing::instrument(skip(state, caller, req), fields(student_id = %caller.student_id()))]
pub async fn complete<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(req): Json<LessonCompleteRequest>,
) -> Result<Json<LessonCompleteResponse>, ApiError> {
    let course_id: CourseId = parse_id(&req.course_id, "courseId")?;
    let lesson_id: LessonId = parse_id(&req.lesson_id, "lessonId")?;

    let update = state
        .engine
        .progress()
        .mark_complete(caller.student_id(), course_id, lesson_id)
        .await?;

    Ok(Json(LessonCompleteResponse {
        success: true,
        course_progress: update.course_progress(),
        course_completed: update.course_completed(),
    }))
}

/// GET /progress/course/{courseId}: every lesson record for a course.
#[tracing::instrument(skip(state, caller), fields(student_id = %caller.student_id()))]
pub async fn course<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(course_id): Path<String>,
) -> Result<Json<CourseProgressResponse>, ApiError> {
    let course_id: CourseId = parse_id(&course_id, "courseId")?;
    let progress = state
        .engine
        .progress()
        .course_progress(caller.student_id(), course_id)
        .await?;

    let enrollment = &progress.enrollment;
    Ok(Json(CourseProgressResponse {
        course_id: course_id.to_string(),
        status: enrollment.status().to_string(),
        progress: enrollment.progress(),
        total_lessons: progress.total_lessons,
        completed_lessons: enrollment.completed_lessons().len(),
        last_accessed_lesson: enrollment.last_accessed_lesson(),
        lessons: progress
            .lessons
            .iter()
            .map(LessonProgressResponse::from)
            .collect(),
    }))
}

/// GET /progress/{courseId}/{lessonId}: one lesson's record, zero when the
/// lesson has not been started.
#[tracing::instrument(skip(state, caller), fields(student_id = %caller.student_id()))]
pub async fn lesson<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path((course_id, lesson_id)): Path<(String, String)>,
) -> Result<Json<LessonProgressResponse>, ApiError> {
    let course_id: CourseId = parse_id(&course_id, "courseId")?;
    let lesson_id: LessonId = parse_id(&lesson_id, "lessonId")?;

    let progress = state
        .engine
        .progress()
        .lesson_progress(caller.student_id(), course_id, lesson_id)
        .await?;
    let mut response = LessonProgressResponse::from(&progress);
    response.lesson_id.get_or_insert(lesson_id);

    Ok(Json(response))
}
