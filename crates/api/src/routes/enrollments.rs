//! Enrollment and payment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{AggregateId, CourseId, LessonId, StudentId};
use domain::{Aggregate, Enrollment, PaymentTransaction};
use engine::EngineError;
use event_store::EventStore;
use projections::EnrollmentSummary;
use serde::{Deserialize, Serialize};

use crate::auth::Caller;
use crate::error::ApiError;
use crate::routes::{parse_aggregate_id, parse_id};
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub course_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub transaction_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailedRequest {
    pub transaction_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub transaction_id: String,
    pub enrollment_id: String,
    pub amount: f64,
    pub course_name: String,
    pub upi_id: String,
    pub qr_code_data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub enrollment_id: String,
    pub message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentResponse {
    pub enrollment_id: String,
    pub student_id: String,
    pub course_id: String,
    pub status: String,
    pub payment_status: String,
    pub progress: u8,
    pub completed_lessons: Vec<LessonId>,
    pub last_accessed_lesson: Option<LessonId>,
    pub transaction_id: Option<String>,
    pub amount: f64,
    pub enrolled_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl From<&Enrollment> for EnrollmentResponse {
    fn from(enrollment: &Enrollment) -> Self {
        Self {
            enrollment_id: enrollment.id().map(|id| id.to_string()).unwrap_or_default(),
            student_id: enrollment
                .student_id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            course_id: enrollment
                .course_id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            status: enrollment.status().to_string(),
            payment_status: enrollment.payment_status().to_string(),
            progress: enrollment.progress(),
            completed_lessons: enrollment.completed_lessons().iter().copied().collect(),
            last_accessed_lesson: enrollment.last_accessed_lesson(),
            transaction_id: enrollment.transaction_id().map(|id| id.to_string()),
            amount: enrollment.amount().as_major(),
            enrolled_at: enrollment.enrolled_at(),
            last_accessed_at: enrollment.last_accessed_at(),
            completed_at: enrollment.completed_at(),
            cancellation_reason: enrollment.cancellation_reason().map(String::from),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentStatusResponse {
    pub is_enrolled: bool,
    pub enrollment: Option<EnrollmentResponse>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentSummaryResponse {
    pub enrollment_id: String,
    pub course_id: String,
    pub status: String,
    pub payment_status: String,
    pub progress: u8,
    pub completed_lessons: usize,
    pub amount: f64,
    pub enrolled_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<EnrollmentSummary> for EnrollmentSummaryResponse {
    fn from(summary: EnrollmentSummary) -> Self {
        Self {
            enrollment_id: summary.enrollment_id.to_string(),
            course_id: summary.course_id.to_string(),
            status: summary.status.to_string(),
            payment_status: summary.payment_status.to_string(),
            progress: summary.progress,
            completed_lessons: summary.completed_lessons,
            amount: summary.amount.as_major(),
            enrolled_at: summary.enrolled_at,
            last_accessed_at: summary.last_accessed_at,
            completed_at: summary.completed_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub transaction_id: String,
    pub enrollment_id: Option<String>,
    pub student_id: Option<String>,
    pub course_id: Option<String>,
    pub course_name: String,
    pub amount: f64,
    pub status: String,
    pub payment_method: String,
    pub upi_id: String,
    pub failure_reason: Option<String>,
    pub refund_reason: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransactionResponse {
    pub fn new(transaction_id: AggregateId, transaction: &PaymentTransaction) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            enrollment_id: transaction.enrollment_id().map(|id| id.to_string()),
            student_id: transaction.student_id().map(|id| id.to_string()),
            course_id: transaction.course_id().map(|id| id.to_string()),
            course_name: transaction.course_title().to_string(),
            amount: transaction.amount().as_major(),
            status: transaction.status().to_string(),
            payment_method: transaction.payment_method().to_string(),
            upi_id: transaction.upi_id().to_string(),
            failure_reason: transaction.failure_reason().map(String::from),
            refund_reason: transaction.refund_reason().map(String::from),
            opened_at: transaction.opened_at(),
            completed_at: transaction.completed_at(),
        }
    }
}

// -- Handlers --

/// POST /enrollments/initiate: open (or reuse) a payment for a course.
#[tracing::instrument(skip(state, caller, req), fields(student_id = %caller.student_id()))]
pub async fn initiate<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(req): Json<InitiateRequest>,
) -> Result<(StatusCode, Json<InitiateResponse>), ApiError> {
    let course_id: CourseId = parse_id(&req.course_id, "courseId")?;
    let initiation = state
        .engine
        .enrollments()
        .initiate(caller.student_id(), course_id)
        .await?;

    let status = if initiation.reused {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(InitiateResponse {
            transaction_id: initiation.transaction_id.to_string(),
            enrollment_id: initiation.enrollment_id.to_string(),
            amount: initiation.amount.as_major(),
            course_name: initiation.course_title,
            upi_id: initiation.upi_id,
            qr_code_data: initiation.qr_code_data,
        }),
    ))
}

/// POST /enrollments/confirm: mark a payment as received and activate the
/// enrollment.
#[tracing::instrument(skip(state, caller, req), fields(student_id = %caller.student_id()))]
pub async fn confirm<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let transaction_id = parse_aggregate_id(&req.transaction_id)?;
    ensure_payer(&state, &caller, transaction_id).await?;

    let confirmation = state
        .engine
        .enrollments()
        .confirm_payment(transaction_id)
        .await?;

    Ok(Json(ConfirmResponse {
        enrollment_id: confirmation.enrollment_id.to_string(),
        message: if confirmation.newly_confirmed {
            "Payment confirmed, enrollment is active"
        } else {
            "Payment was already confirmed"
        },
    }))
}

/// POST /enrollments/payment-failed: record a failed payment attempt.
#[tracing::instrument(skip(state, caller, req), fields(student_id = %caller.student_id()))]
pub async fn payment_failed<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(req): Json<PaymentFailedRequest>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let transaction_id = parse_aggregate_id(&req.transaction_id)?;
    ensure_payer(&state, &caller, transaction_id).await?;

    let reason = req.reason.as_deref().unwrap_or("Payment failed");
    let transaction = state
        .engine
        .enrollments()
        .record_payment_failure(transaction_id, reason)
        .await?;

    Ok(Json(TransactionResponse::new(transaction_id, &transaction)))
}

/// GET /enrollments/status/{courseId}: whether the caller may use a course.
#[tracing::instrument(skip(state, caller), fields(student_id = %caller.student_id()))]
pub async fn status<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(course_id): Path<String>,
) -> Result<Json<EnrollmentStatusResponse>, ApiError> {
    let course_id: CourseId = parse_id(&course_id, "courseId")?;
    let enrollment = state
        .engine
        .enrollments()
        .get_enrollment(caller.student_id(), course_id)
        .await?;

    Ok(Json(EnrollmentStatusResponse {
        is_enrolled: enrollment.as_ref().is_some_and(Enrollment::grants_access),
        enrollment: enrollment.as_ref().map(EnrollmentResponse::from),
    }))
}

/// GET /enrollments/mine: the caller's enrollments that grant access.
#[tracing::instrument(skip(state, caller), fields(student_id = %caller.student_id()))]
pub async fn mine<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<Json<Vec<EnrollmentSummaryResponse>>, ApiError> {
    state.catch_up().await?;
    let enrollments = state
        .enrollments
        .accessible_for_student(caller.student_id())
        .await;

    Ok(Json(
        enrollments
            .into_iter()
            .map(EnrollmentSummaryResponse::from)
            .collect(),
    ))
}

/// Payment callbacks come from the student who owns the transaction, or
/// from an admin acting for them.
async fn ensure_payer<S: EventStore + Clone + 'static>(
    state: &AppState<S>,
    caller: &Caller,
    transaction_id: AggregateId,
) -> Result<(), ApiError> {
    let transaction = state
        .engine
        .enrollments()
        .get_transaction(transaction_id)
        .await?;
    let payer: Option<StudentId> = transaction.student_id();
    match payer {
        Some(payer) if caller.0.can_access(payer) => Ok(()),
        Some(_) => Err(EngineError::Forbidden("transaction belongs to another student").into()),
        None => Err(EngineError::TransactionNotFound(transaction_id).into()),
    }
}
