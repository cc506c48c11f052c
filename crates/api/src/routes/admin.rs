//! Administrative endpoints. Every handler requires `x-role: admin`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{CourseId, StudentId};
use event_store::EventStore;
use projections::RevenueStats;
use serde::{Deserialize, Serialize};

use crate::auth::AdminCaller;
use crate::error::ApiError;
use crate::routes::certificates::CertificateResponse;
use crate::routes::enrollments::{EnrollmentResponse, TransactionResponse};
use crate::routes::{parse_aggregate_id, parse_id};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelEnrollmentRequest {
    pub student_id: String,
    pub course_id: String,
    pub reason: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRevenueResponse {
    pub course_id: String,
    pub course_name: String,
    pub enrollments: u64,
    pub revenue: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyRevenueResponse {
    pub month: String,
    pub transactions: u64,
    pub revenue: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueStatsResponse {
    pub total_revenue: f64,
    pub total_transactions: u64,
    pub average_order_value: f64,
    pub top_courses: Vec<CourseRevenueResponse>,
    pub revenue_by_month: Vec<MonthlyRevenueResponse>,
}

impl From<RevenueStats> for RevenueStatsResponse {
    fn from(stats: RevenueStats) -> Self {
        Self {
            total_revenue: stats.total_revenue.as_major(),
            total_transactions: stats.total_transactions,
            average_order_value: stats.average_order_value.as_major(),
            top_courses: stats
                .top_courses
                .into_iter()
                .map(|course| CourseRevenueResponse {
                    course_id: course.course_id.to_string(),
                    course_name: course.course_title,
                    enrollments: course.enrollments,
                    revenue: course.revenue.as_major(),
                })
                .collect(),
            revenue_by_month: stats
                .revenue_by_month
                .into_iter()
                .map(|month| MonthlyRevenueResponse {
                    month: month.month,
                    transactions: month.transactions,
                    revenue: month.revenue.as_major(),
                })
                .collect(),
        }
    }
}

/// Response type for event envelope data.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelopeResponse {
    pub event_id: String,
    pub event_type: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub version: i64,
    pub timestamp: String,
    pub payload: serde_json::Value,
}

/// POST /admin/certificates/{id}/revoke
#[tracing::instrument(skip(state, _admin, req))]
pub async fn revoke_certificate<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: AdminCaller,
    Path(certificate_id): Path<String>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<CertificateResponse>, ApiError> {
    let reason = non_blank(&req.reason)?;
    let certificate = state
        .engine
        .certificates()
        .revoke(&certificate_id, reason)
        .await?;
    Ok(Json(CertificateResponse::from(&certificate)))
}

/// POST /admin/certificates/{id}/render: queue another render attempt.
#[tracing::instrument(skip(state, _admin))]
pub async fn render_certificate<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: AdminCaller,
    Path(certificate_id): Path<String>,
) -> Result<Json<CertificateResponse>, ApiError> {
    let certificate = state
        .engine
        .certificates()
        .request_render(&certificate_id)
        .await?;
    Ok(Json(CertificateResponse::from(&certificate)))
}

/// POST /admin/transactions/{id}/refund
#[tracing::instrument(skip(state, _admin, req))]
pub async fn refund_transaction<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: AdminCaller,
    Path(transaction_id): Path<String>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let transaction_id = parse_aggregate_id(&transaction_id)?;
    let reason = non_blank(&req.reason)?;
    let transaction = state
        .engine
        .enrollments()
        .refund(transaction_id, reason)
        .await?;
    Ok(Json(TransactionResponse::new(transaction_id, &transaction)))
}

/// POST /admin/enrollments/cancel
#[tracing::instrument(skip(state, _admin, req))]
pub async fn cancel_enrollment<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: AdminCaller,
    Json(req): Json<CancelEnrollmentRequest>,
) -> Result<Json<EnrollmentResponse>, ApiError> {
    let student_id: StudentId = parse_id(&req.student_id, "studentId")?;
    let course_id: CourseId = parse_id(&req.course_id, "courseId")?;
    let reason = non_blank(&req.reason)?;

    let enrollment = state
        .engine
        .enrollments()
        .cancel(student_id, course_id, reason)
        .await?;
    Ok(Json(EnrollmentResponse::from(&enrollment)))
}

/// GET /admin/transactions/stats: revenue from completed payments.
#[tracing::instrument(skip(state, _admin))]
pub async fn transaction_stats<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: AdminCaller,
) -> Result<Json<RevenueStatsResponse>, ApiError> {
    state.catch_up().await?;
    Ok(Json(RevenueStatsResponse::from(state.revenue.stats().await)))
}

/// GET /admin/streams/{id}/events: raw history of any stream.
#[tracing::instrument(skip(state, _admin))]
pub async fn stream_events<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: AdminCaller,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventEnvelopeResponse>>, ApiError> {
    let aggregate_id = parse_aggregate_id(&id)?;

    let envelopes = state
        .event_store
        .get_events_for_aggregate(aggregate_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let responses: Vec<EventEnvelopeResponse> = envelopes
        .into_iter()
        .map(|e| EventEnvelopeResponse {
            event_id: e.event_id.to_string(),
            event_type: e.event_type,
            aggregate_id: e.aggregate_id.to_string(),
            aggregate_type: e.aggregate_type,
            version: e.version.as_i64(),
            timestamp: e.timestamp.to_rfc3339(),
            payload: e.payload,
        })
        .collect();

    Ok(Json(responses))
}

fn non_blank(reason: &str) -> Result<&str, ApiError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ApiError::BadRequest("reason must not be empty".to_string()));
    }
    Ok(reason)
}
