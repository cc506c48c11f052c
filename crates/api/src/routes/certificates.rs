//! Certificate endpoints: public verification, owner downloads and
//! on-demand generation.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use common::CourseId;
use domain::{ArtifactState, Certificate, Grade};
use engine::Verification;
use event_store::EventStore;
use projections::CertificateSummary;
use serde::{Deserialize, Serialize};

use crate::auth::Caller;
use crate::error::ApiError;
use crate::routes::parse_id;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub course_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub certificate_id: String,
    pub student_name: String,
    pub course_name: String,
    pub grade: Grade,
    pub progress: u8,
    pub issued_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub verification_url: String,
    pub is_valid: bool,
    pub artifact_ready: bool,
}

impl From<Verification> for VerificationResponse {
    fn from(v: Verification) -> Self {
        Self {
            certificate_id: v.certificate_id,
            student_name: v.student_name,
            course_name: v.course_title,
            grade: v.grade,
            progress: v.progress,
            issued_at: v.issued_at,
            completed_at: v.completed_at,
            verification_url: v.verification_url,
            is_valid: v.is_valid,
            artifact_ready: v.artifact_ready,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactResponse {
    pub status: &'static str,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub rendered_at: Option<DateTime<Utc>>,
}

impl From<&ArtifactState> for ArtifactResponse {
    fn from(state: &ArtifactState) -> Self {
        match state {
            ArtifactState::Pending {
                attempts,
                last_error,
            } => Self {
                status: "pending",
                attempts: *attempts,
                last_error: last_error.clone(),
                rendered_at: None,
            },
            ArtifactState::Ready { rendered_at } => Self {
                status: "ready",
                attempts: 0,
                last_error: None,
                rendered_at: Some(*rendered_at),
            },
            ArtifactState::Failed {
                attempts,
                last_error,
            } => Self {
                status: "failed",
                attempts: *attempts,
                last_error: Some(last_error.clone()),
                rendered_at: None,
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateResponse {
    pub certificate_id: String,
    pub student_id: Option<String>,
    pub course_id: Option<String>,
    pub student_name: String,
    pub course_name: String,
    pub grade: Option<Grade>,
    pub progress: u8,
    pub verification_url: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_valid: bool,
    pub revoked_reason: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub artifact: ArtifactResponse,
}

impl From<&Certificate> for CertificateResponse {
    fn from(certificate: &Certificate) -> Self {
        Self {
            certificate_id: certificate
                .certificate_id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            student_id: certificate.student_id().map(|id| id.to_string()),
            course_id: certificate.course_id().map(|id| id.to_string()),
            student_name: certificate.student_name().to_string(),
            course_name: certificate.course_title().to_string(),
            grade: certificate.grade(),
            progress: certificate.progress(),
            verification_url: certificate.verification_url().to_string(),
            issued_at: certificate.issued_at(),
            completed_at: certificate.completed_at(),
            is_valid: certificate.is_valid(),
            revoked_reason: certificate.revoked_reason().map(String::from),
            revoked_at: certificate.revoked_at(),
            artifact: ArtifactResponse::from(certificate.artifact_state()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSummaryResponse {
    pub certificate_id: String,
    pub course_id: String,
    pub course_name: String,
    pub grade: Grade,
    pub verification_url: String,
    pub issued_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub artifact_ready: bool,
    pub is_valid: bool,
    pub revoked_reason: Option<String>,
}

impl From<CertificateSummary> for CertificateSummaryResponse {
    fn from(summary: CertificateSummary) -> Self {
        Self {
            is_valid: summary.is_valid(),
            certificate_id: summary.certificate_id.to_string(),
            course_id: summary.course_id.to_string(),
            course_name: summary.course_title,
            grade: summary.grade,
            verification_url: summary.verification_url,
            issued_at: summary.issued_at,
            completed_at: summary.completed_at,
            artifact_ready: summary.artifact_ready,
            revoked_reason: summary.revoked_reason,
        }
    }
}

/// GET /certificates/verify/{certificateId}: public verification.
#[tracing::instrument(skip(state))]
pub async fn verify<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(certificate_id): Path<String>,
) -> Result<Json<VerificationResponse>, ApiError> {
    let verification = state.engine.certificates().verify(&certificate_id).await?;
    Ok(Json(VerificationResponse::from(verification)))
}

/// GET /certificates/{id}/download: the rendered PDF.
#[tracing::instrument(skip(state, caller), fields(student_id = %caller.student_id()))]
pub async fn download<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(certificate_id): Path<String>,
) -> Result<Response, ApiError> {
    let artifact = state
        .engine
        .certificates()
        .download(&certificate_id, &caller.0)
        .await?;

    let disposition = format!("attachment; filename=\"{}\"", artifact.file_name);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes,
    )
        .into_response())
}

/// POST /certificates/generate: the caller's certificate for a completed
/// course, issued now if it does not exist yet.
#[tracing::instrument(skip(state, caller, req), fields(student_id = %caller.student_id()))]
pub async fn generate<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<CertificateResponse>, ApiError> {
    let course_id: CourseId = parse_id(&req.course_id, "courseId")?;
    let certificate = state
        .engine
        .certificates()
        .generate(caller.student_id(), course_id)
        .await?;
    Ok(Json(CertificateResponse::from(&certificate)))
}

/// GET /certificates/mine: certificates issued to the caller.
#[tracing::instrument(skip(state, caller), fields(student_id = %caller.student_id()))]
pub async fn mine<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<Json<Vec<CertificateSummaryResponse>>, ApiError> {
    state.catch_up().await?;
    let certificates = state.certificates.for_student(caller.student_id()).await;
    Ok(Json(
        certificates
            .into_iter()
            .map(CertificateSummaryResponse::from)
            .collect(),
    ))
}

/// GET /certificates/{id}: full record, for its owner or an admin.
#[tracing::instrument(skip(state, caller), fields(student_id = %caller.student_id()))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(certificate_id): Path<String>,
) -> Result<Json<CertificateResponse>, ApiError> {
    let certificate = state
        .engine
        .certificates()
        .get_for(&certificate_id, &caller.0)
        .await?;
    Ok(Json(CertificateResponse::from(&certificate)))
}
