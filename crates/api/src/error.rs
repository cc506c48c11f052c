//! API error types with HTTP response mapping.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use engine::EngineError;
use projections::ProjectionError;

/// Seconds a client should wait before asking for an artifact again.
const ARTIFACT_RETRY_AFTER_SECS: &str = "5";

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or malformed caller identity.
    Unauthorized(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Lifecycle engine error.
    Engine(EngineError),
    /// Read model could not catch up with the log.
    Projection(ProjectionError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::Map::new();
        let status = match self {
            ApiError::Unauthorized(msg) => {
                body.insert("error".into(), msg.into());
                StatusCode::UNAUTHORIZED
            }
            ApiError::BadRequest(msg) => {
                body.insert("error".into(), msg.into());
                StatusCode::BAD_REQUEST
            }
            ApiError::Engine(err) => {
                let status = engine_error_status(&err);
                if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                }
                if let EngineError::CertificateRevoked { reason } = &err {
                    body.insert("isValid".into(), false.into());
                    body.insert("revokedReason".into(), reason.clone().into());
                }
                body.insert("error".into(), err.to_string().into());
                status
            }
            ApiError::Projection(err) => {
                tracing::error!(error = %err, "projection catch-up failed");
                body.insert("error".into(), err.to_string().into());
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                body.insert("error".into(), msg.into());
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut response = (status, axum::Json(serde_json::Value::Object(body))).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(ARTIFACT_RETRY_AFTER_SECS),
            );
        }
        response
    }
}

fn engine_error_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::CourseNotFound(_)
        | EngineError::LessonNotFound { .. }
        | EngineError::TransactionNotFound(_)
        | EngineError::EnrollmentNotFound { .. }
        | EngineError::CertificateNotFound(_)
        | EngineError::StudentNotFound(_) => StatusCode::NOT_FOUND,

        EngineError::AlreadyEnrolled
        | EngineError::Validation(_)
        | EngineError::CourseNotCompleted
        | EngineError::CertificateRevoked { .. } => StatusCode::BAD_REQUEST,

        EngineError::NotEnrolled | EngineError::Forbidden(_) => StatusCode::FORBIDDEN,

        EngineError::InvalidState(_) | EngineError::RetriesExhausted { .. } => {
            StatusCode::CONFLICT
        }

        EngineError::ArtifactNotReady => StatusCode::SERVICE_UNAVAILABLE,

        EngineError::EventStore(e) if e.is_concurrency_conflict() => StatusCode::CONFLICT,
        EngineError::Domain(e) => domain_error_status(e),

        EngineError::Render(_) | EngineError::EventStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn domain_error_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::AggregateNotFound { .. } => StatusCode::NOT_FOUND,
        DomainError::EventStore(e) if e.is_concurrency_conflict() => StatusCode::CONFLICT,
        DomainError::Enrollment(_)
        | DomainError::Transaction(_)
        | DomainError::LessonProgress(_)
        | DomainError::Certificate(_)
        | DomainError::Roster(_) => StatusCode::CONFLICT,
        DomainError::EventStore(_) | DomainError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl From<ProjectionError> for ApiError {
    fn from(err: ProjectionError) -> Self {
        ApiError::Projection(err)
    }
}

#[cfg(test)]
mod tests {
    use common::{CourseId, StudentId};

    use super::*;

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (EngineError::CourseNotFound(CourseId::new()), StatusCode::NOT_FOUND),
            (
                EngineError::EnrollmentNotFound {
                    student_id: StudentId::new(),
                    course_id: CourseId::new(),
                },
                StatusCode::NOT_FOUND,
            ),
            (EngineError::AlreadyEnrolled, StatusCode::BAD_REQUEST),
            (EngineError::CourseNotCompleted, StatusCode::BAD_REQUEST),
            (EngineError::NotEnrolled, StatusCode::FORBIDDEN),
            (EngineError::Forbidden("not yours"), StatusCode::FORBIDDEN),
            (EngineError::InvalidState("paid".into()), StatusCode::CONFLICT),
            (
                EngineError::RetriesExhausted {
                    operation: "confirm_payment",
                    attempts: 8,
                },
                StatusCode::CONFLICT,
            ),
            (EngineError::ArtifactNotReady, StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, expected) in cases {
            assert_eq!(engine_error_status(&err), expected, "{err}");
        }
    }

    #[tokio::test]
    async fn revoked_certificate_body_carries_reason() {
        let response = ApiError::Engine(EngineError::CertificateRevoked {
            reason: "academic misconduct".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["revokedReason"], "academic misconduct");
        assert_eq!(json["isValid"], false);
        assert!(json["error"].as_str().unwrap().contains("revoked"));
    }

    #[test]
    fn artifact_not_ready_sets_retry_after() {
        let response = ApiError::Engine(EngineError::ArtifactNotReady).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            ARTIFACT_RETRY_AFTER_SECS
        );
    }
}
