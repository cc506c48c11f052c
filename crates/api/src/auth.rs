//! Caller identity extracted from gateway headers.
//!
//! Authentication happens upstream; the gateway forwards the verified user
//! id in `x-user-id` and, for staff, `x-role: admin`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::StudentId;
use engine::{Requester, Role};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-role";

/// Any authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Requester);

impl Caller {
    pub fn student_id(&self) -> StudentId {
        self.0.student_id
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        requester_from(parts).map(Caller).inspect_err(|_| {
            metrics::counter!("api_unauthorized_requests_total").increment(1);
        })
    }
}

/// A caller holding the admin role.
#[derive(Debug, Clone, Copy)]
pub struct AdminCaller(pub Requester);

impl<S: Send + Sync> FromRequestParts<S> for AdminCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Caller(requester) = Caller::from_request_parts(parts, state).await?;
        requester.require_admin()?;
        Ok(AdminCaller(requester))
    }
}

fn requester_from(parts: &Parts) -> Result<Requester, ApiError> {
    let user_id = header(parts, USER_ID_HEADER)?
        .ok_or_else(|| ApiError::Unauthorized("Missing caller identity".to_string()))?;
    let uuid = uuid::Uuid::parse_str(user_id)
        .map_err(|e| ApiError::Unauthorized(format!("Invalid {USER_ID_HEADER}: {e}")))?;

    let role = match header(parts, ROLE_HEADER)? {
        Some(role) => role
            .parse::<Role>()
            .map_err(|e| ApiError::Unauthorized(e.to_string()))?,
        None => Role::default(),
    };

    Ok(Requester {
        student_id: StudentId::from_uuid(uuid),
        role,
    })
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, ApiError> {
    parts
        .headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|_| ApiError::Unauthorized(format!("Invalid {name} header")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn reads_student_identity() {
        let id = uuid::Uuid::new_v4();
        let header = id.to_string();
        let requester = requester_from(&parts(&[(USER_ID_HEADER, header.as_str())])).unwrap();
        assert_eq!(requester.student_id, StudentId::from_uuid(id));
        assert_eq!(requester.role, Role::Student);
    }

    #[test]
    fn reads_admin_role() {
        let id = uuid::Uuid::new_v4().to_string();
        let requester =
            requester_from(&parts(&[(USER_ID_HEADER, id.as_str()), (ROLE_HEADER, "Admin")]))
                .unwrap();
        assert!(requester.is_admin());
    }

    #[test]
    fn rejects_missing_or_malformed_identity() {
        assert!(matches!(
            requester_from(&parts(&[])),
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            requester_from(&parts(&[(USER_ID_HEADER, "student-42")])),
            Err(ApiError::Unauthorized(_))
        ));

        let id = uuid::Uuid::new_v4().to_string();
        assert!(matches!(
            requester_from(&parts(&[(USER_ID_HEADER, id.as_str()), (ROLE_HEADER, "root")])),
            Err(ApiError::Unauthorized(_))
        ));
    }
}
