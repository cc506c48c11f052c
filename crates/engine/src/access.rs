//! Who is asking.

use std::str::FromStr;

use common::StudentId;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Admin,
}

impl FromStr for Role {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "admin" => Ok(Role::Admin),
            other => Err(EngineError::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub student_id: StudentId,
    pub role: Role,
}

impl Requester {
    pub fn student(student_id: StudentId) -> Self {
        Self {
            student_id,
            role: Role::Student,
        }
    }

    pub fn admin(student_id: StudentId) -> Self {
        Self {
            student_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners see their own records; admins see everything.
    pub fn can_access(&self, owner: StudentId) -> bool {
        self.is_admin() || self.student_id == owner
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(EngineError::Forbidden("admin role required"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owners_and_admins_have_access() {
        let owner = StudentId::new();
        assert!(Requester::student(owner).can_access(owner));
        assert!(!Requester::student(StudentId::new()).can_access(owner));
        assert!(Requester::admin(StudentId::new()).can_access(owner));
    }

    #[test]
    fn parses_roles() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("student".parse::<Role>().unwrap(), Role::Student);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn require_admin() {
        assert!(Requester::admin(StudentId::new()).require_admin().is_ok());
        assert!(matches!(
            Requester::student(StudentId::new()).require_admin(),
            Err(EngineError::Forbidden(_))
        ));
    }
}
