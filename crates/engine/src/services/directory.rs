//! Student directory trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::StudentId;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub email: String,
}

/// Looks up the people certificates are issued to.
#[async_trait]
pub trait StudentDirectory: Send + Sync {
    async fn get_student(&self, student_id: StudentId) -> Result<Option<Student>>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStudentDirectory {
    students: Arc<RwLock<HashMap<StudentId, Student>>>,
}

impl InMemoryStudentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_students(students: impl IntoIterator<Item = Student>) -> Self {
        let directory = Self::new();
        for student in students {
            directory.insert(student);
        }
        directory
    }

    pub fn insert(&self, student: Student) {
        self.students
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(student.id, student);
    }
}

#[async_trait]
impl StudentDirectory for InMemoryStudentDirectory {
    async fn get_student(&self, student_id: StudentId) -> Result<Option<Student>> {
        Ok(self
            .students
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&student_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup() {
        let student = Student {
            id: StudentId::new(),
            name: "Asha Rao".to_string(),
            email: "asha@example.com".to_string(),
        };
        let directory = InMemoryStudentDirectory::with_students([student.clone()]);

        assert_eq!(
            directory.get_student(student.id).await.unwrap(),
            Some(student)
        );
        assert_eq!(directory.get_student(StudentId::new()).await.unwrap(), None);
    }
}
