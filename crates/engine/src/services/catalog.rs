//! Course catalog trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{CourseId, LessonId};
use domain::Money;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What the engine needs to know about a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub title: String,
    pub price: Money,
    /// Ordered lesson list. Progress is measured against this list.
    pub lesson_ids: Vec<LessonId>,
}

impl Course {
    pub fn new(title: impl Into<String>, price: Money, lesson_ids: Vec<LessonId>) -> Self {
        Self {
            id: CourseId::new(),
            title: title.into(),
            price,
            lesson_ids,
        }
    }

    pub fn has_lesson(&self, lesson_id: LessonId) -> bool {
        self.lesson_ids.contains(&lesson_id)
    }

    pub fn total_lessons(&self) -> usize {
        self.lesson_ids.len()
    }
}

/// Read access to the course catalog.
#[async_trait]
pub trait CourseCatalog: Send + Sync {
    async fn get_course(&self, course_id: CourseId) -> Result<Option<Course>>;
}

/// In-memory catalog, seeded at startup and in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCourseCatalog {
    courses: Arc<RwLock<HashMap<CourseId, Course>>>,
}

impl InMemoryCourseCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_courses(courses: impl IntoIterator<Item = Course>) -> Self {
        let catalog = Self::new();
        for course in courses {
            catalog.insert(course);
        }
        catalog
    }

    /// Adds or replaces a course.
    pub fn insert(&self, course: Course) {
        self.courses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(course.id, course);
    }

    pub fn len(&self) -> usize {
        self.courses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CourseCatalog for InMemoryCourseCatalog {
    async fn get_course(&self, course_id: CourseId) -> Result<Option<Course>> {
        Ok(self
            .courses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&course_id)
            .cloned())
    }
}
