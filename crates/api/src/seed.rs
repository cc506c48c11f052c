//! Startup data for the in-memory catalog and student directory.
//!
//! ```json
//! {
//!   "courses": [
//!     { "id": "…", "title": "Rust Basics", "price": 499.0, "lessonIds": ["…"] }
//!   ],
//!   "students": [
//!     { "id": "…", "name": "Asha Rao", "email": "asha@example.com" }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use common::{CourseId, LessonId, StudentId};
use domain::Money;
use engine::{Course, Student};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("cannot read seed file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid seed data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("course {0} has a negative price")]
    NegativePrice(CourseId),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seed {
    #[serde(default)]
    pub courses: Vec<SeedCourse>,
    #[serde(default)]
    pub students: Vec<SeedStudent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedCourse {
    pub id: CourseId,
    pub title: String,
    /// Price in major currency units, e.g. `499.0`.
    pub price: f64,
    pub lesson_ids: Vec<LessonId>,
}

#[derive(Debug, Deserialize)]
pub struct SeedStudent {
    pub id: StudentId,
    pub name: String,
    pub email: String,
}

impl Seed {
    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SeedError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, SeedError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn courses(&self) -> Result<Vec<Course>, SeedError> {
        self.courses
            .iter()
            .map(|course| {
                if course.price < 0.0 {
                    return Err(SeedError::NegativePrice(course.id));
                }
                Ok(Course {
                    id: course.id,
                    title: course.title.clone(),
                    price: Money::from_cents((course.price * 100.0).round() as i64),
                    lesson_ids: course.lesson_ids.clone(),
                })
            })
            .collect()
    }

    pub fn students(&self) -> Vec<Student> {
        self.students
            .iter()
            .map(|student| Student {
                id: student.id,
                name: student.name.clone(),
                email: student.email.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = r#"{
        "courses": [{
            "id": "0b9e8a52-8a43-4a5e-9a0f-3f0f6c3d2b11",
            "title": "Rust Basics",
            "price": 499.99,
            "lessonIds": [
                "9c1f1c9e-1b7a-4b8e-8d7e-2f1d5b0c6a01",
                "9c1f1c9e-1b7a-4b8e-8d7e-2f1d5b0c6a02"
            ]
        }],
        "students": [{
            "id": "5a3c2e71-0f3d-4c55-9d8b-6f5e4d3c2b1a",
            "name": "Asha Rao",
            "email": "asha@example.com"
        }]
    }"#;

    #[test]
    fn parses_courses_and_students() {
        let seed = Seed::from_json(SEED).unwrap();

        let courses = seed.courses().unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].title, "Rust Basics");
        assert_eq!(courses[0].price.cents(), 49_999);
        assert_eq!(courses[0].total_lessons(), 2);

        let students = seed.students();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].name, "Asha Rao");
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let seed = Seed::from_json("{}").unwrap();
        assert!(seed.courses().unwrap().is_empty());
        assert!(seed.students().is_empty());
    }

    #[test]
    fn rejects_negative_prices_and_bad_json() {
        let seed = Seed::from_json(
            r#"{"courses":[{"id":"0b9e8a52-8a43-4a5e-9a0f-3f0f6c3d2b11","title":"Free?","price":-1,"lessonIds":[]}]}"#,
        )
        .unwrap();
        assert!(matches!(seed.courses(), Err(SeedError::NegativePrice(_))));

        assert!(matches!(Seed::from_json("{"), Err(SeedError::Parse(_))));
    }
}
