//! Per-course enrolled-student counter.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use common::{AggregateId, CourseId, StudentId};
use event_store::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::{Aggregate, DomainEvent};

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Roster belongs to course {roster}, not {given}")]
    CourseMismatch { roster: CourseId, given: CourseId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RosterEvent {
    StudentEnrolled(StudentEnrolledData),
    StudentWithdrawn(StudentWithdrawnData),
}

impl DomainEvent for RosterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RosterEvent::StudentEnrolled(_) => "StudentEnrolled",
            RosterEvent::StudentWithdrawn(_) => "StudentWithdrawn",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentEnrolledData {
    pub course_id: CourseId,
    pub student_id: StudentId,

    /// The confirmed payment that earned the seat.
    pub transaction_id: AggregateId,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentWithdrawnData {
    pub student_id: StudentId,
    pub transaction_id: AggregateId,
    pub reason: String,
    pub withdrawn_at: DateTime<Utc>,
}

/// Enrolled-student count for one course.
///
/// Every seat is tied to the transaction that paid for it, so replays and
/// duplicate confirmations can never count a payment twice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourseRoster {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    course_id: Option<CourseId>,
    counted: BTreeSet<AggregateId>,
    withdrawn: BTreeSet<AggregateId>,
}

impl Aggregate for CourseRoster {
    type Event = RosterEvent;
    type Error = RosterError;

    fn aggregate_type() -> &'static str {
        "CourseRoster"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            RosterEvent::StudentEnrolled(data) => {
                if self.id.is_none() {
                    self.id = Some(Self::stream_id(data.course_id));
                    self.course_id = Some(data.course_id);
                }
                self.counted.insert(data.transaction_id);
            }
            RosterEvent::StudentWithdrawn(data) => {
                self.withdrawn.insert(data.transaction_id);
            }
        }
    }
}

impl CourseRoster {
    pub fn stream_id(course_id: CourseId) -> AggregateId {
        AggregateId::derived("course-roster", &[course_id.as_uuid()])
    }

    /// Students currently holding a seat.
    pub fn enrolled_students(&self) -> usize {
        self.counted.len() - self.withdrawn.len()
    }

    /// Students ever enrolled, including those since withdrawn.
    pub fn total_enrollments(&self) -> usize {
        self.counted.len()
    }

    pub fn has_counted(&self, transaction_id: &AggregateId) -> bool {
        self.counted.contains(transaction_id)
    }

    /// Counts a confirmed payment. A transaction is only ever counted once.
    pub fn enroll(
        &self,
        course_id: CourseId,
        student_id: StudentId,
        transaction_id: AggregateId,
    ) -> Result<Vec<RosterEvent>, RosterError> {
        self.ensure_course(course_id)?;

        if self.has_counted(&transaction_id) {
            return Ok(vec![]);
        }

        Ok(vec![RosterEvent::StudentEnrolled(StudentEnrolledData {
            course_id,
            student_id,
            transaction_id,
            enrolled_at: Utc::now(),
        })])
    }

    /// Releases the seat a transaction paid for. Unknown or already
    /// released seats are left alone.
    pub fn withdraw(
        &self,
        student_id: StudentId,
        transaction_id: AggregateId,
        reason: &str,
    ) -> Result<Vec<RosterEvent>, RosterError> {
        if !self.has_counted(&transaction_id) || self.withdrawn.contains(&transaction_id) {
            return Ok(vec![]);
        }

        Ok(vec![RosterEvent::StudentWithdrawn(StudentWithdrawnData {
            student_id,
            transaction_id,
            reason: reason.to_string(),
            withdrawn_at: Utc::now(),
        })])
    }

    fn ensure_course(&self, course_id: CourseId) -> Result<(), RosterError> {
        match self.course_id {
            Some(roster) if roster != course_id => Err(RosterError::CourseMismatch {
                roster,
                given: course_id,
            }),
            _ => Ok(()),
        }
    }
}
