//! Enrollment aggregate implementation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use common::{AggregateId, CourseId, LessonId, StudentId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, SnapshotCapable};
use crate::money::Money;

use super::{EnrollmentError, EnrollmentEvent, EnrollmentStatus, PaymentStatus};

/// One student's access to one course.
///
/// There is exactly one enrollment stream per (student, course) pair, keyed
/// by [`Enrollment::stream_id`]. A cancelled enrollment is reopened on the
/// same stream rather than replaced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Enrollment {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    student_id: Option<StudentId>,
    course_id: Option<CourseId>,
    status: EnrollmentStatus,
    payment_status: PaymentStatus,

    /// Whole percent, never decreases while the enrollment is live.
    progress: u8,

    completed_lessons: BTreeSet<LessonId>,
    last_accessed_lesson: Option<LessonId>,
    last_accessed_at: Option<DateTime<Utc>>,
    enrolled_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,

    /// The payment attempt currently backing the enrollment.
    transaction_id: Option<AggregateId>,
    amount: Money,
    cancellation_reason: Option<String>,
}

impl Aggregate for Enrollment {
    type Event = EnrollmentEvent;
    type Error = EnrollmentError;

    fn aggregate_type() -> &'static str {
        "Enrollment"
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
            EnrollmentEvent::EnrollmentInitiated(data) => {
                self.id = Some(data.enrollment_id);
                self.student_id = Some(data.student_id);
                self.course_id = Some(data.course_id);
                self.status = EnrollmentStatus::Pending;
                self.payment_status = PaymentStatus::Pending;
                self.enrolled_at = Some(data.initiated_at);
                self.cancellation_reason = None;
            }
            EnrollmentEvent::TransactionAttached(data) => {
                self.transaction_id = Some(data.transaction_id);
                self.amount = data.amount;
                self.payment_status = PaymentStatus::Pending;
            }
            EnrollmentEvent::PaymentConfirmed(_) => {
                self.status = EnrollmentStatus::Active;
                self.payment_status = PaymentStatus::Completed;
            }
            EnrollmentEvent::PaymentFailed(_) => {
                self.payment_status = PaymentStatus::Failed;
            }
            EnrollmentEvent::LessonAccessed(data) => {
                self.last_accessed_lesson = Some(data.lesson_id);
                self.last_accessed_at = Some(data.accessed_at);
            }
            EnrollmentEvent::LessonCompleted(data) => {
                self.completed_lessons.insert(data.lesson_id);
            }
            EnrollmentEvent::ProgressRecalculated(data) => {
                self.progress = self.progress.max(data.progress);
            }
            EnrollmentEvent::EnrollmentCompleted(data) => {
                self.status = EnrollmentStatus::Completed;
                self.completed_at = Some(data.completed_at);
                self.progress = self.progress.max(data.progress);
            }
            EnrollmentEvent::EnrollmentCancelled(data) => {
                self.status = EnrollmentStatus::Cancelled;
                self.cancellation_reason = Some(data.reason);
            }
        }
    }
}

impl SnapshotCapable for Enrollment {
    fn snapshot_interval() -> usize {
        50
    }
}

impl Enrollment {
    /// The enrollment stream for a (student, course) pair.
    pub fn stream_id(student_id: StudentId, course_id: CourseId) -> AggregateId {
        AggregateId::derived(
            "enrollment",
            &[student_id.as_uuid(), course_id.as_uuid()],
        )
    }
}

// Query methods
impl Enrollment {
    pub fn student_id(&self) -> Option<StudentId> {
        self.student_id
    }

    pub fn course_id(&self) -> Option<CourseId> {
        self.course_id
    }

    pub fn status(&self) -> EnrollmentStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn completed_lessons(&self) -> &BTreeSet<LessonId> {
        &self.completed_lessons
    }

    pub fn has_completed_lesson(&self, lesson_id: &LessonId) -> bool {
        self.completed_lessons.contains(lesson_id)
    }

    pub fn last_accessed_lesson(&self) -> Option<LessonId> {
        self.last_accessed_lesson
    }

    pub fn last_accessed_at(&self) -> Option<DateTime<Utc>> {
        self.last_accessed_at
    }

    pub fn enrolled_at(&self) -> Option<DateTime<Utc>> {
        self.enrolled_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn transaction_id(&self) -> Option<AggregateId> {
        self.transaction_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn grants_access(&self) -> bool {
        self.id.is_some() && self.status.grants_access()
    }

    pub fn is_completed(&self) -> bool {
        self.status == EnrollmentStatus::Completed
    }

    /// The transaction still awaiting payment, if any.
    pub fn open_transaction(&self) -> Option<AggregateId> {
        if self.status == EnrollmentStatus::Pending && self.payment_status == PaymentStatus::Pending
        {
            self.transaction_id
        } else {
            None
        }
    }
}

// Command methods (return events)
impl Enrollment {
    /// Starts (or restarts) paying for the course with a new transaction.
    ///
    /// A fresh or cancelled enrollment is (re)initiated; a pending one whose
    /// last payment failed gets the new transaction attached. A pending
    /// enrollment with a payment still open is left for the caller to reuse.
    pub fn initiate(
        &self,
        enrollment_id: AggregateId,
        student_id: StudentId,
        course_id: CourseId,
        transaction_id: AggregateId,
        amount: Money,
    ) -> Result<Vec<EnrollmentEvent>, EnrollmentError> {
        if self.id.is_none() {
            return Ok(vec![
                EnrollmentEvent::initiated(enrollment_id, student_id, course_id, false),
                EnrollmentEvent::transaction_attached(transaction_id, amount),
            ]);
        }

        if !self.status.can_initiate() {
            return Err(EnrollmentError::AlreadyEnrolled);
        }

        match self.status {
            EnrollmentStatus::Cancelled => Ok(vec![
                EnrollmentEvent::initiated(enrollment_id, student_id, course_id, true),
                EnrollmentEvent::transaction_attached(transaction_id, amount),
            ]),
            _ => match self.open_transaction() {
                Some(open) => Err(EnrollmentError::PaymentPending {
                    transaction_id: open,
                }),
                None => Ok(vec![EnrollmentEvent::transaction_attached(
                    transaction_id,
                    amount,
                )]),
            },
        }
    }

    /// Activates the enrollment. Confirming the same transaction twice is a no-op.
    pub fn confirm_payment(
        &self,
        transaction_id: AggregateId,
    ) -> Result<Vec<EnrollmentEvent>, EnrollmentError> {
        self.ensure_initiated()?;

        if self.transaction_id != Some(transaction_id) {
            return Err(EnrollmentError::TransactionMismatch {
                current: self.transaction_id,
                given: transaction_id,
            });
        }

        if self.status.grants_access() && self.payment_status == PaymentStatus::Completed {
            return Ok(vec![]);
        }

        if !self.status.can_confirm_payment() {
            return Err(EnrollmentError::InvalidStateTransition {
                current: self.status,
                action: "confirm payment",
            });
        }

        Ok(vec![EnrollmentEvent::payment_confirmed(transaction_id)])
    }

    /// Records that the current payment attempt failed. The enrollment stays pending.
    pub fn record_payment_failure(
        &self,
        transaction_id: AggregateId,
        reason: &str,
    ) -> Result<Vec<EnrollmentEvent>, EnrollmentError> {
        self.ensure_initiated()?;

        if self.transaction_id != Some(transaction_id) {
            return Err(EnrollmentError::TransactionMismatch {
                current: self.transaction_id,
                given: transaction_id,
            });
        }

        if self.payment_status == PaymentStatus::Failed {
            return Ok(vec![]);
        }

        if self.status != EnrollmentStatus::Pending {
            return Err(EnrollmentError::InvalidStateTransition {
                current: self.status,
                action: "record payment failure",
            });
        }

        Ok(vec![EnrollmentEvent::payment_failed(transaction_id, reason)])
    }

    /// Records a visit to a lesson and, when `finished`, adds it to the
    /// completed set. Re-finishing a completed lesson adds nothing.
    pub fn track_lesson(
        &self,
        lesson_id: LessonId,
        finished: bool,
    ) -> Result<Vec<EnrollmentEvent>, EnrollmentError> {
        if !self.grants_access() {
            return Err(EnrollmentError::NotEnrolled);
        }

        let mut events = vec![EnrollmentEvent::lesson_accessed(lesson_id)];
        if finished && !self.completed_lessons.contains(&lesson_id) {
            events.push(EnrollmentEvent::lesson_completed(lesson_id));
        }
        Ok(events)
    }

    /// Recomputes course progress against the course's lesson list.
    ///
    /// Progress is only recorded when it goes up. Completing every lesson
    /// completes the enrollment, once. An empty course changes nothing.
    pub fn recompute(
        &self,
        course_lessons: &[LessonId],
    ) -> Result<Vec<EnrollmentEvent>, EnrollmentError> {
        if !self.grants_access() {
            return Err(EnrollmentError::NotEnrolled);
        }

        let course_lessons: BTreeSet<&LessonId> = course_lessons.iter().collect();
        let total = course_lessons.len();
        if total == 0 {
            return Ok(vec![]);
        }

        let done = course_lessons
            .iter()
            .filter(|lesson| self.completed_lessons.contains(**lesson))
            .count();
        let percent = progress_percent(done, total);

        let mut events = Vec::new();
        if percent > self.progress {
            events.push(EnrollmentEvent::progress_recalculated(percent, done, total));
        }
        if done == total && !self.is_completed() {
            events.push(EnrollmentEvent::completed(percent));
        }
        Ok(events)
    }

    /// Administrative cancellation from pending or active.
    pub fn cancel(&self, reason: &str) -> Result<Vec<EnrollmentEvent>, EnrollmentError> {
        self.ensure_initiated()?;

        if !self.status.can_cancel() {
            return Err(EnrollmentError::InvalidStateTransition {
                current: self.status,
                action: "cancel",
            });
        }

        Ok(vec![EnrollmentEvent::cancelled(reason)])
    }

    fn ensure_initiated(&self) -> Result<(), EnrollmentError> {
        if self.id.is_none() {
            return Err(EnrollmentError::NotInitiated);
        }
        Ok(())
    }
}

/// `round(100 * done / total)` with halves rounded up, in integers.
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let done = done.min(total) as u64;
    let total = total as u64;
    ((200 * done + total) / (2 * total)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        enrollment: Enrollment,
        student: StudentId,
        course: CourseId,
        transaction: AggregateId,
    }

    fn pending() -> Fixture {
        let student = StudentId::new();
        let course = CourseId::new();
        let transaction = AggregateId::new();
        let mut enrollment = Enrollment::default();
        let events = enrollment
            .initiate(
                Enrollment::stream_id(student, course),
                student,
                course,
                transaction,
                Money::from_units(499),
            )
            .unwrap();
        enrollment.apply_events(events);
        Fixture {
            enrollment,
            student,
            course,
            transaction,
        }
    }

    fn active() -> Fixture {
        let mut fixture = pending();
        let events = fixture
            .enrollment
            .confirm_payment(fixture.transaction)
            .unwrap();
        fixture.enrollment.apply_events(events);
        fixture
    }

    fn finish(enrollment: &mut Enrollment, lesson: LessonId, course_lessons: &[LessonId]) {
        let events = enrollment.track_lesson(lesson, true).unwrap();
        enrollment.apply_events(events);
        let events = enrollment.recompute(course_lessons).unwrap();
        enrollment.apply_events(events);
    }

    #[test]
    fn stream_id_is_stable_per_pair() {
        let student = StudentId::new();
        let course = CourseId::new();
        assert_eq!(
            Enrollment::stream_id(student, course),
            Enrollment::stream_id(student, course)
        );
        assert_ne!(
            Enrollment::stream_id(student, course),
            Enrollment::stream_id(student, CourseId::new())
        );
    }

    #[test]
    fn initiate_creates_pending_enrollment() {
        let f = pending();
        assert_eq!(f.enrollment.status(), EnrollmentStatus::Pending);
        assert_eq!(f.enrollment.payment_status(), PaymentStatus::Pending);
        assert_eq!(f.enrollment.student_id(), Some(f.student));
        assert_eq!(f.enrollment.course_id(), Some(f.course));
        assert_eq!(f.enrollment.open_transaction(), Some(f.transaction));
        assert_eq!(f.enrollment.amount(), Money::from_units(499));
        assert!(!f.enrollment.grants_access());
    }

    #[test]
    fn initiate_while_payment_open_points_at_open_transaction() {
        let f = pending();
        let result = f.enrollment.initiate(
            f.enrollment.id().unwrap(),
            f.student,
            f.course,
            AggregateId::new(),
            Money::from_units(499),
        );
        assert!(matches!(
            result,
            Err(EnrollmentError::PaymentPending { transaction_id }) if transaction_id == f.transaction
        ));
    }

    #[test]
    fn initiate_when_active_is_already_enrolled() {
        let f = active();
        let result = f.enrollment.initiate(
            f.enrollment.id().unwrap(),
            f.student,
            f.course,
            AggregateId::new(),
            Money::from_units(499),
        );
        assert!(matches!(result, Err(EnrollmentError::AlreadyEnrolled)));
    }

    #[test]
    fn failed_payment_allows_new_transaction() {
        let mut f = pending();
        let events = f
            .enrollment
            .record_payment_failure(f.transaction, "declined")
            .unwrap();
        f.enrollment.apply_events(events);
        assert_eq!(f.enrollment.payment_status(), PaymentStatus::Failed);
        assert_eq!(f.enrollment.status(), EnrollmentStatus::Pending);
        assert_eq!(f.enrollment.open_transaction(), None);

        let retry = AggregateId::new();
        let events = f
            .enrollment
            .initiate(
                f.enrollment.id().unwrap(),
                f.student,
                f.course,
                retry,
                Money::from_units(499),
            )
            .unwrap();
        assert_eq!(events.len(), 1);
        f.enrollment.apply_events(events);
        assert_eq!(f.enrollment.open_transaction(), Some(retry));
    }

    #[test]
    fn confirm_payment_activates_once() {
        let f = active();
        assert_eq!(f.enrollment.status(), EnrollmentStatus::Active);
        assert!(f.enrollment.grants_access());

        let again = f.enrollment.confirm_payment(f.transaction).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn confirm_with_other_transaction_is_rejected() {
        let f = pending();
        let result = f.enrollment.confirm_payment(AggregateId::new());
        assert!(matches!(
            result,
            Err(EnrollmentError::TransactionMismatch { .. })
        ));
    }

    #[test]
    fn tracking_requires_access() {
        let f = pending();
        let result = f.enrollment.track_lesson(LessonId::new(), true);
        assert!(matches!(result, Err(EnrollmentError::NotEnrolled)));
    }

    #[test]
    fn completed_lessons_are_a_set() {
        let mut f = active();
        let lesson = LessonId::new();

        let events = f.enrollment.track_lesson(lesson, true).unwrap();
        assert_eq!(events.len(), 2);
        f.enrollment.apply_events(events);

        let events = f.enrollment.track_lesson(lesson, true).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(f.enrollment.completed_lessons().len(), 1);
        assert_eq!(f.enrollment.last_accessed_lesson(), Some(lesson));
    }

    #[test]
    fn four_lesson_course_completes_on_the_last_lesson() {
        let mut f = active();
        let lessons: Vec<LessonId> = (0..4).map(|_| LessonId::new()).collect();

        for lesson in &lessons[..3] {
            finish(&mut f.enrollment, *lesson, &lessons);
        }
        assert_eq!(f.enrollment.progress(), 75);
        assert_eq!(f.enrollment.status(), EnrollmentStatus::Active);

        finish(&mut f.enrollment, lessons[3], &lessons);
        assert_eq!(f.enrollment.progress(), 100);
        assert!(f.enrollment.is_completed());
        assert!(f.enrollment.completed_at().is_some());

        // A redundant recompute changes nothing.
        assert!(f.enrollment.recompute(&lessons).unwrap().is_empty());
    }

    #[test]
    fn progress_is_independent_of_order_and_duplicates() {
        let lessons: Vec<LessonId> = (0..3).map(|_| LessonId::new()).collect();

        let mut forward = active();
        for lesson in [lessons[0], lessons[1], lessons[0]] {
            finish(&mut forward.enrollment, lesson, &lessons);
        }

        let mut backward = active();
        for lesson in [lessons[1], lessons[1], lessons[0]] {
            finish(&mut backward.enrollment, lesson, &lessons);
        }

        assert_eq!(forward.enrollment.progress(), 67);
        assert_eq!(backward.enrollment.progress(), 67);
    }

    #[test]
    fn progress_never_decreases() {
        let mut f = active();
        let lessons: Vec<LessonId> = (0..2).map(|_| LessonId::new()).collect();
        finish(&mut f.enrollment, lessons[0], &lessons);
        assert_eq!(f.enrollment.progress(), 50);

        // The course grew; the recorded percent stays put.
        let mut grown = lessons.clone();
        grown.extend((0..2).map(|_| LessonId::new()));
        assert!(f.enrollment.recompute(&grown).unwrap().is_empty());
        assert_eq!(f.enrollment.progress(), 50);
    }

    #[test]
    fn empty_course_is_a_noop() {
        let f = active();
        assert!(f.enrollment.recompute(&[]).unwrap().is_empty());
    }

    #[test]
    fn cancel_and_reopen_keeps_progress() {
        let mut f = active();
        let lessons: Vec<LessonId> = (0..2).map(|_| LessonId::new()).collect();
        finish(&mut f.enrollment, lessons[0], &lessons);

        let events = f.enrollment.cancel("requested by admin").unwrap();
        f.enrollment.apply_events(events);
        assert_eq!(f.enrollment.status(), EnrollmentStatus::Cancelled);
        assert_eq!(f.enrollment.cancellation_reason(), Some("requested by admin"));
        assert!(!f.enrollment.grants_access());

        let events = f
            .enrollment
            .initiate(
                f.enrollment.id().unwrap(),
                f.student,
                f.course,
                AggregateId::new(),
                Money::from_units(499),
            )
            .unwrap();
        f.enrollment.apply_events(events);
        assert_eq!(f.enrollment.status(), EnrollmentStatus::Pending);
        assert_eq!(f.enrollment.progress(), 50);
        assert_eq!(f.enrollment.cancellation_reason(), None);
    }

    #[test]
    fn completed_enrollment_cannot_be_cancelled() {
        let mut f = active();
        let lessons = vec![LessonId::new()];
        finish(&mut f.enrollment, lessons[0], &lessons);
        assert!(matches!(
            f.enrollment.cancel("late"),
            Err(EnrollmentError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn percent_rounding() {
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(1, 8), 13);
        assert_eq!(progress_percent(3, 4), 75);
        assert_eq!(progress_percent(4, 4), 100);
        assert_eq!(progress_percent(0, 0), 0);
    }
}
