//! Enrollment and payment commands.

use std::sync::Arc;

use common::{AggregateId, CourseId, StudentId};
use domain::{
    Aggregate, CourseRoster, Enrollment, Money, NewTransaction, PaymentTransaction,
    TransactionStatus,
};
use event_store::EventStore;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::retry::with_conflict_retry;
use crate::services::{Course, CourseCatalog};
use crate::streams::Streams;

/// What a student needs to pay for an enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct Initiation {
    pub enrollment_id: AggregateId,
    pub transaction_id: AggregateId,
    pub amount: Money,
    pub course_title: String,
    pub upi_id: String,
    pub qr_code_data: String,

    /// True when an already open payment was handed back.
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub enrollment_id: AggregateId,
    pub student_id: StudentId,
    pub course_id: CourseId,

    /// False when the payment had already been confirmed.
    pub newly_confirmed: bool,
}

/// Opens, pays for, refunds and cancels enrollments.
///
/// Every command that touches more than one stream (enrollment,
/// transaction, course roster) commits them in one batch, so a reader
/// never sees a paid transaction next to a pending enrollment.
pub struct EnrollmentService<S: EventStore> {
    streams: Arc<Streams<S>>,
    catalog: Arc<dyn CourseCatalog>,
    config: Arc<EngineConfig>,
}

impl<S> EnrollmentService<S>
where
    S: EventStore + Clone + 'static,
{
    pub(crate) fn new(
        streams: Arc<Streams<S>>,
        catalog: Arc<dyn CourseCatalog>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            streams,
            catalog,
            config,
        }
    }

    /// Starts paying for a course.
    ///
    /// A student with a payment still open gets that payment back instead
    /// of a second one.
    #[tracing::instrument(skip(self))]
    pub async fn initiate(&self, student_id: StudentId, course_id: CourseId) -> Result<Initiation> {
        let course = self
            .catalog
            .get_course(course_id)
            .await?
            .ok_or(EngineError::CourseNotFound(course_id))?;
        let course = &course;

        let initiation = with_conflict_retry(
            "initiate_enrollment",
            self.config.command_retry_limit,
            move || self.try_initiate(student_id, course),
        )
        .await?;

        if !initiation.reused {
            metrics::counter!("enrollments_initiated_total").increment(1);
            tracing::info!(
                %student_id,
                %course_id,
                transaction_id = %initiation.transaction_id,
                "enrollment initiated"
            );
        }
        Ok(initiation)
    }

    async fn try_initiate(&self, student_id: StudentId, course: &Course) -> Result<Initiation> {
        let enrollment_id = Enrollment::stream_id(student_id, course.id);
        let enrollment = self.streams.enrollments.load(enrollment_id).await?;

        if let Some(open) = enrollment.open_transaction() {
            let transaction = self
                .streams
                .transactions
                .load_existing(open)
                .await?
                .ok_or(EngineError::TransactionNotFound(open))?;
            return Ok(Initiation {
                enrollment_id,
                transaction_id: open,
                amount: transaction.amount(),
                course_title: transaction.course_title().to_string(),
                upi_id: transaction.upi_id().to_string(),
                qr_code_data: transaction.qr_code_data().to_string(),
                reused: true,
            });
        }

        let transaction_id = AggregateId::new();
        let enrollment_events = enrollment.initiate(
            enrollment_id,
            student_id,
            course.id,
            transaction_id,
            course.price,
        )?;

        let new = NewTransaction {
            transaction_id,
            enrollment_id,
            student_id,
            course_id: course.id,
            course_title: course.title.clone(),
            amount: course.price,
            upi_id: self.config.upi_id.clone(),
        };
        let transaction = PaymentTransaction::default();
        let transaction_events = transaction.open(&new)?;

        self.streams
            .commit([
                self.streams
                    .enrollments
                    .stage(enrollment_id, &enrollment, &enrollment_events)?,
                self.streams
                    .transactions
                    .stage(transaction_id, &transaction, &transaction_events)?,
            ])
            .await?;

        Ok(Initiation {
            enrollment_id,
            transaction_id,
            amount: course.price,
            course_title: course.title.clone(),
            upi_id: new.upi_id.clone(),
            qr_code_data: new.qr_code_data(),
            reused: false,
        })
    }

    /// Marks a payment received: the transaction completes, the enrollment
    /// becomes active and the course roster counts the seat, together.
    ///
    /// Confirming a payment twice succeeds without writing anything.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(&self, transaction_id: AggregateId) -> Result<Confirmation> {
        let confirmation = with_conflict_retry(
            "confirm_payment",
            self.config.command_retry_limit,
            move || self.try_confirm_payment(transaction_id),
        )
        .await?;

        if confirmation.newly_confirmed {
            metrics::counter!("payments_confirmed_total").increment(1);
            tracing::info!(
                %transaction_id,
                student_id = %confirmation.student_id,
                course_id = %confirmation.course_id,
                "payment confirmed"
            );
        } else {
            tracing::debug!(%transaction_id, "payment already confirmed");
        }
        Ok(confirmation)
    }

    async fn try_confirm_payment(&self, transaction_id: AggregateId) -> Result<Confirmation> {
        let transaction = self.load_transaction(transaction_id).await?;
        let (enrollment_id, student_id, course_id) = transaction_owner(&transaction)?;

        // Later cancellations or reopenings of the enrollment do not undo a
        // completed payment.
        if transaction.status() == TransactionStatus::Completed {
            return Ok(Confirmation {
                enrollment_id,
                student_id,
                course_id,
                newly_confirmed: false,
            });
        }

        let enrollment = self.streams.enrollments.load(enrollment_id).await?;
        let roster_id = CourseRoster::stream_id(course_id);
        let roster = self.streams.rosters.load(roster_id).await?;

        let transaction_events = transaction.complete()?;
        let enrollment_events = enrollment.confirm_payment(transaction_id)?;
        let roster_events = roster.enroll(course_id, student_id, transaction_id)?;

        let written = self
            .streams
            .commit([
                self.streams
                    .transactions
                    .stage(transaction_id, &transaction, &transaction_events)?,
                self.streams
                    .enrollments
                    .stage(enrollment_id, &enrollment, &enrollment_events)?,
                self.streams
                    .rosters
                    .stage(roster_id, &roster, &roster_events)?,
            ])
            .await?;

        Ok(Confirmation {
            enrollment_id,
            student_id,
            course_id,
            newly_confirmed: written > 0,
        })
    }

    /// Records a failed payment. The enrollment stays pending and the next
    /// initiation opens a fresh transaction.
    #[tracing::instrument(skip(self))]
    pub async fn record_payment_failure(
        &self,
        transaction_id: AggregateId,
        reason: &str,
    ) -> Result<PaymentTransaction> {
        with_conflict_retry(
            "record_payment_failure",
            self.config.command_retry_limit,
            move || self.try_record_payment_failure(transaction_id, reason),
        )
        .await?;

        tracing::info!(%transaction_id, reason, "payment failed");
        self.get_transaction(transaction_id).await
    }

    async fn try_record_payment_failure(
        &self,
        transaction_id: AggregateId,
        reason: &str,
    ) -> Result<usize> {
        let transaction = self.load_transaction(transaction_id).await?;
        let (enrollment_id, _, _) = transaction_owner(&transaction)?;
        let enrollment = self.streams.enrollments.load(enrollment_id).await?;

        let transaction_events = transaction.fail(reason)?;
        let enrollment_events = if enrollment.transaction_id() == Some(transaction_id) {
            enrollment.record_payment_failure(transaction_id, reason)?
        } else {
            vec![]
        };

        self.streams
            .commit([
                self.streams
                    .transactions
                    .stage(transaction_id, &transaction, &transaction_events)?,
                self.streams
                    .enrollments
                    .stage(enrollment_id, &enrollment, &enrollment_events)?,
            ])
            .await
    }

    /// Refunds a completed payment, cancelling the enrollment it paid for
    /// and releasing its seat. Completed enrollments cannot be refunded.
    #[tracing::instrument(skip(self))]
    pub async fn refund(&self, transaction_id: AggregateId, reason: &str) -> Result<PaymentTransaction> {
        let written = with_conflict_retry(
            "refund_payment",
            self.config.command_retry_limit,
            move || self.try_refund(transaction_id, reason),
        )
        .await?;

        if written > 0 {
            tracing::info!(%transaction_id, reason, "payment refunded");
        }
        self.get_transaction(transaction_id).await
    }

    async fn try_refund(&self, transaction_id: AggregateId, reason: &str) -> Result<usize> {
        let transaction = self.load_transaction(transaction_id).await?;
        let (enrollment_id, student_id, course_id) = transaction_owner(&transaction)?;

        let enrollment = self.streams.enrollments.load(enrollment_id).await?;
        let roster_id = CourseRoster::stream_id(course_id);
        let roster = self.streams.rosters.load(roster_id).await?;

        let transaction_events = transaction.refund(reason)?;
        let enrollment_events = if enrollment.transaction_id() == Some(transaction_id)
            && enrollment.grants_access()
        {
            enrollment.cancel(reason)?
        } else {
            vec![]
        };
        let roster_events = roster.withdraw(student_id, transaction_id, reason)?;

        self.streams
            .commit([
                self.streams
                    .transactions
                    .stage(transaction_id, &transaction, &transaction_events)?,
                self.streams
                    .enrollments
                    .stage(enrollment_id, &enrollment, &enrollment_events)?,
                self.streams
                    .rosters
                    .stage(roster_id, &roster, &roster_events)?,
            ])
            .await
    }

    /// Administrative cancellation. An open payment is failed; an active
    /// seat is released.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        reason: &str,
    ) -> Result<Enrollment> {
        with_conflict_retry(
            "cancel_enrollment",
            self.config.command_retry_limit,
            move || self.try_cancel(student_id, course_id, reason),
        )
        .await?;

        tracing::info!(%student_id, %course_id, reason, "enrollment cancelled");
        self.get_enrollment(student_id, course_id)
            .await?
            .ok_or(EngineError::EnrollmentNotFound {
                student_id,
                course_id,
            })
    }

    async fn try_cancel(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        reason: &str,
    ) -> Result<usize> {
        let enrollment_id = Enrollment::stream_id(student_id, course_id);
        let enrollment = self
            .streams
            .enrollments
            .load_existing(enrollment_id)
            .await?
            .ok_or(EngineError::EnrollmentNotFound {
                student_id,
                course_id,
            })?;
        let enrollment_events = enrollment.cancel(reason)?;

        let mut staged = vec![
            self.streams
                .enrollments
                .stage(enrollment_id, &enrollment, &enrollment_events)?,
        ];

        if let Some(open) = enrollment.open_transaction() {
            let transaction = self.load_transaction(open).await?;
            let events = transaction.fail(reason)?;
            staged.push(self.streams.transactions.stage(open, &transaction, &events)?);
        }

        if enrollment.grants_access()
            && let Some(paid) = enrollment.transaction_id()
        {
            let roster_id = CourseRoster::stream_id(course_id);
            let roster = self.streams.rosters.load(roster_id).await?;
            let events = roster.withdraw(student_id, paid, reason)?;
            staged.push(self.streams.rosters.stage(roster_id, &roster, &events)?);
        }

        self.streams.commit(staged).await
    }

    /// The single access rule: active, paid and completed enrollments grant
    /// access to the course.
    pub async fn has_access(&self, student_id: StudentId, course_id: CourseId) -> Result<bool> {
        let enrollment = self
            .streams
            .enrollments
            .load(Enrollment::stream_id(student_id, course_id))
            .await?;
        Ok(enrollment.grants_access())
    }

    /// Loads the enrollment, failing with `NotEnrolled` unless it grants access.
    pub async fn require_access(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Enrollment> {
        let enrollment = self
            .streams
            .enrollments
            .load(Enrollment::stream_id(student_id, course_id))
            .await?;
        if !enrollment.grants_access() {
            return Err(EngineError::NotEnrolled);
        }
        Ok(enrollment)
    }

    pub async fn get_enrollment(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Option<Enrollment>> {
        Ok(self
            .streams
            .enrollments
            .load_existing(Enrollment::stream_id(student_id, course_id))
            .await?)
    }

    pub async fn get_transaction(&self, transaction_id: AggregateId) -> Result<PaymentTransaction> {
        self.load_transaction(transaction_id).await
    }

    /// Students currently holding a seat in the course.
    pub async fn enrolled_count(&self, course_id: CourseId) -> Result<usize> {
        let roster = self
            .streams
            .rosters
            .load(CourseRoster::stream_id(course_id))
            .await?;
        Ok(roster.enrolled_students())
    }

    async fn load_transaction(&self, transaction_id: AggregateId) -> Result<PaymentTransaction> {
        self.streams
            .transactions
            .load_existing(transaction_id)
            .await?
            .ok_or(EngineError::TransactionNotFound(transaction_id))
    }
}

fn transaction_owner(
    transaction: &PaymentTransaction,
) -> Result<(AggregateId, StudentId, CourseId)> {
    match (
        transaction.enrollment_id(),
        transaction.student_id(),
        transaction.course_id(),
    ) {
        (Some(enrollment_id), Some(student_id), Some(course_id)) => {
            Ok((enrollment_id, student_id, course_id))
        }
        _ => Err(EngineError::InvalidState(format!(
            "transaction {} has no enrollment",
            transaction.id().map(|id| id.to_string()).unwrap_or_default()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryCourseCatalog;
    use domain::EnrollmentStatus;
    use event_store::InMemoryEventStore;

    struct Fixture {
        service: EnrollmentService<InMemoryEventStore>,
        course: Course,
    }

    fn fixture() -> Fixture {
        let course = Course::new("Rust Basics", Money::from_units(499), vec![]);
        let catalog = InMemoryCourseCatalog::with_courses([course.clone()]);
        let streams = Arc::new(Streams::new(InMemoryEventStore::new()));
        Fixture {
            service: EnrollmentService::new(
                streams,
                Arc::new(catalog),
                Arc::new(EngineConfig::default()),
            ),
            course,
        }
    }

    #[tokio::test]
    async fn initiate_unknown_course() {
        let f = fixture();
        let result = f.service.initiate(StudentId::new(), CourseId::new()).await;
        assert!(matches!(result, Err(EngineError::CourseNotFound(_))));
    }

    #[tokio::test]
    async fn initiate_twice_returns_the_open_payment() {
        let f = fixture();
        let student = StudentId::new();

        let first = f.service.initiate(student, f.course.id).await.unwrap();
        let second = f.service.initiate(student, f.course.id).await.unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.enrollment_id, second.enrollment_id);
        assert_eq!(first.transaction_id, second.transaction_id);
        assert_eq!(second.amount, Money::from_units(499));
        assert!(second.qr_code_data.starts_with("upi://pay?pa=elearning@upi"));
    }

    #[tokio::test]
    async fn confirm_activates_once() {
        let f = fixture();
        let student = StudentId::new();
        let initiation = f.service.initiate(student, f.course.id).await.unwrap();

        let first = f
            .service
            .confirm_payment(initiation.transaction_id)
            .await
            .unwrap();
        let second = f
            .service
            .confirm_payment(initiation.transaction_id)
            .await
            .unwrap();

        assert!(first.newly_confirmed);
        assert!(!second.newly_confirmed);
        assert!(f.service.has_access(student, f.course.id).await.unwrap());
        assert_eq!(f.service.enrolled_count(f.course.id).await.unwrap(), 1);

        let result = f.service.initiate(student, f.course.id).await;
        assert!(matches!(result, Err(EngineError::AlreadyEnrolled)));
    }

    #[tokio::test]
    async fn reconfirming_after_cancel_and_reopen_is_a_no_op() {
        let f = fixture();
        let student = StudentId::new();
        let initiation = f.service.initiate(student, f.course.id).await.unwrap();
        f.service
            .confirm_payment(initiation.transaction_id)
            .await
            .unwrap();
        f.service
            .cancel(student, f.course.id, "requested by student")
            .await
            .unwrap();

        let after_cancel = f
            .service
            .confirm_payment(initiation.transaction_id)
            .await
            .unwrap();
        assert!(!after_cancel.newly_confirmed);
        assert_eq!(after_cancel.enrollment_id, initiation.enrollment_id);
        assert!(!f.service.has_access(student, f.course.id).await.unwrap());
        assert_eq!(f.service.enrolled_count(f.course.id).await.unwrap(), 0);

        let reopened = f.service.initiate(student, f.course.id).await.unwrap();
        assert_ne!(reopened.transaction_id, initiation.transaction_id);

        let after_reopen = f
            .service
            .confirm_payment(initiation.transaction_id)
            .await
            .unwrap();
        assert!(!after_reopen.newly_confirmed);
        let enrollment = f
            .service
            .get_enrollment(student, f.course.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(enrollment.status(), EnrollmentStatus::Pending);
        assert_eq!(enrollment.transaction_id(), Some(reopened.transaction_id));
    }

    #[tokio::test]
    async fn confirm_unknown_transaction() {
        let f = fixture();
        let result = f.service.confirm_payment(AggregateId::new()).await;
        assert!(matches!(result, Err(EngineError::TransactionNotFound(_))));
    }

    #[tokio::test]
    async fn failed_payment_then_new_attempt() {
        let f = fixture();
        let student = StudentId::new();
        let first = f.service.initiate(student, f.course.id).await.unwrap();

        let failed = f
            .service
            .record_payment_failure(first.transaction_id, "declined")
            .await
            .unwrap();
        assert_eq!(failed.status(), TransactionStatus::Failed);

        let retry = f.service.initiate(student, f.course.id).await.unwrap();
        assert!(!retry.reused);
        assert_ne!(retry.transaction_id, first.transaction_id);
        assert_eq!(retry.enrollment_id, first.enrollment_id);
    }

    #[tokio::test]
    async fn refund_cancels_and_releases_the_seat() {
        let f = fixture();
        let student = StudentId::new();
        let initiation = f.service.initiate(student, f.course.id).await.unwrap();
        f.service
            .confirm_payment(initiation.transaction_id)
            .await
            .unwrap();

        let refunded = f
            .service
            .refund(initiation.transaction_id, "duplicate charge")
            .await
            .unwrap();
        assert_eq!(refunded.status(), TransactionStatus::Refunded);
        assert!(!f.service.has_access(student, f.course.id).await.unwrap());
        assert_eq!(f.service.enrolled_count(f.course.id).await.unwrap(), 0);

        // Refunding again changes nothing.
        f.service
            .refund(initiation.transaction_id, "duplicate charge")
            .await
            .unwrap();
        assert_eq!(f.service.enrolled_count(f.course.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancel_pending_fails_the_open_payment() {
        let f = fixture();
        let student = StudentId::new();
        let initiation = f.service.initiate(student, f.course.id).await.unwrap();

        let enrollment = f
            .service
            .cancel(student, f.course.id, "abandoned")
            .await
            .unwrap();
        assert_eq!(enrollment.status(), EnrollmentStatus::Cancelled);

        let transaction = f
            .service
            .get_transaction(initiation.transaction_id)
            .await
            .unwrap();
        assert_eq!(transaction.status(), TransactionStatus::Failed);

        // A cancelled enrollment can be reopened.
        let reopened = f.service.initiate(student, f.course.id).await.unwrap();
        assert_eq!(reopened.enrollment_id, initiation.enrollment_id);
    }

    #[tokio::test]
    async fn cancel_without_enrollment() {
        let f = fixture();
        let result = f.service.cancel(StudentId::new(), f.course.id, "x").await;
        assert!(matches!(result, Err(EngineError::EnrollmentNotFound { .. })));
    }

    #[tokio::test]
    async fn require_access_rejects_pending() {
        let f = fixture();
        let student = StudentId::new();
        f.service.initiate(student, f.course.id).await.unwrap();
        assert!(matches!(
            f.service.require_access(student, f.course.id).await,
            Err(EngineError::NotEnrolled)
        ));
    }
}
