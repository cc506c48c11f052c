//! Integration tests for the enrollment lifecycle aggregates.
//!
//! These tests drive the aggregates through the CommandHandler against the
//! in-memory store, including multi-stream batches and competing writers.

use std::sync::Arc;

use common::{AggregateId, CourseId, LessonId, StudentId};
use domain::{
    Aggregate, Certificate, CertificateId, CommandHandler, CourseRoster, DomainError, Enrollment,
    EnrollmentError, EnrollmentStatus, Grade, LessonKey, LessonProgress, Money, NewCertificate,
    NewTransaction, PaymentTransaction, TransactionStatus, certificate::CertificateLookup,
};
use event_store::{EventStore, InMemoryEventStore, Version};

struct Handlers {
    store: InMemoryEventStore,
    enrollments: CommandHandler<InMemoryEventStore, Enrollment>,
    transactions: CommandHandler<InMemoryEventStore, PaymentTransaction>,
    rosters: CommandHandler<InMemoryEventStore, CourseRoster>,
}

fn handlers() -> Handlers {
    let store = InMemoryEventStore::new();
    Handlers {
        enrollments: CommandHandler::new(store.clone()),
        transactions: CommandHandler::new(store.clone()),
        rosters: CommandHandler::new(store.clone()),
        store,
    }
}

/// Creates the enrollment and its transaction in one batch.
async fn initiate(h: &Handlers, student: StudentId, course: CourseId) -> AggregateId {
    let enrollment_id = Enrollment::stream_id(student, course);
    let transaction_id = AggregateId::new();

    let enrollment = h.enrollments.load(enrollment_id).await.unwrap();
    let enrollment_events = enrollment
        .initiate(
            enrollment_id,
            student,
            course,
            transaction_id,
            Money::from_units(499),
        )
        .unwrap();

    let transaction = PaymentTransaction::default();
    let transaction_events = transaction
        .open(&NewTransaction {
            transaction_id,
            enrollment_id,
            student_id: student,
            course_id: course,
            course_title: "Rust Basics".to_string(),
            amount: Money::from_units(499),
            upi_id: "elearning@upi".to_string(),
        })
        .unwrap();

    let batch = vec![
        h.enrollments
            .stage(enrollment_id, &enrollment, &enrollment_events)
            .unwrap()
            .unwrap(),
        h.transactions
            .stage(transaction_id, &transaction, &transaction_events)
            .unwrap()
            .unwrap(),
    ];
    h.store.append_batch(batch).await.unwrap();
    transaction_id
}

/// Completes the transaction, activates the enrollment and counts the seat.
async fn confirm(
    h: &Handlers,
    student: StudentId,
    course: CourseId,
    transaction_id: AggregateId,
) -> Result<usize, DomainError> {
    let enrollment_id = Enrollment::stream_id(student, course);
    let roster_id = CourseRoster::stream_id(course);

    let transaction = h.transactions.load_required(transaction_id).await?;
    let enrollment = h.enrollments.load_required(enrollment_id).await?;
    let roster = h.rosters.load(roster_id).await?;

    let transaction_events = transaction.complete()?;
    let enrollment_events = enrollment.confirm_payment(transaction_id)?;
    let roster_events = roster.enroll(course, student, transaction_id)?;

    let batch: Vec<_> = [
        h.transactions
            .stage(transaction_id, &transaction, &transaction_events)?,
        h.enrollments
            .stage(enrollment_id, &enrollment, &enrollment_events)?,
        h.rosters.stage(roster_id, &roster, &roster_events)?,
    ]
    .into_iter()
    .flatten()
    .collect();

    let written = batch.len();
    if written > 0 {
        h.store.append_batch(batch).await?;
    }
    Ok(written)
}

mod payment {
    use super::*;

    #[tokio::test]
    async fn initiate_then_confirm_activates_and_counts() {
        let h = handlers();
        let (student, course) = (StudentId::new(), CourseId::new());

        let transaction_id = initiate(&h, student, course).await;
        let enrollment = h
            .enrollments
            .load_required(Enrollment::stream_id(student, course))
            .await
            .unwrap();
        assert_eq!(enrollment.status(), EnrollmentStatus::Pending);
        assert_eq!(enrollment.open_transaction(), Some(transaction_id));

        assert_eq!(confirm(&h, student, course, transaction_id).await.unwrap(), 3);

        let enrollment = h
            .enrollments
            .load_required(Enrollment::stream_id(student, course))
            .await
            .unwrap();
        assert!(enrollment.grants_access());

        let transaction = h.transactions.load_required(transaction_id).await.unwrap();
        assert_eq!(transaction.status(), TransactionStatus::Completed);

        let roster = h
            .rosters
            .load_required(CourseRoster::stream_id(course))
            .await
            .unwrap();
        assert_eq!(roster.enrolled_students(), 1);
    }

    #[tokio::test]
    async fn second_confirmation_writes_nothing() {
        let h = handlers();
        let (student, course) = (StudentId::new(), CourseId::new());
        let transaction_id = initiate(&h, student, course).await;

        confirm(&h, student, course, transaction_id).await.unwrap();
        let events_after_first = h.store.event_count().await;

        assert_eq!(confirm(&h, student, course, transaction_id).await.unwrap(), 0);
        assert_eq!(h.store.event_count().await, events_after_first);
    }

    #[tokio::test]
    async fn initiating_twice_while_pending_reports_open_payment() {
        let h = handlers();
        let (student, course) = (StudentId::new(), CourseId::new());
        let transaction_id = initiate(&h, student, course).await;

        let enrollment = h
            .enrollments
            .load_required(Enrollment::stream_id(student, course))
            .await
            .unwrap();
        let result = enrollment.initiate(
            Enrollment::stream_id(student, course),
            student,
            course,
            AggregateId::new(),
            Money::from_units(499),
        );
        assert!(matches!(
            result,
            Err(EnrollmentError::PaymentPending { transaction_id: open }) if open == transaction_id
        ));
    }

    #[tokio::test]
    async fn a_stale_batch_fails_as_a_whole() {
        let h = handlers();
        let (student, course) = (StudentId::new(), CourseId::new());
        let transaction_id = initiate(&h, student, course).await;
        let enrollment_id = Enrollment::stream_id(student, course);

        // Both writers read the same versions.
        let transaction = h.transactions.load_required(transaction_id).await.unwrap();
        let enrollment = h.enrollments.load_required(enrollment_id).await.unwrap();

        confirm(&h, student, course, transaction_id).await.unwrap();
        let before = h.store.event_count().await;

        let batch = vec![
            h.transactions
                .stage(transaction_id, &transaction, &transaction.complete().unwrap())
                .unwrap()
                .unwrap(),
            h.enrollments
                .stage(
                    enrollment_id,
                    &enrollment,
                    &enrollment.confirm_payment(transaction_id).unwrap(),
                )
                .unwrap()
                .unwrap(),
        ];
        let err = h.store.append_batch(batch).await.unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert_eq!(h.store.event_count().await, before);
    }
}

mod progress {
    use super::*;

    #[tokio::test]
    async fn four_lesson_course_completes_on_last_lesson() {
        let h = handlers();
        let (student, course) = (StudentId::new(), CourseId::new());
        let transaction_id = initiate(&h, student, course).await;
        confirm(&h, student, course, transaction_id).await.unwrap();

        let lessons: Vec<LessonId> = (0..4).map(|_| LessonId::new()).collect();
        let enrollment_id = Enrollment::stream_id(student, course);

        for lesson in &lessons[..3] {
            h.enrollments
                .execute(enrollment_id, |e| e.track_lesson(*lesson, true))
                .await
                .unwrap();
            h.enrollments
                .execute(enrollment_id, |e| e.recompute(&lessons))
                .await
                .unwrap();
        }

        let enrollment = h.enrollments.load_required(enrollment_id).await.unwrap();
        assert_eq!(enrollment.progress(), 75);
        assert_eq!(enrollment.status(), EnrollmentStatus::Active);

        h.enrollments
            .execute(enrollment_id, |e| e.track_lesson(lessons[3], true))
            .await
            .unwrap();
        let result = h
            .enrollments
            .execute(enrollment_id, |e| e.recompute(&lessons))
            .await
            .unwrap();
        assert_eq!(result.aggregate.progress(), 100);
        assert_eq!(result.aggregate.status(), EnrollmentStatus::Completed);

        // Recomputing again is a no-op.
        let again = h
            .enrollments
            .execute(enrollment_id, |e| e.recompute(&lessons))
            .await
            .unwrap();
        assert!(again.is_noop());
    }

    #[tokio::test]
    async fn lesson_progress_streams_are_keyed_per_lesson() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, LessonProgress> = CommandHandler::new(store);
        let key = LessonKey::new(StudentId::new(), CourseId::new(), LessonId::new());
        let enrollment_id = Enrollment::stream_id(key.student_id, key.course_id);

        handler
            .execute(key.stream_id(), |p| {
                p.record_watch(key, enrollment_id, 120.0, 600.0)
            })
            .await
            .unwrap();
        let result = handler
            .execute(key.stream_id(), |p| {
                p.record_watch(key, enrollment_id, 560.0, 600.0)
            })
            .await
            .unwrap();

        assert!(result.aggregate.is_completed());
        assert_eq!(result.aggregate.seconds_watched(), 560.0);
        assert_eq!(result.new_version, Version::new(4));
    }
}

mod certificates {
    use super::*;

    fn new_certificate(student: StudentId, course: CourseId) -> NewCertificate {
        NewCertificate {
            certificate_id: CertificateId::generate(),
            student_id: student,
            course_id: course,
            enrollment_id: Enrollment::stream_id(student, course),
            student_name: "Asha Rao".to_string(),
            course_title: "Rust Basics".to_string(),
            progress: 100,
            verification_url: "http://localhost:5173/verify-certificate/x".to_string(),
            completed_at: chrono::Utc::now(),
        }
    }

    async fn try_issue(
        store: &InMemoryEventStore,
        student: StudentId,
        course: CourseId,
    ) -> Result<(), DomainError> {
        let certificates: CommandHandler<_, Certificate> = CommandHandler::new(store.clone());
        let lookups: CommandHandler<_, CertificateLookup> = CommandHandler::new(store.clone());

        let stream = Certificate::stream_id(student, course);
        let certificate = certificates.load(stream).await?;
        let new = new_certificate(student, course);
        let lookup_id = CertificateLookup::stream_id(&new.certificate_id);
        let lookup = CertificateLookup::default();

        let lookup_events = lookup.register(&new.certificate_id, stream)?;
        let certificate_events = certificate.issue(new)?;

        let batch = vec![
            certificates
                .stage(stream, &certificate, &certificate_events)?
                .expect("issue emits events"),
            lookups
                .stage(lookup_id, &lookup, &lookup_events)?
                .expect("register emits events"),
        ];
        store.append_batch(batch).await?;
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_issuers_persist_one_certificate() {
        let store = Arc::new(InMemoryEventStore::new());
        let (student, course) = (StudentId::new(), CourseId::new());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                try_issue(&store, student, course).await
            }));
        }

        let mut issued = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => issued += 1,
                Err(DomainError::Certificate(_)) => {}
                Err(e) => assert!(e.is_concurrency_conflict(), "unexpected error: {e}"),
            }
        }
        assert_eq!(issued, 1);

        let handler: CommandHandler<_, Certificate> = CommandHandler::new((*store).clone());
        let certificate = handler
            .load_required(Certificate::stream_id(student, course))
            .await
            .unwrap();
        assert_eq!(certificate.grade(), Some(Grade::APlus));
        assert_eq!(certificate.version(), Version::first());

        // Exactly one lookup was written alongside it.
        let lookups = store
            .query_events(event_store::EventQuery::new().aggregate_type("CertificateLookup"))
            .await
            .unwrap();
        assert_eq!(lookups.len(), 1);
    }
}
