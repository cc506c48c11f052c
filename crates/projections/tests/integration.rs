//! Integration tests: aggregate commands → ProjectionProcessor → all views.

use common::{AggregateId, CourseId, StudentId};
use domain::{
    Certificate, CertificateId, CommandHandler, Enrollment, EnrollmentStatus, Money,
    NewCertificate, NewTransaction, PaymentTransaction,
};
use event_store::{EventStore, InMemoryEventStore};
use projections::{
    ProjectionProcessor, RevenueView, StudentCertificatesView, StudentEnrollmentsView,
};

struct Fixture {
    store: InMemoryEventStore,
    processor: ProjectionProcessor<InMemoryEventStore>,
    enrollments: StudentEnrollmentsView,
    certificates: StudentCertificatesView,
    revenue: RevenueView,
}

fn setup() -> Fixture {
    let store = InMemoryEventStore::new();

    let enrollments = StudentEnrollmentsView::new();
    let certificates = StudentCertificatesView::new();
    let revenue = RevenueView::new();

    let mut processor = ProjectionProcessor::new(store.clone());
    processor.register(Box::new(enrollments.clone()));
    processor.register(Box::new(certificates.clone()));
    processor.register(Box::new(revenue.clone()));

    Fixture {
        store,
        processor,
        enrollments,
        certificates,
        revenue,
    }
}

/// Opens and pays for an enrollment, returning the transaction id.
async fn enroll_and_pay(
    store: &InMemoryEventStore,
    student: StudentId,
    course: CourseId,
    price: i64,
) -> AggregateId {
    let enrollments: CommandHandler<_, Enrollment> = CommandHandler::new(store.clone());
    let transactions: CommandHandler<_, PaymentTransaction> = CommandHandler::new(store.clone());

    let enrollment_id = Enrollment::stream_id(student, course);
    let transaction_id = AggregateId::new();
    let amount = Money::from_units(price);

    let enrollment = enrollments.load(enrollment_id).await.unwrap();
    let opened = enrollment
        .initiate(enrollment_id, student, course, transaction_id, amount)
        .unwrap();
    let transaction = PaymentTransaction::default();
    let tx_opened = transaction
        .open(&NewTransaction {
            transaction_id,
            enrollment_id,
            student_id: student,
            course_id: course,
            course_title: "Rust Basics".to_string(),
            amount,
            upi_id: "elearning@upi".to_string(),
        })
        .unwrap();
    store
        .append_batch(vec![
            enrollments
                .stage(enrollment_id, &enrollment, &opened)
                .unwrap()
                .unwrap(),
            transactions
                .stage(transaction_id, &transaction, &tx_opened)
                .unwrap()
                .unwrap(),
        ])
        .await
        .unwrap();

    transactions
        .execute(transaction_id, |t| t.complete())
        .await
        .unwrap();
    enrollments
        .execute(enrollment_id, |e| e.confirm_payment(transaction_id))
        .await
        .unwrap();

    transaction_id
}

#[tokio::test]
async fn enrollments_and_revenue_follow_the_log() {
    let f = setup();
    let student = StudentId::new();
    let (rust, go) = (CourseId::new(), CourseId::new());

    enroll_and_pay(&f.store, student, rust, 499).await;
    enroll_and_pay(&f.store, student, go, 299).await;

    f.processor.run_catch_up().await.unwrap();

    let mine = f.enrollments.accessible_for_student(student).await;
    assert_eq!(mine.len(), 2);
    assert!(mine.iter().all(|e| e.status == EnrollmentStatus::Active));

    let stats = f.revenue.stats().await;
    assert_eq!(stats.total_transactions, 2);
    assert_eq!(stats.total_revenue, Money::from_units(798));
    assert_eq!(stats.average_order_value, Money::from_units(399));
}

#[tokio::test]
async fn catch_up_is_incremental() {
    let f = setup();
    let student = StudentId::new();

    enroll_and_pay(&f.store, student, CourseId::new(), 100).await;
    let first = f.processor.run_catch_up().await.unwrap();
    assert!(first > 0);

    enroll_and_pay(&f.store, student, CourseId::new(), 100).await;
    f.processor.run_catch_up().await.unwrap();

    assert_eq!(f.enrollments.for_student(student).await.len(), 2);
    assert_eq!(f.revenue.stats().await.total_transactions, 2);
}

#[tokio::test]
async fn certificates_appear_for_their_student() {
    let f = setup();
    let student = StudentId::new();
    let course = CourseId::new();

    let handler: CommandHandler<_, Certificate> = CommandHandler::new(f.store.clone());
    handler
        .execute(Certificate::stream_id(student, course), |c| {
            c.issue(NewCertificate {
                certificate_id: CertificateId::generate(),
                student_id: student,
                course_id: course,
                enrollment_id: Enrollment::stream_id(student, course),
                student_name: "Asha Rao".to_string(),
                course_title: "Rust Basics".to_string(),
                progress: 100,
                verification_url: "http://localhost:5173/verify-certificate/x".to_string(),
                completed_at: chrono::Utc::now(),
            })
        })
        .await
        .unwrap();

    f.processor.run_catch_up().await.unwrap();

    let certificates = f.certificates.for_student(student).await;
    assert_eq!(certificates.len(), 1);
    assert!(certificates[0].is_valid());
    assert!(f.certificates.for_student(StudentId::new()).await.is_empty());
}

#[tokio::test]
async fn rebuild_produces_the_same_views() {
    let f = setup();
    let student = StudentId::new();
    enroll_and_pay(&f.store, student, CourseId::new(), 250).await;

    f.processor.run_catch_up().await.unwrap();
    let before = f.revenue.stats().await;

    f.processor.rebuild_all().await.unwrap();
    assert_eq!(f.revenue.stats().await, before);
    assert_eq!(f.enrollments.for_student(student).await.len(), 1);
}
