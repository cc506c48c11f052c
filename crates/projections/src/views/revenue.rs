//! Revenue read model: totals over completed, non-refunded payments.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, CourseId};
use domain::{Aggregate, Money, PaymentTransaction, TransactionEvent, TransactionStatus};
use event_store::EventEnvelope;
use tokio::sync::RwLock;

use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;
use crate::{ProjectionError, Result};

const TOP_COURSES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseRevenue {
    pub course_id: CourseId,
    pub course_title: String,
    pub enrollments: u64,
    pub revenue: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlyRevenue {
    /// `YYYY-MM` of the payment's completion.
    pub month: String,
    pub transactions: u64,
    pub revenue: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevenueStats {
    pub total_revenue: Money,
    pub total_transactions: u64,
    pub average_order_value: Money,
    pub top_courses: Vec<CourseRevenue>,
    pub revenue_by_month: Vec<MonthlyRevenue>,
}

#[derive(Debug, Clone)]
struct TransactionRow {
    course_id: CourseId,
    course_title: String,
    amount: Money,
    status: TransactionStatus,
    completed_at: Option<DateTime<Utc>>,
}

struct RevenueState {
    transactions: HashMap<AggregateId, TransactionRow>,
    position: ProjectionPosition,
}

impl RevenueState {
    fn new() -> Self {
        Self {
            transactions: HashMap::new(),
            position: ProjectionPosition::zero(),
        }
    }

    fn settled(&self) -> impl Iterator<Item = &TransactionRow> {
        self.transactions
            .values()
            .filter(|t| t.status == TransactionStatus::Completed)
    }
}

/// Read model view for payment statistics.
///
/// Only completed transactions count. A refund takes its transaction back
/// out of every total.
#[derive(Clone)]
pub struct RevenueView {
    state: Arc<RwLock<RevenueState>>,
}

impl RevenueView {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(RevenueState::new())),
        }
    }

    pub async fn stats(&self) -> RevenueStats {
        let state = self.state.read().await;

        let mut total_revenue = Money::zero();
        let mut total_transactions = 0u64;
        let mut courses: HashMap<CourseId, CourseRevenue> = HashMap::new();
        let mut months: BTreeMap<String, MonthlyRevenue> = BTreeMap::new();

        for row in state.settled() {
            total_revenue += row.amount;
            total_transactions += 1;

            let course = courses
                .entry(row.course_id)
                .or_insert_with(|| CourseRevenue {
                    course_id: row.course_id,
                    course_title: row.course_title.clone(),
                    enrollments: 0,
                    revenue: Money::zero(),
                });
            course.enrollments += 1;
            course.revenue += row.amount;

            if let Some(completed_at) = row.completed_at {
                let month = completed_at.format("%Y-%m").to_string();
                let entry = months
                    .entry(month.clone())
                    .or_insert_with(|| MonthlyRevenue {
                        month,
                        transactions: 0,
                        revenue: Money::zero(),
                    });
                entry.transactions += 1;
                entry.revenue += row.amount;
            }
        }

        let mut top_courses: Vec<_> = courses.into_values().collect();
        top_courses.sort_by(|a, b| {
            b.enrollments
                .cmp(&a.enrollments)
                .then_with(|| b.revenue.cmp(&a.revenue))
                .then_with(|| a.course_title.cmp(&b.course_title))
        });
        top_courses.truncate(TOP_COURSES);

        RevenueStats {
            total_revenue,
            total_transactions,
            average_order_value: total_revenue.average_over(total_transactions),
            top_courses,
            revenue_by_month: months.into_values().collect(),
        }
    }

    pub async fn status_of(&self, transaction_id: AggregateId) -> Option<TransactionStatus> {
        self.state
            .read()
            .await
            .transactions
            .get(&transaction_id)
            .map(|t| t.status)
    }
}

impl Default for RevenueView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for RevenueView {
    fn name(&self) -> &'static str {
        "RevenueView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;
        state.position = state.position.advance();

        if !event.is_for(PaymentTransaction::aggregate_type()) {
            return Ok(());
        }

        let transaction_event: TransactionEvent = event
            .decode()
            .map_err(|e| ProjectionError::decode(event, e))?;
        let transaction_id = event.aggregate_id;

        match transaction_event {
            TransactionEvent::TransactionOpened(data) => {
                state.transactions.insert(
                    transaction_id,
                    TransactionRow {
                        course_id: data.course_id,
                        course_title: data.course_title,
                        amount: data.amount,
                        status: TransactionStatus::Pending,
                        completed_at: None,
                    },
                );
            }
            TransactionEvent::TransactionCompleted(data) => {
                if let Some(row) = state.transactions.get_mut(&transaction_id) {
                    row.status = TransactionStatus::Completed;
                    row.completed_at = Some(data.completed_at);
                }
            }
            TransactionEvent::TransactionFailed(_) => {
                if let Some(row) = state.transactions.get_mut(&transaction_id) {
                    row.status = TransactionStatus::Failed;
                }
            }
            TransactionEvent::TransactionRefunded(_) => {
                if let Some(row) = state.transactions.get_mut(&transaction_id) {
                    row.status = TransactionStatus::Refunded;
                }
            }
        }

        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        *self.state.write().await = RevenueState::new();
        Ok(())
    }
}

impl ReadModel for RevenueView {
    fn name(&self) -> &'static str {
        "RevenueView"
    }

    fn count(&self) -> usize {
        self.state
            .try_read()
            .map(|s| s.transactions.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::StudentId;
    use domain::{DomainEvent, NewTransaction};
    use event_store::Version;

    fn envelope(id: AggregateId, version: i64, event: &TransactionEvent) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(id)
            .aggregate_type("PaymentTransaction")
            .event_type(event.event_type())
            .version(Version::new(version))
            .payload(event)
            .unwrap()
            .build()
            .unwrap()
    }

    async fn pay(view: &RevenueView, course: CourseId, title: &str, units: i64) -> AggregateId {
        let transaction_id = AggregateId::new();
        let opened = PaymentTransaction::default()
            .open(&NewTransaction {
                transaction_id,
                enrollment_id: AggregateId::new(),
                student_id: StudentId::new(),
                course_id: course,
                course_title: title.to_string(),
                amount: Money::from_units(units),
                upi_id: "elearning@upi".to_string(),
            })
            .unwrap();
        view.handle(&envelope(transaction_id, 1, &opened[0]))
            .await
            .unwrap();
        view.handle(&envelope(transaction_id, 2, &TransactionEvent::completed()))
            .await
            .unwrap();
        transaction_id
    }

    #[tokio::test]
    async fn totals_and_average() {
        let view = RevenueView::new();
        let rust = CourseId::new();
        let go = CourseId::new();

        pay(&view, rust, "Rust", 500).await;
        pay(&view, rust, "Rust", 500).await;
        pay(&view, go, "Go", 299).await;

        let stats = view.stats().await;
        assert_eq!(stats.total_transactions, 3);
        assert_eq!(stats.total_revenue, Money::from_units(1299));
        assert_eq!(stats.average_order_value, Money::from_units(433));
        assert_eq!(stats.top_courses[0].course_id, rust);
        assert_eq!(stats.top_courses[0].enrollments, 2);
        assert_eq!(stats.revenue_by_month.len(), 1);
        assert_eq!(
            stats.revenue_by_month[0].month,
            Utc::now().format("%Y-%m").to_string()
        );
    }

    #[tokio::test]
    async fn refunds_and_pending_payments_are_excluded() {
        let view = RevenueView::new();
        let course = CourseId::new();

        let refunded = pay(&view, course, "Rust", 500).await;
        pay(&view, course, "Rust", 500).await;
        view.handle(&envelope(
            refunded,
            3,
            &TransactionEvent::refunded("duplicate charge"),
        ))
        .await
        .unwrap();

        let stats = view.stats().await;
        assert_eq!(stats.total_transactions, 1);
        assert_eq!(stats.total_revenue, Money::from_units(500));
        assert_eq!(
            view.status_of(refunded).await,
            Some(TransactionStatus::Refunded)
        );
    }

    #[tokio::test]
    async fn empty_stats() {
        let stats = RevenueView::new().stats().await;
        assert_eq!(stats.total_transactions, 0);
        assert_eq!(stats.average_order_value, Money::zero());
        assert!(stats.top_courses.is_empty());
    }
}
