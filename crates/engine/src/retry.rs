//! Re-running commands that lost a concurrency race.

use std::future::Future;

use crate::error::{EngineError, Result};

/// Runs `attempt` until it succeeds, fails with something other than a
/// concurrency conflict, or has conflicted `limit` times.
///
/// Each run must load fresh state; the closure is called again from scratch.
pub async fn with_conflict_retry<T, F, Fut>(
    operation: &'static str,
    limit: u32,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let limit = limit.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match attempt().await {
            Err(e) if e.is_concurrency_conflict() => {
                if attempts >= limit {
                    tracing::warn!(operation, attempts, "giving up after repeated conflicts");
                    return Err(EngineError::RetriesExhausted {
                        operation,
                        attempts,
                    });
                }
                metrics::counter!("command_conflicts_retried_total", "operation" => operation)
                    .increment(1);
                tracing::debug!(operation, attempts, "concurrency conflict, retrying");
                tokio::task::yield_now().await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateId;
    use event_store::{EventStoreError, Version};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> EngineError {
        EngineError::EventStore(EventStoreError::ConcurrencyConflict {
            aggregate_id: AggregateId::new(),
            expected: Version::initial(),
            actual: Version::first(),
        })
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = &AtomicU32::new(0);
        let result = with_conflict_retry("test", 5, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(conflict())
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_at_limit() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = with_conflict_retry("test", 3, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(conflict())
        })
        .await;

        assert!(matches!(
            result,
            Err(EngineError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = with_conflict_retry("test", 5, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::NotEnrolled)
        })
        .await;

        assert!(matches!(result, Err(EngineError::NotEnrolled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
