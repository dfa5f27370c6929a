//! Bounded-parallelism runner.

use std::future::Future;

use futures::stream::{self, StreamExt};

use crate::error::AppError;

/// Result of one scheduled item.
#[derive(Debug)]
pub struct Outcome<R> {
    /// Position of the item in the input list.
    pub index: usize,
    pub result: Result<R, AppError>,
}

impl<R> Outcome<R> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs `worker` over every item with at most `limit` futures in flight.
///
/// New items start as soon as an in-flight one settles. A failing item never
/// stops the others; every item gets its own [`Outcome`], returned in input
/// order. `limit` is coerced to at least 1.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, worker: F) -> Vec<Outcome<R>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, AppError>>,
{
    let limit = limit.max(1);
    let worker = &worker;

    let mut outcomes: Vec<Outcome<R>> = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| async move {
            Outcome {
                index,
                result: worker(item).await,
            }
        })
        .buffer_unordered(limit)
        .collect()
        .await;

    outcomes.sort_by_key(|o| o.index);
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<u64> = (0..10).collect();

        let outcomes = run_bounded(items, 3, |i| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10 + (i % 4) * 5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, AppError>(i)
            }
        })
        .await;

        assert_eq!(outcomes.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failures_do_not_short_circuit() {
        let outcomes = run_bounded(vec![1, 2, 3, 4], 2, |i| async move {
            if i % 2 == 0 {
                Err(AppError::Validation(format!("item {} rejected", i)))
            } else {
                Ok(i * 10)
            }
        })
        .await;

        let indexes: Vec<usize> = outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 2);
        assert!(matches!(outcomes[1].result, Err(AppError::Validation(_))));
        assert_eq!(outcomes[2].result.as_ref().ok(), Some(&30));
    }

    #[tokio::test]
    async fn test_zero_limit_is_coerced() {
        let outcomes = run_bounded(vec!["a", "b"], 0, |s| async move { Ok(s.len()) }).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(Outcome::is_ok));
    }
}
