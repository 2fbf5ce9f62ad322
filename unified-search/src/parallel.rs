//! Bounded fan-out / fan-in executor for concurrent sub-queries.

use std::future::Future;

use futures::stream::{self, StreamExt};

/// Runs a batch of fallible tasks concurrently with a width limit.
///
/// A failing task never aborts its siblings: each outcome is captured in the
/// slot matching the task's input position. Completion order is not
/// observable to the caller.
#[derive(Debug, Clone, Copy)]
pub struct ParallelProcessor {
    max_concurrency: usize,
}

impl Default for ParallelProcessor {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ParallelProcessor {
    /// A processor that polls at most `max_concurrency` tasks at once.
    /// A limit of zero is treated as one.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run every task and return their outcomes in input order.
    pub async fn execute_parallel<T, E, Fut>(&self, tasks: Vec<Fut>) -> Vec<Result<T, E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        if tasks.is_empty() {
            return Vec::new();
        }
        stream::iter(tasks)
            .buffered(self.max_concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn preserves_input_order_not_completion_order() {
        let processor = ParallelProcessor::new(4);
        let tasks: Vec<_> = [30u64, 10, 20, 0]
            .into_iter()
            .enumerate()
            .map(|(i, delay)| async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok::<usize, String>(i)
            })
            .collect();

        let results = processor.execute_parallel(tasks).await;
        let values: Vec<usize> = results.into_iter().map(|r| r.expect("ok")).collect();
        assert_eq!(values, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn failure_is_captured_positionally() {
        let processor = ParallelProcessor::default();
        let tasks: Vec<_> = (0..4)
            .map(|i| async move {
                if i == 2 {
                    Err(format!("task {i} failed"))
                } else {
                    Ok(i * 10)
                }
            })
            .collect();

        let results = processor.execute_parallel(tasks).await;
        assert_eq!(results.len(), 4);
        assert_eq!(results[0], Ok(0));
        assert_eq!(results[1], Ok(10));
        assert_eq!(results[2], Err("task 2 failed".to_string()));
        assert_eq!(results[3], Ok(30));
    }

    #[tokio::test]
    async fn empty_batch_returns_empty() {
        let processor = ParallelProcessor::default();
        let tasks: Vec<std::future::Ready<Result<(), ()>>> = Vec::new();
        assert!(processor.execute_parallel(tasks).await.is_empty());
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let processor = ParallelProcessor::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), ()>(())
                }
            })
            .collect();

        let results = processor.execute_parallel(tasks).await;
        assert_eq!(results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn zero_limit_clamped_to_one() {
        assert_eq!(ParallelProcessor::new(0).max_concurrency(), 1);
    }
}
