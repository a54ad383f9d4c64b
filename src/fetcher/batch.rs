//! Bounded-concurrency fan-out over many comments requests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::types::{CommentsRequest, CommentsResult};

use super::{CommentsFetcher, FailurePolicy, InFlight};

/// No item has failed yet
const NO_FAILURE: usize = usize::MAX;

/// Per-request outcomes of a batch, in input order
#[derive(Debug)]
pub struct BatchResults {
    results: Vec<Result<CommentsResult>>,
}

impl BatchResults {
    /// Outcome of every request; `results()[i]` belongs to `requests[i]`
    pub fn results(&self) -> &[Result<CommentsResult>] {
        &self.results
    }

    /// Number of requests in the batch
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the batch was empty
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// The lowest-index failure, if any
    pub fn first_error(&self) -> Option<(usize, &Error)> {
        self.errors().next()
    }

    /// Every failure with its request index
    pub fn errors(&self) -> impl Iterator<Item = (usize, &Error)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(index, result)| result.as_ref().err().map(|e| (index, e)))
    }

    /// Every success with its request index
    pub fn successes(&self) -> impl Iterator<Item = (usize, &CommentsResult)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(index, result)| result.as_ref().ok().map(|r| (index, r)))
    }

    /// Number of failed requests
    pub fn failed(&self) -> usize {
        self.errors().count()
    }

    /// Take the per-request outcomes
    pub fn into_results(self) -> Vec<Result<CommentsResult>> {
        self.results
    }

    /// All trees, or [`Error::Aggregate`] describing the failures
    pub fn into_result(self) -> Result<Vec<CommentsResult>> {
        let total = self.results.len();
        let mut trees = Vec::with_capacity(total);
        let mut first: Option<(usize, Error)> = None;
        let mut failed = 0;

        for (index, result) in self.results.into_iter().enumerate() {
            match result {
                Ok(tree) => trees.push(tree),
                Err(e) => {
                    failed += 1;
                    if first.is_none() {
                        first = Some((index, e));
                    }
                }
            }
        }

        match first {
            None => Ok(trees),
            Some((first_index, first)) => Err(Error::Aggregate {
                failed,
                total,
                first_index,
                first: Box::new(first),
            }),
        }
    }
}

impl CommentsFetcher {
    /// Fetch many comment trees with at most `max_concurrency` in flight
    ///
    /// Requests are admitted in input order. Each runs on its own task with a
    /// child of the batch token, and every task is awaited before this
    /// returns, whatever the outcome.
    ///
    /// Returns [`Error::Cancelled`] when `cancel` fires, [`Error::Timeout`]
    /// when the batch deadline elapses, and under
    /// [`FailurePolicy::FailFast`] [`Error::Batch`] for the first failure.
    /// Otherwise every outcome is reported in its slot.
    pub async fn fetch_many(
        &self,
        cancel: &CancellationToken,
        requests: Vec<CommentsRequest>,
    ) -> Result<BatchResults> {
        let total = requests.len();
        let started = Instant::now();
        let batch = cancel.child_token();
        // Dropping this future part-way cancels every task it spawned
        let _abandoned = batch.clone().drop_guard();
        let fail_fast = self.inner.failure_policy == FailurePolicy::FailFast;
        let first_failure = Arc::new(AtomicUsize::new(NO_FAILURE));

        tracing::info!(
            requests = total,
            max_concurrency = self.inner.max_concurrency,
            policy = ?self.inner.failure_policy,
            "Starting comments batch"
        );

        let finished = CancellationToken::new();
        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = self
            .inner
            .batch_timeout
            .map(|timeout| spawn_deadline(timeout, batch.clone(), finished.clone(), timed_out.clone()));

        let semaphore = Arc::new(Semaphore::new(self.inner.max_concurrency));
        let mut handles: Vec<(usize, JoinHandle<Result<CommentsResult>>)> =
            Vec::with_capacity(total);

        for (index, request) in requests.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = batch.cancelled() => {
                    tracing::debug!(request = index, "Batch cancelled, no further admissions");
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let fetcher = self.clone();
            let token = batch.child_token();
            let batch_token = batch.clone();
            let first_failure = Arc::clone(&first_failure);
            let in_flight = InFlight::enter(&self.inner.active);

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let _in_flight = in_flight;

                let result = fetcher.fetch_one(&token, &request).await;
                match &result {
                    Ok(_) => {}
                    Err(e) if e.is_cancellation() => {
                        tracing::debug!(request = index, article = %request.article, "Fetch cancelled");
                    }
                    Err(e) => {
                        tracing::warn!(
                            request = index,
                            article = %request.article,
                            error = %e,
                            "Comments fetch failed"
                        );
                        if fail_fast
                            && first_failure
                                .compare_exchange(NO_FAILURE, index, Ordering::SeqCst, Ordering::SeqCst)
                                .is_ok()
                        {
                            batch_token.cancel();
                        }
                    }
                }
                result
            });
            handles.push((index, handle));
        }

        let mut slots: Vec<Option<Result<CommentsResult>>> = (0..total).map(|_| None).collect();
        for (index, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(request = index, error = %e, "Fetch task failed");
                    Err(Error::TaskFailed {
                        index,
                        reason: e.to_string(),
                    })
                }
            };
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(outcome);
            }
        }

        finished.cancel();
        if let Some(watchdog) = watchdog {
            let _ = watchdog.await;
        }

        let elapsed_ms = started.elapsed().as_millis();

        let cut_short = interrupted(&slots);

        if cut_short && timed_out.load(Ordering::SeqCst) {
            let timeout = self.inner.batch_timeout.unwrap_or_default();
            tracing::warn!(requests = total, elapsed_ms, "Comments batch timed out");
            return Err(Error::Timeout {
                operation: format!("batch of {total} requests"),
                elapsed_ms: timeout.as_millis(),
            });
        }
        if cut_short && cancel.is_cancelled() {
            tracing::info!(requests = total, elapsed_ms, "Comments batch cancelled");
            return Err(Error::cancelled(format!("batch of {total} requests")));
        }

        let failed_index = first_failure.load(Ordering::SeqCst);
        if failed_index != NO_FAILURE
            && let Some(Some(Err(source))) = slots.get_mut(failed_index).map(Option::take)
        {
            tracing::warn!(
                requests = total,
                request = failed_index,
                elapsed_ms,
                "Comments batch aborted by failing request"
            );
            return Err(Error::Batch {
                index: failed_index,
                source: Box::new(source),
            });
        }

        let results: Vec<Result<CommentsResult>> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| Err(Error::cancelled(format!("request {index} not started"))))
            })
            .collect();
        let results = BatchResults { results };

        tracing::info!(
            requests = total,
            succeeded = total - results.failed(),
            failed = results.failed(),
            elapsed_ms,
            "Comments batch complete"
        );
        Ok(results)
    }
}

/// Whether any request was cut short: never started, or ended cancelled
pub(super) fn interrupted(slots: &[Option<Result<CommentsResult>>]) -> bool {
    slots.iter().any(|slot| match slot {
        None => true,
        Some(Err(e)) => e.is_cancellation(),
        Some(Ok(_)) => false,
    })
}

/// Cancel `batch` once `timeout` elapses, unless the batch finishes or is
/// cancelled first
fn spawn_deadline(
    timeout: Duration,
    batch: CancellationToken,
    finished: CancellationToken,
    timed_out: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                tracing::debug!(timeout_ms = timeout.as_millis(), "Batch deadline reached");
                timed_out.store(true, Ordering::SeqCst);
                batch.cancel();
            }
            _ = finished.cancelled() => {}
            _ = batch.cancelled() => {}
        }
    })
}
