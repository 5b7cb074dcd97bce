//! Hedged (backup) requests
//!
//! `HedgeExecutor::execute` starts one attempt right away. If it has not
//! finished after the hedge delay, a second identical attempt is started and
//! the caller gets whichever outcome arrives first. The caller may also give
//! up early through its `CancellationToken`.
//!
//! Attempts are spawned tokio tasks and are never aborted: cancelling only
//! releases the caller. Outcomes nobody is waiting for any more are consumed
//! by a background drain task, bounded by the drain timeout.

use crate::errors::HedgeError;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs an attempt, hedging it with a backup after a delay
#[derive(Debug, Clone)]
pub struct HedgeExecutor {
    delay: Duration,
    drain_timeout: Option<Duration>,
}

impl HedgeExecutor {
    /// How long a drain task waits for stragglers by default
    pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            drain_timeout: Some(Self::DEFAULT_DRAIN_TIMEOUT),
        }
    }

    /// Bound on how long leftover attempts are waited for after the caller
    /// has its answer. `None` waits for as long as they take.
    pub fn with_drain_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout
    }

    /// Run `attempt`, starting a backup if the first one is still pending
    /// after the hedge delay
    ///
    /// `attempt` is called once or twice and its futures may run concurrently.
    /// The first outcome to arrive is returned as is, error or not.
    ///
    /// # Example
    ///
    /// ```rust
    /// use guard_machines::HedgeExecutor;
    /// use std::time::Duration;
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let hedge = HedgeExecutor::new(Duration::from_millis(10));
    /// let cancel = CancellationToken::new();
    ///
    /// let value = hedge
    ///     .execute(&cancel, || async { Ok::<_, String>("pong") })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(value, "pong");
    /// # }
    /// ```
    pub async fn execute<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        attempt: F,
    ) -> Result<T, HedgeError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.race(cancel, attempt).await.0
    }

    /// `execute`, also handing back the drain task if one was started
    async fn race<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        attempt: F,
    ) -> (Result<T, HedgeError<E>>, Option<JoinHandle<DrainReport>>)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(2);
        spawn_attempt(&tx, attempt());
        let mut outstanding = 1usize;

        // Held until the backup is started, so `recv` only sees a closed
        // channel once no further attempt can report
        let mut backup_tx = Some(tx);

        let mut timer = std::pin::pin!(tokio::time::sleep(self.delay));
        let mut armed = true;

        let received = loop {
            tokio::select! {
                _ = cancel.cancelled() => break None,
                _ = timer.as_mut(), if armed => {
                    armed = false;
                    if let Some(tx) = backup_tx.take() {
                        tracing::debug!(
                            delay_ms = self.delay.as_millis() as u64,
                            "hedge delay elapsed, starting backup attempt"
                        );
                        spawn_attempt(&tx, attempt());
                        outstanding += 1;
                    }
                }
                outcome = rx.recv() => break Some(outcome),
            }
        };
        drop(backup_tx);

        match received {
            None => (Err(HedgeError::Cancelled), self.drain(rx, outstanding)),
            Some(Some(outcome)) => (
                outcome.map_err(HedgeError::Attempt),
                self.drain(rx, outstanding - 1),
            ),
            Some(None) => (Err(HedgeError::Abandoned), None),
        }
    }

    /// Consume the outcomes of attempts still in flight
    fn drain<T, E>(
        &self,
        mut rx: mpsc::Receiver<Result<T, E>>,
        outstanding: usize,
    ) -> Option<JoinHandle<DrainReport>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        if outstanding == 0 {
            return None;
        }

        let timeout = self.drain_timeout;
        Some(tokio::spawn(async move {
            let consume = async {
                let mut drained = 0usize;
                while drained < outstanding && rx.recv().await.is_some() {
                    drained += 1;
                }
                drained
            };

            let report = match timeout {
                Some(limit) => match tokio::time::timeout(limit, consume).await {
                    Ok(drained) => DrainReport::Complete { drained },
                    Err(_) => {
                        tracing::warn!(
                            outstanding,
                            timeout_ms = limit.as_millis() as u64,
                            "hedge drain timed out, dropping outstanding attempts"
                        );
                        DrainReport::TimedOut { outstanding }
                    }
                },
                None => DrainReport::Complete {
                    drained: consume.await,
                },
            };
            if let DrainReport::Complete { drained } = report {
                tracing::debug!(drained, "hedge drain complete");
            }
            report
        }))
    }
}

/// How a background drain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainReport {
    Complete { drained: usize },
    /// Gave up with attempts still running; their later sends fail
    TimedOut { outstanding: usize },
}

fn spawn_attempt<T, E, Fut>(tx: &mpsc::Sender<Result<T, E>>, attempt: Fut)
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let tx = tx.clone();
    tokio::spawn(async move {
        // The receiver may be gone once a drain gave up
        let _ = tx.send(attempt.await).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::{Instant, sleep};

    fn crash() -> Result<u32, &'static str> {
        panic!("attempt crashed")
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_attempt_never_hedged() {
        let hedge = HedgeExecutor::new(Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let counter = calls.clone();
        let result = hedge
            .execute(&cancel, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    sleep(Duration::from_millis(5)).await;
                    Ok::<_, &str>("primary")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "primary");
        assert!(start.elapsed() < Duration::from_millis(10));

        sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backup_wins_over_slow_primary() {
        let hedge = HedgeExecutor::new(Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let primary_done = Arc::new(AtomicBool::new(false));
        let start = Instant::now();

        let counter = calls.clone();
        let done = primary_done.clone();
        let result = hedge
            .execute(&cancel, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let done = done.clone();
                async move {
                    if n == 0 {
                        sleep(Duration::from_millis(20)).await;
                        done.store(true, Ordering::SeqCst);
                        Ok::<_, &str>("primary")
                    } else {
                        sleep(Duration::from_millis(5)).await;
                        Ok("backup")
                    }
                }
            })
            .await;

        let elapsed = start.elapsed();
        assert_eq!(result.unwrap(), "backup");
        assert!(elapsed >= Duration::from_millis(15));
        assert!(elapsed < Duration::from_millis(20));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The slow primary still runs to completion in the background
        sleep(Duration::from_millis(20)).await;
        assert!(primary_done.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_caller_early() {
        let hedge = HedgeExecutor::new(Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        let start = Instant::now();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(3)).await;
            trigger.cancel();
        });

        let done = finished.clone();
        let result = hedge
            .execute(&cancel, move || {
                let done = done.clone();
                async move {
                    sleep(Duration::from_millis(50)).await;
                    done.store(true, Ordering::SeqCst);
                    Ok::<_, &str>(())
                }
            })
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert!(start.elapsed() < Duration::from_millis(10));
        assert!(!finished.load(Ordering::SeqCst));

        sleep(Duration::from_millis(100)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_hedge_drains_both() {
        let hedge = HedgeExecutor::new(Duration::from_millis(5));
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(8)).await;
            trigger.cancel();
        });

        let done = finished.clone();
        let result = hedge
            .execute(&cancel, move || {
                let done = done.clone();
                async move {
                    sleep(Duration::from_millis(40)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, &str>(())
                }
            })
            .await;

        assert!(matches!(result, Err(HedgeError::Cancelled)));
        sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_first_finisher_wins() {
        let hedge = HedgeExecutor::new(Duration::ZERO);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let result = hedge
            .execute(&cancel, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    let wait = if n == 0 { 30 } else { 10 };
                    sleep(Duration::from_millis(wait)).await;
                    Ok::<_, &str>(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_error_passes_through() {
        let hedge = HedgeExecutor::new(Duration::from_millis(10));
        let cancel = CancellationToken::new();

        let result = hedge
            .execute(&cancel, || async { Err::<(), _>("upstream refused") })
            .await;

        match result {
            Err(HedgeError::Attempt(e)) => assert_eq!(e, "upstream refused"),
            other => panic!("Expected Attempt error, got: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_attempts_panicking_is_abandoned() {
        let hedge = HedgeExecutor::new(Duration::from_millis(5));
        let cancel = CancellationToken::new();

        let result = hedge.execute(&cancel, || async { crash() }).await;

        assert!(matches!(result, Err(HedgeError::Abandoned)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_timeout_gives_up_on_stuck_attempt() {
        let hedge = HedgeExecutor::new(Duration::from_millis(5))
            .with_drain_timeout(Some(Duration::from_millis(100)));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let counter = calls.clone();
        let (result, drain) = hedge
            .race(&cancel, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        std::future::pending::<()>().await;
                    }
                    Ok::<_, &str>(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);

        let report = drain.expect("primary still outstanding").await.unwrap();
        assert_eq!(report, DrainReport::TimedOut { outstanding: 1 });
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_consumes_late_primary() {
        let hedge = HedgeExecutor::new(Duration::from_millis(5));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let (result, drain) = hedge
            .race(&cancel, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    let wait = if n == 0 { 50 } else { 1 };
                    sleep(Duration::from_millis(wait)).await;
                    Ok::<_, &str>(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        let report = drain.expect("primary still outstanding").await.unwrap();
        assert_eq!(report, DrainReport::Complete { drained: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_drain_when_nothing_outstanding() {
        let hedge = HedgeExecutor::new(Duration::from_millis(10));
        let cancel = CancellationToken::new();

        let (result, drain) = hedge
            .race(&cancel, || async { Ok::<_, &str>("only attempt") })
            .await;

        assert_eq!(result.unwrap(), "only attempt");
        assert!(drain.is_none());
    }
}
