//! Retrying failed calls
//!
//! A `Retrier` reruns a failing async call with a pause chosen by a `Backoff`
//! strategy. It stops at the first success, once `max_retries` is used up,
//! when the error is not retryable, when the call is marked no-retry, when the
//! total delay budget runs out, or when the call context is cancelled.

use crate::errors::{BackoffTimeout, RetryError};
use crate::metadata::CallContext;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// `base_ms * (1 - jitter + rand * jitter)`, via chrono-machines
pub(crate) fn jittered_ms(base_ms: u64, jitter_factor: f64) -> u64 {
    let policy = chrono_machines::Policy {
        max_attempts: 1,
        base_delay_ms: base_ms,
        multiplier: 1.0,
        max_delay_ms: base_ms,
    };
    policy.calculate_delay(1, jitter_factor) as u64
}

/// Picks the pause before the next attempt
pub trait Backoff: Send + Sync + fmt::Debug {
    /// Delay to wait given the `remaining` budget, or `BackoffTimeout` when
    /// the wait would not fit
    fn delay(&self, remaining: Duration) -> Result<Duration, BackoffTimeout>;
}

/// Retry immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NopBackoff;

impl Backoff for NopBackoff {
    fn delay(&self, _remaining: Duration) -> Result<Duration, BackoffTimeout> {
        Ok(Duration::ZERO)
    }
}

/// Fixed pause between attempts
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff {
    pub delay: Duration,
}

impl Backoff for LinearBackoff {
    fn delay(&self, remaining: Duration) -> Result<Duration, BackoffTimeout> {
        if remaining < self.delay {
            return Err(BackoffTimeout);
        }
        Ok(self.delay)
    }
}

/// Pause of `delay` plus a random extra in `0..=jitter`
#[derive(Debug, Clone, Copy)]
pub struct RandomBackoff {
    pub delay: Duration,
    pub jitter: Duration,
}

impl Backoff for RandomBackoff {
    fn delay(&self, remaining: Duration) -> Result<Duration, BackoffTimeout> {
        let extra = jittered_ms(self.jitter.as_millis() as u64, 1.0);
        let wait = self.delay + Duration::from_millis(extra);
        if remaining < wait {
            return Err(BackoffTimeout);
        }
        Ok(wait)
    }
}

type RetryPredicate = Arc<dyn Fn(&dyn Any) -> bool + Send + Sync>;

/// Reruns failing calls
#[derive(Clone)]
pub struct Retrier {
    backoff: Arc<dyn Backoff>,
    max_retries: usize,
    budget: Duration,
    retry_if: Option<RetryPredicate>,
}

impl Default for Retrier {
    fn default() -> Self {
        Self {
            backoff: Arc::new(NopBackoff),
            max_retries: 1,
            budget: Duration::from_secs(1),
            retry_if: None,
        }
    }
}

impl Retrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Attempts after the first one
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Total time retries may take, measured from the first attempt
    pub fn budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Only retry errors for which `predicate` returns true; downcast the
    /// error to inspect it
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&dyn Any) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    fn is_retryable<E: 'static>(&self, error: &E) -> bool {
        self.retry_if
            .as_ref()
            .is_none_or(|predicate| predicate(error as &dyn Any))
    }

    /// Run `f` until it succeeds or retrying has to stop
    ///
    /// Returns the last call error when retrying stops, wrapped in
    /// `RetryError::BackoffTimeout` if the budget was the reason.
    pub async fn retry<F, Fut, T, E>(&self, ctx: &CallContext, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        let started = Instant::now();
        let mut attempt = 0usize;

        loop {
            let error = match f().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            attempt += 1;

            if attempt > self.max_retries
                || ctx.metadata.is_no_retry()
                || !self.is_retryable(&error)
            {
                return Err(RetryError::Call(error));
            }

            let remaining = match self.budget.checked_sub(started.elapsed()) {
                Some(remaining) => remaining,
                None => return Err(RetryError::BackoffTimeout(error)),
            };
            let Ok(delay) = self.backoff.delay(remaining) else {
                tracing::debug!(attempt, "retry budget exhausted");
                return Err(RetryError::BackoffTimeout(error));
            };

            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "call failed, retrying after backoff"
            );

            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl fmt::Debug for Retrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrier")
            .field("backoff", &self.backoff)
            .field("max_retries", &self.max_retries)
            .field("budget", &self.budget)
            .field("retry_if", &self.retry_if.as_ref().map(|_| "<closure>"))
            .finish()
    }
}
