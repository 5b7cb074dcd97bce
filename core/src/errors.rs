//! Error types for breaker, hedge, retry and registry operations

use std::error::Error;
use std::fmt;

/// Errors returned by `CircuitBreaker::call` and `call_async`
#[derive(Debug)]
pub enum CircuitError<E = Box<dyn Error + Send + Sync>> {
    /// Circuit is open (or a probe is already in flight), the call was not invoked
    Open { circuit: String, next_retry_ms: i64 },
    /// The wrapped operation failed; the error is passed through untouched
    Execution(E),
}

impl<E> CircuitError<E> {
    /// True when the call was rejected without being invoked
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }

    /// Unwrap the wrapped call's own error, if that is what this is
    pub fn into_execution(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            CircuitError::Open { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for CircuitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitError::Open {
                circuit,
                next_retry_ms,
            } => {
                write!(
                    f,
                    "Circuit '{}' is open (next retry at {}ms)",
                    circuit, next_retry_ms
                )
            }
            CircuitError::Execution(e) => write!(f, "Circuit execution failed: {}", e),
        }
    }
}

impl<E: Error + 'static> Error for CircuitError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CircuitError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors returned by `HedgeExecutor::execute`
#[derive(Debug)]
pub enum HedgeError<E> {
    /// The caller's cancellation fired before any attempt finished
    Cancelled,
    /// The winning attempt failed
    Attempt(E),
    /// Every started attempt terminated (panicked) without producing an outcome
    Abandoned,
}

impl<E> HedgeError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HedgeError::Cancelled)
    }
}

impl<E: fmt::Display> fmt::Display for HedgeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HedgeError::Cancelled => write!(f, "Hedged request cancelled"),
            HedgeError::Attempt(e) => write!(f, "Hedged attempt failed: {}", e),
            HedgeError::Abandoned => {
                write!(f, "Hedged request abandoned: no attempt produced an outcome")
            }
        }
    }
}

impl<E: Error + 'static> Error for HedgeError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HedgeError::Attempt(e) => Some(e),
            _ => None,
        }
    }
}

/// Invalid breaker or window configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A time ring needs at least one bucket
    ZeroBuckets,
    /// The window interval must split evenly into buckets of at least 1ms
    UnevenWindow { interval_ms: u64, bucket_count: u32 },
    /// A collector has neither a ratio nor an absolute threshold
    MissingDetector { collector: &'static str },
    /// Ratio thresholds live in `0.0..=1.0`
    InvalidRatio(f64),
    /// Absolute thresholds must be at least 1
    InvalidThreshold(i64),
    /// A breaker holds at most 64 collectors
    TooManyCollectors(usize),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroBuckets => write!(f, "Time ring bucket count must be greater than 0"),
            ConfigError::UnevenWindow {
                interval_ms,
                bucket_count,
            } => write!(
                f,
                "Window interval {}ms is not evenly divisible into {} buckets",
                interval_ms, bucket_count
            ),
            ConfigError::MissingDetector { collector } => {
                write!(
                    f,
                    "Collector '{}' needs a ratio or an absolute threshold",
                    collector
                )
            }
            ConfigError::InvalidRatio(ratio) => {
                write!(f, "Ratio threshold {} is outside 0.0..=1.0", ratio)
            }
            ConfigError::InvalidThreshold(threshold) => {
                write!(f, "Absolute threshold {} must be at least 1", threshold)
            }
            ConfigError::TooManyCollectors(count) => {
                write!(f, "{} collectors configured, at most 64 are supported", count)
            }
        }
    }
}

impl Error for ConfigError {}

/// The retry budget is exhausted, no further wait is allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffTimeout;

impl fmt::Display for BackoffTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Backoff timeout")
    }
}

impl Error for BackoffTimeout {}

/// Errors returned by `Retrier::retry`
#[derive(Debug)]
pub enum RetryError<E> {
    /// The last call error, returned when retrying stopped for a reason other than the budget
    Call(E),
    /// The delay budget ran out; carries the last call error
    BackoffTimeout(E),
    /// The call context was cancelled while waiting between attempts
    Cancelled,
}

impl<E> RetryError<E> {
    /// The last call error, if any attempt produced one
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Call(e) | RetryError::BackoffTimeout(e) => Some(e),
            RetryError::Cancelled => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Call(e) => write!(f, "Call failed: {}", e),
            RetryError::BackoffTimeout(e) => {
                write!(f, "{} (last error: {})", BackoffTimeout, e)
            }
            RetryError::Cancelled => write!(f, "Retry cancelled"),
        }
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RetryError::Call(e) | RetryError::BackoffTimeout(e) => Some(e),
            RetryError::Cancelled => None,
        }
    }
}

/// A registered guard refused a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardError {
    pub guard: String,
    pub resource: String,
    pub reason: String,
}

impl fmt::Display for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Guard '{}' rejected resource '{}': {}",
            self.guard, self.resource, self.reason
        )
    }
}

impl Error for GuardError {}
