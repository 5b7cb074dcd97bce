//! GuardMachines - lock-free circuit breaking and hedged requests
//!
//! This crate provides:
//! - A sliding time window of atomic buckets (`TimeRing`) with lazy rollover
//! - Error-rate and slow-call statistics with ratio or count thresholds
//! - A composite circuit breaker (Closed → Open → HalfOpen) driven purely by
//!   compare-and-swap, safe to share across threads without locks
//! - A hedge executor that races a backup attempt against a slow primary
//! - Retry, request metadata and guard registry helpers around those
//!
//! # Example
//!
//! ```rust
//! use guard_machines::{CircuitBreaker, CollectorConfig};
//!
//! let circuit = CircuitBreaker::builder("payment_api")
//!     .collector(CollectorConfig::error_rate(10_000, 10).ratio(0.5).minimum_calls(4))
//!     .collector(CollectorConfig::slow_rate(500, 10_000, 10).absolute_threshold(20))
//!     .retry_timeout_ms(5_000)
//!     .on_open(|name, collector| println!("Circuit {} opened by {}", name, collector))
//!     .build()
//!     .unwrap();
//!
//! // Execute with circuit protection
//! let result = circuit.call(|| {
//!     // Your service call here
//!     Ok::<_, String>("success")
//! });
//! assert_eq!(result.unwrap(), "success");
//!
//! // Check circuit state
//! if circuit.is_open() {
//!     println!("Circuit is open, skipping call");
//! }
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod errors;
pub mod hedge;
pub mod metadata;
pub mod registry;
pub mod retry;
pub mod stat;
pub mod window;

pub use builder::CircuitBuilder;
pub use circuit::{CircuitBreaker, Config, State, SubBreaker};
pub use classifier::{DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use errors::{BackoffTimeout, CircuitError, ConfigError, GuardError, HedgeError, RetryError};
pub use hedge::HedgeExecutor;
pub use metadata::{CallContext, Metadata};
pub use registry::{Guard, GuardRegistry};
pub use retry::{Backoff, LinearBackoff, NopBackoff, RandomBackoff, Retrier};
pub use stat::{CollectorConfig, Detector, StatCollector, StatKind, Verdict};
pub use window::{Bucket, TimeRing, WindowStats};
