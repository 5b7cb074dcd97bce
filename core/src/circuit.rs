//! Lock-free circuit breaker
//!
//! A `CircuitBreaker` is an ordered list of sub-breakers, one per stat
//! collector. Each sub-breaker runs its own state machine:
//!
//! ```text
//!                 threshold reached
//!   ┌────────┐ ─────────────────────────────────────▶ ┌────────┐
//!   │ Closed │                                        │  Open  │
//!   └────────┘ ◀──────── probe ok ──┐                 └────────┘
//!                                   │                  │    ▲
//!                              ┌──────────┐  retry due │    │ probe failed
//!                              │ HalfOpen │ ◀──────────┘    │
//!                              └──────────┘ ────────────────┘
//! ```
//!
//! State and retry deadline are plain atomics shared by every caller. The
//! only coordination is compare-and-swap: exactly one caller wins
//! Open → HalfOpen per cool-down and becomes the probe; everybody else is
//! rejected until the probe settles.
//!
//! A call passes through every sub-breaker in order. The first rejection wins
//! and later sub-breakers never see the call.

use crate::{
    builder::CircuitBuilder,
    callbacks::Callbacks,
    classifier::{FailureClassifier, is_failure},
    clock::{Clock, MonotonicClock},
    errors::{CircuitError, ConfigError},
    stat::{CollectorConfig, StatCollector, Verdict},
    window::WindowStats,
};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

/// Probe bookkeeping uses one bit per sub-breaker
const MAX_COLLECTORS: usize = 64;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum State {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => State::Closed,
            1 => State::HalfOpen,
            _ => State::Open,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            State::Closed => "Closed",
            State::HalfOpen => "HalfOpen",
            State::Open => "Open",
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// One sub-breaker is built per collector, in this order
    pub collectors: Vec<CollectorConfig>,

    /// Cool-down before an Open breaker lets a probe through
    pub retry_timeout_ms: u64,

    /// Jitter factor for the cool-down (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collectors: vec![CollectorConfig::default()],
            retry_timeout_ms: 30_000,
            jitter_factor: 0.0,
        }
    }
}

/// Circuit breaker context - shared by all sub-breakers
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub failure_classifier: Option<Arc<dyn FailureClassifier>>,
    pub callbacks: Callbacks,
}

impl CircuitContext {
    fn cool_down_ms(&self) -> i64 {
        let timeout = self.config.retry_timeout_ms;
        let jittered = if self.config.jitter_factor > 0.0 {
            crate::retry::jittered_ms(timeout, self.config.jitter_factor)
        } else {
            timeout
        };
        i64::try_from(jittered).unwrap_or(i64::MAX)
    }
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self {
            name: String::new(),
            config: Config::default(),
            clock: Arc::new(MonotonicClock::new()),
            failure_classifier: None,
            callbacks: Callbacks::new(),
        }
    }
}

impl std::fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field(
                "failure_classifier",
                &self
                    .failure_classifier
                    .as_ref()
                    .map(|_| "<dyn FailureClassifier>"),
            )
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

/// What a sub-breaker allowed the caller to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Closed: run and feed statistics
    Pass,
    /// Won Open → HalfOpen: this call decides the next state
    Probe,
}

/// One state machine bound to one stat collector
#[derive(Debug)]
pub struct SubBreaker {
    state: AtomicU8,
    next_retry_ms: AtomicI64,
    collector: StatCollector,
}

impl SubBreaker {
    fn new(collector: StatCollector) -> Self {
        Self {
            state: AtomicU8::new(State::Closed as u8),
            next_retry_ms: AtomicI64::new(0),
            collector,
        }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Earliest time a probe is allowed. Meaningful while Open.
    pub fn next_retry_ms(&self) -> i64 {
        self.next_retry_ms.load(Ordering::Acquire)
    }

    pub fn collector(&self) -> &StatCollector {
        &self.collector
    }

    pub fn name(&self) -> &'static str {
        self.collector.name()
    }

    fn transition(&self, from: State, to: State) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Would `admit` let a call through at `now_ms`, without changing anything
    fn permits(&self, now_ms: i64) -> bool {
        match self.state() {
            State::Closed => true,
            State::HalfOpen => false,
            State::Open => now_ms >= self.next_retry_ms(),
        }
    }

    /// State check for one call. `Err` carries the retry deadline.
    fn admit(&self, now_ms: i64, ctx: &CircuitContext) -> Result<Admission, i64> {
        loop {
            match self.state() {
                State::Closed => return Ok(Admission::Pass),
                // A probe is already in flight
                State::HalfOpen => return Err(self.next_retry_ms()),
                State::Open => {
                    let next_retry = self.next_retry_ms();
                    if now_ms < next_retry {
                        return Err(next_retry);
                    }
                    if self.transition(State::Open, State::HalfOpen) {
                        tracing::debug!(
                            circuit = %ctx.name,
                            collector = self.name(),
                            "circuit half-open, probing"
                        );
                        ctx.callbacks
                            .trigger(State::HalfOpen, &ctx.name, self.name());
                        return Ok(Admission::Probe);
                    }
                    // Lost the race, look again
                }
            }
        }
    }

    /// Feed a finished call's verdict into the transition table
    fn settle(&self, admission: Admission, verdict: Verdict, now_ms: i64, ctx: &CircuitContext) {
        match admission {
            Admission::Probe if verdict.matched => {
                self.trip(State::HalfOpen, now_ms, ctx);
            }
            Admission::Probe => {
                if self.transition(State::HalfOpen, State::Closed) {
                    tracing::info!(
                        circuit = %ctx.name,
                        collector = self.name(),
                        "circuit closed"
                    );
                    ctx.callbacks.trigger(State::Closed, &ctx.name, self.name());
                }
            }
            // Only a matching call trips; a success must not reopen on old failures
            Admission::Pass if verdict.matched && verdict.threshold_reached => {
                self.trip(State::Closed, now_ms, ctx);
            }
            Admission::Pass => {}
        }
    }

    fn trip(&self, from: State, now_ms: i64, ctx: &CircuitContext) -> bool {
        if self.state() != from {
            return false;
        }

        // Deadline first: anyone who sees Open must see its deadline
        let next_retry = now_ms.saturating_add(ctx.cool_down_ms());
        self.next_retry_ms.store(next_retry, Ordering::Release);

        if self.transition(from, State::Open) {
            tracing::info!(
                circuit = %ctx.name,
                collector = self.name(),
                from = from.name(),
                next_retry_ms = next_retry,
                "circuit opened"
            );
            ctx.callbacks.trigger(State::Open, &ctx.name, self.name());
            return true;
        }
        false
    }

    /// A probe that never reported back: reopen with the deadline untouched so
    /// the next caller may probe right away.
    fn abandon_probe(&self, ctx: &CircuitContext) {
        if self.transition(State::HalfOpen, State::Open) {
            tracing::debug!(
                circuit = %ctx.name,
                collector = self.name(),
                "probe abandoned, circuit back to open"
            );
        }
    }

    fn reset(&self) {
        self.collector.clear();
        self.next_retry_ms.store(0, Ordering::Release);
        self.state.store(State::Closed as u8, Ordering::Release);
    }
}

/// Admission for one call across all sub-breakers
///
/// Dropping a permit without settling it (a cancelled future, a panic)
/// hands any probe it holds back to Open.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    /// Bit `i` set: sub-breaker `i` admitted this call as its probe
    probes: u64,
    /// Number of sub-breakers that admitted the call
    admitted: usize,
    start_ms: i64,
}

impl Permit<'_> {
    fn admission(&self, index: usize) -> Admission {
        if self.probes & (1 << index) != 0 {
            Admission::Probe
        } else {
            Admission::Pass
        }
    }

    fn settle<T, E: 'static>(mut self, result: &Result<T, E>) {
        let breaker = self.breaker;
        let ctx = &breaker.context;
        let end_ms = ctx.clock.now_ms();
        let elapsed_ms = end_ms - self.start_ms;

        let failed = is_failure(
            ctx.failure_classifier.as_deref(),
            &ctx.name,
            result,
            elapsed_ms,
        );

        for (index, sub) in breaker.breakers.iter().enumerate() {
            let verdict = sub.collector.record(self.start_ms, elapsed_ms, failed);
            sub.settle(self.admission(index), verdict, end_ms, ctx);
        }

        self.probes = 0;
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.probes == 0 {
            return;
        }
        for (index, sub) in self.breaker.breakers[..self.admitted].iter().enumerate() {
            if self.admission(index) == Admission::Probe {
                sub.abandon_probe(&self.breaker.context);
            }
        }
    }
}

/// Circuit breaker public API
///
/// All methods take `&self`; share the breaker with `Arc` across threads or tasks.
pub struct CircuitBreaker {
    context: CircuitContext,
    breakers: Box<[SubBreaker]>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker (use builder() for more options)
    pub fn new(name: impl Into<String>, config: Config) -> Result<Self, ConfigError> {
        Self::with_context(CircuitContext {
            name: name.into(),
            config,
            ..Default::default()
        })
    }

    /// Build every sub-breaker from the context's collector list (used by builder)
    pub(crate) fn with_context(context: CircuitContext) -> Result<Self, ConfigError> {
        if context.config.collectors.len() > MAX_COLLECTORS {
            return Err(ConfigError::TooManyCollectors(
                context.config.collectors.len(),
            ));
        }

        let breakers = context
            .config
            .collectors
            .iter()
            .map(|config| {
                StatCollector::new(config, Arc::clone(&context.clock)).map(SubBreaker::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            context,
            breakers: breakers.into_boxed_slice(),
        })
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> CircuitBuilder {
        CircuitBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn sub_breakers(&self) -> &[SubBreaker] {
        &self.breakers
    }

    fn admit<E>(&self) -> Result<Permit<'_>, CircuitError<E>> {
        let now_ms = self.context.clock.now_ms();
        let mut permit = Permit {
            breaker: self,
            probes: 0,
            admitted: 0,
            start_ms: now_ms,
        };

        for (index, sub) in self.breakers.iter().enumerate() {
            match sub.admit(now_ms, &self.context) {
                Ok(admission) => {
                    if admission == Admission::Probe {
                        permit.probes |= 1 << index;
                    }
                    permit.admitted += 1;
                }
                Err(next_retry_ms) => {
                    // Dropping the permit returns probes taken further up the list
                    drop(permit);
                    return Err(CircuitError::Open {
                        circuit: self.context.name.clone(),
                        next_retry_ms,
                    });
                }
            }
        }

        Ok(permit)
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// Rejected calls return `CircuitError::Open` without running `f`.
    /// Otherwise `f`'s own error comes back as `CircuitError::Execution`.
    pub fn call<F, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: 'static,
    {
        let permit = self.admit()?;
        let result = f();
        permit.settle(&result);
        result.map_err(CircuitError::Execution)
    }

    /// Async flavour of [`call`](Self::call)
    ///
    /// If the returned future is dropped mid-call, the call is not recorded and
    /// any probe it held is given back.
    pub async fn call_async<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        let permit = self.admit()?;
        let result = f().await;
        permit.settle(&result);
        result.map_err(CircuitError::Execution)
    }

    /// Most restrictive state across sub-breakers
    pub fn state(&self) -> State {
        self.breakers
            .iter()
            .map(SubBreaker::state)
            .max()
            .unwrap_or(State::Closed)
    }

    /// State of every sub-breaker, keyed by collector name
    pub fn states(&self) -> Vec<(&'static str, State)> {
        self.breakers
            .iter()
            .map(|sub| (sub.name(), sub.state()))
            .collect()
    }

    /// Window totals of every sub-breaker, keyed by collector name
    pub fn window_stats(&self) -> Vec<(&'static str, WindowStats)> {
        self.breakers
            .iter()
            .map(|sub| (sub.name(), sub.collector.stats()))
            .collect()
    }

    /// Check if circuit is open
    pub fn is_open(&self) -> bool {
        self.state() == State::Open
    }

    /// Check if circuit is closed
    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    /// Get current state name
    pub fn state_name(&self) -> &'static str {
        self.state().name()
    }

    /// Whether a call made now would get through, without side effects
    pub fn is_call_permitted(&self) -> bool {
        let now_ms = self.context.clock.now_ms();
        self.breakers.iter().all(|sub| sub.permits(now_ms))
    }

    /// Clear all statistics and force every sub-breaker back to Closed
    pub fn reset(&self) {
        for sub in self.breakers.iter() {
            sub.reset();
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("states", &self.states())
            .finish()
    }
}
