//! Builder API for ergonomic circuit breaker configuration

use crate::{
    callbacks::Callbacks,
    circuit::{CircuitBreaker, CircuitContext, Config},
    classifier::FailureClassifier,
    clock::{Clock, MonotonicClock},
    errors::ConfigError,
    stat::CollectorConfig,
};
use std::sync::Arc;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    name: String,
    config: Config,
    /// Set once `collector()` has replaced the default collector list
    custom_collectors: bool,
    clock: Option<Arc<dyn Clock>>,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            custom_collectors: false,
            clock: None,
            failure_classifier: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self.custom_collectors = true;
        self
    }

    /// Add a sub-breaker for this collector
    ///
    /// Sub-breakers are consulted in the order they are added. The first call
    /// drops the default error-rate collector.
    pub fn collector(mut self, collector: CollectorConfig) -> Self {
        if !self.custom_collectors {
            self.config.collectors.clear();
            self.custom_collectors = true;
        }
        self.config.collectors.push(collector);
        self
    }

    /// Set the cool-down before an open circuit lets a probe through
    pub fn retry_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.retry_timeout_ms = timeout_ms;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Use a custom time source (defaults to `MonotonicClock`)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set a failure classifier to filter which errors should trip the circuit
    ///
    /// Errors the classifier rejects are recorded as successes. They are still
    /// returned to the caller untouched.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use guard_machines::{CircuitBreaker, PredicateClassifier};
    /// use std::sync::Arc;
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(|ctx| {
    ///         // Only trip on slow errors
    ///         ctx.elapsed_ms > 1_000
    ///     })))
    ///     .build()
    ///     .unwrap();
    /// # assert!(circuit.is_closed());
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Set callback for when a sub-breaker opens: `(circuit, collector)`
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when a sub-breaker closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when a sub-breaker enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Build the circuit breaker
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));

        let context = CircuitContext {
            name: self.name,
            config: self.config,
            clock,
            failure_classifier: self.failure_classifier,
            callbacks: self.callbacks,
        };

        CircuitBreaker::with_context(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::errors::CircuitError;

    #[test]
    fn test_builder_defaults() {
        let circuit = CircuitBuilder::new("test").build().unwrap();

        assert_eq!(circuit.state_name(), "Closed");
        assert!(circuit.is_closed());
        assert_eq!(circuit.states(), vec![("error_rate", crate::State::Closed)]);
    }

    #[test]
    fn test_first_collector_replaces_default() {
        let circuit = CircuitBuilder::new("test")
            .collector(CollectorConfig::slow_rate(500, 10_000, 10).ratio(0.5))
            .collector(CollectorConfig::error_rate(10_000, 10).absolute_threshold(3))
            .build()
            .unwrap();

        let names: Vec<_> = circuit.states().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["slow_rate", "error_rate"]);
    }

    #[test]
    fn test_builder_custom_config() {
        let clock = Arc::new(ManualClock::new(0));
        let circuit = CircuitBuilder::new("test")
            .collector(CollectorConfig::error_rate(1_000, 10).absolute_threshold(3))
            .retry_timeout_ms(2_000)
            .clock(clock.clone())
            .build()
            .unwrap();

        for _ in 0..3 {
            let _ = circuit.call(|| Err::<(), _>("error"));
        }
        assert!(circuit.is_open());

        match circuit.call(|| Ok::<_, &str>(())) {
            Err(CircuitError::Open { next_retry_ms, .. }) => assert_eq!(next_retry_ms, 2_000),
            other => panic!("Expected Open error, got: {:?}", other),
        }
    }

    #[test]
    fn test_jitter_factor_is_clamped() {
        let builder = CircuitBuilder::new("test").jitter_factor(3.5);
        assert_eq!(builder.config.jitter_factor, 1.0);
    }

    #[test]
    fn test_build_rejects_invalid_collector() {
        let result = CircuitBuilder::new("test")
            .collector(CollectorConfig::error_rate(1_000, 10))
            .build();

        assert!(matches!(
            result,
            Err(ConfigError::MissingDetector {
                collector: "error_rate"
            })
        ));
    }
}
