//! Call statistics feeding the breaker
//!
//! A `StatCollector` owns one `TimeRing` and counts calls into it. What
//! counts as a "match" depends on the kind:
//! - `ErrorRate`: the call failed
//! - `SlowRate`: the call took at least `slow_threshold_ms`
//!
//! After each call the whole window is summed and run through the configured
//! detectors. Any detector firing reports `threshold_reached`.

use crate::clock::Clock;
use crate::errors::ConfigError;
use crate::window::{TimeRing, WindowStats};
use std::sync::Arc;

/// Tolerance for ratio comparisons
const EPSILON: f64 = 1e-8;

/// `l >= r`, treating values within `EPSILON` as equal
pub(crate) fn float_gte(l: f64, r: f64) -> bool {
    l > r || (l - r).abs() < EPSILON
}

/// What a collector counts as a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    ErrorRate,
    SlowRate { slow_threshold_ms: i64 },
}

impl StatKind {
    pub fn name(&self) -> &'static str {
        match self {
            StatKind::ErrorRate => "error_rate",
            StatKind::SlowRate { .. } => "slow_rate",
        }
    }

    fn matches(&self, failed: bool, elapsed_ms: i64) -> bool {
        match self {
            StatKind::ErrorRate => failed,
            StatKind::SlowRate { slow_threshold_ms } => elapsed_ms >= *slow_threshold_ms,
        }
    }
}

/// Threshold test over a window snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Detector {
    /// `matched / total >= ratio`
    Ratio(f64),
    /// `matched >= count`
    Count(i64),
}

impl Detector {
    /// Ratio detectors stay quiet until the window holds `minimum_calls` calls
    pub fn detect(&self, stats: WindowStats, minimum_calls: i64) -> bool {
        match *self {
            Detector::Ratio(ratio) => {
                stats.total > 0 && stats.total >= minimum_calls && float_gte(stats.ratio(), ratio)
            }
            Detector::Count(count) => stats.matched >= count,
        }
    }
}

/// Configuration for one collector (and so one sub-breaker)
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    pub kind: StatKind,
    /// Length of the sliding window
    pub window_interval_ms: u64,
    /// Number of buckets the window is split into
    pub bucket_count: u32,
    /// Ratio threshold (0.0-1.0)
    pub ratio: Option<f64>,
    /// Absolute match-count threshold
    pub absolute_threshold: Option<i64>,
    /// Minimum calls in the window before the ratio is evaluated
    pub minimum_calls: i64,
}

impl CollectorConfig {
    /// Error-rate collector with no detector set yet
    pub fn error_rate(window_interval_ms: u64, bucket_count: u32) -> Self {
        Self {
            kind: StatKind::ErrorRate,
            window_interval_ms,
            bucket_count,
            ratio: None,
            absolute_threshold: None,
            minimum_calls: 0,
        }
    }

    /// Slow-call collector with no detector set yet
    pub fn slow_rate(slow_threshold_ms: i64, window_interval_ms: u64, bucket_count: u32) -> Self {
        Self {
            kind: StatKind::SlowRate { slow_threshold_ms },
            ..Self::error_rate(window_interval_ms, bucket_count)
        }
    }

    pub fn ratio(mut self, ratio: f64) -> Self {
        self.ratio = Some(ratio);
        self
    }

    pub fn absolute_threshold(mut self, threshold: i64) -> Self {
        self.absolute_threshold = Some(threshold);
        self
    }

    pub fn minimum_calls(mut self, calls: i64) -> Self {
        self.minimum_calls = calls;
        self
    }

    fn detectors(&self) -> Result<Vec<Detector>, ConfigError> {
        let mut detectors = Vec::with_capacity(2);

        if let Some(ratio) = self.ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ConfigError::InvalidRatio(ratio));
            }
            detectors.push(Detector::Ratio(ratio));
        }
        if let Some(threshold) = self.absolute_threshold {
            if threshold < 1 {
                return Err(ConfigError::InvalidThreshold(threshold));
            }
            detectors.push(Detector::Count(threshold));
        }

        if detectors.is_empty() {
            return Err(ConfigError::MissingDetector {
                collector: self.kind.name(),
            });
        }
        Ok(detectors)
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self::error_rate(60_000, 60).absolute_threshold(5)
    }
}

/// Signal produced for every recorded call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// This call matched (failed, or was slow)
    pub matched: bool,
    /// The window as a whole crossed a detector threshold
    pub threshold_reached: bool,
}

/// Counts calls into a sliding window and evaluates detectors
#[derive(Debug)]
pub struct StatCollector {
    kind: StatKind,
    ring: TimeRing,
    detectors: Vec<Detector>,
    minimum_calls: i64,
    clock: Arc<dyn Clock>,
}

impl StatCollector {
    pub fn new(config: &CollectorConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let detectors = config.detectors()?;
        let ring = TimeRing::new(config.window_interval_ms, config.bucket_count)?;

        Ok(Self {
            kind: config.kind,
            ring,
            detectors,
            minimum_calls: config.minimum_calls,
            clock,
        })
    }

    pub fn kind(&self) -> StatKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn ring(&self) -> &TimeRing {
        &self.ring
    }

    /// Current window totals
    pub fn stats(&self) -> WindowStats {
        self.ring.snapshot()
    }

    /// Drop all recorded calls
    pub fn clear(&self) {
        self.ring.clear();
    }

    /// Count a finished call that started at `start_ms` and ran for `elapsed_ms`
    pub fn record(&self, start_ms: i64, elapsed_ms: i64, failed: bool) -> Verdict {
        let matched = self.kind.matches(failed, elapsed_ms);
        self.ring.record(start_ms, matched);

        let stats = self.ring.snapshot();
        let threshold_reached = self
            .detectors
            .iter()
            .any(|detector| detector.detect(stats, self.minimum_calls));

        Verdict {
            matched,
            threshold_reached,
        }
    }

    /// Wrap `f` so that its outcome is recorded and reported to `on_result`
    ///
    /// The wrapped closure returns exactly what `f` returns. `on_result` runs
    /// before that value is handed back.
    ///
    /// # Example
    ///
    /// ```rust
    /// use guard_machines::{CollectorConfig, ManualClock, StatCollector};
    /// use std::sync::Arc;
    ///
    /// let config = CollectorConfig::error_rate(1_000, 10).absolute_threshold(1);
    /// let collector = StatCollector::new(&config, Arc::new(ManualClock::new(0))).unwrap();
    ///
    /// let wrapped = collector.wrap(|| Err::<(), _>("down"), |verdict| {
    ///     assert!(verdict.matched && verdict.threshold_reached);
    /// });
    /// assert_eq!(wrapped(), Err("down"));
    /// ```
    pub fn wrap<F, R, T, E>(&self, f: F, on_result: R) -> impl FnOnce() -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        R: FnOnce(Verdict),
    {
        move || {
            let start = self.clock.now_ms();
            let result = f();
            let elapsed = self.clock.now_ms() - start;

            on_result(self.record(start, elapsed, result.is_err()));
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn collector(config: CollectorConfig) -> (StatCollector, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000));
        let collector = StatCollector::new(&config, clock.clone()).unwrap();
        (collector, clock)
    }

    #[test]
    fn test_float_gte_tolerance() {
        assert!(float_gte(0.5, 0.5));
        assert!(float_gte(1.0 / 3.0, 0.333_333_333_3));
        assert!(float_gte(0.6, 0.5));
        assert!(!float_gte(0.49, 0.5));
    }

    #[test]
    fn test_config_requires_a_detector() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));

        let err = StatCollector::new(&CollectorConfig::error_rate(1000, 10), clock.clone())
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingDetector {
                collector: "error_rate"
            }
        );

        let err = StatCollector::new(&CollectorConfig::error_rate(1000, 10).ratio(1.5), clock)
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidRatio(1.5));
    }

    #[test]
    fn test_config_rejects_non_positive_threshold() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));

        for threshold in [0, -3] {
            let config = CollectorConfig::error_rate(1000, 10).absolute_threshold(threshold);
            assert_eq!(
                StatCollector::new(&config, clock.clone()).unwrap_err(),
                ConfigError::InvalidThreshold(threshold)
            );
        }

        let config = CollectorConfig::error_rate(1000, 10).absolute_threshold(1);
        assert!(StatCollector::new(&config, clock).is_ok());
    }

    #[test]
    fn test_ratio_reached_exactly_on_crossing_call() {
        let (collector, clock) = collector(CollectorConfig::error_rate(1000, 10).ratio(0.5));

        for _ in 0..5 {
            let verdict = collector.record(clock.now_ms(), 0, false);
            assert!(!verdict.threshold_reached);
            clock.advance(10);
        }

        for i in 0..5 {
            let verdict = collector.record(clock.now_ms(), 0, true);
            assert!(verdict.matched);
            assert_eq!(verdict.threshold_reached, i == 4, "call {}", i + 6);
            clock.advance(10);
        }

        assert_eq!(collector.stats(), WindowStats { matched: 5, total: 10 });
    }

    #[test]
    fn test_count_detector() {
        let (collector, clock) = collector(CollectorConfig::error_rate(1000, 10).absolute_threshold(3));

        for _ in 0..20 {
            assert!(!collector.record(clock.now_ms(), 0, false).threshold_reached);
        }
        assert!(!collector.record(clock.now_ms(), 0, true).threshold_reached);
        assert!(!collector.record(clock.now_ms(), 0, true).threshold_reached);
        assert!(collector.record(clock.now_ms(), 0, true).threshold_reached);
    }

    #[test]
    fn test_either_detector_triggers() {
        let (collector, clock) = collector(
            CollectorConfig::error_rate(1000, 10)
                .ratio(0.9)
                .absolute_threshold(2),
        );

        collector.record(clock.now_ms(), 0, false);
        collector.record(clock.now_ms(), 0, false);
        assert!(!collector.record(clock.now_ms(), 0, true).threshold_reached);
        // 2 of 4 is far below 0.9, but the count detector fires
        assert!(collector.record(clock.now_ms(), 0, true).threshold_reached);
    }

    #[test]
    fn test_minimum_calls_gates_ratio() {
        let (collector, clock) = collector(
            CollectorConfig::error_rate(1000, 10)
                .ratio(0.5)
                .minimum_calls(4),
        );

        assert!(!collector.record(clock.now_ms(), 0, true).threshold_reached);
        assert!(!collector.record(clock.now_ms(), 0, true).threshold_reached);
        assert!(!collector.record(clock.now_ms(), 0, true).threshold_reached);
        assert!(collector.record(clock.now_ms(), 0, true).threshold_reached);
    }

    #[test]
    fn test_slow_rate_matches_on_elapsed() {
        let (collector, clock) = collector(CollectorConfig::slow_rate(200, 1000, 10).ratio(0.5));

        let fast = collector.wrap(|| Ok::<_, &str>("fast"), |verdict| {
            assert!(!verdict.matched);
            assert!(!verdict.threshold_reached);
        });
        assert_eq!(fast(), Ok("fast"));

        let slow = collector.wrap(
            || {
                clock.advance(250);
                Err::<&str, _>("slow but failed")
            },
            |verdict| {
                assert!(verdict.matched);
                assert!(verdict.threshold_reached);
            },
        );
        assert_eq!(slow(), Err("slow but failed"));
    }

    #[test]
    fn test_slow_call_recorded_in_start_bucket() {
        let (collector, clock) = collector(CollectorConfig::slow_rate(100, 1000, 10).ratio(0.5));
        let start = clock.now_ms();

        let slow = collector.wrap(
            || {
                clock.advance(350);
                Ok::<_, ()>(())
            },
            |_| {},
        );
        slow().unwrap();

        let index = collector.ring().current_index(start).unwrap();
        assert_eq!(collector.ring().bucket(index).unwrap().match_count(), 1);
    }

    #[test]
    fn test_wrap_reports_before_returning() {
        let (collector, _clock) = collector(CollectorConfig::error_rate(1000, 10).absolute_threshold(1));
        let reported = std::cell::Cell::new(false);

        let wrapped = collector.wrap(|| Err::<(), _>(42), |verdict| {
            assert!(verdict.matched);
            reported.set(true);
        });

        assert_eq!(wrapped(), Err(42));
        assert!(reported.get());
    }
}
