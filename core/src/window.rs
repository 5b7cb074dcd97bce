//! Sliding time window built from a fixed ring of time-stamped buckets
//!
//! The ring is allocated once. A slot is reused when time wraps back onto it:
//! the first writer that sees a stale epoch claims the slot for the new epoch
//! and zeroes its counters. Nobody ever scans or shifts the ring to evict old
//! data, eviction is paid lazily by the next writer touching the slot.
//!
//! ```text
//!   bucket_length_ms = interval_ms / bucket_count
//!
//!   now = 1_234ms, interval = 1_000ms, 10 buckets
//!   index = (1_234 / 100) % 10 = 2      epoch = 1_200
//!
//!   ┌─────┬─────┬─────┬─────┬─────┬─────┬─────┬─────┬─────┬─────┐
//!   │ 1000│ 1100│ 1200│  300│  400│  500│  600│  700│  800│  900│
//!   └─────┴─────┴──▲──┴─────┴─────┴─────┴─────┴─────┴─────┴─────┘
//!                  └─ current slot; slot 3 still holds epoch 300 until touched
//! ```

use crate::errors::ConfigError;
use std::sync::atomic::{AtomicI64, Ordering};

/// Stamp of a bucket that has never been claimed
const UNSET: i64 = i64::MIN;
/// Stamp held while the claiming writer zeroes the counters
const CLAIMING: i64 = i64::MIN + 1;

/// One slot of the ring
#[derive(Debug)]
pub struct Bucket {
    start_ms: AtomicI64,
    match_count: AtomicI64,
    total_count: AtomicI64,
}

impl Bucket {
    fn new() -> Self {
        Self {
            start_ms: AtomicI64::new(UNSET),
            match_count: AtomicI64::new(0),
            total_count: AtomicI64::new(0),
        }
    }

    /// Epoch currently stamped on this bucket, if it has been claimed
    pub fn start_ms(&self) -> Option<i64> {
        match self.start_ms.load(Ordering::Acquire) {
            UNSET | CLAIMING => None,
            epoch => Some(epoch),
        }
    }

    pub fn match_count(&self) -> i64 {
        self.match_count.load(Ordering::Acquire)
    }

    pub fn total_count(&self) -> i64 {
        self.total_count.load(Ordering::Acquire)
    }

    /// Zero both counters, keeping the stamped epoch
    pub fn reset(&self) {
        self.match_count.store(0, Ordering::Release);
        self.total_count.store(0, Ordering::Release);
    }

    /// Total first so that `match <= total` holds for readers loading match first
    fn add(&self, matched: bool) {
        self.total_count.fetch_add(1, Ordering::AcqRel);
        if matched {
            self.match_count.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// Window-wide totals at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    pub matched: i64,
    pub total: i64,
}

impl WindowStats {
    /// `matched / total`, or 0.0 for an empty window
    pub fn ratio(&self) -> f64 {
        if self.total > 0 {
            self.matched as f64 / self.total as f64
        } else {
            0.0
        }
    }
}

/// Fixed ring of buckets covering `interval_ms`
///
/// # Example
///
/// ```rust
/// use guard_machines::TimeRing;
///
/// let ring = TimeRing::new(1_000, 10).unwrap();
/// ring.record(120, true);
/// ring.record(180, false);
///
/// let stats = ring.snapshot();
/// assert_eq!((stats.matched, stats.total), (1, 2));
/// ```
#[derive(Debug)]
pub struct TimeRing {
    interval_ms: u64,
    bucket_length_ms: i64,
    buckets: Box<[Bucket]>,
}

impl TimeRing {
    /// Create a ring of `bucket_count` buckets spanning `interval_ms`
    ///
    /// Fails unless `interval_ms` splits evenly into buckets of at least 1ms.
    pub fn new(interval_ms: u64, bucket_count: u32) -> Result<Self, ConfigError> {
        if bucket_count == 0 {
            return Err(ConfigError::ZeroBuckets);
        }
        if interval_ms == 0 || interval_ms % u64::from(bucket_count) != 0 {
            return Err(ConfigError::UnevenWindow {
                interval_ms,
                bucket_count,
            });
        }

        let buckets = (0..bucket_count).map(|_| Bucket::new()).collect();

        Ok(Self {
            interval_ms,
            bucket_length_ms: (interval_ms / u64::from(bucket_count)) as i64,
            buckets,
        })
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket_length_ms(&self) -> i64 {
        self.bucket_length_ms
    }

    pub fn bucket(&self, index: usize) -> Option<&Bucket> {
        self.buckets.get(index)
    }

    /// Slot and epoch a timestamp falls into
    fn locate(&self, now_ms: i64) -> (usize, i64) {
        let slot = now_ms.div_euclid(self.bucket_length_ms);
        let index = slot.rem_euclid(self.buckets.len() as i64) as usize;
        let epoch = now_ms - now_ms.rem_euclid(self.bucket_length_ms);
        (index, epoch)
    }

    /// Resolve the bucket for `now_ms`, rolling the slot over if it holds an older epoch
    ///
    /// Returns `None` when the slot already belongs to a newer epoch, which
    /// means the sample is more than a full interval behind the newest writer
    /// and falls outside the window.
    ///
    /// Rolling a slot over is not wait-free. The writer that claims the slot
    /// marks it `CLAIMING` while it zeroes the counters, and other writers for
    /// that slot yield until the new epoch is stamped, so no increment for
    /// the new epoch lands before the zeroing.
    pub fn current_index(&self, now_ms: i64) -> Option<usize> {
        let (index, epoch) = self.locate(now_ms);
        let bucket = &self.buckets[index];

        loop {
            let stamped = bucket.start_ms.load(Ordering::Acquire);

            if stamped == epoch {
                return Some(index);
            }

            if stamped == CLAIMING {
                // Another writer is zeroing this slot
                std::thread::yield_now();
                continue;
            }

            if stamped == UNSET {
                if bucket
                    .start_ms
                    .compare_exchange(UNSET, epoch, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Some(index);
                }
                continue;
            }

            if stamped < epoch {
                if bucket
                    .start_ms
                    .compare_exchange(stamped, CLAIMING, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    bucket.reset();
                    bucket.start_ms.store(epoch, Ordering::Release);
                    return Some(index);
                }
                std::thread::yield_now();
                continue;
            }

            tracing::warn!(
                stamped_ms = stamped,
                sample_ms = epoch,
                "discarding sample older than the live window"
            );
            return None;
        }
    }

    /// Count one call at `now_ms`. Returns false if the sample was discarded as stale.
    pub fn record(&self, now_ms: i64, matched: bool) -> bool {
        match self.current_index(now_ms) {
            Some(index) => {
                self.buckets[index].add(matched);
                true
            }
            None => false,
        }
    }

    /// Sum of every bucket in the ring
    ///
    /// Slots that time has moved past keep their counts until a writer claims
    /// them again.
    pub fn snapshot(&self) -> WindowStats {
        let mut stats = WindowStats::default();
        for bucket in self.buckets.iter() {
            let matched = bucket.match_count();
            let total = bucket.total_count();
            // A concurrent rollover can zero total between the two loads
            stats.matched += matched.min(total);
            stats.total += total;
        }
        stats
    }

    /// Forget everything: every bucket back to unclaimed and zeroed
    pub fn clear(&self) {
        for bucket in self.buckets.iter() {
            bucket.start_ms.store(UNSET, Ordering::Release);
            bucket.reset();
        }
    }
}
