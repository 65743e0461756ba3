//! Latency recording for benchmark lanes.
//!
//! Lanes record into a [`LatencyRecorder`] without taking any lock.
//! Readers periodically call [`LatencyRecorder::snapshot_and_reset`] which
//! swaps the active buffer and drains it into an immutable
//! [`HistogramSnapshot`].

use std::{
    sync::{
        Arc,
        atomic::{Ordering, fence},
    },
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use rama::error::{BoxError, ErrorContext as _, OpaqueError};

use crate::proto;

mod atomic;
use self::atomic::{AtomicHistogram, BucketLayout};

mod report;

/// Smallest bucket growth ratio accepted by [`HistogramSnapshot::to_bucketed_report`].
pub const MIN_RESOLUTION: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyUnit {
    Nanos,
    Micros,
}

impl LatencyUnit {
    #[inline]
    pub fn from_duration(self, d: Duration) -> u64 {
        let value = match self {
            Self::Nanos => d.as_nanos(),
            Self::Micros => d.as_micros(),
        };
        u64::try_from(value).unwrap_or(u64::MAX)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nanos => "ns",
            Self::Micros => "µs",
        }
    }
}

/// Value range and precision of a latency recorder.
///
/// Client and server sides of one benchmark must use the same settings
/// for their reports to be comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramConfig {
    pub unit: LatencyUnit,
    pub max_value: u64,
    /// Significant decimal digits, `0..=5`.
    pub precision: u8,
}

impl HistogramConfig {
    /// Worker scenarios: nanoseconds up to one minute.
    pub const WORKER: Self = Self {
        unit: LatencyUnit::Nanos,
        max_value: 60_000_000_000,
        precision: 3,
    };

    /// Standalone qps client: microseconds up to one minute.
    pub const QPS: Self = Self {
        unit: LatencyUnit::Micros,
        max_value: 60_000_000,
        precision: 2,
    };

    fn new_histogram(&self) -> Result<Histogram<u64>, BoxError> {
        Histogram::new_with_bounds(1, self.max_value, self.precision)
            .context("create latency histogram")
            .context_debug_field("max_value", self.max_value)
            .context_debug_field("precision", self.precision)
    }
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self::WORKER
    }
}

#[derive(Debug)]
struct SwapState {
    spare: Option<Arc<AtomicHistogram>>,
    interval_start: Instant,
}

/// Concurrent latency recorder with an active/interval double buffer.
#[derive(Debug)]
pub struct LatencyRecorder {
    config: HistogramConfig,
    layout: BucketLayout,
    active: ArcSwap<AtomicHistogram>,
    swap: Mutex<SwapState>,
}

impl LatencyRecorder {
    pub fn new(config: HistogramConfig) -> Result<Self, BoxError> {
        if config.precision > 5 {
            return Err(OpaqueError::from_display(format!(
                "histogram precision must be within 0..=5, got {}",
                config.precision
            ))
            .into());
        }
        // validates the bounds once, the same way every snapshot is created
        config.new_histogram()?;

        let layout = BucketLayout::new(config.max_value, config.precision);
        Ok(Self {
            config,
            layout,
            active: ArcSwap::from_pointee(AtomicHistogram::new(layout, config.max_value)),
            swap: Mutex::new(SwapState {
                spare: None,
                interval_start: Instant::now(),
            }),
        })
    }

    pub fn config(&self) -> HistogramConfig {
        self.config
    }

    /// Record one latency value, expressed in the recorder unit.
    ///
    /// Values outside `[1, max_value]` saturate to the closest bound.
    #[inline]
    pub fn record(&self, value: u64) {
        self.active.load().record(value);
    }

    #[inline]
    pub fn record_elapsed(&self, elapsed: Duration) {
        self.record(self.config.unit.from_duration(elapsed));
    }

    /// Retrieve all values recorded since the previous call and start
    /// a new interval.
    ///
    /// A value recorded concurrently with the swap lands in exactly one
    /// of the two intervals.
    pub fn snapshot_and_reset(&self) -> Result<HistogramSnapshot, BoxError> {
        let mut state = self.swap.lock();

        let fresh = state
            .spare
            .take()
            .unwrap_or_else(|| Arc::new(AtomicHistogram::new(self.layout, self.config.max_value)));
        let retired = self.active.swap(fresh);
        let end = Instant::now();
        let start = std::mem::replace(&mut state.interval_start, end);

        // writers that loaded the retired buffer before the swap hold a
        // strong reference until their record call returns
        while Arc::strong_count(&retired) > 1 {
            std::thread::yield_now();
        }
        fence(Ordering::Acquire);

        let mut histogram = self.config.new_histogram()?;
        retired.drain_into(&mut histogram)?;
        debug_assert_eq!(retired.total(), 0);
        state.spare = Some(retired);

        Ok(HistogramSnapshot {
            histogram,
            config: self.config,
            start,
            end,
        })
    }
}

/// Immutable view of the values recorded during one or more intervals.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    histogram: Histogram<u64>,
    config: HistogramConfig,
    start: Instant,
    end: Instant,
}

impl HistogramSnapshot {
    /// An empty snapshot covering the window starting now.
    pub fn empty(config: HistogramConfig) -> Result<Self, BoxError> {
        let now = Instant::now();
        Ok(Self {
            histogram: config.new_histogram()?,
            config,
            start: now,
            end: now,
        })
    }

    pub fn config(&self) -> HistogramConfig {
        self.config
    }

    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Sum of all values, derived as `mean * count`.
    pub fn sum(&self) -> f64 {
        self.histogram.mean() * self.count() as f64
    }

    pub fn sum_of_squares(&self) -> f64 {
        self.histogram
            .iter_recorded()
            .map(|v| {
                let value = self.histogram.median_equivalent(v.value_iterated_to()) as f64;
                value * value * v.count_at_value() as f64
            })
            .sum()
    }

    pub fn mean(&self) -> f64 {
        self.histogram.mean()
    }

    pub fn stdev(&self) -> f64 {
        self.histogram.stdev()
    }

    /// Smallest non zero value, `0` when empty.
    pub fn min_seen(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.histogram.min_nz()
        }
    }

    pub fn max_seen(&self) -> u64 {
        self.histogram.max()
    }

    pub fn value_at_quantile(&self, quantile: f64) -> u64 {
        self.histogram.value_at_quantile(quantile)
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn end(&self) -> Instant {
        self.end
    }

    pub fn elapsed(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }

    /// Fold a later snapshot into this one, extending the covered window.
    pub fn merge(&mut self, other: &Self) -> Result<(), BoxError> {
        self.histogram
            .add(&other.histogram)
            .context("merge latency snapshots")?;
        self.start = self.start.min(other.start);
        self.end = self.end.max(other.end);
        Ok(())
    }

    /// Count per geometric step, starting at 1 and growing with
    /// `1 + resolution` until `max_value` is covered.
    ///
    /// The returned vector has the same length for every snapshot of the
    /// same config and resolution, whatever was recorded.
    pub fn to_bucketed_report(&self, resolution: f64) -> Vec<u32> {
        let ratio = 1. + resolution.max(MIN_RESOLUTION);
        let max_value = self.config.max_value as f64;

        let mut buckets = Vec::new();
        let mut boundary = 1.;
        while boundary < max_value {
            buckets.push(0u32);
            boundary *= ratio;
        }
        if self.is_empty() {
            return buckets;
        }

        // boundaries are recomputed per value instead of walking the
        // histogram iterator so that the report shape only depends on
        // ratio and max_value
        for v in self.histogram.iter_recorded() {
            let value = self.histogram.median_equivalent(v.value_iterated_to()).max(1) as f64;
            let index = (value.ln() / ratio.ln()).floor() as usize;
            let index = index.min(buckets.len().saturating_sub(1));
            if let Some(bucket) = buckets.get_mut(index) {
                *bucket = bucket.saturating_add(u32::try_from(v.count_at_value()).unwrap_or(u32::MAX));
            }
        }
        buckets
    }

    pub fn to_histogram_data(&self, resolution: f64) -> proto::HistogramData {
        proto::HistogramData {
            bucket: self.to_bucketed_report(resolution),
            min_seen: self.min_seen() as f64,
            max_seen: self.max_seen() as f64,
            sum: self.sum(),
            sum_of_squares: self.sum_of_squares(),
            count: self.count() as f64,
        }
    }
}
