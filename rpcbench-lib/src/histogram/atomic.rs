use std::sync::atomic::{AtomicU64, Ordering};

use hdrhistogram::Histogram;
use rama::error::{BoxError, ErrorContext as _};

/// Logarithmic bucket layout, identical to the one used by HdrHistogram
/// for a lowest trackable value of 1.
///
/// Every power of two range is split in `sub_bucket_half_count` linear
/// sub buckets, which bounds the relative quantization error by the
/// configured number of significant decimal digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct BucketLayout {
    sub_bucket_half_count_magnitude: u32,
    sub_bucket_half_count: usize,
    sub_bucket_mask: u64,
    leading_zero_count_base: u32,
    counts_len: usize,
}

impl BucketLayout {
    pub(super) fn new(max_value: u64, precision: u8) -> Self {
        let largest_single_unit_resolution = 2 * 10u64.pow(u32::from(precision));
        let sub_bucket_count_magnitude = u64::BITS - (largest_single_unit_resolution - 1).leading_zeros();
        let sub_bucket_half_count_magnitude = sub_bucket_count_magnitude.saturating_sub(1);
        let sub_bucket_count = 1u64 << sub_bucket_count_magnitude;
        let sub_bucket_half_count = (sub_bucket_count / 2) as usize;

        let mut smallest_untrackable_value = sub_bucket_count;
        let mut buckets_needed = 1usize;
        while smallest_untrackable_value <= max_value {
            if smallest_untrackable_value > u64::MAX / 2 {
                buckets_needed += 1;
                break;
            }
            smallest_untrackable_value <<= 1;
            buckets_needed += 1;
        }

        Self {
            sub_bucket_half_count_magnitude,
            sub_bucket_half_count,
            sub_bucket_mask: sub_bucket_count - 1,
            leading_zero_count_base: u64::BITS - sub_bucket_count_magnitude,
            counts_len: (buckets_needed + 1) * sub_bucket_half_count,
        }
    }

    /// Linear sub buckets per power of two range.
    pub(super) fn sub_bucket_count(&self) -> usize {
        self.sub_bucket_half_count * 2
    }

    #[inline]
    pub(super) fn counts_len(&self) -> usize {
        self.counts_len
    }

    #[inline]
    pub(super) fn index_of(&self, value: u64) -> usize {
        let bucket_index = self.leading_zero_count_base - (value | self.sub_bucket_mask).leading_zeros();
        let sub_bucket_index = (value >> bucket_index) as usize;
        ((bucket_index as usize + 1) << self.sub_bucket_half_count_magnitude) + sub_bucket_index
            - self.sub_bucket_half_count
    }

    pub(super) fn value_from_index(&self, index: usize) -> u64 {
        let mut bucket_index = (index >> self.sub_bucket_half_count_magnitude) as i64 - 1;
        let mut sub_bucket_index = (index & (self.sub_bucket_half_count - 1)) + self.sub_bucket_half_count;
        if bucket_index < 0 {
            sub_bucket_index -= self.sub_bucket_half_count;
            bucket_index = 0;
        }
        (sub_bucket_index as u64) << bucket_index
    }
}

/// Histogram whose counters can be incremented from any number of threads.
///
/// Recording never takes a lock. Draining is only correct once no writer
/// is still recording into this instance, which the owning recorder
/// guarantees by swapping it out first.
#[derive(Debug)]
pub(super) struct AtomicHistogram {
    layout: BucketLayout,
    max_value: u64,
    counts: Box<[AtomicU64]>,
    total: AtomicU64,
}

impl AtomicHistogram {
    pub(super) fn new(layout: BucketLayout, max_value: u64) -> Self {
        Self {
            layout,
            max_value,
            counts: (0..layout.counts_len()).map(|_| AtomicU64::new(0)).collect(),
            total: AtomicU64::new(0),
        }
    }

    /// Values outside `[1, max_value]` saturate to the nearest bound.
    #[inline]
    pub(super) fn record(&self, value: u64) {
        let value = value.clamp(1, self.max_value);
        let index = self.layout.index_of(value);
        self.counts[index].fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Move all counts into `target`, leaving this histogram empty.
    pub(super) fn drain_into(&self, target: &mut Histogram<u64>) -> Result<u64, BoxError> {
        let mut drained = 0;
        for (index, counter) in self.counts.iter().enumerate() {
            let count = counter.swap(0, Ordering::AcqRel);
            if count == 0 {
                continue;
            }
            let value = self.layout.value_from_index(index);
            target
                .record_n(value, count)
                .context("record drained bucket")
                .context_debug_field("value", value)?;
            drained += count;
        }
        self.total.fetch_sub(drained, Ordering::AcqRel);
        Ok(drained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_roundtrips_bucket_starts() {
        let layout = BucketLayout::new(60_000_000_000, 3);
        for value in [1, 2, 1023, 1024, 2047, 2048, 3000, 1_000_000, 59_999_999_999] {
            let index = layout.index_of(value);
            assert!(index < layout.counts_len(), "value {value} out of range");
            let start = layout.value_from_index(index);
            assert!(start <= value);
            // relative quantization error is bounded by the precision
            assert!((value - start) as f64 <= value as f64 / 1000.);
        }
    }

    #[test]
    fn test_layout_is_monotonic() {
        let layout = BucketLayout::new(1_000_000, 2);
        let mut last = 0;
        for value in 1..200_000u64 {
            let index = layout.index_of(value);
            assert!(index >= last);
            last = index;
        }
    }

    #[test]
    fn test_record_saturates_out_of_range_values() {
        let layout = BucketLayout::new(1_000, 2);
        let histogram = AtomicHistogram::new(layout, 1_000);
        histogram.record(0);
        histogram.record(5_000);
        assert_eq!(histogram.total(), 2);

        let mut target = Histogram::new_with_bounds(1, 1_000, 2).unwrap();
        assert_eq!(histogram.drain_into(&mut target).unwrap(), 2);
        assert_eq!(target.len(), 2);
        assert_eq!(target.min_nz(), 1);
        assert!(target.max() >= 1_000);
        assert_eq!(histogram.total(), 0);
    }
}
