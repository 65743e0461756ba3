use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use rama::error::{BoxError, ErrorContext as _};

use super::{BucketLayout, HistogramSnapshot};

/// Ticks per half distance used for the percentile distribution table.
const PERCENTILE_TICKS: u32 = 5;

impl HistogramSnapshot {
    /// Write the HdrHistogram percentile distribution text format.
    ///
    /// Values are divided by `scale` before printing, e.g. `1000.` to
    /// print microsecond values as milliseconds.
    pub fn write_percentile_distribution<W: Write>(&self, mut w: W, scale: f64) -> std::io::Result<()> {
        let precision = usize::from(self.config.precision);

        writeln!(
            w,
            "{:>12} {:>14} {:>10} {:>14}\n",
            "Value", "Percentile", "TotalCount", "1/(1-Percentile)"
        )?;

        let mut total = 0u64;
        for v in self.histogram.iter_quantiles(PERCENTILE_TICKS) {
            total += v.count_since_last_iteration();
            let value = v.value_iterated_to() as f64 / scale;
            let quantile = v.quantile_iterated_to();
            if quantile < 1. {
                writeln!(
                    w,
                    "{value:12.precision$} {quantile:2.12} {total:10} {:14.2}",
                    1. / (1. - quantile)
                )?;
            } else {
                writeln!(w, "{value:12.precision$} {quantile:2.12} {total:10}")?;
            }
        }

        writeln!(
            w,
            "#[Mean    = {:12.precision$}, StdDeviation   = {:12.precision$}]",
            self.mean() / scale,
            self.stdev() / scale,
        )?;
        writeln!(
            w,
            "#[Max     = {:12.precision$}, Total count    = {:12}]",
            self.max_seen() as f64 / scale,
            self.count(),
        )?;
        writeln!(
            w,
            "#[Buckets = {:12}, SubBuckets     = {:12}]",
            self.histogram.buckets(),
            BucketLayout::new(self.config.max_value, self.config.precision).sub_bucket_count(),
        )?;
        w.flush()
    }

    /// Save the percentile distribution to `path`, replacing any existing file.
    pub fn save(&self, path: &Path, scale: f64) -> Result<(), BoxError> {
        let file = File::create(path)
            .context("create histogram file")
            .with_context_debug_field("path", || path.to_owned())?;
        self.write_percentile_distribution(BufWriter::new(file), scale)
            .context("write histogram file")
            .with_context_debug_field("path", || path.to_owned())
    }
}
