mod human;
mod json;

use std::time::Duration;

use rpcbench_lib::histogram::HistogramSnapshot;

pub use self::{human::HumanReporter, json::JsonlReporter};

/// Percentiles of the final report.
pub const PERCENTILES: [f64; 6] = [50., 90., 95., 99., 99.9, 100.];

pub trait Reporter: Send + Sync + 'static {
    /// Called once per report interval with what was recorded during it.
    fn on_interval(&mut self, phase: Phase, now: Duration, interval: &HistogramSnapshot);
    fn finish(&mut self, summary: &Summary<'_>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Warmup,
    Main,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warmup => "warmup",
            Self::Main => "main",
        }
    }
}

/// The measured run as a whole.
#[derive(Debug)]
pub struct Summary<'a> {
    pub channels: usize,
    pub outstanding_rpcs: usize,
    pub client_payload: usize,
    pub server_payload: usize,
    pub histogram: &'a HistogramSnapshot,
    pub elapsed: Duration,
    pub failures: u64,
}

impl Summary<'_> {
    pub fn qps(&self) -> f64 {
        rate(self.histogram.count(), self.elapsed)
    }

    /// `(percentile, value)` pairs of [`PERCENTILES`].
    pub fn percentiles(&self) -> impl Iterator<Item = (f64, u64)> + '_ {
        PERCENTILES
            .into_iter()
            .map(|p| (p, self.histogram.value_at_quantile(p / 100.)))
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0. { 0. } else { count as f64 / secs }
}
