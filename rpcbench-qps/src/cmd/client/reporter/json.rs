use std::time::Duration;

use rpcbench_lib::histogram::HistogramSnapshot;

use super::{Phase, Reporter, Summary, rate};

pub struct JsonlReporter {
    interval: Duration,
}

impl JsonlReporter {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Reporter for JsonlReporter {
    fn on_interval(&mut self, phase: Phase, now: Duration, interval: &HistogramSnapshot) {
        let line = serde_json::json!({
            "type": "summary",
            "t_ms": now.as_millis(),
            "phase": phase.as_str(),
            "interval_ms": self.interval.as_millis(),
            "qps": rate(interval.count(), self.interval),
            "unit": interval.config().unit.as_str(),
            "count": interval.count(),
            "min": interval.min_seen(),
            "mean": interval.mean(),
            "p50": interval.value_at_quantile(0.5),
            "p99": interval.value_at_quantile(0.99),
            "max": interval.max_seen(),
        });
        println!("{line}");
    }

    fn finish(&mut self, summary: &Summary<'_>) {
        let percentiles: serde_json::Map<_, _> = summary
            .percentiles()
            .map(|(percentile, value)| (format!("p{percentile}"), serde_json::Value::from(value)))
            .collect();

        let line = serde_json::json!({
            "type": "final",
            "channels": summary.channels,
            "outstanding_rpcs": summary.outstanding_rpcs,
            "client_payload": summary.client_payload,
            "server_payload": summary.server_payload,
            "unit": summary.histogram.config().unit.as_str(),
            "elapsed_ms": summary.elapsed.as_millis(),
            "count": summary.histogram.count(),
            "failures": summary.failures,
            "qps": summary.qps(),
            "percentiles": percentiles,
        });
        println!("{line}");
    }
}
