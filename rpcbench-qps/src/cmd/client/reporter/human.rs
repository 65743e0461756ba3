use std::time::Duration;

use rpcbench_lib::histogram::HistogramSnapshot;

use super::{Phase, Reporter, Summary, rate};

pub struct HumanReporter {
    interval: Duration,
}

impl HumanReporter {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Reporter for HumanReporter {
    fn on_interval(&mut self, phase: Phase, now: Duration, interval: &HistogramSnapshot) {
        let unit = interval.config().unit.as_str();
        println!(
            "t={:.1}s phase={} qps={:.1} count={} p50={}{unit} p99={}{unit} max={}{unit}",
            now.as_secs_f64(),
            phase.as_str(),
            rate(interval.count(), self.interval),
            interval.count(),
            interval.value_at_quantile(0.5),
            interval.value_at_quantile(0.99),
            interval.max_seen(),
        );
    }

    fn finish(&mut self, summary: &Summary<'_>) {
        let unit = summary.histogram.config().unit.as_str();
        println!("Channels:                       {}", summary.channels);
        println!("Outstanding RPCs per Channel:   {}", summary.outstanding_rpcs);
        println!("Server Payload Size:            {}", summary.server_payload);
        println!("Client Payload Size:            {}", summary.client_payload);
        for (percentile, value) in summary.percentiles() {
            let label = if percentile >= 100. {
                format!("Maximum Latency (in {unit}):")
            } else {
                format!("{percentile}%ile Latency (in {unit}):")
            };
            println!("{label:<32}{value}");
        }
        println!("QPS:                            {:.0}", summary.qps());
        println!("Failed RPCs:                    {}", summary.failures);
    }
}
