use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing,
};

use super::{ConnectionPool, DriverShutdown, WorkloadDriver, WorkloadSpec};
use crate::{
    config::LoadScenarioConfig,
    histogram::{HistogramSnapshot, LatencyRecorder},
    proto::ClientStats,
    utils::{os::UsageWindow, rt::ScenarioRuntime},
};

/// How long [`ClientScenario::stop`] waits for in-flight calls to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of [`ClientScenario::mark`].
#[derive(Debug, Clone)]
pub struct ClientMark {
    /// Values recorded since the previous mark.
    pub interval: HistogramSnapshot,
    /// Values recorded since the window started.
    pub window: HistogramSnapshot,
    pub elapsed_secs: f64,
    pub cpu_secs: f64,
}

impl ClientMark {
    /// Latencies cover the interval since the previous mark, whatever
    /// `reset` was; elapsed and CPU time cover the current window.
    pub fn to_stats(&self, resolution: f64) -> ClientStats {
        ClientStats {
            latencies: Some(self.interval.to_histogram_data(resolution)),
            time_elapsed: self.elapsed_secs,
            // user and system time are not told apart
            time_user: self.cpu_secs,
            time_system: 0.,
        }
    }
}

#[derive(Debug)]
struct StatsWindow {
    histogram: HistogramSnapshot,
    usage: UsageWindow,
}

/// A load generating client running on its own runtime.
///
/// Lanes start as soon as the scenario is created and run until
/// [`ClientScenario::stop`] or drop.
#[derive(Debug)]
pub struct ClientScenario {
    recorder: Arc<LatencyRecorder>,
    shutdown: DriverShutdown,
    driver: Mutex<Option<WorkloadDriver>>,
    window: Mutex<StatsWindow>,
    resolution: f64,
    // dropping it shuts the scenario's tasks down
    _runtime: ScenarioRuntime,
}

impl ClientScenario {
    pub async fn start(config: &LoadScenarioConfig) -> Result<Self, BoxError> {
        let load_model = config.load_model()?;
        let recorder = Arc::new(LatencyRecorder::new(config.histogram)?);
        let runtime = ScenarioRuntime::new("client", config.thread_count())?;

        let pool = runtime
            .spawn({
                let config = config.clone();
                async move { ConnectionPool::connect(&config).await }
            })
            .await
            .context("join connect task")??;

        let spec = WorkloadSpec {
            rpc_shape: config.rpc_shape,
            request: config.request(),
            load_model,
            lane_count: config.lane_count(),
        };
        let driver = WorkloadDriver::start_on(runtime.handle(), pool, spec, recorder.clone())?;

        tracing::info!(
            targets = config.targets.len(),
            channels = config.channels,
            lanes = driver.lane_count(),
            rpc_shape = ?config.rpc_shape,
            load = ?config.load,
            "benchmark client started",
        );

        let window = StatsWindow {
            histogram: HistogramSnapshot::empty(config.histogram)?,
            usage: UsageWindow::start(),
        };

        Ok(Self {
            recorder,
            shutdown: driver.shutdown_handle(),
            driver: Mutex::new(Some(driver)),
            window: Mutex::new(window),
            resolution: config.resolution,
            _runtime: runtime,
        })
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Collect what was recorded since the previous mark into the window.
    /// `reset` starts a new window once the current one is returned.
    pub fn mark(&self, reset: bool) -> Result<ClientMark, BoxError> {
        let mut window = self.window.lock();
        let interval = self.recorder.snapshot_and_reset()?;
        window.histogram.merge(&interval)?;

        let mark = ClientMark {
            interval,
            window: window.histogram.clone(),
            elapsed_secs: window.usage.elapsed_secs(),
            cpu_secs: window.usage.cpu_secs(),
        };
        if reset {
            *window = StatsWindow {
                histogram: HistogramSnapshot::empty(self.recorder.config())?,
                usage: UsageWindow::start(),
            };
        }
        Ok(mark)
    }

    /// The statistics a benchmark driver asks for. Samples are reported
    /// by exactly one mark.
    pub fn stats(&self, reset: bool) -> Result<ClientStats, BoxError> {
        Ok(self.mark(reset)?.to_stats(self.resolution))
    }

    /// RPCs that failed since the scenario started.
    pub fn failure_count(&self) -> u64 {
        self.shutdown.failure_count()
    }

    /// Ask all lanes to stop. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_shutdown()
    }

    /// Shut down and wait, bounded, for in-flight calls to drain.
    pub async fn stop(&self) {
        self.shutdown();
        let Some(driver) = self.driver.lock().take() else {
            return;
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, driver.join()).await.is_err() {
            tracing::warn!("benchmark client lanes did not drain in time");
        }
        tracing::info!("benchmark client stopped");
    }
}

impl Drop for ClientScenario {
    fn drop(&mut self) {
        self.shutdown();
    }
}
