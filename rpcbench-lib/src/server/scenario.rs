use std::time::Duration;

use parking_lot::Mutex;
use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{BenchmarkListener, BenchmarkServer};
use crate::{
    config::{Address, ServerScenarioConfig},
    proto::ServerStats,
    tls,
    utils::{os::UsageWindow, rt::ScenarioRuntime},
};

/// How long [`ServerScenario::stop`] waits for connections to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A benchmark server running on its own runtime.
#[derive(Debug)]
pub struct ServerScenario {
    // dropping it shuts the scenario's tasks down
    _runtime: ScenarioRuntime,
    service: BenchmarkServer,
    local_address: Address,
    stop_accepting: CancellationToken,
    serve: Mutex<Option<JoinHandle<Result<(), BoxError>>>>,
    exited: CancellationToken,
    window: Mutex<UsageWindow>,
}

impl ServerScenario {
    pub async fn start(config: &ServerScenarioConfig) -> Result<Self, BoxError> {
        let tls = config
            .tls
            .as_ref()
            .map(|t| tls::server_tls_config(&t.cert, &t.key))
            .transpose()?;

        let runtime = ScenarioRuntime::new("server", config.thread_count())?;

        let address = config.address.clone();
        let listener = runtime
            .spawn(async move { BenchmarkListener::bind(&address).await })
            .await
            .context("join listener bind task")??;
        let local_address = listener.local_address()?;

        let service = BenchmarkServer::new();
        let stop_accepting = CancellationToken::new();
        let exited = CancellationToken::new();
        let serve = runtime.spawn({
            let service = service.clone();
            let stop = stop_accepting.clone().cancelled_owned();
            let exited = exited.clone();
            async move {
                let result = listener.serve(service, tls, stop).await;
                if let Err(err) = &result {
                    tracing::error!("benchmark server failed: {err}");
                }
                exited.cancel();
                result
            }
        });

        tracing::info!(
            address = %local_address,
            threads = config.thread_count(),
            tls = config.tls.is_some(),
            "benchmark server started",
        );

        Ok(Self {
            _runtime: runtime,
            service,
            local_address,
            stop_accepting,
            serve: Mutex::new(Some(serve)),
            exited,
            window: Mutex::new(UsageWindow::start()),
        })
    }

    pub fn local_address(&self) -> &Address {
        &self.local_address
    }

    /// Bound tcp port, `0` for unix sockets.
    pub fn port(&self) -> u16 {
        self.local_address.port().unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn service(&self) -> &BenchmarkServer {
        &self.service
    }

    /// Usage since the window start; `reset` starts a new window.
    pub fn mark(&self, reset: bool) -> ServerStats {
        let mut window = self.window.lock();
        let stats = ServerStats {
            time_elapsed: window.elapsed_secs(),
            // user and system time are not told apart
            time_user: window.cpu_secs(),
            time_system: 0.,
        };
        if reset {
            *window = UsageWindow::start();
        }
        stats
    }

    /// Fire the kill switch and stop accepting connections. Idempotent.
    pub fn shutdown(&self) {
        self.service.shutdown();
        self.stop_accepting.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.service.is_shutdown()
    }

    /// Shut down and wait, bounded, for open connections to drain.
    pub async fn stop(&self) -> Result<(), BoxError> {
        self.shutdown();
        let Some(serve) = self.serve.lock().take() else {
            return Ok(());
        };

        let result = match tokio::time::timeout(DRAIN_TIMEOUT, serve).await {
            Ok(joined) => joined.context("join benchmark server task")?,
            Err(_) => {
                tracing::warn!(
                    address = %self.local_address,
                    "benchmark server connections did not drain in time",
                );
                Ok(())
            }
        };

        #[cfg(target_family = "unix")]
        if let Address::Unix(path) = &self.local_address
            && let Err(err) = std::fs::remove_file(path)
        {
            tracing::debug!(path = %path.display(), "failed to remove unix socket: {err}");
        }

        tracing::info!(address = %self.local_address, "benchmark server stopped");
        result
    }

    /// Resolves once the server stopped serving, for whatever reason.
    pub async fn closed(&self) {
        self.exited.cancelled().await
    }
}

impl Drop for ServerScenario {
    fn drop(&mut self) {
        self.shutdown();
    }
}
