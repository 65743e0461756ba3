use std::sync::Arc;

use rama::{
    error::{BoxError, ErrorContext as _, OpaqueError},
    telemetry::tracing,
};
use tokio::sync::Semaphore;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use crate::{
    config::{Address, LoadScenarioConfig},
    proto::BenchmarkServiceClient,
    tls,
};

/// One client connection with its concurrency permits.
#[derive(Debug, Clone)]
pub struct Connection<C> {
    pub(super) client: C,
    pub(super) permits: Arc<Semaphore>,
}

impl<C> Connection<C> {
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Permits currently not held by any lane.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Fixed set of connections, opened once and never replaced.
///
/// Every connection bounds its in-flight calls to `outstanding` permits.
#[derive(Debug, Clone)]
pub struct ConnectionPool<C> {
    connections: Vec<Connection<C>>,
    outstanding: usize,
}

impl<C: Clone> ConnectionPool<C> {
    pub fn new(clients: Vec<C>, outstanding: usize) -> Self {
        let outstanding = outstanding.max(1);
        let connections = clients
            .into_iter()
            .map(|client| Connection {
                client,
                permits: Arc::new(Semaphore::new(outstanding)),
            })
            .collect();
        Self {
            connections,
            outstanding,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Round robin assignment of lanes to connections.
    pub fn connection_for_lane(&self, lane: usize) -> Option<Connection<C>> {
        if self.connections.is_empty() {
            return None;
        }
        self.connections.get(lane % self.connections.len()).cloned()
    }

    pub(super) fn permits(&self) -> impl Iterator<Item = &Arc<Semaphore>> {
        self.connections.iter().map(|c| &c.permits)
    }
}

impl ConnectionPool<BenchmarkServiceClient<Channel>> {
    /// Eagerly connect `config.channels` channels, the i-th one to
    /// `targets[i % targets.len()]`.
    pub async fn connect(config: &LoadScenarioConfig) -> Result<Self, BoxError> {
        if config.targets.is_empty() {
            return Err(OpaqueError::from_display("no benchmark targets configured").into());
        }

        let tls = config
            .tls
            .as_ref()
            .map(|t| tls::client_tls_config(&t.ca, t.server_host_override.as_deref()))
            .transpose()?;

        let mut clients = Vec::with_capacity(config.channels);
        for index in 0..config.channels.max(1) {
            let target = &config.targets[index % config.targets.len()];
            let channel = connect_channel(target, tls.clone())
                .await
                .context("connect benchmark channel")
                .with_context_debug_field("target", || target.to_string())?;
            tracing::debug!(%target, index, "benchmark channel connected");
            clients.push(BenchmarkServiceClient::new(channel));
        }

        Ok(Self::new(clients, config.outstanding_per_channel))
    }
}

async fn connect_channel(target: &Address, tls: Option<ClientTlsConfig>) -> Result<Channel, BoxError> {
    match target {
        Address::Inet { .. } => {
            let scheme = if tls.is_some() { "https" } else { "http" };
            let mut endpoint = Endpoint::from_shared(format!("{scheme}://{target}"))?.tcp_nodelay(true);
            if let Some(tls) = tls {
                endpoint = endpoint.tls_config(tls)?;
            }
            Ok(endpoint.connect().await?)
        }
        #[cfg(target_family = "unix")]
        Address::Unix(path) => {
            use hyper_util::rt::TokioIo;
            use tokio::net::UnixStream;

            if tls.is_some() {
                return Err(OpaqueError::from_display("TLS is not supported over unix sockets").into());
            }
            let path = path.clone();
            // the uri is ignored by the connector
            let channel = Endpoint::from_static("http://localhost")
                .connect_with_connector(tower::service_fn(move |_: tonic::transport::Uri| {
                    let path = path.clone();
                    async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
                }))
                .await?;
            Ok(channel)
        }
        #[cfg(not(target_family = "unix"))]
        Address::Unix(_) => Err(OpaqueError::from_display("unix sockets are not supported on this platform").into()),
    }
}
