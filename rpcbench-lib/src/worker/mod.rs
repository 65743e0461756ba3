//! Load worker: runs client and server scenarios on behalf of a remote
//! benchmark driver, one of each role per worker process.

use std::{sync::Arc, time::Duration};

use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing,
};
use tokio::{net::TcpListener, sync::mpsc};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming, transport::Server};

use crate::{
    client::ClientScenario,
    config::control,
    proto::{
        ClientArgs, ClientStatus, CoreRequest, CoreResponse, ServerArgs, ServerStatus, Void,
        WorkerService, WorkerServiceServer, client_args, server_args,
    },
    server::ServerScenario,
    tls::TlsFiles,
    utils::env,
};

mod session;
mod status;

pub use self::session::{RoleSlot, SlotClaim, WorkerSession};

use self::status::into_status;

/// Delay between acknowledging `QuitWorker` and quitting.
pub const DEFAULT_QUIT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// PEM files used when a scenario asks for TLS.
    pub tls: TlsFiles,
    /// Port for server scenarios that leave the port unset.
    pub server_port: Option<u16>,
    pub quit_delay: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            tls: TlsFiles::default(),
            server_port: None,
            quit_delay: DEFAULT_QUIT_DELAY,
        }
    }
}

/// The worker control service.
#[derive(Debug, Clone)]
pub struct Worker {
    session: Arc<WorkerSession>,
    options: Arc<WorkerOptions>,
    /// fired by `QuitWorker`, after the grace delay
    quit: CancellationToken,
    /// ends all control streams
    closing: CancellationToken,
}

impl Worker {
    pub fn new(options: WorkerOptions) -> Self {
        Self {
            session: Arc::new(WorkerSession::default()),
            options: Arc::new(options),
            quit: CancellationToken::new(),
            closing: CancellationToken::new(),
        }
    }

    pub fn session(&self) -> &WorkerSession {
        &self.session
    }

    /// Cancelled once the driver asked this worker to quit.
    pub fn quit_token(&self) -> CancellationToken {
        self.quit.clone()
    }

    pub fn into_service(self) -> WorkerServiceServer<Self> {
        WorkerServiceServer::new(self)
    }

    /// Serve the control service on `listener` until `shutdown` resolves.
    ///
    /// Open control streams are closed on shutdown, which stops their
    /// scenarios.
    pub async fn serve(self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<(), BoxError> {
        let address = listener.local_addr().context("control listener local address")?;
        tracing::info!(%address, "worker control service listening");

        let closing = self.closing.clone();
        let shutdown = async move {
            shutdown.await;
            tracing::debug!("worker control service shutting down");
            closing.cancel();
        };

        Server::builder()
            .add_service(self.clone().into_service())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await
            .context("serve worker control service")?;

        self.stop_scenarios().await;
        Ok(())
    }

    /// Stop whatever scenarios are running. The role slots stay occupied.
    pub async fn stop_scenarios(&self) {
        if let Some(client) = self.session.client.get() {
            ClientRole::stop(client).await;
        }
        if let Some(server) = self.session.server.get() {
            ServerRole::stop(server).await;
        }
    }

    /// Drive one control stream. Its scenario is stopped once the driver
    /// closes the stream or the worker shuts down; a rejected message only
    /// ends the stream.
    fn run_control<R: ControlRole>(&self, mut args: Streaming<R::Args>) -> ReceiverStream<Result<R::Reply, Status>> {
        let (tx, rx) = mpsc::channel(4);
        let worker = self.clone();

        tokio::spawn(async move {
            let mut scenario = None;
            loop {
                let next = tokio::select! {
                    _ = worker.closing.cancelled() => break,
                    next = args.message() => next,
                };
                let next = match next {
                    Ok(Some(next)) => next,
                    Ok(None) => {
                        tracing::debug!(role = R::NAME, "control stream closed by driver");
                        break;
                    }
                    Err(status) => {
                        tracing::debug!(role = R::NAME, "control stream failed: {status}");
                        break;
                    }
                };

                match R::handle(&worker, &mut scenario, next).await {
                    Ok(reply) => {
                        if tx.send(Ok(reply)).await.is_err() {
                            break;
                        }
                    }
                    Err(status) => {
                        // the reply stream ends with the error; a running
                        // scenario keeps running until the worker shuts down
                        tracing::warn!(role = R::NAME, "control message rejected: {status}");
                        let _ = tx.send(Err(status)).await;
                        return;
                    }
                }
            }

            if let Some(scenario) = scenario {
                R::stop(scenario).await;
            }
        });

        ReceiverStream::new(rx)
    }
}

/// One of the two scenario roles a driver can set up.
trait ControlRole: Send + 'static {
    const NAME: &'static str;

    type Args: prost::Message + Default + Send + 'static;
    type Reply: Send + 'static;
    type Scenario: Send + Sync + 'static;

    fn handle(
        worker: &Worker,
        scenario: &mut Option<Arc<Self::Scenario>>,
        args: Self::Args,
    ) -> impl Future<Output = Result<Self::Reply, Status>> + Send;

    fn stop(scenario: Arc<Self::Scenario>) -> impl Future<Output = ()> + Send;
}

struct ServerRole;

impl ControlRole for ServerRole {
    const NAME: &'static str = "server";

    type Args = ServerArgs;
    type Reply = ServerStatus;
    type Scenario = ServerScenario;

    async fn handle(
        worker: &Worker,
        scenario: &mut Option<Arc<ServerScenario>>,
        args: ServerArgs,
    ) -> Result<ServerStatus, Status> {
        match args.argtype {
            Some(server_args::Argtype::Setup(setup)) => {
                let claim = worker.session.server.claim()?;
                let config = control::server_scenario_from_proto(&setup, &worker.options.tls, worker.options.server_port)?;
                let started = Arc::new(ServerScenario::start(&config).await.map_err(into_status)?);
                claim.fill(started.clone());

                let reply = ServerStatus {
                    stats: None,
                    port: i32::from(started.port()),
                    cores: core_count(),
                };
                *scenario = Some(started);
                Ok(reply)
            }
            Some(server_args::Argtype::Mark(mark)) => {
                let scenario = scenario
                    .as_ref()
                    .ok_or_else(|| Status::failed_precondition("server mark received before setup"))?;
                Ok(ServerStatus {
                    stats: Some(scenario.mark(mark.reset)),
                    ..Default::default()
                })
            }
            None => Err(Status::invalid_argument("server args carry neither setup nor mark")),
        }
    }

    async fn stop(scenario: Arc<ServerScenario>) {
        if let Err(err) = scenario.stop().await {
            tracing::warn!("benchmark server stopped with error: {err}");
        }
    }
}

struct ClientRole;

impl ControlRole for ClientRole {
    const NAME: &'static str = "client";

    type Args = ClientArgs;
    type Reply = ClientStatus;
    type Scenario = ClientScenario;

    async fn handle(
        worker: &Worker,
        scenario: &mut Option<Arc<ClientScenario>>,
        args: ClientArgs,
    ) -> Result<ClientStatus, Status> {
        match args.argtype {
            Some(client_args::Argtype::Setup(setup)) => {
                let claim = worker.session.client.claim()?;
                let config = control::load_scenario_from_proto(&setup, &worker.options.tls)?;
                let started = Arc::new(ClientScenario::start(&config).await.map_err(into_status)?);
                claim.fill(started.clone());
                *scenario = Some(started);
                Ok(ClientStatus::default())
            }
            Some(client_args::Argtype::Mark(mark)) => {
                let scenario = scenario
                    .as_ref()
                    .ok_or_else(|| Status::failed_precondition("client mark received before setup"))?;
                let stats = scenario.stats(mark.reset).map_err(into_status)?;
                Ok(ClientStatus { stats: Some(stats) })
            }
            None => Err(Status::invalid_argument("client args carry neither setup nor mark")),
        }
    }

    async fn stop(scenario: Arc<ClientScenario>) {
        scenario.stop().await;
    }
}

fn core_count() -> i32 {
    i32::try_from(env::available_cores()).unwrap_or(i32::MAX)
}

#[tonic::async_trait]
impl WorkerService for Worker {
    type RunServerStream = ReceiverStream<Result<ServerStatus, Status>>;

    async fn run_server(
        &self,
        request: Request<Streaming<ServerArgs>>,
    ) -> Result<Response<Self::RunServerStream>, Status> {
        Ok(Response::new(self.run_control::<ServerRole>(request.into_inner())))
    }

    type RunClientStream = ReceiverStream<Result<ClientStatus, Status>>;

    async fn run_client(
        &self,
        request: Request<Streaming<ClientArgs>>,
    ) -> Result<Response<Self::RunClientStream>, Status> {
        Ok(Response::new(self.run_control::<ClientRole>(request.into_inner())))
    }

    async fn core_count(&self, _: Request<CoreRequest>) -> Result<Response<CoreResponse>, Status> {
        Ok(Response::new(CoreResponse { cores: core_count() }))
    }

    async fn quit_worker(&self, _: Request<Void>) -> Result<Response<Void>, Status> {
        let delay = self.options.quit_delay;
        tracing::info!(?delay, "quit requested by driver");

        let quit = self.quit.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            quit.cancel();
        });
        Ok(Response::new(Void {}))
    }
}

#[cfg(test)]
mod tests;
