use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::StreamExt as _;
use rama::{
    error::{BoxError, OpaqueError},
    telemetry::tracing,
};
use tokio::{
    runtime::Handle,
    sync::{OwnedSemaphorePermit, Semaphore, mpsc},
    task::JoinSet,
    time::Instant,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use super::{Connection, ConnectionPool, RpcChannel};
use crate::{
    config::RpcShape,
    histogram::LatencyRecorder,
    load::{LanePacer, LoadModel},
    proto::SimpleRequest,
};

/// What every lane of a driver shares.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub rpc_shape: RpcShape,
    pub request: SimpleRequest,
    pub load_model: LoadModel,
    /// `threads * outstanding_per_channel`.
    pub lane_count: usize,
}

#[derive(Debug)]
struct LaneShared {
    recorder: Arc<LatencyRecorder>,
    request: SimpleRequest,
    shutdown: CancellationToken,
    permits: Vec<Arc<Semaphore>>,
    failures: AtomicU64,
}

impl LaneShared {
    fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::debug!("workload driver shutdown requested");
        }
        self.shutdown.cancel();
        for permits in &self.permits {
            permits.close();
        }
    }

    fn on_failure(&self, lane: usize, status: &Status) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if self.shutdown.is_cancelled() {
            tracing::debug!(lane, "rpc failed during shutdown: {status}");
        } else {
            tracing::info!(lane, "rpc failed: {status}");
        }
    }
}

/// Runs one send loop per lane until shut down.
///
/// Lane `i` uses connection `i % connections`. Individual RPC failures
/// are logged and counted but never stop a lane.
#[derive(Debug)]
pub struct WorkloadDriver {
    handle: Handle,
    connections: usize,
    shared: Arc<LaneShared>,
    lanes: JoinSet<()>,
}

impl WorkloadDriver {
    /// Spawn all lanes on the current runtime.
    pub fn start<C: RpcChannel>(pool: ConnectionPool<C>, spec: WorkloadSpec, recorder: Arc<LatencyRecorder>) -> Result<Self, BoxError> {
        Self::start_on(&Handle::current(), pool, spec, recorder)
    }

    pub fn start_on<C: RpcChannel>(
        handle: &Handle,
        pool: ConnectionPool<C>,
        spec: WorkloadSpec,
        recorder: Arc<LatencyRecorder>,
    ) -> Result<Self, BoxError> {
        if pool.is_empty() {
            return Err(OpaqueError::from_display("workload driver needs at least one connection").into());
        }

        let shared = Arc::new(LaneShared {
            recorder,
            request: spec.request,
            shutdown: CancellationToken::new(),
            permits: pool.permits().cloned().collect(),
            failures: AtomicU64::new(0),
        });

        let mut lanes = JoinSet::new();
        for lane in 0..spec.lane_count.max(1) {
            let Some(connection) = pool.connection_for_lane(lane) else {
                continue;
            };
            let shared = shared.clone();
            let pacer = spec.load_model.lane_pacer();
            match spec.rpc_shape {
                RpcShape::Unary => lanes.spawn_on(unary_lane(lane, connection, shared, pacer), handle),
                RpcShape::Streaming => lanes.spawn_on(streaming_lane(lane, connection, shared, pacer), handle),
            };
        }

        tracing::debug!(
            lanes = lanes.len(),
            connections = pool.len(),
            rpc_shape = ?spec.rpc_shape,
            load_model = ?spec.load_model,
            "workload driver started",
        );

        Ok(Self {
            handle: handle.clone(),
            connections: pool.len(),
            shared,
            lanes,
        })
    }

    pub fn connection_count(&self) -> usize {
        self.connections
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// RPCs that failed since the driver started.
    pub fn failure_count(&self) -> u64 {
        self.shared.failures.load(Ordering::Relaxed)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// A cloneable handle able to shut this driver down.
    pub fn shutdown_handle(&self) -> DriverShutdown {
        DriverShutdown(self.shared.clone())
    }

    /// Ask all lanes to stop. In-flight calls drain; no new call starts.
    ///
    /// Safe to call any number of times, from any thread.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Shut down once `duration` elapsed, unless that happened earlier.
    pub fn shutdown_after(&self, duration: Duration) {
        let shared = self.shared.clone();
        self.handle.spawn(async move {
            tokio::select! {
                _ = shared.shutdown.cancelled() => (),
                _ = tokio::time::sleep(duration) => shared.shutdown(),
            }
        });
    }

    /// Wait for all lanes to exit.
    pub async fn join(mut self) {
        while let Some(result) = self.lanes.join_next().await {
            if let Err(err) = result {
                tracing::warn!("benchmark lane task failed: {err}");
            }
        }
        tracing::debug!(failures = self.failure_count(), "workload driver stopped");
    }

    /// Shut down and wait for all lanes to exit.
    pub async fn stop(self) {
        self.shutdown();
        self.join().await;
    }
}

/// Shuts a [`WorkloadDriver`] down from anywhere.
#[derive(Debug, Clone)]
pub struct DriverShutdown(Arc<LaneShared>);

impl DriverShutdown {
    pub fn shutdown(&self) {
        self.0.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.shutdown.is_cancelled()
    }

    /// RPCs that failed since the driver started, also once it stopped.
    pub fn failure_count(&self) -> u64 {
        self.0.failures.load(Ordering::Relaxed)
    }
}

impl Drop for WorkloadDriver {
    fn drop(&mut self) {
        // lanes still running are aborted by the join set
        self.shared.shutdown();
    }
}

/// Acquire a permit of the lane's connection, unless shutting down.
async fn acquire<C>(connection: &Connection<C>, shared: &LaneShared) -> Option<OwnedSemaphorePermit> {
    let permit = tokio::select! {
        biased;
        _ = shared.shutdown.cancelled() => return None,
        permit = connection.permits.clone().acquire_owned() => permit.ok()?,
    };
    if shared.shutdown.is_cancelled() {
        return None;
    }
    Some(permit)
}

/// Sleep for the pacing delay; returns `false` when shutdown interrupted it.
async fn pace(shared: &LaneShared, delay: Duration) -> bool {
    if delay.is_zero() {
        return true;
    }
    tokio::select! {
        _ = shared.shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn unary_lane<C: RpcChannel>(
    lane: usize,
    connection: Connection<C>,
    shared: Arc<LaneShared>,
    mut pacer: LanePacer,
) {
    while let Some(permit) = acquire(&connection, &shared).await {
        let start = Instant::now();
        let result = connection.client.unary(shared.request.clone()).await;
        let elapsed = start.elapsed();

        match result {
            Ok(_) => {
                shared.recorder.record_elapsed(elapsed);
                let delay = pacer.next_delay(elapsed);
                drop(permit);
                if !pace(&shared, delay).await {
                    break;
                }
            }
            Err(status) => {
                drop(permit);
                shared.on_failure(lane, &status);
            }
        }
    }
    tracing::trace!(lane, "unary lane stopped");
}

async fn streaming_lane<C: RpcChannel>(
    lane: usize,
    connection: Connection<C>,
    shared: Arc<LaneShared>,
    mut pacer: LanePacer,
) {
    while let Some(permit) = acquire(&connection, &shared).await {
        if let Err(status) = ping_pong(&connection, &shared, &mut pacer).await {
            shared.on_failure(lane, &status);
        }
        drop(permit);
    }
    tracing::trace!(lane, "streaming lane stopped");
}

/// Run one stream until it ends. Request N+1 is only sent once response N
/// was received; once shutting down the request side is closed and the
/// remaining responses are drained.
async fn ping_pong<C: RpcChannel>(
    connection: &Connection<C>,
    shared: &LaneShared,
    pacer: &mut LanePacer,
) -> Result<(), Status> {
    let (tx, rx) = mpsc::channel(1);
    tx.send(shared.request.clone())
        .await
        .map_err(|_| Status::internal("request stream closed before start"))?;
    let mut tx = Some(tx);
    let mut last_send = Instant::now();

    let mut responses = connection.client.ping_pong(ReceiverStream::new(rx)).await?;

    while let Some(response) = responses.next().await {
        response?;
        let elapsed = last_send.elapsed();
        shared.recorder.record_elapsed(elapsed);

        let Some(sender) = tx.as_ref() else {
            continue;
        };
        if shared.shutdown.is_cancelled() || !pace(shared, pacer.next_delay(elapsed)).await {
            tx = None;
            continue;
        }

        last_send = Instant::now();
        if sender.send(shared.request.clone()).await.is_err() {
            tx = None;
        }
    }
    Ok(())
}
