use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Code, Streaming, transport::Channel};

use super::*;
use crate::proto::{
    ClientConfig, ClientType, ClosedLoopParams, HistogramParams, LoadParams, Mark, PayloadConfig,
    RpcType, ServerConfig, ServerType, SimpleProtoParams, WorkerServiceClient, load_params::Load,
    payload_config::Payload,
};

type Control<A, S> = (mpsc::Sender<A>, Streaming<S>);

async fn start_worker(options: WorkerOptions) -> (Worker, WorkerServiceClient<Channel>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let worker = Worker::new(options);
    tokio::spawn(worker.clone().serve(listener, std::future::pending()));

    let client = WorkerServiceClient::connect(format!("http://127.0.0.1:{port}"))
        .await
        .unwrap();
    (worker, client)
}

async fn open_server(client: &mut WorkerServiceClient<Channel>) -> Control<ServerArgs, ServerStatus> {
    let (tx, rx) = mpsc::channel(4);
    let stream = client.run_server(ReceiverStream::new(rx)).await.unwrap().into_inner();
    (tx, stream)
}

async fn open_client(client: &mut WorkerServiceClient<Channel>) -> Control<ClientArgs, ClientStatus> {
    let (tx, rx) = mpsc::channel(4);
    let stream = client.run_client(ReceiverStream::new(rx)).await.unwrap().into_inner();
    (tx, stream)
}

fn server_setup() -> ServerArgs {
    ServerArgs {
        argtype: Some(server_args::Argtype::Setup(ServerConfig {
            server_type: ServerType::AsyncServer as i32,
            async_server_threads: 2,
            ..Default::default()
        })),
    }
}

fn server_mark(reset: bool) -> ServerArgs {
    ServerArgs {
        argtype: Some(server_args::Argtype::Mark(Mark { reset })),
    }
}

fn client_setup(port: i32, rpc_type: RpcType) -> ClientArgs {
    ClientArgs {
        argtype: Some(client_args::Argtype::Setup(ClientConfig {
            server_targets: vec![format!("127.0.0.1:{port}")],
            client_type: ClientType::AsyncClient as i32,
            outstanding_rpcs_per_channel: 1,
            client_channels: 2,
            async_client_threads: 2,
            rpc_type: rpc_type as i32,
            load_params: Some(LoadParams {
                load: Some(Load::ClosedLoop(ClosedLoopParams {})),
            }),
            payload_config: Some(PayloadConfig {
                payload: Some(Payload::SimpleParams(SimpleProtoParams {
                    req_size: 0,
                    resp_size: 1000,
                })),
            }),
            histogram_params: Some(HistogramParams {
                resolution: 0.01,
                max_possible: 60e9,
            }),
            ..Default::default()
        })),
    }
}

fn client_mark(reset: bool) -> ClientArgs {
    ClientArgs {
        argtype: Some(client_args::Argtype::Mark(Mark { reset })),
    }
}

/// Set up a server scenario and return its port.
async fn setup_server(control: &mut Control<ServerArgs, ServerStatus>) -> i32 {
    control.0.send(server_setup()).await.unwrap();
    let status = control.1.message().await.unwrap().unwrap();
    assert!(status.port > 0);
    assert!(status.cores > 0);
    assert!(status.stats.is_none());
    status.port
}

async fn client_stats(control: &mut Control<ClientArgs, ClientStatus>, reset: bool) -> crate::proto::ClientStats {
    control.0.send(client_mark(reset)).await.unwrap();
    control.1.message().await.unwrap().unwrap().stats.unwrap()
}

#[tokio::test]
async fn test_core_count() {
    let (_worker, mut client) = start_worker(WorkerOptions::default()).await;
    let response = client.core_count(CoreRequest {}).await.unwrap().into_inner();
    assert_eq!(response.cores, core_count());
    assert!(response.cores > 0);
}

#[tokio::test]
async fn test_unary_scenario_reports_latencies() {
    let (worker, mut client) = start_worker(WorkerOptions::default()).await;

    let mut server = open_server(&mut client).await;
    let port = setup_server(&mut server).await;

    let mut load = open_client(&mut client).await;
    load.0.send(client_setup(port, RpcType::Unary)).await.unwrap();
    let status = load.1.message().await.unwrap().unwrap();
    assert!(status.stats.is_none());

    tokio::time::sleep(Duration::from_secs(1)).await;

    let stats = client_stats(&mut load, true).await;
    let latencies = stats.latencies.unwrap();
    assert!(latencies.count > 0.);
    let mean = latencies.sum / latencies.count;
    assert!(latencies.min_seen > 0.);
    assert!(latencies.min_seen <= mean, "min {} > mean {mean}", latencies.min_seen);
    assert!(mean <= latencies.max_seen, "mean {mean} > max {}", latencies.max_seen);
    assert_eq!(latencies.bucket.iter().map(|&b| f64::from(b)).sum::<f64>(), latencies.count);
    assert!(stats.time_elapsed >= 1.);
    assert_eq!(stats.time_system, 0.);

    server.0.send(server_mark(true)).await.unwrap();
    let server_stats = server.1.message().await.unwrap().unwrap().stats.unwrap();
    assert!(server_stats.time_elapsed >= 1.);

    // closing the control stream stops the scenario, the slot stays taken
    drop(load.0);
    assert!(load.1.message().await.unwrap().is_none());
    let scenario = worker.session().client.get().unwrap();
    assert!(scenario.is_shutdown());

    let mut again = open_client(&mut client).await;
    again.0.send(client_setup(port, RpcType::Unary)).await.unwrap();
    assert_eq!(again.1.message().await.unwrap_err().code(), Code::AlreadyExists);
}

#[tokio::test]
async fn test_streaming_scenario_reports_latencies() {
    let (_worker, mut client) = start_worker(WorkerOptions::default()).await;

    let mut server = open_server(&mut client).await;
    let port = setup_server(&mut server).await;

    let mut load = open_client(&mut client).await;
    load.0.send(client_setup(port, RpcType::Streaming)).await.unwrap();
    load.1.message().await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let latencies = client_stats(&mut load, true).await.latencies.unwrap();
    assert!(latencies.count > 0.);
    assert!(latencies.min_seen <= latencies.max_seen);

    drop(load.0);
    assert!(load.1.message().await.unwrap().is_none());
}

#[tokio::test]
async fn test_consecutive_marks_do_not_double_count() {
    let (worker, mut client) = start_worker(WorkerOptions::default()).await;

    let mut server = open_server(&mut client).await;
    let port = setup_server(&mut server).await;

    let mut load = open_client(&mut client).await;
    load.0.send(client_setup(port, RpcType::Unary)).await.unwrap();
    load.1.message().await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // stop traffic, then mark twice
    let scenario = worker.session().client.get().unwrap();
    scenario.stop().await;

    let first = client_stats(&mut load, true).await.latencies.unwrap();
    let second = client_stats(&mut load, true).await.latencies.unwrap();
    assert!(first.count > 0.);
    assert_eq!(second.count, 0.);
    assert!(second.bucket.iter().all(|&b| b == 0));
}

#[tokio::test]
async fn test_mark_without_reset_reports_interval_latencies() {
    let (worker, mut client) = start_worker(WorkerOptions::default()).await;

    let mut server = open_server(&mut client).await;
    let port = setup_server(&mut server).await;

    let mut load = open_client(&mut client).await;
    load.0.send(client_setup(port, RpcType::Unary)).await.unwrap();
    load.1.message().await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    worker.session().client.get().unwrap().stop().await;

    // a default `Mark {}` carries reset = false
    let first = client_stats(&mut load, false).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = client_stats(&mut load, false).await;

    let (first_latencies, second_latencies) = (first.latencies.unwrap(), second.latencies.unwrap());
    assert!(first_latencies.count > 0.);
    assert_eq!(second_latencies.count, 0.);
    assert!(second_latencies.bucket.iter().all(|&b| b == 0));

    // the elapsed window keeps running without reset
    assert!(second.time_elapsed > first.time_elapsed);
}

#[tokio::test]
async fn test_concurrent_setups_exactly_one_wins() {
    const CONTENDERS: usize = 8;

    let (worker, client) = start_worker(WorkerOptions::default()).await;

    let attempts: Vec<_> = (0..CONTENDERS)
        .map(|_| {
            let mut client = client.clone();
            tokio::spawn(async move {
                let mut control = open_server(&mut client).await;
                control.0.send(server_setup()).await.unwrap();
                let result = control.1.message().await;
                // keep the winner's stream open until all attempts are in
                (control, result)
            })
        })
        .collect();

    let mut won = 0;
    let mut rejected = 0;
    let mut controls = Vec::new();
    for attempt in attempts {
        let (control, result) = attempt.await.unwrap();
        match result {
            Ok(Some(status)) => {
                assert!(status.port > 0);
                won += 1;
            }
            Ok(None) => panic!("control stream ended without a reply"),
            Err(status) => {
                assert_eq!(status.code(), Code::AlreadyExists);
                rejected += 1;
            }
        }
        controls.push(control);
    }

    assert_eq!(won, 1);
    assert_eq!(rejected, CONTENDERS - 1);
    assert!(worker.session().server.get().is_some());
}

#[tokio::test]
async fn test_mark_before_setup_is_rejected() {
    let (worker, mut client) = start_worker(WorkerOptions::default()).await;

    let mut server = open_server(&mut client).await;
    server.0.send(server_mark(false)).await.unwrap();
    assert_eq!(server.1.message().await.unwrap_err().code(), Code::FailedPrecondition);

    let mut load = open_client(&mut client).await;
    load.0.send(client_mark(true)).await.unwrap();
    assert_eq!(load.1.message().await.unwrap_err().code(), Code::FailedPrecondition);

    assert!(!worker.session().server.is_occupied());
    assert!(!worker.session().client.is_occupied());
}

#[tokio::test]
async fn test_failed_setup_releases_role() {
    let (worker, mut client) = start_worker(WorkerOptions::default()).await;

    let mut load = open_client(&mut client).await;
    let mut setup = client_setup(1, RpcType::Unary);
    if let Some(client_args::Argtype::Setup(config)) = setup.argtype.as_mut() {
        config.client_type = ClientType::SyncClient as i32;
    }
    load.0.send(setup).await.unwrap();
    assert_eq!(load.1.message().await.unwrap_err().code(), Code::Unimplemented);
    assert!(!worker.session().client.is_occupied());

    // connecting to a port nobody listens on is an internal error
    let mut load = open_client(&mut client).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed_port = listener.local_addr().unwrap().port();
    drop(listener);
    load.0.send(client_setup(i32::from(closed_port), RpcType::Unary)).await.unwrap();
    assert_eq!(load.1.message().await.unwrap_err().code(), Code::Internal);
    assert!(!worker.session().client.is_occupied());
}

#[tokio::test]
async fn test_duplicate_setup_on_same_stream_keeps_scenario_running() {
    let (worker, mut client) = start_worker(WorkerOptions::default()).await;

    let mut server = open_server(&mut client).await;
    let port = setup_server(&mut server).await;
    server.0.send(server_setup()).await.unwrap();
    assert_eq!(server.1.message().await.unwrap_err().code(), Code::AlreadyExists);

    let mut load = open_client(&mut client).await;
    load.0.send(client_setup(port, RpcType::Unary)).await.unwrap();
    load.1.message().await.unwrap().unwrap();
    load.0.send(client_setup(port, RpcType::Unary)).await.unwrap();
    assert_eq!(load.1.message().await.unwrap_err().code(), Code::AlreadyExists);

    let server_scenario = worker.session().server.get().unwrap();
    let client_scenario = worker.session().client.get().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!server_scenario.is_shutdown());
    assert!(!client_scenario.is_shutdown());
    // traffic keeps flowing after the rejected setup
    assert!(client_scenario.stats(true).unwrap().latencies.unwrap().count > 0.);

    worker.stop_scenarios().await;
    assert!(server_scenario.is_shutdown());
    assert!(client_scenario.is_shutdown());
}

#[tokio::test]
async fn test_unrepresentable_poisson_load_is_rejected() {
    let (worker, mut client) = start_worker(WorkerOptions::default()).await;

    let mut load = open_client(&mut client).await;
    let mut setup = client_setup(1, RpcType::Unary);
    if let Some(client_args::Argtype::Setup(config)) = setup.argtype.as_mut() {
        config.load_params = Some(LoadParams {
            load: Some(Load::Poisson(crate::proto::PoissonParams { offered_load: 1e-300 })),
        });
    }
    load.0.send(setup).await.unwrap();
    assert_eq!(load.1.message().await.unwrap_err().code(), Code::InvalidArgument);
    assert!(!worker.session().client.is_occupied());
}

#[tokio::test]
async fn test_server_port_override() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let free_port = listener.local_addr().unwrap().port();
    drop(listener);

    let (_worker, mut client) = start_worker(WorkerOptions {
        server_port: Some(free_port),
        ..Default::default()
    })
    .await;

    let mut server = open_server(&mut client).await;
    assert_eq!(setup_server(&mut server).await, i32::from(free_port));
}

#[tokio::test]
async fn test_quit_worker_acknowledges_then_quits() {
    let (worker, mut client) = start_worker(WorkerOptions {
        quit_delay: Duration::from_millis(50),
        ..Default::default()
    })
    .await;

    let quit = worker.quit_token();
    client.quit_worker(Void {}).await.unwrap();
    assert!(!quit.is_cancelled());
    tokio::time::timeout(Duration::from_secs(5), quit.cancelled())
        .await
        .unwrap();
}
