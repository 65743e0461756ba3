use std::{
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::Duration,
};

use rama::{
    error::{BoxError, ErrorContext as _, OpaqueError},
    graceful::{self, ShutdownGuard},
    telemetry::tracing,
};

use clap::Parser;
use rpcbench_lib::{
    tls::TlsFiles,
    utils,
    worker::{DEFAULT_QUIT_DELAY, Worker, WorkerOptions},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[cfg(target_family = "unix")]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Load worker, driven remotely by a benchmark driver.
#[derive(Debug, Clone, Parser)]
#[command(name = "rpcbench-worker")]
#[command(bin_name = "rpcbench-worker")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// port the worker control service listens on
    #[arg(long = "driver_port", value_name = "PORT", required = true)]
    pub driver_port: u16,

    /// port of benchmark servers set up without a port (default: any free port)
    #[arg(long = "server_port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// CA certificate (PEM) trusted by client scenarios using TLS
    #[arg(long = "tls_ca_file", value_name = "FILE")]
    pub tls_ca_file: Option<PathBuf>,

    /// certificate chain (PEM) of server scenarios using TLS
    #[arg(long = "tls_cert_file", value_name = "FILE")]
    pub tls_cert_file: Option<PathBuf>,

    /// private key (PEM) of server scenarios using TLS
    #[arg(long = "tls_key_file", value_name = "FILE")]
    pub tls_key_file: Option<PathBuf>,

    /// delay between acknowledging a quit request and quitting
    #[arg(long, value_name = "SECONDS", default_value_t = DEFAULT_QUIT_DELAY.as_secs_f64())]
    pub quit_delay: f64,

    /// debug logging as default instead of Info; use RUST_LOG env for more options
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,

    /// enable pretty logging (format for humans)
    #[arg(long, default_value_t = false)]
    pub pretty: bool,

    /// write the tracing output to the provided (log) file instead of stderr
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "SECONDS", default_value_t = 0.)]
    /// the graceful shutdown timeout (<= 0.0 = no timeout)
    pub graceful: f64,

    #[cfg(target_family = "unix")]
    /// Set the limit of max open file descriptors for this process and its children.
    #[arg(long, value_name = "N", default_value_t = 262_144)]
    pub ulimit: rpcbench_lib::utils::os::rlim_t,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = parse_args_or_exit();

    utils::telemetry::init_tracing(utils::telemetry::TelemetryConfig {
        verbose: args.verbose,
        pretty: args.pretty,
        output: args.output.as_deref(),
    })?;

    #[cfg(target_family = "unix")]
    rpcbench_lib::utils::os::raise_nofile(args.ulimit).context("set file descriptor limit")?;

    let base_shutdown_signal = graceful::default_signal();
    if let Err(err) = run_with_args(base_shutdown_signal, args).await {
        eprintln!("🚩 exit with error: {err}");
        std::process::exit(1);
    }

    Ok(())
}

/// Help and version exit with 0, invalid invocations print the error and
/// usage and exit with 1.
fn parse_args_or_exit() -> Args {
    use clap::{CommandFactory as _, error::ErrorKind};

    match Args::try_parse() {
        Ok(args) => args,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("{err}");
            eprintln!("{}", Args::command().render_help());
            std::process::exit(1);
        }
    }
}

/// run the worker until quit, a signal or a fatal error
async fn run_with_args<F>(base_shutdown_signal: F, args: Args) -> Result<(), BoxError>
where
    F: Future<Output: Send + 'static> + Send + 'static,
{
    let graceful_timeout = (args.graceful > 0.).then(|| Duration::from_secs_f64(args.graceful));

    let worker = Worker::new(WorkerOptions {
        tls: TlsFiles {
            ca: args.tls_ca_file.clone(),
            cert: args.tls_cert_file.clone(),
            key: args.tls_key_file.clone(),
        },
        server_port: args.server_port.filter(|port| *port != 0),
        quit_delay: Duration::try_from_secs_f64(args.quit_delay.max(0.))
            .context("parse quit delay")
            .context_debug_field("quit_delay", args.quit_delay)?,
    });

    let (error_tx, error_rx) = tokio::sync::oneshot::channel::<OpaqueError>();
    let graceful = graceful::Shutdown::new(new_shutdown_signal(
        error_rx,
        worker.quit_token(),
        base_shutdown_signal,
    ));
    let failure = Arc::new(OnceLock::new());

    graceful.spawn_task_fn({
        let failure = failure.clone();
        async move |guard| {
            if let Err(err) = serve_worker(guard, worker, args.driver_port).await {
                let _ = failure.set(err.to_string());
                let _ = error_tx.send(err);
            }
        }
    });

    let delay = match graceful_timeout {
        Some(duration) => graceful.shutdown_with_limit(duration).await?,
        None => graceful.shutdown().await,
    };

    tracing::debug!("gracefully shutdown with a delay of: {delay:?}");
    match failure.get() {
        Some(err) => Err(OpaqueError::from_display(err.clone()).into()),
        None => Ok(()),
    }
}

async fn serve_worker(guard: ShutdownGuard, worker: Worker, driver_port: u16) -> Result<(), OpaqueError> {
    let listener = TcpListener::bind(("0.0.0.0", driver_port))
        .await
        .context("bind worker control listener")
        .context_debug_field("port", driver_port)?;

    worker
        .serve(listener, async move { guard.cancelled().await })
        .await
        .context("run worker control service")?;
    Ok(())
}

fn new_shutdown_signal(
    error_rx: tokio::sync::oneshot::Receiver<OpaqueError>,
    quit: CancellationToken,
    base_shutdown_signal: impl Future<Output: Send + 'static> + Send + 'static,
) -> impl Future + Send + 'static {
    async move {
        tokio::select! {
            _ = base_shutdown_signal => {
                tracing::debug!("default signal triggered: init graceful shutdown");
            }
            _ = quit.cancelled() => {
                tracing::info!("quit requested by driver: init graceful shutdown");
            }
            result = error_rx => {
                match result {
                    Ok(err) => {
                        tracing::error!("fatal err received: {err}; abort");
                    },
                    Err(_) => {
                        tracing::debug!("worker is finished without error, return control");
                    },
                }
            }
        }
    }
}
