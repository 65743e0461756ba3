use std::{
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::Duration,
};

use rama::{
    error::{BoxError, OpaqueError},
    graceful,
    telemetry::tracing,
};

#[cfg(target_family = "unix")]
use rama::error::ErrorContext as _;

use clap::{CommandFactory as _, FromArgMatches as _, Parser};
use rpcbench_lib::utils;

pub mod cmd;

#[cfg(target_family = "unix")]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Standalone QPS client and server of the benchmark service.
#[derive(Debug, Clone, Parser)]
#[command(name = "rpcbench-qps")]
#[command(bin_name = "rpcbench-qps")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// debug logging as default instead of Info; use RUST_LOG env for more options
    #[arg(long, short = 'v', default_value_t = false, global = true)]
    pub verbose: bool,

    /// enable pretty logging (format for humans)
    #[arg(long, default_value_t = false, global = true)]
    pub pretty: bool,

    /// write the tracing output to the provided (log) file instead of stderr
    #[arg(long, short = 'o', global = true)]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "SECONDS", default_value_t = 0., global = true)]
    /// the graceful shutdown timeout (<= 0.0 = no timeout)
    pub graceful: f64,

    #[cfg(target_family = "unix")]
    /// Set the limit of max open file descriptors for this process and its children.
    #[arg(long, value_name = "N", default_value_t = 262_144, global = true)]
    pub ulimit: rpcbench_lib::utils::os::rlim_t,
}

#[derive(Debug, Clone)]
enum CliCommands {
    Client(self::cmd::client::ClientCommand),
    Server(self::cmd::server::ServerCommand),
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let (args, cmds) = parse_args_or_exit();

    utils::telemetry::init_tracing(utils::telemetry::TelemetryConfig {
        verbose: args.verbose,
        pretty: args.pretty,
        output: args.output.as_deref(),
    })?;

    #[cfg(target_family = "unix")]
    rpcbench_lib::utils::os::raise_nofile(args.ulimit).context("set file descriptor limit")?;

    let base_shutdown_signal = graceful::default_signal();
    if let Err(err) = run_with_args(base_shutdown_signal, args, cmds).await {
        eprintln!("🚩 exit with error: {err}");
        std::process::exit(1);
    }

    Ok(())
}

/// Parse the command line. Help and version exit with 0, anything else
/// that is not a valid invocation prints the error and usage and exits with 1.
fn parse_args_or_exit() -> (Args, CliCommands) {
    let mut cli = Args::command()
        .subcommand(self::cmd::client::command())
        .subcommand(self::cmd::server::command())
        .subcommand_required(true);
    let usage = cli.render_help();

    let matches = match cli.try_get_matches_from_mut(std::env::args_os()) {
        Ok(matches) => matches,
        Err(err) => {
            use clap::error::ErrorKind;

            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                let _ = err.print();
                std::process::exit(0);
            }
            eprintln!("{err}");
            eprintln!("{usage}");
            std::process::exit(1);
        }
    };

    let parsed = Args::from_arg_matches(&matches).map_err(BoxError::from).and_then(|args| {
        let cmds = match matches.subcommand() {
            Some((self::cmd::client::NAME, m)) => CliCommands::Client(self::cmd::client::ClientCommand::from_matches(m)?),
            Some((self::cmd::server::NAME, m)) => CliCommands::Server(self::cmd::server::ServerCommand::from_matches(m)?),
            _ => return Err(OpaqueError::from_display("no command given").into()),
        };
        Ok((args, cmds))
    });

    match parsed {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("🚩 invalid configuration: {err}\n");
            match matches.subcommand_name() {
                Some(self::cmd::client::NAME) => eprintln!("{}", self::cmd::client::usage()),
                Some(self::cmd::server::NAME) => eprintln!("{}", self::cmd::server::usage()),
                _ => eprintln!("{usage}"),
            }
            std::process::exit(1);
        }
    }
}

/// run a qps cmd with the given args
async fn run_with_args<F>(base_shutdown_signal: F, args: Args, cmds: CliCommands) -> Result<(), BoxError>
where
    F: Future<Output: Send + 'static> + Send + 'static,
{
    let graceful_timeout = (args.graceful > 0.).then(|| Duration::from_secs_f64(args.graceful));

    let (error_tx, error_rx) = tokio::sync::oneshot::channel::<OpaqueError>();
    let graceful = graceful::Shutdown::new(new_shutdown_signal(error_rx, base_shutdown_signal));
    let failure = Arc::new(OnceLock::new());

    graceful.spawn_task_fn({
        let failure = failure.clone();
        async move |guard| {
            let result = match cmds {
                CliCommands::Client(client_args) => self::cmd::client::exec(guard, client_args).await,
                CliCommands::Server(server_args) => self::cmd::server::exec(guard, server_args).await,
            };
            if let Err(err) = result {
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

fn new_shutdown_signal(
    error_rx: tokio::sync::oneshot::Receiver<OpaqueError>,
    base_shutdown_signal: impl Future<Output: Send + 'static> + Send + 'static,
) -> impl Future + Send + 'static {
    async move {
        tokio::select! {
            _ = base_shutdown_signal => {
                tracing::debug!("default signal triggered: init graceful shutdown");
            }
            result = error_rx => {
                match result {
                    Ok(err) => {
                        tracing::error!("fatal err received: {err}; abort");
                    },
                    Err(_) => {
                        tracing::debug!("command is finished without error, return control");
                    },
                }
            }
        }
    }
}
