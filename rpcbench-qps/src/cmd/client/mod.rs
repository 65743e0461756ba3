use std::time::Duration;

use clap::{Arg, ArgAction};
use rama::{
    error::{BoxError, ErrorContext as _, OpaqueError},
    graceful::ShutdownGuard,
    telemetry::tracing,
};
use tokio::time::Instant;

use rpcbench_lib::{
    client::ClientScenario,
    config::{ClientConfiguration, ConfigurationBuilder},
};

pub mod reporter;

use self::reporter::*;

pub const NAME: &str = "client";

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// run load against a benchmark server and report latencies
#[derive(Debug, Clone)]
pub struct ClientCommand {
    config: ClientConfiguration,
    /// report json instead of a human-friendly format
    json: bool,
}

fn builder() -> ConfigurationBuilder<ClientConfiguration> {
    ConfigurationBuilder::new()
}

pub fn command() -> clap::Command {
    builder()
        .command(NAME)
        .about("run load against a benchmark server and report latencies")
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("report json lines instead of a human-friendly format"),
        )
}

pub fn usage() -> String {
    command().render_help().to_string()
}

impl ClientCommand {
    pub fn from_matches(matches: &clap::ArgMatches) -> Result<Self, BoxError> {
        Ok(Self {
            config: builder().build_from_matches(matches)?,
            json: matches.get_flag("json"),
        })
    }
}

pub async fn exec(guard: ShutdownGuard, args: ClientCommand) -> Result<(), OpaqueError> {
    let config = args.config.to_scenario().context("client configuration")?;

    let mut reporter: Box<dyn Reporter> = if args.json {
        Box::new(JsonlReporter::new(REPORT_INTERVAL))
    } else {
        Box::new(HumanReporter::new(REPORT_INTERVAL))
    };

    let scenario = ClientScenario::start(&config)
        .await
        .context("start benchmark client")?;

    if !config.warmup.is_zero() {
        tracing::info!(warmup = ?config.warmup, "benchmark client warming up");
        if !run_phase(&guard, &scenario, reporter.as_mut(), Phase::Warmup, config.warmup).await? {
            scenario.stop().await;
            return Ok(());
        }
        // warmup samples are not part of the result
        scenario.mark(true).context("reset after warmup")?;
    }

    tracing::info!(duration = ?config.duration, "benchmark client measuring");
    let start = Instant::now();
    let completed = run_phase(&guard, &scenario, reporter.as_mut(), Phase::Main, config.duration).await?;
    scenario.stop().await;
    let elapsed = start.elapsed();

    let mark = scenario.mark(false).context("collect final statistics")?;
    if !completed {
        tracing::warn!(?elapsed, "benchmark run interrupted, reporting partial results");
    }

    reporter.finish(&Summary {
        channels: config.channels,
        outstanding_rpcs: config.outstanding_per_channel,
        client_payload: config.request_size,
        server_payload: config.response_size,
        histogram: &mark.window,
        elapsed,
        failures: scenario.failure_count(),
    });

    if let Some(path) = args.config.save_histogram.as_deref() {
        mark.window
            .save(path, 1.)
            .context("save latency histogram")?;
        tracing::info!(path = %path.display(), "latency histogram saved");
    }

    Ok(())
}

/// Report intervals until `duration` elapsed. Returns `false` when
/// interrupted by shutdown.
async fn run_phase(
    guard: &ShutdownGuard,
    scenario: &ClientScenario,
    reporter: &mut dyn Reporter,
    phase: Phase,
    duration: Duration,
) -> Result<bool, OpaqueError> {
    let start = Instant::now();
    let deadline = tokio::time::sleep(duration);
    let mut ticker = tokio::time::interval_at(start + REPORT_INTERVAL, REPORT_INTERVAL);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = guard.cancelled() => {
                tracing::info!(phase = phase.as_str(), "benchmark client: guard shutdown");
                return Ok(false);
            }
            _ = &mut deadline => return Ok(true),
            _ = ticker.tick() => {
                let mark = scenario.mark(false).context("collect interval statistics")?;
                reporter.on_interval(phase, start.elapsed(), &mark.interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rpcbench_lib::config::{LoadSpec, RpcShape};

    use super::*;

    fn parse(args: &[&str]) -> Result<ClientCommand, BoxError> {
        let matches = command().try_get_matches_from(std::iter::once(NAME).chain(args.iter().copied()))?;
        ClientCommand::from_matches(&matches)
    }

    #[test]
    fn test_parse_client_command() {
        let cmd = parse(&[
            "--address=localhost:10000",
            "--streaming_rpcs",
            "--target_qps=1000",
            "--duration=5",
            "--json",
        ])
        .unwrap();
        assert!(cmd.json);

        let scenario = cmd.config.to_scenario().unwrap();
        assert_eq!(scenario.rpc_shape, RpcShape::Streaming);
        assert_eq!(scenario.load, LoadSpec::Poisson { offered_load: 1000. });
        assert_eq!(scenario.duration, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_client_command_errors() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--address=localhost:10000", "--channels=many"]).is_err());
        assert!(parse(&["--address=localhost:10000", "--tls"]).is_err());
        assert!(usage().contains("--json"));
    }
}
