use rama::{
    error::{ErrorContext as _, OpaqueError},
    graceful::ShutdownGuard,
    telemetry::tracing,
};

use rpcbench_lib::{
    config::{ConfigurationBuilder, ServerConfiguration},
    server::ServerScenario,
};

pub const NAME: &str = "server";

/// serve the benchmark service until a shutdown signal
#[derive(Debug, Clone)]
pub struct ServerCommand {
    config: ServerConfiguration,
}

fn builder() -> ConfigurationBuilder<ServerConfiguration> {
    ConfigurationBuilder::new()
}

pub fn command() -> clap::Command {
    builder()
        .command(NAME)
        .about("serve the benchmark service until a shutdown signal")
}

pub fn usage() -> String {
    builder().usage(NAME)
}

impl ServerCommand {
    pub fn from_matches(matches: &clap::ArgMatches) -> Result<Self, rama::error::BoxError> {
        Ok(Self {
            config: builder().build_from_matches(matches)?,
        })
    }
}

pub async fn exec(guard: ShutdownGuard, args: ServerCommand) -> Result<(), OpaqueError> {
    let config = args.config.to_scenario().context("server configuration")?;
    let scenario = ServerScenario::start(&config)
        .await
        .context("start benchmark server")?;

    tokio::select! {
        _ = guard.cancelled() => {
            tracing::info!("benchmark server: guard shutdown");
        }
        _ = scenario.closed() => {
            tracing::error!("benchmark server exited unexpectedly");
        }
    }

    scenario.stop().await.context("stop benchmark server")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_command() {
        let matches = command()
            .try_get_matches_from([NAME, "--address=127.0.0.1:0", "--threads=2"])
            .unwrap();
        let cmd = ServerCommand::from_matches(&matches).unwrap();
        assert_eq!(cmd.config.to_scenario().unwrap().threads, 2);

        let matches = command().try_get_matches_from([NAME]).unwrap();
        assert!(ServerCommand::from_matches(&matches).is_err());
        assert!(usage().contains("--address"));
    }
}
