//! Conversion of driver supplied protobuf configs into scenario configs.
//!
//! Errors are returned as [`Status`] values so they can be handed to the
//! driver as is.

use tonic::Status;

use super::{Address, DEFAULT_RESOLUTION, LoadScenarioConfig, LoadSpec, RpcShape, ServerScenarioConfig};
use crate::{
    histogram::HistogramConfig,
    proto::{
        self, ClientType, RpcType, ServerType, load_params::Load, payload_config::Payload,
    },
    tls::TlsFiles,
};

/// Request and response sizes of a payload config; only simple proto
/// payloads are served.
fn payload_sizes(config: Option<&proto::PayloadConfig>) -> Result<(usize, usize), Status> {
    match config.and_then(|c| c.payload.as_ref()) {
        None => Ok((0, 0)),
        Some(Payload::SimpleParams(params)) => Ok((
            usize::try_from(params.req_size).unwrap_or_default(),
            usize::try_from(params.resp_size).unwrap_or_default(),
        )),
        Some(Payload::BytebufParams(_)) => {
            Err(Status::unimplemented("byte buffer payloads are not supported"))
        }
        Some(Payload::ComplexParams(_)) => {
            Err(Status::unimplemented("complex proto payloads are not supported"))
        }
    }
}

fn positive(value: i32, name: &'static str) -> Result<usize, Status> {
    match usize::try_from(value) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Status::invalid_argument(format!("{name} must be positive, got {value}"))),
    }
}

fn histogram_config(params: Option<&proto::HistogramParams>) -> (HistogramConfig, f64) {
    let mut config = HistogramConfig::WORKER;
    let mut resolution = DEFAULT_RESOLUTION;
    if let Some(params) = params {
        if params.max_possible.is_finite() && params.max_possible >= 2. {
            config.max_value = params.max_possible as u64;
        }
        if params.resolution.is_finite() && params.resolution > 0. {
            resolution = params.resolution;
        }
    }
    (config, resolution)
}

pub fn load_scenario_from_proto(config: &proto::ClientConfig, tls: &TlsFiles) -> Result<LoadScenarioConfig, Status> {
    match ClientType::try_from(config.client_type) {
        Ok(ClientType::AsyncClient) => (),
        Ok(client_type) => {
            return Err(Status::unimplemented(format!(
                "client type {} is not supported",
                client_type.as_str_name()
            )));
        }
        Err(_) => {
            return Err(Status::invalid_argument(format!(
                "unknown client type: {}",
                config.client_type
            )));
        }
    }

    let rpc_shape = match RpcType::try_from(config.rpc_type) {
        Ok(RpcType::Unary) => RpcShape::Unary,
        Ok(RpcType::Streaming) => RpcShape::Streaming,
        Ok(rpc_type) => {
            return Err(Status::unimplemented(format!(
                "rpc type {} is not supported by the client",
                rpc_type.as_str_name()
            )));
        }
        Err(_) => {
            return Err(Status::invalid_argument(format!("unknown rpc type: {}", config.rpc_type)));
        }
    };

    if config.server_targets.is_empty() {
        return Err(Status::invalid_argument("no server targets"));
    }
    let targets = config
        .server_targets
        .iter()
        .map(|target| {
            target
                .parse::<Address>()
                .map_err(|err| Status::invalid_argument(format!("invalid server target '{target}': {err}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let load = match config.load_params.as_ref().and_then(|p| p.load.as_ref()) {
        None | Some(Load::ClosedLoop(_)) => LoadSpec::ClosedLoop,
        Some(Load::Poisson(params)) if params.offered_load.is_finite() && params.offered_load > 0. => {
            LoadSpec::Poisson {
                offered_load: params.offered_load,
            }
        }
        Some(Load::Poisson(params)) => {
            return Err(Status::invalid_argument(format!(
                "poisson offered load must be positive, got {}",
                params.offered_load
            )));
        }
    };

    let tls = match &config.security_params {
        None => None,
        Some(security) => {
            if targets.iter().any(|t| !t.transport().supports_tls()) {
                return Err(Status::invalid_argument("TLS is not supported for unix socket targets"));
            }
            let tls = tls.client_tls(Some(&security.server_host_override)).ok_or_else(|| {
                Status::failed_precondition("TLS requested but the worker has no CA certificate configured")
            })?;
            Some(tls)
        }
    };

    let (request_size, response_size) = payload_sizes(config.payload_config.as_ref())?;
    let (histogram, resolution) = histogram_config(config.histogram_params.as_ref());

    let scenario = LoadScenarioConfig {
        targets,
        channels: positive(config.client_channels, "client_channels")?,
        outstanding_per_channel: positive(config.outstanding_rpcs_per_channel, "outstanding_rpcs_per_channel")?,
        threads: usize::try_from(config.async_client_threads).unwrap_or_default(),
        rpc_shape,
        load,
        request_size,
        response_size,
        tls,
        warmup: std::time::Duration::ZERO,
        histogram,
        resolution,
        ..Default::default()
    };
    // the rate has to yield a representable mean interval per lane
    scenario
        .load_model()
        .map_err(|err| Status::invalid_argument(err.to_string()))?;
    Ok(scenario)
}

/// `port_override` replaces a zero port requested by the driver.
pub fn server_scenario_from_proto(
    config: &proto::ServerConfig,
    tls: &TlsFiles,
    port_override: Option<u16>,
) -> Result<ServerScenarioConfig, Status> {
    match ServerType::try_from(config.server_type) {
        Ok(ServerType::AsyncServer) => (),
        Ok(server_type) => {
            return Err(Status::unimplemented(format!(
                "server type {} is not supported",
                server_type.as_str_name()
            )));
        }
        Err(_) => {
            return Err(Status::invalid_argument(format!(
                "unknown server type: {}",
                config.server_type
            )));
        }
    }

    payload_sizes(config.payload_config.as_ref())?;

    let port = match u16::try_from(config.port) {
        Ok(0) => port_override.unwrap_or_default(),
        Ok(port) => port,
        Err(_) => return Err(Status::invalid_argument(format!("invalid port: {}", config.port))),
    };

    let tls = match config.security_params {
        None => None,
        Some(_) => Some(tls.server_tls().ok_or_else(|| {
            Status::failed_precondition("TLS requested but the worker has no server certificate and key configured")
        })?),
    };

    Ok(ServerScenarioConfig {
        address: Address::Inet {
            host: "0.0.0.0".to_owned(),
            port,
        },
        tls,
        threads: usize::try_from(config.async_server_threads).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientTls;
    use crate::proto::{
        ClosedLoopParams, LoadParams, PayloadConfig, PoissonParams, SecurityParams, SimpleProtoParams,
    };
    use tonic::Code;

    fn client_config() -> proto::ClientConfig {
        proto::ClientConfig {
            server_targets: vec!["127.0.0.1:10000".to_owned()],
            client_type: ClientType::AsyncClient as i32,
            outstanding_rpcs_per_channel: 1,
            client_channels: 2,
            async_client_threads: 1,
            rpc_type: RpcType::Unary as i32,
            load_params: Some(LoadParams {
                load: Some(Load::ClosedLoop(ClosedLoopParams {})),
            }),
            payload_config: Some(PayloadConfig {
                payload: Some(Payload::SimpleParams(SimpleProtoParams {
                    req_size: 10,
                    resp_size: 1000,
                })),
            }),
            ..Default::default()
        }
    }

    fn server_config() -> proto::ServerConfig {
        proto::ServerConfig {
            server_type: ServerType::AsyncServer as i32,
            ..Default::default()
        }
    }

    #[test]
    fn test_client_config() {
        let scenario = load_scenario_from_proto(&client_config(), &TlsFiles::default()).unwrap();
        assert_eq!(scenario.channels, 2);
        assert_eq!(scenario.outstanding_per_channel, 1);
        assert_eq!(scenario.threads, 1);
        assert_eq!(scenario.lane_count(), 1);
        assert_eq!(scenario.request_size, 10);
        assert_eq!(scenario.response_size, 1000);
        assert_eq!(scenario.rpc_shape, RpcShape::Unary);
        assert_eq!(scenario.load, LoadSpec::ClosedLoop);
        assert_eq!(scenario.histogram, HistogramConfig::WORKER);
        assert_eq!(scenario.tls, None);
    }

    #[test]
    fn test_client_poisson_and_histogram_params() {
        let mut config = client_config();
        config.rpc_type = RpcType::Streaming as i32;
        config.load_params = Some(LoadParams {
            load: Some(Load::Poisson(PoissonParams { offered_load: 100. })),
        });
        config.histogram_params = Some(proto::HistogramParams {
            resolution: 0.05,
            max_possible: 1e9,
        });

        let scenario = load_scenario_from_proto(&config, &TlsFiles::default()).unwrap();
        assert_eq!(scenario.rpc_shape, RpcShape::Streaming);
        assert_eq!(scenario.load, LoadSpec::Poisson { offered_load: 100. });
        assert_eq!(scenario.histogram.max_value, 1_000_000_000);
        assert_eq!(scenario.resolution, 0.05);

        config.load_params = Some(LoadParams {
            load: Some(Load::Poisson(PoissonParams { offered_load: 0. })),
        });
        let status = load_scenario_from_proto(&config, &TlsFiles::default()).unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_client_poisson_load_too_low_is_rejected() {
        let mut config = client_config();
        config.load_params = Some(LoadParams {
            load: Some(Load::Poisson(PoissonParams { offered_load: 1e-300 })),
        });
        let status = load_scenario_from_proto(&config, &TlsFiles::default()).unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_unsupported_client_kinds() {
        let mut config = client_config();
        config.client_type = ClientType::SyncClient as i32;
        let status = load_scenario_from_proto(&config, &TlsFiles::default()).unwrap_err();
        assert_eq!(status.code(), Code::Unimplemented);

        for rpc_type in [
            RpcType::StreamingFromClient,
            RpcType::StreamingFromServer,
            RpcType::StreamingBothWays,
        ] {
            let mut config = client_config();
            config.rpc_type = rpc_type as i32;
            let status = load_scenario_from_proto(&config, &TlsFiles::default()).unwrap_err();
            assert_eq!(status.code(), Code::Unimplemented);
        }

        let mut config = client_config();
        config.payload_config = Some(PayloadConfig {
            payload: Some(Payload::ComplexParams(proto::ComplexProtoParams {})),
        });
        let status = load_scenario_from_proto(&config, &TlsFiles::default()).unwrap_err();
        assert_eq!(status.code(), Code::Unimplemented);
    }

    #[test]
    fn test_invalid_client_values() {
        let mut config = client_config();
        config.client_channels = 0;
        assert_eq!(
            load_scenario_from_proto(&config, &TlsFiles::default()).unwrap_err().code(),
            Code::InvalidArgument
        );

        let mut config = client_config();
        config.server_targets.clear();
        assert_eq!(
            load_scenario_from_proto(&config, &TlsFiles::default()).unwrap_err().code(),
            Code::InvalidArgument
        );

        let mut config = client_config();
        config.server_targets = vec!["no-port".to_owned()];
        assert_eq!(
            load_scenario_from_proto(&config, &TlsFiles::default()).unwrap_err().code(),
            Code::InvalidArgument
        );
    }

    #[test]
    fn test_client_tls() {
        let mut config = client_config();
        config.security_params = Some(SecurityParams {
            use_test_ca: true,
            server_host_override: "foo.test.google.fr".to_owned(),
        });
        let status = load_scenario_from_proto(&config, &TlsFiles::default()).unwrap_err();
        assert_eq!(status.code(), Code::FailedPrecondition);

        let files = TlsFiles {
            ca: Some("/tmp/ca.pem".into()),
            ..Default::default()
        };
        let scenario = load_scenario_from_proto(&config, &files).unwrap();
        assert_eq!(
            scenario.tls,
            Some(ClientTls {
                ca: "/tmp/ca.pem".into(),
                server_host_override: Some("foo.test.google.fr".to_owned()),
            })
        );
    }

    #[test]
    fn test_server_config_port_policy() {
        let scenario = server_scenario_from_proto(&server_config(), &TlsFiles::default(), None).unwrap();
        assert_eq!(scenario.address.port(), Some(0));

        let scenario = server_scenario_from_proto(&server_config(), &TlsFiles::default(), Some(4242)).unwrap();
        assert_eq!(scenario.address.port(), Some(4242));

        let mut config = server_config();
        config.port = 5000;
        let scenario = server_scenario_from_proto(&config, &TlsFiles::default(), Some(4242)).unwrap();
        assert_eq!(scenario.address.port(), Some(5000));

        config.port = 70_000;
        assert_eq!(
            server_scenario_from_proto(&config, &TlsFiles::default(), None).unwrap_err().code(),
            Code::InvalidArgument
        );
    }

    #[test]
    fn test_unsupported_server_kinds() {
        for server_type in [ServerType::SyncServer, ServerType::AsyncGenericServer] {
            let mut config = server_config();
            config.server_type = server_type as i32;
            let status = server_scenario_from_proto(&config, &TlsFiles::default(), None).unwrap_err();
            assert_eq!(status.code(), Code::Unimplemented);
        }
    }

    #[test]
    fn test_server_tls() {
        let mut config = server_config();
        config.security_params = Some(SecurityParams::default());
        assert_eq!(
            server_scenario_from_proto(&config, &TlsFiles::default(), None).unwrap_err().code(),
            Code::FailedPrecondition
        );

        let files = TlsFiles {
            cert: Some("/tmp/cert.pem".into()),
            key: Some("/tmp/key.pem".into()),
            ca: None,
        };
        let scenario = server_scenario_from_proto(&config, &files, None).unwrap();
        assert!(scenario.tls.is_some());
    }
}
