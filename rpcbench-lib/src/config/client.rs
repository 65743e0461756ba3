use std::{path::PathBuf, time::Duration};

use rama::error::{BoxError, OpaqueError};

use super::{
    Address, ClientTls, Configuration, LoadScenarioConfig, LoadSpec, Param, ParamType, RpcShape,
    Transport, parse_bytes, parse_count, parse_flag, parse_seconds,
};
use crate::histogram::HistogramConfig;

/// Parameters of the standalone load generating client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientParam {
    Address,
    Channels,
    OutstandingRpcs,
    Threads,
    ClientPayload,
    ServerPayload,
    Tls,
    TlsCa,
    ServerHostOverride,
    Transport,
    Duration,
    WarmupDuration,
    SaveHistogram,
    StreamingRpcs,
    TargetQps,
}

impl Param for ClientParam {
    fn all() -> &'static [Self] {
        &[
            Self::Address,
            Self::Channels,
            Self::OutstandingRpcs,
            Self::Threads,
            Self::ClientPayload,
            Self::ServerPayload,
            Self::Tls,
            Self::TlsCa,
            Self::ServerHostOverride,
            Self::Transport,
            Self::Duration,
            Self::WarmupDuration,
            Self::SaveHistogram,
            Self::StreamingRpcs,
            Self::TargetQps,
        ]
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Channels => "channels",
            Self::OutstandingRpcs => "outstanding_rpcs",
            Self::Threads => "threads",
            Self::ClientPayload => "client_payload",
            Self::ServerPayload => "server_payload",
            Self::Tls => "tls",
            Self::TlsCa => "tls_ca",
            Self::ServerHostOverride => "server_host_override",
            Self::Transport => "transport",
            Self::Duration => "duration",
            Self::WarmupDuration => "warmup_duration",
            Self::SaveHistogram => "save_histogram",
            Self::StreamingRpcs => "streaming_rpcs",
            Self::TargetQps => "target_qps",
        }
    }

    fn value_type(&self) -> ParamType {
        match self {
            Self::Address | Self::ServerHostOverride | Self::Transport => ParamType::Str,
            Self::Channels | Self::OutstandingRpcs | Self::Threads | Self::TargetQps => ParamType::Int,
            Self::ClientPayload | Self::ServerPayload => ParamType::Bytes,
            Self::Tls | Self::StreamingRpcs => ParamType::Flag,
            Self::TlsCa | Self::SaveHistogram => ParamType::File,
            Self::Duration | Self::WarmupDuration => ParamType::Seconds,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::Address => "Address of the benchmark server: host:port, or unix:PATH for uds",
            Self::Channels => "Number of connections to open",
            Self::OutstandingRpcs => "Number of in-flight RPCs per connection and thread",
            Self::Threads => "Number of client threads, 0 for one per core",
            Self::ClientPayload => "Request payload size in bytes",
            Self::ServerPayload => "Response payload size in bytes",
            Self::Tls => "Enable TLS",
            Self::TlsCa => "CA certificate (PEM) used to verify the server",
            Self::ServerHostOverride => "Host name expected in the server certificate",
            Self::Transport => "Transport to use: tcp or uds",
            Self::Duration => "Duration of the measured run",
            Self::WarmupDuration => "Duration of the warmup run",
            Self::SaveHistogram => "Write the latency percentile distribution to this file",
            Self::StreamingRpcs => "Use ping-pong streaming RPCs instead of unary calls",
            Self::TargetQps => "Aggregate Poisson offered load in RPCs per second, 0 for closed loop",
        }
    }

    fn default_value(&self) -> Option<&'static str> {
        match self {
            Self::Channels => Some("4"),
            Self::OutstandingRpcs => Some("10"),
            Self::Threads | Self::ClientPayload | Self::ServerPayload | Self::TargetQps => Some("0"),
            Self::Tls | Self::StreamingRpcs => Some("false"),
            Self::Transport => Some("tcp"),
            Self::Duration => Some("60"),
            Self::WarmupDuration => Some("10"),
            Self::Address | Self::TlsCa | Self::ServerHostOverride | Self::SaveHistogram => None,
        }
    }

    fn is_required(&self) -> bool {
        matches!(self, Self::Address)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConfiguration {
    pub address: Option<String>,
    pub channels: usize,
    pub outstanding_rpcs: usize,
    pub threads: usize,
    pub client_payload: usize,
    pub server_payload: usize,
    pub tls: bool,
    pub tls_ca: Option<PathBuf>,
    pub server_host_override: Option<String>,
    pub transport: Transport,
    pub duration: Duration,
    pub warmup_duration: Duration,
    pub save_histogram: Option<PathBuf>,
    pub streaming_rpcs: bool,
    pub target_qps: usize,
}

impl Configuration for ClientConfiguration {
    type Param = ClientParam;

    fn set_value(&mut self, param: ClientParam, value: &str) -> Result<(), BoxError> {
        match param {
            ClientParam::Address => self.address = Some(value.to_owned()),
            ClientParam::Channels => self.channels = parse_count(value)?,
            ClientParam::OutstandingRpcs => self.outstanding_rpcs = parse_count(value)?,
            ClientParam::Threads => self.threads = parse_count(value)?,
            ClientParam::ClientPayload => self.client_payload = parse_bytes(value)?,
            ClientParam::ServerPayload => self.server_payload = parse_bytes(value)?,
            ClientParam::Tls => self.tls = parse_flag(value)?,
            ClientParam::TlsCa => self.tls_ca = Some(value.into()),
            ClientParam::ServerHostOverride => self.server_host_override = Some(value.to_owned()),
            ClientParam::Transport => self.transport = value.parse()?,
            ClientParam::Duration => self.duration = parse_seconds(value)?,
            ClientParam::WarmupDuration => self.warmup_duration = parse_seconds(value)?,
            ClientParam::SaveHistogram => self.save_histogram = Some(value.into()),
            ClientParam::StreamingRpcs => self.streaming_rpcs = parse_flag(value)?,
            ClientParam::TargetQps => self.target_qps = parse_count(value)?,
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), BoxError> {
        if self.tls && !self.transport.supports_tls() {
            return Err(OpaqueError::from_display(format!(
                "TLS is not supported by the {} transport",
                self.transport
            ))
            .into());
        }
        if self.tls && self.tls_ca.is_none() {
            return Err(OpaqueError::from_display("--tls requires --tls_ca").into());
        }
        if self.channels == 0 {
            return Err(OpaqueError::from_display("--channels must be at least 1").into());
        }
        if self.outstanding_rpcs == 0 {
            return Err(OpaqueError::from_display("--outstanding_rpcs must be at least 1").into());
        }
        self.target()?;
        Ok(())
    }
}

impl ClientConfiguration {
    fn target(&self) -> Result<Address, BoxError> {
        let address = self
            .address
            .as_deref()
            .ok_or_else(|| OpaqueError::from_display("missing required parameter: --address"))?;
        Address::parse(address, self.transport)
    }

    pub fn to_scenario(&self) -> Result<LoadScenarioConfig, BoxError> {
        self.validate()?;
        Ok(LoadScenarioConfig {
            targets: vec![self.target()?],
            channels: self.channels,
            outstanding_per_channel: self.outstanding_rpcs,
            threads: self.threads,
            rpc_shape: if self.streaming_rpcs {
                RpcShape::Streaming
            } else {
                RpcShape::Unary
            },
            load: if self.target_qps > 0 {
                LoadSpec::Poisson {
                    offered_load: self.target_qps as f64,
                }
            } else {
                LoadSpec::ClosedLoop
            },
            request_size: self.client_payload,
            response_size: self.server_payload,
            tls: match (self.tls, &self.tls_ca) {
                (true, Some(ca)) => Some(ClientTls {
                    ca: ca.clone(),
                    server_host_override: self.server_host_override.clone(),
                }),
                _ => None,
            },
            duration: self.duration,
            warmup: self.warmup_duration,
            histogram: HistogramConfig::QPS,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigurationBuilder;

    fn build(args: &[&str]) -> Result<ClientConfiguration, BoxError> {
        ConfigurationBuilder::<ClientConfiguration>::new()
            .build("client", std::iter::once("client").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let config = build(&["--address", "localhost:10000"]).unwrap();
        assert_eq!(config.channels, 4);
        assert_eq!(config.outstanding_rpcs, 10);
        assert_eq!(config.duration, Duration::from_secs(60));
        assert_eq!(config.warmup_duration, Duration::from_secs(10));
        assert_eq!(config.transport, Transport::Tcp);
        assert!(!config.tls);
        assert!(!config.streaming_rpcs);

        let scenario = config.to_scenario().unwrap();
        assert_eq!(scenario.load, LoadSpec::ClosedLoop);
        assert_eq!(scenario.rpc_shape, RpcShape::Unary);
        assert_eq!(scenario.histogram, HistogramConfig::QPS);
        assert_eq!(
            scenario.targets,
            vec![Address::Inet {
                host: "localhost".to_owned(),
                port: 10000
            }]
        );
    }

    #[test]
    fn test_explicit_values() {
        let config = build(&[
            "--address=127.0.0.1:9000",
            "--channels=2",
            "--outstanding_rpcs=1",
            "--client_payload=1k",
            "--server_payload=1000",
            "--duration=1s",
            "--warmup_duration=0",
            "--streaming_rpcs",
            "--target_qps=500",
        ])
        .unwrap();
        assert_eq!(config.channels, 2);
        assert_eq!(config.client_payload, 1024);
        assert_eq!(config.server_payload, 1000);
        assert_eq!(config.duration, Duration::from_secs(1));
        assert_eq!(config.warmup_duration, Duration::ZERO);
        assert!(config.streaming_rpcs);

        let scenario = config.to_scenario().unwrap();
        assert_eq!(scenario.rpc_shape, RpcShape::Streaming);
        assert_eq!(scenario.load, LoadSpec::Poisson { offered_load: 500. });
        assert!(matches!(scenario.load_model().unwrap(), LoadModel::Poisson { .. }));
    }

    #[test]
    fn test_missing_address() {
        assert!(build(&["--channels=1"]).is_err());
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(build(&["--address=localhost:1", "--channels=many"]).is_err());
        assert!(build(&["--address=localhost:1", "--duration=forever"]).is_err());
        assert!(build(&["--address=localhost:1", "--channels=0"]).is_err());
    }

    #[test]
    fn test_unknown_flag() {
        assert!(build(&["--address=localhost:1", "--nope=1"]).is_err());
    }

    #[test]
    fn test_tls_requires_capable_transport() {
        assert!(
            build(&[
                "--address=unix:/tmp/bench.sock",
                "--transport=uds",
                "--tls",
                "--tls_ca=/tmp/ca.pem"
            ])
            .is_err()
        );
        assert!(build(&["--address=localhost:1", "--tls"]).is_err());

        let config = build(&["--address=localhost:1", "--tls", "--tls_ca=/tmp/ca.pem"]).unwrap();
        let tls = config.to_scenario().unwrap().tls.unwrap();
        assert_eq!(tls.ca, PathBuf::from("/tmp/ca.pem"));
        assert_eq!(tls.server_host_override, None);
    }

    #[test]
    fn test_address_must_match_transport() {
        assert!(build(&["--address=unix:/tmp/bench.sock"]).is_err());
        assert!(build(&["--address=localhost:1", "--transport=uds"]).is_err());
        assert!(build(&["--address=unix:/tmp/bench.sock", "--transport=uds"]).is_ok());
    }

    #[test]
    fn test_supported_subset_keeps_defaults() {
        let builder = ConfigurationBuilder::<ClientConfiguration>::with_supported(&[
            ClientParam::Address,
            ClientParam::Duration,
        ]);
        assert_eq!(builder.supported(), &[ClientParam::Address, ClientParam::Duration]);

        // hidden parameters are unknown flags
        assert!(
            builder
                .build("client", ["client", "--address=localhost:1", "--channels=2"])
                .is_err()
        );

        let config = builder
            .build("client", ["client", "--address=localhost:1", "--duration=5"])
            .unwrap();
        assert_eq!(config.channels, 4);
        assert_eq!(config.duration, Duration::from_secs(5));

        let usage = builder.usage("client");
        assert!(usage.contains("--address"));
        assert!(usage.contains("--duration"));
        assert!(!usage.contains("--channels"));
    }
}
