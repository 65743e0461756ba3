//! Typed scenario configuration.
//!
//! Scenarios are configured either from the command line, through a
//! [`ConfigurationBuilder`] over a parameter table, or by a benchmark
//! driver sending protobuf configs to a worker (see [`control`]).

use std::{path::PathBuf, time::Duration};

use rama::error::BoxError;

use crate::{
    histogram::HistogramConfig,
    load::LoadModel,
    payload,
    proto::{PayloadType, SimpleRequest},
    utils::env,
};

mod address;
mod builder;
mod client;
pub mod control;
mod server;

pub use self::{
    address::{Address, Transport},
    builder::{
        Configuration, ConfigurationBuilder, Param, ParamType, parse_bytes, parse_count,
        parse_flag, parse_int, parse_seconds,
    },
    client::{ClientConfiguration, ClientParam},
    server::{ServerConfiguration, ServerParam},
};

/// Default bucket growth ratio of reported histograms.
pub const DEFAULT_RESOLUTION: f64 = 0.01;

/// The RPC shape lanes issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RpcShape {
    #[default]
    Unary,
    /// Ping-pong over one bidirectional stream per lane.
    Streaming,
}

/// Requested load, before it is spread over lanes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LoadSpec {
    #[default]
    ClosedLoop,
    /// Aggregate requests per second over all lanes.
    Poisson { offered_load: f64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTls {
    pub ca: PathBuf,
    pub server_host_override: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTls {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Everything needed to run one load generating client scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadScenarioConfig {
    /// Round robin assigned to channels.
    pub targets: Vec<Address>,
    pub channels: usize,
    pub outstanding_per_channel: usize,
    /// `0` means one per core.
    pub threads: usize,
    pub rpc_shape: RpcShape,
    pub load: LoadSpec,
    pub request_size: usize,
    pub response_size: usize,
    pub tls: Option<ClientTls>,
    pub duration: Duration,
    pub warmup: Duration,
    pub histogram: HistogramConfig,
    pub resolution: f64,
}

impl Default for LoadScenarioConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            channels: 4,
            outstanding_per_channel: 10,
            threads: 0,
            rpc_shape: RpcShape::Unary,
            load: LoadSpec::ClosedLoop,
            request_size: 0,
            response_size: 0,
            tls: None,
            duration: Duration::from_secs(60),
            warmup: Duration::from_secs(10),
            histogram: HistogramConfig::WORKER,
            resolution: DEFAULT_RESOLUTION,
        }
    }
}

impl LoadScenarioConfig {
    pub fn thread_count(&self) -> usize {
        env::resolve_thread_count(self.threads)
    }

    /// Total number of concurrent lanes.
    pub fn lane_count(&self) -> usize {
        self.thread_count() * self.outstanding_per_channel.max(1)
    }

    pub fn load_model(&self) -> Result<LoadModel, BoxError> {
        match self.load {
            LoadSpec::ClosedLoop => Ok(LoadModel::ClosedLoop),
            LoadSpec::Poisson { offered_load } => LoadModel::poisson(offered_load, self.lane_count()),
        }
    }

    /// The request every lane sends.
    pub fn request(&self) -> SimpleRequest {
        payload::make_request(PayloadType::Compressable, self.request_size, self.response_size)
    }
}

/// Everything needed to serve the benchmark service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerScenarioConfig {
    pub address: Address,
    pub tls: Option<ServerTls>,
    /// `0` means one per core.
    pub threads: usize,
}

impl Default for ServerScenarioConfig {
    fn default() -> Self {
        Self {
            address: Address::Inet {
                host: "0.0.0.0".to_owned(),
                port: 0,
            },
            tls: None,
            threads: 0,
        }
    }
}

impl ServerScenarioConfig {
    pub fn thread_count(&self) -> usize {
        env::resolve_thread_count(self.threads)
    }
}
