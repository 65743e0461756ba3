use std::path::PathBuf;

use rama::error::{BoxError, OpaqueError};

use super::{
    Address, Configuration, Param, ParamType, ServerScenarioConfig, ServerTls, Transport,
    parse_count, parse_flag,
};

/// Parameters of the standalone benchmark server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerParam {
    Address,
    Tls,
    TlsCert,
    TlsKey,
    Transport,
    Threads,
}

impl Param for ServerParam {
    fn all() -> &'static [Self] {
        &[
            Self::Address,
            Self::Tls,
            Self::TlsCert,
            Self::TlsKey,
            Self::Transport,
            Self::Threads,
        ]
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Tls => "tls",
            Self::TlsCert => "tls_cert",
            Self::TlsKey => "tls_key",
            Self::Transport => "transport",
            Self::Threads => "threads",
        }
    }

    fn value_type(&self) -> ParamType {
        match self {
            Self::Address | Self::Transport => ParamType::Str,
            Self::Tls => ParamType::Flag,
            Self::TlsCert | Self::TlsKey => ParamType::File,
            Self::Threads => ParamType::Int,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::Address => "Address to listen on: host:port (port 0 picks a free one), or unix:PATH",
            Self::Tls => "Enable TLS",
            Self::TlsCert => "Server certificate chain (PEM)",
            Self::TlsKey => "Server private key (PEM)",
            Self::Transport => "Transport to use: tcp or uds",
            Self::Threads => "Number of server threads, 0 for one per core",
        }
    }

    fn default_value(&self) -> Option<&'static str> {
        match self {
            Self::Tls => Some("false"),
            Self::Transport => Some("tcp"),
            Self::Threads => Some("0"),
            Self::Address | Self::TlsCert | Self::TlsKey => None,
        }
    }

    fn is_required(&self) -> bool {
        matches!(self, Self::Address)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfiguration {
    pub address: Option<String>,
    pub tls: bool,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub transport: Transport,
    pub threads: usize,
}

impl Configuration for ServerConfiguration {
    type Param = ServerParam;

    fn set_value(&mut self, param: ServerParam, value: &str) -> Result<(), BoxError> {
        match param {
            ServerParam::Address => self.address = Some(value.to_owned()),
            ServerParam::Tls => self.tls = parse_flag(value)?,
            ServerParam::TlsCert => self.tls_cert = Some(value.into()),
            ServerParam::TlsKey => self.tls_key = Some(value.into()),
            ServerParam::Transport => self.transport = value.parse()?,
            ServerParam::Threads => self.threads = parse_count(value)?,
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
        if self.tls && (self.tls_cert.is_none() || self.tls_key.is_none()) {
            return Err(OpaqueError::from_display("--tls requires --tls_cert and --tls_key").into());
        }
        self.bind_address()?;
        Ok(())
    }
}

impl ServerConfiguration {
    fn bind_address(&self) -> Result<Address, BoxError> {
        let address = self
            .address
            .as_deref()
            .ok_or_else(|| OpaqueError::from_display("missing required parameter: --address"))?;
        Address::parse(address, self.transport)
    }

    pub fn to_scenario(&self) -> Result<ServerScenarioConfig, BoxError> {
        self.validate()?;
        Ok(ServerScenarioConfig {
            address: self.bind_address()?,
            tls: match (self.tls, &self.tls_cert, &self.tls_key) {
                (true, Some(cert), Some(key)) => Some(ServerTls {
                    cert: cert.clone(),
                    key: key.clone(),
                }),
                _ => None,
            },
            threads: self.threads,
        })
    }
}
