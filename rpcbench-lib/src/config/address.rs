use std::{fmt, path::PathBuf, str::FromStr};

use rama::error::{BoxError, ErrorContext as _, OpaqueError};

/// Transport a benchmark channel or server runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// HTTP/2 over TCP.
    #[default]
    Tcp,
    /// HTTP/2 over a unix domain socket.
    Uds,
}

impl Transport {
    pub fn supports_tls(self) -> bool {
        matches!(self, Self::Tcp)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Uds => "uds",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = BoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "uds" | "unix" => Ok(Self::Uds),
            other => Err(OpaqueError::from_display(format!("unknown transport: {other}")).into()),
        }
    }
}

/// Address of a benchmark server: `host:port` or `unix:PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Inet { host: String, port: u16 },
    Unix(PathBuf),
}

impl Address {
    /// Parse an address for the given transport.
    pub fn parse(s: &str, transport: Transport) -> Result<Self, BoxError> {
        let address: Self = s.parse()?;
        if address.transport() != transport {
            return Err(OpaqueError::from_display(format!(
                "address '{s}' cannot be used with the {transport} transport"
            ))
            .into());
        }
        Ok(address)
    }

    pub fn transport(&self) -> Transport {
        match self {
            Self::Inet { .. } => Transport::Tcp,
            Self::Unix(_) => Transport::Uds,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Inet { port, .. } => Some(*port),
            Self::Unix(_) => None,
        }
    }

    /// Host name used for TLS verification and the request authority.
    pub fn host(&self) -> Option<&str> {
        match self {
            Self::Inet { host, .. } => Some(host),
            Self::Unix(_) => None,
        }
    }
}

impl FromStr for Address {
    type Err = BoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(OpaqueError::from_display("unix address without a path").into());
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            OpaqueError::from_display(format!("address '{s}' is not of the form host:port"))
        })?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(OpaqueError::from_display(format!("address '{s}' has an empty host")).into());
        }
        let port = port
            .parse::<u16>()
            .context("parse port")
            .context_str_field("address", s)?;

        Ok(Self::Inet {
            host: host.to_owned(),
            port,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            Self::Inet { host, port } => write!(f, "{host}:{port}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}
