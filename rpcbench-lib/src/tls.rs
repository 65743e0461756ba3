//! TLS configuration of benchmark channels and servers, loaded from PEM files.

use std::path::{Path, PathBuf};

use rama::error::{BoxError, ErrorContext as _};
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::config::{ClientTls, ServerTls};

/// PEM files a process may use when a scenario asks for TLS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsFiles {
    /// CA bundle trusted by clients.
    pub ca: Option<PathBuf>,
    /// Server certificate chain.
    pub cert: Option<PathBuf>,
    /// Server private key.
    pub key: Option<PathBuf>,
}

impl TlsFiles {
    /// Client side TLS of a scenario, `None` without a CA file.
    pub fn client_tls(&self, server_host_override: Option<&str>) -> Option<ClientTls> {
        Some(ClientTls {
            ca: self.ca.clone()?,
            server_host_override: server_host_override.filter(|s| !s.is_empty()).map(str::to_owned),
        })
    }

    /// Server side TLS of a scenario, `None` unless both cert and key are set.
    pub fn server_tls(&self) -> Option<ServerTls> {
        Some(ServerTls {
            cert: self.cert.clone()?,
            key: self.key.clone()?,
        })
    }
}

fn read_pem(path: &Path, what: &'static str) -> Result<Vec<u8>, BoxError> {
    std::fs::read(path)
        .context(what)
        .with_context_debug_field("path", || path.to_owned())
}

pub fn client_tls_config(ca: &Path, server_host_override: Option<&str>) -> Result<ClientTlsConfig, BoxError> {
    let ca = Certificate::from_pem(read_pem(ca, "read CA certificate")?);
    let mut config = ClientTlsConfig::new().ca_certificate(ca);
    if let Some(domain) = server_host_override.filter(|s| !s.is_empty()) {
        config = config.domain_name(domain);
    }
    Ok(config)
}

pub fn server_tls_config(cert: &Path, key: &Path) -> Result<ServerTlsConfig, BoxError> {
    let identity = Identity::from_pem(
        read_pem(cert, "read server certificate")?,
        read_pem(key, "read server private key")?,
    );
    Ok(ServerTlsConfig::new().identity(identity))
}
