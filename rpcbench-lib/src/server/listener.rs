use rama::{
    error::{BoxError, ErrorContext as _, OpaqueError},
    telemetry::tracing,
};
use tokio::net::TcpListener;
use tonic::transport::{Server, ServerTlsConfig};

use super::BenchmarkServer;
use crate::config::Address;

/// A bound, not yet serving, benchmark listener.
#[derive(Debug)]
pub enum BenchmarkListener {
    Tcp(TcpListener),
    #[cfg(target_family = "unix")]
    Unix(tokio::net::UnixListener),
}

impl BenchmarkListener {
    /// Bind `address`. A tcp port of `0` picks a free port.
    ///
    /// Must be called within the runtime that will serve the listener.
    pub async fn bind(address: &Address) -> Result<Self, BoxError> {
        match address {
            Address::Inet { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port))
                    .await
                    .context("bind benchmark tcp listener")
                    .with_context_debug_field("address", || address.to_string())?;
                Ok(Self::Tcp(listener))
            }
            #[cfg(target_family = "unix")]
            Address::Unix(path) => {
                use std::os::unix::fs::FileTypeExt as _;

                // a socket left behind by an earlier run
                if std::fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_socket()) {
                    tracing::debug!(path = %path.display(), "remove stale unix socket");
                    std::fs::remove_file(path)
                        .context("remove stale unix socket")
                        .with_context_debug_field("path", || path.clone())?;
                }
                let listener = tokio::net::UnixListener::bind(path)
                    .context("bind benchmark unix listener")
                    .with_context_debug_field("path", || path.clone())?;
                Ok(Self::Unix(listener))
            }
            #[cfg(not(target_family = "unix"))]
            Address::Unix(_) => Err(OpaqueError::from_display("unix sockets are not supported on this platform").into()),
        }
    }

    /// The address the listener is bound to, with the actual port.
    pub fn local_address(&self) -> Result<Address, BoxError> {
        match self {
            Self::Tcp(listener) => {
                let addr = listener.local_addr().context("tcp listener local address")?;
                Ok(Address::Inet {
                    host: addr.ip().to_string(),
                    port: addr.port(),
                })
            }
            #[cfg(target_family = "unix")]
            Self::Unix(listener) => {
                let addr = listener.local_addr().context("unix listener local address")?;
                let path = addr
                    .as_pathname()
                    .ok_or_else(|| OpaqueError::from_display("unix listener is not bound to a path"))?;
                Ok(Address::Unix(path.to_owned()))
            }
        }
    }

    /// Serve `service` until `shutdown` resolves, then drain connections.
    pub async fn serve(
        self,
        service: BenchmarkServer,
        tls: Option<ServerTlsConfig>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), BoxError> {
        let mut builder = Server::builder();
        if let Some(tls) = tls {
            if !matches!(self, Self::Tcp(_)) {
                return Err(OpaqueError::from_display("TLS is only supported over tcp").into());
            }
            builder = builder.tls_config(tls).context("configure server TLS")?;
        }
        let router = builder.add_service(service.into_service());

        match self {
            Self::Tcp(listener) => {
                use futures::StreamExt as _;

                let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener).inspect(|stream| {
                    if let Ok(stream) = stream
                        && let Err(err) = stream.set_nodelay(true)
                    {
                        tracing::debug!("failed to set TCP_NODELAY: {err}");
                    }
                });
                router
                    .serve_with_incoming_shutdown(incoming, shutdown)
                    .await
                    .context("serve benchmark service over tcp")?;
            }
            #[cfg(target_family = "unix")]
            Self::Unix(listener) => {
                let incoming = tokio_stream::wrappers::UnixListenerStream::new(listener);
                router
                    .serve_with_incoming_shutdown(incoming, shutdown)
                    .await
                    .context("serve benchmark service over unix socket")?;
            }
        }
        Ok(())
    }
}
