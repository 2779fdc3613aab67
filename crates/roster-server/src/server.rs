//! Listener shell and accept loops.
//!
//! The shell owns the configuration and the registry shared by every
//! listener. Plain TCP and TLS listeners funnel into the same per-connection
//! session spawn; running both concurrently gives one presence directory
//! across both transports.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use roster_common::tls;

use crate::config::ServerConfig;
use crate::registry::Registry;
use crate::session::{self, SessionSettings};

/// First back-off after a temporary accept error.
const ACCEPT_DELAY_INITIAL: Duration = Duration::from_millis(5);

/// Back-off ceiling.
const ACCEPT_DELAY_MAX: Duration = Duration::from_secs(1);

/// The server shell.
pub struct Server {
    config: ServerConfig,
    registry: Arc<Registry>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
        }
    }

    /// Registry shared by every listener of this server.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Bind the plain listener at the configured address and serve it.
    pub async fn listen_and_serve(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!("listening on {}", self.config.listen_addr);
        self.serve(listener).await
    }

    /// Bind the TLS listener at the configured address and serve it.
    pub async fn listen_and_serve_tls(&self) -> anyhow::Result<()> {
        let tls_files = self
            .config
            .tls
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("TLS listener requires certificate configuration"))?;
        let tls_config = tls::load_server_config(
            Path::new(&tls_files.cert_path),
            Path::new(&tls_files.key_path),
        )?;
        let listener = TcpListener::bind(self.config.tls_listen_addr).await?;
        info!("listening on {} (TLS)", self.config.tls_listen_addr);
        self.serve_tls(listener, TlsAcceptor::from(tls_config)).await
    }

    /// Accept plain TCP connections until a fatal listener error.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let mut delay = Duration::ZERO;
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) if is_temporary(&e) => {
                    delay = next_delay(delay);
                    warn!("accept error: {}; retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => {
                    error!("accept failed: {}", e);
                    return Err(e.into());
                }
            };
            delay = Duration::ZERO;

            let registry = self.registry();
            let settings = self.session_settings();
            tokio::spawn(async move {
                session::run(stream, peer_addr.to_string(), registry, settings).await;
            });
        }
    }

    /// Accept TLS connections. Handshakes run inside the per-connection
    /// task: a client that fails its handshake never stalls the acceptor.
    pub async fn serve_tls(
        &self,
        listener: TcpListener,
        acceptor: TlsAcceptor,
    ) -> anyhow::Result<()> {
        let mut delay = Duration::ZERO;
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) if is_temporary(&e) => {
                    delay = next_delay(delay);
                    warn!("accept error: {}; retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => {
                    error!("accept failed: {}", e);
                    return Err(e.into());
                }
            };
            delay = Duration::ZERO;

            let acceptor = acceptor.clone();
            let registry = self.registry();
            let settings = self.session_settings();
            tokio::spawn(async move {
                match acceptor.accept(stream).await {
                    Ok(stream) => {
                        session::run(stream, peer_addr.to_string(), registry, settings).await;
                    }
                    Err(e) => debug!("{} TLS handshake failed: {}", peer_addr, e),
                }
            });
        }
    }

    fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            idle_timeout: self.config.idle_timeout(),
        }
    }
}

fn next_delay(delay: Duration) -> Duration {
    if delay.is_zero() {
        ACCEPT_DELAY_INITIAL
    } else {
        (delay * 2).min(ACCEPT_DELAY_MAX)
    }
}

/// Accept errors worth retrying; anything else closes the listener.
fn is_temporary(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_delay_doubles_to_ceiling() {
        let mut delay = Duration::ZERO;
        delay = next_delay(delay);
        assert_eq!(delay, Duration::from_millis(5));
        delay = next_delay(delay);
        assert_eq!(delay, Duration::from_millis(10));
        for _ in 0..20 {
            delay = next_delay(delay);
        }
        assert_eq!(delay, ACCEPT_DELAY_MAX);
    }

    #[test]
    fn test_is_temporary() {
        assert!(is_temporary(&io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "aborted"
        )));
        assert!(!is_temporary(&io::Error::new(
            io::ErrorKind::PermissionDenied,
            "denied"
        )));
    }
}
