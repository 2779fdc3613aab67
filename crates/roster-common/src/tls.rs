//! TLS configuration for the TLS listener.
//!
//! Builds a server-side rustls configuration from an X.509 certificate and
//! private key PEM pair supplied by the embedder. Certificate provisioning
//! itself (CA signing, rotation) is out of scope; the server only consumes
//! the two files.

use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;

use crate::error::{Result, RosterError};

/// Build a rustls server configuration from certificate and key files.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>> {
    let cert_pem = read_pem(cert_path)?;
    let key_pem = read_pem(key_path)?;
    create_server_config(&cert_pem, &key_pem)
}

/// Build a rustls server configuration from PEM data.
///
/// Every entry in the certificate PEM must parse: a chain with a corrupt
/// member is rejected outright rather than silently thinned out.
pub fn create_server_config(cert_pem: &str, key_pem: &str) -> Result<Arc<ServerConfig>> {
    let mut chain = Vec::new();
    for entry in rustls_pemfile::certs(&mut cert_pem.as_bytes()) {
        let cert =
            entry.map_err(|e| RosterError::Certificate(format!("bad certificate entry: {}", e)))?;
        chain.push(cert);
    }
    if chain.is_empty() {
        return Err(RosterError::Certificate(
            "certificate PEM holds no certificates".into(),
        ));
    }

    let key = match rustls_pemfile::private_key(&mut key_pem.as_bytes()) {
        Ok(Some(key)) => key,
        Ok(None) => {
            return Err(RosterError::Certificate(
                "key PEM holds no private key".into(),
            ))
        }
        Err(e) => return Err(RosterError::Certificate(format!("bad private key: {}", e))),
    };

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)?;

    Ok(Arc::new(config))
}

fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| RosterError::Certificate(format!("cannot read {}: {}", path.display(), e)))
}
