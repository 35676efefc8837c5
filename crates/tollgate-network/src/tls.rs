//! PEM loading for the WebSocket server's TLS mode.

use std::path::Path;
use std::sync::Arc;

use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::crypto::ring;

use crate::error::NetworkError;

/// Build a TLS acceptor from a PEM certificate chain and a PEM private key.
pub fn load_tls_acceptor(cert_file: &Path, key_file: &Path) -> Result<TlsAcceptor, NetworkError> {
    let cert_pem = read(cert_file)?;
    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| NetworkError::TlsFile {
            path: cert_file.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(NetworkError::TlsNoCert {
            path: cert_file.to_path_buf(),
        });
    }

    let key_pem = read(key_file)?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|source| NetworkError::TlsFile {
            path: key_file.to_path_buf(),
            source,
        })?
        .ok_or_else(|| NetworkError::TlsNoKey {
            path: key_file.to_path_buf(),
        })?;

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn read(path: &Path) -> Result<Vec<u8>, NetworkError> {
    std::fs::read(path).map_err(|source| NetworkError::TlsFile {
        path: path.to_path_buf(),
        source,
    })
}
