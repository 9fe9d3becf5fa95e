//! TLS termination for the control API.
//!
//! Builds a rustls `ServerConfig` from a single PEM certificate chain and
//! private key. Handshakes run lazily inside each connection thread through
//! [`rustls::StreamOwned`], so a slow client never holds up the accept loop.

use std::{fs, net::TcpStream, path::Path, sync::Arc};

use rustls::{
    ServerConfig, ServerConnection, StreamOwned,
    pki_types::{CertificateDer, PrivateKeyDer},
};

use crate::{config::TlsPaths, constants::ALPN_HTTP11, error::ServerError};

/// TLS stream served by a connection thread.
pub type TlsStream = StreamOwned<ServerConnection, TcpStream>;

/// Loads the certificate/key pair and restricts ALPN to HTTP/1.1.
pub fn load_server_config(paths: &TlsPaths) -> Result<Arc<ServerConfig>, ServerError> {
    let certs = load_certs(&paths.cert)?;
    let key = load_private_key(&paths.key)?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::CertificateLoad {
            path: paths.cert.clone(),
            reason: e.to_string(),
        })?;
    config.alpn_protocols = vec![ALPN_HTTP11.to_vec()];

    Ok(Arc::new(config))
}

/// Wraps an accepted socket. The handshake happens on first read or write.
pub fn accept(config: Arc<ServerConfig>, stream: TcpStream) -> Result<TlsStream, rustls::Error> {
    let conn = ServerConnection::new(config)?;
    Ok(StreamOwned::new(conn, stream))
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ServerError> {
    fs::read(path).map_err(|e| ServerError::CertificateLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let pem = read_pem(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::CertificateLoad {
            path: path.to_path_buf(),
            reason: format!("Failed to parse certificate: {e}"),
        })?;

    if certs.is_empty() {
        return Err(ServerError::CertificateLoad {
            path: path.to_path_buf(),
            reason: "No certificate found in PEM".to_string(),
        });
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    let pem = read_pem(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| ServerError::CertificateLoad {
            path: path.to_path_buf(),
            reason: format!("Failed to parse private key: {e}"),
        })?
        .ok_or_else(|| ServerError::CertificateLoad {
            path: path.to_path_buf(),
            reason: "No private key found in PEM".to_string(),
        })
}
