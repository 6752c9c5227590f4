//! # Configuración TLS
//! src/listener/tls.rs
//!
//! Carga certificado y clave PEM y arma el `ServerConfig` de rustls que
//! comparten todas las conexiones de un listener seguro.

use super::TlsFiles;
use crate::error::{Result, ServerError};
use rustls::crypto::ring::default_provider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Construye la configuración de servidor a partir de los archivos PEM
pub fn server_config(files: &TlsFiles) -> Result<Arc<ServerConfig>> {
    let certs = load_certs(&files.certificate)?;
    let key = load_key(&files.key)?;

    let config = ServerConfig::builder_with_provider(Arc::new(default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(format!("{}: {e}", files.certificate.display())))?;

    Ok(Arc::new(config))
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ServerError::Tls(format!("cannot open {}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("{}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(ServerError::Tls(format!("no certificates found in {}", path.display())));
    }
    Ok(certs)
}

/// Acepta PKCS#8, PKCS#1 y SEC1; la primera clave del archivo gana
fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| ServerError::Tls(format!("{}: {e}", path.display())))?
        .ok_or_else(|| ServerError::Tls(format!("no private key found in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn files(cert: PathBuf, key: PathBuf) -> TlsFiles {
        TlsFiles {
            certificate: cert,
            key,
        }
    }

    #[test]
    fn test_missing_file() {
        let err = server_config(&files("/nonexistent/cert.pem".into(), "/nonexistent/key.pem".into()))
            .unwrap_err();
        assert!(err.to_string().contains("cannot open /nonexistent/cert.pem"));
    }

    #[test]
    fn test_file_without_pem_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pem");
        std::fs::write(&path, "not a certificate\n").unwrap();

        let err = server_config(&files(path.clone(), path)).unwrap_err();
        assert!(err.to_string().contains("no certificates found"));
    }
}
