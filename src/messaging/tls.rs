//! rustls client configuration for the local router connection

use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::{Error, Result};
use crate::router::TlsFiles;

/// Build a mutual-TLS client config trusting only the namespace CA
pub fn client_config(files: &TlsFiles) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_file_iter(&files.ca)
        .map_err(|e| Error::TlsError(format!("Failed to read {}: {}", files.ca.display(), e)))?
    {
        let cert = cert.map_err(|e| Error::TlsError(format!("Failed to parse CA cert: {}", e)))?;
        roots
            .add(cert)
            .map_err(|e| Error::TlsError(format!("Failed to add CA cert: {}", e)))?;
    }
    if roots.is_empty() {
        return Err(Error::TlsError(format!(
            "no CA certificate found in {}",
            files.ca.display()
        )));
    }

    let certs = CertificateDer::pem_file_iter(&files.cert)
        .map_err(|e| Error::TlsError(format!("Failed to read {}: {}", files.cert.display(), e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::TlsError(format!("Failed to parse certificates: {}", e)))?;

    let key = PrivateKeyDer::from_pem_file(&files.key)
        .map_err(|e| Error::TlsError(format!("Failed to parse private key: {}", e)))?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::TlsError(format!("Failed to select protocol versions: {}", e)))?
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| Error::TlsError(format!("Failed to create client config: {}", e)))
}
