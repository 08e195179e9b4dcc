use rustls_pki_types::pem::PemObject;
use rustls_pki_types::CertificateDer;
use std::sync::Arc;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::error::{HarnessError, Result};

/// Builds a TLS connector that trusts exactly the certificates in `trusted_pem`
pub fn build_connector(trusted_pem: &str) -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_slice_iter(trusted_pem.as_bytes()) {
        let cert = cert.map_err(|e| HarnessError::Tls(format!("Failed to parse certificate: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| HarnessError::Tls(format!("Rejected trust anchor: {e}")))?;
    }
    if roots.is_empty() {
        return Err(HarnessError::Tls("No trusted certificate given".to_string()));
    }

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut client = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| HarnessError::Tls(format!("Failed to select protocol versions: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    client.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(TlsConnector::from(Arc::new(client)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_requires_a_certificate() {
        let err = build_connector("").err();
        assert!(matches!(err, Some(HarnessError::Tls(_))));
    }
}
