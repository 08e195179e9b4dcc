use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::sync::Arc;
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;

use crate::error::{HarnessError, Result};
use crate::identity::TlsIdentity;

/// ALPN protocols offered by TLS listeners
const ALPN_PROTOCOLS: &[&[u8]] = &[b"http/1.1"];

/// Builds a TLS acceptor terminating one-way TLS with the given identity
pub fn build_acceptor(identity: &TlsIdentity) -> Result<TlsAcceptor> {
    let certs = CertificateDer::pem_slice_iter(identity.certificate_pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, rustls_pki_types::pem::Error>>()
        .map_err(|e| HarnessError::Tls(format!("Failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(HarnessError::Tls(format!(
            "No certificate found for alias '{}'",
            identity.alias
        )));
    }

    let key = {
        let mut keys: Vec<PrivateKeyDer<'static>> =
            PrivateKeyDer::pem_slice_iter(identity.private_key_pem.as_bytes())
                .collect::<std::result::Result<Vec<_>, rustls_pki_types::pem::Error>>()
                .map_err(|e| HarnessError::Tls(format!("Failed to parse private key: {e}")))?;
        let Some(k) = keys.pop() else {
            return Err(HarnessError::Tls(format!(
                "No private key found for alias '{}'",
                identity.alias
            )));
        };
        k
    };

    // TLS 1.2 and 1.3, server authentication only
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut server = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| HarnessError::Tls(format!("Failed to select protocol versions: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| HarnessError::Tls(format!("Failed to build TLS config: {e}")))?;

    server.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
    Ok(TlsAcceptor::from(Arc::new(server)))
}
