use std::fs;
use std::path::{Path, PathBuf};

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{IdentityOrigin, KeystoreFormat, TlsIdentity};
use crate::error::{HarnessError, Result};

/// On-disk keystore document
#[derive(Debug, Serialize, Deserialize)]
struct KeystoreFile {
    format: KeystoreFormat,
    alias: String,
    password_sha256: String,
    certificate: String,
    private_key: String,
}

/// File-backed store holding one self-signed certificate entry
pub struct KeyStore;

impl KeyStore {
    /// Opens the keystore at `path`, generating it when absent.
    ///
    /// An entry with the requested format and alias is reused as is. A keystore in
    /// another format or under another alias is regenerated in place. A keystore
    /// that cannot be parsed or opened with `password` is an error and is left
    /// untouched.
    pub fn load_or_create(
        format: KeystoreFormat,
        path: &Path,
        password: &str,
        alias: &str,
        subject_alt_names: &[String],
    ) -> Result<TlsIdentity> {
        if path.exists() {
            let stored = read_keystore(path)?;
            if stored.password_sha256 != password_digest(password) {
                return Err(HarnessError::Provisioning(format!(
                    "keystore {} cannot be opened with the configured password",
                    path.display()
                )));
            }
            if stored.format == format && stored.alias == alias {
                debug!(path = %path.display(), %format, alias, "reusing keystore");
                return Ok(TlsIdentity {
                    alias: stored.alias,
                    format: stored.format,
                    keystore_path: Some(path.to_path_buf()),
                    password: password.to_string(),
                    certificate_pem: stored.certificate,
                    private_key_pem: stored.private_key,
                    origin: IdentityOrigin::Loaded,
                });
            }
            info!(
                path = %path.display(),
                stored_format = %stored.format,
                requested_format = %format,
                "keystore format or alias changed, regenerating"
            );
        }

        let (certificate_pem, private_key_pem) =
            generate_self_signed(format, alias, subject_alt_names)?;
        let document = KeystoreFile {
            format,
            alias: alias.to_string(),
            password_sha256: password_digest(password),
            certificate: certificate_pem.clone(),
            private_key: private_key_pem.clone(),
        };
        write_keystore(path, &document)?;
        info!(path = %path.display(), %format, alias, "generated keystore");

        Ok(TlsIdentity {
            alias: alias.to_string(),
            format,
            keystore_path: Some(path.to_path_buf()),
            password: password.to_string(),
            certificate_pem,
            private_key_pem,
            origin: IdentityOrigin::Generated,
        })
    }
}

/// Generates a self-signed certificate and its PKCS#8 key, both PEM encoded
pub(crate) fn generate_self_signed(
    format: KeystoreFormat,
    alias: &str,
    subject_alt_names: &[String],
) -> Result<(String, String)> {
    let key_pair = KeyPair::generate_for(format.signature_algorithm())
        .map_err(|e| HarnessError::Provisioning(format!("Failed to generate {format} key: {e}")))?;

    let mut params = CertificateParams::new(subject_alt_names.to_vec())
        .map_err(|e| HarnessError::Provisioning(format!("Invalid subject alt names: {e}")))?;
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, alias);
    params.distinguished_name = name;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| HarnessError::Provisioning(format!("Failed to self-sign certificate: {e}")))?;

    Ok((cert.pem(), key_pair.serialize_pem()))
}

fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn read_keystore(path: &Path) -> Result<KeystoreFile> {
    let txt = fs::read_to_string(path).map_err(|e| {
        HarnessError::Provisioning(format!("Failed to read keystore {}: {e}", path.display()))
    })?;
    toml::from_str(&txt).map_err(|e| {
        HarnessError::Provisioning(format!("Failed to parse keystore {}: {e}", path.display()))
    })
}

fn write_keystore(path: &Path, document: &KeystoreFile) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            HarnessError::Provisioning(format!(
                "Failed to create keystore directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    let txt = toml::to_string(document)
        .map_err(|e| HarnessError::Provisioning(format!("Failed to serialize keystore: {e}")))?;

    let tmp = staging_path(path);
    fs::write(&tmp, txt).map_err(|e| {
        HarnessError::Provisioning(format!("Failed to write keystore {}: {e}", tmp.display()))
    })?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        HarnessError::Provisioning(format!("Failed to move keystore into {}: {e}", path.display()))
    })
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_digest_is_stable_hex() {
        let digest = password_digest("changeit");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, password_digest("changeit"));
        assert_ne!(digest, password_digest("changeit!"));
    }

    #[test]
    fn test_staging_path_is_sibling() {
        let path = Path::new("/tmp/keys/keystore.toml");
        let tmp = staging_path(path);
        assert_eq!(tmp.parent(), path.parent());
        assert!(tmp.to_string_lossy().ends_with(".tmp"));
    }
}
