mod format;
mod keystore;
mod settings;

use std::path::PathBuf;

use tracing::info;

pub use format::KeystoreFormat;
pub use keystore::KeyStore;
pub use settings::{FormatSnapshot, KeystoreSettings};

use crate::config::KeystoreConfig;
use crate::error::Result;

/// Where the material of a [`TlsIdentity`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityOrigin {
    /// Read back from an existing keystore file
    Loaded,
    /// Freshly generated (and persisted when file backed)
    Generated,
    /// Generated in memory, never persisted
    Ephemeral,
}

/// Certificate and key used to terminate TLS on a listener
#[derive(Debug, Clone)]
pub struct TlsIdentity {
    pub alias: String,
    pub format: KeystoreFormat,
    /// Backing keystore file, None for ephemeral identities
    pub keystore_path: Option<PathBuf>,
    pub password: String,
    pub certificate_pem: String,
    pub private_key_pem: String,
    pub origin: IdentityOrigin,
}

impl TlsIdentity {
    /// In-memory self-signed identity, used by TLS upstreams
    pub fn ephemeral(
        alias: &str,
        format: KeystoreFormat,
        subject_alt_names: &[String],
    ) -> Result<Self> {
        let (certificate_pem, private_key_pem) =
            keystore::generate_self_signed(format, alias, subject_alt_names)?;
        Ok(Self {
            alias: alias.to_string(),
            format,
            keystore_path: None,
            password: String::new(),
            certificate_pem,
            private_key_pem,
            origin: IdentityOrigin::Ephemeral,
        })
    }
}

/// Obtains the session's TLS identity from its keystore
pub struct IdentityProvisioner {
    settings: KeystoreSettings,
    keystore: KeystoreConfig,
}

impl IdentityProvisioner {
    pub fn new(settings: KeystoreSettings, keystore: KeystoreConfig) -> Self {
        Self { settings, keystore }
    }

    /// Makes `format` the active keystore format and loads or creates the identity.
    ///
    /// The format switch is visible to every holder of the same
    /// [`KeystoreSettings`]; callers snapshot the settings beforehand.
    pub fn ensure_identity(&self, format: KeystoreFormat) -> Result<TlsIdentity> {
        let previous = self.settings.set_format(format);
        if previous != format {
            info!(%previous, %format, "switched active keystore format");
        }
        KeyStore::load_or_create(
            format,
            &self.keystore.path,
            &self.keystore.password,
            &self.keystore.alias,
            &self.keystore.subject_alt_names,
        )
    }

    pub fn settings(&self) -> &KeystoreSettings {
        &self.settings
    }
}
