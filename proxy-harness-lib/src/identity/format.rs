use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HarnessError;

/// Keystore format, which also fixes the key algorithm of generated identities
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum KeystoreFormat {
    /// ECDSA over P-256 with SHA-256
    #[default]
    EcdsaP256,
    /// ECDSA over P-384 with SHA-384
    EcdsaP384,
    /// Ed25519
    Ed25519,
}

impl KeystoreFormat {
    pub const ALL: [KeystoreFormat; 3] =
        [KeystoreFormat::EcdsaP256, KeystoreFormat::EcdsaP384, KeystoreFormat::Ed25519];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeystoreFormat::EcdsaP256 => "ecdsa-p256",
            KeystoreFormat::EcdsaP384 => "ecdsa-p384",
            KeystoreFormat::Ed25519 => "ed25519",
        }
    }

    pub(crate) fn signature_algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        match self {
            KeystoreFormat::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeystoreFormat::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            KeystoreFormat::Ed25519 => &rcgen::PKCS_ED25519,
        }
    }
}

impl fmt::Display for KeystoreFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeystoreFormat {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeystoreFormat::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                HarnessError::Config(format!(
                    "Unknown keystore format '{s}'. Supported formats: ecdsa-p256, ecdsa-p384, ed25519"
                ))
            })
    }
}
