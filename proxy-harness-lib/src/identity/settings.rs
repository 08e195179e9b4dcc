use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use super::KeystoreFormat;

/// Shared setting naming the keystore format currently in effect.
///
/// Anything that later asks "which format should I use" reads it from here, so a
/// session overriding it must take a [`FormatSnapshot`] first and restore it on
/// teardown. Clones share the same value. Nothing serialises writers: two
/// sessions started concurrently against the same settings race.
#[derive(Debug, Clone)]
pub struct KeystoreSettings {
    format: Arc<RwLock<KeystoreFormat>>,
}

/// Value of [`KeystoreSettings`] captured before an override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSnapshot(KeystoreFormat);

impl FormatSnapshot {
    pub fn format(&self) -> KeystoreFormat {
        self.0
    }
}

impl KeystoreSettings {
    pub fn new(format: KeystoreFormat) -> Self {
        Self { format: Arc::new(RwLock::new(format)) }
    }

    /// The process-wide settings
    pub fn global() -> &'static KeystoreSettings {
        static GLOBAL: OnceLock<KeystoreSettings> = OnceLock::new();
        GLOBAL.get_or_init(|| KeystoreSettings::new(KeystoreFormat::default()))
    }

    pub fn format(&self) -> KeystoreFormat {
        *self.format.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the active format, returning the previous one
    pub fn set_format(&self, format: KeystoreFormat) -> KeystoreFormat {
        let mut guard = self.format.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, format)
    }

    pub fn snapshot(&self) -> FormatSnapshot {
        FormatSnapshot(self.format())
    }

    pub fn restore(&self, snapshot: FormatSnapshot) {
        self.set_format(snapshot.0);
    }
}

impl Default for KeystoreSettings {
    fn default() -> Self {
        Self::new(KeystoreFormat::default())
    }
}
