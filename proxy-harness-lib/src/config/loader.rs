use std::fs;
use std::path::Path;

use crate::config::SessionConfig;
use crate::error::{HarnessError, Result};

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<SessionConfig> {
    let txt = fs::read_to_string(p)
        .map_err(|e| HarnessError::Config(format!("Failed to read config file: {e}")))?;
    let cfg: SessionConfig = toml::from_str(&txt)
        .map_err(|e| HarnessError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &SessionConfig) -> Result<()> {
    if cfg.host.trim().is_empty() {
        return Err(HarnessError::Config("host cannot be empty".to_string()));
    }

    let prefix = cfg.normalized_prefix();
    if prefix.chars().any(|c| c == '?' || c == '#' || c.is_whitespace()) {
        return Err(HarnessError::Config(format!(
            "path_prefix contains invalid characters: {:?}",
            cfg.path_prefix
        )));
    }

    for (name, port) in [("http_port", cfg.http_port), ("https_port", cfg.https_port)] {
        if port == Some(0) {
            return Err(HarnessError::Config(format!("{name} cannot be 0")));
        }
    }

    if let (Some(http), Some(https)) = (cfg.http_port, cfg.https_port) {
        if http == https {
            return Err(HarnessError::Config(format!(
                "http_port and https_port must differ (both {http})"
            )));
        }
    }

    if cfg.keystore.password.is_empty() {
        return Err(HarnessError::Config("keystore.password cannot be empty".to_string()));
    }

    if cfg.keystore.alias.trim().is_empty() {
        return Err(HarnessError::Config("keystore.alias cannot be empty".to_string()));
    }

    if cfg.timeout.settle_ms == 0 {
        return Err(HarnessError::Config("timeout.settle_ms must be positive".to_string()));
    }

    if cfg.timeout.shutdown_secs == 0 {
        return Err(HarnessError::Config("timeout.shutdown_secs must be positive".to_string()));
    }

    Ok(())
}
