mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./mediakiln.toml",
        "~/.config/mediakiln/config.toml",
        "/etc/mediakiln/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.transcode.max_concurrent == 0 {
        anyhow::bail!("transcode.max_concurrent cannot be 0");
    }

    if config.transcode.encode_timeout_secs == 0 {
        anyhow::bail!("transcode.encode_timeout_secs cannot be 0");
    }

    if config.transcode.progress_interval_secs == 0 {
        anyhow::bail!("transcode.progress_interval_secs cannot be 0");
    }

    if config.cache.janitor_interval_secs == 0 {
        anyhow::bail!("cache.janitor_interval_secs cannot be 0");
    }

    if config.cache.ttl_hours == 0 {
        tracing::warn!("cache.ttl_hours is 0: every sweep evicts all unused renditions");
    }

    Ok(())
}
