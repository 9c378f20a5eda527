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
        "./reelforge.toml",
        "~/.config/reelforge/config.toml",
        "/etc/reelforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.worker.concurrency == 0 {
        anyhow::bail!("Worker concurrency must be at least 1");
    }

    if config.worker.task_timeout_secs == 0 {
        anyhow::bail!("Task timeout cannot be 0");
    }

    if config.hub.queue_capacity == 0 {
        anyhow::bail!("Hub queue capacity must be at least 1");
    }

    let watchdog = &config.watchdog;
    if watchdog.tick_secs == 0 {
        anyhow::bail!("Watchdog tick cannot be 0");
    }
    if watchdog.startup_timeout_secs >= watchdog.stall_timeout_secs {
        anyhow::bail!(
            "Watchdog startup timeout ({}s) must be shorter than the stall timeout ({}s)",
            watchdog.startup_timeout_secs,
            watchdog.stall_timeout_secs
        );
    }

    if config.storage.kind == StorageKind::Remote {
        let Some(remote) = &config.storage.remote else {
            anyhow::bail!("Storage kind is 'remote' but [storage.remote] is missing");
        };
        for (field, value) in [
            ("endpoint", &remote.endpoint),
            ("bucket", &remote.bucket),
            ("public_base_url", &remote.public_base_url),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("Remote storage is missing '{}'", field);
            }
        }
        if remote.access_token.is_empty() {
            tracing::warn!("Remote storage has no access token; uploads are unauthenticated");
        }
    }

    Ok(())
}
