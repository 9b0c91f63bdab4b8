//! A2 — typed scanner configuration, loaded via the `config` crate from a
//! TOML file seeded with an embedded default, mirroring the teacher's
//! `config::loader` module.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use config::Config;
use log::info;
use serde::Deserialize;

fn default_config_toml() -> &'static str {
    include_str!("../config/default.toml")
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    /// Ceiling on concurrently in-flight scan workers.
    #[serde(default = "ScannerConfig::default_max_concurrent_scans")]
    pub max_concurrent_scans: usize,

    /// Batch size requested from the store on every dispatcher tick.
    #[serde(default = "ScannerConfig::default_batch_size")]
    pub batch_size: usize,

    /// Seconds between dispatcher ticks.
    #[serde(default = "ScannerConfig::default_dispatch_tick_secs")]
    pub dispatch_tick_secs: u64,

    /// Seconds between syncer polls during startup wait.
    #[serde(default = "ScannerConfig::default_sync_poll_interval_secs")]
    pub sync_poll_interval_secs: u64,
}

impl ScannerConfig {
    fn default_max_concurrent_scans() -> usize {
        100
    }

    fn default_batch_size() -> usize {
        200
    }

    fn default_dispatch_tick_secs() -> u64 {
        15
    }

    fn default_sync_poll_interval_secs() -> u64 {
        15
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans: Self::default_max_concurrent_scans(),
            batch_size: Self::default_batch_size(),
            dispatch_tick_secs: Self::default_dispatch_tick_secs(),
            sync_poll_interval_secs: Self::default_sync_poll_interval_secs(),
        }
    }
}

/// Loads configuration from `path`, writing the embedded default there first
/// if the file does not yet exist.
pub fn load_configuration(path: &Path) -> Result<ScannerConfig> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("failed to create config directory")?;
        }
        fs::write(path, default_config_toml()).context("could not write default config")?;
        info!(path:% = path.display(); "created new configuration file");
    }

    let filename = path.to_str().context("invalid config file path")?;
    let cfg = Config::builder()
        .add_source(config::File::with_name(filename))
        .add_source(config::Environment::with_prefix("HOSTSCAN").separator("__"))
        .build()
        .context("could not build configuration")?;

    cfg.try_deserialize().context("could not parse configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design_constants() {
        let cfg = ScannerConfig::default();
        assert_eq!(cfg.max_concurrent_scans, 100);
        assert_eq!(cfg.dispatch_tick_secs, 15);
        assert_eq!(cfg.sync_poll_interval_secs, 15);
    }

    #[test]
    fn embedded_default_contains_every_field() {
        let text = default_config_toml();
        assert!(text.contains("max_concurrent_scans"));
        assert!(text.contains("batch_size"));
        assert!(text.contains("dispatch_tick_secs"));
        assert!(text.contains("sync_poll_interval_secs"));
    }

    #[test]
    fn missing_file_is_seeded_with_embedded_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostscan.toml");
        assert!(!path.exists());

        let cfg = load_configuration(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.max_concurrent_scans, 100);
    }

    #[test]
    fn env_override_takes_precedence_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostscan.toml");
        // SAFETY: this test does not run concurrently with other tests that
        // read this variable, and it is removed before the function returns.
        unsafe {
            std::env::set_var("HOSTSCAN__MAX_CONCURRENT_SCANS", "7");
        }
        let cfg = load_configuration(&path).unwrap();
        unsafe {
            std::env::remove_var("HOSTSCAN__MAX_CONCURRENT_SCANS");
        }
        assert_eq!(cfg.max_concurrent_scans, 7);
    }
}
