//! Bridge configuration loaded from a TOML file.
//!
//! The file carries an `[edr]` section for the endpoint-detection API, an
//! `[intel]` section for the threat-intel platform, and a `[bridge]` section
//! tuning the daemon. CLI flags override individual values.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub edr: ApiConfig,
    pub intel: IntelConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Connection settings for the EDR REST/stream API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL, e.g. `https://edr.example.com:8000`.
    pub url: String,
    /// Static API key.
    pub key: String,
    /// Verify TLS certificates. Disable only for self-signed lab setups.
    #[serde(default = "default_true")]
    pub verify: bool,
}

/// Connection settings for the intel platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelConfig {
    pub url: String,
    pub key: String,
    #[serde(default = "default_true")]
    pub verify: bool,
    /// Source name attached to indicators pulled from this platform.
    #[serde(default)]
    pub name: String,
}

/// Daemon tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Dedup cooldown in seconds: minimum interval between repeated
    /// sighting reports for the same (source, value) pair.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Capacity of the ingestion work queue. The stream producer blocks
    /// (never drops) once this many events are waiting.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Telemetry channel whose events feed the sighting extractor.
    #[serde(default = "default_channel")]
    pub channel: String,

    /// How often to sweep cache entries older than the cooldown, in
    /// seconds. 0 disables sweeping.
    #[serde(default = "default_sweep_secs")]
    pub sweep_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_channel() -> String {
    sightline_core::SYSMON_CHANNEL.to_string()
}

fn default_sweep_secs() -> u64 {
    600
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            queue_capacity: default_queue_capacity(),
            channel: default_channel(),
            sweep_secs: default_sweep_secs(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Config =
            toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (section, url) in [("edr", &self.edr.url), ("intel", &self.intel.url)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Config(format!(
                    "[{section}] url must start with http:// or https://, got {url}"
                )));
            }
        }
        if self.bridge.queue_capacity == 0 {
            return Err(Error::Config("[bridge] queue_capacity must be > 0".into()));
        }
        Ok(())
    }

    /// Dedup cooldown as a [`Duration`].
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.bridge.cooldown_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[edr]
url = "https://edr.example.com:8000"
key = "edr-key"
verify = false

[intel]
url = "https://intel.example.com"
key = "intel-key"
name = "misp"

[bridge]
cooldown_secs = 120
"#;

    #[test]
    fn test_parse_sample() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert!(!config.edr.verify);
        assert!(config.intel.verify); // defaulted
        assert_eq!(config.bridge.cooldown_secs, 120);
        assert_eq!(config.bridge.channel, sightline_core::SYSMON_CHANNEL);
        assert_eq!(config.cooldown(), Duration::from_secs(120));
    }

    #[test]
    fn test_rejects_bad_url() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.edr.url = "edr.example.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.bridge.queue_capacity = 0;
        assert!(config.validate().is_err());
    }
}
