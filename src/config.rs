use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::CaptureConfig;
use crate::flow::FlowConfig;
use crate::geoip::GeoIpConfig;
use crate::protocols::http::HttpConfig;
use crate::protocols::mail::MailConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub flow: FlowConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub mail: MailConfig,

    #[serde(default)]
    pub geoip: GeoIpConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/wirelog/config.toml"),
            PathBuf::from("wirelog.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;
        Ok(())
    }
}
