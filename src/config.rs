//! On-disk configuration.
//!
//! Every field has a default matching the conventional layout (`src/` in,
//! `app/` out), so a project without a `kiln.toml` builds as-is.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Default name of the configuration file, looked up in the working directory.
pub const CONFIG_FILE: &str = "kiln.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the source assets.
    pub source: Utf8PathBuf,
    /// Root of the generated output.
    pub output: Utf8PathBuf,
    /// Port of the HTTP preview server.
    pub port: u16,
    /// Preferred port of the live-reload socket.
    pub reload_port: u16,
    /// Browser baselines for vendor prefixing.
    pub targets: Targets,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: Utf8PathBuf::from("src"),
            output: Utf8PathBuf::from("app"),
            port: 3000,
            reload_port: 1337,
            targets: Targets::default(),
        }
    }
}

/// Oldest supported major version per browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Targets {
    pub chrome: u32,
    pub firefox: u32,
    pub safari: u32,
    pub edge: u32,
    pub ios: u32,
    pub samsung: u32,
}

impl Default for Targets {
    fn default() -> Self {
        Self {
            chrome: 80,
            firefox: 78,
            safari: 12,
            edge: 80,
            ios: 12,
            samsung: 12,
        }
    }
}

impl Config {
    /// Load the configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!(%path, "no configuration file, using defaults");
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_owned(), e))?;
        Self::parse(&text).map_err(|e| ConfigError::Parse(path.to_owned(), e))
    }

    /// Parse a TOML document. Unknown keys are reported and skipped.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        let de = toml::Deserializer::new(text);
        let config = serde_ignored::deserialize(de, |path| {
            tracing::warn!(key = %path, "unknown configuration key ignored");
        })?;

        Ok(config)
    }
}
