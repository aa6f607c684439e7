//! # Application Configuration
//!
//! Loaded from a TOML file (default `recon.toml`):
//!
//! ```toml
//! [engine]
//! max_nodes_warn = 500
//! max_nodes_cap = 2000
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! api_key = "secret"
//! cors_origins = ["http://localhost:3000"]
//!
//! [transforms.shodan_org_search]
//! shodanKey = "..."
//! ```
//!
//! A missing file yields the defaults. Environment variables override the
//! file: `RECON_MAX_NODES_WARN`, `RECON_MAX_NODES_CAP`, `RECON_API_KEY`,
//! `RECON_CORS_ORIGINS` (comma-separated).

use recon_core::{EngineConfig, ReconError, TransformOptions, TransformRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "recon.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub server: ServerConfig,
    /// Default options per transform name, merged under call options.
    pub transforms: BTreeMap<String, TransformOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    /// Allowed CORS origins. Empty means localhost only; `"*"` allows all.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            api_key: None,
            cors_origins: Vec::new(),
        }
    }
}

impl Config {
    /// Load `path` (or `recon.toml`) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ReconError> {
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|e| {
                ReconError::ConfigError(format!("cannot read {}: {e}", path.display()))
            })?;
            Self::from_toml(&text)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ReconError> {
        toml::from_str(text).map_err(|e| ReconError::ConfigError(e.to_string()))
    }

    /// Apply overrides from `lookup` (the process environment in `load`).
    /// Unparseable numbers are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let number = |key: &str| {
            let value = lookup(key)?;
            match value.trim().parse::<usize>() {
                Ok(n) => Some(n),
                Err(e) => {
                    tracing::warn!(key, value = %value, "ignoring override: {e}");
                    None
                }
            }
        };
        if let Some(n) = number("RECON_MAX_NODES_WARN") {
            self.engine.max_nodes_warn = n;
        }
        if let Some(n) = number("RECON_MAX_NODES_CAP") {
            self.engine.max_nodes_cap = n;
        }
        if let Some(key) = lookup("RECON_API_KEY").filter(|k| !k.is_empty()) {
            self.server.api_key = Some(key);
        }
        if let Some(origins) = lookup("RECON_CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    /// Options for a transform call: configured defaults for every transform
    /// the name resolves to, overlaid with `overrides`.
    #[must_use]
    pub fn transform_options(
        &self,
        registry: &TransformRegistry,
        name: &str,
        overrides: &TransformOptions,
    ) -> TransformOptions {
        let mut options = TransformOptions::new();
        for entry in registry.candidates(name).unwrap_or_default() {
            if let Some(defaults) = self.transforms.get(&entry.descriptor().name) {
                options.extend(defaults.clone());
            }
        }
        options.extend(overrides.clone());
        options
    }
}
