//! Configuration loading for concierge and weatherd.
//!
//! # Usage
//!
//! ```rust,no_run
//! use conciergeconf::ConciergeConfig;
//!
//! let config = ConciergeConfig::load().expect("Failed to load config");
//!
//! println!("Oracle model: {}", config.oracle.model);
//! for remote in &config.remote {
//!     println!("Remote {}: {}", remote.name, remote.url);
//! }
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/concierge/config.toml` (system)
//! 2. `~/.config/concierge/config.toml` (user)
//! 3. `./concierge.toml` (local override), or the `--config` path when given
//! 4. Environment variables (`CONCIERGE_*`, plus the provider key variables)
//!
//! Tables merge key by key; arrays such as `[[remote]]` replace wholesale.
//!
//! # Example Config
//!
//! ```toml
//! [telemetry]
//! otlp_endpoint = "http://127.0.0.1:4317"
//! log_level = "info,relay=debug"
//!
//! [oracle]
//! model = "deepseek-chat"
//!
//! [dispatch]
//! tool_timeout_ms = 20000
//!
//! [bridge]
//! connect_timeout_ms = 3000
//! pool_size = 2
//!
//! [[remote]]
//! name = "weather"
//! url = "http://127.0.0.1:8001"
//!
//! [image]
//! save_dir = "~/concierge/images"
//!
//! [weather]
//! port = 8001
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sections::{
    BridgeConfig, DeclaredParam, DeclaredTool, DispatchConfig, ImageConfig, OracleConfig,
    RemoteConfig, TelemetryConfig, WeatherConfig, PARAM_TYPES,
};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConciergeConfig {
    pub telemetry: TelemetryConfig,
    pub oracle: OracleConfig,
    pub dispatch: DispatchConfig,
    pub bridge: BridgeConfig,
    pub remote: Vec<RemoteConfig>,
    pub image: ImageConfig,
    pub weather: WeatherConfig,
}

impl Default for ConciergeConfig {
    fn default() -> Self {
        Self {
            telemetry: TelemetryConfig::default(),
            oracle: OracleConfig::default(),
            dispatch: DispatchConfig::default(),
            bridge: BridgeConfig::default(),
            remote: sections::default_remotes(),
            image: ImageConfig::default(),
            weather: WeatherConfig::default(),
        }
    }
}

impl ConciergeConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// `config_path` replaces `./concierge.toml`; system and user files still
    /// load first.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        let env: Vec<(String, String)> = std::env::vars().collect();
        Self::load_layers(&files, &env)
    }

    /// Merge `files` in order, then apply `env`.
    pub fn load_layers(
        files: &[PathBuf],
        env: &[(String, String)],
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in files {
            let table = loader::load_table(path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path.clone());
        }

        let mut config: ConciergeConfig = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Invalid(e.to_string()))?;

        loader::apply_env_overrides(&mut config, &mut sources, env);
        config.image.save_dir = loader::expand_path(&config.image.save_dir.to_string_lossy());
        config.validate()?;

        Ok((config, sources))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for remote in &self.remote {
            if remote.name.is_empty() || remote.url.is_empty() {
                return Err(ConfigError::Invalid(
                    "every [[remote]] needs a name and a url".to_string(),
                ));
            }
            if !seen.insert(remote.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "remote '{}' is configured twice",
                    remote.name
                )));
            }
            for tool in &remote.tools {
                if tool.name.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "remote '{}' declares a tool without a name",
                        remote.name
                    )));
                }
                if let Some(param) = tool
                    .params
                    .iter()
                    .find(|p| !PARAM_TYPES.contains(&p.param_type.as_str()))
                {
                    return Err(ConfigError::Invalid(format!(
                        "parameter '{}' of tool '{}' has unknown type '{}'",
                        param.name, tool.name, param.param_type
                    )));
                }
            }
        }
        if self.dispatch.tool_timeout_ms == 0 || self.bridge.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    /// The effective config as TOML with secrets masked.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        for key in [
            &mut shown.oracle.api_key,
            &mut shown.image.api_key,
            &mut shown.weather.api_key,
        ] {
            if key.is_some() {
                *key = Some("***".to_string());
            }
        }
        toml::to_string_pretty(&shown).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
