//! Config file discovery, loading, and environment variable overlay.

use crate::{ConciergeConfig, ConfigError, RemoteConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/concierge/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("concierge/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("concierge.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read one file as a raw table. Each file must also be a valid config on
/// its own, so mistakes are reported against the file that made them.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    let parse_error = |e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let table: toml::Table = contents.parse().map_err(parse_error)?;
    toml::Value::Table(table.clone())
        .try_into::<ConciergeConfig>()
        .map_err(parse_error)?;
    Ok(table)
}

/// Merge `overlay` into `base`. Tables merge recursively; anything else,
/// arrays included, is replaced.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply environment overrides from `vars`.
///
/// `CONCIERGE_REMOTE_<NAME>=<url>` adds or repoints a remote service.
pub fn apply_env_overrides(
    config: &mut ConciergeConfig,
    sources: &mut ConfigSources,
    vars: &[(String, String)],
) {
    let lookup = |name: &str| {
        vars.iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };
    let mut record = |name: &str| sources.env_overrides.push(name.to_string());

    // Telemetry
    if let Some(v) = lookup("CONCIERGE_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
        record("CONCIERGE_OTLP_ENDPOINT");
    }
    // Also support standard OTEL env var
    if let Some(v) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
        record("OTEL_EXPORTER_OTLP_ENDPOINT");
    }
    if let Some(v) = lookup("CONCIERGE_LOG_LEVEL") {
        config.telemetry.log_level = v;
        record("CONCIERGE_LOG_LEVEL");
    }
    if let Some(v) = lookup("RUST_LOG") {
        config.telemetry.log_level = v;
        record("RUST_LOG");
    }

    // Oracle
    for name in ["DEEPSEEK_API_KEY", "CONCIERGE_ORACLE_API_KEY"] {
        if let Some(v) = lookup(name) {
            config.oracle.api_key = Some(v);
            record(name);
        }
    }
    if let Some(v) = lookup("CONCIERGE_ORACLE_BASE_URL") {
        config.oracle.base_url = v;
        record("CONCIERGE_ORACLE_BASE_URL");
    }
    if let Some(v) = lookup("CONCIERGE_ORACLE_MODEL") {
        config.oracle.model = v;
        record("CONCIERGE_ORACLE_MODEL");
    }

    // Dispatch and bridge
    if let Some(ms) = lookup("CONCIERGE_TOOL_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.dispatch.tool_timeout_ms = ms;
        record("CONCIERGE_TOOL_TIMEOUT_MS");
    }
    if let Some(ms) = lookup("CONCIERGE_CONNECT_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.bridge.connect_timeout_ms = ms;
        record("CONCIERGE_CONNECT_TIMEOUT_MS");
    }

    // Image provider
    for name in ["DASHSCOPE_API_KEY", "CONCIERGE_IMAGE_API_KEY"] {
        if let Some(v) = lookup(name) {
            config.image.api_key = Some(v);
            record(name);
        }
    }
    if let Some(v) = lookup("CONCIERGE_IMAGE_SAVE_DIR") {
        config.image.save_dir = expand_path(&v);
        record("CONCIERGE_IMAGE_SAVE_DIR");
    }

    // Weather service
    for name in ["AMAP_API_KEY", "CONCIERGE_WEATHER_API_KEY"] {
        if let Some(v) = lookup(name) {
            config.weather.api_key = Some(v);
            record(name);
        }
    }
    if let Some(v) = lookup("CONCIERGE_WEATHER_BASE_URL") {
        config.weather.base_url = v;
        record("CONCIERGE_WEATHER_BASE_URL");
    }
    if let Some(port) = lookup("CONCIERGE_WEATHER_PORT").and_then(|v| v.parse::<u16>().ok()) {
        config.weather.port = port;
        record("CONCIERGE_WEATHER_PORT");
    }

    // Remote services (CONCIERGE_REMOTE_<NAME>)
    for (key, url) in vars {
        let Some(name) = key.strip_prefix("CONCIERGE_REMOTE_") else {
            continue;
        };
        let name = name.to_lowercase();
        match config.remote.iter_mut().find(|r| r.name == name) {
            Some(remote) => remote.url = url.clone(),
            None => config.remote.push(RemoteConfig {
                name,
                url: url.clone(),
                pool_size: None,
                tools: Vec::new(),
            }),
        }
        record(key.as_str());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        match directories::BaseDirs::new() {
            Some(dirs) => dirs.home_dir().join(stripped),
            None => PathBuf::from(path),
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        let (var_name, rest) = stripped.split_once('/').unwrap_or((stripped, ""));
        match env::var(var_name) {
            Ok(value) if rest.is_empty() => PathBuf::from(value),
            Ok(value) => PathBuf::from(value).join(rest),
            Err(_) => PathBuf::from(path),
        }
    } else {
        PathBuf::from(path)
    }
}
