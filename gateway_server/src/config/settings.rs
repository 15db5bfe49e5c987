//! Top-level process configuration, loaded once at startup: the
//! `config` crate layering a TOML file over built-in defaults.

use crate::drivers::traits::DriverConfig;
use ::config::{Config, ConfigError, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct TagConfig {
    pub path: String,
    pub driver_id: String,
    pub address: String,
    pub poll_rate_ms: u64,
}

/// OpenTelemetry export configuration for the trace context registry
/// (C8); `endpoint` is left unset in the default config so the
/// registry falls back to a `NullExporter`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OtelConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("persistence/sqlite.db")
}

fn default_schema_dir() -> PathBuf {
    PathBuf::from("persistence/schemas")
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/run/gateway/sockets")
}

fn default_sub_filter_err() -> bool {
    false
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_schema_dir")]
    pub schema_dir: PathBuf,
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,
    #[serde(default = "default_sub_filter_err")]
    pub sub_filter_err: bool,
    #[serde(default)]
    pub otel: OtelConfig,
    pub devices: Vec<DriverConfig>,
    #[serde(default)]
    pub tags: Vec<TagConfig>,
}

impl Settings {
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let s = Config::builder().add_source(File::from(config_path)).build()?;
        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [[devices]]
            id = "driver1"
            name = "PLC1"
            address = "opc.tcp://localhost:4840"
            scan_rate_ms = 1000
            "#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.bind_addr, "127.0.0.1:3000");
        assert_eq!(settings.devices.len(), 1);
        assert!(!settings.sub_filter_err);
        assert!(settings.otel.endpoint.is_none());
    }
}
