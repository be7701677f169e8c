use std::path::Path;

use serde::Deserialize;

use crate::error::GwError;

/// Process-wide settings, deserialized once from a TOML file at startup.
///
/// Field shapes mirror the teacher's forwarder/receiver TOML configs:
/// a flat top-level table of scalars plus an opaque per-plugin sub-table
/// the core never interprets.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    pub auth_secret: String,
    pub media_root: String,
    pub redis_url: String,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_journal_consumers")]
    pub journal_consumers: usize,
    #[serde(default = "default_plugin_queue_capacity")]
    pub plugin_queue_capacity: usize,
    #[serde(default)]
    pub plugins: toml::Table,
    #[serde(default)]
    pub http_proxy: Option<String>,
}

fn default_call_timeout_secs() -> u64 {
    20
}

fn default_journal_consumers() -> usize {
    1
}

fn default_plugin_queue_capacity() -> usize {
    256
}

impl Settings {
    pub fn from_toml_str(raw: &str) -> Result<Self, GwError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GwError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_settings_with_defaults() {
        let raw = r#"
            bind_addr = "0.0.0.0:8080"
            auth_secret = "s3cret"
            media_root = "/var/lib/gateway/media"
            redis_url = "redis://127.0.0.1/"
        "#;
        let settings = Settings::from_toml_str(raw).unwrap();
        assert_eq!(settings.call_timeout_secs, 20);
        assert_eq!(settings.journal_consumers, 1);
        assert_eq!(settings.plugin_queue_capacity, 256);
        assert!(settings.http_proxy.is_none());
    }

    #[test]
    fn parses_plugin_subtable_opaquely() {
        let raw = r#"
            bind_addr = "0.0.0.0:8080"
            auth_secret = "s3cret"
            media_root = "/media"
            redis_url = "redis://127.0.0.1/"

            [plugins.weather]
            api_key = "xyz"
        "#;
        let settings = Settings::from_toml_str(raw).unwrap();
        assert!(settings.plugins.contains_key("weather"));
    }
}
