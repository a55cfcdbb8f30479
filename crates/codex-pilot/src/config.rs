//! Pilot configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PilotError, Result};
use crate::transport::Endpoint;

/// Pilot configuration, stored as TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    /// App-server URL (`ws://` or `wss://`)
    pub url: String,
    /// Fixed delay before each reconnect attempt
    pub reconnect_delay_secs: u64,
    /// Interval of the thread/rate-limit refresh while connected
    pub refresh_interval_secs: u64,
    /// How long a persona shows `done` before falling back to `idle`
    pub done_decay_secs: u64,
    pub event_log_limit: usize,
    /// Persona preview window, in characters
    pub preview_limit: usize,
    pub client_name: String,
    pub client_version: String,
    /// Working directory sent with `thread/start`
    pub thread_cwd: Option<String>,
    /// Include archived threads in `thread/list`
    pub show_archived: bool,
    /// JSONL file receiving every inbound and outbound frame
    pub wire_log: Option<PathBuf>,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            reconnect_delay_secs: 3,
            refresh_interval_secs: 15,
            done_decay_secs: 3,
            event_log_limit: 200,
            preview_limit: 240,
            client_name: "codex-pilot".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            thread_cwd: None,
            show_archived: false,
            wire_log: None,
        }
    }
}

impl PilotConfig {
    /// Load config from the default path, or defaults when it does not exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(PilotError::NoConfigDir)?;
        Ok(config_dir.join("codex-pilot").join("config.toml"))
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::parse(&self.url)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn done_decay(&self) -> Duration {
        Duration::from_secs(self.done_decay_secs)
    }

    /// Set server URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_reconnect_delay(mut self, secs: u64) -> Self {
        self.reconnect_delay_secs = secs;
        self
    }

    pub fn with_wire_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.wire_log = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = PilotConfig::default();
        assert_eq!(config.url, "ws://127.0.0.1:8080");
        assert_eq!(config.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(config.refresh_interval(), Duration::from_secs(15));
        assert!(config.endpoint().is_ok());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PilotConfig::load_from(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(config, PilotConfig::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "url = \"wss://codex.example.com/rpc\"\nshow_archived = true\n")
            .expect("write");

        let config = PilotConfig::load_from(&path).expect("load");
        assert_eq!(config.url, "wss://codex.example.com/rpc");
        assert!(config.show_archived);
        assert_eq!(config.event_log_limit, 200);
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let config = PilotConfig::default()
            .with_url("ws://10.0.0.2:9000")
            .with_reconnect_delay(7)
            .with_wire_log("/tmp/wire.jsonl");

        config.save_to(&path).expect("save");
        assert_eq!(PilotConfig::load_from(&path).expect("load"), config);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "reconnect_delay_secs = \"soon\"").expect("write");
        assert!(matches!(
            PilotConfig::load_from(&path),
            Err(PilotError::Config(_))
        ));
    }
}
