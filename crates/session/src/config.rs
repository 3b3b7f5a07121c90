use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub realtime: RealtimeSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval_secs: u64,
    /// Sessions older than this are purged instead of resumed.
    #[serde(default = "default_abandon_after")]
    pub abandon_after_hours: i64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            autosave_interval_secs: 10,
            abandon_after_hours: 48,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RealtimeSettings {
    /// Explicit websocket endpoint. Derived from the server URL when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheSettings {
    /// Explicit cache file location. Defaults to the per-user data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl EngineConfig {
    /// Websocket endpoint for the realtime channel: the explicit `[realtime]`
    /// setting, or the server URL with the scheme swapped to ws(s).
    pub fn realtime_url(&self) -> String {
        if let Some(url) = &self.realtime.url {
            return url.clone();
        }
        let base = self.server.url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}/api/ws")
    }
}

fn default_server_url() -> String {
    "https://studio.liftlog.fit".to_string()
}

fn default_autosave_interval() -> u64 {
    10
}

fn default_abandon_after() -> i64 {
    48
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .context("Could not determine home directory")?;
    Ok(PathBuf::from(home).join(".config").join("liftlog"))
}

/// Get the engine config file path
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("engine.toml"))
}

/// Load engine config from disk
pub fn load_config() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read engine config at {}", path.display()))?;
    let config: EngineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse engine config at {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("autosave_interval_secs = 10"));
        assert!(toml_str.contains("abandon_after_hours = 48"));
        assert!(toml_str.contains("max_attempts = 3"));
        assert!(toml_str.contains("base_delay_ms = 1000"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.session.autosave_interval_secs, 10);
        assert_eq!(parsed.session.abandon_after_hours, 48);
        assert_eq!(parsed.sync.max_attempts, 3);
        assert_eq!(parsed.sync.base_delay_ms, 1000);
        assert!(parsed.realtime.url.is_none());
        assert!(parsed.cache.path.is_none());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: EngineConfig = toml::from_str(
            "[server]\nurl = \"http://studio.local:8080\"\napi_key = \"k1\"\n",
        )
        .unwrap();
        assert_eq!(parsed.server.url, "http://studio.local:8080");
        assert_eq!(parsed.server.api_key, "k1");
        assert_eq!(parsed.session.autosave_interval_secs, 10);
        assert_eq!(parsed.sync.base_delay_ms, 1000);
    }

    #[test]
    fn test_realtime_url_derivation() {
        let mut config = EngineConfig::default();
        config.server.url = "https://studio.liftlog.fit/".to_string();
        assert_eq!(config.realtime_url(), "wss://studio.liftlog.fit/api/ws");

        config.server.url = "http://localhost:3000".to_string();
        assert_eq!(config.realtime_url(), "ws://localhost:3000/api/ws");

        config.realtime.url = Some("ws://elsewhere:9000/socket".to_string());
        assert_eq!(config.realtime_url(), "ws://elsewhere:9000/socket");
    }
}
