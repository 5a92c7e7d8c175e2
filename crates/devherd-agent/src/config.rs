//! Settings parser for .devherd/config.toml
//!
//! The agent reads its configuration from a `.devherd` directory in the
//! user's config dir (override with an explicit path). The same directory
//! holds the persisted agent identifier.

use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};

use devherd_core::prelude::*;

const CONFIG_FILENAME: &str = "config.toml";
const AGENT_ID_FILENAME: &str = "agent_id";
const DEVHERD_DIR: &str = ".devherd";

/// Agent daemon settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AgentSettings {
    /// Interval between device presence polls, in milliseconds
    #[serde(default = "default_device_poll_ms")]
    pub device_poll_ms: u64,

    /// Port this agent asks the server to connect back to
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,

    /// Server bootstrap endpoint ("ip:port"), if known in advance
    #[serde(default)]
    pub server: Option<String>,

    /// Explicit adb path override
    #[serde(default)]
    pub adb_path: Option<String>,

    /// Explicit emulator path override
    #[serde(default)]
    pub emulator_path: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            device_poll_ms: default_device_poll_ms(),
            agent_port: default_agent_port(),
            server: None,
            adb_path: None,
            emulator_path: None,
        }
    }
}

fn default_device_poll_ms() -> u64 {
    1000
}

fn default_agent_port() -> u16 {
    1989
}

/// The default .devherd directory
pub fn default_config_dir() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(DEVHERD_DIR)
}

/// Load settings from `<dir>/config.toml`
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(config_dir: &Path) -> AgentSettings {
    let config_path = config_dir.join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return AgentSettings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                AgentSettings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            AgentSettings::default()
        }
    }
}

/// Load the persisted agent identifier, minting one on first run
///
/// The identifier survives restarts so the server can correlate an agent
/// across reconnects.
pub fn load_or_create_agent_id(config_dir: &Path) -> Result<String> {
    let id_path = config_dir.join(AGENT_ID_FILENAME);

    if let Ok(existing) = std::fs::read_to_string(&id_path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }

    let id = mint_agent_id();
    std::fs::create_dir_all(config_dir)
        .map_err(|e| Error::config(format!("Failed to create {:?}: {}", config_dir, e)))?;
    std::fs::write(&id_path, &id)
        .map_err(|e| Error::config(format!("Failed to persist agent id: {}", e)))?;
    info!("Minted new agent id {}", id);
    Ok(id)
}

fn mint_agent_id() -> String {
    let suffix: u64 = rand::thread_rng().gen();
    format!("agent-{:016x}", suffix)
}

/// Parse an "ip:port" endpoint string
pub fn parse_endpoint(value: &str) -> Result<(String, u16)> {
    let (ip, port) = value
        .rsplit_once(':')
        .ok_or_else(|| Error::config(format!("endpoint {:?} is not ip:port", value)))?;
    let port: u16 = port
        .parse()
        .map_err(|_| Error::config(format!("endpoint {:?} has an invalid port", value)))?;
    if ip.is_empty() {
        return Err(Error::config(format!("endpoint {:?} has no host", value)));
    }
    Ok((ip.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_no_config_file() {
        let dir = TempDir::new().unwrap();
        let settings = load_settings(dir.path());
        assert_eq!(settings, AgentSettings::default());
        assert_eq!(settings.device_poll_ms, 1000);
        assert_eq!(settings.agent_port, 1989);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILENAME),
            "device_poll_ms = 250\nserver = \"10.0.0.7:1980\"\n",
        )
        .unwrap();

        let settings = load_settings(dir.path());
        assert_eq!(settings.device_poll_ms, 250);
        assert_eq!(settings.server.as_deref(), Some("10.0.0.7:1980"));
        assert_eq!(settings.agent_port, 1989);
        assert!(settings.adb_path.is_none());
    }

    #[test]
    fn test_invalid_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), "device_poll_ms = \"soon\"").unwrap();

        let settings = load_settings(dir.path());
        assert_eq!(settings, AgentSettings::default());
    }

    #[test]
    fn test_agent_id_minted_once_and_persisted() {
        let dir = TempDir::new().unwrap();

        let first = load_or_create_agent_id(dir.path()).unwrap();
        assert!(first.starts_with("agent-"));

        let second = load_or_create_agent_id(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_agent_id_respects_existing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(AGENT_ID_FILENAME), "agent-known\n").unwrap();

        let id = load_or_create_agent_id(dir.path()).unwrap();
        assert_eq!(id, "agent-known");
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("10.0.0.7:1980").unwrap(),
            ("10.0.0.7".to_string(), 1980)
        );
        assert!(parse_endpoint("10.0.0.7").is_err());
        assert!(parse_endpoint(":1980").is_err());
        assert!(parse_endpoint("10.0.0.7:http").is_err());
    }
}
