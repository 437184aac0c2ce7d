//! Client configuration
//!
//! Loaded from an optional TOML file in the XDG config directory, with
//! `COACHLINK_*` environment variables taking precedence. The auth token
//! never appears in debug output.

use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;

use crate::Result;
use crate::protocol::ApiType;

/// Default relay socket URL for local development
const DEFAULT_RELAY_URL: &str = "ws://localhost:8089/";

/// Default account backend URL for local development
const DEFAULT_BACKEND_URL: &str = "http://localhost:3001";

/// Resolved client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay websocket URL
    pub relay_url: String,

    /// Account backend base URL
    pub backend_url: String,

    /// Auth token for the relay and backend
    pub token: Option<SecretString>,

    /// Upstream voice API the relay should drive
    pub api_type: ApiType,
}

/// On-disk configuration file shape
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    relay_url: Option<String>,
    backend_url: Option<String>,
    token: Option<String>,
    api_type: Option<String>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if it names an unknown api type.
    pub fn load() -> Result<Self> {
        let file = Self::read_file()?;

        let relay_url = std::env::var("COACHLINK_RELAY_URL")
            .ok()
            .or(file.relay_url)
            .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());

        let backend_url = std::env::var("COACHLINK_BACKEND_URL")
            .ok()
            .or(file.backend_url)
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());

        let token = std::env::var("COACHLINK_TOKEN")
            .ok()
            .or(file.token)
            .map(SecretString::from);

        let api_type = match std::env::var("COACHLINK_API_TYPE").ok().or(file.api_type) {
            Some(value) => value.parse()?,
            None => ApiType::default(),
        };

        Ok(Self {
            relay_url,
            backend_url,
            token,
            api_type,
        })
    }

    /// Read the TOML config file if one exists
    fn read_file() -> Result<FileConfig> {
        let Some(path) = Self::config_path() else {
            return Ok(FileConfig::default());
        };

        if !path.exists() {
            return Ok(FileConfig::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        let parsed = toml::from_str(&contents)?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(parsed)
    }

    /// Path of the user config file (`~/.config/coachlink/config.toml` on
    /// Linux)
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "omni", "coachlink")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_parses_partial_toml() {
        let parsed: FileConfig = toml::from_str(
            r#"
            relay_url = "wss://relay.example.com/"
            api_type = "elevenlabs"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.relay_url.as_deref(), Some("wss://relay.example.com/"));
        assert_eq!(parsed.api_type.as_deref(), Some("elevenlabs"));
        assert!(parsed.token.is_none());
    }

    #[test]
    fn file_config_tolerates_empty_file() {
        let parsed: FileConfig = toml::from_str("").unwrap();
        assert!(parsed.relay_url.is_none());
    }
}
