//! Configuration module
//!
//! Persisted client defaults: last host, directories, terminal size.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Default host to dial
    pub host: String,
    /// Default port
    pub port: u16,
    /// Where ZMODEM downloads land
    pub download_dir: PathBuf,
    /// Where capture logs are written
    pub logs_dir: PathBuf,
    /// Whether sessions write a capture log
    pub logging_enabled: bool,
    /// Terminal settings
    pub terminal: TerminalConfig,
}

/// Terminal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Columns
    pub cols: u16,
    /// Rows
    pub rows: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self { cols: 80, rows: 25 }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 23,
            download_dir: PathBuf::from("downloads"),
            logs_dir: PathBuf::from("logs"),
            logging_enabled: true,
            terminal: TerminalConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load config from file, falling back to defaults when absent.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = config_dir()
            .ok_or("Could not determine config directory")?
            .join("config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let dir = config_dir().ok_or("Could not determine config directory")?;
        std::fs::create_dir_all(&dir)?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(dir.join("config.toml"), content)?;
        Ok(())
    }
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "bbsterm", "bbsterm")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_toml() {
        let config = ClientConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.host, config.host);
        assert_eq!(parsed.port, 23);
        assert_eq!(parsed.terminal.cols, 80);
        assert_eq!(parsed.terminal.rows, 25);
    }
}
