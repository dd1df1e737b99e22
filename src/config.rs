//! Configuration management
//!
//! Config is a TOML file loaded once at startup; a missing or invalid file
//! is fatal because the gateway cannot guess which terminal it fronts.

use crate::constants::{
    DEFAULT_LISTEN_PORT, DEFAULT_TERMINAL_PORT, DEFAULT_TERMINAL_TIMEOUT_SECS,
};
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Terminal
// =============================================================================

/// Concrete terminal driver behind the session trait
///
/// The vendor SDK link is provided out of tree; `simulated` runs the
/// scripted in-process terminal for development and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TerminalDriver {
    #[default]
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub driver: TerminalDriver,
    /// Terminal IP address
    pub ip: String,
    /// Terminal TCP port
    pub port: u16,
    /// Link timeout in seconds
    pub timeout_secs: u64,
    /// Cash register identifier announced to the terminal
    pub cash_register_id: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            driver: TerminalDriver::Simulated,
            ip: "127.0.0.1".to_string(),
            port: DEFAULT_TERMINAL_PORT,
            timeout_secs: DEFAULT_TERMINAL_TIMEOUT_SECS,
            cash_register_id: "1".to_string(),
        }
    }
}

impl TerminalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// Server
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port the EPOS connects to
    pub listen_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
        }
    }
}

// =============================================================================
// Callback policy
// =============================================================================

/// Deliberate choices for callback behaviors the terminal leaves open
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackPolicy {
    /// When true, wait-for-card / wait-for-pin screens block until the EPOS
    /// acknowledges; when false they are informational and the transaction
    /// continues immediately
    pub card_prompts_block: bool,
    /// Coalesce identical consecutive fire-and-forget notices so status
    /// chatter does not flood the EPOS
    pub suppress_duplicate_notices: bool,
    /// Reset the pending report flag before a forced reconciliation
    pub reset_report_on_reconcile: bool,
}

impl Default for CallbackPolicy {
    fn default() -> Self {
        Self {
            card_prompts_block: false,
            suppress_duplicate_notices: true,
            reset_report_on_reconcile: true,
        }
    }
}

// =============================================================================
// Root config
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub terminal: TerminalConfig,
    pub server: ServerConfig,
    pub callbacks: CallbackPolicy,
}

/// Load config from a TOML file; any failure is fatal at startup
pub fn load(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| GatewayError::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config: Config = toml::from_str(&content).map_err(|e| GatewayError::ConfigParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.terminal.ip.is_empty() {
        return Err(GatewayError::ConfigValidation {
            field: "terminal.ip",
            reason: "must not be empty".into(),
        });
    }
    if config.terminal.cash_register_id.is_empty() {
        return Err(GatewayError::ConfigValidation {
            field: "terminal.cash_register_id",
            reason: "must not be empty".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.server.listen_port, DEFAULT_LISTEN_PORT);
        assert_eq!(config.terminal.port, DEFAULT_TERMINAL_PORT);
        assert_eq!(config.terminal.driver, TerminalDriver::Simulated);
        assert!(!config.callbacks.card_prompts_block);
        assert!(config.callbacks.suppress_duplicate_notices);
        assert!(config.callbacks.reset_report_on_reconcile);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let partial = r#"
[terminal]
ip = "10.0.0.20"

[server]
listen_port = 4100
"#;
        let config: Config = toml::from_str(partial).unwrap();
        assert_eq!(config.terminal.ip, "10.0.0.20");
        assert_eq!(config.terminal.port, DEFAULT_TERMINAL_PORT);
        assert_eq!(config.server.listen_port, 4100);
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.terminal.ip = "192.168.1.50".to_string();
        config.callbacks.card_prompts_block = true;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.terminal.ip, "192.168.1.50");
        assert!(restored.callbacks.card_prompts_block);
    }

    #[test]
    fn test_validation_rejects_empty_ip() {
        let mut config = Config::default();
        config.terminal.ip = String::new();
        assert!(validate(&config).is_err());
    }
}
