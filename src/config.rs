//! Configuration module for the rSSLCon client
//!
//! This module provides TOML-based configuration parsing and validation.
//! The values here are the inputs the handshake consumes: gateway host,
//! credentials, group, TLS policy, reported agent version and local MAC.

use crate::error::{Result, VpnError};
use hyper::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Agent version reported in Cisco compatibility mode
pub const CISCO_AGENT_VERSION: &str = "4.10.07062";

/// Server configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Gateway host, optionally with `:port` (443 when omitted)
    pub host: String,
    /// Verify server certificate
    #[serde(default = "default_true")]
    pub verify_certificate: bool,
    /// TLS dial timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u32,
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Username sent in the auth-reply
    pub username: String,
    /// Password sent in the auth-reply
    #[serde(default)]
    pub password: String,
    /// Locally preferred user group; may be overridden by the gateway
    #[serde(default)]
    pub group: String,
}

/// Agent identity reported to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent_name: String,
    #[serde(default = "default_agent_version")]
    pub agent_version: String,
    /// Report `cisco_agent_version` instead of `agent_version`
    #[serde(default = "default_true")]
    pub cisco_compat: bool,
    #[serde(default = "default_cisco_agent_version")]
    pub cisco_agent_version: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: String::new(),
            agent_version: default_agent_version(),
            cisco_compat: true,
            cisco_agent_version: default_cisco_agent_version(),
        }
    }
}

impl AgentConfig {
    /// Version string placed in the `<version who="vpn">` element
    pub fn reported_version(&self) -> &str {
        if self.cisco_compat {
            &self.cisco_agent_version
        } else {
            &self.agent_version
        }
    }
}

/// Local interface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Tunnel adapter name
    #[serde(default = "default_interface_name")]
    pub name: String,
    /// MAC address of the public interface, reported during auth
    #[serde(default)]
    pub mac: String,
    /// MTU value
    #[serde(default = "default_mtu")]
    pub mtu: u16,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            name: default_interface_name(),
            mac: String::new(),
            mtu: default_mtu(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Reported agent identity
    #[serde(default)]
    pub agent: AgentConfig,
    /// Local interface configuration
    #[serde(default)]
    pub interface: InterfaceConfig,
    /// Common HTTP headers attached to every handshake request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| VpnError::Config(format!("Failed to read config file: {e}")))?;

        <Self as FromStr>::from_str(&contents)
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| VpnError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(VpnError::Config("Server host cannot be empty".to_string()));
        }

        if self.server.connect_timeout == 0 {
            return Err(VpnError::Config("Connect timeout cannot be zero".to_string()));
        }

        if self.auth.username.is_empty() {
            return Err(VpnError::Config("Username cannot be empty".to_string()));
        }

        if self.agent.reported_version().is_empty() {
            return Err(VpnError::Config("Agent version cannot be empty".to_string()));
        }

        if self.interface.mac.is_empty() {
            return Err(VpnError::Config("Local MAC address is required".to_string()));
        }

        if self.interface.mtu < 576 || self.interface.mtu > 9000 {
            return Err(VpnError::Config("MTU must be between 576 and 9000".to_string()));
        }

        for (name, value) in &self.headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(VpnError::Config(format!("Invalid header name '{name}'")));
            }
            if HeaderValue::from_str(value).is_err() {
                return Err(VpnError::Config(format!("Invalid value for header '{name}'")));
            }
        }

        Ok(())
    }

    /// Dial timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.server.connect_timeout))
    }

    /// User-Agent sent when `[headers]` does not set one
    pub fn user_agent(&self) -> String {
        let version = self.agent.reported_version();
        if self.agent.agent_name.is_empty() {
            format!("AnyConnect Windows {version}")
        } else {
            format!("{} {version}", self.agent.agent_name)
        }
    }

    /// Headers handed to the transport, with a default User-Agent filled in
    pub fn common_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if !headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("user-agent"))
        {
            headers.push(("User-Agent".to_string(), self.user_agent()));
        }
        headers
    }
}

impl FromStr for Config {
    type Err = VpnError;

    fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| VpnError::Config(format!("Failed to parse TOML: {e}")))
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u32 {
    6
}

fn default_agent_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_cisco_agent_version() -> String {
    CISCO_AGENT_VERSION.to_string()
}

fn default_interface_name() -> String {
    "rsslcon0".to_string()
}

fn default_mtu() -> u16 {
    1399
}

fn default_log_level() -> String {
    "info".to_string()
}
