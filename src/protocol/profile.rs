//! Per-attempt handshake profile
//!
//! A `Profile` is rebuilt from configuration at the start of every
//! connection attempt and then filled in with what the gateway negotiates.

use crate::config::Config;
use crate::error::{Result, VpnError};

/// Default HTTPS port when the configured host has none
pub const DEFAULT_PORT: u16 = 443;

#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub host: String,
    pub username: String,
    pub password: String,
    pub group: String,

    pub scheme: String,
    /// Submit path taken from the login form action
    pub auth_path: String,

    pub app_version: String,
    pub mac_address: String,

    pub tunnel_group: String,
    pub group_alias: String,
    pub config_hash: String,
}

impl Profile {
    /// Fresh profile for a new connection attempt
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.server.host.trim().to_string(),
            username: config.auth.username.clone(),
            password: config.auth.password.clone(),
            group: config.auth.group.clone(),
            scheme: "https://".to_string(),
            ..Default::default()
        }
    }

    /// Split `host[:port]`, defaulting the port to 443
    pub fn host_and_port(&self) -> Result<(String, u16)> {
        let host = self.host.as_str();
        if host.is_empty() {
            return Err(VpnError::Config("Server host cannot be empty".to_string()));
        }

        // Bracketed IPv6 literals are not dialed (IPv4 only), but keep the
        // parse honest so the error names the real problem.
        if let Some((name, port)) = host.rsplit_once(':') {
            if !name.contains(':') {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| VpnError::Config(format!("Invalid port in '{host}': {e}")))?;
                return Ok((name.to_string(), port));
            }
        }
        Ok((host.to_string(), DEFAULT_PORT))
    }

    /// `host:port` as sent in the Host header
    pub fn host_with_port(&self) -> Result<String> {
        let (host, port) = self.host_and_port()?;
        Ok(format!("{host}:{port}"))
    }

    /// Full request URL, used for logging
    pub fn url(&self, path: &str) -> String {
        let host = self.host_with_port().unwrap_or_else(|_| self.host.clone());
        format!("{}{}{}", self.scheme, host, normalize_path(path))
    }

    /// Both fields the request bodies need before any rendering
    pub fn ensure_identity(&self) -> Result<()> {
        if self.app_version.is_empty() {
            return Err(VpnError::InvalidState(
                "agent version must be set before rendering requests".to_string(),
            ));
        }
        if self.mac_address.is_empty() {
            return Err(VpnError::InvalidState(
                "MAC address must be set before rendering requests".to_string(),
            ));
        }
        Ok(())
    }
}

/// Request path for the HTTP request line; empty means the root
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
