//! Error types and handling for the rSSLCon client

use thiserror::Error;

/// Main error type for VPN operations
#[derive(Error, Debug)]
pub enum VpnError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dial, write, read or body failure on the handshake connection.
    /// The connection has already been torn down when this is returned.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected response body
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The configured group is not one the gateway offers
    #[error("group error, available user groups are: {}", .available.join(" "))]
    GroupSelection { available: Vec<String> },

    /// Credentials rejected by the gateway, message rendered from its error template
    #[error("Credentials rejected: {0}")]
    Credentials(String),

    /// Gateway asked for authentication again without an explicit error code
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// TLS errors
    #[error("TLS error: {0}")]
    Tls(String),

    /// Adapter or I/O session could not be created
    #[error("TUN device creation failed: {0}")]
    DeviceCreate(String),

    /// Device closed, or the adapter reported end of stream
    #[error("TUN device is closed")]
    DeviceClosed,

    /// Receive ring is corrupt; the device is unusable
    #[error("TUN device receive ring corrupt")]
    DeviceCorrupt,

    /// Any other device failure
    #[error("TUN device error: {0}")]
    Device(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid state errors
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias for VPN operations
pub type Result<T> = std::result::Result<T, VpnError>;

/// Helper trait for converting errors to VpnError
pub trait IntoVpnError<T> {
    fn into_vpn_error(self, context: &str) -> Result<T>;
}

impl<T, E> IntoVpnError<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn into_vpn_error(self, context: &str) -> Result<T> {
        self.map_err(|e| VpnError::Transport(format!("{context}: {e}")))
    }
}

// Implement From for common error types
impl From<toml::de::Error> for VpnError {
    fn from(err: toml::de::Error) -> Self {
        VpnError::Config(format!("TOML parsing error: {err}"))
    }
}

impl From<rustls::Error> for VpnError {
    fn from(err: rustls::Error) -> Self {
        VpnError::Tls(err.to_string())
    }
}

impl From<quick_xml::DeError> for VpnError {
    fn from(err: quick_xml::DeError) -> Self {
        VpnError::Protocol(format!("XML parsing error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VpnError::Config("test config error".to_string());
        assert_eq!(err.to_string(), "Configuration error: test config error");
    }

    #[test]
    fn test_group_selection_lists_choices() {
        let err = VpnError::GroupSelection {
            available: vec!["staff".to_string(), "contractors".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "group error, available user groups are: staff contractors"
        );
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let vpn_err: VpnError = io_err.into();
        assert!(matches!(vpn_err, VpnError::Io(_)));
    }

    #[test]
    fn test_into_vpn_error_trait() {
        let result: std::result::Result<(), &str> = Err("test error");
        let vpn_result = result.into_vpn_error("test context");
        let err = vpn_result.unwrap_err();
        assert!(matches!(err, VpnError::Transport(_)));
        assert!(err.to_string().contains("test context"));
    }
}
