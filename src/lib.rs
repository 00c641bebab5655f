//! rSSLCon - AnyConnect-compatible SSL-VPN client core
//!
//! This crate logs a user into an SSL-VPN gateway speaking the Cisco
//! AnyConnect aggregate-authentication dialect (also served by ocserv) and
//! provides the packet tunnel device the data plane forwards through.
//!
//! ## What This Crate Provides
//! - TOML configuration parsing and validation
//! - The init / auth-reply XML handshake over one persistent TLS connection,
//!   including group resolution, two-phase replies and cookie-based completion
//! - A TUN device with concurrent packet read/write and safe teardown
//!   (Wintun on Windows, kernel TUN on Linux)
//!
//! ## What Lives Elsewhere
//! - The DTLS/CSTP data channel that uses the session credential
//! - Routing and DNS configuration
//! - Control-plane RPC
//!
//! ## Example
//! ```no_run
//! use rsslcon::{Config, VpnClient};
//!
//! # fn main() -> rsslcon::Result<()> {
//! let config = Config::from_file("config.toml")?;
//! let mut client = VpnClient::new(config)?;
//! let credential = client.connect()?;
//! println!("session established ({} byte token)", credential.as_str().len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod tunnel;

// Re-export core types
pub use client::{ConnectionStatus, VpnClient};
pub use config::Config;
pub use error::{Result, VpnError};
pub use protocol::{NegotiationState, Negotiator, ProtocolDocument, SessionCredential};
pub use tunnel::{Device, TunnelDevice};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
