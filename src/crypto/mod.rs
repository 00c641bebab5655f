//! TLS plumbing for the handshake connection

pub mod tls;

pub use tls::{TlsConfig, TlsDialer, TlsStream};
