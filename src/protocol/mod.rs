//! AnyConnect-style aggregate-authentication protocol

pub mod auth;
pub mod document;
pub mod http;
pub mod profile;
pub mod session;
pub mod templates;
pub mod transport;

pub use auth::{resolve_group, NegotiationState, Negotiator};
pub use document::{DocumentKind, ProtocolDocument};
pub use profile::Profile;
pub use session::{SessionCredential, SessionRecord, SessionSink};
pub use templates::RequestKind;
pub use transport::{Dialer, HandshakeTransport};

