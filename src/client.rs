//! VPN Client - in-process surface for the control plane
//!
//! `VpnClient` runs one authentication attempt at a time: InitAuth followed
//! by PasswordAuth, recording the resulting credential in a `SessionRecord`
//! for the data-plane setup that follows.

use crate::config::Config;
use crate::crypto::tls::TlsDialer;
use crate::error::{Result, VpnError};
use crate::protocol::auth::{NegotiationState, Negotiator};
use crate::protocol::session::{SessionCredential, SessionRecord};
use crate::protocol::transport::Dialer;
use tokio::runtime::{Builder, Runtime};

/// Connection status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

pub struct VpnClient<D: Dialer = TlsDialer> {
    negotiator: Negotiator<D>,
    session: SessionRecord,
    // Drives the handshake connection between calls; dropped last.
    runtime: Runtime,
}

impl VpnClient<TlsDialer> {
    /// Create a new VPN client with the given configuration
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or TLS setup fails
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Self::with_negotiator(Negotiator::from_config(config)?)
    }
}

impl<D: Dialer> VpnClient<D> {
    pub fn with_negotiator(negotiator: Negotiator<D>) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| VpnError::InvalidState(format!("failed to create runtime: {e}")))?;
        Ok(Self {
            negotiator,
            session: SessionRecord::new(),
            runtime,
        })
    }

    /// Run InitAuth then PasswordAuth
    pub fn connect(&mut self) -> Result<SessionCredential> {
        let Self {
            negotiator,
            session,
            runtime,
        } = self;
        session.clear();
        runtime.block_on(async {
            negotiator.init_auth().await?;
            negotiator.password_auth(session).await
        })
    }

    pub fn init_auth(&mut self) -> Result<()> {
        self.session.clear();
        self.runtime.block_on(self.negotiator.init_auth())
    }

    pub fn password_auth(&mut self) -> Result<SessionCredential> {
        let Self {
            negotiator,
            session,
            runtime,
        } = self;
        runtime.block_on(negotiator.password_auth(session))
    }

    pub fn status(&self) -> ConnectionStatus {
        match self.negotiator.state() {
            NegotiationState::Disconnected | NegotiationState::Failed => {
                ConnectionStatus::Disconnected
            }
            NegotiationState::Negotiating
            | NegotiationState::GroupResolved
            | NegotiationState::Authenticating => ConnectionStatus::Connecting,
            NegotiationState::Authenticated => ConnectionStatus::Connected,
        }
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        self.negotiator.state()
    }

    pub fn session(&self) -> &SessionRecord {
        &self.session
    }

    /// Drop the handshake connection and forget the credential
    pub fn disconnect(&mut self) {
        self.negotiator.disconnect();
        self.session.clear();
        log::info!("Disconnected");
    }
}
