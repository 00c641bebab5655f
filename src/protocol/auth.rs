//! Aggregate-auth negotiation
//!
//! Drives the two-phase handshake over a `HandshakeTransport`:
//!
//! 1. `init_auth` posts an `init` document, learns the submit path and the
//!    opaque block, and resolves the user group.
//! 2. `password_auth` posts an `auth-reply` with the credentials and turns
//!    the gateway's `complete` answer into a `SessionCredential`.
//!
//! All handshake state lives in the `Negotiator`; one negotiator serves one
//! in-flight attempt at a time.

use crate::config::Config;
use crate::crypto::tls::{TlsConfig, TlsDialer};
use crate::error::{Result, VpnError};
use crate::protocol::document::ProtocolDocument;
use crate::protocol::profile::Profile;
use crate::protocol::session::{SessionCredential, SessionSink};
use crate::protocol::templates::RequestKind;
use crate::protocol::transport::{Dialer, HandshakeTransport};

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Disconnected,
    Negotiating,
    GroupResolved,
    Authenticating,
    Authenticated,
    Failed,
}

/// Pick the group to submit given what the gateway advertises.
///
/// A single advertised group always wins; with several the configured one
/// must be among them; with none the configured value is kept.
pub fn resolve_group(configured: &str, advertised: &[String]) -> Result<String> {
    match advertised {
        [] => Ok(configured.to_string()),
        [only] => Ok(only.clone()),
        many => {
            if many.iter().any(|g| g == configured) {
                Ok(configured.to_string())
            } else {
                Err(VpnError::GroupSelection {
                    available: many.to_vec(),
                })
            }
        }
    }
}

pub struct Negotiator<D: Dialer> {
    config: Config,
    dialer: D,
    profile: Profile,
    transport: Option<HandshakeTransport>,
    state: NegotiationState,
}

impl Negotiator<TlsDialer> {
    /// Negotiator dialing over TLS with the configured verification policy
    pub fn from_config(config: Config) -> Result<Self> {
        let tls = TlsConfig::new(config.server.verify_certificate)?;
        let dialer = TlsDialer::new(tls, config.connect_timeout());
        Ok(Self::new(config, dialer))
    }
}

impl<D: Dialer> Negotiator<D> {
    pub fn new(config: Config, dialer: D) -> Self {
        let profile = Profile::from_config(&config);
        Self {
            config,
            dialer,
            profile,
            transport: None,
            state: NegotiationState::Disconnected,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a fresh connection, send `init`, resolve the group
    pub async fn init_auth(&mut self) -> Result<()> {
        self.state = NegotiationState::Negotiating;
        let result = self.negotiate().await;
        self.state = match result {
            Ok(()) => NegotiationState::GroupResolved,
            Err(ref e) => {
                log::warn!("Init negotiation failed: {e}");
                NegotiationState::Failed
            }
        };
        result
    }

    async fn negotiate(&mut self) -> Result<()> {
        self.close_transport();
        self.profile = Profile::from_config(&self.config);
        self.profile.app_version = self.config.agent.reported_version().to_string();
        self.profile.mac_address = self.config.interface.mac.clone();

        let headers = self.config.common_headers();
        let mut transport =
            HandshakeTransport::connect(&self.dialer, &self.profile, headers).await?;
        transport.clear_captured_cookie();
        let document = transport.send(RequestKind::Init, "", &self.profile).await;
        self.transport = Some(transport);
        let document = document?;

        self.profile.auth_path = document.auth.form.action.clone();
        self.profile.tunnel_group = document.opaque.tunnel_group.clone();
        self.profile.group_alias = document.opaque.group_alias.clone();
        self.profile.config_hash = document.opaque.config_hash.clone();

        let groups = document.groups();
        self.profile.group = resolve_group(&self.profile.group, &groups)?;
        log::info!(
            "Negotiated group '{}' (tunnel group '{}', {} advertised)",
            self.profile.group,
            self.profile.tunnel_group,
            groups.len()
        );
        Ok(())
    }

    /// Submit credentials; on success hand the credential to `sink`
    pub async fn password_auth(
        &mut self,
        sink: &mut dyn SessionSink,
    ) -> Result<SessionCredential> {
        if self.state != NegotiationState::GroupResolved {
            return Err(VpnError::InvalidState(format!(
                "password authentication requires a resolved group, current state is {:?}",
                self.state
            )));
        }

        self.state = NegotiationState::Authenticating;
        let result = self.authenticate().await;
        match result {
            Ok(ref credential) => {
                sink.accept(credential, &self.profile);
                self.state = NegotiationState::Authenticated;
                log::info!("Authenticated as '{}'", self.profile.username);
                log::debug!("Session token: {}", credential.as_str());
            }
            Err(ref e) => {
                log::warn!("Password authentication failed: {e}");
                self.state = NegotiationState::Failed;
            }
        }
        result
    }

    async fn authenticate(&mut self) -> Result<SessionCredential> {
        let mut document = self.send_auth_reply().await?;

        // Some gateways acknowledge the first reply with a bare auth-request.
        if document.is_auth_request() && !document.auth.error.is_set() {
            log::debug!("Gateway requested a second auth-reply round");
            document = self.send_auth_reply().await?;
        }

        if document.is_auth_request() {
            if document.auth.error.is_set() {
                return Err(VpnError::Credentials(document.auth.error.render()));
            }
            return Err(VpnError::Authentication(document.auth.message));
        }

        let cookie = self.transport.as_ref().and_then(|t| t.captured_cookie());
        SessionCredential::resolve(&document.session_token, cookie).ok_or_else(|| {
            VpnError::Protocol(format!(
                "gateway answered '{}' without a session token",
                document.doc_type
            ))
        })
    }

    async fn send_auth_reply(&mut self) -> Result<ProtocolDocument> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| VpnError::Transport("connection is closed".to_string()))?;
        transport
            .send(RequestKind::AuthReply, &self.profile.auth_path, &self.profile)
            .await
    }

    /// Drop the connection and forget negotiated state
    pub fn disconnect(&mut self) {
        self.close_transport();
        self.profile = Profile::from_config(&self.config);
        self.state = NegotiationState::Disconnected;
    }

    fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_group_overrides_configured() {
        assert_eq!(resolve_group("", &groups(&["staff"])).unwrap(), "staff");
        assert_eq!(resolve_group("other", &groups(&["staff"])).unwrap(), "staff");
    }

    #[test]
    fn test_multiple_groups_require_membership() {
        let offered = groups(&["staff", "contractors"]);
        assert_eq!(resolve_group("contractors", &offered).unwrap(), "contractors");

        match resolve_group("guests", &offered) {
            Err(VpnError::GroupSelection { available }) => assert_eq!(available, offered),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(resolve_group("", &offered).is_err());
    }

    #[test]
    fn test_no_groups_keeps_configured() {
        assert_eq!(resolve_group("my group", &[]).unwrap(), "my group");
        assert_eq!(resolve_group("", &[]).unwrap(), "");
    }
}
