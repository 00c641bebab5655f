//! Session credential produced by a completed handshake

use crate::protocol::profile::Profile;
use std::fmt;

/// The single authoritative session string handed to the data plane
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential(String);

impl SessionCredential {
    /// Pick the credential for a completed exchange: a captured gateway
    /// cookie wins over the embedded token.
    pub fn resolve(session_token: &str, captured_cookie: Option<&str>) -> Option<Self> {
        match captured_cookie {
            Some(cookie) if !cookie.is_empty() => Some(Self(cookie.to_string())),
            _ if !session_token.is_empty() => Some(Self(session_token.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionCredential(<{} bytes>)", self.0.len())
    }
}

/// Consumer of a completed handshake
pub trait SessionSink {
    fn accept(&mut self, credential: &SessionCredential, profile: &Profile);
}

/// Default sink: keeps the credential together with what was negotiated
#[derive(Debug, Clone, Default)]
pub struct SessionRecord {
    pub session_token: Option<SessionCredential>,
    pub host: String,
    pub username: String,
    pub group: String,
    pub tunnel_group: String,
    pub group_alias: String,
}

impl SessionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_established(&self) -> bool {
        self.session_token.is_some()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

impl SessionSink for SessionRecord {
    fn accept(&mut self, credential: &SessionCredential, profile: &Profile) {
        self.session_token = Some(credential.clone());
        self.host = profile.host.clone();
        self.username = profile.username.clone();
        self.group = profile.group.clone();
        self.tunnel_group = profile.tunnel_group.clone();
        self.group_alias = profile.group_alias.clone();
    }
}
