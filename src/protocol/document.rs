//! Parsed `<config-auth>` documents returned by the gateway
//!
//! Every field defaults to empty so that partial documents from different
//! gateway dialects (ASA, ocserv) deserialize without errors.

use crate::error::Result;
use serde::Deserialize;

/// Value of the root `type` attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentKind {
    Init,
    AuthRequest,
    AuthReply,
    Complete,
    Other(String),
}

impl DocumentKind {
    fn parse(value: &str) -> Self {
        match value {
            "init" => DocumentKind::Init,
            "auth-request" => DocumentKind::AuthRequest,
            "auth-reply" => DocumentKind::AuthReply,
            "complete" => DocumentKind::Complete,
            other => DocumentKind::Other(other.to_string()),
        }
    }
}

/// One server response body
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProtocolDocument {
    #[serde(rename = "@client")]
    pub client: String,
    #[serde(rename = "@type")]
    pub doc_type: String,
    #[serde(rename = "@aggregate-auth-version")]
    pub aggregate_auth_version: String,
    pub version: Version,
    #[serde(rename = "group-select")]
    pub group_select: String,
    #[serde(rename = "session-token")]
    pub session_token: String,
    pub auth: Auth,
    pub opaque: Opaque,
    #[serde(rename = "mac-address-list")]
    pub mac_address_list: MacAddressList,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Version {
    #[serde(rename = "@who")]
    pub who: String,
    #[serde(rename = "$text")]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Auth {
    pub username: String,
    pub password: String,
    pub message: String,
    pub banner: String,
    pub error: AuthError,
    pub form: Form,
}

/// `<error param1="..">template</error>`; the text is a printf-style template
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AuthError {
    #[serde(rename = "@param1")]
    pub param1: String,
    #[serde(rename = "$text")]
    pub value: String,
}

impl AuthError {
    pub fn is_set(&self) -> bool {
        !self.value.is_empty()
    }

    /// Substitutes `param1` into the first `%s` of the template
    pub fn render(&self) -> String {
        if self.value.contains("%s") {
            self.value.replacen("%s", &self.param1, 1)
        } else {
            self.value.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Form {
    #[serde(rename = "@action")]
    pub action: String,
    pub select: Select,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Select {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "option")]
    pub options: Vec<SelectOption>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SelectOption {
    #[serde(rename = "$text")]
    pub name: String,
}

/// Negotiation parameters echoed back verbatim in later requests
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Opaque {
    #[serde(rename = "tunnel-group")]
    pub tunnel_group: String,
    #[serde(rename = "group-alias")]
    pub group_alias: String,
    #[serde(rename = "config-hash")]
    pub config_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MacAddressList {
    #[serde(rename = "mac-address")]
    pub addresses: Vec<MacAddress>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MacAddress {
    #[serde(rename = "@public-interface")]
    pub public_interface: String,
    #[serde(rename = "$text")]
    pub value: String,
}

impl ProtocolDocument {
    /// Parse a response body
    pub fn from_xml(body: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(body)?)
    }

    pub fn kind(&self) -> DocumentKind {
        DocumentKind::parse(&self.doc_type)
    }

    pub fn is_auth_request(&self) -> bool {
        self.kind() == DocumentKind::AuthRequest
    }

    pub fn is_complete(&self) -> bool {
        self.kind() == DocumentKind::Complete
    }

    /// Group names offered in the login form, in server order
    pub fn groups(&self) -> Vec<String> {
        self.auth
            .form
            .select
            .options
            .iter()
            .map(|o| o.name.clone())
            .collect()
    }

    /// First public MAC address, if any
    pub fn mac_address(&self) -> Option<&str> {
        self.mac_address_list
            .addresses
            .first()
            .map(|m| m.value.as_str())
    }
}
