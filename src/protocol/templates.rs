//! Request bodies for the aggregate-auth handshake
//!
//! Both documents are produced with a streaming XML writer so every
//! profile value is escaped as text; a password containing `<` or `&`
//! cannot alter the document structure.
//!
//! Element layout follows draft-mavrogiannopoulos-openconnect-03 §2.1.2.

use crate::error::{Result, VpnError};
use crate::protocol::profile::Profile;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fmt::Display;

/// Which request document to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Init,
    AuthReply,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Init => "init",
            RequestKind::AuthReply => "auth-reply",
        }
    }
}

const AGGREGATE_AUTH_VERSION: &str = "2";
const DEVICE_ID: &str = "dummy";

fn xml_error<E: Display>(err: E) -> VpnError {
    VpnError::Protocol(format!("XML rendering failed: {err}"))
}

struct XmlBuilder {
    writer: Writer<Vec<u8>>,
}

impl XmlBuilder {
    fn new() -> Result<Self> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_error)?;
        Ok(Self { writer })
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let elem = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.writer
            .write_event(Event::Start(elem))
            .map_err(xml_error)
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_error)
    }

    fn text_element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<()> {
        self.start(name, attrs)?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_error)?;
        self.end(name)
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner()).map_err(xml_error)
    }
}

/// Render the body for `kind` from the profile
pub fn render(kind: RequestKind, profile: &Profile) -> Result<String> {
    profile.ensure_identity()?;

    let mut xml = XmlBuilder::new()?;
    xml.start(
        "config-auth",
        &[
            ("client", "vpn"),
            ("type", kind.as_str()),
            ("aggregate-auth-version", AGGREGATE_AUTH_VERSION),
        ],
    )?;
    xml.text_element("version", &[("who", "vpn")], &profile.app_version)?;
    xml.text_element("device-id", &[], DEVICE_ID)?;

    if kind == RequestKind::AuthReply {
        xml.start("opaque", &[("is-for", "sg")])?;
        xml.text_element("tunnel-group", &[], &profile.tunnel_group)?;
        xml.text_element("group-alias", &[], &profile.group_alias)?;
        xml.text_element("config-hash", &[], &profile.config_hash)?;
        xml.end("opaque")?;

        xml.start("mac-address-list", &[])?;
        xml.text_element(
            "mac-address",
            &[("public-interface", "true")],
            &profile.mac_address,
        )?;
        xml.end("mac-address-list")?;

        xml.start("auth", &[])?;
        xml.text_element("username", &[], &profile.username)?;
        xml.text_element("password", &[], &profile.password)?;
        xml.end("auth")?;

        xml.text_element("group-select", &[], &profile.group)?;
    }

    xml.end("config-auth")?;
    xml.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::document::{DocumentKind, ProtocolDocument};

    fn sample_profile() -> Profile {
        Profile {
            host: "vpn.example.com".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            group: "g".to_string(),
            scheme: "https://".to_string(),
            app_version: "4.10.07062".to_string(),
            mac_address: "aa:bb".to_string(),
            tunnel_group: "tg".to_string(),
            group_alias: "ga".to_string(),
            config_hash: "ch".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_init_body() {
        let body = render(RequestKind::Init, &sample_profile()).unwrap();
        assert!(body.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(body.contains(
            "<config-auth client=\"vpn\" type=\"init\" aggregate-auth-version=\"2\">"
        ));
        assert!(body.contains("<version who=\"vpn\">4.10.07062</version>"));
        assert!(body.contains("<device-id>dummy</device-id>"));
        assert!(!body.contains("<auth>"));
        assert!(!body.contains("opaque"));
    }

    #[test]
    fn test_auth_reply_parses_back() {
        let body = render(RequestKind::AuthReply, &sample_profile()).unwrap();
        let doc = ProtocolDocument::from_xml(&body).unwrap();

        assert_eq!(doc.kind(), DocumentKind::AuthReply);
        assert_eq!(doc.version.value, "4.10.07062");
        assert_eq!(doc.auth.username, "u");
        assert_eq!(doc.auth.password, "p");
        assert_eq!(doc.group_select, "g");
        assert_eq!(doc.opaque.tunnel_group, "tg");
        assert_eq!(doc.opaque.group_alias, "ga");
        assert_eq!(doc.opaque.config_hash, "ch");
        assert_eq!(doc.mac_address(), Some("aa:bb"));
    }

    #[test]
    fn test_user_fields_are_escaped() {
        let mut profile = sample_profile();
        profile.username = "bob</username><admin>".to_string();
        profile.password = "p&ss<\"word\">".to_string();

        let body = render(RequestKind::AuthReply, &profile).unwrap();
        assert!(!body.contains("<admin>"));
        assert!(body.contains("&lt;"));
        assert!(body.contains("&amp;"));

        let doc = ProtocolDocument::from_xml(&body).unwrap();
        assert_eq!(doc.auth.username, "bob</username><admin>");
        assert_eq!(doc.auth.password, "p&ss<\"word\">");
    }

    #[test]
    fn test_render_requires_identity() {
        let mut profile = sample_profile();
        profile.app_version.clear();
        let err = render(RequestKind::Init, &profile).unwrap_err();
        assert!(matches!(err, VpnError::InvalidState(_)));
    }
}
