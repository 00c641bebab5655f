//! Persistent handshake connection
//!
//! `HandshakeTransport` owns one HTTP/1.1 client connection. Each `send`
//! writes exactly one request and reads exactly one response; responses
//! are matched to requests purely by ordering. Any failure on the wire
//! tears the connection down and is returned, never retried here.

use crate::error::{Result, VpnError};
use crate::protocol::document::ProtocolDocument;
use crate::protocol::http::{self, HttpResponse};
use crate::protocol::profile::{normalize_path, Profile};
use crate::protocol::templates::{self, RequestKind};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::client::conn::http1::{self as conn, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

/// Fixed headers marking the aggregate-auth dialect
pub const PROTOCOL_HEADERS: [(&str, &str); 2] =
    [("X-Transcend-Version", "1"), ("X-Aggregate-Auth", "1")];

/// Cookie some gateways (ocserv) use instead of `<session-token>`
pub const SESSION_COOKIE: &str = "webvpn";

const CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Opens the byte stream a transport runs over
#[async_trait]
pub trait Dialer: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn dial(&self, host: &str, port: u16) -> Result<Self::Stream>;
}

/// Request handle plus the task driving the connection
struct Connection {
    sender: SendRequest<Full<Bytes>>,
    driver: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

pub struct HandshakeTransport {
    conn: Option<Connection>,
    host_with_port: String,
    headers: Vec<(String, String)>,
    captured_cookie: Option<String>,
}

impl HandshakeTransport {
    /// Dial the gateway named by `profile`
    pub async fn connect<D: Dialer>(
        dialer: &D,
        profile: &Profile,
        common_headers: Vec<(String, String)>,
    ) -> Result<Self> {
        let (host, port) = profile.host_and_port()?;
        log::info!("Connecting to {host}:{port}");
        let stream = dialer.dial(&host, port).await?;
        Self::from_stream(stream, format!("{host}:{port}"), common_headers).await
    }

    /// Run the HTTP/1.1 client over an already established stream
    pub async fn from_stream<S>(
        stream: S,
        host_with_port: String,
        common_headers: Vec<(String, String)>,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (sender, connection) = conn::Builder::new()
            .title_case_headers(true)
            .handshake(TokioIo::new(stream))
            .await
            .map_err(|e| VpnError::Transport(format!("HTTP handshake: {e}")))?;

        let peer = host_with_port.clone();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::debug!("Connection to {peer} ended: {e}");
            }
        });

        let mut headers = common_headers;
        headers.retain(|(name, _)| {
            !PROTOCOL_HEADERS
                .iter()
                .any(|(fixed, _)| name.eq_ignore_ascii_case(fixed))
        });
        headers.extend(
            PROTOCOL_HEADERS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );

        Ok(Self {
            conn: Some(Connection { sender, driver }),
            host_with_port,
            headers,
            captured_cookie: None,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Cookie value captured from a `complete` response without a token
    pub fn captured_cookie(&self) -> Option<&str> {
        self.captured_cookie.as_deref()
    }

    pub fn clear_captured_cookie(&mut self) {
        self.captured_cookie = None;
    }

    /// Drop the connection
    pub fn close(&mut self) {
        if self.conn.take().is_some() {
            log::debug!("Handshake connection to {} closed", self.host_with_port);
        }
    }

    /// Render `kind` from the profile, post it to `path`, parse the reply
    pub async fn send(
        &mut self,
        kind: RequestKind,
        path: &str,
        profile: &Profile,
    ) -> Result<ProtocolDocument> {
        let body = templates::render(kind, profile)?;
        log::debug!("POST {} ({})", profile.url(path), kind.as_str());
        log::trace!("Request body:\n{body}");
        self.post(path, &body).await
    }

    /// Post a raw XML body and parse the reply
    pub async fn post(&mut self, path: &str, body: &str) -> Result<ProtocolDocument> {
        let response = self.round_trip(path, body).await?;
        log::trace!("Response body:\n{}", response.body_text());

        if !response.is_ok() {
            self.close();
            return Err(VpnError::Transport(format!(
                "auth error {}",
                response.status_text()
            )));
        }

        let document = ProtocolDocument::from_xml(&response.body_text())?;
        if document.is_complete() && document.session_token.is_empty() {
            self.capture_cookie(&response);
        }
        Ok(document)
    }

    async fn round_trip(&mut self, path: &str, body: &str) -> Result<HttpResponse> {
        let path = normalize_path(path);
        let request =
            http::post_request(&path, &self.host_with_port, &self.headers, CONTENT_TYPE, body)?;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| VpnError::Transport("connection is closed".to_string()))?;

        let result = async {
            conn.sender
                .ready()
                .await
                .map_err(|e| VpnError::Transport(format!("connection lost: {e}")))?;
            let response = conn
                .sender
                .send_request(request)
                .await
                .map_err(|e| VpnError::Transport(format!("request failed: {e}")))?;
            HttpResponse::collect(response).await
        }
        .await;

        match result {
            Ok(response) => {
                log::debug!("Response {}", response.status_text());
                Ok(response)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn capture_cookie(&mut self, response: &HttpResponse) {
        if let Some((_, value)) = response
            .cookies()
            .into_iter()
            .find(|(name, _)| name == SESSION_COOKIE)
        {
            if !value.is_empty() {
                log::debug!("Captured {SESSION_COOKIE} cookie from completion response");
                self.captured_cookie = Some(value);
            }
        }
    }
}
