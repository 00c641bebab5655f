//! HTTP/1.1 messages on the handshake connection
//!
//! Framing is left to hyper's HTTP/1 client connection; this module builds
//! the POST requests and wraps a fully read response for the transport.

use crate::error::{Result, VpnError};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, HOST, SET_COOKIE,
};
use hyper::{Method, Request, Response, StatusCode};

/// Upper bound on a response body
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// POST `body` to `path` with `host` and the given headers
pub fn post_request(
    path: &str,
    host: &str,
    headers: &[(String, String)],
    content_type: &str,
    body: &str,
) -> Result<Request<Full<Bytes>>> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(HOST, host);

    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| VpnError::Transport(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| VpnError::Transport(format!("invalid value for header {name}: {e}")))?;
        builder = builder.header(name, value);
    }

    builder
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, body.len())
        .body(Full::new(Bytes::copy_from_slice(body.as_bytes())))
        .map_err(|e| VpnError::Transport(format!("build request: {e}")))
}

/// One fully read response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    /// Read the whole body of `response`, bounded by `MAX_BODY_SIZE`
    pub async fn collect(response: Response<Incoming>) -> Result<Self> {
        let (parts, body) = response.into_parts();
        let body = Limited::new(body, MAX_BODY_SIZE)
            .collect()
            .await
            .map_err(|e| VpnError::Transport(format!("read body: {e}")))?
            .to_bytes();

        Ok(Self {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    /// `200 OK` style status text
    pub fn status_text(&self) -> String {
        self.status.to_string()
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }

    /// Name/value pairs from every `Set-Cookie` header
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Split `name=value; attr...` into (name, value); surrounding quotes stripped
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Some((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: StatusCode, cookies: &[&str]) -> HttpResponse {
        let mut headers = HeaderMap::new();
        for cookie in cookies {
            headers.append(SET_COOKIE, HeaderValue::from_str(cookie).unwrap());
        }
        HttpResponse {
            status,
            headers,
            body: Bytes::from_static(b"<config-auth/>"),
        }
    }

    #[test]
    fn test_post_request_headers() {
        let headers = vec![("X-Aggregate-Auth".to_string(), "1".to_string())];
        let request =
            post_request("/", "vpn.example.com:443", &headers, "text/xml", "<a/>").unwrap();

        assert_eq!(*request.method(), Method::POST);
        assert_eq!(request.uri(), "/");
        assert_eq!(request.headers()[HOST], "vpn.example.com:443");
        assert_eq!(request.headers()["x-aggregate-auth"], "1");
        assert_eq!(request.headers()[CONTENT_LENGTH], "4");
    }

    #[test]
    fn test_header_with_line_break_is_rejected() {
        let headers = vec![("X-Test".to_string(), "a\r\nInjected: 1".to_string())];
        let err = post_request("/", "h", &headers, "text/xml", "").unwrap_err();
        assert!(matches!(err, VpnError::Transport(_)));
    }

    #[test]
    fn test_cookies_and_status() {
        let response = response(
            StatusCode::UNAUTHORIZED,
            &["webvpncontext=00@x; path=/", "webvpn=\"XYZ\"; Secure"],
        );
        assert!(!response.is_ok());
        assert_eq!(response.status_text(), "401 Unauthorized");

        let cookies = response.cookies();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[1], ("webvpn".to_string(), "XYZ".to_string()));
    }

    #[test]
    fn test_malformed_cookie_skipped() {
        let response = response(StatusCode::OK, &["novalue", "=empty", "a=b"]);
        assert_eq!(response.cookies(), vec![("a".to_string(), "b".to_string())]);
        assert_eq!(response.body_text(), "<config-auth/>");
    }
}
