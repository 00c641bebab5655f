//! Loopback gateway used by the integration tests
//!
//! `FakeGateway` listens on 127.0.0.1 and answers every request it reads
//! with the next scripted response, across however many connections the
//! client opens. Requests are recorded for later inspection.

#![allow(dead_code)]

use async_trait::async_trait;
use rsslcon::config::Config;
use rsslcon::protocol::Dialer;
use rsslcon::{Result, VpnError};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// One request as seen by the gateway
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub connection: usize,
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn path(&self) -> &str {
        self.request_line.split(' ').nth(1).unwrap_or("")
    }
}

/// Canned HTTP response
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    reason: &'static str,
    headers: Vec<String>,
    body: String,
}

impl Reply {
    pub fn xml(body: &str) -> Self {
        Self {
            status: 200,
            reason: "OK",
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    pub fn status(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, line: &str) -> Self {
        self.headers.push(line.to_string());
        self
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for line in &self.headers {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out.push_str("Content-Type: text/xml\r\n");
        out.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));
        out.push_str(&self.body);
        out.into_bytes()
    }
}

pub struct FakeGateway {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl FakeGateway {
    /// Start serving `script` in order
    pub fn start(script: Vec<Reply>) -> Self {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let script = Arc::new(Mutex::new(VecDeque::from(script)));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        thread::spawn(move || {
            for (connection, stream) in listener.incoming().enumerate() {
                let Ok(stream) = stream else { break };
                let script = Arc::clone(&script);
                let recorded = Arc::clone(&recorded);
                thread::spawn(move || serve(connection, stream, &script, &recorded));
            }
        });

        Self { addr, requests }
    }

    /// `host:port` for the `[server] host` setting
    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

fn serve(
    connection: usize,
    stream: TcpStream,
    script: &Mutex<VecDeque<Reply>>,
    recorded: &Mutex<Vec<RecordedRequest>>,
) {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    let mut writer = stream.try_clone().expect("clone stream");
    let mut reader = BufReader::new(stream);

    while let Some(request) = read_request(connection, &mut reader) {
        recorded.lock().expect("requests lock").push(request);
        let reply = script.lock().expect("script lock").pop_front();
        match reply {
            Some(reply) => {
                if writer.write_all(&reply.to_bytes()).is_err() {
                    return;
                }
            }
            None => return,
        }
    }
}

fn read_request(connection: usize, reader: &mut BufReader<TcpStream>) -> Option<RecordedRequest> {
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).ok()? == 0 {
        return None;
    }

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).ok()? == 0 {
            return None;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).ok()?;

    Some(RecordedRequest {
        connection,
        request_line: request_line.trim_end().to_string(),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

/// Plain TCP stand-in for the TLS dialer
pub struct PlainDialer;

#[async_trait]
impl Dialer for PlainDialer {
    type Stream = tokio::net::TcpStream;

    async fn dial(&self, host: &str, port: u16) -> Result<Self::Stream> {
        tokio::net::TcpStream::connect((host, port))
            .await
            .map_err(|e| VpnError::Transport(format!("connect {host}:{port}: {e}")))
    }
}

pub fn config_for(gateway: &FakeGateway, group: &str) -> Config {
    let toml = format!(
        r#"
[server]
host = "{}"
verify_certificate = false

[auth]
username = "alice"
password = "s3cret"
group = "{group}"

[interface]
mac = "00:11:22:33:44:55"
"#,
        gateway.host()
    );
    toml.parse().expect("test config")
}

/// Init response advertising `groups` with the standard opaque block
pub fn init_response(groups: &[&str]) -> String {
    let select = if groups.is_empty() {
        String::new()
    } else {
        let options: String = groups
            .iter()
            .map(|g| format!("<option>{g}</option>"))
            .collect();
        format!(r#"<select name="group_list" label="GROUP:">{options}</select>"#)
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<config-auth client="vpn" type="auth-request" aggregate-auth-version="2">
    <opaque is-for="sg">
        <tunnel-group>TG-1</tunnel-group>
        <group-alias>alias-1</group-alias>
        <config-hash>1234567890</config-hash>
    </opaque>
    <auth id="main">
        <form action="/auth-submit" method="post">
            <input type="text" name="username" label="Username:"/>
            <input type="password" name="password" label="Password:"/>
            {select}
        </form>
    </auth>
</config-auth>"#
    )
}

pub fn complete_response(token: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<config-auth client="vpn" type="complete" aggregate-auth-version="2">
    <session-token>{token}</session-token>
    <auth id="success">
        <message>Success</message>
    </auth>
</config-auth>"#
    )
}

pub fn bare_auth_request() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<config-auth client="vpn" type="auth-request" aggregate-auth-version="2">
    <auth id="main">
        <message>Please enter your username and password.</message>
    </auth>
</config-auth>"#
        .to_string()
}

pub fn failed_auth_request(template: &str, param: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<config-auth client="vpn" type="auth-request" aggregate-auth-version="2">
    <auth id="main">
        <error id="88" param1="{param}" param2="">{template}</error>
    </auth>
</config-auth>"#
    )
}
