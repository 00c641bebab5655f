//! TLS/SSL handling for the handshake connection

use crate::error::{IntoVpnError, Result, VpnError};
use crate::protocol::transport::Dialer;
use async_trait::async_trait;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

/// TLS stream carrying the aggregate-auth exchange
pub type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Certificate verifier that accepts every certificate.
/// Only installed when the configuration disables verification.
#[derive(Debug)]
struct AcceptAllVerifier;

impl rustls::client::danger::ServerCertVerifier for AcceptAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA1,
            rustls::SignatureScheme::ECDSA_SHA1_Legacy,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::ED448,
        ]
    }
}

#[cfg(not(any(feature = "ring-crypto", feature = "aws-lc-crypto")))]
compile_error!("enable either the `ring-crypto` or the `aws-lc-crypto` feature");

/// Crypto provider selected by feature flags; ring wins when both are enabled
fn crypto_provider() -> Arc<CryptoProvider> {
    #[cfg(feature = "ring-crypto")]
    {
        Arc::new(rustls::crypto::ring::default_provider())
    }

    #[cfg(all(feature = "aws-lc-crypto", not(feature = "ring-crypto")))]
    {
        Arc::new(rustls::crypto::aws_lc_rs::default_provider())
    }
}

/// TLS configuration for the gateway connection
#[derive(Clone)]
pub struct TlsConfig {
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Create a new TLS configuration
    pub fn new(verify_certificate: bool) -> Result<Self> {
        let builder = ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()?;

        let client_config = if verify_certificate {
            let mut root_store = RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            builder
                .with_root_certificates(root_store)
                .with_no_client_auth()
        } else {
            log::warn!("TLS certificate verification is disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAllVerifier))
                .with_no_client_auth()
        };

        Ok(Self {
            client_config: Arc::new(client_config),
        })
    }

    /// Get the client configuration
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }
}

/// Dials `host:port` over IPv4 TCP and completes a TLS handshake
pub struct TlsDialer {
    config: TlsConfig,
    timeout: Duration,
}

impl TlsDialer {
    pub fn new(config: TlsConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    async fn connect_tcp(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addrs: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|e| VpnError::Transport(format!("Failed to resolve {host}: {e}")))?
            .filter(SocketAddr::is_ipv4)
            .collect();

        if addrs.is_empty() {
            return Err(VpnError::Transport(format!(
                "No IPv4 address found for {host}"
            )));
        }

        let mut last_err = String::new();
        for addr in addrs {
            match timeout(self.timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    log::debug!("TCP connected to {addr}");
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    log::debug!("TCP connect to {addr} failed: {e}");
                    last_err = e.to_string();
                }
                Err(_) => {
                    log::debug!("TCP connect to {addr} timed out");
                    last_err = format!("timed out after {:?}", self.timeout);
                }
            }
        }

        Err(VpnError::Transport(format!("TCP connection failed: {last_err}")))
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    type Stream = TlsStream;

    async fn dial(&self, host: &str, port: u16) -> Result<TlsStream> {
        let tcp_stream = self.connect_tcp(host, port).await?;
        tcp_stream
            .set_nodelay(true)
            .into_vpn_error("set TCP_NODELAY")?;

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| VpnError::Transport(format!("Invalid hostname: {e}")))?;

        // The dial timeout also bounds the TLS handshake itself.
        let connector = TlsConnector::from(self.config.client_config());
        let stream = timeout(self.timeout, connector.connect(server_name, tcp_stream))
            .await
            .map_err(|_| VpnError::Transport("TLS handshake timed out".to_string()))?
            .map_err(|e| VpnError::Transport(format!("TLS handshake failed: {e}")))?;

        log::debug!(
            "TLS established with {host}:{port} ({:?})",
            stream.get_ref().1.protocol_version()
        );
        Ok(stream)
    }
}
