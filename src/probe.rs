// src/probe.rs
//! Non-validating TLS handshake used to capture peer certificate chains

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::ProbeError;
use crate::types::{Chain, Target};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Something that can fetch the certificate chain presented by a target
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect, handshake and return the peer chain (leaf first)
    async fn fetch_chain(&self, target: &Target) -> Result<Chain, ProbeError>;
}

/// Accepts whatever the server presents; this tool inventories, it does not validate
#[derive(Debug)]
struct AcceptAnyCertificate;

impl AcceptAnyCertificate {
    const SCHEMES: [SignatureScheme; 13] = [
        SignatureScheme::RSA_PKCS1_SHA1,
        SignatureScheme::ECDSA_SHA1_Legacy,
        SignatureScheme::RSA_PKCS1_SHA256,
        SignatureScheme::ECDSA_NISTP256_SHA256,
        SignatureScheme::RSA_PKCS1_SHA384,
        SignatureScheme::ECDSA_NISTP384_SHA384,
        SignatureScheme::RSA_PKCS1_SHA512,
        SignatureScheme::ECDSA_NISTP521_SHA512,
        SignatureScheme::RSA_PSS_SHA256,
        SignatureScheme::RSA_PSS_SHA384,
        SignatureScheme::RSA_PSS_SHA512,
        SignatureScheme::ED25519,
        SignatureScheme::ED448,
    ];
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        Self::SCHEMES.to_vec()
    }
}

/// TLS transport over tokio-rustls
///
/// rustls only speaks TLS 1.2 and 1.3 with ECDHE key exchange and AEAD
/// ciphers. Endpoints limited to SSLv3, TLS 1.0/1.1, static RSA key exchange
/// or CBC/RC4 suites fail the handshake and are recorded as failures, so their
/// certificates never reach the inventory.
#[derive(Clone)]
pub struct TlsProbe {
    connector: TlsConnector,
    timeout: Duration,
}

impl TlsProbe {
    /// Create a probe whose connect + handshake must finish within `timeout`
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            timeout,
        })
    }

    /// Without SNI the address itself is the server name, which rustls never puts on the wire
    fn server_name(target: &Target) -> Result<ServerName<'static>, ProbeError> {
        if target.has_sni() {
            ServerName::try_from(target.sni_hostname.clone())
                .map_err(|_| ProbeError::InvalidServerName(target.sni_hostname.clone()))
        } else {
            Ok(ServerName::IpAddress(target.ip.into()))
        }
    }

    async fn handshake(&self, target: &Target) -> Result<Chain, ProbeError> {
        let server_name = Self::server_name(target)?;
        let addr = SocketAddr::new(target.ip, target.port);

        let stream = TcpStream::connect(addr).await.map_err(ProbeError::Connect)?;
        let mut tls = self
            .connector
            .connect(server_name, stream)
            .await
            .map_err(ProbeError::Handshake)?;

        let chain: Chain = tls
            .get_ref()
            .1
            .peer_certificates()
            .map(|certs| certs.iter().map(|cert| cert.as_ref().to_vec()).collect())
            .unwrap_or_default();

        // Close without sending application data; a failed close_notify changes nothing
        let _ = tls.shutdown().await;

        if chain.is_empty() {
            return Err(ProbeError::EmptyChain);
        }
        Ok(chain)
    }
}

#[async_trait]
impl Transport for TlsProbe {
    async fn fetch_chain(&self, target: &Target) -> Result<Chain, ProbeError> {
        debug!("Connecting to {}", target);
        match timeout(self.timeout, self.handshake(target)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_server_name_without_sni_uses_address() {
        let target = Target::new("192.0.2.1".parse().unwrap(), 443, "");
        let name = TlsProbe::server_name(&target).unwrap();
        assert!(matches!(name, ServerName::IpAddress(_)));
    }

    #[test]
    fn test_server_name_with_sni() {
        let target = Target::new("192.0.2.1".parse().unwrap(), 443, "www.example.com");
        let name = TlsProbe::server_name(&target).unwrap();
        assert!(matches!(name, ServerName::DnsName(_)));
    }

    #[test]
    fn test_invalid_sni_hostname() {
        let target = Target::new("192.0.2.1".parse().unwrap(), 443, "not a hostname!");
        assert!(matches!(
            TlsProbe::server_name(&target),
            Err(ProbeError::InvalidServerName(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = TlsProbe::new(Duration::from_secs(2)).unwrap();
        let target = Target::new("127.0.0.1".parse().unwrap(), port, "");
        let err = probe.fetch_chain(&target).await.unwrap_err();
        assert!(matches!(err, ProbeError::Connect(_)), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_peer_closing_early_is_handshake_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let probe = TlsProbe::new(Duration::from_secs(2)).unwrap();
        let target = Target::new("127.0.0.1".parse().unwrap(), port, "");
        let err = probe.fetch_chain(&target).await.unwrap_err();
        assert!(matches!(err, ProbeError::Handshake(_)), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_tls10_server_is_handshake_failure() {
        // ServerHello picking TLS 1.0 with TLS_RSA_WITH_AES_128_CBC_SHA
        let mut server_hello = vec![0x16, 0x03, 0x01, 0x00, 0x2a, 0x02, 0x00, 0x00, 0x26, 0x03, 0x01];
        server_hello.extend_from_slice(&[0x5a; 32]);
        server_hello.extend_from_slice(&[0x00, 0x00, 0x2f, 0x00]);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut client_hello = [0u8; 1024];
                let _ = stream.read(&mut client_hello).await;
                let _ = stream.write_all(&server_hello).await;
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        });

        let probe = TlsProbe::new(Duration::from_secs(2)).unwrap();
        let target = Target::new("127.0.0.1".parse().unwrap(), port, "");
        let err = probe.fetch_chain(&target).await.unwrap_err();
        assert!(matches!(err, ProbeError::Handshake(_)), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(2)).await;
                drop(stream);
            }
        });

        let probe = TlsProbe::new(Duration::from_millis(200)).unwrap();
        let target = Target::new("127.0.0.1".parse().unwrap(), port, "");
        let err = probe.fetch_chain(&target).await.unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(_)), "unexpected error: {err}");
    }
}
