use std::{
    fs::File,
    io::BufReader,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
};

use anyhow::Context;
use rustls::pki_types::ServerName;
use serde::Deserialize;
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio_rustls::{client::TlsStream, TlsConnector};
use url::Url;

#[derive(Deserialize)]
pub struct ServerConfig {
    url: Url,
    host: Option<String>,
    #[serde(default)]
    insecure: bool,
    cert: Option<PathBuf>,
    bind: Option<SocketAddr>,
}

impl ServerConfig {
    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn resolve(&self) -> anyhow::Result<(SocketAddr, &str)> {
        let host = strip_ipv6_brackets(
            self.url
                .host_str()
                .ok_or_else(|| anyhow::anyhow!("Wrong server url: host missing"))?,
        );
        let port = self.url.port_or_known_default().unwrap_or(443);
        let remote = lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| anyhow::anyhow!("Couldn't resolve to an address"))?;
        Ok((remote, self.host.as_deref().unwrap_or(host)))
    }

    fn configure(&self) -> anyhow::Result<rustls::ClientConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?;
        let mut config = if self.insecure {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(
                    insecure::SkipServerVerification::default(),
                ))
                .with_no_client_auth()
        } else if let Some(cert_path) = &self.cert {
            let mut roots = rustls::RootCertStore::empty();
            let file = File::open(cert_path).context("Failed to read certificate")?;
            for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
                roots.add(cert.context("Failed to parse certificate")?)?;
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        } else {
            anyhow::bail!("A self-signed server needs either `cert` or `insecure = true`");
        };
        config.alpn_protocols = vec![b"h2".to_vec()];
        Ok(config)
    }

    pub async fn connect(&self) -> anyhow::Result<TlsStream<TcpStream>> {
        let (remote, host) = self.resolve().await?;
        let name = ServerName::try_from(host)
            .context("Invalid server name")?
            .to_owned();
        let connector = TlsConnector::from(Arc::new(self.configure()?));

        let stream = match self.bind {
            Some(bind) => {
                let socket = if bind.is_ipv4() {
                    TcpSocket::new_v4()?
                } else {
                    TcpSocket::new_v6()?
                };
                socket.bind(bind).context("Failed to bind local address")?;
                socket.connect(remote).await
            }
            None => TcpStream::connect(remote).await,
        }
        .context("Failed to connect to server")?;

        let stream = connector
            .connect(name, stream)
            .await
            .context("TLS handshake failed")?;
        Ok(stream)
    }
}

#[derive(Deserialize)]
pub struct Config {
    pub server: ServerConfig,
}

fn strip_ipv6_brackets(host: &str) -> &str {
    // An ipv6 url looks like eg https://[::1]:4433/Cargo.toml, wherein the host [::1] is the
    // ipv6 address ::1 wrapped in brackets, per RFC 2732. This strips those.
    if host.starts_with('[') && host.ends_with(']') {
        &host[1..host.len() - 1]
    } else {
        host
    }
}

mod insecure {
    use rustls::{
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        crypto::{ring, verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms},
        pki_types::{CertificateDer, ServerName, UnixTime},
        DigitallySignedStruct, Error, SignatureScheme,
    };

    /// Accepts any server certificate but still checks handshake signatures against it.
    #[derive(Debug)]
    pub struct SkipServerVerification(WebPkiSupportedAlgorithms);

    impl Default for SkipServerVerification {
        fn default() -> Self {
            SkipServerVerification(ring::default_provider().signature_verification_algorithms)
        }
    }

    impl ServerCertVerifier for SkipServerVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            verify_tls12_signature(message, cert, dss, &self.0)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            verify_tls13_signature(message, cert, dss, &self.0)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.supported_schemes()
        }
    }
}
