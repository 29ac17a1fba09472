use std::{
    convert::Infallible,
    fs::File,
    future::Future,
    io::BufReader,
    net::SocketAddr,
    path::Path,
    sync::Arc,
};

use anyhow::Context;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{body::Incoming, service::service_fn, Request, Response};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tokio_rustls::TlsAcceptor;
use tracing::{info, instrument, warn};

pub const GREETING: &str = "Hello from http2!";

pub async fn greet(_req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(Response::new(Full::new(Bytes::from_static(
        GREETING.as_bytes(),
    ))))
}

/// Loads a PEM certificate chain and private key into a TLS config offering `h2` and
/// `http/1.1`.
pub fn load_tls_config(cert: &Path, key: &Path) -> anyhow::Result<rustls::ServerConfig> {
    let cert_chain = rustls_pemfile::certs(&mut BufReader::new(
        File::open(cert).with_context(|| format!("Failed to open {}", cert.display()))?,
    ))
    .collect::<Result<Vec<CertificateDer<'static>>, _>>()
    .context("Failed to read certificate chain")?;
    anyhow::ensure!(
        !cert_chain.is_empty(),
        "No certificate found in {}",
        cert.display()
    );

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(key).with_context(|| format!("Failed to open {}", key.display()))?,
    ))
    .context("Failed to read private key")?
    .ok_or_else(|| anyhow::anyhow!("No private key found in {}", key.display()))?;

    let mut config = rustls::ServerConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(cert_chain, key)
    .context("Certificate and private key were rejected")?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

pub struct Server {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl Server {
    pub fn new(listener: TcpListener, tls_config: rustls::ServerConfig) -> Self {
        Self {
            listener,
            acceptor: TlsAcceptor::from(Arc::new(tls_config)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        tokio::pin!(shutdown);
        loop {
            select! {
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
                res = self.listener.accept() => match res {
                    Ok((stream, remote)) => {
                        tokio::spawn(handle_connection(self.acceptor.clone(), stream, remote));
                    }
                    Err(err) => warn!("Failed to accept connection: {err}"),
                },
            }
        }
        Ok(())
    }
}

#[instrument(skip(acceptor, stream), err)]
async fn handle_connection(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    remote: SocketAddr,
) -> anyhow::Result<()> {
    let stream = acceptor
        .accept(stream)
        .await
        .context("TLS handshake failed")?;
    let alpn = stream
        .get_ref()
        .1
        .alpn_protocol()
        .map(|proto| String::from_utf8_lossy(proto).into_owned());
    info!(?alpn, "Connection established");

    auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), service_fn(greet))
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to serve connection")
}
