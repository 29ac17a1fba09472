use std::{env, fs};

use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::{client::conn::http2, Request};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tracing::{error, info};

mod config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = enable_ansi_support::enable_ansi_support();
    tracing_subscriber::fmt::init();

    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| "h2hello.toml".to_owned());
    let config = toml::from_str::<config::Config>(
        &fs::read_to_string(&path).context("Failed to read configuration file")?,
    )
    .context("Failed to parse configuration file")?;

    let stream = config.server.connect().await?;
    let alpn = stream.get_ref().1.alpn_protocol().map(<[u8]>::to_vec);
    anyhow::ensure!(
        alpn.as_deref() == Some(&b"h2"[..]),
        "Server did not negotiate HTTP/2"
    );
    info!("Connected to server");

    let (mut sender, conn) = http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
        .await
        .context("HTTP/2 handshake failed")?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            error!("Connection closed unexpectedly: {err:?}");
        }
    });

    let req = Request::get(config.server.url().as_str()).body(Empty::<Bytes>::new())?;
    let res = sender
        .send_request(req)
        .await
        .context("Request failed")?;
    info!(status = %res.status(), version = ?res.version(), "Received response");

    let body = res
        .into_body()
        .collect()
        .await
        .context("Failed to read response body")?
        .to_bytes();
    println!("{}", String::from_utf8_lossy(&body));
    Ok(())
}
