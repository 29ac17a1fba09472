use std::{env, fs};

use anyhow::Context;
use h2hello_server::{provision, State};
use rand::rngs::OsRng;
use tracing::info;

mod config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| "h2hello-server.toml".to_owned());
    let config = toml::from_str::<config::Config>(
        &fs::read_to_string(&path).context("Failed to read configuration file")?,
    )
    .context("Failed to parse configuration file")?;

    let issuer = config.certificate.issuer();
    let request = config.certificate.request();
    let cert_path = config.server.cert().to_owned();
    let key_path = config.server.key().to_owned();
    let credentials = tokio::task::spawn_blocking(move || {
        provision(&mut OsRng, &issuer, &request, &cert_path, &key_path)
    })
    .await
    .context("Provisioning task panicked")?
    .context("Failed to provision credentials")?;

    let server = config.server.bind().await.context("Failed to start server")?;
    info!(
        state = %State::Ready,
        cert = %credentials.cert_path.display(),
        "Listening on {}",
        server.local_addr()?
    );

    server
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received SIGINT");
        })
        .await
}
