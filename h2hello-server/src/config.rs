use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use h2hello_server::{
    server::{self, Server},
    CertificateIssuer, CertificateRequest, KeyPurpose, SubjectInfo,
};
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, DurationSeconds};
use tokio::net::TcpListener;

#[serde_as]
#[derive(Deserialize)]
pub struct ServerConfig {
    #[serde_as(as = "DisplayFromStr")]
    bind: SocketAddr,
    cert: PathBuf,
    key: PathBuf,
}

impl ServerConfig {
    pub fn cert(&self) -> &Path {
        &self.cert
    }

    pub fn key(&self) -> &Path {
        &self.key
    }

    fn configure(&self) -> anyhow::Result<rustls::ServerConfig> {
        server::load_tls_config(&self.cert, &self.key)
    }

    pub async fn bind(&self) -> anyhow::Result<Server> {
        let tls_config = self.configure()?;
        Ok(Server::new(TcpListener::bind(self.bind).await?, tls_config))
    }
}

#[serde_as]
#[derive(Deserialize)]
pub struct CertificateConfig {
    #[serde(default = "default_key_bits")]
    key_bits: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_validity")]
    validity: Duration,
    organization: Option<String>,
    organizational_unit: Option<String>,
    common_name: String,
    #[serde(default = "default_ip_addresses")]
    ip_addresses: Vec<IpAddr>,
    #[serde(default = "default_extended_key_usage")]
    extended_key_usage: Vec<KeyPurpose>,
}

fn default_key_bits() -> usize {
    2048
}

fn default_validity() -> Duration {
    Duration::from_secs(365 * 24 * 60 * 60)
}

fn default_ip_addresses() -> Vec<IpAddr> {
    vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
}

fn default_extended_key_usage() -> Vec<KeyPurpose> {
    vec![KeyPurpose::ServerAuth]
}

impl CertificateConfig {
    pub fn issuer(&self) -> CertificateIssuer {
        CertificateIssuer::new().extended_key_usage(&self.extended_key_usage)
    }

    pub fn request(&self) -> CertificateRequest {
        let mut subject = SubjectInfo::new(&self.common_name);
        subject.organization = self.organization.clone();
        subject.organizational_unit = self.organizational_unit.clone();
        CertificateRequest {
            key_bits: self.key_bits,
            subject,
            validity: self.validity,
            ip_addresses: self.ip_addresses.clone(),
        }
    }
}

#[derive(Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub certificate: CertificateConfig,
}
