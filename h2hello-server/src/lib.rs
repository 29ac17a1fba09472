//! Self-signed RSA certificate provisioning and a TLS server that greets over HTTP/2.
//!
//! Startup runs [`provision`] once to generate a key, issue a certificate for it, and write
//! both as PEM files; the [`server`] then loads those files and serves every request with
//! a fixed greeting.

pub mod error;
pub mod issuer;
pub mod keypair;
pub mod pem;
pub mod provision;
pub mod server;
pub mod subject;

pub use error::{Error, Result};
pub use issuer::{CertificateIssuer, Clock, KeyPurpose, SignedCertificate, SystemClock};
pub use keypair::KeyPair;
pub use provision::{provision, CertificateRequest, Credentials, ProvisionError, State};
pub use subject::SubjectInfo;
