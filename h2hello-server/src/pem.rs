//! PEM containers for the certificate and private key artifacts.

use std::{
    fmt,
    fs::{self, File},
    io::Write,
    path::Path,
};

use ::pem::{EncodeConfig, LineEnding, Pem};
use tempfile::NamedTempFile;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PemLabel {
    Certificate,
    /// PKCS#1 `RSAPrivateKey`.
    RsaPrivateKey,
}

impl PemLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Certificate => "CERTIFICATE",
            Self::RsaPrivateKey => "RSA PRIVATE KEY",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "CERTIFICATE" => Some(Self::Certificate),
            "RSA PRIVATE KEY" => Some(Self::RsaPrivateKey),
            _ => None,
        }
    }

    fn is_secret(self) -> bool {
        matches!(self, Self::RsaPrivateKey)
    }
}

impl fmt::Display for PemLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single PEM block ready to be written out.
pub struct PemArtifact {
    label: PemLabel,
    text: Zeroizing<String>,
}

impl PemArtifact {
    pub fn encode(label: PemLabel, der: &[u8]) -> Self {
        let block = Pem {
            tag: label.as_str().to_owned(),
            contents: der.to_vec(),
        };
        let text = ::pem::encode_config(
            &block,
            EncodeConfig {
                line_ending: LineEnding::LF,
            },
        );
        Self {
            label,
            text: Zeroizing::new(text),
        }
    }

    pub fn label(&self) -> PemLabel {
        self.label
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }
}

impl fmt::Debug for PemArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PemArtifact")
            .field("label", &self.label)
            .field("len", &self.text.len())
            .finish()
    }
}

/// Parses a single PEM block back into its label and DER payload.
pub fn decode(text: &str) -> Result<(PemLabel, Vec<u8>)> {
    let block = ::pem::parse(text).map_err(|e| Error::invalid(format!("Malformed PEM: {e}")))?;
    let label = PemLabel::from_tag(&block.tag)
        .ok_or_else(|| Error::invalid(format!("Unexpected PEM label {:?}", block.tag)))?;
    Ok((label, block.contents))
}

/// Writes the artifact to `sink`, then flushes and drops it.
///
/// The sink is consumed so it is released on every return path.
pub fn write_to_sink<W: Write>(artifact: &PemArtifact, mut sink: W) -> std::io::Result<()> {
    sink.write_all(artifact.as_bytes())?;
    sink.flush()
}

/// Writes the artifact to `path`, replacing any previous file.
///
/// The content is written to a temporary file next to `path` and renamed into place once
/// it is fully on disk, so a failed write never leaves a truncated file at `path`.
pub fn persist(artifact: &PemArtifact, path: &Path) -> Result<()> {
    stage(artifact, path)?.persist(path).map_err(|e| Error::io(path, e.error))?;
    debug!(path = %path.display(), label = %artifact.label(), "Wrote PEM artifact");
    Ok(())
}

/// Writes a certificate and its key so that either both land or neither does.
///
/// Both files are staged before either is renamed into place. If the certificate cannot be
/// moved into place after the key was, the new key is removed again.
pub fn persist_pair(
    cert: &PemArtifact,
    cert_path: &Path,
    key: &PemArtifact,
    key_path: &Path,
) -> Result<()> {
    let staged_cert = stage(cert, cert_path)?;
    let staged_key = stage(key, key_path)?;

    staged_key
        .persist(key_path)
        .map_err(|e| Error::io(key_path, e.error))?;
    if let Err(e) = staged_cert.persist(cert_path) {
        let _ = fs::remove_file(key_path);
        return Err(Error::io(cert_path, e.error));
    }
    debug!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "Wrote certificate and private key"
    );
    Ok(())
}

fn stage(artifact: &PemArtifact, path: &Path) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir).map_err(|e| Error::io(path, e))?;
    write_to_sink(artifact, file.as_file_mut()).map_err(|e| Error::io(path, e))?;
    file.as_file().sync_all().map_err(|e| Error::io(path, e))?;
    set_permissions(file.as_file(), artifact.label()).map_err(|e| Error::io(path, e))?;
    Ok(file)
}

#[cfg(unix)]
fn set_permissions(file: &File, label: PemLabel) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = if label.is_secret() { 0o600 } else { 0o644 };
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_permissions(_file: &File, _label: PemLabel) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn encodes_with_label_and_base64_body() {
        let artifact = PemArtifact::encode(PemLabel::Certificate, b"hello");
        assert_eq!(
            artifact.as_str(),
            "-----BEGIN CERTIFICATE-----\naGVsbG8=\n-----END CERTIFICATE-----\n"
        );
    }

    #[test]
    fn decode_returns_original_der() {
        let der: Vec<u8> = (0..=255).collect();
        let artifact = PemArtifact::encode(PemLabel::RsaPrivateKey, &der);
        let (label, decoded) = decode(artifact.as_str()).unwrap();
        assert_eq!(label, PemLabel::RsaPrivateKey);
        assert_eq!(decoded, der);
    }

    #[test]
    fn decode_rejects_unknown_label() {
        let text = "-----BEGIN PUBLIC KEY-----\naGVsbG8=\n-----END PUBLIC KEY-----\n";
        assert!(matches!(decode(text), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn sink_write_failure_is_reported() {
        let artifact = PemArtifact::encode(PemLabel::Certificate, b"hello");
        let err = write_to_sink(&artifact, FailingSink).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn persist_replaces_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cert.pem");
        fs::write(&path, "stale").unwrap();

        let artifact = PemArtifact::encode(PemLabel::Certificate, b"fresh");
        persist(&artifact, &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), artifact.as_str());
    }

    #[test]
    fn persist_names_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("cert.pem");

        let artifact = PemArtifact::encode(PemLabel::Certificate, b"fresh");
        match persist(&artifact, &path) {
            Err(Error::Io { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn failed_pair_leaves_no_key_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("missing").join("cert.pem");
        let key_path = dir.path().join("key.pem");

        let cert = PemArtifact::encode(PemLabel::Certificate, b"cert");
        let key = PemArtifact::encode(PemLabel::RsaPrivateKey, b"key");
        assert!(persist_pair(&cert, &cert_path, &key, &key_path).is_err());
        assert!(!key_path.exists());
        assert!(!cert_path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        let artifact = PemArtifact::encode(PemLabel::RsaPrivateKey, b"secret");
        persist(&artifact, &path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
