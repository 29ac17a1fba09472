use std::{
    net::IpAddr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rand::{CryptoRng, RngCore};
use rsa::{
    pkcs1v15::{Signature, VerifyingKey},
    pkcs8::DecodePublicKey,
    sha2::Sha256,
    signature::Verifier,
    RsaPublicKey,
};
use serde::Deserialize;
use tracing::debug;
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    der::{
        asn1::{GeneralizedTime, OctetString, UtcTime},
        oid::{AssociatedOid, ObjectIdentifier},
        DateTime, Decode, Encode,
    },
    ext::pkix::{name::GeneralName, ExtendedKeyUsage, KeyUsage, KeyUsages, SubjectAltName},
    serial_number::SerialNumber,
    spki::SubjectPublicKeyInfoOwned,
    time::{Time, Validity},
    Certificate,
};

use crate::{
    error::{Error, Result},
    keypair::KeyPair,
    pem::{PemArtifact, PemLabel},
    subject::SubjectInfo,
};

const ID_KP_SERVER_AUTH: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.1");
const ID_KP_CLIENT_AUTH: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.2");

/// Source of the issuance time.
pub trait Clock {
    fn now(&self) -> SystemTime;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Protocol role written into the extended key usage extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPurpose {
    ServerAuth,
    ClientAuth,
}

impl KeyPurpose {
    fn oid(self) -> ObjectIdentifier {
        match self {
            Self::ServerAuth => ID_KP_SERVER_AUTH,
            Self::ClientAuth => ID_KP_CLIENT_AUTH,
        }
    }
}

/// Builds and self-signs leaf certificates.
#[derive(Clone, Debug)]
pub struct CertificateIssuer<C = SystemClock> {
    clock: C,
    purposes: Vec<KeyPurpose>,
}

impl CertificateIssuer {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for CertificateIssuer {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> CertificateIssuer<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            purposes: vec![KeyPurpose::ServerAuth],
        }
    }

    /// Replaces the extended key usage purposes. An empty list omits the extension.
    pub fn extended_key_usage(mut self, purposes: &[KeyPurpose]) -> Self {
        self.purposes = purposes.to_vec();
        self
    }

    /// Issues a certificate for `key`, signed by `key`, with `subject` as both subject and
    /// issuer.
    ///
    /// `validity` must be a positive whole number of seconds. The serial number is a
    /// non-zero integer drawn uniformly from `[0, 2^128)` using `rng`.
    pub fn issue<R: CryptoRng + RngCore>(
        &self,
        rng: &mut R,
        key: &KeyPair,
        subject: &SubjectInfo,
        validity: Duration,
        ip_addresses: &[IpAddr],
    ) -> Result<SignedCertificate> {
        if validity.is_zero() {
            return Err(Error::invalid("Validity duration must be positive"));
        }
        if validity.subsec_nanos() != 0 {
            return Err(Error::invalid(
                "Validity duration must be a whole number of seconds",
            ));
        }
        let name = subject.to_name()?;

        let not_before = self
            .clock
            .now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| Error::invalid("Clock reports a time before the Unix epoch"))?
            .as_secs();
        let not_after = not_before
            .checked_add(validity.as_secs())
            .ok_or_else(|| Error::invalid("Validity duration is too large"))?;
        let validity = Validity {
            not_before: x509_time(not_before)?,
            not_after: x509_time(not_after)?,
        };

        let serial = draw_serial(rng)?;
        let serial_number = SerialNumber::new(&serial.to_be_bytes()).map_err(Error::signing)?;

        let signing_key = key.signing_key();
        let spki = SubjectPublicKeyInfoOwned::from_key(key.public_key()).map_err(Error::signing)?;
        let mut builder = CertificateBuilder::new(
            Profile::Manual { issuer: None },
            serial_number,
            validity,
            name,
            spki,
            &signing_key,
        )
        .map_err(Error::signing)?;

        builder
            .add_extension(&KeyUsage(
                KeyUsages::DigitalSignature | KeyUsages::DataEncipherment,
            ))
            .map_err(Error::signing)?;
        if !self.purposes.is_empty() {
            let oids = self.purposes.iter().map(|p| p.oid()).collect();
            builder
                .add_extension(&ExtendedKeyUsage(oids))
                .map_err(Error::signing)?;
        }
        if !ip_addresses.is_empty() {
            let names = ip_addresses
                .iter()
                .map(ip_general_name)
                .collect::<Result<Vec<_>>>()?;
            builder
                .add_extension(&SubjectAltName(names))
                .map_err(Error::signing)?;
        }

        let certificate = builder.build::<Signature>().map_err(Error::signing)?;
        let signed = SignedCertificate::new(certificate)?;
        signed.verify(&key.public_key())?;
        debug!(serial = %format!("{serial:032x}"), "Issued self-signed certificate");
        Ok(signed)
    }
}

fn draw_serial<R: CryptoRng + RngCore>(rng: &mut R) -> Result<u128> {
    loop {
        let mut bytes = [0u8; 16];
        rng.try_fill_bytes(&mut bytes)
            .map_err(Error::InsufficientEntropy)?;
        let serial = u128::from_be_bytes(bytes);
        if serial != 0 {
            return Ok(serial);
        }
    }
}

/// RFC 5280 wants UTCTime through 2049 and GeneralizedTime from 2050 on.
fn x509_time(unix_secs: u64) -> Result<Time> {
    let invalid = |e: x509_cert::der::Error| {
        Error::invalid(format!("Unrepresentable certificate time: {e}"))
    };
    let datetime =
        DateTime::from_unix_duration(Duration::from_secs(unix_secs)).map_err(invalid)?;
    if datetime.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_date_time(datetime).map_err(invalid)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_date_time(datetime)))
    }
}

fn ip_general_name(ip: &IpAddr) -> Result<GeneralName> {
    let octets = match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    };
    let octets = OctetString::new(octets).map_err(Error::signing)?;
    Ok(GeneralName::IpAddress(octets))
}

/// A DER-encoded, self-signed X.509 certificate.
#[derive(Clone, Debug)]
pub struct SignedCertificate {
    certificate: Certificate,
    der: Vec<u8>,
}

impl SignedCertificate {
    fn new(certificate: Certificate) -> Result<Self> {
        let der = certificate.to_der().map_err(Error::signing)?;
        Ok(Self { certificate, der })
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        let certificate = Certificate::from_der(der)
            .map_err(|e| Error::invalid(format!("Malformed certificate: {e}")))?;
        Ok(Self {
            certificate,
            der: der.to_vec(),
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn to_pem(&self) -> PemArtifact {
        PemArtifact::encode(PemLabel::Certificate, &self.der)
    }

    pub fn serial(&self) -> u128 {
        self.certificate
            .tbs_certificate
            .serial_number
            .as_bytes()
            .iter()
            .fold(0u128, |acc, b| acc << 8 | u128::from(*b))
    }

    pub fn subject(&self) -> String {
        self.certificate.tbs_certificate.subject.to_string()
    }

    pub fn issuer(&self) -> String {
        self.certificate.tbs_certificate.issuer.to_string()
    }

    pub fn not_before(&self) -> SystemTime {
        UNIX_EPOCH + self.certificate.tbs_certificate.validity.not_before.to_unix_duration()
    }

    pub fn not_after(&self) -> SystemTime {
        UNIX_EPOCH + self.certificate.tbs_certificate.validity.not_after.to_unix_duration()
    }

    /// Decodes the extension of type `T`, if the certificate carries one.
    pub fn extension<T>(&self) -> Result<Option<T>>
    where
        T: AssociatedOid + for<'a> Decode<'a>,
    {
        let Some(extensions) = &self.certificate.tbs_certificate.extensions else {
            return Ok(None);
        };
        extensions
            .iter()
            .find(|ext| ext.extn_id == T::OID)
            .map(|ext| T::from_der(ext.extn_value.as_bytes()))
            .transpose()
            .map_err(|e| Error::invalid(format!("Malformed extension {}: {e}", T::OID)))
    }

    /// IP addresses listed in the subject alternative name extension.
    pub fn ip_addresses(&self) -> Result<Vec<IpAddr>> {
        let Some(SubjectAltName(names)) = self.extension::<SubjectAltName>()? else {
            return Ok(Vec::new());
        };
        let ips = names
            .iter()
            .filter_map(|name| match name {
                GeneralName::IpAddress(octets) => match octets.as_bytes().len() {
                    4 => <[u8; 4]>::try_from(octets.as_bytes()).ok().map(IpAddr::from),
                    16 => <[u8; 16]>::try_from(octets.as_bytes()).ok().map(IpAddr::from),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        Ok(ips)
    }

    /// The public key embedded in the certificate.
    pub fn public_key(&self) -> Result<RsaPublicKey> {
        let spki = self
            .certificate
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(Error::signing)?;
        RsaPublicKey::from_public_key_der(&spki).map_err(Error::signing)
    }

    /// Checks the certificate signature against `key`.
    pub fn verify(&self, key: &RsaPublicKey) -> Result<()> {
        let tbs = self
            .certificate
            .tbs_certificate
            .to_der()
            .map_err(Error::signing)?;
        let signature =
            Signature::try_from(self.certificate.signature.raw_bytes()).map_err(Error::signing)?;
        VerifyingKey::<Sha256>::new(key.clone())
            .verify(&tbs, &signature)
            .map_err(Error::signing)
    }
}
