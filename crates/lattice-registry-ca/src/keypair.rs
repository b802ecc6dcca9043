//! Key pair and certificate generation
//!
//! Every certificate minted by the registry CA goes through [`generate`]:
//! a fresh 2048-bit RSA key, a random 128-bit serial, and a validity window
//! backdated by [`CLOCK_SKEW_ALLOWANCE`] so that nodes with slightly slow
//! clocks accept it immediately.
//!
//! Issuing material is loaded with [`SigningAuthority::from_pem`], which
//! accepts PKCS#8 (`PRIVATE KEY`) and PKCS#1 (`RSA PRIVATE KEY`) keys.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use rand::RngCore;
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, PublicKeyData, RsaKeySize,
    SanType, SerialNumber, PKCS_RSA_SHA256,
};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use time::OffsetDateTime;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};
use x509_parser::public_key::PublicKey;

use crate::error::{RegistryCaError, Result};

/// How far NotBefore is pushed into the past
pub const CLOCK_SKEW_ALLOWANCE: Duration = Duration::from_secs(5 * 60);

const PEM_CERTIFICATE: &str = "CERTIFICATE";
const PEM_PKCS8_KEY: &str = "PRIVATE KEY";
const PEM_PKCS1_KEY: &str = "RSA PRIVATE KEY";

/// Inputs for one certificate
#[derive(Clone, Copy)]
pub struct KeyPairSpec<'a> {
    /// Subject common name
    pub common_name: &'a str,
    /// DNS subject alternative names
    pub dns_names: &'a [String],
    /// IP subject alternative names
    pub ip_addresses: &'a [IpAddr],
    /// Lifetime from now
    pub validity: Duration,
    /// Mint a CA certificate instead of a TLS server certificate
    pub is_ca: bool,
    /// Signer; `None` produces a self-signed certificate
    pub issuer: Option<&'a SigningAuthority>,
}

/// A freshly generated certificate and its private key, both PEM
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedKeyPair {
    /// PEM `CERTIFICATE`
    pub certificate_pem: String,
    /// PEM `PRIVATE KEY` (PKCS#8)
    pub private_key_pem: String,
}

impl fmt::Debug for GeneratedKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKeyPair")
            .field("certificate_pem", &self.certificate_pem)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// A CA certificate and key loaded for signing
pub struct SigningAuthority {
    certificate_pem: String,
    issuer: Issuer<'static, KeyPair>,
}

impl fmt::Debug for SigningAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningAuthority")
            .field("certificate_pem", &self.certificate_pem)
            .finish_non_exhaustive()
    }
}

impl SigningAuthority {
    /// Load a CA from PEM certificate and key
    ///
    /// The certificate must be a single `CERTIFICATE` block. The key may be
    /// PKCS#8 or PKCS#1; any other PEM label is rejected with
    /// [`RegistryCaError::UnsupportedKeyEncoding`]. The key must match the
    /// certificate's public key.
    pub fn from_pem(certificate_pem: &str, private_key_pem: &str) -> Result<Self> {
        let cert_der = decode_pem(certificate_pem, PEM_CERTIFICATE, "CA certificate")?;
        let (_, cert) = X509Certificate::from_der(&cert_der)
            .map_err(|e| RegistryCaError::parse("CA certificate", e))?;

        let key = load_private_key(private_key_pem, "CA private key")?;
        if key.subject_public_key_info() != cert.public_key().raw {
            return Err(RegistryCaError::parse(
                "CA private key",
                "key does not match the CA certificate",
            ));
        }

        let issuer = Issuer::from_ca_cert_pem(certificate_pem, key)
            .map_err(|e| RegistryCaError::parse("CA certificate", e))?;

        Ok(Self {
            certificate_pem: certificate_pem.to_string(),
            issuer,
        })
    }

    /// PEM of the CA certificate
    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }
}

/// Generate a key pair and a certificate for it
pub fn generate(spec: KeyPairSpec<'_>) -> Result<GeneratedKeyPair> {
    let what = if spec.is_ca {
        "CA certificate"
    } else {
        "server certificate"
    };

    let key = KeyPair::generate_rsa_for(&PKCS_RSA_SHA256, RsaKeySize::_2048)
        .map_err(|e| RegistryCaError::signing(format!("{what} key"), e))?;

    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(spec.common_name.to_string()),
    );
    params.distinguished_name = dn;
    params.serial_number = Some(random_serial());

    let (not_before, not_after) = compute_validity(spec.validity)
        .ok_or_else(|| RegistryCaError::signing(what, "validity period out of range"))?;
    params.not_before = not_before;
    params.not_after = not_after;

    if spec.is_ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::KeyCertSign,
        ];
    } else {
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    }

    let mut sans = Vec::with_capacity(spec.dns_names.len() + spec.ip_addresses.len());
    for name in spec.dns_names {
        let dns = Ia5String::try_from(name.clone()).map_err(|e| {
            RegistryCaError::signing(what, format!("invalid DNS name '{}': {}", name, e))
        })?;
        sans.push(SanType::DnsName(dns));
    }
    sans.extend(spec.ip_addresses.iter().copied().map(SanType::IpAddress));
    params.subject_alt_names = sans;

    let cert = match spec.issuer {
        Some(authority) => params.signed_by(&key, &authority.issuer),
        None => params.self_signed(&key),
    }
    .map_err(|e| RegistryCaError::signing(what, e))?;

    Ok(GeneratedKeyPair {
        certificate_pem: cert.pem(),
        private_key_pem: key.serialize_pem(),
    })
}

/// Compute (not_before, not_after) for a certificate valid from now
fn compute_validity(validity: Duration) -> Option<(OffsetDateTime, OffsetDateTime)> {
    let now = OffsetDateTime::now_utc();
    let skew = time::Duration::try_from(CLOCK_SKEW_ALLOWANCE).ok()?;
    let validity = time::Duration::try_from(validity).ok()?;
    Some((now.checked_sub(skew)?, now.checked_add(validity)?))
}

/// Random positive 128-bit serial number
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    // Clear the sign bit so the DER INTEGER stays positive
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

/// Decode a single PEM block and check its label
fn decode_pem(data: &str, expected: &str, context: &str) -> Result<Vec<u8>> {
    let block = pem::parse(data).map_err(|e| RegistryCaError::decode(context, e))?;
    if block.tag() != expected {
        return Err(RegistryCaError::decode(
            context,
            format!("expected PEM label {:?}, found {:?}", expected, block.tag()),
        ));
    }
    Ok(block.into_contents())
}

/// Load a PKCS#8 or PKCS#1 private key
fn load_private_key(data: &str, context: &str) -> Result<KeyPair> {
    let block = pem::parse(data).map_err(|e| RegistryCaError::decode(context, e))?;
    match block.tag() {
        PEM_PKCS8_KEY => KeyPair::from_pem(data).map_err(|e| RegistryCaError::parse(context, e)),
        PEM_PKCS1_KEY => {
            let rsa_key = RsaPrivateKey::from_pkcs1_der(block.contents())
                .map_err(|e| RegistryCaError::parse(context, e))?;
            let pkcs8 = rsa_key
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| RegistryCaError::parse(context, e))?;
            KeyPair::from_pem(&pkcs8).map_err(|e| RegistryCaError::parse(context, e))
        }
        other => Err(RegistryCaError::UnsupportedKeyEncoding {
            context: context.to_string(),
            label: other.to_string(),
        }),
    }
}

/// Parsed view of a certificate for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Subject common name
    pub common_name: String,
    /// DNS subject alternative names
    pub dns_names: Vec<String>,
    /// IP subject alternative names
    pub ip_addresses: Vec<IpAddr>,
    /// Serial number as colon-separated hex
    pub serial: String,
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
    /// RSA modulus size in bits, if the key is RSA
    pub key_bits: Option<usize>,
    /// Basic constraints CA flag
    pub is_ca: bool,
    /// KeyUsage includes keyCertSign
    pub key_cert_sign: bool,
    /// ExtendedKeyUsage includes serverAuth
    pub server_auth: bool,
}

impl CertificateInfo {
    /// Parse certificate info from a PEM-encoded certificate
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let der = decode_pem(pem_data, PEM_CERTIFICATE, "certificate")?;
        Self::from_der(&der)
    }

    /// Parse certificate info from a DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) =
            X509Certificate::from_der(der).map_err(|e| RegistryCaError::parse("certificate", e))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                    GeneralName::IPAddress(raw) => {
                        if let Some(ip) = ip_from_bytes(raw) {
                            ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }

        let key_bits = match cert.public_key().parsed() {
            Ok(PublicKey::RSA(rsa)) => Some(rsa.key_size()),
            _ => None,
        };

        let key_cert_sign = matches!(cert.key_usage(), Ok(Some(ku)) if ku.value.key_cert_sign());
        let server_auth =
            matches!(cert.extended_key_usage(), Ok(Some(eku)) if eku.value.server_auth);

        Ok(Self {
            common_name,
            dns_names,
            ip_addresses,
            serial: cert.raw_serial_as_string(),
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            key_bits,
            is_ca: cert.is_ca(),
            key_cert_sign,
            server_auth,
        })
    }

    /// Total lifetime of the certificate in seconds
    pub fn lifetime_secs(&self) -> i64 {
        self.not_after - self.not_before
    }
}

fn ip_from_bytes(raw: &[u8]) -> Option<IpAddr> {
    match raw.len() {
        4 => <[u8; 4]>::try_from(raw).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(raw).ok().map(IpAddr::from),
        _ => None,
    }
}

/// Check that `certificate_pem` was signed by `ca_certificate_pem`
///
/// Returns `Ok(false)` when both parse but the issuer name or signature does
/// not match.
pub fn verify_issued_by(certificate_pem: &str, ca_certificate_pem: &str) -> Result<bool> {
    let cert_der = decode_pem(certificate_pem, PEM_CERTIFICATE, "certificate")?;
    let ca_der = decode_pem(ca_certificate_pem, PEM_CERTIFICATE, "CA certificate")?;

    let (_, cert) =
        X509Certificate::from_der(&cert_der).map_err(|e| RegistryCaError::parse("certificate", e))?;
    let (_, ca) =
        X509Certificate::from_der(&ca_der).map_err(|e| RegistryCaError::parse("CA certificate", e))?;

    if cert.issuer().as_raw() != ca.subject().as_raw() {
        return Ok(false);
    }
    Ok(cert.verify_signature(Some(ca.public_key())).is_ok())
}
