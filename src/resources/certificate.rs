//! Certificate generation for policy servers
//!
//! A single root CA is shared by every policy server. Each server gets a
//! leaf certificate for its service DNS name, signed by that CA. Generation
//! goes through the [`CertificateGenerator`] strategy so callers can swap
//! in a deterministic implementation.

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use thiserror::Error;

/// Validity period of the root CA (10 years)
pub const CA_VALIDITY_YEARS: i64 = 10;

/// Validity period of serving certificates (1 year)
pub const CERT_VALIDITY_YEARS: i64 = 1;

/// Common name of the root CA
pub const CA_COMMON_NAME: &str = "kubewarden-policy-server-root-ca";

const ORGANIZATION: &str = "Kubewarden";

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

pub type Result<T> = std::result::Result<T, PkiError>;

/// Root certificate authority material
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateAuthority {
    /// DER-encoded certificate
    pub cert_der: Vec<u8>,
    /// PEM-encoded certificate, used as the webhook trust bundle
    pub cert_pem: String,
    /// PEM-encoded PKCS#8 private key
    pub key_pem: String,
}

/// Leaf certificate for one policy server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServingCertificate {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Strategy used to synthesize certificate material
pub trait CertificateGenerator: Send + Sync {
    /// Create a new self-signed root CA
    fn generate_ca(&self) -> Result<CertificateAuthority>;

    /// Create a serving certificate signed by `ca`
    fn generate_serving_cert(
        &self,
        ca: &CertificateAuthority,
        common_name: &str,
        sans: &[String],
    ) -> Result<ServingCertificate>;
}

/// Generator backed by rcgen, using ECDSA P-256 keys
#[derive(Clone, Copy, Debug, Default)]
pub struct RcgenGenerator;

fn compute_validity(years: i64) -> (time::OffsetDateTime, time::OffsetDateTime) {
    let now = time::OffsetDateTime::now_utc();
    (now, now + time::Duration::days(years * 365))
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn
}

impl CertificateGenerator for RcgenGenerator {
    fn generate_ca(&self) -> Result<CertificateAuthority> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(CA_COMMON_NAME);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let (not_before, not_after) = compute_validity(CA_VALIDITY_YEARS);
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate CA key: {}", e))
        })?;

        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to create CA cert: {}", e))
        })?;

        Ok(CertificateAuthority {
            cert_der: cert.der().to_vec(),
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    fn generate_serving_cert(
        &self,
        ca: &CertificateAuthority,
        common_name: &str,
        sans: &[String],
    ) -> Result<ServingCertificate> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(common_name);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let (not_before, not_after) = compute_validity(CERT_VALIDITY_YEARS);
        params.not_before = not_before;
        params.not_after = not_after;

        params.subject_alt_names = sans
            .iter()
            .map(|san| {
                Ia5String::try_from(san.clone())
                    .map(SanType::DnsName)
                    .map_err(|e| {
                        PkiError::CertificateGenerationFailed(format!(
                            "invalid DNS name '{}': {}",
                            san, e
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let server_key = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate server key: {}", e))
        })?;

        let ca_key = KeyPair::from_pem(&ca.key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to load CA key: {}", e)))?;
        let issuer = Issuer::from_ca_cert_pem(&ca.cert_pem, &ca_key)
            .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {}", e)))?;

        let cert = params.signed_by(&server_key, &issuer).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to sign server cert: {}", e))
        })?;

        Ok(ServingCertificate {
            cert_pem: cert.pem(),
            key_pem: server_key.serialize_pem(),
        })
    }
}
