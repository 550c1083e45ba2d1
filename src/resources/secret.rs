//! Secrets holding the root CA and the per-server serving certificates

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::core::ObjectMeta;

use crate::crd::PolicyServer;
use crate::resources::certificate::{CertificateAuthority, ServingCertificate};
use crate::resources::common::{name_with_prefix, owner_reference, standard_labels, FIELD_MANAGER};

/// Name of the cluster-wide root CA secret
pub const CA_SECRET_NAME: &str = "policy-server-root-ca";
/// CA secret key holding the DER certificate
pub const CA_CERT_KEY: &str = "policy-server-root-ca-cert";
/// CA secret key holding the PEM certificate
pub const CA_PEM_KEY: &str = "policy-server-root-ca-pem";
/// CA secret key holding the private key
pub const CA_PRIVATE_KEY_KEY: &str = "policy-server-root-ca-privatekey-cert";

/// Serving secret key holding the certificate
pub const SERVING_CERT_KEY: &str = "policy-server-cert";
/// Serving secret key holding the private key
pub const SERVING_KEY_KEY: &str = "policy-server-key";

/// Errors reading certificate material back out of a secret
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
    #[error("secret {secret} is missing key {key}")]
    MissingKey { secret: String, key: &'static str },

    #[error("secret {secret} key {key} is not valid UTF-8")]
    InvalidUtf8 { secret: String, key: &'static str },
}

fn opaque_secret(metadata: ObjectMeta, data: BTreeMap<String, ByteString>) -> Secret {
    Secret {
        metadata,
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// Generate the root CA secret
pub fn generate_ca_secret(ca: &CertificateAuthority, namespace: &str) -> Secret {
    let data = BTreeMap::from([
        (CA_CERT_KEY.to_string(), ByteString(ca.cert_der.clone())),
        (
            CA_PEM_KEY.to_string(),
            ByteString(ca.cert_pem.clone().into_bytes()),
        ),
        (
            CA_PRIVATE_KEY_KEY.to_string(),
            ByteString(ca.key_pem.clone().into_bytes()),
        ),
    ]);

    opaque_secret(
        ObjectMeta {
            name: Some(CA_SECRET_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                FIELD_MANAGER.to_string(),
            )])),
            ..Default::default()
        },
        data,
    )
}

/// Generate the serving secret of a policy server
pub fn generate_serving_secret(
    server: &PolicyServer,
    namespace: &str,
    cert: &ServingCertificate,
) -> Secret {
    let server_name = server.metadata.name.clone().unwrap_or_default();
    let data = BTreeMap::from([
        (
            SERVING_CERT_KEY.to_string(),
            ByteString(cert.cert_pem.clone().into_bytes()),
        ),
        (
            SERVING_KEY_KEY.to_string(),
            ByteString(cert.key_pem.clone().into_bytes()),
        ),
    ]);

    opaque_secret(
        ObjectMeta {
            name: Some(name_with_prefix(&server_name)),
            namespace: Some(namespace.to_string()),
            labels: Some(standard_labels(&server_name)),
            owner_references: Some(vec![owner_reference(server)]),
            ..Default::default()
        },
        data,
    )
}

fn secret_bytes<'a>(secret: &'a Secret, key: &'static str) -> Result<&'a [u8], SecretError> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|b| b.0.as_slice())
        .ok_or_else(|| SecretError::MissingKey {
            secret: secret.metadata.name.clone().unwrap_or_default(),
            key,
        })
}

fn secret_string(secret: &Secret, key: &'static str) -> Result<String, SecretError> {
    let bytes = secret_bytes(secret, key)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| SecretError::InvalidUtf8 {
        secret: secret.metadata.name.clone().unwrap_or_default(),
        key,
    })
}

/// Read the root CA back out of its secret
pub fn parse_ca_secret(secret: &Secret) -> Result<CertificateAuthority, SecretError> {
    Ok(CertificateAuthority {
        cert_der: secret_bytes(secret, CA_CERT_KEY)?.to_vec(),
        cert_pem: secret_string(secret, CA_PEM_KEY)?,
        key_pem: secret_string(secret, CA_PRIVATE_KEY_KEY)?,
    })
}

/// Read a serving certificate back out of its secret
pub fn parse_serving_secret(secret: &Secret) -> Result<ServingCertificate, SecretError> {
    Ok(ServingCertificate {
        cert_pem: secret_string(secret, SERVING_CERT_KEY)?,
        key_pem: secret_string(secret, SERVING_KEY_KEY)?,
    })
}
