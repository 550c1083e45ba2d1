//! Fetch-or-create of the certificate material backing policy servers
//!
//! Secrets are only ever created, never overwritten. Losing a create race to
//! another writer is fine: the stored secret is read back and used, so every
//! serving certificate chains to the CA that actually got persisted.

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::error::{Error, Result, is_already_exists};
use crate::controller::store::ClusterStore;
use crate::crd::PolicyServer;
use crate::resources::certificate::{CertificateAuthority, CertificateGenerator, ServingCertificate};
use crate::resources::common::{name_with_prefix, service_dns_name};
use crate::resources::secret::{
    CA_SECRET_NAME, generate_ca_secret, generate_serving_secret, parse_ca_secret,
    parse_serving_secret,
};

/// Create `secret` unless it exists, returning whatever ends up stored
async fn create_or_read_back(store: &dyn ClusterStore, secret: &Secret) -> Result<Option<Secret>> {
    let name = secret.name_any();
    match store.create_secret(secret).await {
        Ok(()) => {
            info!("Created secret {}", name);
            Ok(None)
        }
        Err(e) if is_already_exists(&e) => {
            debug!("Secret {} created concurrently, reading it back", name);
            // A secret deleted right after the conflict surfaces the conflict
            store
                .get_secret(&name)
                .await?
                .map(Some)
                .ok_or(Error::KubeError(e))
        }
        Err(e) => Err(e.into()),
    }
}

/// Load the cluster-wide root CA, generating and storing it on first use.
///
/// The CA key is never regenerated while its secret exists.
pub async fn fetch_or_create_root_ca(
    store: &dyn ClusterStore,
    generator: &dyn CertificateGenerator,
    namespace: &str,
) -> Result<CertificateAuthority> {
    if let Some(secret) = store.get_secret(CA_SECRET_NAME).await? {
        return Ok(parse_ca_secret(&secret)?);
    }

    let ca = generator.generate_ca()?;
    match create_or_read_back(store, &generate_ca_secret(&ca, namespace)).await? {
        Some(stored) => Ok(parse_ca_secret(&stored)?),
        None => Ok(ca),
    }
}

/// Load the serving certificate of `server`, signing a new one with `ca` if
/// the secret does not exist yet.
pub async fn fetch_or_create_serving_cert(
    store: &dyn ClusterStore,
    generator: &dyn CertificateGenerator,
    server: &PolicyServer,
    namespace: &str,
    ca: &CertificateAuthority,
) -> Result<ServingCertificate> {
    let server_name = server.name_any();
    if let Some(secret) = store.get_secret(&name_with_prefix(&server_name)).await? {
        return Ok(parse_serving_secret(&secret)?);
    }

    let dns_name = service_dns_name(&server_name, namespace);
    let cert = generator.generate_serving_cert(ca, &dns_name, std::slice::from_ref(&dns_name))?;
    match create_or_read_back(store, &generate_serving_secret(server, namespace, &cert)).await? {
        Some(stored) => Ok(parse_serving_secret(&stored)?),
        None => Ok(cert),
    }
}
