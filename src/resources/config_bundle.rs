//! Configuration bundle distributed to a policy server
//!
//! The bundle is a ConfigMap with two entries: the policies the server must
//! load and the trust configuration of the registries it pulls them from.
//! Rendering is deterministic, so the digest only changes when the content
//! does and unrelated reconciles never roll the workload.

use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::RuleWithOperations;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::crd::{Policy, PolicyMode, PolicyServer};
use crate::resources::common::{name_with_prefix, owner_reference, standard_labels};

/// ConfigMap entry holding the policy definitions
pub const POLICIES_ENTRY: &str = "policies.yml";

/// ConfigMap entry holding the source trust configuration
pub const SOURCES_ENTRY: &str = "sources.yml";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyEntry<'a> {
    namespaced_name: String,
    module: &'a str,
    policy_mode: PolicyMode,
    allowed_to_mutate: bool,
    rules: &'a [RuleWithOperations],
    settings: serde_json::Value,
}

#[derive(Serialize)]
struct Sources {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    insecure_sources: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    source_authorities: BTreeMap<String, Vec<String>>,
}

/// Rendered configuration of one policy server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigBundle {
    pub policies: String,
    pub sources: String,
}

impl ConfigBundle {
    /// Digest of the bundle content, used to roll the workload on change
    pub fn version(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(POLICIES_ENTRY.as_bytes());
        hasher.update([0]);
        hasher.update(self.policies.as_bytes());
        hasher.update([0]);
        hasher.update(SOURCES_ENTRY.as_bytes());
        hasher.update([0]);
        hasher.update(self.sources.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Entries as stored in the ConfigMap
    pub fn data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (POLICIES_ENTRY.to_string(), self.policies.clone()),
            (SOURCES_ENTRY.to_string(), self.sources.clone()),
        ])
    }
}

fn namespaced_name<P: Policy>(policy: &P) -> String {
    match &policy.object_meta().namespace {
        Some(ns) => format!("{}/{}", ns, policy.name()),
        None => policy.name(),
    }
}

/// Render the bundle for `server` from the policies bound to it.
///
/// Policies already marked for deletion are left out. Both entries render
/// as `{}` when empty.
pub fn render_config_bundle<P: Policy>(
    server: &PolicyServer,
    policies: &[P],
) -> Result<ConfigBundle, serde_json::Error> {
    let entries: BTreeMap<String, PolicyEntry<'_>> = policies
        .iter()
        .filter(|p| !p.is_deleting())
        .map(|p| {
            let spec = p.policy_spec();
            let settings = if spec.settings.is_null() {
                serde_json::Value::Object(Default::default())
            } else {
                spec.settings.clone()
            };
            (
                p.unique_name(),
                PolicyEntry {
                    namespaced_name: namespaced_name(p),
                    module: &spec.module,
                    policy_mode: spec.mode,
                    allowed_to_mutate: spec.mutating,
                    rules: &spec.rules,
                    settings,
                },
            )
        })
        .collect();

    let sources = Sources {
        insecure_sources: server.spec.insecure_sources.clone(),
        source_authorities: server.spec.source_authorities.clone(),
    };

    Ok(ConfigBundle {
        policies: serde_json::to_string(&entries)?,
        sources: serde_json::to_string(&sources)?,
    })
}

/// Generate the ConfigMap carrying the bundle
pub fn generate_config_map(
    server: &PolicyServer,
    namespace: &str,
    bundle: &ConfigBundle,
) -> ConfigMap {
    let server_name = server.name_any();

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name_with_prefix(&server_name)),
            namespace: Some(namespace.to_string()),
            labels: Some(standard_labels(&server_name)),
            owner_references: Some(vec![owner_reference(server)]),
            ..Default::default()
        },
        data: Some(bundle.data()),
        ..Default::default()
    }
}
