//! Names, labels and constants shared by the resource generators
//!
//! Every object owned by a PolicyServer derives its name from the server
//! name, so the reconciler and the deletion path always agree on what to
//! touch.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::PolicyServer;

/// API version of the policy CRDs
pub const API_VERSION: &str = "policies.kubewarden.io/v1";

/// Kind of the PolicyServer CRD
pub const KIND: &str = "PolicyServer";

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "policy-operator";

/// Finalizer placed on PolicyServers and policies
pub const FINALIZER: &str = "kubewarden";

/// Prefix of every object derived from a PolicyServer
pub const NAME_PREFIX: &str = "policy-server-";

/// Port the policy server listens on for admission reviews
pub const POLICY_SERVER_PORT: i32 = 8443;

/// Port the policy server exposes metrics on
pub const POLICY_SERVER_METRICS_PORT: i32 = 8080;

/// Readiness endpoint of the policy server
pub const READINESS_PROBE_PATH: &str = "/readiness";

/// Pod template annotation holding the configuration bundle version
pub const CONFIG_VERSION_ANNOTATION: &str = "config/version";

/// Label key selecting the pods of one policy server
pub const APP_LABEL_KEY: &str = "app";

/// Label key naming the owning policy server
pub const POLICY_SERVER_LABEL_KEY: &str = "kubewarden/policy-server";

/// Name shared by the Deployment, Service, ConfigMap, PDB and serving Secret
pub fn name_with_prefix(server_name: &str) -> String {
    format!("{}{}", NAME_PREFIX, server_name)
}

/// DNS name the serving certificate is issued for
pub fn service_dns_name(server_name: &str, namespace: &str) -> String {
    format!("{}.{}.svc", name_with_prefix(server_name), namespace)
}

/// Generate an owner reference for a PolicyServer
///
/// PolicyServers are cluster-scoped, so namespaced children may point at
/// them and are garbage collected with them.
pub fn owner_reference(server: &PolicyServer) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: server.name_any(),
        uid: server.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Labels selecting the pods of a policy server
pub fn selector_labels(server_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(
        APP_LABEL_KEY.to_string(),
        format!("kubewarden-{}", name_with_prefix(server_name)),
    )])
}

/// Generate standard labels for all resources belonging to a PolicyServer
pub fn standard_labels(server_name: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(server_name);
    labels.insert(
        POLICY_SERVER_LABEL_KEY.to_string(),
        server_name.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        FIELD_MANAGER.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        "policy-server".to_string(),
    );
    labels
}
