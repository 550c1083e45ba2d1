use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Condition;

/// PolicyServer describes a runtime that evaluates the policies bound to it
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "policies.kubewarden.io",
    version = "v1",
    kind = "PolicyServer",
    plural = "policyservers",
    shortname = "ps",
    status = "PolicyServerStatus",
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyServerSpec {
    /// Container image of the policy server runtime
    pub image: String,

    /// Number of policy server replicas
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Minimum number of available pods kept during voluntary disruptions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<IntOrString>,

    /// Maximum number of unavailable pods tolerated during voluntary disruptions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,

    /// Extra environment variables passed to the runtime
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Annotations added to the pod template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Service account used by the policy server pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Resource limits of the policy server container
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, Quantity>,

    /// Resource requests of the policy server container.
    /// Defaults to `limits` when only limits are given.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, Quantity>,

    /// Registries that may be reached over plain HTTP or with untrusted TLS
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insecure_sources: Vec<String>,

    /// Extra PEM certificate authorities, keyed by registry host
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_authorities: BTreeMap<String, Vec<String>>,
}

fn default_replicas() -> i32 {
    1
}

/// Status of a PolicyServer
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyServerStatus {
    /// One condition per reconciled aspect
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation observed by the last reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl PolicyServer {
    /// Conditions currently recorded on the server
    pub fn conditions(&self) -> Vec<Condition> {
        self.status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default()
    }
}
