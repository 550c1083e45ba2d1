use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::RuleWithOperations;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::ObjectMeta;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Condition;

/// Label the admission server sets on every namespace
const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

/// Enforcement mode of a policy
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Rejections are enforced
    #[default]
    Protect,
    /// Rejections are only logged
    Monitor,
}

impl std::fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyMode::Protect => write!(f, "protect"),
            PolicyMode::Monitor => write!(f, "monitor"),
        }
    }
}

/// Lifecycle of a policy, derived from its server binding
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PolicyLifecycle {
    /// No policy server referenced
    #[default]
    Unscheduled,
    /// Bound to a server that is missing or not serving yet
    Scheduled,
    /// Server is serving and the webhook is registered
    Active,
}

impl std::fmt::Display for PolicyLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyLifecycle::Unscheduled => write!(f, "unscheduled"),
            PolicyLifecycle::Scheduled => write!(f, "scheduled"),
            PolicyLifecycle::Active => write!(f, "active"),
        }
    }
}

/// Fields shared by both policy kinds
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    /// Name of the PolicyServer evaluating this policy. Immutable once set.
    #[serde(default)]
    pub policy_server: String,

    /// Location of the policy module
    pub module: String,

    /// Policy settings, passed through to the runtime
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub settings: serde_json::Value,

    /// Admission rules routed to this policy
    #[serde(default)]
    pub rules: Vec<RuleWithOperations>,

    /// Whether the policy may mutate requests
    #[serde(default)]
    pub mutating: bool,

    #[serde(default)]
    pub mode: PolicyMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_selector: Option<LabelSelector>,

    /// Side effects class, `None` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effects: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,
}

/// Status shared by both policy kinds
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default)]
    pub policy_status: PolicyLifecycle,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// ClusterAdmissionPolicy applies to every namespace matched by its selector
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "policies.kubewarden.io",
    version = "v1",
    kind = "ClusterAdmissionPolicy",
    plural = "clusteradmissionpolicies",
    shortname = "cap",
    status = "PolicyStatus",
    printcolumn = r#"{"name":"Policy Server", "type":"string", "jsonPath":".spec.policyServer"}"#,
    printcolumn = r#"{"name":"Mutating", "type":"boolean", "jsonPath":".spec.mutating"}"#,
    printcolumn = r#"{"name":"Mode", "type":"string", "jsonPath":".spec.mode"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.policyStatus"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAdmissionPolicySpec {
    #[serde(flatten)]
    pub policy: PolicySpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

/// AdmissionPolicy applies only to requests in its own namespace
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "policies.kubewarden.io",
    version = "v1",
    kind = "AdmissionPolicy",
    plural = "admissionpolicies",
    shortname = "ap",
    namespaced,
    status = "PolicyStatus",
    printcolumn = r#"{"name":"Policy Server", "type":"string", "jsonPath":".spec.policyServer"}"#,
    printcolumn = r#"{"name":"Mutating", "type":"boolean", "jsonPath":".spec.mutating"}"#,
    printcolumn = r#"{"name":"Mode", "type":"string", "jsonPath":".spec.mode"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.policyStatus"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionPolicySpec {
    #[serde(flatten)]
    pub policy: PolicySpec,
}

/// Which of the two policy kinds a record is
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyKind {
    ClusterAdmissionPolicy,
    AdmissionPolicy,
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyKind::ClusterAdmissionPolicy => write!(f, "ClusterAdmissionPolicy"),
            PolicyKind::AdmissionPolicy => write!(f, "AdmissionPolicy"),
        }
    }
}

/// Identity of a policy record in the store
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyRef {
    pub kind: PolicyKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl std::fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Capabilities shared by both policy kinds
pub trait Policy {
    fn object_meta(&self) -> &ObjectMeta;
    fn policy_spec(&self) -> &PolicySpec;
    fn policy_status(&self) -> Option<&PolicyStatus>;
    fn kind(&self) -> PolicyKind;

    /// Selector restricting which namespaces the webhook sees
    fn namespace_selector(&self) -> Option<LabelSelector>;

    fn rules(&self) -> &[RuleWithOperations] {
        &self.policy_spec().rules
    }

    /// Name of the bound PolicyServer, `None` when unscheduled
    fn policy_server(&self) -> Option<&str> {
        let server = self.policy_spec().policy_server.as_str();
        (!server.is_empty()).then_some(server)
    }

    fn mode(&self) -> PolicyMode {
        self.policy_spec().mode
    }

    fn mutating(&self) -> bool {
        self.policy_spec().mutating
    }

    fn name(&self) -> String {
        self.object_meta().name.clone().unwrap_or_default()
    }

    fn is_deleting(&self) -> bool {
        self.object_meta().deletion_timestamp.is_some()
    }

    /// Name used for the webhook registration and the routing path.
    ///
    /// Cluster-wide policies keep their own name. Namespaced policies are
    /// prefixed so they cannot collide across namespaces.
    fn unique_name(&self) -> String {
        match (self.kind(), &self.object_meta().namespace) {
            (PolicyKind::AdmissionPolicy, Some(ns)) => {
                format!("namespaced-{}-{}", ns, self.name())
            }
            _ => self.name(),
        }
    }

    fn policy_ref(&self) -> PolicyRef {
        PolicyRef {
            kind: self.kind(),
            namespace: self.object_meta().namespace.clone(),
            name: self.name(),
        }
    }

    fn conditions(&self) -> Vec<Condition> {
        self.policy_status()
            .map(|s| s.conditions.clone())
            .unwrap_or_default()
    }

    fn lifecycle(&self) -> PolicyLifecycle {
        self.policy_status()
            .map(|s| s.policy_status)
            .unwrap_or_default()
    }
}

impl Policy for ClusterAdmissionPolicy {
    fn object_meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn policy_spec(&self) -> &PolicySpec {
        &self.spec.policy
    }

    fn policy_status(&self) -> Option<&PolicyStatus> {
        self.status.as_ref()
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::ClusterAdmissionPolicy
    }

    fn namespace_selector(&self) -> Option<LabelSelector> {
        self.spec.namespace_selector.clone()
    }
}

impl Policy for AdmissionPolicy {
    fn object_meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn policy_spec(&self) -> &PolicySpec {
        &self.spec.policy
    }

    fn policy_status(&self) -> Option<&PolicyStatus> {
        self.status.as_ref()
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::AdmissionPolicy
    }

    fn namespace_selector(&self) -> Option<LabelSelector> {
        let namespace = self.namespace().unwrap_or_default();
        Some(LabelSelector {
            match_labels: Some(BTreeMap::from([(
                NAMESPACE_NAME_LABEL.to_string(),
                namespace,
            )])),
            ..Default::default()
        })
    }
}

/// Either policy kind, for heterogeneous lists
#[derive(Clone, Debug)]
pub enum AnyPolicy {
    Cluster(ClusterAdmissionPolicy),
    Namespaced(AdmissionPolicy),
}

impl AnyPolicy {
    fn inner(&self) -> &dyn Policy {
        match self {
            AnyPolicy::Cluster(p) => p,
            AnyPolicy::Namespaced(p) => p,
        }
    }
}

impl Policy for AnyPolicy {
    fn object_meta(&self) -> &ObjectMeta {
        self.inner().object_meta()
    }

    fn policy_spec(&self) -> &PolicySpec {
        self.inner().policy_spec()
    }

    fn policy_status(&self) -> Option<&PolicyStatus> {
        self.inner().policy_status()
    }

    fn kind(&self) -> PolicyKind {
        self.inner().kind()
    }

    fn namespace_selector(&self) -> Option<LabelSelector> {
        self.inner().namespace_selector()
    }
}

impl From<ClusterAdmissionPolicy> for AnyPolicy {
    fn from(policy: ClusterAdmissionPolicy) -> Self {
        AnyPolicy::Cluster(policy)
    }
}

impl From<AdmissionPolicy> for AnyPolicy {
    fn from(policy: AdmissionPolicy) -> Self {
        AnyPolicy::Namespaced(policy)
    }
}
