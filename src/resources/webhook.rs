//! Dynamic admission webhook registrations for policies
//!
//! Each policy gets its own registration routed to `/validate/<name>` on the
//! service of the policy server it is bound to.

use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, ServiceReference, ValidatingWebhook,
    ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::ByteString;
use kube::core::ObjectMeta;

use crate::crd::Policy;
use crate::resources::common::{name_with_prefix, POLICY_SERVER_LABEL_KEY, POLICY_SERVER_PORT};

/// Provenance label set on every registration
pub const PROVENANCE_LABEL_KEY: &str = "kubewarden";

/// Side effects class used when the policy leaves it unset
pub const DEFAULT_SIDE_EFFECTS: &str = "None";

/// Admission review versions the policy server understands
pub const ADMISSION_REVIEW_VERSIONS: &[&str] = &["v1"];

/// Request path of a policy on its policy server
pub fn admission_path<P: Policy + ?Sized>(policy: &P) -> String {
    format!("/validate/{}", policy.unique_name())
}

/// Name of the single webhook inside a registration
pub fn webhook_name<P: Policy + ?Sized>(policy: &P) -> String {
    format!("{}.kubewarden.admission", policy.unique_name())
}

fn metadata<P: Policy + ?Sized>(policy: &P) -> ObjectMeta {
    let mut labels = BTreeMap::from([(PROVENANCE_LABEL_KEY.to_string(), "true".to_string())]);
    if let Some(server) = policy.policy_server() {
        labels.insert(POLICY_SERVER_LABEL_KEY.to_string(), server.to_string());
    }

    ObjectMeta {
        name: Some(policy.unique_name()),
        labels: Some(labels),
        ..Default::default()
    }
}

fn client_config<P: Policy + ?Sized>(
    policy: &P,
    namespace: &str,
    ca_pem: &str,
) -> WebhookClientConfig {
    let server = policy.policy_server().unwrap_or_default();
    WebhookClientConfig {
        service: Some(ServiceReference {
            namespace: namespace.to_string(),
            name: name_with_prefix(server),
            path: Some(admission_path(policy)),
            port: Some(POLICY_SERVER_PORT),
        }),
        ca_bundle: Some(ByteString(ca_pem.as_bytes().to_vec())),
        ..Default::default()
    }
}

fn side_effects<P: Policy + ?Sized>(policy: &P) -> String {
    policy
        .policy_spec()
        .side_effects
        .clone()
        .unwrap_or_else(|| DEFAULT_SIDE_EFFECTS.to_string())
}

fn review_versions() -> Vec<String> {
    ADMISSION_REVIEW_VERSIONS
        .iter()
        .map(|v| v.to_string())
        .collect()
}

/// Generate the validating registration of a non-mutating policy
pub fn generate_validating_webhook<P: Policy + ?Sized>(
    policy: &P,
    namespace: &str,
    ca_pem: &str,
) -> ValidatingWebhookConfiguration {
    let spec = policy.policy_spec();
    ValidatingWebhookConfiguration {
        metadata: metadata(policy),
        webhooks: Some(vec![ValidatingWebhook {
            name: webhook_name(policy),
            client_config: client_config(policy, namespace, ca_pem),
            rules: Some(policy.rules().to_vec()),
            failure_policy: spec.failure_policy.clone(),
            match_policy: spec.match_policy.clone(),
            namespace_selector: policy.namespace_selector(),
            object_selector: spec.object_selector.clone(),
            side_effects: side_effects(policy),
            timeout_seconds: spec.timeout_seconds,
            admission_review_versions: review_versions(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Generate the mutating registration of a mutating policy
pub fn generate_mutating_webhook<P: Policy + ?Sized>(
    policy: &P,
    namespace: &str,
    ca_pem: &str,
) -> MutatingWebhookConfiguration {
    let spec = policy.policy_spec();
    MutatingWebhookConfiguration {
        metadata: metadata(policy),
        webhooks: Some(vec![MutatingWebhook {
            name: webhook_name(policy),
            client_config: client_config(policy, namespace, ca_pem),
            rules: Some(policy.rules().to_vec()),
            failure_policy: spec.failure_policy.clone(),
            match_policy: spec.match_policy.clone(),
            namespace_selector: policy.namespace_selector(),
            object_selector: spec.object_selector.clone(),
            side_effects: side_effects(policy),
            timeout_seconds: spec.timeout_seconds,
            admission_review_versions: review_versions(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}
