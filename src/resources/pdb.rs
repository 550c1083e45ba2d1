//! PodDisruptionBudget resource generation for policy servers
//!
//! A budget exists only when the PolicyServer declares a disruption bound.

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::ObjectMeta;
use kube::ResourceExt;

use crate::crd::PolicyServer;
use crate::resources::common::{name_with_prefix, owner_reference, selector_labels, standard_labels};

/// Generate the PodDisruptionBudget of a policy server.
///
/// Returns `None` when neither `minAvailable` nor `maxUnavailable` is set.
/// When both are set `minAvailable` wins; admission rejects that case anyway.
pub fn generate_pdb(server: &PolicyServer, namespace: &str) -> Option<PodDisruptionBudget> {
    let (min_available, max_unavailable) =
        match (&server.spec.min_available, &server.spec.max_unavailable) {
            (Some(min), _) => (Some(min.clone()), None),
            (None, Some(max)) => (None, Some(max.clone())),
            (None, None) => return None,
        };

    let server_name = server.name_any();

    Some(PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(name_with_prefix(&server_name)),
            namespace: Some(namespace.to_string()),
            labels: Some(standard_labels(&server_name)),
            owner_references: Some(vec![owner_reference(server)]),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            min_available,
            max_unavailable,
            selector: Some(LabelSelector {
                match_labels: Some(selector_labels(&server_name)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}
