//! Access to the cluster objects the controllers read and write
//!
//! The reconcilers only talk to the API server through [`ClusterStore`], so
//! the whole convergence logic can run against an in-memory store in tests.
//! Namespaced objects always live in the deployments namespace the store was
//! built for.

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::index::PolicyIndex;
use crate::crd::{
    AdmissionPolicy, AnyPolicy, ClusterAdmissionPolicy, Condition, PolicyKind, PolicyLifecycle,
    PolicyRef, PolicyServer, PolicyServerStatus,
};
use crate::resources::FIELD_MANAGER;

/// Object store used by the reconcilers
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<Option<Secret>, kube::Error>;

    /// Create a secret, failing with 409 when it already exists
    async fn create_secret(&self, secret: &Secret) -> Result<(), kube::Error>;

    async fn delete_secret(&self, name: &str) -> Result<(), kube::Error>;

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<(), kube::Error>;

    async fn delete_config_map(&self, name: &str) -> Result<(), kube::Error>;

    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>, kube::Error>;

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<(), kube::Error>;

    async fn delete_deployment(&self, name: &str) -> Result<(), kube::Error>;

    async fn apply_service(&self, service: &Service) -> Result<(), kube::Error>;

    async fn delete_service(&self, name: &str) -> Result<(), kube::Error>;

    async fn apply_pdb(&self, pdb: &PodDisruptionBudget) -> Result<(), kube::Error>;

    async fn delete_pdb(&self, name: &str) -> Result<(), kube::Error>;

    /// Create a validating registration, failing with 409 when it already exists
    async fn create_validating_webhook(
        &self,
        webhook: &ValidatingWebhookConfiguration,
    ) -> Result<(), kube::Error>;

    /// Create a mutating registration, failing with 409 when it already exists
    async fn create_mutating_webhook(
        &self,
        webhook: &MutatingWebhookConfiguration,
    ) -> Result<(), kube::Error>;

    async fn delete_validating_webhook(&self, name: &str) -> Result<(), kube::Error>;

    async fn delete_mutating_webhook(&self, name: &str) -> Result<(), kube::Error>;

    async fn get_policy_server(&self, name: &str) -> Result<Option<PolicyServer>, kube::Error>;

    async fn patch_policy_server_status(
        &self,
        name: &str,
        status: &PolicyServerStatus,
    ) -> Result<(), kube::Error>;

    /// Replace the finalizer list, guarded by `resource_version` when given
    async fn set_policy_server_finalizers(
        &self,
        name: &str,
        finalizers: &[String],
        resource_version: Option<&str>,
    ) -> Result<(), kube::Error>;

    /// Every policy of either kind whose `policyServer` is `server`
    async fn list_bound_policies(&self, server: &str) -> Result<Vec<AnyPolicy>, kube::Error>;

    async fn delete_policy(&self, policy: &PolicyRef) -> Result<(), kube::Error>;

    /// Replace the finalizer list, guarded by `resource_version` when given
    async fn set_policy_finalizers(
        &self,
        policy: &PolicyRef,
        finalizers: &[String],
        resource_version: Option<&str>,
    ) -> Result<(), kube::Error>;

    /// Write `status.conditions`, leaving `status.policyStatus` untouched
    async fn patch_policy_conditions(
        &self,
        policy: &PolicyRef,
        conditions: &[Condition],
    ) -> Result<(), kube::Error>;

    /// Write `status.policyStatus`, leaving `status.conditions` untouched
    async fn patch_policy_lifecycle(
        &self,
        policy: &PolicyRef,
        lifecycle: PolicyLifecycle,
    ) -> Result<(), kube::Error>;
}

/// [`ClusterStore`] backed by the Kubernetes API server
///
/// Bound policies are answered from the reflector caches in [`PolicyIndex`].
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    namespace: String,
    policies: PolicyIndex,
}

impl KubeStore {
    pub fn new(client: Client, namespace: impl Into<String>, policies: PolicyIndex) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            policies,
        }
    }

    fn namespaced<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn cluster<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::ClusterResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }

    fn admission_policies(&self, policy: &PolicyRef) -> Api<AdmissionPolicy> {
        Api::namespaced(self.client.clone(), policy.namespace.as_deref().unwrap_or_default())
    }
}

async fn apply<K>(api: &Api<K>, resource: &K) -> Result<(), kube::Error>
where
    K: Resource + Serialize + DeserializeOwned + Clone + std::fmt::Debug,
{
    let name = resource.name_any();
    let params = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(&name, &params, &Patch::Apply(resource)).await?;
    debug!("Applied {}", name);
    Ok(())
}

async fn create<K>(api: &Api<K>, resource: &K) -> Result<(), kube::Error>
where
    K: Resource + Serialize + DeserializeOwned + Clone + std::fmt::Debug,
{
    api.create(&PostParams::default(), resource).await?;
    debug!("Created {}", resource.name_any());
    Ok(())
}

async fn delete<K>(api: &Api<K>, name: &str) -> Result<(), kube::Error>
where
    K: Resource + DeserializeOwned + Clone + std::fmt::Debug,
{
    api.delete(name, &DeleteParams::default()).await?;
    debug!("Deleted {}", name);
    Ok(())
}

async fn merge<K>(api: &Api<K>, name: &str, patch: serde_json::Value) -> Result<(), kube::Error>
where
    K: Resource + DeserializeOwned + Clone + std::fmt::Debug,
{
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn merge_status<K>(
    api: &Api<K>,
    name: &str,
    patch: serde_json::Value,
) -> Result<(), kube::Error>
where
    K: Resource + DeserializeOwned + Clone + std::fmt::Debug,
{
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Merge patch replacing the finalizer list
pub fn finalizers_patch(
    finalizers: &[String],
    resource_version: Option<&str>,
) -> serde_json::Value {
    let mut metadata = serde_json::json!({ "finalizers": finalizers });
    if let Some(rv) = resource_version {
        metadata["resourceVersion"] = serde_json::Value::String(rv.to_string());
    }
    serde_json::json!({ "metadata": metadata })
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_secret(&self, name: &str) -> Result<Option<Secret>, kube::Error> {
        self.namespaced::<Secret>().get_opt(name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), kube::Error> {
        create(&self.namespaced(), secret).await
    }

    async fn delete_secret(&self, name: &str) -> Result<(), kube::Error> {
        delete(&self.namespaced::<Secret>(), name).await
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<(), kube::Error> {
        apply(&self.namespaced(), config_map).await
    }

    async fn delete_config_map(&self, name: &str) -> Result<(), kube::Error> {
        delete(&self.namespaced::<ConfigMap>(), name).await
    }

    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>, kube::Error> {
        self.namespaced::<Deployment>().get_opt(name).await
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<(), kube::Error> {
        apply(&self.namespaced(), deployment).await
    }

    async fn delete_deployment(&self, name: &str) -> Result<(), kube::Error> {
        delete(&self.namespaced::<Deployment>(), name).await
    }

    async fn apply_service(&self, service: &Service) -> Result<(), kube::Error> {
        apply(&self.namespaced(), service).await
    }

    async fn delete_service(&self, name: &str) -> Result<(), kube::Error> {
        delete(&self.namespaced::<Service>(), name).await
    }

    async fn apply_pdb(&self, pdb: &PodDisruptionBudget) -> Result<(), kube::Error> {
        apply(&self.namespaced(), pdb).await
    }

    async fn delete_pdb(&self, name: &str) -> Result<(), kube::Error> {
        delete(&self.namespaced::<PodDisruptionBudget>(), name).await
    }

    async fn create_validating_webhook(
        &self,
        webhook: &ValidatingWebhookConfiguration,
    ) -> Result<(), kube::Error> {
        create(&self.cluster(), webhook).await
    }

    async fn create_mutating_webhook(
        &self,
        webhook: &MutatingWebhookConfiguration,
    ) -> Result<(), kube::Error> {
        create(&self.cluster(), webhook).await
    }

    async fn delete_validating_webhook(&self, name: &str) -> Result<(), kube::Error> {
        delete(&self.cluster::<ValidatingWebhookConfiguration>(), name).await
    }

    async fn delete_mutating_webhook(&self, name: &str) -> Result<(), kube::Error> {
        delete(&self.cluster::<MutatingWebhookConfiguration>(), name).await
    }

    async fn get_policy_server(&self, name: &str) -> Result<Option<PolicyServer>, kube::Error> {
        self.cluster::<PolicyServer>().get_opt(name).await
    }

    async fn patch_policy_server_status(
        &self,
        name: &str,
        status: &PolicyServerStatus,
    ) -> Result<(), kube::Error> {
        merge_status(
            &self.cluster::<PolicyServer>(),
            name,
            serde_json::json!({ "status": status }),
        )
        .await
    }

    async fn set_policy_server_finalizers(
        &self,
        name: &str,
        finalizers: &[String],
        resource_version: Option<&str>,
    ) -> Result<(), kube::Error> {
        merge(
            &self.cluster::<PolicyServer>(),
            name,
            finalizers_patch(finalizers, resource_version),
        )
        .await
    }

    async fn list_bound_policies(&self, server: &str) -> Result<Vec<AnyPolicy>, kube::Error> {
        Ok(self.policies.bound_to(server))
    }

    async fn delete_policy(&self, policy: &PolicyRef) -> Result<(), kube::Error> {
        match policy.kind {
            PolicyKind::ClusterAdmissionPolicy => {
                delete(&self.cluster::<ClusterAdmissionPolicy>(), &policy.name).await
            }
            PolicyKind::AdmissionPolicy => {
                delete(&self.admission_policies(policy), &policy.name).await
            }
        }
    }

    async fn set_policy_finalizers(
        &self,
        policy: &PolicyRef,
        finalizers: &[String],
        resource_version: Option<&str>,
    ) -> Result<(), kube::Error> {
        let patch = finalizers_patch(finalizers, resource_version);
        match policy.kind {
            PolicyKind::ClusterAdmissionPolicy => {
                merge(&self.cluster::<ClusterAdmissionPolicy>(), &policy.name, patch).await
            }
            PolicyKind::AdmissionPolicy => {
                merge(&self.admission_policies(policy), &policy.name, patch).await
            }
        }
    }

    async fn patch_policy_conditions(
        &self,
        policy: &PolicyRef,
        conditions: &[Condition],
    ) -> Result<(), kube::Error> {
        let patch = serde_json::json!({ "status": { "conditions": conditions } });
        match policy.kind {
            PolicyKind::ClusterAdmissionPolicy => {
                merge_status(&self.cluster::<ClusterAdmissionPolicy>(), &policy.name, patch)
                    .await
            }
            PolicyKind::AdmissionPolicy => {
                merge_status(&self.admission_policies(policy), &policy.name, patch).await
            }
        }
    }

    async fn patch_policy_lifecycle(
        &self,
        policy: &PolicyRef,
        lifecycle: PolicyLifecycle,
    ) -> Result<(), kube::Error> {
        let patch = serde_json::json!({ "status": { "policyStatus": lifecycle } });
        match policy.kind {
            PolicyKind::ClusterAdmissionPolicy => {
                merge_status(&self.cluster::<ClusterAdmissionPolicy>(), &policy.name, patch)
                    .await
            }
            PolicyKind::AdmissionPolicy => {
                merge_status(&self.admission_policies(policy), &policy.name, patch).await
            }
        }
    }
}
