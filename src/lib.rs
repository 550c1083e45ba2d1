pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;
pub mod webhooks;

pub use config::OperatorConfig;
pub use controller::{
    BackoffConfig, ClusterStore, Context, Error, KubeStore, PolicyIndex, Result,
    admission_policy_error_policy, cluster_admission_policy_error_policy, error_policy,
    policy_reflector, reconcile, reconcile_admission_policy, reconcile_cluster_admission_policy,
};
pub use crd::{AdmissionPolicy, ClusterAdmissionPolicy, PolicyServer};
pub use health::{HealthState, Metrics};
pub use resources::FINALIZER;
pub use webhooks::{WEBHOOK_PORT, WebhookError, run_webhook_server};

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::controller::Action;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;

use crd::{Policy, PolicyKind, PolicyLifecycle};
use resources::POLICY_SERVER_LABEL_KEY;

/// Log the outcome of one reconcile, demoting not-found errors to debug.
///
/// Watch events for owned objects can arrive after their parent is gone.
fn log_result<K: Resource>(
    result: std::result::Result<
        (ObjectRef<K>, Action),
        kube::runtime::controller::Error<Error, kube::runtime::watcher::Error>,
    >,
) {
    match result {
        Ok((obj, _action)) => {
            tracing::debug!("Reconciled: {}", obj.name);
        }
        Err(e) => {
            let is_not_found = matches!(
                &e,
                kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
            );
            if is_not_found {
                tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
            } else {
                tracing::error!("Reconciliation error: {:?}", e);
            }
        }
    }
}

/// Run the PolicyServer controller.
///
/// Reconciles every PolicyServer, and is woken by changes to the objects it
/// owns and to the policies bound to it.
pub async fn run_policy_server_controller(client: Client, ctx: Arc<Context>) {
    let namespace = ctx.namespace().to_string();
    tracing::info!(
        "Starting controller for PolicyServer resources (workloads in: {})",
        namespace
    );

    let servers: Api<PolicyServer> = Api::all(client.clone());
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), &namespace);
    let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let pdbs: Api<PodDisruptionBudget> = Api::namespaced(client.clone(), &namespace);
    let cluster_policies: Api<ClusterAdmissionPolicy> = Api::all(client.clone());
    let policies: Api<AdmissionPolicy> = Api::all(client);

    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(servers, watcher_config.clone())
        .owns(deployments, watcher_config.clone())
        .owns(services, watcher_config.clone())
        .owns(configmaps, watcher_config.clone())
        .owns(secrets, watcher_config.clone())
        .owns(pdbs, watcher_config.clone())
        .watches(cluster_policies, watcher_config.clone(), |policy| {
            policy.policy_server().map(ObjectRef::<PolicyServer>::new)
        })
        .watches(policies, watcher_config, |policy| {
            policy.policy_server().map(ObjectRef::<PolicyServer>::new)
        })
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move { log_result(result) })
        .await;

    tracing::error!("PolicyServer controller stream ended unexpectedly");
}

/// Refs of the cached policies bound to `server`
fn bound_to<K>(store: &Store<K>, server: &str) -> Vec<ObjectRef<K>>
where
    K: Resource<DynamicType = ()> + Policy + Clone + 'static,
{
    store
        .state()
        .iter()
        .filter(|policy| policy.policy_server() == Some(server))
        .map(|policy| ObjectRef::from_obj(policy.as_ref()))
        .collect()
}

/// Publish how many cached policies of `kind` sit in each lifecycle
fn record_lifecycles<K>(health: &HealthState, kind: PolicyKind, store: &Store<K>)
where
    K: Resource<DynamicType = ()> + Policy + Clone + 'static,
{
    let policies = store.state();
    for lifecycle in [
        PolicyLifecycle::Unscheduled,
        PolicyLifecycle::Scheduled,
        PolicyLifecycle::Active,
    ] {
        let count = policies.iter().filter(|p| p.lifecycle() == lifecycle).count();
        health
            .metrics
            .set_policies(&kind.to_string(), &lifecycle.to_string(), count as i64);
    }
}

/// Run a controller for one policy kind.
///
/// Policies are requeued when their PolicyServer or its Deployment changes,
/// so their lifecycle follows the server's readiness.
async fn run_policy_controller<K, ReconcilerFut>(
    client: Client,
    ctx: Arc<Context>,
    kind: PolicyKind,
    reconciler: impl FnMut(Arc<K>, Arc<Context>) -> ReconcilerFut,
    error_policy: impl Fn(Arc<K>, &Error, Arc<Context>) -> Action,
) where
    K: Resource<DynamicType = ()>
        + Policy
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
    ReconcilerFut: Future<Output = Result<Action>> + Send + 'static,
{
    tracing::info!("Starting controller for {} resources", kind);

    let policies: Api<K> = Api::all(client.clone());
    let servers: Api<PolicyServer> = Api::all(client.clone());
    let deployments: Api<Deployment> = Api::namespaced(client, ctx.namespace());

    let watcher_config = WatcherConfig::default().any_semantic();

    let controller = Controller::new(policies, watcher_config.clone());
    let store = controller.store();
    let server_store = store.clone();
    let deployment_store = store.clone();
    let health = ctx.health_state.clone();

    controller
        .watches(servers, watcher_config.clone(), move |server| {
            bound_to(&server_store, &server.name_any())
        })
        .watches(deployments, watcher_config, move |deployment| {
            deployment
                .labels()
                .get(POLICY_SERVER_LABEL_KEY)
                .map(|server| bound_to(&deployment_store, server))
                .unwrap_or_default()
        })
        .run(reconciler, error_policy, ctx)
        .for_each(|result| {
            if let Some(health) = &health {
                record_lifecycles(health, kind, &store);
            }
            async move { log_result(result) }
        })
        .await;

    tracing::error!("{} controller stream ended unexpectedly", kind);
}

/// Run the ClusterAdmissionPolicy controller
pub async fn run_cluster_admission_policy_controller(client: Client, ctx: Arc<Context>) {
    run_policy_controller::<ClusterAdmissionPolicy, _>(
        client,
        ctx,
        PolicyKind::ClusterAdmissionPolicy,
        reconcile_cluster_admission_policy,
        cluster_admission_policy_error_policy,
    )
    .await
}

/// Run the AdmissionPolicy controller
pub async fn run_admission_policy_controller(client: Client, ctx: Arc<Context>) {
    run_policy_controller::<AdmissionPolicy, _>(
        client,
        ctx,
        PolicyKind::AdmissionPolicy,
        reconcile_admission_policy,
        admission_policy_error_policy,
    )
    .await
}
