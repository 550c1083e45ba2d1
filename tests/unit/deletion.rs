//! Unit tests for finalizer-gated deletion

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;

use policy_operator::controller::{Context, reconcile, reconcile_policy};
use policy_operator::crd::Policy;
use policy_operator::resources::name_with_prefix;
use policy_operator::resources::secret::CA_SECRET_NAME;

use crate::common::*;

async fn reconcile_server(store: &FakeStore, ctx: &Context) -> Action {
    let server = store.server("default").expect("server exists");
    reconcile(Arc::new(server), Arc::new(ctx.clone()))
        .await
        .unwrap()
}

/// Server with one registered cluster policy and a ready workload
async fn converged(store: &Arc<FakeStore>, ctx: &Context, mutating: bool) {
    store.insert_server(create_test_server("default", 1));
    let builder = PolicyBuilder::new("privileged", "default");
    let builder = if mutating { builder.mutating() } else { builder };
    store.insert_policy(builder.cluster());

    reconcile_server(store, ctx).await;
    store.mark_deployment_ready(&name_with_prefix("default"));
    reconcile_server(store, ctx).await;
}

#[tokio::test]
async fn test_policy_deletion_removes_webhook_then_finalizer() {
    let store = Arc::new(FakeStore::new());
    let ctx = test_context(store.clone());
    converged(&store, &ctx, false).await;
    let reference = PolicyBuilder::new("privileged", "default").cluster().policy_ref();
    assert!(store.validating_webhook("privileged").is_some());

    store.request_policy_deletion(&reference);
    let policy = store.policy(&reference).unwrap();
    assert!(policy.is_deleting());

    let action = reconcile_policy(&policy, &ctx).await.unwrap();

    assert_eq!(action, Action::await_change());
    assert!(store.validating_webhook("privileged").is_none());
    assert!(store.policy(&reference).is_none());
}

#[tokio::test]
async fn test_policy_deletion_removes_both_registration_kinds() {
    let store = Arc::new(FakeStore::new());
    let ctx = test_context(store.clone());
    converged(&store, &ctx, true).await;
    let reference = PolicyBuilder::new("privileged", "default").cluster().policy_ref();
    assert!(store.mutating_webhook("privileged").is_some());

    store.request_policy_deletion(&reference);
    let policy = store.policy(&reference).unwrap();
    reconcile_policy(&policy, &ctx).await.unwrap();

    assert!(store.mutating_webhook("privileged").is_none());
    assert!(store.validating_webhook("privileged").is_none());
}

#[tokio::test]
async fn test_policy_deletion_without_registration() {
    let store = Arc::new(FakeStore::new());
    let ctx = test_context(store.clone());
    let policy = PolicyBuilder::new("privileged", "").namespaced("team-a");
    let reference = policy.policy_ref();
    store.insert_policy(policy);

    store.request_policy_deletion(&reference);
    let policy = store.policy(&reference).unwrap();
    reconcile_policy(&policy, &ctx).await.unwrap();

    assert!(store.policy(&reference).is_none());
}

#[tokio::test]
async fn test_server_deletion_drains_policies_first() {
    let store = Arc::new(FakeStore::new());
    let ctx = test_context(store.clone());
    converged(&store, &ctx, false).await;
    let reference = PolicyBuilder::new("privileged", "default").cluster().policy_ref();
    let name = name_with_prefix("default");

    store.request_server_deletion("default");

    // First pass requests deletion of the bound policy
    let action = reconcile_server(&store, &ctx).await;
    assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    assert!(store.policy(&reference).unwrap().is_deleting());
    assert!(store.deployment(&name).is_some());

    // Second pass sweeps the terminating policy
    let action = reconcile_server(&store, &ctx).await;
    assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    assert!(store.policy(&reference).is_none());
    assert!(store.validating_webhook("privileged").is_none());

    // Third pass tears down owned objects and releases the server
    let action = reconcile_server(&store, &ctx).await;
    assert_eq!(action, Action::await_change());
    assert!(store.server("default").is_none());
    assert!(store.deployment(&name).is_none());
    assert!(store.service(&name).is_none());
    assert!(store.config_map(&name).is_none());
    assert!(store.secret(&name).is_none());
    // The root CA is shared and outlives any one server
    assert!(store.secret(CA_SECRET_NAME).is_some());
}

#[tokio::test]
async fn test_server_deletion_tolerates_missing_objects() {
    let store = Arc::new(FakeStore::new());
    let ctx = test_context(store.clone());
    store.insert_server(create_test_server("default", 1));

    // Nothing was ever created for this server
    store.request_server_deletion("default");
    let action = reconcile_server(&store, &ctx).await;

    assert_eq!(action, Action::await_change());
    assert!(store.server("default").is_none());
}

#[tokio::test]
async fn test_server_deletion_attempts_every_object() {
    let store = Arc::new(FakeStore::new());
    let ctx = test_context(store.clone());
    converged(&store, &ctx, false).await;
    let reference = PolicyBuilder::new("privileged", "default").cluster().policy_ref();
    let name = name_with_prefix("default");

    store.request_policy_deletion(&reference);
    let policy = store.policy(&reference).unwrap();
    reconcile_policy(&policy, &ctx).await.unwrap();

    store.fail("delete_deployment");
    store.request_server_deletion("default");
    let server = store.server("default").unwrap();
    let err = reconcile(Arc::new(server), Arc::new(ctx.clone()))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(err.to_string().contains("deployment"));
    // The other objects were still removed and the finalizer kept
    assert!(store.service(&name).is_none());
    assert!(store.config_map(&name).is_none());
    assert!(store.server("default").is_some());

    store.recover("delete_deployment");
    reconcile_server(&store, &ctx).await;
    assert!(store.server("default").is_none());
}
