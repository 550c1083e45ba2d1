//! Finalizer-gated deletion of PolicyServers and policies
//!
//! A server is torn down in two phases. While policies are still bound to
//! it, their deletion is requested and the ones already terminating are
//! swept (webhook first, then finalizer). Only when none remain are the
//! owned objects deleted and the server's own finalizer released.

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, info, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result, ignore_not_found};
use crate::controller::finalizer::{has_finalizer, without_finalizer};
use crate::controller::reconciler::NOT_READY_REQUEUE;
use crate::controller::store::ClusterStore;
use crate::crd::{AnyPolicy, Policy, PolicyServer};
use crate::resources::common::name_with_prefix;

/// Handle deletion of a PolicyServer
pub async fn handle_server_deletion(server: &PolicyServer, ctx: &Context) -> Result<Action> {
    let name = server.name_any();
    let store = ctx.store.as_ref();

    let policies = store.list_bound_policies(&name).await?;
    if !policies.is_empty() {
        info!(
            "Waiting for {} bound policies to be deleted before removing {}",
            policies.len(),
            name
        );
        for policy in &policies {
            if policy.is_deleting() {
                sweep_policy(store, policy).await?;
            } else {
                ignore_not_found(store.delete_policy(&policy.policy_ref()).await)?;
                debug!("Requested deletion of {}", policy.policy_ref());
            }
        }
        return Ok(Action::requeue(NOT_READY_REQUEUE));
    }

    delete_owned_objects(store, &name).await?;

    if has_finalizer(&server.metadata) {
        ignore_not_found(
            store
                .set_policy_server_finalizers(
                    &name,
                    &without_finalizer(&server.metadata),
                    server.metadata.resource_version.as_deref(),
                )
                .await,
        )?;
        info!("Removed finalizer from {}", name);
    }

    if let Some(health) = &ctx.health_state {
        health.metrics.remove_policy_server(&name);
    }

    Ok(Action::await_change())
}

/// Handle deletion of a policy: webhook registration first, then finalizer
pub async fn handle_policy_deletion(policy: &AnyPolicy, ctx: &Context) -> Result<Action> {
    info!("Handling deletion of {}", policy.policy_ref());
    sweep_policy(ctx.store.as_ref(), policy).await?;
    Ok(Action::await_change())
}

/// Remove the webhook registration of a terminating policy, then release it
async fn sweep_policy(store: &dyn ClusterStore, policy: &AnyPolicy) -> Result<()> {
    let registration = policy.unique_name();

    // Either kind may exist if `mutating` was flipped after registration
    ignore_not_found(store.delete_validating_webhook(&registration).await)?;
    ignore_not_found(store.delete_mutating_webhook(&registration).await)?;

    if has_finalizer(policy.object_meta()) {
        ignore_not_found(
            store
                .set_policy_finalizers(
                    &policy.policy_ref(),
                    &without_finalizer(policy.object_meta()),
                    policy.object_meta().resource_version.as_deref(),
                )
                .await,
        )?;
        info!("Removed finalizer from {}", policy.policy_ref());
    }
    Ok(())
}

/// Delete everything a server owns, attempting every object before failing
async fn delete_owned_objects(store: &dyn ClusterStore, server_name: &str) -> Result<()> {
    let name = name_with_prefix(server_name);

    let outcomes = [
        ("deployment", ignore_not_found(store.delete_deployment(&name).await)),
        ("secret", ignore_not_found(store.delete_secret(&name).await)),
        ("service", ignore_not_found(store.delete_service(&name).await)),
        ("configmap", ignore_not_found(store.delete_config_map(&name).await)),
        ("poddisruptionbudget", ignore_not_found(store.delete_pdb(&name).await)),
    ];

    let errors: Vec<String> = outcomes
        .into_iter()
        .filter_map(|(kind, outcome)| outcome.err().map(|e| format!("{} {}: {}", kind, name, e)))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        warn!("Failed to delete objects of {}: {:?}", server_name, errors);
        Err(Error::DeletionFailed(errors))
    }
}
