//! Reconciliation of ClusterAdmissionPolicy and AdmissionPolicy resources
//!
//! The policy loop owns the policy finalizer and `status.policyStatus`.
//! Webhook registration is driven from the PolicyServer loop, which records
//! its outcome in the policy conditions this loop reads back.

use std::sync::Arc;
use std::time::Instant;

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, info, instrument};

use crate::controller::context::Context;
use crate::controller::deletion::handle_policy_deletion;
use crate::controller::error::{Error, Result, ignore_not_found};
use crate::controller::finalizer::{has_finalizer, with_finalizer};
use crate::controller::reconciler::{FINALIZER_REQUEUE, NOT_READY_REQUEUE, requeue_after_error};
use crate::controller::status::derive_lifecycle;
use crate::crd::{AdmissionPolicy, AnyPolicy, ClusterAdmissionPolicy, Policy, PolicyLifecycle};
use crate::resources::common::name_with_prefix;
use crate::resources::deployment::is_workload_ready;

#[instrument(skip(policy, ctx), fields(name = %policy.name_any()))]
pub async fn reconcile_cluster_admission_policy(
    policy: Arc<ClusterAdmissionPolicy>,
    ctx: Arc<Context>,
) -> Result<Action> {
    reconcile_policy(&AnyPolicy::from(policy.as_ref().clone()), &ctx).await
}

#[instrument(
    skip(policy, ctx),
    fields(name = %policy.name_any(), namespace = policy.namespace().unwrap_or_default())
)]
pub async fn reconcile_admission_policy(
    policy: Arc<AdmissionPolicy>,
    ctx: Arc<Context>,
) -> Result<Action> {
    reconcile_policy(&AnyPolicy::from(policy.as_ref().clone()), &ctx).await
}

pub fn cluster_admission_policy_error_policy(
    policy: Arc<ClusterAdmissionPolicy>,
    error: &Error,
    ctx: Arc<Context>,
) -> Action {
    policy_error_policy(&AnyPolicy::from(policy.as_ref().clone()), error, &ctx)
}

pub fn admission_policy_error_policy(
    policy: Arc<AdmissionPolicy>,
    error: &Error,
    ctx: Arc<Context>,
) -> Action {
    policy_error_policy(&AnyPolicy::from(policy.as_ref().clone()), error, &ctx)
}

fn policy_error_policy(policy: &AnyPolicy, error: &Error, ctx: &Context) -> Action {
    let reference = policy.policy_ref();
    if let Some(health) = &ctx.health_state {
        health
            .metrics
            .record_error(&reference.kind.to_string(), &policy.unique_name());
    }
    requeue_after_error(ctx, &reference.to_string(), error)
}

/// Reconcile either kind of policy
pub async fn reconcile_policy(policy: &AnyPolicy, ctx: &Context) -> Result<Action> {
    let start = Instant::now();
    info!("Reconciling {}", policy.policy_ref());

    let result = if policy.is_deleting() {
        handle_policy_deletion(policy, ctx).await
    } else if !has_finalizer(policy.object_meta()) {
        add_finalizer(policy, ctx).await
    } else {
        update_lifecycle(policy, ctx).await
    };

    if let Some(health) = &ctx.health_state {
        health.metrics.record_reconcile(
            &policy.kind().to_string(),
            &policy.unique_name(),
            start.elapsed().as_secs_f64(),
        );
    }
    if result.is_ok() {
        ctx.retries.reset(&policy.policy_ref().to_string());
    }
    result
}

async fn add_finalizer(policy: &AnyPolicy, ctx: &Context) -> Result<Action> {
    let meta = policy.object_meta();
    ctx.store
        .set_policy_finalizers(
            &policy.policy_ref(),
            &with_finalizer(meta),
            meta.resource_version.as_deref(),
        )
        .await?;

    info!("Added finalizer to {}", policy.policy_ref());
    Ok(Action::requeue(FINALIZER_REQUEUE))
}

async fn update_lifecycle(policy: &AnyPolicy, ctx: &Context) -> Result<Action> {
    let server = match policy.policy_server() {
        Some(name) => ctx.store.get_policy_server(name).await?,
        None => None,
    };

    let workload_ready = match &server {
        Some(server) => ctx
            .store
            .get_deployment(&name_with_prefix(&server.name_any()))
            .await?
            .is_some_and(|d| is_workload_ready(&d, server.spec.replicas)),
        None => false,
    };

    let lifecycle = derive_lifecycle(policy, server.as_ref(), workload_ready);
    if policy.policy_status().map(|s| s.policy_status) != Some(lifecycle) {
        ignore_not_found(
            ctx.store
                .patch_policy_lifecycle(&policy.policy_ref(), lifecycle)
                .await,
        )?;
        info!("{} is now {}", policy.policy_ref(), lifecycle);
    } else {
        debug!("{} remains {}", policy.policy_ref(), lifecycle);
    }

    match lifecycle {
        PolicyLifecycle::Scheduled => Ok(Action::requeue(NOT_READY_REQUEUE)),
        PolicyLifecycle::Unscheduled | PolicyLifecycle::Active => Ok(Action::await_change()),
    }
}
