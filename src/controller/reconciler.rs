//! Reconciliation logic for PolicyServer resources
//!
//! Stages run in a fixed order and every stage records a condition:
//! root CA, serving certificate, configuration bundle, Deployment,
//! disruption budget, Service. Webhooks for the bound policies are only
//! registered once the workload passes its readiness gate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::certificates::{fetch_or_create_root_ca, fetch_or_create_serving_cert};
use crate::controller::context::Context;
use crate::controller::deletion::handle_server_deletion;
use crate::controller::error::{Error, Result, ignore_already_exists, ignore_not_found};
use crate::controller::finalizer::{has_finalizer, with_finalizer};
use crate::controller::status::{
    ConditionBuilder, condition_types, server_status, server_status_changed,
};
use crate::crd::{AnyPolicy, Policy, PolicyServer};
use crate::resources::certificate::CertificateAuthority;
use crate::resources::common::{KIND, name_with_prefix};
use crate::resources::config_bundle::{ConfigBundle, generate_config_map, render_config_bundle};
use crate::resources::deployment::{generate_deployment, is_workload_ready};
use crate::resources::pdb::generate_pdb;
use crate::resources::service::generate_service;
use crate::resources::webhook::{generate_mutating_webhook, generate_validating_webhook};

/// Delay before re-checking a dependency that is not ready yet
pub const NOT_READY_REQUEUE: Duration = Duration::from_secs(5);

/// Delay after adding a finalizer
pub const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Main reconciliation function
#[instrument(skip(server, ctx), fields(name = %server.name_any()))]
pub async fn reconcile(server: Arc<PolicyServer>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let name = server.name_any();

    info!("Reconciling PolicyServer");

    let result = if server.metadata.deletion_timestamp.is_some() {
        handle_server_deletion(&server, &ctx).await
    } else if !has_finalizer(&server.metadata) {
        add_finalizer(&server, &ctx).await
    } else {
        reconcile_server(&server, &ctx).await
    };

    if let Some(health) = &ctx.health_state {
        health
            .metrics
            .record_reconcile(KIND, &name, start.elapsed().as_secs_f64());
    }

    match &result {
        Ok(action) => {
            ctx.retries.reset(&retry_key(&name));
            debug!("Reconciliation completed: {:?}", action);
        }
        Err(e) => error!("Reconciliation failed: {}", e),
    }
    result
}

fn retry_key(name: &str) -> String {
    format!("{}/{}", KIND, name)
}

/// Error policy for the controller with exponential backoff
pub fn error_policy(server: Arc<PolicyServer>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = server.name_any();
    if let Some(health) = &ctx.health_state {
        health.metrics.record_error(KIND, &name);
    }
    requeue_after_error(&ctx, &retry_key(&name), error)
}

/// Requeue delay for a failed reconcile, shared by every controller.
///
/// Retryable errors back off exponentially with the consecutive failures of
/// `name`, which a successful reconcile clears.
pub fn requeue_after_error(ctx: &Context, name: &str, error: &Error) -> Action {
    let attempt = ctx.retries.record_failure(name);
    let delay = ctx.backoff.delay_for_error(error, attempt);

    if error.is_retryable() {
        warn!(
            "Retryable error for {}: {}, requeuing in {:?}",
            name, error, delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {}, requeuing in {:?} for manual intervention",
            name, error, delay
        );
    }

    Action::requeue(delay)
}

async fn add_finalizer(server: &PolicyServer, ctx: &Context) -> Result<Action> {
    let name = server.name_any();
    ctx.store
        .set_policy_server_finalizers(
            &name,
            &with_finalizer(&server.metadata),
            server.metadata.resource_version.as_deref(),
        )
        .await?;

    info!("Added finalizer to {}", name);
    Ok(Action::requeue(FINALIZER_REQUEUE))
}

/// Run every stage, then persist the conditions they recorded
async fn reconcile_server(server: &PolicyServer, ctx: &Context) -> Result<Action> {
    let mut conditions =
        ConditionBuilder::from_existing(server.conditions(), server.metadata.generation);

    let outcome = run_stages(server, ctx, &mut conditions).await;

    let status = server_status(server, conditions.build());
    if server_status_changed(server, &status) {
        let patched = ctx
            .store
            .patch_policy_server_status(&server.name_any(), &status)
            .await;
        match (&outcome, patched) {
            (_, Ok(())) => debug!("Updated PolicyServer status"),
            // The stage error is more useful than the status write failure
            (Err(_), Err(e)) => warn!("Failed to record failed conditions: {}", e),
            (Ok(_), Err(e)) => return Err(e.into()),
        }
    }

    outcome
}

async fn run_stages(
    server: &PolicyServer,
    ctx: &Context,
    conditions: &mut ConditionBuilder,
) -> Result<Action> {
    let store = ctx.store.as_ref();
    let generator = ctx.certificates.as_ref();
    let ns = ctx.namespace();
    let name = server.name_any();

    let ca = conditions.record(
        condition_types::CA_ROOT_SECRET_RECONCILED,
        fetch_or_create_root_ca(store, generator, ns).await,
    )?;

    conditions.record(
        condition_types::SECRET_RECONCILED,
        fetch_or_create_serving_cert(store, generator, server, ns, &ca).await,
    )?;

    let (bundle, policies) = conditions.record(
        condition_types::CONFIG_MAP_RECONCILED,
        reconcile_config_map(server, ctx).await,
    )?;

    let deployment =
        generate_deployment(server, ns, &bundle.version(), ctx.config.metrics_enabled);
    conditions.record(
        condition_types::DEPLOYMENT_RECONCILED,
        store.apply_deployment(&deployment).await.map_err(Error::from),
    )?;

    conditions.record(
        condition_types::POD_DISRUPTION_BUDGET_RECONCILED,
        reconcile_pdb(server, ctx).await,
    )?;

    let service = generate_service(server, ns, ctx.config.metrics_enabled);
    conditions.record(
        condition_types::SERVICE_RECONCILED,
        store.apply_service(&service).await.map_err(Error::from),
    )?;

    let ready = workload_ready(server, ctx).await?;
    let live: Vec<&AnyPolicy> = policies.iter().filter(|p| !p.is_deleting()).collect();

    if !ready {
        info!("Workload of {} not ready, deferring webhook registration", name);
        for policy in live {
            write_policy_conditions(ctx, policy, |conditions| {
                conditions.webhook_configured(false)
            })
            .await?;
        }
        return Ok(Action::requeue(NOT_READY_REQUEUE));
    }

    for policy in live {
        let registered = register_webhook(ctx, policy, &ca).await;
        let recorded = write_policy_conditions(ctx, policy, |conditions| {
            conditions.reconciled(condition_types::WEBHOOK_CONFIGURATION_RECONCILED, &registered)
        })
        .await;
        registered?;
        recorded?;
    }

    Ok(Action::await_change())
}

/// Render and apply the bundle, returning it with the policies it was built from
async fn reconcile_config_map(
    server: &PolicyServer,
    ctx: &Context,
) -> Result<(ConfigBundle, Vec<AnyPolicy>)> {
    let policies = ctx.store.list_bound_policies(&server.name_any()).await?;
    let bundle = render_config_bundle(server, &policies)?;
    debug!("Rendered configuration bundle version {}", bundle.version());

    ctx.store
        .apply_config_map(&generate_config_map(server, ctx.namespace(), &bundle))
        .await?;
    Ok((bundle, policies))
}

async fn reconcile_pdb(server: &PolicyServer, ctx: &Context) -> Result<()> {
    match generate_pdb(server, ctx.namespace()) {
        Some(pdb) => ctx.store.apply_pdb(&pdb).await?,
        None => {
            ignore_not_found(ctx.store.delete_pdb(&name_with_prefix(&server.name_any())).await)?
        }
    }
    Ok(())
}

/// Readiness gate in front of webhook registration
async fn workload_ready(server: &PolicyServer, ctx: &Context) -> Result<bool> {
    let name = server.name_any();
    let deployment = ctx.store.get_deployment(&name_with_prefix(&name)).await?;
    let desired = server.spec.replicas;

    if let Some(health) = &ctx.health_state {
        let ready_replicas = deployment
            .as_ref()
            .and_then(|d| d.status.as_ref())
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        health
            .metrics
            .set_policy_server_replicas(&name, desired.into(), ready_replicas.into());
    }

    Ok(deployment.is_some_and(|d| is_workload_ready(&d, desired)))
}

async fn register_webhook(
    ctx: &Context,
    policy: &AnyPolicy,
    ca: &CertificateAuthority,
) -> Result<()> {
    let ns = ctx.namespace();
    let created = if policy.mutating() {
        ctx.store
            .create_mutating_webhook(&generate_mutating_webhook(policy, ns, &ca.cert_pem))
            .await
    } else {
        ctx.store
            .create_validating_webhook(&generate_validating_webhook(policy, ns, &ca.cert_pem))
            .await
    };
    ignore_already_exists(created)?;
    Ok(())
}

/// Update the conditions of a policy, writing only on change
async fn write_policy_conditions<F>(ctx: &Context, policy: &AnyPolicy, update: F) -> Result<()>
where
    F: FnOnce(ConditionBuilder) -> ConditionBuilder,
{
    let current = policy.conditions();
    let desired = update(ConditionBuilder::from_existing(
        current.clone(),
        policy.object_meta().generation,
    ))
    .build();

    if desired != current {
        ignore_not_found(
            ctx.store
                .patch_policy_conditions(&policy.policy_ref(), &desired)
                .await,
        )?;
        debug!("Updated conditions of {}", policy.policy_ref());
    }
    Ok(())
}
