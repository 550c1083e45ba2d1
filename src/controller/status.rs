//! Status and conditions management for PolicyServers and policies
//!
//! Each reconcile stage records one condition. Conditions keep their
//! `lastTransitionTime` until their status flips, so re-running a converged
//! reconcile produces an identical status and no write.

use chrono::Utc;

use crate::crd::{Condition, Policy, PolicyLifecycle, PolicyServer, PolicyServerStatus};

/// Condition types, one per reconciled aspect
pub mod condition_types {
    pub const CA_ROOT_SECRET_RECONCILED: &str = "PolicyServerCARootSecretReconciled";
    pub const SECRET_RECONCILED: &str = "PolicyServerSecretReconciled";
    pub const CONFIG_MAP_RECONCILED: &str = "PolicyServerConfigMapReconciled";
    pub const DEPLOYMENT_RECONCILED: &str = "PolicyServerDeploymentReconciled";
    pub const POD_DISRUPTION_BUDGET_RECONCILED: &str = "PolicyServerPodDisruptionBudgetReconciled";
    pub const SERVICE_RECONCILED: &str = "PolicyServerServiceReconciled";
    /// Recorded on policies, by the policy server loop
    pub const WEBHOOK_CONFIGURATION_RECONCILED: &str = "PolicyServerWebhookConfigurationReconciled";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
}

/// Condition reasons
pub mod condition_reasons {
    pub const RECONCILIATION_SUCCEEDED: &str = "ReconciliationSucceeded";
    pub const RECONCILIATION_FAILED: &str = "ReconciliationFailed";
    pub const POLICY_SERVER_NOT_READY: &str = "PolicyServerNotReady";
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = Utc::now().to_rfc3339();
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: Utc::now().to_rfc3339(),
                observed_generation: self.generation,
            });
        }
        self
    }

    /// Record the outcome of a reconcile stage
    pub fn reconciled<T, E: std::fmt::Display>(
        self,
        type_: &str,
        result: &std::result::Result<T, E>,
    ) -> Self {
        match result {
            Ok(_) => self.set_condition(
                type_,
                condition_status::TRUE,
                condition_reasons::RECONCILIATION_SUCCEEDED,
                "",
            ),
            Err(e) => self.set_condition(
                type_,
                condition_status::FALSE,
                condition_reasons::RECONCILIATION_FAILED,
                &e.to_string(),
            ),
        }
    }

    /// Record a stage outcome in place and hand the result back
    pub fn record<T, E: std::fmt::Display>(
        &mut self,
        type_: &str,
        result: std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        let builder = std::mem::replace(self, ConditionBuilder::new(self.generation));
        *self = builder.reconciled(type_, &result);
        result
    }

    /// Record whether the webhook of a policy is registered
    pub fn webhook_configured(self, configured: bool) -> Self {
        if configured {
            self.set_condition(
                condition_types::WEBHOOK_CONFIGURATION_RECONCILED,
                condition_status::TRUE,
                condition_reasons::RECONCILIATION_SUCCEEDED,
                "",
            )
        } else {
            self.set_condition(
                condition_types::WEBHOOK_CONFIGURATION_RECONCILED,
                condition_status::FALSE,
                condition_reasons::POLICY_SERVER_NOT_READY,
                "policy server is not ready",
            )
        }
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Whether `conditions` holds `type_` with status True
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.type_ == type_ && c.status == condition_status::TRUE)
}

/// Status the server should carry after a reconcile that produced `conditions`
pub fn server_status(server: &PolicyServer, conditions: Vec<Condition>) -> PolicyServerStatus {
    PolicyServerStatus {
        conditions,
        observed_generation: server.metadata.generation,
    }
}

/// Whether writing `desired` would change the stored status
pub fn server_status_changed(server: &PolicyServer, desired: &PolicyServerStatus) -> bool {
    server.status.as_ref() != Some(desired)
}

/// Derive the lifecycle of a policy.
///
/// `server` is the bound server if it exists; `workload_ready` reports
/// whether its workload passes the readiness gate.
pub fn derive_lifecycle<P: Policy + ?Sized>(
    policy: &P,
    server: Option<&PolicyServer>,
    workload_ready: bool,
) -> PolicyLifecycle {
    if policy.policy_server().is_none() {
        return PolicyLifecycle::Unscheduled;
    }
    if server.is_none() || !workload_ready {
        return PolicyLifecycle::Scheduled;
    }
    if is_condition_true(
        &policy.conditions(),
        condition_types::WEBHOOK_CONFIGURATION_RECONCILED,
    ) {
        PolicyLifecycle::Active
    } else {
        PolicyLifecycle::Scheduled
    }
}
