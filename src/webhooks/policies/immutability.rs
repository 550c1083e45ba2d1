//! Immutability policy
//!
//! The policy server a policy is bound to cannot change after creation.

use super::{ValidationContext, ValidationResult};
use crate::crd::Policy;

pub fn validate_immutability(ctx: &ValidationContext) -> ValidationResult {
    // Only apply immutability checks on UPDATE, not CREATE
    let old_policy = match ctx.old_policy {
        Some(p) => p,
        None => return ValidationResult::allowed(),
    };

    let old_server = &old_policy.policy_spec().policy_server;
    let new_server = &ctx.policy.policy_spec().policy_server;
    if old_server != new_server {
        return ValidationResult::denied(
            "PolicyServerImmutable",
            &format!(
                "spec.policyServer: the field is immutable (was '{}', requested '{}')",
                old_server, new_server
            ),
        );
    }

    ValidationResult::allowed()
}
