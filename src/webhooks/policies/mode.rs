//! Mode transition policy
//!
//! A policy may be promoted from `monitor` to `protect`, never demoted.
//! Demoting requires recreating the policy.

use super::{ValidationContext, ValidationResult};
use crate::crd::{Policy, PolicyMode};

pub fn validate_mode(ctx: &ValidationContext) -> ValidationResult {
    let Some(old_policy) = ctx.old_policy else {
        return ValidationResult::allowed();
    };

    if old_policy.mode() == PolicyMode::Protect && ctx.policy.mode() == PolicyMode::Monitor {
        return ValidationResult::denied(
            "ModeTransitionForbidden",
            "spec.mode: field cannot transition from protect to monitor. Recreate instead.",
        );
    }

    ValidationResult::allowed()
}
