//! PolicyServer spec policies

use super::{ServerValidationContext, ValidationResult};

/// The workload needs an image to run
pub fn validate_image(ctx: &ServerValidationContext) -> ValidationResult {
    if ctx.server.spec.image.trim().is_empty() {
        return ValidationResult::denied("ImageRequired", "spec.image: a value must be specified");
    }
    ValidationResult::allowed()
}

pub fn validate_replicas(ctx: &ServerValidationContext) -> ValidationResult {
    let replicas = ctx.server.spec.replicas;
    if replicas < 0 {
        return ValidationResult::denied(
            "InvalidReplicas",
            &format!("spec.replicas: must be non-negative, got {}", replicas),
        );
    }
    ValidationResult::allowed()
}

/// A PodDisruptionBudget accepts only one of the two bounds
pub fn validate_disruption_bounds(ctx: &ServerValidationContext) -> ValidationResult {
    let spec = &ctx.server.spec;
    if spec.min_available.is_some() && spec.max_unavailable.is_some() {
        return ValidationResult::denied(
            "ConflictingDisruptionBounds",
            "spec.minAvailable and spec.maxUnavailable cannot both be set",
        );
    }
    ValidationResult::allowed()
}
