//! Admission validation policies
//!
//! Each policy module exports a `validate_*` function that checks one rule.

pub mod immutability;
pub mod mode;
pub mod policy_server;
pub mod rules;

pub use immutability::validate_immutability;
pub use mode::validate_mode;
pub use policy_server::{validate_disruption_bounds, validate_image, validate_replicas};
pub use rules::validate_rules;

use crate::crd::{AnyPolicy, PolicyServer};

/// Result of a policy validation
#[derive(Debug, PartialEq, Eq)]
pub struct ValidationResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}

/// Policy under admission, with the stored version for UPDATE operations
pub struct ValidationContext<'a> {
    pub policy: &'a AnyPolicy,
    pub old_policy: Option<&'a AnyPolicy>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(policy: &'a AnyPolicy, old_policy: Option<&'a AnyPolicy>) -> Self {
        Self { policy, old_policy }
    }
}

/// PolicyServer under admission
pub struct ServerValidationContext<'a> {
    pub server: &'a PolicyServer,
}

impl<'a> ServerValidationContext<'a> {
    pub fn new(server: &'a PolicyServer) -> Self {
        Self { server }
    }
}

/// First denial among the check results, in the order given
fn first_denial<const N: usize>(results: [ValidationResult; N]) -> ValidationResult {
    results
        .into_iter()
        .find(|result| !result.allowed)
        .unwrap_or_else(ValidationResult::allowed)
}

/// Run all policy checks and return the first failure
pub fn validate_all(ctx: &ValidationContext) -> ValidationResult {
    first_denial([
        validate_rules(ctx),
        validate_immutability(ctx),
        validate_mode(ctx),
    ])
}

/// Run all PolicyServer checks and return the first failure
pub fn validate_server(ctx: &ServerValidationContext) -> ValidationResult {
    first_denial([
        validate_image(ctx),
        validate_replicas(ctx),
        validate_disruption_bounds(ctx),
    ])
}
