//! Rule set policy
//!
//! Every rule must name at least one operation and at least one of its
//! apiGroups, apiVersions or resources, otherwise no webhook can be built
//! from it. An empty rule list is accepted.

use super::{ValidationContext, ValidationResult};
use crate::crd::Policy;

fn is_empty(values: &Option<Vec<String>>) -> bool {
    values.as_ref().map_or(true, |v| v.is_empty())
}

pub fn validate_rules(ctx: &ValidationContext) -> ValidationResult {
    for (i, rule) in ctx.policy.rules().iter().enumerate() {
        if is_empty(&rule.operations) {
            return ValidationResult::denied(
                "OperationsRequired",
                &format!("spec.rules[{}].operations: a value must be specified", i),
            );
        }
        if is_empty(&rule.api_groups) && is_empty(&rule.api_versions) && is_empty(&rule.resources)
        {
            return ValidationResult::denied(
                "RuleTargetRequired",
                &format!(
                    "spec.rules[{}]: at least one of apiGroups, apiVersions, or resources \
                     must have a specified value",
                    i
                ),
            );
        }
    }
    ValidationResult::allowed()
}
