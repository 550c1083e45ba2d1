//! Unit tests for status management

use policy_operator::controller::derive_lifecycle;
use policy_operator::controller::status::{
    ConditionBuilder, condition_reasons, condition_status, condition_types, is_condition_true,
    server_status, server_status_changed,
};
use policy_operator::crd::{AnyPolicy, Condition, PolicyLifecycle, PolicyStatus};

use crate::common::*;

fn condition(type_: &str, status: &str) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: "OldReason".to_string(),
        message: "Old message".to_string(),
        last_transition_time: "2024-01-01T00:00:00Z".to_string(),
        observed_generation: Some(1),
    }
}

mod condition_builder_tests {
    use super::*;

    #[test]
    fn test_new_condition_builder() {
        assert!(ConditionBuilder::new(Some(1)).build().is_empty());
    }

    #[test]
    fn test_set_condition_updates_existing_same_status() {
        let existing = vec![condition("TestCondition", condition_status::TRUE)];

        let conditions = ConditionBuilder::from_existing(existing, Some(2))
            .set_condition("TestCondition", condition_status::TRUE, "NewReason", "New message")
            .build();

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].reason, "NewReason");
        assert_eq!(conditions[0].message, "New message");
        assert_eq!(conditions[0].observed_generation, Some(2));
        assert_eq!(conditions[0].last_transition_time, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_set_condition_status_flip_moves_transition_time() {
        let existing = vec![condition("TestCondition", condition_status::TRUE)];

        let conditions = ConditionBuilder::from_existing(existing, Some(1))
            .set_condition("TestCondition", condition_status::FALSE, "Broken", "")
            .build();

        assert_eq!(conditions[0].status, condition_status::FALSE);
        assert_ne!(conditions[0].last_transition_time, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_record_passes_result_through() {
        let mut builder = ConditionBuilder::new(Some(3));

        let ok: Result<u8, String> = builder.record(condition_types::SERVICE_RECONCILED, Ok(7));
        let err: Result<u8, String> =
            builder.record(condition_types::DEPLOYMENT_RECONCILED, Err("boom".to_string()));

        assert_eq!(ok, Ok(7));
        assert_eq!(err, Err("boom".to_string()));

        let conditions = builder.build();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[1].reason, condition_reasons::RECONCILIATION_FAILED);
        assert_eq!(conditions[1].message, "boom");
        assert!(is_condition_true(&conditions, condition_types::SERVICE_RECONCILED));
        assert!(!is_condition_true(&conditions, condition_types::DEPLOYMENT_RECONCILED));
    }

    #[test]
    fn test_webhook_configured_false_names_server_readiness() {
        let conditions = ConditionBuilder::new(None).webhook_configured(false).build();
        assert_eq!(conditions[0].type_, condition_types::WEBHOOK_CONFIGURATION_RECONCILED);
        assert_eq!(conditions[0].reason, condition_reasons::POLICY_SERVER_NOT_READY);
    }
}

mod server_status_tests {
    use super::*;

    #[test]
    fn test_status_carries_generation() {
        let server = PolicyServerBuilder::new("default").with_generation(4).build();
        let status = server_status(&server, vec![]);
        assert_eq!(status.observed_generation, Some(4));
    }

    #[test]
    fn test_changed_detection() {
        let mut server = create_test_server("default", 1);
        let status = server_status(&server, vec![condition("A", condition_status::TRUE)]);
        assert!(server_status_changed(&server, &status));

        server.status = Some(status.clone());
        assert!(!server_status_changed(&server, &status));
    }
}

mod lifecycle_tests {
    use super::*;

    fn policy_with_webhook(configured: Option<bool>) -> AnyPolicy {
        let mut policy = PolicyBuilder::new("privileged", "default").cluster();
        if let Some(configured) = configured {
            policy.status = Some(PolicyStatus {
                conditions: ConditionBuilder::new(Some(1))
                    .webhook_configured(configured)
                    .build(),
                ..Default::default()
            });
        }
        policy.into()
    }

    #[test]
    fn test_unscheduled_without_reference() {
        let policy: AnyPolicy = PolicyBuilder::new("privileged", "").cluster().into();
        let server = create_test_server("default", 1);
        assert_eq!(
            derive_lifecycle(&policy, Some(&server), true),
            PolicyLifecycle::Unscheduled
        );
    }

    #[test]
    fn test_scheduled_while_server_missing_or_unready() {
        let policy = policy_with_webhook(Some(true));
        let server = create_test_server("default", 1);

        assert_eq!(derive_lifecycle(&policy, None, true), PolicyLifecycle::Scheduled);
        assert_eq!(
            derive_lifecycle(&policy, Some(&server), false),
            PolicyLifecycle::Scheduled
        );
    }

    #[test]
    fn test_active_requires_registered_webhook() {
        let server = create_test_server("default", 1);

        assert_eq!(
            derive_lifecycle(&policy_with_webhook(None), Some(&server), true),
            PolicyLifecycle::Scheduled
        );
        assert_eq!(
            derive_lifecycle(&policy_with_webhook(Some(false)), Some(&server), true),
            PolicyLifecycle::Scheduled
        );
        assert_eq!(
            derive_lifecycle(&policy_with_webhook(Some(true)), Some(&server), true),
            PolicyLifecycle::Active
        );
    }
}
