//! Unit tests for resource generators
//!
//! Tests for the Deployment, Service, ConfigMap, PDB, Secret and webhook
//! registrations derived from a PolicyServer and its policies.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::json;

use policy_operator::crd::{AnyPolicy, Policy};
use policy_operator::resources::certificate::{CertificateGenerator, RcgenGenerator};
use policy_operator::resources::common::{POLICY_SERVER_LABEL_KEY, service_dns_name};
use policy_operator::resources::config_bundle::{
    POLICIES_ENTRY, SOURCES_ENTRY, generate_config_map, render_config_bundle,
};
use policy_operator::resources::deployment::generate_deployment;
use policy_operator::resources::pdb::generate_pdb;
use policy_operator::resources::secret::{generate_serving_secret, parse_serving_secret};
use policy_operator::resources::service::generate_service;
use policy_operator::resources::webhook::{generate_mutating_webhook, generate_validating_webhook};

use crate::common::*;

mod owned_object_tests {
    use super::*;

    #[test]
    fn test_every_owned_object_shares_name_and_owner() {
        let server = create_test_server("default", 2);
        let bundle = render_config_bundle::<AnyPolicy>(&server, &[]).unwrap();

        let metas = vec![
            generate_deployment(&server, TEST_NAMESPACE, &bundle.version(), false).metadata,
            generate_service(&server, TEST_NAMESPACE, false).metadata,
            generate_config_map(&server, TEST_NAMESPACE, &bundle).metadata,
        ];

        for meta in metas {
            assert_eq!(meta.name.as_deref(), Some("policy-server-default"));
            assert_eq!(meta.namespace.as_deref(), Some(TEST_NAMESPACE));
            let owner = &meta.owner_references.unwrap()[0];
            assert_eq!(owner.kind, "PolicyServer");
            assert_eq!(owner.uid, "uid-default");
            assert_eq!(
                meta.labels.unwrap().get(POLICY_SERVER_LABEL_KEY),
                Some(&"default".to_string())
            );
        }
    }

    #[test]
    fn test_pdb_only_with_bounds() {
        let server = create_test_server("default", 2);
        assert!(generate_pdb(&server, TEST_NAMESPACE).is_none());

        let server = PolicyServerBuilder::new("default")
            .with_max_unavailable(IntOrString::String("50%".to_string()))
            .build();
        let spec = generate_pdb(&server, TEST_NAMESPACE).unwrap().spec.unwrap();
        assert_eq!(spec.max_unavailable, Some(IntOrString::String("50%".to_string())));
        assert!(spec.min_available.is_none());
    }

    #[test]
    fn test_serving_secret_round_trips() {
        let server = create_test_server("default", 1);
        let generator = RcgenGenerator;
        let ca = generator.generate_ca().unwrap();
        let dns = service_dns_name("default", TEST_NAMESPACE);
        let cert = generator
            .generate_serving_cert(&ca, &dns, std::slice::from_ref(&dns))
            .unwrap();

        let secret = generate_serving_secret(&server, TEST_NAMESPACE, &cert);
        assert_eq!(parse_serving_secret(&secret).unwrap(), cert);
    }
}

mod config_bundle_tests {
    use super::*;

    #[test]
    fn test_bundle_is_order_independent() {
        let server = create_test_server("default", 1);
        let a: AnyPolicy = PolicyBuilder::new("a", "default").cluster().into();
        let b: AnyPolicy = PolicyBuilder::new("b", "default").namespaced("team-a").into();

        let forward = render_config_bundle(&server, &[a.clone(), b.clone()]).unwrap();
        let reverse = render_config_bundle(&server, &[b, a]).unwrap();

        assert_eq!(forward, reverse);
        assert_eq!(forward.version(), reverse.version());
    }

    #[test]
    fn test_bundle_entries() {
        let server = PolicyServerBuilder::new("default")
            .with_insecure_source("registry.local:5000")
            .build();
        let policy: AnyPolicy = PolicyBuilder::new("privileged", "default")
            .with_settings(json!({"allowed": ["NET_ADMIN"]}))
            .namespaced("team-a")
            .into();

        let bundle = render_config_bundle(&server, &[policy]).unwrap();
        let data = bundle.data();

        let policies: serde_json::Value = serde_json::from_str(&data[POLICIES_ENTRY]).unwrap();
        let entry = &policies["namespaced-team-a-privileged"];
        assert_eq!(entry["namespacedName"], "team-a/privileged");
        assert_eq!(entry["module"], TEST_MODULE);
        assert_eq!(entry["policyMode"], "protect");
        assert_eq!(entry["allowedToMutate"], false);
        assert_eq!(entry["settings"]["allowed"][0], "NET_ADMIN");

        let sources: serde_json::Value = serde_json::from_str(&data[SOURCES_ENTRY]).unwrap();
        assert_eq!(sources["insecure_sources"][0], "registry.local:5000");
    }

    #[test]
    fn test_empty_bundle_renders_empty_objects() {
        let server = create_test_server("default", 1);
        let bundle = render_config_bundle::<AnyPolicy>(&server, &[]).unwrap();
        assert_eq!(bundle.policies, "{}");
        assert_eq!(bundle.sources, "{}");
    }
}

mod webhook_tests {
    use super::*;

    #[test]
    fn test_namespaced_policy_is_scoped_to_its_namespace() {
        let policy = PolicyBuilder::new("privileged", "default").namespaced("team-a");
        let registration = generate_validating_webhook(&policy, TEST_NAMESPACE, "ca");

        assert_eq!(
            registration.metadata.name.as_deref(),
            Some("namespaced-team-a-privileged")
        );
        let webhooks = registration.webhooks.unwrap();
        let selector = webhooks[0].namespace_selector.as_ref().unwrap();
        assert_eq!(
            selector
                .match_labels
                .as_ref()
                .unwrap()
                .get("kubernetes.io/metadata.name"),
            Some(&"team-a".to_string())
        );
    }

    #[test]
    fn test_mutating_registration_mirrors_policy() {
        let policy = PolicyBuilder::new("psp", "default").mutating().cluster();
        let registration = generate_mutating_webhook(&policy, TEST_NAMESPACE, "ca");
        let webhooks = registration.webhooks.unwrap();

        assert_eq!(webhooks[0].name, "psp.kubewarden.admission");
        assert_eq!(webhooks[0].rules.as_deref(), Some(policy.rules()));
        assert_eq!(webhooks[0].side_effects, "None");
        assert_eq!(webhooks[0].admission_review_versions, vec!["v1".to_string()]);
    }
}
