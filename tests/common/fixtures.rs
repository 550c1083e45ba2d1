//! Test fixtures for PolicyServers, policies and the reconcile context
//!
//! ```rust,ignore
//! let store = Arc::new(FakeStore::new());
//! store.insert_server(create_test_server("default", 1));
//! store.insert_policy(ClusterPolicyBuilder::new("privileged", "default").build());
//! let ctx = test_context(store.clone());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use k8s_openapi::api::admissionregistration::v1::RuleWithOperations;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;
use policy_operator::config::OperatorConfig;
use policy_operator::controller::Context;
use policy_operator::crd::{
    AdmissionPolicy, AdmissionPolicySpec, ClusterAdmissionPolicy, ClusterAdmissionPolicySpec,
    PolicyMode, PolicyServer, PolicyServerSpec, PolicySpec,
};
use policy_operator::resources::FINALIZER;
use policy_operator::resources::certificate::{
    CertificateAuthority, CertificateGenerator, RcgenGenerator, Result as PkiResult,
    ServingCertificate,
};

use super::FakeStore;

/// Namespace the test context places workloads in
pub const TEST_NAMESPACE: &str = "kubewarden";

pub const TEST_IMAGE: &str = "ghcr.io/kubewarden/policy-server:v1.0.0";

pub const TEST_MODULE: &str = "registry://ghcr.io/kubewarden/policies/pod-privileged:v0.1.9";

// =============================================================================
// Certificate generation
// =============================================================================

/// rcgen-backed generator that counts how often it was asked for material
#[derive(Default)]
pub struct CountingGenerator {
    inner: RcgenGenerator,
    cas: AtomicUsize,
    serving: AtomicUsize,
}

impl CountingGenerator {
    pub fn cas_generated(&self) -> usize {
        self.cas.load(Ordering::SeqCst)
    }

    pub fn serving_generated(&self) -> usize {
        self.serving.load(Ordering::SeqCst)
    }
}

impl CertificateGenerator for CountingGenerator {
    fn generate_ca(&self) -> PkiResult<CertificateAuthority> {
        self.cas.fetch_add(1, Ordering::SeqCst);
        self.inner.generate_ca()
    }

    fn generate_serving_cert(
        &self,
        ca: &CertificateAuthority,
        common_name: &str,
        sans: &[String],
    ) -> PkiResult<ServingCertificate> {
        self.serving.fetch_add(1, Ordering::SeqCst);
        self.inner.generate_serving_cert(ca, common_name, sans)
    }
}

// =============================================================================
// Context
// =============================================================================

/// Context backed by `store`, with metrics disabled
pub fn test_context(store: Arc<FakeStore>) -> Context {
    test_context_with_generator(store, Arc::new(CountingGenerator::default()))
}

pub fn test_context_with_generator(
    store: Arc<FakeStore>,
    generator: Arc<CountingGenerator>,
) -> Context {
    let config = OperatorConfig {
        deployments_namespace: TEST_NAMESPACE.to_string(),
        ..Default::default()
    };
    Context::new(store, generator, config)
}

// =============================================================================
// PolicyServer
// =============================================================================

/// Server named `name` with `replicas` replicas and the finalizer already set
pub fn create_test_server(name: &str, replicas: i32) -> PolicyServer {
    PolicyServerBuilder::new(name)
        .with_replicas(replicas)
        .with_finalizer()
        .build()
}

pub struct PolicyServerBuilder {
    name: String,
    spec: PolicyServerSpec,
    finalizers: Vec<String>,
    generation: i64,
}

impl PolicyServerBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            spec: PolicyServerSpec {
                image: TEST_IMAGE.to_string(),
                replicas: 1,
                ..Default::default()
            },
            finalizers: Vec::new(),
            generation: 1,
        }
    }

    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.spec.replicas = replicas;
        self
    }

    pub fn with_min_available(mut self, value: IntOrString) -> Self {
        self.spec.min_available = Some(value);
        self
    }

    pub fn with_max_unavailable(mut self, value: IntOrString) -> Self {
        self.spec.max_unavailable = Some(value);
        self
    }

    pub fn with_insecure_source(mut self, source: &str) -> Self {
        self.spec.insecure_sources.push(source.to_string());
        self
    }

    pub fn with_finalizer(mut self) -> Self {
        self.finalizers.push(FINALIZER.to_string());
        self
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.generation = generation;
        self
    }

    pub fn build(self) -> PolicyServer {
        PolicyServer {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                uid: Some(format!("uid-{}", self.name)),
                generation: Some(self.generation),
                finalizers: (!self.finalizers.is_empty()).then_some(self.finalizers),
                ..Default::default()
            },
            spec: self.spec,
            status: None,
        }
    }
}

// =============================================================================
// Policies
// =============================================================================

/// Rule matching pod creation
pub fn pod_rule() -> RuleWithOperations {
    RuleWithOperations {
        operations: Some(vec!["CREATE".to_string()]),
        api_groups: Some(vec![String::new()]),
        api_versions: Some(vec!["v1".to_string()]),
        resources: Some(vec!["pods".to_string()]),
        ..Default::default()
    }
}

fn policy_meta(name: &str, namespace: Option<&str>, finalizers: Vec<String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(String::from),
        uid: Some(format!("uid-{}", name)),
        generation: Some(1),
        finalizers: (!finalizers.is_empty()).then_some(finalizers),
        ..Default::default()
    }
}

/// Builder shared by both policy kinds
pub struct PolicyBuilder {
    name: String,
    spec: PolicySpec,
    finalizers: Vec<String>,
}

impl PolicyBuilder {
    /// Policy bound to `server`, with the finalizer already set
    pub fn new(name: &str, server: &str) -> Self {
        Self {
            name: name.to_string(),
            spec: PolicySpec {
                policy_server: server.to_string(),
                module: TEST_MODULE.to_string(),
                rules: vec![pod_rule()],
                ..Default::default()
            },
            finalizers: vec![FINALIZER.to_string()],
        }
    }

    pub fn mutating(mut self) -> Self {
        self.spec.mutating = true;
        self
    }

    pub fn with_mode(mut self, mode: PolicyMode) -> Self {
        self.spec.mode = mode;
        self
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.spec.settings = settings;
        self
    }

    pub fn with_rules(mut self, rules: Vec<RuleWithOperations>) -> Self {
        self.spec.rules = rules;
        self
    }

    pub fn without_finalizer(mut self) -> Self {
        self.finalizers.clear();
        self
    }

    pub fn cluster(self) -> ClusterAdmissionPolicy {
        ClusterAdmissionPolicy {
            metadata: policy_meta(&self.name, None, self.finalizers),
            spec: ClusterAdmissionPolicySpec {
                policy: self.spec,
                namespace_selector: None,
            },
            status: None,
        }
    }

    pub fn namespaced(self, namespace: &str) -> AdmissionPolicy {
        AdmissionPolicy {
            metadata: policy_meta(&self.name, Some(namespace), self.finalizers),
            spec: AdmissionPolicySpec { policy: self.spec },
            status: None,
        }
    }
}
