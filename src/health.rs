//! Probe and metrics endpoints
//!
//! `/healthz` answers as long as the process runs, `/readyz` once the
//! controllers have started, and `/metrics` serves the registry in the
//! OpenMetrics text format.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Address the health server binds to
pub const HEALTH_ADDR: &str = "0.0.0.0:8080";

const METRICS_PREFIX: &str = "policy_operator";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ObjectLabels {
    kind: String,
    name: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct LifecycleLabels {
    kind: String,
    lifecycle: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ServerLabels {
    policy_server: String,
}

/// Per-object reconcile outcomes
struct ReconcileMetrics {
    runs: Family<ObjectLabels, Counter>,
    failures: Family<ObjectLabels, Counter>,
    duration: Family<ObjectLabels, Histogram>,
}

impl ReconcileMetrics {
    fn register(registry: &mut Registry) -> Self {
        let runs = Family::default();
        registry.register("reconciliations", "Count of reconcile runs", runs.clone());

        let failures = Family::default();
        registry.register(
            "reconciliation_errors",
            "Count of reconcile runs that returned an error",
            failures.clone(),
        );

        // 1ms .. ~16s
        let duration = Family::<ObjectLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 15))
        });
        registry.register(
            "reconcile_duration_seconds",
            "Wall time of successful reconcile runs",
            duration.clone(),
        );

        Self {
            runs,
            failures,
            duration,
        }
    }
}

/// Gauges describing the managed fleet
struct FleetMetrics {
    policies: Family<LifecycleLabels, Gauge>,
    replicas_desired: Family<ServerLabels, Gauge>,
    replicas_ready: Family<ServerLabels, Gauge>,
}

impl FleetMetrics {
    fn register(registry: &mut Registry) -> Self {
        let policies = Family::default();
        registry.register(
            "policies",
            "Gauge of cached policies per kind and lifecycle",
            policies.clone(),
        );

        let replicas_desired = Family::default();
        registry.register(
            "policy_server_replicas_desired",
            "Replicas requested by each PolicyServer",
            replicas_desired.clone(),
        );

        let replicas_ready = Family::default();
        registry.register(
            "policy_server_replicas_ready",
            "Ready replicas of each PolicyServer workload",
            replicas_ready.clone(),
        );

        Self {
            policies,
            replicas_desired,
            replicas_ready,
        }
    }
}

/// Operator metrics, all registered under the `policy_operator` prefix
pub struct Metrics {
    reconcile: ReconcileMetrics,
    fleet: FleetMetrics,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix(METRICS_PREFIX);
        let reconcile = ReconcileMetrics::register(&mut registry);
        let fleet = FleetMetrics::register(&mut registry);
        Self {
            reconcile,
            fleet,
            registry,
        }
    }

    pub fn record_reconcile(&self, kind: &str, name: &str, duration_secs: f64) {
        let labels = object_labels(kind, name);
        self.reconcile.runs.get_or_create(&labels).inc();
        self.reconcile
            .duration
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_error(&self, kind: &str, name: &str) {
        self.reconcile
            .failures
            .get_or_create(&object_labels(kind, name))
            .inc();
    }

    /// Set the number of policies of `kind` in `lifecycle`
    pub fn set_policies(&self, kind: &str, lifecycle: &str, count: i64) {
        let labels = LifecycleLabels {
            kind: kind.to_string(),
            lifecycle: lifecycle.to_string(),
        };
        self.fleet.policies.get_or_create(&labels).set(count);
    }

    pub fn set_policy_server_replicas(&self, name: &str, desired: i64, ready: i64) {
        let labels = server_labels(name);
        self.fleet.replicas_desired.get_or_create(&labels).set(desired);
        self.fleet.replicas_ready.get_or_create(&labels).set(ready);
    }

    /// Forget a deleted policy server
    pub fn remove_policy_server(&self, name: &str) {
        let labels = server_labels(name);
        self.fleet.replicas_desired.remove(&labels);
        self.fleet.replicas_ready.remove(&labels);
    }

    fn render(&self) -> Result<String, std::fmt::Error> {
        let mut body = String::new();
        prometheus_client::encoding::text::encode(&mut body, &self.registry)?;
        Ok(body)
    }
}

fn object_labels(kind: &str, name: &str) -> ObjectLabels {
    ObjectLabels {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn server_labels(name: &str) -> ServerLabels {
    ServerLabels {
        policy_server: name.to_string(),
    }
}

/// State shared between the controllers and the health server
#[derive(Default)]
pub struct HealthState {
    ready: AtomicBool,
    pub metrics: Metrics,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

async fn readyz(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve probes and metrics on [`HEALTH_ADDR`] until the task is dropped
pub async fn run_health_server(state: Arc<HealthState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(HEALTH_ADDR).await?;
    info!("Health server listening on {}", HEALTH_ADDR);
    axum::serve(listener, create_router(state)).await
}
