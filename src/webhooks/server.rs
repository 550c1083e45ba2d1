//! Admission endpoints for the operator's own resources
//!
//! Requests arrive as `AdmissionReview<DynamicObject>` and are converted to
//! the typed resource before validation, so a payload that does not match
//! the CRD schema is denied rather than rejected at the HTTP layer.

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use super::policies::{
    ServerValidationContext, ValidationContext, ValidationResult, validate_all, validate_server,
};
use crate::crd::{AdmissionPolicy, AnyPolicy, ClusterAdmissionPolicy, PolicyServer};

/// Port the admission server listens on
pub const WEBHOOK_PORT: u16 = 9443;

/// HTTP status code carried by denied responses
const DENIED_CODE: u16 = 403;

/// Review as sent by the API server, before typing the embedded objects
pub type DynamicReview = AdmissionReview<DynamicObject>;

/// Errors raised while starting or running the admission server
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("failed to load TLS configuration: {0}")]
    TlsConfig(String),

    #[error("admission server failed: {0}")]
    Server(String),
}

pub fn create_webhook_router() -> Router {
    Router::new()
        .route(
            "/validate-clusteradmissionpolicy",
            post(|Json(review): Json<DynamicReview>| async move {
                let (status, body) = review_cluster_admission_policy(review);
                (status, Json(body))
            }),
        )
        .route(
            "/validate-admissionpolicy",
            post(|Json(review): Json<DynamicReview>| async move {
                let (status, body) = review_admission_policy(review);
                (status, Json(body))
            }),
        )
        .route(
            "/validate-policyserver",
            post(|Json(review): Json<DynamicReview>| async move {
                let (status, body) = review_policy_server(review);
                (status, Json(body))
            }),
        )
}

pub fn review_cluster_admission_policy(review: DynamicReview) -> (StatusCode, DynamicReview) {
    admit::<ClusterAdmissionPolicy, _>(review, |policy, old| {
        let policy = AnyPolicy::from(policy);
        let old = old.map(AnyPolicy::from);
        validate_all(&ValidationContext::new(&policy, old.as_ref()))
    })
}

/// Namespaced policies may omit `metadata.namespace` in the embedded object;
/// the request namespace is authoritative.
pub fn review_admission_policy(review: DynamicReview) -> (StatusCode, DynamicReview) {
    let namespace = review.request.as_ref().and_then(|r| r.namespace.clone());
    admit::<AdmissionPolicy, _>(review, move |mut policy, old| {
        if policy.metadata.namespace.is_none() {
            policy.metadata.namespace = namespace;
        }
        let policy = AnyPolicy::from(policy);
        let old = old.map(AnyPolicy::from);
        validate_all(&ValidationContext::new(&policy, old.as_ref()))
    })
}

pub fn review_policy_server(review: DynamicReview) -> (StatusCode, DynamicReview) {
    admit::<PolicyServer, _>(review, |server, _| {
        validate_server(&ServerValidationContext::new(&server))
    })
}

fn typed<T: DeserializeOwned>(object: &DynamicObject) -> Result<T, serde_json::Error> {
    serde_json::to_value(object).and_then(serde_json::from_value)
}

/// Type the request objects, run `validate` and build the response
fn admit<T, F>(review: DynamicReview, validate: F) -> (StatusCode, DynamicReview)
where
    T: DeserializeOwned,
    F: FnOnce(T, Option<T>) -> ValidationResult,
{
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Malformed admission review");
            return (
                StatusCode::BAD_REQUEST,
                AdmissionResponse::invalid(e.to_string()).into_review(),
            );
        }
    };

    debug!(
        uid = %request.uid,
        kind = %request.kind.kind,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = %request.name,
        "Reviewing admission request"
    );
    let response = AdmissionResponse::from(&request);

    if request.operation == Operation::Delete {
        return (StatusCode::OK, response.into_review());
    }

    let object = match request.object.as_ref().map(typed::<T>) {
        Some(Ok(object)) => object,
        Some(Err(e)) => {
            warn!(uid = %request.uid, error = %e, "Object does not match the resource schema");
            let response = response.deny(format!("Failed to parse object: {}", e));
            return (StatusCode::OK, response.into_review());
        }
        None => {
            let response = response.deny("Missing object in request");
            return (StatusCode::OK, response.into_review());
        }
    };

    // A stored object that no longer parses is validated as a create
    let old_object = request
        .old_object
        .as_ref()
        .and_then(|old| typed::<T>(old).ok());

    let result = validate(object, old_object);
    if result.allowed {
        return (StatusCode::OK, response.into_review());
    }

    let reason = result.reason.unwrap_or_else(|| "ValidationFailed".to_string());
    let message = result
        .message
        .unwrap_or_else(|| "Validation failed".to_string());
    info!(
        uid = %request.uid,
        name = %request.name,
        reason = %reason,
        "Denied admission request: {}",
        message
    );

    let mut response = response.deny(message);
    response.result.code = DENIED_CODE;
    response.result.reason = reason;
    (StatusCode::OK, response.into_review())
}

/// Serve the admission routes over TLS on [`WEBHOOK_PORT`]
pub async fn run_webhook_server(cert_path: &str, key_path: &str) -> Result<(), WebhookError> {
    let tls = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!("Admission server listening on {}", addr);

    axum_server::bind_rustls(addr, tls)
        .serve(create_webhook_router().into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))
}
