//! Admission webhooks for policy resources
//!
//! Validates ClusterAdmissionPolicy, AdmissionPolicy and PolicyServer
//! objects before they are persisted.

pub mod policies;
mod server;

pub use policies::{ServerValidationContext, ValidationContext, ValidationResult};
pub use server::{
    DynamicReview, WEBHOOK_PORT, WebhookError, create_webhook_router,
    review_admission_policy, review_cluster_admission_policy, review_policy_server,
    run_webhook_server,
};

pub use kube::core::admission::{AdmissionResponse, AdmissionReview};
