//! Error types for the policy controllers

use std::time::Duration;

use thiserror::Error;

use crate::resources::certificate::PkiError;
use crate::resources::secret::SecretError;

/// Error variants are named with the `Error` suffix for clarity
/// (e.g., `KubeError`, `CertificateError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Certificate error: {0}")]
    CertificateError(#[from] PkiError),

    #[error("Invalid secret: {0}")]
    InvalidSecret(#[from] SecretError),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Deletion failed: {}", .0.join("; "))]
    DeletionFailed(Vec<String>),
}

/// Whether a kube error is a 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// Whether a kube error is a 409 AlreadyExists
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists")
}

/// Treat a 404 as success
pub fn ignore_not_found(result: Result<(), kube::Error>) -> Result<(), kube::Error> {
    match result {
        Err(e) if is_not_found(&e) => Ok(()),
        other => other,
    }
}

/// Treat a 409 AlreadyExists as success
pub fn ignore_already_exists(result: Result<(), kube::Error>) -> Result<(), kube::Error> {
    match result {
        Err(e) if is_already_exists(&e) => Ok(()),
        other => other,
    }
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(e) if is_not_found(e))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::KubeError(e) if is_already_exists(e))
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors other than 409 Conflict and 429 TooManyRequests
                    // are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            // Partial deletions converge on the next attempt
            Error::DeletionFailed(_) => true,
            Error::CertificateError(_) => true,
            Error::SerializationError(_) => false,
            Error::InvalidSecret(_) => false,
            Error::MissingObjectKey(_) => false,
            Error::InvalidConfig(_) => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        Duration::from_secs_f64(delay_with_jitter.min(self.max_delay.as_secs_f64()))
    }

    /// Non-retryable errors wait the full `max_delay` so an operator can step in
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            self.max_delay
        }
    }
}
