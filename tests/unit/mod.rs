// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for the policy operator
//!
//! This module contains unit tests for:
//! - PolicyServer and policy reconciliation against an in-memory store
//! - Finalizer-gated deletion
//! - Admission validation
//! - Status management
//! - Resource generators

#[path = "../common/mod.rs"]
mod common;

mod deletion;
mod resources;
mod status;
