pub mod certificate;
pub mod common;
pub mod config_bundle;
pub mod deployment;
pub mod pdb;
pub mod secret;
pub mod service;
pub mod webhook;

pub use common::{
    API_VERSION, FIELD_MANAGER, FINALIZER, KIND, POLICY_SERVER_LABEL_KEY, name_with_prefix,
    owner_reference, standard_labels,
};
