pub mod certificates;
pub mod context;
pub mod deletion;
pub mod error;
pub mod finalizer;
pub mod index;
pub mod policy_reconciler;
pub mod reconciler;
pub mod status;
pub mod store;

pub use context::Context;
pub use error::{BackoffConfig, Error, Result};
pub use index::{PolicyIndex, policy_reflector};
pub use policy_reconciler::{
    admission_policy_error_policy, cluster_admission_policy_error_policy,
    reconcile_admission_policy, reconcile_cluster_admission_policy, reconcile_policy,
};
pub use reconciler::{error_policy, reconcile};
pub use status::{ConditionBuilder, derive_lifecycle};
pub use store::{ClusterStore, KubeStore};
