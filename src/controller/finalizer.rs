//! Finalizer list manipulation
//!
//! Only the operator's own entry is ever added or removed; finalizers put
//! there by other controllers are carried through untouched.

use kube::core::ObjectMeta;

use crate::resources::FINALIZER;

/// Check if the operator finalizer is present
pub fn has_finalizer(meta: &ObjectMeta) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == FINALIZER))
}

/// Finalizer list with the operator entry appended
pub fn with_finalizer(meta: &ObjectMeta) -> Vec<String> {
    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|f| f == FINALIZER) {
        finalizers.push(FINALIZER.to_string());
    }
    finalizers
}

/// Finalizer list with the operator entry removed
pub fn without_finalizer(meta: &ObjectMeta) -> Vec<String> {
    meta.finalizers
        .iter()
        .flatten()
        .filter(|f| f.as_str() != FINALIZER)
        .cloned()
        .collect()
}
