//! Reverse lookup from a PolicyServer to the policies bound to it
//!
//! Backed by reflector caches of both policy kinds, so reconciling a server
//! never lists policies from the API server.

use std::fmt::Debug;
use std::future::Future;

use futures::StreamExt;
use kube::runtime::reflector::store::WriterDropped;
use kube::runtime::reflector::{self, Store};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::crd::{AdmissionPolicy, AnyPolicy, ClusterAdmissionPolicy, Policy};

/// Cached view of every policy, indexed by the server it is bound to
#[derive(Clone)]
pub struct PolicyIndex {
    cluster: Store<ClusterAdmissionPolicy>,
    namespaced: Store<AdmissionPolicy>,
}

impl PolicyIndex {
    pub fn new(cluster: Store<ClusterAdmissionPolicy>, namespaced: Store<AdmissionPolicy>) -> Self {
        Self {
            cluster,
            namespaced,
        }
    }

    /// Policies of either kind bound to `server`, ordered by unique name
    pub fn bound_to(&self, server: &str) -> Vec<AnyPolicy> {
        let cluster = self
            .cluster
            .state()
            .into_iter()
            .map(|p| AnyPolicy::from(p.as_ref().clone()));
        let namespaced = self
            .namespaced
            .state()
            .into_iter()
            .map(|p| AnyPolicy::from(p.as_ref().clone()));

        let mut policies: Vec<AnyPolicy> = cluster
            .chain(namespaced)
            .filter(|p| p.policy_server() == Some(server))
            .collect();
        policies.sort_by_key(|p| p.unique_name());
        policies
    }

    /// Resolve once both caches hold a complete initial listing
    pub async fn wait_until_ready(&self) -> Result<(), WriterDropped> {
        self.cluster.wait_until_ready().await?;
        self.namespaced.wait_until_ready().await
    }
}

/// Cache of every `K` in the cluster and the watch that keeps it current
pub fn policy_reflector<K>(client: Client) -> (Store<K>, impl Future<Output = ()> + Send)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let (reader, writer) = reflector::store();
    let events = watcher(Api::<K>::all(client), watcher::Config::default());
    let watch = reflector::reflector(writer, events)
        .default_backoff()
        .applied_objects()
        .for_each(|event| async move {
            if let Err(e) = event {
                warn!("{} watch error: {}", K::kind(&()), e);
            }
        });
    (reader, watch)
}
