use ahash::AHashMap as HashMap;
use fabric_controller_core::{short_cluster_id, Category, ClusterRules, NetworkConfig};
use fabric_controller_k8s_api::{ResourceExt, TunnelEndpoint};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

pub type SharedIndex = Arc<RwLock<Index>>;

/// Tracks the network configuration of every negotiated `TunnelEndpoint` and
/// publishes the engine operation needed to apply each change.
pub struct Index {
    updates: UnboundedSender<Update>,
    endpoints: HashMap<ResourceId, NetworkConfig>,
    generation: u64,
}

/// An engine operation for a single cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    /// Increases with every update published by the index. A failed update is
    /// only retried while no later update exists for the same cluster.
    pub generation: u64,
    pub op: Op,
    pub config: NetworkConfig,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    /// Creates the cluster's containers and reconciles all of its rules.
    Configure,
    Postrouting,
    Prerouting,
    Remove,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ResourceId {
    namespace: String,
    name: String,
}

// === impl Index ===

impl Index {
    pub fn shared(updates: UnboundedSender<Update>) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            updates,
            endpoints: HashMap::new(),
            generation: 0,
        }))
    }

    /// The number of clusters with a negotiated configuration.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    fn publish(&mut self, op: Op, config: NetworkConfig) {
        self.generation += 1;
        let update = Update {
            generation: self.generation,
            op,
            config,
        };
        tracing::debug!(
            cluster = %update.config.cluster_id,
            %op,
            generation = update.generation,
            "Publishing update"
        );
        if let Err(error) = self.updates.send(update) {
            tracing::error!(%error, "Failed to publish update");
        }
    }

    /// Publishes the operation needed once `old` no longer describes its
    /// cluster.
    ///
    /// Endpoints whose cluster identifiers share a prefix program the same
    /// containers. The cluster is only removed when no such endpoint is
    /// left; otherwise it is reconfigured from a remaining one.
    fn release(&mut self, old: NetworkConfig) {
        let remaining = self
            .endpoints
            .values()
            .find(|config| same_cluster(config, &old))
            .cloned();
        match remaining {
            Some(config) => {
                tracing::debug!(
                    removed = %old.cluster_id,
                    remaining = %config.cluster_id,
                    "Cluster is still described by another endpoint"
                );
                self.publish(Op::Configure, config);
            }
            None => self.publish(Op::Remove, old),
        }
    }
}

impl kubert::index::IndexNamespacedResource<TunnelEndpoint> for Index {
    fn apply(&mut self, tep: TunnelEndpoint) {
        let id = ResourceId {
            namespace: tep.namespace().unwrap_or_default(),
            name: tep.name_unchecked(),
        };

        let Some(config) = tep.network_config() else {
            // Status has not been negotiated, or was withdrawn.
            if let Some(old) = self.endpoints.remove(&id) {
                self.release(old);
            }
            return;
        };

        let old = self.endpoints.insert(id, config.clone());
        match old {
            None => self.publish(Op::Configure, config),
            Some(old) if old.cluster_id != config.cluster_id => {
                if !same_cluster(&old, &config) {
                    self.release(old);
                }
                self.publish(Op::Configure, config);
            }
            Some(old) => {
                if let Some(op) = narrowest(&old, &config) {
                    self.publish(op, config);
                }
            }
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Some(old) = self.endpoints.remove(&ResourceId { namespace, name }) {
            self.release(old);
        }
    }
}

fn same_cluster(a: &NetworkConfig, b: &NetworkConfig) -> bool {
    short_cluster_id(&a.cluster_id) == short_cluster_id(&b.cluster_id)
}

/// Chooses the smallest operation that moves the host from `old`'s rules to
/// `new`'s, or `None` if both compile to the same rules.
fn narrowest(old: &NetworkConfig, new: &NetworkConfig) -> Option<Op> {
    if old == new {
        return None;
    }
    // The engine reports invalid configurations; let a full pass surface them.
    let (Ok(old), Ok(new)) = (ClusterRules::compile(old), ClusterRules::compile(new)) else {
        return Some(Op::Configure);
    };

    if old.hooks != new.hooks
        || old.chains.get(Category::Forward) != new.chains.get(Category::Forward)
        || old.chains.get(Category::Input) != new.chains.get(Category::Input)
    {
        return Some(Op::Configure);
    }
    let post = old.chains.get(Category::Postrouting) != new.chains.get(Category::Postrouting);
    let pre = old.chains.get(Category::Prerouting) != new.chains.get(Category::Prerouting);
    match (post, pre) {
        (true, true) => Some(Op::Configure),
        (true, false) => Some(Op::Postrouting),
        (false, true) => Some(Op::Prerouting),
        (false, false) => None,
    }
}

// === impl Op ===

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configure => "configure",
            Self::Postrouting => "postrouting",
            Self::Prerouting => "prerouting",
            Self::Remove => "remove",
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
