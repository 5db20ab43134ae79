use crate::Op;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    reconciles: Family<ReconcileLabels, Counter>,
    clusters: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReconcileLabels {
    op: String,
    result: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Ok,
    /// The configuration was rejected before touching the host.
    Invalid,
    /// The host rejected an operation; the update will be retried.
    Error,
    /// A failed update was not retried because a later one exists.
    Superseded,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let reconciles = Family::default();
        prom.register(
            "reconcile",
            "Count of engine operations by outcome",
            reconciles.clone(),
        );

        let clusters = Gauge::default();
        prom.register(
            "clusters",
            "Gauge of the number of clusters programmed on this host",
            clusters.clone(),
        );

        Self {
            reconciles,
            clusters,
        }
    }

    pub(crate) fn observe(&self, op: Op, outcome: Outcome) {
        self.reconciles
            .get_or_create(&ReconcileLabels {
                op: op.to_string(),
                result: outcome.as_str().to_string(),
            })
            .inc();
    }

    pub(crate) fn set_clusters(&self, n: usize) {
        self.clusters.set(n as i64);
    }

    #[cfg(test)]
    pub(crate) fn count(&self, op: Op, outcome: Outcome) -> u64 {
        self.reconciles
            .get_or_create(&ReconcileLabels {
                op: op.to_string(),
                result: outcome.as_str().to_string(),
            })
            .get()
    }

    #[cfg(test)]
    pub(crate) fn clusters(&self) -> i64 {
        self.clusters.get()
    }
}

// === impl Outcome ===

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Invalid => "invalid",
            Self::Error => "error",
            Self::Superseded => "superseded",
        }
    }
}
