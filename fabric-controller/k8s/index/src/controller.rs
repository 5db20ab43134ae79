use crate::{
    metrics::{ControllerMetrics, Outcome},
    Op, Update,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use fabric_controller_iptables::{Backend, Error, Handler};
use std::sync::Arc;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::Duration,
};
use tracing::{debug, error, info, warn};

/// Applies index updates to the host, one at a time.
pub struct Controller<B> {
    handler: Arc<Handler<B>>,
    updates: UnboundedReceiver<Update>,
    backoff: Duration,
    metrics: ControllerMetrics,
}

/// Per-cluster bookkeeping.
#[derive(Default)]
struct State {
    /// The latest generation received from the index for each cluster.
    latest: HashMap<String, u64>,

    /// Clusters whose last operation failed part way. The next operation for
    /// such a cluster reconciles everything, whatever its kind.
    failed: HashSet<String>,

    configured: HashSet<String>,

    /// The number of retries in flight for each cluster.
    retrying: HashMap<String, usize>,
}

// === impl Controller ===

impl<B: Backend + 'static> Controller<B> {
    pub fn new(
        handler: Arc<Handler<B>>,
        updates: UnboundedReceiver<Update>,
        backoff: Duration,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            handler,
            updates,
            backoff,
            metrics,
        }
    }

    /// Processes updates until the index is dropped. Pending retries are
    /// abandoned at that point.
    pub async fn run(self) {
        let Self {
            handler,
            mut updates,
            backoff,
            metrics,
        } = self;
        let (retry_tx, mut retry_rx) = mpsc::unbounded_channel::<Update>();
        let mut state = State::default();

        loop {
            let update = tokio::select! {
                biased;
                update = updates.recv() => match update {
                    Some(update) => {
                        state
                            .latest
                            .insert(update.config.cluster_id.clone(), update.generation);
                        update
                    }
                    None => break,
                },
                Some(update) = retry_rx.recv() => {
                    state.retry_received(&update.config.cluster_id);
                    if state.is_superseded(&update) {
                        debug!(
                            cluster = %update.config.cluster_id,
                            generation = update.generation,
                            "Dropping superseded retry"
                        );
                        metrics.observe(update.op, Outcome::Superseded);
                        if !state.configured.contains(&update.config.cluster_id) {
                            state.forget(&update.config.cluster_id);
                        }
                        continue;
                    }
                    update
                }
            };

            let update = state.widen(update);
            let outcome = process(&handler, update.clone()).await;
            metrics.observe(update.op, outcome);
            state.record(&update, outcome);
            metrics.set_clusters(state.configured.len());

            if outcome == Outcome::Error {
                state.retry_scheduled(&update.config.cluster_id);
                schedule_retry(retry_tx.clone(), update, backoff);
            }
        }

        debug!("Updates closed");
    }
}

async fn process<B: Backend + 'static>(handler: &Arc<Handler<B>>, update: Update) -> Outcome {
    let Update {
        generation,
        op,
        config,
    } = update;
    let cluster = config.cluster_id.clone();

    let handler = handler.clone();
    let result = tokio::task::spawn_blocking(move || match op {
        Op::Configure => handler.ensure_chain_rules_per_cluster(&config),
        Op::Postrouting => handler.ensure_postrouting_rules(&config),
        Op::Prerouting => handler.ensure_prerouting_rules(&config),
        Op::Remove => handler.remove_iptables_configuration_per_cluster(&config),
    })
    .await;

    match result {
        Ok(Ok(())) => {
            info!(%cluster, %op, generation, "Reconciled");
            Outcome::Ok
        }
        Ok(Err(Error::Invalid(error))) => {
            warn!(%cluster, %op, generation, %error, "Ignoring invalid configuration");
            Outcome::Invalid
        }
        Ok(Err(error)) => {
            error!(%cluster, %op, generation, %error, "Failed to reconcile");
            Outcome::Error
        }
        Err(error) => {
            error!(%cluster, %op, generation, %error, "Reconciliation task failed");
            Outcome::Error
        }
    }
}

fn schedule_retry(tx: UnboundedSender<Update>, update: Update, backoff: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(backoff).await;
        // The controller may have stopped in the meantime.
        let _ = tx.send(update);
    });
}

// === impl State ===

impl State {
    fn is_superseded(&self, update: &Update) -> bool {
        self.latest
            .get(&update.config.cluster_id)
            .is_some_and(|latest| *latest > update.generation)
    }

    fn widen(&self, mut update: Update) -> Update {
        if update.op != Op::Remove && self.failed.contains(&update.config.cluster_id) {
            update.op = Op::Configure;
        }
        update
    }

    fn record(&mut self, update: &Update, outcome: Outcome) {
        let cluster = &update.config.cluster_id;
        match outcome {
            Outcome::Ok => {
                self.failed.remove(cluster);
                if update.op == Op::Remove {
                    self.configured.remove(cluster);
                    self.forget(cluster);
                } else {
                    self.configured.insert(cluster.clone());
                }
            }
            Outcome::Error => {
                self.failed.insert(cluster.clone());
            }
            Outcome::Invalid | Outcome::Superseded => {}
        }
    }

    fn retry_scheduled(&mut self, cluster: &str) {
        *self.retrying.entry(cluster.to_string()).or_default() += 1;
    }

    fn retry_received(&mut self, cluster: &str) {
        if let Some(n) = self.retrying.get_mut(cluster) {
            *n -= 1;
            if *n == 0 {
                self.retrying.remove(cluster);
            }
        }
    }

    /// Drops the generation of a removed cluster. It is kept while a retry is
    /// in flight, since that retry may still need to be found superseded.
    fn forget(&mut self, cluster: &str) {
        if !self.retrying.contains_key(cluster) {
            self.latest.remove(cluster);
        }
    }
}
