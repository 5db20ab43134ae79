use crate::{reconcile, topology, Backend, Error, RuleContainer};
use fabric_controller_core::{
    rules, validate_cluster_id, Category, ClusterRules, NetworkConfig, ValidationError,
};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

/// Applies per-cluster network configurations to the host packet filter.
///
/// Every operation holds the handler's lock for its whole read-modify-write
/// sequence, so operations never interleave on the backend. Operations are
/// idempotent: after a failure, the same call may simply be repeated.
pub struct Handler<B> {
    backend: Mutex<B>,
}

// === impl Handler ===

impl<B: Backend> Handler<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Mutex::new(backend),
        }
    }

    /// Locks the backend, blocking other operations until the guard is dropped.
    pub fn backend(&self) -> MutexGuard<'_, B> {
        self.backend.lock()
    }

    /// Creates the global containers and hooks them into the standard chains.
    #[instrument(skip(self))]
    pub fn init(&self) -> Result<(), Error> {
        topology::init(&mut *self.backend.lock())?;
        info!("Initialized");
        Ok(())
    }

    /// Creates the cluster's containers, leaving existing ones untouched.
    #[instrument(skip(self))]
    pub fn ensure_chains_per_cluster(&self, cluster_id: &str) -> Result<(), Error> {
        validate_cluster_id(cluster_id)?;
        let mut backend = self.backend.lock();
        require_initialized(&*backend, &Category::ALL)?;
        topology::ensure_cluster_containers(&mut *backend, cluster_id)?;
        Ok(())
    }

    /// Brings every hook and data-plane rule of the cluster up to date,
    /// creating the cluster's containers first if needed.
    #[instrument(skip_all, fields(cluster = %config.cluster_id))]
    pub fn ensure_chain_rules_per_cluster(&self, config: &NetworkConfig) -> Result<(), Error> {
        let rules = ClusterRules::compile(config)?;
        let cluster_id = config.cluster_id.as_str();

        let mut backend = self.backend.lock();
        require_initialized(&*backend, &Category::ALL)?;
        topology::ensure_cluster_containers(&mut *backend, cluster_id)?;
        for category in Category::ALL {
            let changed = reconcile::container(
                &mut *backend,
                &RuleContainer::cluster(category, cluster_id),
                rules.chains.get(category),
            )?;
            let hooked =
                reconcile::hooks(&mut *backend, category, cluster_id, rules.hooks.get(category))?;
            if changed || hooked {
                info!(?category, "Updated rules");
            }
        }
        Ok(())
    }

    /// Brings the rules of the cluster's post-routing container up to date.
    #[instrument(skip_all, fields(cluster = %config.cluster_id))]
    pub fn ensure_postrouting_rules(&self, config: &NetworkConfig) -> Result<(), Error> {
        let nets = config.validate()?;
        self.ensure_cluster_rules(
            Category::Postrouting,
            &nets.cluster_id,
            &rules::postrouting_rules(&nets),
        )
    }

    /// Brings the rules of the cluster's pre-routing container up to date.
    #[instrument(skip_all, fields(cluster = %config.cluster_id))]
    pub fn ensure_prerouting_rules(&self, config: &NetworkConfig) -> Result<(), Error> {
        let nets = config.validate()?;
        self.ensure_cluster_rules(
            Category::Prerouting,
            &nets.cluster_id,
            &rules::prerouting_rules(&nets),
        )
    }

    /// Removes the cluster's containers and every rule that jumps into them.
    ///
    /// Does nothing if the cluster was never configured.
    #[instrument(skip_all, fields(cluster = %config.cluster_id))]
    pub fn remove_iptables_configuration_per_cluster(
        &self,
        config: &NetworkConfig,
    ) -> Result<(), Error> {
        validate_cluster_id(&config.cluster_id)?;
        topology::remove_cluster(&mut *self.backend.lock(), &config.cluster_id)?;
        Ok(())
    }

    /// Removes all state created by the handler, for every cluster.
    #[instrument(skip(self))]
    pub fn terminate(&self) -> Result<(), Error> {
        topology::terminate(&mut *self.backend.lock())?;
        info!("Terminated");
        Ok(())
    }

    /// Lists the rules of a standard chain or of a container owned by the
    /// handler.
    pub fn list_rules_in_chain(&self, chain: &str) -> Result<Vec<String>, Error> {
        let table = Category::ALL
            .into_iter()
            .find(|c| {
                c.standard_chain() == chain
                    || c.global_chain() == chain
                    || c.is_cluster_chain(chain)
            })
            .map(Category::table)
            .ok_or(ValidationError::InvalidParameter {
                field: "chain",
                constraint: "a chain managed by the fabric controller",
            })?;
        let rules = self
            .backend
            .lock()
            .list_rules(&RuleContainer::new(table, chain))?;
        Ok(rules)
    }

    fn ensure_cluster_rules(
        &self,
        category: Category,
        cluster_id: &str,
        desired: &[String],
    ) -> Result<(), Error> {
        let container = RuleContainer::cluster(category, cluster_id);
        let mut backend = self.backend.lock();
        require_initialized(&*backend, &[category])?;
        topology::ensure_container(&mut *backend, &container)?;
        if reconcile::container(&mut *backend, &container, desired)? {
            info!(%container, "Updated rules");
        } else {
            debug!(%container, "Rules are up to date");
        }
        Ok(())
    }
}

/// Fails unless the global containers of `categories` exist, so that no
/// per-cluster state is created on a host that was never initialized or has
/// already been cleaned up.
fn require_initialized<B: Backend + ?Sized>(
    backend: &B,
    categories: &[Category],
) -> Result<(), Error> {
    for &category in categories {
        let global = RuleContainer::global(category);
        if !backend.container_exists(&global)? {
            return Err(Error::Uninitialized(global));
        }
    }
    Ok(())
}
