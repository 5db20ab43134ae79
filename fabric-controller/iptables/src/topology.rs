use crate::{backend::jumps_to, Backend, BackendError, RuleContainer};
use fabric_controller_core::Category;
use tracing::{debug, info};

/// Creates the global containers and hooks them into the standard chains.
pub(crate) fn init<B: Backend + ?Sized>(backend: &mut B) -> Result<(), BackendError> {
    for category in Category::ALL {
        let global = RuleContainer::global(category);
        ensure_container(backend, &global)?;

        let standard = RuleContainer::standard(category);
        let rule = category.global_hook_rule();
        if !backend.rule_exists(&standard, &rule)? {
            backend.insert_rule(&standard, &rule, 1)?;
            info!(container = %standard, %rule, "Inserted hook rule");
        }
    }
    Ok(())
}

/// Creates the cluster's container in every category.
pub(crate) fn ensure_cluster_containers<B: Backend + ?Sized>(
    backend: &mut B,
    cluster_id: &str,
) -> Result<(), BackendError> {
    for category in Category::ALL {
        ensure_container(backend, &RuleContainer::cluster(category, cluster_id))?;
    }
    Ok(())
}

pub(crate) fn ensure_container<B: Backend + ?Sized>(
    backend: &mut B,
    container: &RuleContainer,
) -> Result<(), BackendError> {
    if backend.container_exists(container)? {
        debug!(%container, "Container exists");
        return Ok(());
    }
    backend.new_container(container)?;
    info!(%container, "Created container");
    Ok(())
}

/// Removes the cluster's hook rules and containers.
pub(crate) fn remove_cluster<B: Backend + ?Sized>(
    backend: &mut B,
    cluster_id: &str,
) -> Result<(), BackendError> {
    for category in Category::ALL {
        let chain = RuleContainer::cluster(category, cluster_id);

        let global = RuleContainer::global(category);
        if backend.container_exists(&global)? {
            for rule in backend.list_rules(&global)? {
                if jumps_to(&rule, &chain.name) {
                    backend.delete_rule(&global, &rule)?;
                    debug!(container = %global, %rule, "Deleted hook rule");
                }
            }
        }

        delete_container(backend, &chain)?;
    }
    Ok(())
}

/// Removes every cluster's containers, then the global containers and their
/// hook rules.
pub(crate) fn terminate<B: Backend + ?Sized>(backend: &mut B) -> Result<(), BackendError> {
    for category in Category::ALL {
        let global = RuleContainer::global(category);
        let global_exists = backend.container_exists(&global)?;
        if global_exists {
            backend.clear_container(&global)?;
        }

        for name in backend.list_containers(category.table())? {
            if category.is_cluster_chain(&name) {
                delete_container(backend, &RuleContainer::new(category.table(), name))?;
            }
        }

        let standard = RuleContainer::standard(category);
        let rule = category.global_hook_rule();
        while backend.rule_exists(&standard, &rule)? {
            backend.delete_rule(&standard, &rule)?;
            info!(container = %standard, %rule, "Deleted hook rule");
        }

        if global_exists {
            backend.delete_container(&global)?;
            info!(container = %global, "Deleted container");
        }
    }
    Ok(())
}

fn delete_container<B: Backend + ?Sized>(
    backend: &mut B,
    container: &RuleContainer,
) -> Result<(), BackendError> {
    if !backend.container_exists(container)? {
        return Ok(());
    }
    backend.clear_container(container)?;
    backend.delete_container(container)?;
    info!(%container, "Deleted container");
    Ok(())
}
