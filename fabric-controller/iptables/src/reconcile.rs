//! Moves a container's rules to a desired set with the fewest edits.

use crate::{backend::jumps_to, Backend, BackendError, RuleContainer};
use ahash::AHashSet as HashSet;
use fabric_controller_core::Category;

/// The edits that turn a container's current rules into a desired set.
///
/// Rules are compared by exact string equality; their positions are not
/// considered. Repeated copies of a desired rule are removed so that a single
/// copy remains.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delta<'r> {
    pub remove: Vec<&'r str>,
    pub add: Vec<&'r str>,
}

// === impl Delta ===

impl<'r> Delta<'r> {
    pub fn new(current: &'r [String], desired: &'r [String]) -> Self {
        let wanted = desired.iter().map(String::as_str).collect::<HashSet<_>>();

        let mut present = HashSet::new();
        let mut remove = Vec::new();
        for rule in current.iter().map(String::as_str) {
            if !wanted.contains(rule) || !present.insert(rule) {
                remove.push(rule);
            }
        }

        let mut add = Vec::new();
        for rule in desired.iter().map(String::as_str) {
            if present.insert(rule) {
                add.push(rule);
            }
        }

        Self { remove, add }
    }

    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }

    /// Deletes stale rules, then appends missing ones.
    ///
    /// Stops at the first failure. Edits made before the failure are kept.
    pub fn apply<B: Backend + ?Sized>(
        &self,
        backend: &mut B,
        container: &RuleContainer,
    ) -> Result<(), BackendError> {
        for rule in &self.remove {
            backend.delete_rule(container, rule)?;
            tracing::debug!(%container, %rule, "Deleted rule");
        }
        for rule in &self.add {
            backend.append_rule(container, rule)?;
            tracing::debug!(%container, %rule, "Appended rule");
        }
        Ok(())
    }
}

/// Reconciles all of `container`'s rules with `desired`.
pub(crate) fn container<B: Backend + ?Sized>(
    backend: &mut B,
    container: &RuleContainer,
    desired: &[String],
) -> Result<bool, BackendError> {
    let current = backend.list_rules(container)?;
    let delta = Delta::new(&current, desired);
    delta.apply(backend, container)?;
    Ok(!delta.is_empty())
}

/// Reconciles the rules of `category`'s global container that jump into the
/// cluster's container, leaving other clusters' rules alone.
pub(crate) fn hooks<B: Backend + ?Sized>(
    backend: &mut B,
    category: Category,
    cluster_id: &str,
    desired: &[String],
) -> Result<bool, BackendError> {
    let global = RuleContainer::global(category);
    let chain = category.cluster_chain(cluster_id);
    let current = backend
        .list_rules(&global)?
        .into_iter()
        .filter(|rule| jumps_to(rule, &chain))
        .collect::<Vec<_>>();
    let delta = Delta::new(&current, desired);
    delta.apply(backend, &global)?;
    Ok(!delta.is_empty())
}
