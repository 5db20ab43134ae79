use fabric_controller_core::Category;
use std::fmt;

/// Identifies a chain within a table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleContainer {
    pub table: &'static str,
    pub name: String,
}

/// The host packet filter.
///
/// Rules are opaque strings at this boundary. Positions are 1-based, as in
/// iptables.
pub trait Backend: Send {
    fn list_containers(&self, table: &str) -> Result<Vec<String>, BackendError>;

    fn container_exists(&self, container: &RuleContainer) -> Result<bool, BackendError>;

    fn new_container(&mut self, container: &RuleContainer) -> Result<(), BackendError>;

    /// Removes every rule from `container`.
    fn clear_container(&mut self, container: &RuleContainer) -> Result<(), BackendError>;

    fn delete_container(&mut self, container: &RuleContainer) -> Result<(), BackendError>;

    /// Lists the rules of `container`, in evaluation order.
    fn list_rules(&self, container: &RuleContainer) -> Result<Vec<String>, BackendError>;

    fn rule_exists(&self, container: &RuleContainer, rule: &str) -> Result<bool, BackendError>;

    fn append_rule(&mut self, container: &RuleContainer, rule: &str) -> Result<(), BackendError>;

    fn insert_rule(
        &mut self,
        container: &RuleContainer,
        rule: &str,
        position: usize,
    ) -> Result<(), BackendError>;

    /// Deletes the first rule in `container` equal to `rule`.
    fn delete_rule(&mut self, container: &RuleContainer, rule: &str) -> Result<(), BackendError>;
}

/// The packet filter rejected an operation.
#[derive(Debug, thiserror::Error)]
#[error("failed to {op} {container}: {source}")]
pub struct BackendError {
    op: &'static str,
    container: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn list_containers(&self, table: &str) -> Result<Vec<String>, BackendError> {
        (**self).list_containers(table)
    }

    fn container_exists(&self, container: &RuleContainer) -> Result<bool, BackendError> {
        (**self).container_exists(container)
    }

    fn new_container(&mut self, container: &RuleContainer) -> Result<(), BackendError> {
        (**self).new_container(container)
    }

    fn clear_container(&mut self, container: &RuleContainer) -> Result<(), BackendError> {
        (**self).clear_container(container)
    }

    fn delete_container(&mut self, container: &RuleContainer) -> Result<(), BackendError> {
        (**self).delete_container(container)
    }

    fn list_rules(&self, container: &RuleContainer) -> Result<Vec<String>, BackendError> {
        (**self).list_rules(container)
    }

    fn rule_exists(&self, container: &RuleContainer, rule: &str) -> Result<bool, BackendError> {
        (**self).rule_exists(container, rule)
    }

    fn append_rule(&mut self, container: &RuleContainer, rule: &str) -> Result<(), BackendError> {
        (**self).append_rule(container, rule)
    }

    fn insert_rule(
        &mut self,
        container: &RuleContainer,
        rule: &str,
        position: usize,
    ) -> Result<(), BackendError> {
        (**self).insert_rule(container, rule, position)
    }

    fn delete_rule(&mut self, container: &RuleContainer, rule: &str) -> Result<(), BackendError> {
        (**self).delete_rule(container, rule)
    }
}

// === impl RuleContainer ===

impl RuleContainer {
    pub fn new(table: &'static str, name: impl Into<String>) -> Self {
        Self {
            table,
            name: name.into(),
        }
    }

    /// The built-in chain that `category`'s global container hooks into.
    pub fn standard(category: Category) -> Self {
        Self::new(category.table(), category.standard_chain())
    }

    pub fn global(category: Category) -> Self {
        Self::new(category.table(), category.global_chain())
    }

    pub fn cluster(category: Category, cluster_id: &str) -> Self {
        Self::new(category.table(), category.cluster_chain(cluster_id))
    }
}

impl fmt::Display for RuleContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.name)
    }
}

// === impl BackendError ===

impl BackendError {
    pub fn new(
        op: &'static str,
        container: impl ToString,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            op,
            container: container.to_string(),
            source: source.into(),
        }
    }

    pub fn op(&self) -> &'static str {
        self.op
    }
}

/// Returns true if `rule` jumps to `chain`.
pub(crate) fn jumps_to(rule: &str, chain: &str) -> bool {
    let mut tokens = rule.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "-j" {
            return tokens.next() == Some(chain);
        }
    }
    false
}
