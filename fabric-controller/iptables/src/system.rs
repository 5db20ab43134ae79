use crate::{Backend, BackendError, RuleContainer};

/// Programs the host through the `iptables` (or `ip6tables`) binary.
pub struct IptablesBackend {
    ipt: iptables::IPTables,
}

// === impl IptablesBackend ===

impl IptablesBackend {
    pub fn new(ipv6: bool) -> Result<Self, BackendError> {
        let ipt = iptables::new(ipv6).map_err(|e| {
            let name = if ipv6 { "ip6tables" } else { "iptables" };
            BackendError::new("initialize", name, e.to_string())
        })?;
        Ok(Self { ipt })
    }
}

impl Backend for IptablesBackend {
    fn list_containers(&self, table: &str) -> Result<Vec<String>, BackendError> {
        self.ipt
            .list_chains(table)
            .map_err(|e| BackendError::new("list chains of", table, e.to_string()))
    }

    fn container_exists(&self, c: &RuleContainer) -> Result<bool, BackendError> {
        self.ipt
            .chain_exists(c.table, &c.name)
            .map_err(|e| BackendError::new("look up", c, e.to_string()))
    }

    fn new_container(&mut self, c: &RuleContainer) -> Result<(), BackendError> {
        self.ipt
            .new_chain(c.table, &c.name)
            .map_err(|e| BackendError::new("create", c, e.to_string()))
    }

    fn clear_container(&mut self, c: &RuleContainer) -> Result<(), BackendError> {
        self.ipt
            .flush_chain(c.table, &c.name)
            .map_err(|e| BackendError::new("flush", c, e.to_string()))
    }

    fn delete_container(&mut self, c: &RuleContainer) -> Result<(), BackendError> {
        self.ipt
            .delete_chain(c.table, &c.name)
            .map_err(|e| BackendError::new("delete", c, e.to_string()))
    }

    fn list_rules(&self, c: &RuleContainer) -> Result<Vec<String>, BackendError> {
        let lines = self
            .ipt
            .list(c.table, &c.name)
            .map_err(|e| BackendError::new("list rules of", c, e.to_string()))?;
        Ok(parse_rules(&c.name, lines))
    }

    fn rule_exists(&self, c: &RuleContainer, rule: &str) -> Result<bool, BackendError> {
        self.ipt
            .exists(c.table, &c.name, rule)
            .map_err(|e| BackendError::new("check rule in", c, e.to_string()))
    }

    fn append_rule(&mut self, c: &RuleContainer, rule: &str) -> Result<(), BackendError> {
        self.ipt
            .append(c.table, &c.name, rule)
            .map_err(|e| BackendError::new("append rule to", c, e.to_string()))
    }

    fn insert_rule(
        &mut self,
        c: &RuleContainer,
        rule: &str,
        position: usize,
    ) -> Result<(), BackendError> {
        let position = i32::try_from(position)
            .map_err(|_| BackendError::new("insert rule into", c, "position out of range"))?;
        self.ipt
            .insert(c.table, &c.name, rule, position)
            .map_err(|e| BackendError::new("insert rule into", c, e.to_string()))
    }

    fn delete_rule(&mut self, c: &RuleContainer, rule: &str) -> Result<(), BackendError> {
        self.ipt
            .delete(c.table, &c.name, rule)
            .map_err(|e| BackendError::new("delete rule from", c, e.to_string()))
    }
}

/// Extracts rule specifications from `iptables -S <chain>` output.
///
/// The output starts with the chain's declaration (`-N` or `-P`), followed by
/// one `-A <chain> <rule>` line per rule.
fn parse_rules(chain: &str, lines: Vec<String>) -> Vec<String> {
    let prefix = format!("-A {chain} ");
    lines
        .into_iter()
        .filter_map(|line| line.strip_prefix(&prefix).map(|r| r.trim().to_string()))
        .collect()
}
