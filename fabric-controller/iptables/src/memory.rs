//! An in-memory packet filter.
//!
//! Models the parts of iptables' behavior the engine depends on: built-in
//! chains that cannot be removed, chains that cannot be deleted while they
//! still hold rules or are the target of a jump, and jumps that must name an
//! existing chain or a known target.

use crate::{backend::jumps_to, Backend, BackendError, RuleContainer};

const TARGETS: &[&str] = &[
    "ACCEPT",
    "DROP",
    "REJECT",
    "RETURN",
    "LOG",
    "MARK",
    "MASQUERADE",
    "SNAT",
    "DNAT",
    "NETMAP",
];

#[derive(Clone, Debug)]
pub struct MemoryBackend {
    tables: Vec<Table>,
    writes: usize,
    fail_after: Option<usize>,
}

#[derive(Clone, Debug)]
struct Table {
    name: &'static str,
    chains: Vec<Chain>,
}

#[derive(Clone, Debug)]
struct Chain {
    name: String,
    builtin: bool,
    rules: Vec<String>,
}

// === impl MemoryBackend ===

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            tables: vec![
                Table::new("filter", &["INPUT", "FORWARD", "OUTPUT"]),
                Table::new("nat", &["PREROUTING", "INPUT", "OUTPUT", "POSTROUTING"]),
                Table::new("mangle", &["PREROUTING", "INPUT", "FORWARD", "OUTPUT", "POSTROUTING"]),
            ],
            writes: 0,
            fail_after: None,
        }
    }
}

impl MemoryBackend {
    /// The number of successful mutating operations performed so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Causes every mutating operation to fail once `n` more have succeeded.
    pub fn fail_writes_after(&mut self, n: usize) {
        self.fail_after = Some(self.writes + n);
    }

    pub fn heal(&mut self) {
        self.fail_after = None;
    }

    fn table(&self, name: &str) -> Result<&Table, BackendError> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| BackendError::new("find", name, "table does not exist"))
    }

    fn chain(&self, c: &RuleContainer) -> Result<&Chain, BackendError> {
        self.table(c.table)?
            .chains
            .iter()
            .find(|ch| ch.name == c.name)
            .ok_or_else(|| BackendError::new("find", c, "no chain by that name"))
    }

    fn write(&mut self, op: &'static str, c: &RuleContainer) -> Result<&mut Table, BackendError> {
        if self.fail_after.is_some_and(|n| self.writes >= n) {
            return Err(BackendError::new(op, c, "injected failure"));
        }
        tracing::debug!(%op, container = %c, "Writing");
        self.writes += 1;
        self.tables
            .iter_mut()
            .find(|t| t.name == c.table)
            .ok_or_else(|| BackendError::new(op, c, "table does not exist"))
    }

    fn check_target(
        &self,
        op: &'static str,
        c: &RuleContainer,
        rule: &str,
    ) -> Result<(), BackendError> {
        let table = self.table(c.table)?;
        let mut tokens = rule.split_whitespace();
        while let Some(token) = tokens.next() {
            if token == "-j" {
                let target = tokens.next().unwrap_or_default();
                if TARGETS.contains(&target) || table.chains.iter().any(|ch| ch.name == target) {
                    return Ok(());
                }
                return Err(BackendError::new(op, c, format!("no chain/target named {target:?}")));
            }
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn list_containers(&self, table: &str) -> Result<Vec<String>, BackendError> {
        Ok(self
            .table(table)?
            .chains
            .iter()
            .map(|ch| ch.name.clone())
            .collect())
    }

    fn container_exists(&self, c: &RuleContainer) -> Result<bool, BackendError> {
        Ok(self
            .table(c.table)?
            .chains
            .iter()
            .any(|ch| ch.name == c.name))
    }

    fn new_container(&mut self, c: &RuleContainer) -> Result<(), BackendError> {
        if self.container_exists(c)? {
            return Err(BackendError::new("create", c, "chain already exists"));
        }
        self.write("create", c)?.chains.push(Chain {
            name: c.name.clone(),
            builtin: false,
            rules: vec![],
        });
        Ok(())
    }

    fn clear_container(&mut self, c: &RuleContainer) -> Result<(), BackendError> {
        self.chain(c)?;
        let table = self.write("flush", c)?;
        if let Some(chain) = table.chains.iter_mut().find(|ch| ch.name == c.name) {
            chain.rules.clear();
        }
        Ok(())
    }

    fn delete_container(&mut self, c: &RuleContainer) -> Result<(), BackendError> {
        let chain = self.chain(c)?;
        if chain.builtin {
            return Err(BackendError::new("delete", c, "cannot delete a built-in chain"));
        }
        if !chain.rules.is_empty() {
            return Err(BackendError::new("delete", c, "chain is not empty"));
        }
        let referenced = self
            .table(c.table)?
            .chains
            .iter()
            .any(|ch| ch.rules.iter().any(|r| jumps_to(r, &c.name)));
        if referenced {
            return Err(BackendError::new("delete", c, "chain is referenced by a rule"));
        }
        self.write("delete", c)?.chains.retain(|ch| ch.name != c.name);
        Ok(())
    }

    fn list_rules(&self, c: &RuleContainer) -> Result<Vec<String>, BackendError> {
        Ok(self.chain(c)?.rules.clone())
    }

    fn rule_exists(&self, c: &RuleContainer, rule: &str) -> Result<bool, BackendError> {
        Ok(self.chain(c)?.rules.iter().any(|r| r == rule))
    }

    fn append_rule(&mut self, c: &RuleContainer, rule: &str) -> Result<(), BackendError> {
        self.chain(c)?;
        self.check_target("append rule to", c, rule)?;
        let table = self.write("append rule to", c)?;
        if let Some(chain) = table.chains.iter_mut().find(|ch| ch.name == c.name) {
            chain.rules.push(rule.to_string());
        }
        Ok(())
    }

    fn insert_rule(
        &mut self,
        c: &RuleContainer,
        rule: &str,
        position: usize,
    ) -> Result<(), BackendError> {
        let len = self.chain(c)?.rules.len();
        if position == 0 || position > len + 1 {
            return Err(BackendError::new("insert rule into", c, "index of insertion too big"));
        }
        self.check_target("insert rule into", c, rule)?;
        let table = self.write("insert rule into", c)?;
        if let Some(chain) = table.chains.iter_mut().find(|ch| ch.name == c.name) {
            chain.rules.insert(position - 1, rule.to_string());
        }
        Ok(())
    }

    fn delete_rule(&mut self, c: &RuleContainer, rule: &str) -> Result<(), BackendError> {
        let idx = self
            .chain(c)?
            .rules
            .iter()
            .position(|r| r == rule)
            .ok_or_else(|| {
                BackendError::new("delete rule from", c, "no matching rule exists in that chain")
            })?;
        let table = self.write("delete rule from", c)?;
        if let Some(chain) = table.chains.iter_mut().find(|ch| ch.name == c.name) {
            chain.rules.remove(idx);
        }
        Ok(())
    }
}

// === impl Table ===

impl Table {
    fn new(name: &'static str, builtins: &[&str]) -> Self {
        Self {
            name,
            chains: builtins
                .iter()
                .map(|name| Chain {
                    name: name.to_string(),
                    builtin: true,
                    rules: vec![],
                })
                .collect(),
        }
    }
}
