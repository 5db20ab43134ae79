//! Compiles a cluster's [`Networks`] into rule strings.
//!
//! Rules are rendered exactly as `iptables -S` prints them back, so that the
//! strings read from the host compare equal to the compiled ones.

use crate::{cidr, Category, NetworkConfig, Networks, ValidationError};

/// Rule strings, grouped by container category.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleSet {
    pub postrouting: Vec<String>,
    pub prerouting: Vec<String>,
    pub forward: Vec<String>,
    pub input: Vec<String>,
}

/// Every rule a remote cluster requires.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterRules {
    /// Rules placed in the global containers that jump into the cluster's
    /// containers.
    pub hooks: RuleSet,

    /// Rules placed in the cluster's own containers.
    pub chains: RuleSet,
}

// === impl RuleSet ===

impl RuleSet {
    pub fn get(&self, category: Category) -> &[String] {
        match category {
            Category::Postrouting => &self.postrouting,
            Category::Prerouting => &self.prerouting,
            Category::Forward => &self.forward,
            Category::Input => &self.input,
        }
    }
}

// === impl ClusterRules ===

impl ClusterRules {
    /// Validates `config` and compiles all of its rules.
    pub fn compile(config: &NetworkConfig) -> Result<Self, ValidationError> {
        let nets = config.validate()?;
        Ok(Self {
            hooks: hook_rules(&nets),
            chains: RuleSet {
                postrouting: postrouting_rules(&nets),
                prerouting: prerouting_rules(&nets),
                forward: vec![],
                input: vec![],
            },
        })
    }
}

/// Rules in the global containers that divert the cluster's traffic into the
/// cluster's containers.
pub fn hook_rules(nets: &Networks) -> RuleSet {
    let remote = nets.remote_pod;
    let jump = |category: Category| category.cluster_chain(&nets.cluster_id);

    let prerouting = match nets.local_nat_pod {
        Some(local_nat) => vec![format!(
            "-s {remote} -d {local_nat} -j {}",
            jump(Category::Prerouting)
        )],
        None => vec![],
    };

    RuleSet {
        postrouting: vec![format!("-d {remote} -j {}", jump(Category::Postrouting))],
        prerouting,
        forward: vec![format!("-d {remote} -j {}", jump(Category::Forward))],
        input: vec![format!("-d {remote} -j {}", jump(Category::Input))],
    }
}

/// Source translation of traffic leaving local pods towards the remote cluster.
///
/// Traffic from the local pod range is statically mapped into the local NAT
/// range when one is configured. Any other traffic is masqueraded behind the
/// first address of the range the remote cluster knows this cluster by.
pub fn postrouting_rules(nets: &Networks) -> Vec<String> {
    let local = nets.local_pod;
    let remote = nets.remote_pod;

    match nets.local_nat_pod {
        None => vec![format!(
            "! -s {local} -d {remote} -j SNAT --to-source {}",
            cidr::first_host(&local)
        )],
        Some(local_nat) => vec![
            format!("-s {local} -d {remote} -j NETMAP --to {local_nat}"),
            format!(
                "! -s {local} -d {remote} -j SNAT --to-source {}",
                cidr::first_host(&local_nat)
            ),
        ],
    }
}

/// Destination translation of remote traffic addressed to the local NAT range.
pub fn prerouting_rules(nets: &Networks) -> Vec<String> {
    match nets.local_nat_pod {
        Some(local_nat) => vec![format!(
            "-s {} -d {local_nat} -j NETMAP --to {}",
            nets.remote_pod, nets.local_pod
        )],
        None => vec![],
    }
}
