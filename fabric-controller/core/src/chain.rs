use crate::ValidationError;

/// The longest chain name accepted by iptables.
pub const MAX_CHAIN_NAME_LEN: usize = 28;

/// The kinds of rule containers managed by the engine.
///
/// Each category owns one global container, hooked into a standard chain, and
/// one container per remote cluster.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Postrouting,
    Prerouting,
    Forward,
    Input,
}

// === impl Category ===

impl Category {
    pub const ALL: [Self; 4] = [
        Self::Postrouting,
        Self::Prerouting,
        Self::Forward,
        Self::Input,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Self::Postrouting | Self::Prerouting => "nat",
            Self::Forward | Self::Input => "filter",
        }
    }

    /// The built-in chain the global container is hooked into.
    pub fn standard_chain(self) -> &'static str {
        match self {
            Self::Postrouting => "POSTROUTING",
            Self::Prerouting => "PREROUTING",
            Self::Forward => "FORWARD",
            Self::Input => "INPUT",
        }
    }

    pub fn global_chain(self) -> &'static str {
        match self {
            Self::Postrouting => "FABRIC-POSTROUTING",
            Self::Prerouting => "FABRIC-PREROUTING",
            Self::Forward => "FABRIC-FORWARD",
            Self::Input => "FABRIC-INPUT",
        }
    }

    pub fn cluster_chain_prefix(self) -> &'static str {
        match self {
            Self::Postrouting => "FABRIC-PSTRT-CLS-",
            Self::Prerouting => "FABRIC-PRRT-CLS-",
            Self::Forward => "FABRIC-FRWD-CLS-",
            Self::Input => "FABRIC-INPT-CLS-",
        }
    }

    pub fn cluster_chain(self, cluster_id: &str) -> String {
        format!(
            "{}{}",
            self.cluster_chain_prefix(),
            short_cluster_id(cluster_id)
        )
    }

    /// Returns true if `chain` is a per-cluster container of this category.
    pub fn is_cluster_chain(self, chain: &str) -> bool {
        chain
            .strip_prefix(self.cluster_chain_prefix())
            .is_some_and(|id| !id.is_empty())
    }

    /// The rule that jumps from the standard chain into the global container.
    pub fn global_hook_rule(self) -> String {
        format!("-j {}", self.global_chain())
    }
}

/// Returns the portion of a cluster identifier that precedes the first `-`.
pub fn short_cluster_id(cluster_id: &str) -> &str {
    cluster_id.split('-').next().unwrap_or(cluster_id)
}

/// Checks that `cluster_id` can name the per-cluster containers.
pub fn validate_cluster_id(cluster_id: &str) -> Result<(), ValidationError> {
    if cluster_id.is_empty() {
        return Err(ValidationError::InvalidParameter {
            field: crate::config::CLUSTER_ID,
            constraint: crate::config::STRING_NOT_EMPTY,
        });
    }

    let short = short_cluster_id(cluster_id);
    if short.is_empty() {
        return Err(ValidationError::InvalidParameter {
            field: crate::config::CLUSTER_ID,
            constraint: "an identifier that does not start with '-'",
        });
    }

    let longest = Category::ALL
        .iter()
        .map(|c| c.cluster_chain_prefix().len())
        .max()
        .unwrap_or_default();
    if longest + short.len() > MAX_CHAIN_NAME_LEN {
        return Err(ValidationError::InvalidParameter {
            field: crate::config::CLUSTER_ID,
            constraint: "short enough to name a chain",
        });
    }

    Ok(())
}
