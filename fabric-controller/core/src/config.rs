use crate::{chain, cidr};
use ipnet::IpNet;

/// Marks an address class for which no remapping is configured.
pub const DEFAULT_CIDR_VALUE: &str = "None";

pub(crate) const STRING_NOT_EMPTY: &str = "a non empty string";
pub(crate) const VALID_CIDR: &str = "a valid network CIDR";

pub(crate) const CLUSTER_ID: &str = "clusterID";
const POD_CIDR: &str = "podCIDR";
const EXTERNAL_CIDR: &str = "externalCIDR";
const LOCAL_POD_CIDR: &str = "localPodCIDR";
const LOCAL_NAT_POD_CIDR: &str = "localNATPodCIDR";
const REMOTE_NAT_POD_CIDR: &str = "remoteNATPodCIDR";
const LOCAL_EXTERNAL_CIDR: &str = "localExternalCIDR";
const LOCAL_NAT_EXTERNAL_CIDR: &str = "localNATExternalCIDR";
const REMOTE_NAT_EXTERNAL_CIDR: &str = "remoteNATExternalCIDR";

/// The network configuration negotiated with a single remote cluster.
///
/// Every CIDR-typed field holds either a network in `address/prefix` form or
/// [`DEFAULT_CIDR_VALUE`]. Fields are kept as the strings received so that
/// validation can report the offending field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NetworkConfig {
    pub cluster_id: String,

    /// The remote cluster's pod network, as seen by the remote cluster.
    pub pod_cidr: String,

    /// The remote cluster's external network, as seen by the remote cluster.
    pub external_cidr: String,

    pub local_pod_cidr: String,
    pub local_nat_pod_cidr: String,
    pub remote_nat_pod_cidr: String,

    pub local_external_cidr: String,
    pub local_nat_external_cidr: String,
    pub remote_nat_external_cidr: String,
}

/// A validated [`NetworkConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Networks {
    pub cluster_id: String,
    pub local_pod: IpNet,

    /// The range local pods are remapped into, if any.
    pub local_nat_pod: Option<IpNet>,

    /// The range the remote cluster's pods are reachable at from this cluster.
    pub remote_pod: IpNet,

    pub local_external: Option<IpNet>,
    pub local_nat_external: Option<IpNet>,
    pub remote_external: Option<IpNet>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must be {constraint}")]
    InvalidParameter {
        field: &'static str,
        constraint: &'static str,
    },

    #[error("{field} must be {constraint}")]
    InvalidNetworkRange {
        field: &'static str,
        constraint: &'static str,
        value: String,
    },
}

// === impl NetworkConfig ===

impl NetworkConfig {
    /// Validates every field, failing on the first invalid one.
    ///
    /// Fields are checked in a fixed order: the cluster identifier, the local
    /// pod range, the local NAT range, then the remote range that traffic will
    /// be addressed to. External-address fields are checked last.
    pub fn validate(&self) -> Result<Networks, ValidationError> {
        chain::validate_cluster_id(&self.cluster_id)?;

        let local_pod = required(LOCAL_POD_CIDR, &self.local_pod_cidr)?;
        let local_nat_pod = optional(LOCAL_NAT_POD_CIDR, &self.local_nat_pod_cidr)?;
        let remote_pod = match optional(REMOTE_NAT_POD_CIDR, &self.remote_nat_pod_cidr)? {
            Some(net) => net,
            None => required(POD_CIDR, &self.pod_cidr)?,
        };

        let local_external = optional_or_empty(LOCAL_EXTERNAL_CIDR, &self.local_external_cidr)?;
        let local_nat_external =
            optional_or_empty(LOCAL_NAT_EXTERNAL_CIDR, &self.local_nat_external_cidr)?;
        let remote_external =
            match optional_or_empty(REMOTE_NAT_EXTERNAL_CIDR, &self.remote_nat_external_cidr)? {
                Some(net) => Some(net),
                None => optional_or_empty(EXTERNAL_CIDR, &self.external_cidr)?,
            };

        Ok(Networks {
            cluster_id: self.cluster_id.clone(),
            local_pod,
            local_nat_pod,
            remote_pod,
            local_external,
            local_nat_external,
            remote_external,
        })
    }
}

// === impl ValidationError ===

impl ValidationError {
    /// The name of the field that failed validation.
    pub fn field(&self) -> &'static str {
        match self {
            Self::InvalidParameter { field, .. } | Self::InvalidNetworkRange { field, .. } => {
                *field
            }
        }
    }
}

fn required(field: &'static str, value: &str) -> Result<IpNet, ValidationError> {
    cidr::validate(value)
        .map(|net| net.trunc())
        .map_err(|_| ValidationError::InvalidNetworkRange {
            field,
            constraint: VALID_CIDR,
            value: value.to_string(),
        })
}

fn optional(field: &'static str, value: &str) -> Result<Option<IpNet>, ValidationError> {
    if value == DEFAULT_CIDR_VALUE {
        return Ok(None);
    }
    required(field, value).map(Some)
}

// External-address fields may be omitted entirely.
fn optional_or_empty(field: &'static str, value: &str) -> Result<Option<IpNet>, ValidationError> {
    if value.is_empty() {
        return Ok(None);
    }
    optional(field, value)
}
