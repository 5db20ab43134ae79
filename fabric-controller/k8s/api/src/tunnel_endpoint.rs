use fabric_controller_core::NetworkConfig;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes the tunnel to a single remote cluster and the address ranges
/// through which its pods are reachable.
///
/// The remote cluster publishes its addresses. The status records the
/// remapping negotiated between the two clusters; until it is set, the
/// endpoint is not ready to be programmed.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "net.fabric.dev",
    version = "v1alpha1",
    kind = "TunnelEndpoint",
    status = "TunnelEndpointStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TunnelEndpointSpec {
    #[serde(rename = "clusterID")]
    pub cluster_id: String,

    /// The remote cluster's pod network, as seen by the remote cluster.
    #[serde(rename = "podCIDR")]
    pub pod_cidr: String,

    /// The remote cluster's external network, as seen by the remote cluster.
    #[serde(rename = "externalCIDR", default)]
    pub external_cidr: String,

    #[serde(rename = "endpointIP", default)]
    pub endpoint_ip: String,

    #[serde(default)]
    pub backend_type: String,

    #[serde(default)]
    pub backend_config: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct TunnelEndpointStatus {
    #[serde(rename = "localPodCIDR", default)]
    pub local_pod_cidr: String,

    #[serde(rename = "localNATPodCIDR", default)]
    pub local_nat_pod_cidr: String,

    #[serde(rename = "remoteNATPodCIDR", default)]
    pub remote_nat_pod_cidr: String,

    #[serde(rename = "localExternalCIDR", default)]
    pub local_external_cidr: String,

    #[serde(rename = "localNATExternalCIDR", default)]
    pub local_nat_external_cidr: String,

    #[serde(rename = "remoteNATExternalCIDR", default)]
    pub remote_nat_external_cidr: String,
}

// === impl TunnelEndpoint ===

impl TunnelEndpoint {
    /// Returns the endpoint's network configuration, or `None` if the
    /// remapping has not been negotiated yet.
    ///
    /// Values are passed through unchecked; they are validated when applied.
    pub fn network_config(&self) -> Option<NetworkConfig> {
        let status = self.status.as_ref()?;
        Some(NetworkConfig {
            cluster_id: self.spec.cluster_id.clone(),
            pod_cidr: self.spec.pod_cidr.clone(),
            external_cidr: self.spec.external_cidr.clone(),
            local_pod_cidr: status.local_pod_cidr.clone(),
            local_nat_pod_cidr: status.local_nat_pod_cidr.clone(),
            remote_nat_pod_cidr: status.remote_nat_pod_cidr.clone(),
            local_external_cidr: status.local_external_cidr.clone(),
            local_nat_external_cidr: status.local_nat_external_cidr.clone(),
            remote_nat_external_cidr: status.remote_nat_external_cidr.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn endpoint(status: Option<serde_json::Value>) -> TunnelEndpoint {
        let mut obj = serde_json::json!({
            "apiVersion": "net.fabric.dev/v1alpha1",
            "kind": "TunnelEndpoint",
            "metadata": { "name": "tep-cluster1", "namespace": "fabric" },
            "spec": {
                "clusterID": "cluster1-6f2b",
                "podCIDR": "10.0.0.0/24",
                "externalCIDR": "10.0.1.0/24",
                "endpointIP": "172.18.0.3",
                "backendType": "wireguard",
                "backendConfig": { "port": "5871" },
            },
        });
        if let Some(status) = status {
            obj["status"] = status;
        }
        serde_json::from_value(obj).expect("valid TunnelEndpoint")
    }

    #[test]
    fn without_status() {
        let tep = endpoint(None);
        assert_eq!(tep.spec.backend_config["port"], "5871");
        assert_eq!(tep.network_config(), None);
    }

    #[test]
    fn with_status() {
        let tep = endpoint(Some(serde_json::json!({
            "localPodCIDR": "192.168.0.0/24",
            "localNATPodCIDR": "192.168.1.0/24",
            "remoteNATPodCIDR": "None",
            "localExternalCIDR": "192.168.3.0/24",
            "localNATExternalCIDR": "192.168.4.0/24",
            "remoteNATExternalCIDR": "None",
        })));
        assert_eq!(
            tep.network_config(),
            Some(NetworkConfig {
                cluster_id: "cluster1-6f2b".to_string(),
                pod_cidr: "10.0.0.0/24".to_string(),
                external_cidr: "10.0.1.0/24".to_string(),
                local_pod_cidr: "192.168.0.0/24".to_string(),
                local_nat_pod_cidr: "192.168.1.0/24".to_string(),
                remote_nat_pod_cidr: "None".to_string(),
                local_external_cidr: "192.168.3.0/24".to_string(),
                local_nat_external_cidr: "192.168.4.0/24".to_string(),
                remote_nat_external_cidr: "None".to_string(),
            })
        );
    }

    #[test]
    fn missing_status_fields_are_empty() {
        let tep = endpoint(Some(serde_json::json!({
            "localPodCIDR": "192.168.0.0/24",
        })));
        let config = tep.network_config().expect("status is set");
        assert_eq!(config.local_pod_cidr, "192.168.0.0/24");
        assert!(config.local_nat_pod_cidr.is_empty());
        assert!(config.local_external_cidr.is_empty());
    }

    #[test]
    fn crd_names() {
        use kube::CustomResourceExt;
        let crd = TunnelEndpoint::crd();
        assert_eq!(
            crd.metadata.name.as_deref(),
            Some("tunnelendpoints.net.fabric.dev")
        );
        assert_eq!(crd.spec.scope, "Namespaced");
    }
}
