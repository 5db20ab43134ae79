use crate::{metrics::Outcome, Controller, ControllerMetrics, Index, Op, SharedIndex, Update};
use fabric_controller_core::{NetworkConfig, DEFAULT_CIDR_VALUE};
use fabric_controller_iptables::{Handler, MemoryBackend};
use fabric_controller_k8s_api::{TunnelEndpoint, TunnelEndpointSpec, TunnelEndpointStatus};
use kubert::index::IndexNamespacedResource;
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::Arc;
use tokio::{
    sync::mpsc::{self, error::TryRecvError, UnboundedReceiver},
    task::JoinHandle,
    time::{self, Duration},
};

const NAMESPACE: &str = "fabric";
const CLUSTER_ID: &str = "cluster1";

fn status() -> TunnelEndpointStatus {
    TunnelEndpointStatus {
        local_pod_cidr: "192.168.0.0/24".to_string(),
        local_nat_pod_cidr: "192.168.1.0/24".to_string(),
        remote_nat_pod_cidr: "10.60.0.0/24".to_string(),
        local_external_cidr: "192.168.3.0/24".to_string(),
        local_nat_external_cidr: "192.168.4.0/24".to_string(),
        remote_nat_external_cidr: "192.168.5.0/24".to_string(),
    }
}

fn endpoint(name: &str, status: Option<TunnelEndpointStatus>) -> TunnelEndpoint {
    let mut tep = TunnelEndpoint::new(
        name,
        TunnelEndpointSpec {
            cluster_id: CLUSTER_ID.to_string(),
            pod_cidr: "10.0.0.0/24".to_string(),
            external_cidr: "10.0.1.0/24".to_string(),
            endpoint_ip: "172.18.0.3".to_string(),
            backend_type: "wireguard".to_string(),
            backend_config: Default::default(),
        },
    );
    tep.metadata.namespace = Some(NAMESPACE.to_string());
    tep.status = status;
    tep
}

fn config(status: &TunnelEndpointStatus) -> NetworkConfig {
    endpoint("tep", Some(status.clone()))
        .network_config()
        .expect("status is set")
}

fn index() -> (SharedIndex, UnboundedReceiver<Update>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Index::shared(tx), rx)
}

fn recv(rx: &mut UnboundedReceiver<Update>) -> (Op, NetworkConfig) {
    let Update { op, config, .. } = rx.try_recv().expect("update must be published");
    (op, config)
}

#[test]
fn publishes_configure_for_new_endpoints() {
    let (index, mut rx) = index();
    index.write().apply(endpoint("tep", Some(status())));

    assert_eq!(recv(&mut rx), (Op::Configure, config(&status())));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(index.read().len(), 1);
}

#[test]
fn ignores_endpoints_until_negotiated() {
    let (index, mut rx) = index();
    index.write().apply(endpoint("tep", None));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    assert!(index.read().is_empty());

    index.write().apply(endpoint("tep", Some(status())));
    assert_eq!(recv(&mut rx).0, Op::Configure);

    // Withdrawing the status removes the cluster's state.
    index.write().apply(endpoint("tep", None));
    assert_eq!(recv(&mut rx), (Op::Remove, config(&status())));
    assert!(index.read().is_empty());
}

#[test]
fn reapplying_an_endpoint_publishes_nothing() {
    let (index, mut rx) = index();
    index.write().apply(endpoint("tep", Some(status())));
    recv(&mut rx);

    index.write().apply(endpoint("tep", Some(status())));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
}

#[rstest]
#[case::external_ranges(
    TunnelEndpointStatus { local_nat_external_cidr: "192.168.6.0/24".to_string(), ..status() },
    None
)]
#[case::local_pods_without_nat(
    TunnelEndpointStatus { local_pod_cidr: "192.168.9.0/24".to_string(), ..no_local_nat() },
    Some(Op::Postrouting)
)]
#[case::local_pods_with_nat(
    TunnelEndpointStatus { local_pod_cidr: "192.168.9.0/24".to_string(), ..status() },
    Some(Op::Configure)
)]
#[case::local_nat(
    TunnelEndpointStatus { local_nat_pod_cidr: "11.0.0.0/24".to_string(), ..status() },
    Some(Op::Configure)
)]
#[case::remote_nat(
    TunnelEndpointStatus { remote_nat_pod_cidr: "10.70.0.0/24".to_string(), ..status() },
    Some(Op::Configure)
)]
#[case::host_bits_only(
    TunnelEndpointStatus { remote_nat_pod_cidr: "10.60.0.1/24".to_string(), ..status() },
    None
)]
#[case::invalid(
    TunnelEndpointStatus { local_nat_pod_cidr: "an invalid value".to_string(), ..status() },
    Some(Op::Configure)
)]
fn publishes_narrowest_update(
    #[case] updated: TunnelEndpointStatus,
    #[case] expected: Option<Op>,
) {
    let initial = if updated.local_nat_pod_cidr == DEFAULT_CIDR_VALUE {
        no_local_nat()
    } else {
        status()
    };
    let (index, mut rx) = index();
    index.write().apply(endpoint("tep", Some(initial)));
    recv(&mut rx);

    index.write().apply(endpoint("tep", Some(updated.clone())));
    match expected {
        Some(op) => assert_eq!(recv(&mut rx), (op, config(&updated))),
        None => assert_eq!(rx.try_recv(), Err(TryRecvError::Empty)),
    }
}

fn no_local_nat() -> TunnelEndpointStatus {
    TunnelEndpointStatus {
        local_nat_pod_cidr: DEFAULT_CIDR_VALUE.to_string(),
        ..status()
    }
}

#[test]
fn publishes_remove_on_delete() {
    let (index, mut rx) = index();
    index.write().apply(endpoint("tep", Some(status())));
    recv(&mut rx);

    index
        .write()
        .delete(NAMESPACE.to_string(), "unknown".to_string());
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

    index.write().delete(NAMESPACE.to_string(), "tep".to_string());
    assert_eq!(recv(&mut rx), (Op::Remove, config(&status())));
    assert!(index.read().is_empty());
}

#[test]
fn cluster_id_change_replaces_cluster() {
    let (index, mut rx) = index();
    index.write().apply(endpoint("tep", Some(status())));
    recv(&mut rx);

    let mut tep = endpoint("tep", Some(status()));
    tep.spec.cluster_id = "cluster2".to_string();
    index.write().apply(tep);

    let (op, old) = recv(&mut rx);
    assert_eq!((op, old.cluster_id.as_str()), (Op::Remove, CLUSTER_ID));
    let (op, new) = recv(&mut rx);
    assert_eq!((op, new.cluster_id.as_str()), (Op::Configure, "cluster2"));
}

#[test]
fn shared_cluster_survives_deleting_one_endpoint() {
    let (index, mut rx) = index();
    index.write().apply(endpoint("tep-a", Some(status())));
    let remote_nat = TunnelEndpointStatus {
        remote_nat_pod_cidr: "10.70.0.0/24".to_string(),
        ..status()
    };
    index.write().apply(endpoint("tep-b", Some(remote_nat.clone())));
    assert_eq!(recv(&mut rx).0, Op::Configure);
    assert_eq!(recv(&mut rx).0, Op::Configure);

    // The remaining endpoint's rules are restored rather than removed.
    index.write().delete(NAMESPACE.to_string(), "tep-a".to_string());
    assert_eq!(recv(&mut rx), (Op::Configure, config(&remote_nat)));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

    index.write().apply(endpoint("tep-b", None));
    assert_eq!(recv(&mut rx), (Op::Remove, config(&remote_nat)));
    assert!(index.read().is_empty());
}

#[test]
fn cluster_id_suffix_change_reconfigures_in_place() {
    let (index, mut rx) = index();
    index.write().apply(endpoint("tep", Some(status())));
    recv(&mut rx);

    let mut tep = endpoint("tep", Some(status()));
    tep.spec.cluster_id = format!("{CLUSTER_ID}-6f2b");
    index.write().apply(tep);

    let (op, new) = recv(&mut rx);
    assert_eq!((op, new.cluster_id.as_str()), (Op::Configure, "cluster1-6f2b"));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn generations_increase() {
    let (index, mut rx) = index();
    index.write().apply(endpoint("tep", Some(status())));
    index.write().apply(endpoint(
        "tep",
        Some(TunnelEndpointStatus {
            remote_nat_pod_cidr: "10.70.0.0/24".to_string(),
            ..status()
        }),
    ));
    index.write().delete(NAMESPACE.to_string(), "tep".to_string());

    let generations = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|u| u.generation)
        .collect::<Vec<_>>();
    assert_eq!(generations, vec![1, 2, 3]);
}

// === Controller ===

const BACKOFF: Duration = Duration::from_millis(10);

struct Harness {
    handler: Arc<Handler<MemoryBackend>>,
    metrics: ControllerMetrics,
    tx: mpsc::UnboundedSender<Update>,
    task: JoinHandle<()>,
}

impl Harness {
    fn new() -> Self {
        let handler = Arc::new(Handler::new(MemoryBackend::default()));
        handler.init().expect("init must succeed");
        let metrics = ControllerMetrics::register(&mut Default::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Controller::new(handler.clone(), rx, BACKOFF, metrics.clone());
        Self {
            handler,
            metrics,
            tx,
            task: tokio::spawn(controller.run()),
        }
    }

    fn send(&self, generation: u64, op: Op, config: NetworkConfig) {
        self.tx
            .send(Update {
                generation,
                op,
                config,
            })
            .expect("controller must be running");
    }

    fn rules(&self, chain: &str) -> Vec<String> {
        self.handler.list_rules_in_chain(chain).unwrap()
    }

    async fn stop(self) {
        drop(self.tx);
        self.task.await.expect("controller must not panic");
    }
}

async fn eventually(mut f: impl FnMut() -> bool) {
    time::timeout(Duration::from_secs(5), async {
        while !f() {
            time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition must hold eventually");
}

#[tokio::test(flavor = "multi_thread")]
async fn controller_configures_and_removes() {
    let h = Harness::new();
    let config = config(&status());

    h.send(1, Op::Configure, config.clone());
    eventually(|| h.metrics.count(Op::Configure, Outcome::Ok) == 1).await;
    assert_eq!(
        h.rules("FABRIC-FORWARD"),
        vec!["-d 10.60.0.0/24 -j FABRIC-FRWD-CLS-cluster1"]
    );
    assert_eq!(h.metrics.clusters(), 1);

    h.send(2, Op::Remove, config);
    eventually(|| h.metrics.count(Op::Remove, Outcome::Ok) == 1).await;
    assert!(h.rules("FABRIC-FORWARD").is_empty());
    assert_eq!(h.metrics.clusters(), 0);

    h.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn controller_does_not_retry_invalid_configurations() {
    let h = Harness::new();
    let config = NetworkConfig {
        local_nat_pod_cidr: "an invalid value".to_string(),
        ..config(&status())
    };

    h.send(1, Op::Configure, config);
    eventually(|| h.metrics.count(Op::Configure, Outcome::Invalid) == 1).await;
    time::sleep(BACKOFF * 5).await;
    assert_eq!(h.metrics.count(Op::Configure, Outcome::Invalid), 1);
    assert_eq!(h.metrics.count(Op::Configure, Outcome::Error), 0);

    h.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn controller_retries_failures() {
    let h = Harness::new();
    h.handler.backend().fail_writes_after(0);

    h.send(1, Op::Postrouting, config(&status()));
    eventually(|| h.metrics.count(Op::Postrouting, Outcome::Error) == 1).await;
    // Retries of a failed update reconcile the whole cluster.
    eventually(|| h.metrics.count(Op::Configure, Outcome::Error) >= 1).await;

    h.handler.backend().heal();
    eventually(|| h.metrics.count(Op::Configure, Outcome::Ok) == 1).await;
    assert_eq!(h.rules("FABRIC-PSTRT-CLS-cluster1").len(), 2);
    assert_eq!(h.rules("FABRIC-INPUT").len(), 1);

    h.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn controller_drops_superseded_retries() {
    let h = Harness::new();
    h.handler.backend().fail_writes_after(0);

    let old = config(&status());
    let new = NetworkConfig {
        remote_nat_pod_cidr: "10.70.0.0/24".to_string(),
        ..old.clone()
    };
    h.send(1, Op::Configure, old);
    h.send(2, Op::Configure, new);
    eventually(|| h.metrics.count(Op::Configure, Outcome::Superseded) >= 1).await;

    h.handler.backend().heal();
    eventually(|| h.metrics.count(Op::Configure, Outcome::Ok) >= 1).await;
    assert_eq!(
        h.rules("FABRIC-POSTROUTING"),
        vec!["-d 10.70.0.0/24 -j FABRIC-PSTRT-CLS-cluster1"]
    );

    h.stop().await;
}
