use crate::{
    index::{Controller, ControllerMetrics, Index},
    iptables::{Backend, Handler, IptablesBackend, MemoryBackend},
    k8s,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "fabric", about = "Programs inter-cluster NAT and filter rules")]
pub struct Args {
    #[clap(
        long,
        default_value = "fabric=info,warn",
        env = "FABRIC_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Programs ip6tables instead of iptables.
    #[clap(long)]
    ipv6: bool,

    /// Keeps all rules in memory instead of programming the host.
    #[clap(long)]
    dry_run: bool,

    /// Time to wait before retrying a failed reconciliation.
    #[clap(long, default_value = "5000")]
    retry_backoff_ms: u64,

    /// Leaves the host's rules in place on shutdown.
    #[clap(long)]
    skip_terminate: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            ipv6,
            dry_run,
            retry_backoff_ms,
            skip_terminate,
        } = self;

        let mut prom = <Registry>::default();
        let metrics = ControllerMetrics::register(prom.sub_registry_with_prefix("fabric"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let backend: Box<dyn Backend> = if dry_run {
            warn!("Dry run: rules are not written to the host");
            Box::new(MemoryBackend::default())
        } else {
            Box::new(IptablesBackend::new(ipv6)?)
        };
        let handler = Arc::new(Handler::new(backend));
        blocking(&handler, Handler::init).await?;

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let index = Index::shared(updates_tx);

        let endpoints = runtime.watch_all::<k8s::TunnelEndpoint>(watcher::Config::default());
        let watch = tokio::spawn(
            kubert::index::namespaced(index, endpoints).instrument(info_span!("tunnelendpoints")),
        );

        let controller = Controller::new(
            handler.clone(),
            updates_rx,
            Duration::from_millis(retry_backoff_ms),
            metrics,
        );
        let controller = tokio::spawn(controller.run().instrument(info_span!("controller")));

        // Block the main thread on the shutdown signal.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        // Dropping the index closes the update channel. The controller then
        // applies what is still queued and stops, so that nothing touches the
        // host once it has been cleaned up.
        watch.abort();
        let _ = watch.await;
        controller.await?;

        if skip_terminate {
            info!("Leaving rules in place");
            return Ok(());
        }
        blocking(&handler, Handler::terminate).await?;
        Ok(())
    }
}

async fn blocking<B, F>(handler: &Arc<Handler<B>>, f: F) -> Result<()>
where
    B: Backend + 'static,
    F: FnOnce(&Handler<B>) -> Result<(), crate::iptables::Error> + Send + 'static,
{
    let handler = handler.clone();
    tokio::task::spawn_blocking(move || f(&handler)).await??;
    Ok(())
}
