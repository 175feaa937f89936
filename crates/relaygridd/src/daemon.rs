//! Daemon assembly: state, background loops, and the API server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use relaygrid_autoscale::{AutoscaleController, ControllerConfig, S3Probe, StorageProbe};
use relaygrid_limits::{ConcurrencyMonitor, FloodMonitor};
use relaygrid_machine::{DockerMachine, MachineDriver};
use relaygrid_nodes::{NodeClient, NodePool, PoolRefresher};
use relaygrid_routing::{RouteTable, TaskTable};
use relaygrid_scheduler::Dispatcher;
use relaygrid_state::SnapshotStore;

use crate::config::{AutoscaleConfig, DaemonConfig};

/// A fully wired orchestrator, ready to serve.
pub struct Daemon {
    config: DaemonConfig,
    dispatcher: Dispatcher,
    autoscaler: Option<AutoscaleController>,
    callback_token: String,
}

impl Daemon {
    /// Open persisted state and, when configured, validate the autoscale
    /// provider. Any configuration problem is returned as an error.
    pub async fn build(config: DaemonConfig) -> anyhow::Result<Self> {
        Self::build_with(config, &S3Probe::new()).await
    }

    /// [`build`](Self::build) with a custom storage probe.
    pub async fn build_with(config: DaemonConfig, probe: &dyn StorageProbe) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let callback_token = config.resolve_callback_token()?;

        // ── State ──────────────────────────────────────────────────
        let pool = NodePool::open(SnapshotStore::open(&config.data_dir.join("nodes.json")))?;
        for node in &config.nodes {
            if pool.find(&node.host, node.port).is_none() {
                pool.add(&node.host, node.port, node.token.clone());
            }
        }
        let tasks = TaskTable::open(SnapshotStore::open(&config.data_dir.join("tasks.json")))?;
        let routes = RouteTable::new();
        info!(nodes = pool.len(), tasks = tasks.len(), "state loaded");

        // ── Limits ─────────────────────────────────────────────────
        let concurrency = ConcurrencyMonitor::new(config.limits.concurrency);
        let flood = FloodMonitor::new(config.limits.flood_threshold);

        let client = NodeClient::new().with_timeout(Duration::from_secs(config.node_timeout_secs));
        let mut dispatcher = Dispatcher::new(pool.clone(), routes.clone(), tasks.clone())
            .with_limits(concurrency, flood)
            .with_client(client);

        // ── Autoscaler ─────────────────────────────────────────────
        let autoscaler = match &config.autoscale {
            Some(autoscale) => {
                let driver = docker_machine(autoscale);
                let controller = autoscaler(&config, autoscale, &callback_token, probe, driver, &dispatcher).await?;
                dispatcher = dispatcher.with_autoscaler(controller.clone());
                Some(controller)
            }
            None => {
                info!("autoscaling disabled");
                None
            }
        };

        Ok(Self {
            config,
            dispatcher,
            autoscaler,
            callback_token,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn callback_token(&self) -> &str {
        &self.callback_token
    }

    /// The HTTP API over this daemon's state.
    pub fn router(&self) -> axum::Router {
        relaygrid_api::build_router(self.dispatcher.clone(), self.callback_token.clone())
    }

    /// Run background loops and serve `listener` until `signal` resolves.
    pub async fn serve(
        self,
        listener: TcpListener,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        // ── Background tasks ───────────────────────────────────────
        let refresher = PoolRefresher::new(
            self.dispatcher.pool().clone(),
            NodeClient::new().with_timeout(Duration::from_secs(self.config.node_timeout_secs)),
        )
        .with_interval(Duration::from_secs(self.config.refresh_interval_secs));
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { refresher.run(rx).await }));

        let tasks = self.dispatcher.tasks().clone();
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { tasks.run(rx).await }));

        let flood = self.dispatcher.flood().clone();
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { flood.run(rx).await }));

        if let Some(controller) = self.autoscaler.clone() {
            let rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move { controller.run(rx).await }));
        }

        // ── API server ─────────────────────────────────────────────
        let router = self.router();
        info!(addr = %listener.local_addr()?, "API server starting");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                signal.await;
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            })
            .await?;

        for handle in handles {
            let _ = handle.await;
        }
        if let Some(controller) = &self.autoscaler {
            controller.shutdown();
        }
        self.dispatcher.pool().persist();

        info!("relaygrid daemon stopped");
        Ok(())
    }
}

fn docker_machine(autoscale: &AutoscaleConfig) -> Arc<dyn MachineDriver> {
    let mut driver = DockerMachine::with_binary(&autoscale.docker_machine);
    if let Some(path) = &autoscale.storage_path {
        driver = driver.with_storage_path(path);
    }
    Arc::new(driver)
}

async fn autoscaler(
    config: &DaemonConfig,
    autoscale: &AutoscaleConfig,
    callback_token: &str,
    probe: &dyn StorageProbe,
    driver: Arc<dyn MachineDriver>,
    dispatcher: &Dispatcher,
) -> anyhow::Result<AutoscaleController> {
    let provider = relaygrid_autoscale::provider::load(&autoscale.config)?;
    provider.validate(probe).await?;

    let public_url = config.public_url();
    if public_url.contains("localhost") {
        warn!(%public_url, "autospawned nodes cannot reach a localhost webhook; set public_url");
    }

    let controller = AutoscaleController::new(
        provider.clone(),
        driver,
        dispatcher.pool().clone(),
        dispatcher.routes().clone(),
        dispatcher.tasks().clone(),
        ControllerConfig {
            public_url,
            callback_token: callback_token.to_string(),
            machine_prefix: autoscale.machine_prefix.clone(),
            cleanup_delay: Duration::from_secs(autoscale.cleanup_delay_secs),
            node_timeout: Duration::from_secs(config.node_timeout_secs),
            ..Default::default()
        },
    );
    info!(provider = provider.name(), "autoscaler initialized");
    Ok(controller)
}
