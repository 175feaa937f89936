//! AutoscaleController — creates, tears down, and reaps autospawned nodes.
//!
//! ```text
//! create_node(job_size)
//!   for attempt in 1..=retries:
//!     driver.create ─► provider.setup_machine ─► driver.ip ─► poll /info
//!     any failure: driver.destroy(machine), sleep failure_sleep_time
//!   success: tag autospawn, pool.insert
//!
//! on_commit(job) ─► archive status+output ─► teardown (inline or deferred)
//! vacuum()       ─► destroy nodes past max_runtime / idle past max_upload_time
//! destroy_node() ─► archive routed jobs ─► purge routes ─► pool.remove ─► driver.destroy
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use relaygrid_machine::MachineDriver;
use relaygrid_nodes::{Node, NodeClient, NodeHandle, NodePool};
use relaygrid_routing::{RouteTable, TaskTable, archive_routes};
use relaygrid_state::{AutospawnInfo, epoch_secs};

use crate::error::{AutoscaleError, AutoscaleResult};
use crate::provider::{Provider, SetupContext};
use crate::storage::random_hex;

/// How often [`AutoscaleController::run`] vacuums.
pub const VACUUM_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Controller settings that do not come from the provider.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Base URL nodes use to reach the commit webhook.
    pub public_url: String,
    /// Secret path segment of the commit webhook.
    pub callback_token: String,
    /// Machine names are `{prefix}-{12 hex}`.
    pub machine_prefix: String,
    /// Wait between a job's commit and its node's teardown. Zero tears
    /// down inline.
    pub cleanup_delay: Duration,
    /// First wait of the online poll; attempt `i` waits `base * i`.
    pub online_poll_base: Duration,
    /// Polls of a new node's `/info` before the attempt is given up.
    pub online_poll_attempts: u32,
    /// Per-request timeout for node HTTP calls.
    pub node_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            public_url: "http://localhost:3000".to_string(),
            callback_token: String::new(),
            machine_prefix: "relaygrid".to_string(),
            cleanup_delay: Duration::ZERO,
            online_poll_base: Duration::from_secs(1),
            online_poll_attempts: 5,
            node_timeout: relaygrid_nodes::client::DEFAULT_TIMEOUT,
        }
    }
}

struct Inner {
    provider: Arc<dyn Provider>,
    driver: Arc<dyn MachineDriver>,
    pool: NodePool,
    routes: RouteTable,
    tasks: TaskTable,
    client: NodeClient,
    config: ControllerConfig,
    creating: AtomicUsize,
    teardowns: Mutex<HashMap<String, JoinHandle<()>>>,
}

/// Holds one slot of the in-flight creation counter.
struct CreatingGuard<'a>(&'a AtomicUsize);

impl<'a> CreatingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CreatingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Drives the autospawned part of the pool.
#[derive(Clone)]
pub struct AutoscaleController {
    inner: Arc<Inner>,
}

impl AutoscaleController {
    pub fn new(
        provider: Arc<dyn Provider>,
        driver: Arc<dyn MachineDriver>,
        pool: NodePool,
        routes: RouteTable,
        tasks: TaskTable,
        config: ControllerConfig,
    ) -> Self {
        let client = NodeClient::new().with_timeout(config.node_timeout);
        Self {
            inner: Arc::new(Inner {
                provider,
                driver,
                pool,
                routes,
                tasks,
                client,
                config,
                creating: AtomicUsize::new(0),
                teardowns: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.inner.provider
    }

    /// Creations currently in progress.
    pub fn creating(&self) -> usize {
        self.inner.creating.load(Ordering::SeqCst)
    }

    /// Whether another machine fits under the provider's ceiling, counting
    /// creations still in flight.
    pub fn is_allowed_to_create_new_node(&self) -> bool {
        match self.inner.provider.machines_limit() {
            None => true,
            Some(limit) => self.inner.pool.autospawned_count() + self.creating() < limit,
        }
    }

    // ── Creation ──────────────────────────────────────────────────

    /// Provision a machine for `job_size` and add it to the pool.
    pub async fn create_node(&self, job_size: u32) -> AutoscaleResult<NodeHandle> {
        let provider = &self.inner.provider;
        if !provider.can_handle(job_size) {
            return Err(AutoscaleError::CannotHandle { job_size });
        }

        let _creating = CreatingGuard::new(&self.inner.creating);
        let retries = provider.create_retries();
        let mut last = String::new();

        for attempt in 1..=retries {
            let machine = format!("{}-{}", self.inner.config.machine_prefix, random_hex(6)?);
            info!(%machine, attempt, retries, job_size, provider = provider.name(), "creating node");

            match self.try_create(job_size, attempt, &machine).await {
                Ok(node) => {
                    info!(%machine, node = %node, attempt, "autospawned node online");
                    return Ok(node);
                }
                Err(e) => {
                    if let Err(destroy_err) = self.inner.driver.destroy(&machine).await {
                        warn!(%machine, error = %destroy_err, "could not destroy failed machine");
                    }
                    warn!(%machine, attempt, error = %e, "node creation attempt failed");
                    last = e.to_string();
                    if attempt < retries {
                        tokio::time::sleep(provider.failure_sleep_time(attempt)).await;
                    }
                }
            }
        }

        error!(job_size, attempts = retries, "could not create a node");
        Err(AutoscaleError::Exhausted {
            attempts: retries,
            last,
        })
    }

    async fn try_create(
        &self,
        job_size: u32,
        attempt: u32,
        machine: &str,
    ) -> AutoscaleResult<NodeHandle> {
        let inner = &self.inner;
        let provider = &inner.provider;

        let args = provider.create_args(job_size, attempt)?;
        inner
            .driver
            .create(machine, provider.driver_name(), &args)
            .await?;

        let node_token = random_hex(16)?;
        let ctx = SetupContext {
            public_url: inner.config.public_url.clone(),
            callback_token: inner.config.callback_token.clone(),
            node_token: node_token.clone(),
            job_size,
        };
        provider
            .setup_machine(inner.driver.as_ref(), &ctx, machine)
            .await?;

        let ip = inner.driver.ip(machine).await?;
        let node = Node::new(ip, provider.engine_port(), Some(node_token));
        self.wait_online(&node, machine).await?;

        let node = node.with_autospawn(AutospawnInfo {
            machine_name: machine.to_string(),
            created_at: epoch_secs(),
            max_runtime: provider.max_runtime(),
            max_upload_time: provider.max_upload_time(),
        });
        let address = node.address();
        inner
            .pool
            .insert(node)
            .ok_or(AutoscaleError::Duplicate { address })
    }

    async fn wait_online(&self, node: &Node, machine: &str) -> AutoscaleResult<()> {
        let config = &self.inner.config;
        for i in 1..=config.online_poll_attempts {
            tokio::time::sleep(config.online_poll_base * i).await;
            match node.refresh(&self.inner.client).await {
                Ok(()) => return Ok(()),
                Err(e) => debug!(machine, node = %node, poll = i, error = %e, "node not online yet"),
            }
        }
        Err(AutoscaleError::NeverOnline {
            machine: machine.to_string(),
            address: node.address(),
        })
    }

    // ── Teardown ──────────────────────────────────────────────────

    /// Destroy an autospawned node. Static nodes are refused.
    pub async fn destroy_node(&self, node: &NodeHandle) -> bool {
        self.destroy(node, true).await
    }

    async fn destroy(&self, node: &NodeHandle, cancel_pending: bool) -> bool {
        let Some(autospawn) = node.autospawn() else {
            error!(node = %node, "refusing to destroy a node that was not autospawned");
            return false;
        };
        let machine = autospawn.machine_name;
        if cancel_pending {
            self.cancel_teardown(&machine);
        }

        let inner = &self.inner;
        // Leave the pool before archiving so no job is routed here meanwhile.
        inner.pool.remove(node);
        archive_routes(&inner.routes, &inner.tasks, &inner.client, node).await;
        let purged = inner.routes.remove_by_node(node);
        info!(%machine, node = %node, purged_routes = purged, "destroying autospawned node");

        if let Err(e) = inner.driver.destroy(&machine).await {
            error!(%machine, error = %e, "machine destroy failed");
        }
        true
    }

    /// A job finished. If it ran on an autospawned node, archive it and
    /// tear the node down.
    pub async fn on_commit(&self, job_id: &str) {
        let Some(route) = self.inner.routes.lookup(job_id) else {
            debug!(job_id, "commit for unrouted job");
            return;
        };
        let node = route.node;
        let Some(autospawn) = node.autospawn() else {
            return;
        };

        let client = &self.inner.client;
        match client.task_info(&node, job_id).await {
            Ok(info) => {
                let output = match client.task_output(&node, job_id, 0).await {
                    Ok(lines) => Some(lines),
                    Err(e) => {
                        warn!(job_id, node = %node, error = %e, "could not capture task output");
                        None
                    }
                };
                self.inner.tasks.add(job_id, info, output, route.token);
            }
            Err(e) => warn!(job_id, node = %node, error = %e, "could not snapshot task status"),
        }

        self.schedule_teardown(node, autospawn.machine_name).await;
    }

    async fn schedule_teardown(&self, node: NodeHandle, machine: String) {
        let delay = self.inner.config.cleanup_delay;
        if delay.is_zero() {
            self.destroy(&node, true).await;
            return;
        }

        debug!(%machine, delay_secs = delay.as_secs(), "teardown scheduled");
        let this = self.clone();
        let key = machine.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Deregister without aborting: this task is the one running.
            this.inner
                .teardowns
                .lock()
                .expect("teardowns lock")
                .remove(&key);
            this.destroy(&node, false).await;
        });

        let previous = self
            .inner
            .teardowns
            .lock()
            .expect("teardowns lock")
            .insert(machine, handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Cancel a deferred teardown. Returns whether one was pending.
    pub fn cancel_teardown(&self, machine: &str) -> bool {
        let handle = self
            .inner
            .teardowns
            .lock()
            .expect("teardowns lock")
            .remove(machine);
        match handle {
            Some(handle) => {
                handle.abort();
                debug!(machine, "teardown cancelled");
                true
            }
            None => false,
        }
    }

    pub fn pending_teardowns(&self) -> usize {
        self.inner.teardowns.lock().expect("teardowns lock").len()
    }

    /// Abort every deferred teardown.
    pub fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .inner
            .teardowns
            .lock()
            .expect("teardowns lock")
            .drain()
            .map(|(_, h)| h)
            .collect();
        if !handles.is_empty() {
            info!(count = handles.len(), "cancelling pending teardowns");
        }
        for handle in handles {
            handle.abort();
        }
    }

    // ── Vacuum ────────────────────────────────────────────────────

    /// Destroy expired autospawned nodes. Returns how many were destroyed.
    pub async fn vacuum(&self) -> usize {
        self.vacuum_at(epoch_secs()).await
    }

    /// [`vacuum`](Self::vacuum) with an explicit clock.
    pub async fn vacuum_at(&self, now: u64) -> usize {
        let mut destroyed = 0;
        for node in self.inner.pool.list() {
            let Some(autospawn) = node.autospawn() else {
                continue;
            };
            if !node.is_online_at(now) {
                continue;
            }

            let age = i64::try_from(now.saturating_sub(autospawn.created_at)).unwrap_or(i64::MAX);
            let reason = if autospawn.max_runtime > 0 && age > autospawn.max_runtime {
                "max runtime exceeded"
            } else if autospawn.max_upload_time > 0
                && node.queue_count() == 0
                && age > autospawn.max_upload_time
            {
                "idle past max upload time"
            } else {
                continue;
            };

            info!(node = %node, machine = %autospawn.machine_name, age_secs = age, reason, "vacuuming node");
            if self.destroy_node(&node).await {
                destroyed += 1;
            }
        }
        destroyed
    }

    /// Vacuum every [`VACUUM_INTERVAL`] until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(VACUUM_INTERVAL) => {
                    let destroyed = self.vacuum().await;
                    debug!(destroyed, "vacuum pass complete");
                }
                _ = shutdown.changed() => {
                    info!("autoscale controller shutting down");
                    self.shutdown();
                    break;
                }
            }
        }
    }
}
