use crate::settings::{DiscoverySettings, JoinStrategy};
use crate::strategy;
use rally_common::{ClusterControl, DiscoveryError, MemberEntry, Registry, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Signals processed by the coordinator. Join attempts and both timer ticks
/// all arrive through one channel and are handled by one task, so no two
/// handlers ever run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    /// Run the join procedure (or retry it).
    Join,
    /// Heartbeat tick: refresh the registry-side liveness TTL.
    Alive,
    /// Reconciliation tick: converge local membership with the registry view.
    Reconcile,
}

/// Externally observable coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// Not yet part of a cluster; join attempts in progress.
    Joining,
    /// Joined and registered; heartbeat and reconciliation timers running.
    Ready,
    /// Stopped for good, either by shutdown or a fatal join failure.
    Terminated,
}

/// How a single join attempt resolved.
enum AttemptOutcome {
    Joined,
    /// The distributed lock is held elsewhere. Expected contention; the
    /// attempt is rescheduled without consuming the retry budget.
    LockContended(Duration),
    Failed(DiscoveryError),
}

/// Coordinates bootstrapping the local node into a cluster through a
/// third-party registry: joins using the registry's alive set (or self-seeds
/// when it is empty), registers the local entry, then keeps asserting
/// liveness and downing members the registry no longer confirms.
///
/// Reconciliation deliberately does not special-case the local address: if
/// the registry stops reporting this node, the node downs itself rather than
/// keep operating on a view nobody else shares.
pub struct DiscoveryService {
    settings: DiscoverySettings,
    registry: Arc<dyn Registry>,
    cluster: Arc<dyn ClusterControl>,
    entry: MemberEntry,
    tx: mpsc::UnboundedSender<Event>,
    state_tx: watch::Sender<DiscoveryState>,
    shutdown: CancellationToken,
    retries_left: u32,
    alive_task: Option<JoinHandle<()>>,
    refresh_task: Option<JoinHandle<()>>,
}

impl DiscoveryService {
    /// Starts the coordinator task and fires the initial join signal.
    pub fn spawn(
        settings: DiscoverySettings,
        registry: Arc<dyn Registry>,
        cluster: Arc<dyn ClusterControl>,
    ) -> DiscoveryHandle {
        let entry = cluster.self_entry();
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(DiscoveryState::Joining);
        let shutdown = CancellationToken::new();

        let service = DiscoveryService {
            retries_left: settings.join_retries,
            settings,
            registry,
            cluster,
            entry,
            tx,
            state_tx,
            shutdown: shutdown.clone(),
            alive_task: None,
            refresh_task: None,
        };

        let cluster_name = service.entry.cluster_name.clone();
        let join_retries = service.settings.join_retries;

        service.send_join_signal();
        let task = tokio::spawn(service.run(rx));

        DiscoveryHandle {
            state: state_rx,
            shutdown,
            task,
            cluster_name,
            join_retries,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Event>) {
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if *self.state_tx.borrow() == DiscoveryState::Ready {
                        if let Err(e) = self.registry.deregister(&self.entry).await {
                            debug!("Failed to deregister [{}] on shutdown: {}", self.entry, e);
                        }
                    }
                    break;
                }
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let keep_running = match event {
                        Event::Join => self.handle_join().await,
                        Event::Alive => self.handle_alive().await,
                        Event::Reconcile => self.handle_reconcile().await,
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        self.stop_tickers();
        self.state_tx.send_replace(DiscoveryState::Terminated);
    }

    /// Schedules the next `Join` event the way the active strategy dictates.
    fn send_join_signal(&self) {
        self.send_join_after(strategy::next_join_delay(&self.settings.strategy));
    }

    fn send_join_after(&self, delay: Duration) {
        if delay.is_zero() {
            let _ = self.tx.send(Event::Join);
            return;
        }
        let tx = self.tx.clone();
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Event::Join);
                }
            }
        });
    }

    async fn handle_join(&mut self) -> bool {
        match self.try_join().await {
            AttemptOutcome::Joined => {
                info!(
                    "Node [{}] joined cluster [{}]",
                    self.entry.address, self.entry.cluster_name
                );
                self.state_tx.send_replace(DiscoveryState::Ready);
                true
            }
            AttemptOutcome::LockContended(retry_in) => {
                warn!(
                    "Failed to obtain the discovery lock for cluster [{}], retrying in {:?}",
                    self.entry.cluster_name, retry_in
                );
                self.send_join_after(retry_in);
                true
            }
            AttemptOutcome::Failed(cause) => {
                self.retries_left = self.retries_left.saturating_sub(1);
                if self.retries_left > 0 {
                    warn!(
                        "Join attempt for cluster [{}] failed ({} retries left): {}",
                        self.entry.cluster_name, self.retries_left, cause
                    );
                    self.send_join_signal();
                    true
                } else {
                    error!(
                        "Failed to join cluster [{}] after {} attempts, giving up: {}",
                        self.entry.cluster_name, self.settings.join_retries, cause
                    );
                    false
                }
            }
        }
    }

    async fn try_join(&mut self) -> AttemptOutcome {
        let strategy = self.settings.strategy.clone();
        match strategy {
            JoinStrategy::Locking { lock_retry_interval } => {
                let key = self.entry.cluster_name.clone();
                match self.registry.acquire_lock(&key).await {
                    Ok(Some(lock)) => {
                        // release must run on both the success and failure path
                        let outcome = self.join_once().await;
                        if let Err(e) = self.registry.release_lock(lock).await {
                            warn!("Failed to release discovery lock [{}]: {}", key, e);
                        }
                        match outcome {
                            Ok(()) => AttemptOutcome::Joined,
                            Err(cause) => AttemptOutcome::Failed(cause),
                        }
                    }
                    Ok(None) => AttemptOutcome::LockContended(lock_retry_interval),
                    Err(cause) => AttemptOutcome::Failed(cause),
                }
            }
            JoinStrategy::Lockless { .. } => match self.join_once().await {
                Ok(()) => AttemptOutcome::Joined,
                Err(cause) => AttemptOutcome::Failed(cause),
            },
        }
    }

    /// One full join attempt: discover seeds, join the membership substrate,
    /// register, heartbeat once, start the periodic timers.
    async fn join_once(&mut self) -> Result<()> {
        let alive = self.registry.alive_nodes(&self.entry.cluster_name).await?;

        if alive.is_empty() {
            info!(
                "No alive nodes registered for cluster [{}], seeding a new cluster from [{}]",
                self.entry.cluster_name, self.entry.address
            );
            self.cluster
                .join_seed_nodes(vec![self.entry.address.clone()])
                .await?;
        } else {
            let mut seeds: Vec<_> = alive.into_iter().collect();
            seeds.sort();
            info!(
                "Joining cluster [{}] using {} discovered seed node(s)",
                self.entry.cluster_name,
                seeds.len()
            );
            self.cluster.join_seed_nodes(seeds).await?;
        }

        self.registry.register(&self.entry).await?;
        self.registry.mark_alive(&self.entry).await?;

        self.start_tickers();
        Ok(())
    }

    fn start_tickers(&mut self) {
        self.alive_task = Some(self.spawn_ticker(self.settings.alive_interval, Event::Alive));

        if !self.settings.refresh_interval.is_zero() {
            debug!(
                "Scheduling reconciliation every {:?}",
                self.settings.refresh_interval
            );
            self.refresh_task =
                Some(self.spawn_ticker(self.settings.refresh_interval, Event::Reconcile));
        }
    }

    fn spawn_ticker(&self, period: Duration, event: Event) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                if tx.send(event).is_err() {
                    break;
                }
            }
        })
    }

    /// Aborting an already finished or already aborted task is a no-op.
    fn stop_tickers(&mut self) {
        if let Some(task) = self.alive_task.take() {
            task.abort();
        }
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
    }

    async fn handle_alive(&self) -> bool {
        if let Err(e) = self.registry.mark_alive(&self.entry).await {
            // non-fatal: a persistently silent node simply expires out of the
            // registry once alive_timeout passes
            warn!("Liveness heartbeat for [{}] failed: {}", self.entry, e);
        }
        true
    }

    /// Converges local membership with the registry's alive set. The registry
    /// wins every conflict: locally known members it does not confirm are
    /// downed, including the local node itself.
    async fn handle_reconcile(&mut self) -> bool {
        let provided = match self.registry.alive_nodes(&self.entry.cluster_name).await {
            Ok(nodes) => nodes,
            Err(cause) => {
                error!(
                    "Couldn't retrieve alive nodes from the registry ({}). Is the current node partitioned? Downing [{}]",
                    cause, self.entry.address
                );
                if let Err(e) = self.cluster.down(&self.entry.address).await {
                    error!("Failed to down the local node [{}]: {}", self.entry.address, e);
                }
                return false;
            }
        };

        let current = match self.current_view().await {
            Ok(view) => view,
            Err(cause) => {
                warn!("Couldn't read local membership state, skipping reconciliation: {}", cause);
                return true;
            }
        };

        if provided == current {
            return true;
        }

        info!(
            "Membership differs between the registry [{}] and the cluster [{}]",
            format_addresses(&provided),
            format_addresses(&current)
        );

        // down everything the registry no longer confirms; nodes the registry
        // knows but the cluster doesn't will come in through the normal join path
        for node in current.difference(&provided) {
            if let Err(e) = self.cluster.down(node).await {
                warn!("Failed to down unconfirmed member [{}]: {}", node, e);
            }
        }
        true
    }

    async fn current_view(&self) -> Result<HashSet<rally_common::NodeAddress>> {
        let members = self.cluster.members().await?;
        let unreachable = self.cluster.unreachable().await?;
        Ok(members.union(&unreachable).cloned().collect())
    }
}

fn format_addresses(addresses: &HashSet<rally_common::NodeAddress>) -> String {
    let mut rendered: Vec<_> = addresses.iter().map(ToString::to_string).collect();
    rendered.sort();
    rendered.join(", ")
}

/// Handle to a running [`DiscoveryService`].
pub struct DiscoveryHandle {
    state: watch::Receiver<DiscoveryState>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
    cluster_name: String,
    join_retries: u32,
}

impl DiscoveryHandle {
    /// Current coordinator state.
    pub fn state(&self) -> DiscoveryState {
        *self.state.borrow()
    }

    /// Resolves once the node has joined and registered. Fails with
    /// [`DiscoveryError::JoinFailed`] if the coordinator terminates first.
    pub async fn wait_ready(&mut self) -> Result<()> {
        loop {
            match *self.state.borrow_and_update() {
                DiscoveryState::Ready => return Ok(()),
                DiscoveryState::Terminated => {
                    return Err(DiscoveryError::JoinFailed {
                        cluster: self.cluster_name.clone(),
                        attempts: self.join_retries,
                    })
                }
                DiscoveryState::Joining => {}
            }
            if self.state.changed().await.is_err() {
                return Err(DiscoveryError::JoinFailed {
                    cluster: self.cluster_name.clone(),
                    attempts: self.join_retries,
                });
            }
        }
    }

    /// Resolves once the coordinator has stopped, for whatever reason.
    pub async fn wait_terminated(&mut self) {
        while *self.state.borrow_and_update() != DiscoveryState::Terminated {
            if self.state.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stops the coordinator: cancels the timers, deregisters the local
    /// entry best-effort, and waits for the task to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}
