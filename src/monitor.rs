use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityKind, CapabilityState, Snapshot};
use crate::config::RequestConfig;
use crate::error::CapabilityError;
use crate::probe::ProbeSet;

/// A published state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityChange {
    /// Capability whose state changed
    pub kind: CapabilityKind,
    /// Previously published state, `None` before the first probe
    pub old: Option<CapabilityState>,
    /// Newly published state
    pub new: CapabilityState,
}

/// Callback invoked on the owner task for every change
pub type ChangeListener = Box<dyn Fn(CapabilityChange) + Send + 'static>;

/// Token returned by [`PermissionMonitor::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum MonitorCommand {
    ProbeCompleted {
        kind: CapabilityKind,
        state: CapabilityState,
        reply: oneshot::Sender<CapabilityState>,
    },
    Subscribe {
        id: SubscriptionId,
        listener: ChangeListener,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    Shutdown,
}

/// Owns the snapshot and the listener list
///
/// Probe results reach the owner through its command queue and are applied
/// one at a time, in the order the probes *complete*:
///
/// ```text
/// check(kind) ──► spawn_blocking(probe.query) ──┐
///                                               ▼
///                     command queue ──► MonitorOwner ──► snapshot (watch)
///                                                    └─► listeners
/// ```
///
/// A slow probe that finishes last wins over a faster one issued after it.
pub struct MonitorOwner {
    snapshot: Snapshot,
    snapshot_tx: watch::Sender<Snapshot>,
    listeners: Vec<(SubscriptionId, ChangeListener)>,
    command_rx: mpsc::UnboundedReceiver<MonitorCommand>,
}

impl MonitorOwner {
    /// Process commands until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        debug!("permission monitor started");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                MonitorCommand::ProbeCompleted { kind, state, reply } => {
                    self.apply(kind, state);
                    let _ = reply.send(state);
                }
                MonitorCommand::Subscribe { id, listener } => {
                    self.listeners.push((id, listener));
                    debug!(id = id.0, listeners = self.listeners.len(), "listener subscribed");
                }
                MonitorCommand::Unsubscribe { id } => {
                    let before = self.listeners.len();
                    self.listeners.retain(|(existing, _)| *existing != id);
                    if self.listeners.len() == before {
                        debug!(id = id.0, "unsubscribe for unknown listener ignored");
                    }
                }
                MonitorCommand::Shutdown => {
                    info!("permission monitor shutting down");
                    break;
                }
            }
        }

        debug!("permission monitor stopped");
    }

    fn apply(&mut self, kind: CapabilityKind, state: CapabilityState) {
        let old = self.snapshot.published(kind);
        self.snapshot = self.snapshot.with_state(kind, state);
        self.snapshot_tx.send_replace(self.snapshot.clone());

        if old == Some(state) {
            debug!(kind = ?kind, state = ?state, "capability unchanged");
            return;
        }

        info!(kind = ?kind, old = ?old, new = ?state, "capability state changed");
        let change = CapabilityChange {
            kind,
            old,
            new: state,
        };
        for (id, listener) in &self.listeners {
            // A panicking listener must not take the owner task down with it
            if panic::catch_unwind(AssertUnwindSafe(|| listener(change))).is_err() {
                warn!(id = id.0, kind = ?kind, "change listener panicked");
            }
        }
    }
}

/// Handle to the capability state owner
#[derive(Clone)]
pub struct PermissionMonitor {
    probes: Arc<ProbeSet>,
    follow_ups: Arc<RequestConfig>,
    command_tx: mpsc::UnboundedSender<MonitorCommand>,
    snapshot_rx: watch::Receiver<Snapshot>,
    next_subscription: Arc<AtomicU64>,
}

impl PermissionMonitor {
    /// Create a handle and its owner; the owner must be driven with [`MonitorOwner::run`]
    pub fn new(probes: ProbeSet, follow_ups: RequestConfig) -> (Self, MonitorOwner) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::empty());

        let monitor = Self {
            probes: Arc::new(probes),
            follow_ups: Arc::new(follow_ups),
            command_tx,
            snapshot_rx,
            next_subscription: Arc::new(AtomicU64::new(1)),
        };
        let owner = MonitorOwner {
            snapshot: Snapshot::empty(),
            snapshot_tx,
            listeners: Vec::new(),
            command_rx,
        };
        (monitor, owner)
    }

    /// Create a handle and spawn its owner on the current tokio runtime
    pub fn spawn(probes: ProbeSet, follow_ups: RequestConfig) -> Self {
        let (monitor, owner) = Self::new(probes, follow_ups);
        tokio::spawn(owner.run());
        monitor
    }

    /// Copy of the latest published snapshot
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Latest published state of `kind`
    pub fn state(&self, kind: CapabilityKind) -> CapabilityState {
        self.snapshot_rx.borrow().state(kind)
    }

    /// Receiver that observes every snapshot the owner publishes
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    /// Probe one capability and publish the result
    ///
    /// The probe runs on a blocking worker; the result is applied by the
    /// owner even if the returned future is dropped.
    ///
    /// # Errors
    /// Returns [`CapabilityError::MonitorClosed`] if the owner has stopped
    pub async fn check(&self, kind: CapabilityKind) -> Result<CapabilityState, CapabilityError> {
        if self.command_tx.is_closed() {
            return Err(CapabilityError::MonitorClosed);
        }

        let (reply, reply_rx) = oneshot::channel();
        let probes = Arc::clone(&self.probes);
        let command_tx = self.command_tx.clone();

        tokio::spawn(async move {
            let state = run_probe(&probes, kind).await;
            let _ = command_tx.send(MonitorCommand::ProbeCompleted { kind, state, reply });
        });

        reply_rx.await.map_err(|_| CapabilityError::MonitorClosed)
    }

    /// Probe every capability concurrently and return the resulting snapshot
    ///
    /// # Errors
    /// Returns [`CapabilityError::MonitorClosed`] if the owner has stopped
    pub async fn check_all(&self) -> Result<Snapshot, CapabilityError> {
        debug!("checking all capabilities");

        let mut checks = JoinSet::new();
        for kind in CapabilityKind::ALL {
            let monitor = self.clone();
            checks.spawn(async move { monitor.check(kind).await });
        }

        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(err),
                Err(err) => warn!(error = %err, "capability check task failed"),
            }
        }

        Ok(self.snapshot())
    }

    /// Raise the OS grant prompt for `kind` and schedule a follow-up check
    ///
    /// Returns as soon as the prompt is dispatched; the user's answer (if
    /// any) is picked up by the follow-up check.
    ///
    /// # Errors
    /// Returns [`CapabilityError::RequestNotSupported`] for kinds without a
    /// prompt, or [`CapabilityError::MonitorClosed`] if the owner has stopped
    pub fn request(&self, kind: CapabilityKind) -> Result<(), CapabilityError> {
        if !kind.supports_request() {
            return Err(CapabilityError::RequestNotSupported(kind));
        }
        if self.command_tx.is_closed() {
            return Err(CapabilityError::MonitorClosed);
        }

        info!(kind = ?kind, "requesting capability");

        if let Some(probe) = self.probes.get(kind) {
            tokio::spawn(async move {
                match tokio::task::spawn_blocking(move || probe.request()).await {
                    Ok(Ok(())) => debug!(kind = ?kind, "capability prompt issued"),
                    Ok(Err(err)) => warn!(kind = ?kind, error = %err, "capability request failed"),
                    Err(err) => warn!(kind = ?kind, error = %err, "capability request panicked"),
                }
            });
        } else {
            warn!(kind = ?kind, "no probe registered; request skipped");
        }

        if let Some(delay) = self.follow_ups.follow_up(kind) {
            let monitor = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(err) = monitor.check(kind).await {
                    debug!(kind = ?kind, error = %err, "follow-up check skipped");
                }
            });
        }

        Ok(())
    }

    /// Register a listener for state changes
    ///
    /// # Errors
    /// Returns [`CapabilityError::MonitorClosed`] if the owner has stopped
    pub fn subscribe(
        &self,
        listener: impl Fn(CapabilityChange) + Send + 'static,
    ) -> Result<SubscriptionId, CapabilityError> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.command_tx
            .send(MonitorCommand::Subscribe {
                id,
                listener: Box::new(listener),
            })
            .map_err(|_| CapabilityError::MonitorClosed)?;
        Ok(id)
    }

    /// Remove a listener; unknown or already removed ids are ignored
    pub fn unsubscribe(&self, id: SubscriptionId) {
        // A closed monitor has no listeners left to remove
        let _ = self.command_tx.send(MonitorCommand::Unsubscribe { id });
    }

    /// Stop the owner task; later checks return `MonitorClosed`
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(MonitorCommand::Shutdown);
    }

    /// True once the owner task has stopped
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }
}

/// Run the probe for `kind` on a blocking worker; failures become `Undetermined`
async fn run_probe(probes: &ProbeSet, kind: CapabilityKind) -> CapabilityState {
    let Some(probe) = probes.get(kind) else {
        warn!(kind = ?kind, "no probe registered");
        return CapabilityState::Undetermined;
    };

    match tokio::task::spawn_blocking(move || probe.query()).await {
        Ok(Ok(state)) => state,
        Ok(Err(err)) => {
            warn!(kind = ?kind, error = %err, "probe failed");
            CapabilityState::Undetermined
        }
        Err(err) => {
            warn!(kind = ?kind, error = %err, "probe panicked");
            CapabilityState::Undetermined
        }
    }
}
