use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::monitor::PermissionMonitor;

/// Host process foreground transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The app became frontmost (e.g. the user came back from System Settings)
    ForegroundEntered,
    /// The app lost focus
    ForegroundExited,
}

/// Turns foreground transitions into one debounced full recheck
///
/// Each `ForegroundEntered` restarts the settle delay, so a burst of events
/// produces a single `check_all` once the burst is over.
#[derive(Clone)]
pub struct LifecycleBridge {
    monitor: PermissionMonitor,
    delay: Duration,
    generation: Arc<AtomicU64>,
    rechecks: Arc<AtomicU64>,
}

impl LifecycleBridge {
    /// Bridge that waits `delay` after the last foreground event
    pub fn new(monitor: PermissionMonitor, delay: Duration) -> Self {
        Self {
            monitor,
            delay,
            generation: Arc::new(AtomicU64::new(0)),
            rechecks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// React to one event; must be called from within a tokio runtime
    pub fn handle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::ForegroundEntered => self.schedule_recheck(),
            LifecycleEvent::ForegroundExited => {
                info!("left foreground; permissions may change externally");
            }
        }
    }

    /// Consume events from `events` until the sender side closes
    pub fn spawn(self, mut events: mpsc::Receiver<LifecycleEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!(event = ?event, "lifecycle event");
                self.handle(event);
            }
            debug!("lifecycle event source closed");
        })
    }

    /// Number of full rechecks actually run
    pub fn rechecks(&self) -> u64 {
        self.rechecks.load(Ordering::SeqCst)
    }

    fn schedule_recheck(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, delay = ?self.delay, "foreground recheck scheduled");

        let bridge = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(bridge.delay).await;

            if bridge.generation.load(Ordering::SeqCst) != generation {
                debug!(generation, "foreground recheck superseded");
                return;
            }

            bridge.rechecks.fetch_add(1, Ordering::SeqCst);
            match bridge.monitor.check_all().await {
                Ok(snapshot) => {
                    info!(missing = ?snapshot.missing(), "foreground recheck complete");
                }
                Err(err) => warn!(error = %err, "foreground recheck failed"),
            }
        });
    }
}
