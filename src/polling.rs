use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::capability::CapabilityKind;
use crate::error::CapabilityError;
use crate::monitor::PermissionMonitor;

static NEXT_DISPLAY: AtomicU64 = AtomicU64::new(1);

/// Identity of a consumer that shows capability state (a view, a CLI session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayHandle(u64);

impl DisplayHandle {
    /// Allocate a process-unique handle
    pub fn next() -> Self {
        Self(NEXT_DISPLAY.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a host-assigned identifier
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for DisplayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of [`PollingController::start_polling`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new entry was created
    Started,
    /// An existing entry for the same pair was cancelled and replaced
    Replaced,
    /// The capability is already granted; nothing to poll
    AlreadyGranted,
}

type EntryKey = (CapabilityKind, DisplayHandle);

struct PollEntry {
    generation: u64,
    interval: Duration,
    cancel: watch::Sender<bool>,
}

impl PollEntry {
    fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

#[derive(Default)]
struct Entries {
    active: HashMap<EntryKey, PollEntry>,
    next_generation: u64,
}

/// Owns every poll entry; cheap to clone
///
/// Each (kind, display) pair has at most one entry. An entry ends exactly
/// once: when its capability turns `Granted` (the loop removes itself) or
/// when the display calls [`PollingController::stop_polling`].
#[derive(Clone)]
pub struct PollingController {
    monitor: PermissionMonitor,
    entries: Arc<Mutex<Entries>>,
}

impl PollingController {
    /// Controller that rechecks through `monitor`
    pub fn new(monitor: PermissionMonitor) -> Self {
        Self {
            monitor,
            entries: Arc::new(Mutex::new(Entries::default())),
        }
    }

    /// Poll `kind` every `interval` on behalf of the display `handle`
    ///
    /// Replaces an existing entry for the same pair. Must be called from
    /// within a tokio runtime.
    pub fn start_polling(
        &self,
        kind: CapabilityKind,
        handle: DisplayHandle,
        interval: Duration,
    ) -> StartOutcome {
        let mut entries = lock(&self.entries);

        if self.monitor.state(kind).is_granted() {
            if let Some(stale) = entries.active.remove(&(kind, handle)) {
                stale.cancel();
            }
            debug!(kind = ?kind, display = %handle, "already granted; not polling");
            return StartOutcome::AlreadyGranted;
        }

        entries.next_generation += 1;
        let generation = entries.next_generation;
        let (cancel, cancel_rx) = watch::channel(false);

        tokio::spawn(poll_loop(
            self.monitor.clone(),
            Arc::clone(&self.entries),
            (kind, handle),
            generation,
            interval,
            cancel_rx,
        ));

        let entry = PollEntry {
            generation,
            interval,
            cancel,
        };
        if let Some(previous) = entries.active.insert((kind, handle), entry) {
            previous.cancel();
            let defect = CapabilityError::DuplicateEntry {
                kind,
                display: handle,
            };
            warn!(error = %defect, "replacing poll entry");
            return StartOutcome::Replaced;
        }

        info!(kind = ?kind, display = %handle, interval = ?interval, "polling started");
        StartOutcome::Started
    }

    /// Cancel every entry owned by the display `handle`; returns how many were cancelled
    pub fn stop_polling(&self, handle: DisplayHandle) -> usize {
        let mut entries = lock(&self.entries);
        let keys: Vec<EntryKey> = entries
            .active
            .keys()
            .filter(|(_, owner)| *owner == handle)
            .copied()
            .collect();

        for key in &keys {
            if let Some(entry) = entries.active.remove(key) {
                entry.cancel();
            }
        }

        if !keys.is_empty() {
            info!(display = %handle, cancelled = keys.len(), "polling stopped");
        }
        keys.len()
    }

    /// Cancel every entry
    pub fn stop_all(&self) -> usize {
        let mut entries = lock(&self.entries);
        let cancelled = entries.active.len();
        for (_, entry) in entries.active.drain() {
            entry.cancel();
        }
        cancelled
    }

    /// Whether `display` currently polls `kind`
    pub fn is_polling(&self, kind: CapabilityKind, display: DisplayHandle) -> bool {
        lock(&self.entries).active.contains_key(&(kind, display))
    }

    /// Active entries with their intervals, sorted
    pub fn active_entries(&self) -> Vec<(CapabilityKind, DisplayHandle, Duration)> {
        let entries = lock(&self.entries);
        let mut active: Vec<_> = entries
            .active
            .iter()
            .map(|(&(kind, display), entry)| (kind, display, entry.interval))
            .collect();
        active.sort_by_key(|&(kind, display, _)| (kind, display));
        active
    }
}

// Entry bookkeeping never panics mid-update, so a poisoned lock still holds
// a consistent map.
fn lock(entries: &Mutex<Entries>) -> MutexGuard<'_, Entries> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remove the entry only if it still belongs to this loop's generation
fn retire(entries: &Mutex<Entries>, key: EntryKey, generation: u64) {
    let mut entries = lock(entries);
    if entries
        .active
        .get(&key)
        .is_some_and(|entry| entry.generation == generation)
    {
        if let Some(entry) = entries.active.remove(&key) {
            entry.cancel();
        }
    }
}

/// Resolves once the entry is cancelled or dropped
async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    while !*cancel_rx.borrow_and_update() {
        if cancel_rx.changed().await.is_err() {
            return;
        }
    }
}

async fn poll_loop(
    monitor: PermissionMonitor,
    entries: Arc<Mutex<Entries>>,
    key: EntryKey,
    generation: u64,
    interval: Duration,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let (kind, owner) = key;
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancelled(&mut cancel_rx) => {
                debug!(kind = ?kind, display = %owner, ticks, "poll loop cancelled");
                return;
            }
            () = tokio::time::sleep(interval) => {}
        }

        ticks += 1;
        match monitor.check(kind).await {
            Ok(state) if state.is_granted() => {
                retire(&entries, key, generation);
                info!(kind = ?kind, display = %owner, ticks, "granted; polling finished");
                return;
            }
            Ok(state) => {
                debug!(kind = ?kind, display = %owner, state = ?state, ticks, "poll tick");
            }
            Err(err) => {
                retire(&entries, key, generation);
                warn!(kind = ?kind, display = %owner, error = %err, "poll loop stopped");
                return;
            }
        }

        // A cancel that arrived during the tick still lets the tick finish
        if *cancel_rx.borrow() {
            debug!(kind = ?kind, display = %owner, ticks, "poll loop cancelled after tick");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityState;
    use crate::config::RequestConfig;
    use crate::probe::{MockCapabilityProbe, ProbeSet};
    use std::sync::atomic::AtomicUsize;

    const INTERVAL: Duration = Duration::from_secs(2);

    fn sequence_probe(answers: Vec<CapabilityState>, calls: Arc<AtomicUsize>) -> MockCapabilityProbe {
        let mut probe = MockCapabilityProbe::new();
        probe.expect_query().returning(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok(answers
                .get(n)
                .or_else(|| answers.last())
                .copied()
                .unwrap_or(CapabilityState::Undetermined))
        });
        probe
    }

    fn controller(
        kind: CapabilityKind,
        answers: Vec<CapabilityState>,
    ) -> (PollingController, PermissionMonitor, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let monitor = PermissionMonitor::spawn(
            ProbeSet::new().with(kind, sequence_probe(answers, Arc::clone(&calls))),
            RequestConfig::default(),
        );
        (PollingController::new(monitor.clone()), monitor, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_itself_once_granted() {
        let kind = CapabilityKind::ScreenCaptureAccess;
        let (polling, monitor, calls) = controller(
            kind,
            vec![
                CapabilityState::NotGranted,
                CapabilityState::NotGranted,
                CapabilityState::Granted,
            ],
        );
        let display = DisplayHandle::next();

        assert_eq!(
            polling.start_polling(kind, display, INTERVAL),
            StartOutcome::Started
        );
        tokio::time::sleep(INTERVAL * 10).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!polling.is_polling(kind, display));
        assert_eq!(monitor.state(kind), CapabilityState::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_entry() {
        let kind = CapabilityKind::MicrophoneAccess;
        let (polling, _monitor, calls) = controller(kind, vec![CapabilityState::NotGranted]);
        let display = DisplayHandle::next();

        assert_eq!(
            polling.start_polling(kind, display, INTERVAL),
            StartOutcome::Started
        );
        assert_eq!(
            polling.start_polling(kind, display, INTERVAL),
            StartOutcome::Replaced
        );
        assert_eq!(polling.active_entries().len(), 1);

        // Only the replacement keeps ticking
        tokio::time::sleep(INTERVAL * 5 + Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(polling.stop_polling(display), 1);
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacement_logs_duplicate_entry() {
        let kind = CapabilityKind::ScreenCaptureAccess;
        let (polling, _monitor, _calls) = controller(kind, vec![CapabilityState::NotGranted]);
        let display = DisplayHandle::from_raw(7);

        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let outcomes = tracing::subscriber::with_default(subscriber, || {
            (
                polling.start_polling(kind, display, INTERVAL),
                polling.start_polling(kind, display, INTERVAL),
            )
        });
        assert_eq!(outcomes, (StartOutcome::Started, StartOutcome::Replaced));

        let output = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        let warning = output
            .lines()
            .find(|line| line.contains("replacing poll entry"))
            .expect("no replacement warning");
        assert!(warning.contains("WARN"));
        assert!(warning.contains("already existed"));
        assert!(warning.contains("#7"));
        polling.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_polling_is_idempotent() {
        let kind = CapabilityKind::AccessibilityAccess;
        let (polling, _monitor, calls) = controller(kind, vec![CapabilityState::NotGranted]);
        let display = DisplayHandle::next();

        polling.start_polling(kind, display, INTERVAL);
        assert_eq!(polling.stop_polling(display), 1);
        assert_eq!(polling.stop_polling(display), 0);
        assert!(polling.active_entries().is_empty());

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_without_entries_is_noop() {
        let (polling, _monitor, _calls) =
            controller(CapabilityKind::MicrophoneAccess, vec![CapabilityState::NotGranted]);
        assert_eq!(polling.stop_polling(DisplayHandle::next()), 0);
        assert_eq!(polling.stop_all(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_displays_poll_independently() {
        let kind = CapabilityKind::MicrophoneAccess;
        let (polling, _monitor, _calls) = controller(kind, vec![CapabilityState::NotGranted]);
        let settings_view = DisplayHandle::next();
        let onboarding_view = DisplayHandle::next();

        polling.start_polling(kind, settings_view, INTERVAL);
        polling.start_polling(kind, onboarding_view, INTERVAL);
        assert_eq!(polling.active_entries().len(), 2);

        assert_eq!(polling.stop_polling(settings_view), 1);
        assert!(!polling.is_polling(kind, settings_view));
        assert!(polling.is_polling(kind, onboarding_view));
    }

    #[tokio::test(start_paused = true)]
    async fn test_granted_kind_is_not_polled() {
        let kind = CapabilityKind::MicrophoneAccess;
        let (polling, monitor, _calls) = controller(kind, vec![CapabilityState::Granted]);
        monitor.check(kind).await.unwrap();

        let display = DisplayHandle::next();
        assert_eq!(
            polling.start_polling(kind, display, INTERVAL),
            StartOutcome::AlreadyGranted
        );
        assert!(polling.active_entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_cancels_everything() {
        let kind = CapabilityKind::ScreenCaptureAccess;
        let (polling, _monitor, calls) = controller(kind, vec![CapabilityState::NotGranted]);

        polling.start_polling(kind, DisplayHandle::next(), INTERVAL);
        polling.start_polling(kind, DisplayHandle::next(), INTERVAL);
        assert_eq!(polling.stop_all(), 2);

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_monitor_ends_loop() {
        let kind = CapabilityKind::MicrophoneAccess;
        let (polling, monitor, _calls) = controller(kind, vec![CapabilityState::NotGranted]);
        let display = DisplayHandle::next();

        polling.start_polling(kind, display, INTERVAL);
        monitor.shutdown();
        tokio::time::sleep(INTERVAL * 2).await;

        assert!(!polling.is_polling(kind, display));
    }

    #[test]
    fn test_display_handles_are_unique() {
        let a = DisplayHandle::next();
        let b = DisplayHandle::next();
        assert_ne!(a, b);
        assert_eq!(DisplayHandle::from_raw(3).to_string(), "#3");
    }
}
