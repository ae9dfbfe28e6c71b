//! Latest known fleet state, shared between the poll loops and the view.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::api::{DownloadJobStatus, FleetSnapshot, GameServerGroup};
use crate::ids::ProcessId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreEvent {
    FleetUpdated,
    DownloadUpdated,
}

/// Everything a view renders from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FleetView {
    pub snapshot: Option<FleetSnapshot>,
    pub download: DownloadJobStatus,
    /// Bumped every time the snapshot actually changes.
    pub generation: u64,
    /// When the snapshot last changed, alongside `generation`.
    pub last_changed: Option<DateTime<Utc>>,
    /// Fleet polls that failed since the last success.
    pub consecutive_failures: u32,
}

/// Holds the latest snapshot and download status.
///
/// Both are replaced wholesale, never merged. Replacing a value with an equal
/// one is a no-op and emits nothing.
pub struct FleetStore {
    state: RwLock<FleetView>,
    events: broadcast::Sender<StoreEvent>,
}

impl FleetStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(FleetView::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }

    /// Replace the fleet snapshot. Returns whether anything changed.
    pub fn apply_snapshot(&self, snapshot: FleetSnapshot) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures = 0;
        if state.snapshot.as_ref() == Some(&snapshot) {
            return false;
        }
        state.snapshot = Some(snapshot);
        state.generation += 1;
        state.last_changed = Some(Utc::now());
        drop(state);

        self.emit(StoreEvent::FleetUpdated);
        true
    }

    /// Record a failed fleet poll; the previous snapshot stays in place.
    pub fn record_fleet_failure(&self) -> u32 {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.consecutive_failures
    }

    /// Replace the download job status. Returns whether anything changed.
    pub fn apply_download_status(&self, status: DownloadJobStatus) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.download == status {
            return false;
        }
        state.download = status;
        drop(state);

        self.emit(StoreEvent::DownloadUpdated);
        true
    }

    pub fn view(&self) -> FleetView {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn snapshot(&self) -> Option<FleetSnapshot> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot
            .clone()
    }

    pub fn download_status(&self) -> DownloadJobStatus {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .download
            .clone()
    }

    pub fn group(&self, name: &str) -> Option<GameServerGroup> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.snapshot.as_ref().and_then(|s| s.group(name).cloned())
    }

    pub fn running_state(&self, id: &ProcessId) -> Option<bool> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.snapshot.as_ref().and_then(|s| s.running_state(id))
    }

    pub fn generation(&self) -> u64 {
        self.state.read().unwrap_or_else(|e| e.into_inner()).generation
    }

    /// True until the first snapshot arrives.
    pub fn is_loading(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot
            .is_none()
    }
}

impl Default for FleetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DownloadState;
    use crate::testing::fleet_fixture;

    #[test]
    fn applying_the_same_snapshot_twice_is_idempotent() {
        let store = FleetStore::new();
        let mut events = store.subscribe();

        assert!(store.apply_snapshot(fleet_fixture()));
        let first = store.view();

        assert!(!store.apply_snapshot(fleet_fixture()));
        let second = store.view();

        assert_eq!(first, second);
        assert!(first.last_changed.is_some());
        assert_eq!(events.try_recv().unwrap(), StoreEvent::FleetUpdated);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn unchanged_poll_after_failures_only_resets_the_counter() {
        let store = FleetStore::new();
        store.apply_snapshot(fleet_fixture());
        let before = store.view();

        store.record_fleet_failure();
        assert!(!store.apply_snapshot(fleet_fixture()));
        assert_eq!(store.view(), before);
    }

    #[test]
    fn snapshot_is_replaced_not_merged() {
        let store = FleetStore::new();
        store.apply_snapshot(fleet_fixture());

        let mut shrunk = fleet_fixture();
        shrunk.services.clear();
        shrunk.gameservers.remove("LOBBY");
        assert!(store.apply_snapshot(shrunk.clone()));

        assert_eq!(store.snapshot(), Some(shrunk));
        assert_eq!(store.running_state(&ProcessId::new("lobby_0")), None);
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn failures_are_counted_until_next_success() {
        let store = FleetStore::new();
        assert!(store.is_loading());
        assert_eq!(store.record_fleet_failure(), 1);
        assert_eq!(store.record_fleet_failure(), 2);
        assert!(store.is_loading());

        store.apply_snapshot(fleet_fixture());
        assert_eq!(store.view().consecutive_failures, 0);
        assert!(!store.is_loading());
    }

    #[test]
    fn download_status_changes_emit_events() {
        let store = FleetStore::new();
        let mut events = store.subscribe();

        assert!(!store.apply_download_status(DownloadJobStatus::default()));
        let downloading = DownloadJobStatus {
            status: DownloadState::Downloading,
            progress: 25,
            current: "Auth.jar".to_string(),
            errors: Vec::new(),
        };
        assert!(store.apply_download_status(downloading.clone()));
        assert_eq!(store.download_status(), downloading);
        assert_eq!(events.try_recv().unwrap(), StoreEvent::DownloadUpdated);
    }
}
