use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use super::store::FleetStore;
use crate::api::ControlApi;
use crate::error::{AppError, Result};
use crate::ids::ProcessId;

/// Starts asset download jobs and keeps the operator's service selection.
///
/// The POST only tells whether the job was accepted. Progress is observed
/// through the download-status poll.
pub struct DownloadCoordinator {
    api: Arc<dyn ControlApi>,
    store: Arc<FleetStore>,
    selection: Mutex<BTreeSet<ProcessId>>,
}

impl DownloadCoordinator {
    pub fn new(api: Arc<dyn ControlApi>, store: Arc<FleetStore>) -> Self {
        Self {
            api,
            store,
            selection: Mutex::new(BTreeSet::new()),
        }
    }

    pub async fn download_all(&self, force: bool) -> Result<()> {
        log::info!("Requesting download of all assets (force={})", force);
        self.api.download_all(force).await.inspect_err(|e| {
            log::warn!("Bulk download rejected: {}", e);
        })
    }

    pub async fn download_selected(&self, ids: &[ProcessId], force: bool) -> Result<()> {
        if ids.is_empty() {
            return Err(AppError::empty_selection());
        }
        log::info!(
            "Requesting download of {} asset(s) (force={})",
            ids.len(),
            force
        );
        self.api.download_selected(ids, force).await.inspect_err(|e| {
            log::warn!("Selective download rejected: {}", e);
        })
    }

    /// Download whatever is currently selected.
    pub async fn download_selection(&self, force: bool) -> Result<()> {
        let selected = self.selected();
        self.download_selected(&selected, force).await
    }

    /// Flip `id` in the selection. Returns whether it is now selected.
    pub fn toggle(&self, id: &ProcessId) -> bool {
        let mut selection = self.selection.lock().unwrap_or_else(|e| e.into_inner());
        if selection.remove(id) {
            false
        } else {
            selection.insert(id.clone());
            true
        }
    }

    pub fn is_selected(&self, id: &ProcessId) -> bool {
        self.selection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }

    pub fn selected(&self) -> Vec<ProcessId> {
        self.selection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.selection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// False while the polled job reports a download in progress.
    pub fn can_start(&self) -> bool {
        !self.store.download_status().is_active()
    }
}
