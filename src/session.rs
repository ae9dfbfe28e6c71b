//! One mounted console: shared store, poll loops and the action surfaces.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::api::ControlApi;
use crate::config::{ClientConfig, QuickEdit};
use crate::editor::ConfigEditor;
use crate::error::Result;
use crate::fleet::{
    refresh_download_status, refresh_fleet, ActionDispatcher, DownloadCoordinator, FleetPoller,
    FleetStore, FleetView, StoreEvent,
};
use crate::ids::ProcessId;
use crate::logs::LogViewer;
use crate::task::Liveness;

/// Owns everything that runs while the console is open.
///
/// Dropping the session (or calling [`Session::shutdown`]) stops both poll
/// loops, the log tail and pending follow-up polls, and discards results of
/// requests that were still in flight.
pub struct Session {
    api: Arc<dyn ControlApi>,
    config: ClientConfig,
    store: Arc<FleetStore>,
    liveness: Liveness,
    poller: Mutex<Option<FleetPoller>>,
    actions: ActionDispatcher,
    downloads: DownloadCoordinator,
    log_viewer: Mutex<Option<Arc<LogViewer>>>,
}

impl Session {
    /// A session with its poll loops running.
    pub fn mount(api: Arc<dyn ControlApi>, config: ClientConfig) -> Self {
        let session = Self::new(api, config);
        session.start_polling();
        session
    }

    /// A session without poll loops; state is only refreshed on demand.
    pub fn new(api: Arc<dyn ControlApi>, config: ClientConfig) -> Self {
        let store = Arc::new(FleetStore::new());
        let liveness = Liveness::new();
        let actions = ActionDispatcher::new(
            Arc::clone(&api),
            Arc::clone(&store),
            liveness.clone(),
            config.actions.clone(),
        );
        let downloads = DownloadCoordinator::new(Arc::clone(&api), Arc::clone(&store));
        Self {
            api,
            config,
            store,
            liveness,
            poller: Mutex::new(None),
            actions,
            downloads,
            log_viewer: Mutex::new(None),
        }
    }

    pub fn start_polling(&self) {
        if !self.liveness.is_alive() {
            return;
        }
        let mut poller = self.poller.lock().unwrap_or_else(|e| e.into_inner());
        if poller.is_none() {
            log::info!("Polling {}", self.config.api_url);
            *poller = Some(FleetPoller::start(
                &self.api,
                &self.store,
                &self.liveness,
                &self.config.polling,
            ));
        }
    }

    /// Fetch the fleet snapshot once, outside the poll loop.
    pub async fn refresh(&self) -> Result<bool> {
        refresh_fleet(self.api.as_ref(), &self.store, &self.liveness).await
    }

    pub async fn refresh_downloads(&self) -> Result<bool> {
        refresh_download_status(self.api.as_ref(), &self.store, &self.liveness).await
    }

    pub async fn health(&self) -> Result<()> {
        self.api.health().await
    }

    pub fn api(&self) -> &Arc<dyn ControlApi> {
        &self.api
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &FleetStore {
        &self.store
    }

    pub fn view(&self) -> FleetView {
        self.store.view()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn actions(&self) -> &ActionDispatcher {
        &self.actions
    }

    pub fn downloads(&self) -> &DownloadCoordinator {
        &self.downloads
    }

    /// Open the log view of `target`, closing any other one first.
    pub fn open_logs(&self, target: ProcessId) -> Arc<LogViewer> {
        let viewer = Arc::new(LogViewer::open(
            Arc::clone(&self.api),
            target,
            self.config.logs.clone(),
        ));
        let previous = self
            .log_viewer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(Arc::clone(&viewer));
        if let Some(previous) = previous {
            previous.close();
        }
        viewer
    }

    pub fn log_viewer(&self) -> Option<Arc<LogViewer>> {
        self.log_viewer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn close_logs(&self) {
        let previous = self
            .log_viewer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(previous) = previous {
            previous.close();
        }
    }

    /// Load a config document into a fresh editor.
    pub async fn open_editor(&self, name: &str) -> Result<ConfigEditor> {
        ConfigEditor::open(Arc::clone(&self.api), name).await
    }

    pub fn quick_edits_for<'a>(&'a self, document: &'a str) -> impl Iterator<Item = &'a QuickEdit> {
        self.config.quick_edits_for(document)
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Stop every loop owned by the session. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.liveness.is_alive() {
            return;
        }
        log::info!("Shutting down console session");
        self.liveness.revoke();
        let poller = self.poller.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(poller) = poller {
            poller.stop();
        }
        self.actions.shutdown();
        self.close_logs();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
