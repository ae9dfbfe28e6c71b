//! Fleet snapshot and download-status poll loops.

use std::sync::Arc;

use super::store::FleetStore;
use crate::api::ControlApi;
use crate::config::PollingConfig;
use crate::error::Result;
use crate::task::{Liveness, PeriodicTask};

/// Fetch one fleet snapshot and replace the stored one.
///
/// Returns whether the snapshot changed. A failure leaves the previous
/// snapshot in place and is logged; results that resolve after the owner was
/// torn down are dropped.
pub async fn refresh_fleet(
    api: &dyn ControlApi,
    store: &FleetStore,
    liveness: &Liveness,
) -> Result<bool> {
    let result = api.fetch_fleet().await;
    if !liveness.is_alive() {
        log::debug!("Dropping fleet snapshot that resolved after teardown");
        return Ok(false);
    }
    match result {
        Ok(snapshot) => Ok(store.apply_snapshot(snapshot)),
        Err(e) => {
            let failures = store.record_fleet_failure();
            log::warn!("Fleet poll failed ({} in a row): {}", failures, e);
            Err(e)
        }
    }
}

/// Fetch the download job status and replace the stored one.
pub async fn refresh_download_status(
    api: &dyn ControlApi,
    store: &FleetStore,
    liveness: &Liveness,
) -> Result<bool> {
    let result = api.fetch_download_status().await;
    if !liveness.is_alive() {
        return Ok(false);
    }
    match result {
        Ok(status) => Ok(store.apply_download_status(status)),
        Err(e) => {
            log::warn!("Download status poll failed: {}", e);
            Err(e)
        }
    }
}

/// The two ambient poll loops of a mounted session.
pub struct FleetPoller {
    fleet: PeriodicTask,
    download: PeriodicTask,
}

impl FleetPoller {
    pub fn start(
        api: &Arc<dyn ControlApi>,
        store: &Arc<FleetStore>,
        liveness: &Liveness,
        config: &PollingConfig,
    ) -> Self {
        let fleet = {
            let api = Arc::clone(api);
            let store = Arc::clone(store);
            let liveness = liveness.clone();
            PeriodicTask::spawn("fleet-poll", config.fleet_interval(), move || {
                let api = Arc::clone(&api);
                let store = Arc::clone(&store);
                let liveness = liveness.clone();
                async move {
                    let _ = refresh_fleet(api.as_ref(), &store, &liveness).await;
                }
            })
        };

        let download = {
            let api = Arc::clone(api);
            let store = Arc::clone(store);
            let liveness = liveness.clone();
            PeriodicTask::spawn("download-poll", config.download_interval(), move || {
                let api = Arc::clone(&api);
                let store = Arc::clone(&store);
                let liveness = liveness.clone();
                async move {
                    let _ = refresh_download_status(api.as_ref(), &store, &liveness).await;
                }
            })
        };

        Self { fleet, download }
    }

    pub fn stop(&self) {
        self.fleet.cancel();
        self.download.cancel();
    }
}
