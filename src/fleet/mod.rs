//! Fleet state, lifecycle actions and asset downloads.

mod actions;
mod download;
mod poller;
mod store;

pub use actions::{ActionDispatcher, ActionGuard, ActionLocks};
pub use download::DownloadCoordinator;
pub use poller::{refresh_download_status, refresh_fleet, FleetPoller};
pub use store::{FleetStore, FleetView, StoreEvent};
