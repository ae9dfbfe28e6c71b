//! Client side of the server control API.

mod http;
mod types;

use async_trait::async_trait;

use crate::error::Result;
use crate::ids::ProcessId;

pub use http::HttpControlApi;
pub(crate) use types::{
    CommandReply, DownloadAllRequest, DownloadSelectedRequest, HealthResponse, LogsResponse,
    SaveDocumentRequest, SaveFieldRequest,
};
pub use types::{
    ConfigPayload, DocumentKind, DownloadJobStatus, DownloadState, FleetSnapshot,
    GameServerGroup, Instance, ProcessRef,
};

/// Operations the console needs from the process supervisor.
///
/// Every method maps to exactly one HTTP request. Command methods return
/// `ErrorKind::Rejected` carrying the server's message when the supervisor
/// refuses them.
#[async_trait]
pub trait ControlApi: Send + Sync {
    async fn health(&self) -> Result<()>;

    async fn fetch_fleet(&self) -> Result<FleetSnapshot>;

    async fn fetch_download_status(&self) -> Result<DownloadJobStatus>;

    async fn download_all(&self, force: bool) -> Result<()>;

    async fn download_selected(&self, selected: &[ProcessId], force: bool) -> Result<()>;

    async fn start(&self, id: &ProcessId) -> Result<()>;

    async fn stop(&self, id: &ProcessId) -> Result<()>;

    async fn remove(&self, id: &ProcessId) -> Result<()>;

    /// Last `lines` log lines of a process.
    async fn fetch_logs(&self, id: &ProcessId, lines: u32) -> Result<Vec<String>>;

    async fn fetch_config(&self, name: &str) -> Result<ConfigPayload>;

    async fn save_config(&self, name: &str, content: serde_json::Value) -> Result<()>;

    async fn save_config_field(
        &self,
        name: &str,
        field_path: &str,
        value: serde_json::Value,
    ) -> Result<()>;
}
