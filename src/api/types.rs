//! Wire types of the control API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{next_instance_number, GroupName, InstanceId, ProcessId};

/// One controllable process: the proxy, the limbo service or an auxiliary service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRef {
    pub id: ProcessId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub running: bool,
}

/// One numbered member of a game-server group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: ProcessId,
    pub instance: u32,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameServerGroup {
    pub name: GroupName,
    #[serde(default)]
    pub instances: Vec<Instance>,
}

impl GameServerGroup {
    /// At least one instance must remain in every group.
    pub fn can_remove(&self) -> bool {
        self.instances.len() > 1
    }

    /// Candidate id for the next instance the operator may add.
    pub fn next_instance(&self) -> InstanceId {
        InstanceId::new(self.name.clone(), next_instance_number(&self.instances))
    }
}

/// Aggregate fleet state as returned by `GET /api/servers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub proxy: ProcessRef,
    pub limbo: ProcessRef,
    #[serde(default)]
    pub services: Vec<ProcessRef>,
    #[serde(default)]
    pub gameservers: BTreeMap<String, GameServerGroup>,
}

impl FleetSnapshot {
    pub fn group(&self, name: &str) -> Option<&GameServerGroup> {
        self.gameservers.get(name)
    }

    /// Observed running state of a process or instance, `None` if the id is unknown.
    pub fn running_state(&self, id: &ProcessId) -> Option<bool> {
        self.processes()
            .find(|p| &p.id == id)
            .map(|p| p.running)
            .or_else(|| {
                self.gameservers
                    .values()
                    .flat_map(|g| g.instances.iter())
                    .find(|i| &i.id == id)
                    .map(|i| i.running)
            })
    }

    /// Proxy, limbo and services, in display order.
    pub fn processes(&self) -> impl Iterator<Item = &ProcessRef> {
        [&self.proxy, &self.limbo]
            .into_iter()
            .chain(self.services.iter())
    }

    pub fn instance_count(&self) -> usize {
        self.gameservers.values().map(|g| g.instances.len()).sum()
    }

    pub fn running_count(&self) -> usize {
        let processes = self.processes().filter(|p| p.running).count();
        let instances = self
            .gameservers
            .values()
            .flat_map(|g| g.instances.iter())
            .filter(|i| i.running)
            .count();
        processes + instances
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    #[default]
    Idle,
    Downloading,
    Completed,
    #[serde(alias = "failed")]
    Error,
}

/// Asset download job as returned by `GET /api/download/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadJobStatus {
    #[serde(default)]
    pub status: DownloadState,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub current: String,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl DownloadJobStatus {
    pub fn is_active(&self) -> bool {
        self.status == DownloadState::Downloading
    }
}

/// Declared shape of a config document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Text,
    Json,
    #[serde(alias = "yml")]
    Yaml,
    Toml,
}

/// Response of `GET /api/config/{name}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPayload {
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct LogsResponse {
    #[serde(default)]
    pub logs: Vec<String>,
}

/// Body of command responses; only `error` is meaningful to the client.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct CommandReply {
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct DownloadAllRequest {
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct DownloadSelectedRequest<'a> {
    pub force: bool,
    pub selected: &'a [ProcessId],
}

#[derive(Debug, Serialize)]
pub(crate) struct SaveDocumentRequest {
    pub content: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct SaveFieldRequest<'a> {
    pub content: serde_json::Value,
    pub field_path: &'a str,
}
