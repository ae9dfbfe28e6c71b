//! In-memory control API used by unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::api::{
    ConfigPayload, ControlApi, DownloadJobStatus, FleetSnapshot, GameServerGroup, Instance,
    ProcessRef,
};
use crate::error::{AppError, Result};
use crate::ids::{derive_id, GroupName, ProcessId};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Health,
    FetchFleet,
    FetchDownloadStatus,
    DownloadAll { force: bool },
    DownloadSelected { selected: Vec<ProcessId>, force: bool },
    Start(ProcessId),
    Stop(ProcessId),
    Remove(ProcessId),
    FetchLogs { id: ProcessId, lines: u32 },
    FetchConfig(String),
    SaveConfig { name: String, content: serde_json::Value },
    SaveConfigField { name: String, field_path: String, value: serde_json::Value },
}

impl Call {
    pub(crate) fn is_command(&self) -> bool {
        !matches!(
            self,
            Self::Health
                | Self::FetchFleet
                | Self::FetchDownloadStatus
                | Self::FetchLogs { .. }
                | Self::FetchConfig(_)
        )
    }
}

fn process(id: &str, name: &str, kind: &str, running: bool) -> ProcessRef {
    ProcessRef {
        id: ProcessId::new(id),
        name: name.to_string(),
        kind: kind.to_string(),
        running,
    }
}

fn group(name: &str, running: &[bool]) -> GameServerGroup {
    GameServerGroup {
        name: GroupName::new(name),
        instances: running
            .iter()
            .zip(0u32..)
            .map(|(&running, n)| Instance {
                id: ProcessId::new(derive_id(name, n)),
                instance: n,
                running,
            })
            .collect(),
    }
}

/// Proxy up, limbo down, one service, `LOBBY` with two instances and
/// `SURVIVAL` with one.
pub(crate) fn fleet_fixture() -> FleetSnapshot {
    FleetSnapshot {
        proxy: process("proxy", "Proxy", "proxy", true),
        limbo: process("nanolimbo", "NanoLimbo", "limbo", false),
        services: vec![process("auth", "Auth", "service", true)],
        gameservers: BTreeMap::from([
            ("LOBBY".to_string(), group("LOBBY", &[true, false])),
            ("SURVIVAL".to_string(), group("SURVIVAL", &[false])),
        ]),
    }
}

/// Scriptable [`ControlApi`] that records every call.
pub(crate) struct FakeApi {
    calls: Mutex<Vec<Call>>,
    fleet: Mutex<FleetSnapshot>,
    download: Mutex<DownloadJobStatus>,
    logs: Mutex<Vec<String>>,
    configs: Mutex<HashMap<String, ConfigPayload>>,
    rejection: Mutex<Option<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
    fail_fleet: AtomicBool,
    fail_logs: AtomicBool,
    apply_commands: AtomicBool,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fleet: Mutex::new(fleet_fixture()),
            download: Mutex::new(DownloadJobStatus::default()),
            logs: Mutex::new(Vec::new()),
            configs: Mutex::new(HashMap::new()),
            rejection: Mutex::new(None),
            gate: Mutex::new(None),
            fail_fleet: AtomicBool::new(false),
            fail_logs: AtomicBool::new(false),
            apply_commands: AtomicBool::new(true),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub(crate) fn commands(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(Call::is_command)
            .collect()
    }

    pub(crate) fn fleet_fetches(&self) -> usize {
        self.count(|c| matches!(c, Call::FetchFleet))
    }

    pub(crate) fn set_fleet(&self, snapshot: FleetSnapshot) {
        *self.fleet.lock().unwrap() = snapshot;
    }

    pub(crate) fn set_download(&self, status: DownloadJobStatus) {
        *self.download.lock().unwrap() = status;
    }

    pub(crate) fn set_logs(&self, lines: &[&str]) {
        *self.logs.lock().unwrap() = lines.iter().map(|l| (*l).to_string()).collect();
    }

    pub(crate) fn set_config(&self, name: &str, payload: ConfigPayload) {
        self.configs
            .lock()
            .unwrap()
            .insert(name.to_string(), payload);
    }

    /// Make every command fail with this server message.
    pub(crate) fn reject_commands(&self, message: Option<&str>) {
        *self.rejection.lock().unwrap() = message.map(str::to_string);
    }

    pub(crate) fn fail_fleet(&self, fail: bool) {
        self.fail_fleet.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_logs(&self, fail: bool) {
        self.fail_logs.store(fail, Ordering::SeqCst);
    }

    /// Whether start/stop/remove change the served fleet.
    pub(crate) fn apply_commands(&self, apply: bool) {
        self.apply_commands.store(apply, Ordering::SeqCst);
    }

    /// Hold every command until the returned notify is signalled.
    pub(crate) fn hold_commands(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn command(&self, call: Call) -> Result<()> {
        self.record(call.clone());
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let rejection = self.rejection.lock().unwrap().clone();
        if let Some(message) = rejection {
            return Err(AppError::rejected(400, message));
        }
        if self.apply_commands.load(Ordering::SeqCst) {
            self.apply(&call);
        }
        Ok(())
    }

    fn apply(&self, call: &Call) {
        let mut guard = self.fleet.lock().unwrap();
        let fleet = &mut *guard;
        match call {
            Call::Start(id) | Call::Stop(id) => {
                let running = matches!(call, Call::Start(_));
                let mut found = false;
                for p in std::iter::once(&mut fleet.proxy)
                    .chain(std::iter::once(&mut fleet.limbo))
                    .chain(fleet.services.iter_mut())
                {
                    if &p.id == id {
                        p.running = running;
                        found = true;
                    }
                }
                for g in fleet.gameservers.values_mut() {
                    for i in &mut g.instances {
                        if &i.id == id {
                            i.running = running;
                            found = true;
                        }
                    }
                }
                if !found && running {
                    if let Some((group, n)) = crate::ids::parse_instance_id(id.as_str()) {
                        if let Some(g) = fleet
                            .gameservers
                            .values_mut()
                            .find(|g| g.name.as_str().to_lowercase() == group)
                        {
                            g.instances.push(Instance {
                                id: id.clone(),
                                instance: n,
                                running: true,
                            });
                        }
                    }
                }
            }
            Call::Remove(id) => {
                for g in fleet.gameservers.values_mut() {
                    g.instances.retain(|i| &i.id != id);
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl ControlApi for FakeApi {
    async fn health(&self) -> Result<()> {
        self.record(Call::Health);
        Ok(())
    }

    async fn fetch_fleet(&self) -> Result<FleetSnapshot> {
        self.record(Call::FetchFleet);
        if self.fail_fleet.load(Ordering::SeqCst) {
            return Err(AppError::network("connection refused"));
        }
        Ok(self.fleet.lock().unwrap().clone())
    }

    async fn fetch_download_status(&self) -> Result<DownloadJobStatus> {
        self.record(Call::FetchDownloadStatus);
        Ok(self.download.lock().unwrap().clone())
    }

    async fn download_all(&self, force: bool) -> Result<()> {
        self.command(Call::DownloadAll { force }).await
    }

    async fn download_selected(&self, selected: &[ProcessId], force: bool) -> Result<()> {
        self.command(Call::DownloadSelected {
            selected: selected.to_vec(),
            force,
        })
        .await
    }

    async fn start(&self, id: &ProcessId) -> Result<()> {
        self.command(Call::Start(id.clone())).await
    }

    async fn stop(&self, id: &ProcessId) -> Result<()> {
        self.command(Call::Stop(id.clone())).await
    }

    async fn remove(&self, id: &ProcessId) -> Result<()> {
        self.command(Call::Remove(id.clone())).await
    }

    async fn fetch_logs(&self, id: &ProcessId, lines: u32) -> Result<Vec<String>> {
        self.record(Call::FetchLogs {
            id: id.clone(),
            lines,
        });
        if self.fail_logs.load(Ordering::SeqCst) {
            return Err(AppError::rejected(404, "Log file not found"));
        }
        Ok(self.logs.lock().unwrap().clone())
    }

    async fn fetch_config(&self, name: &str) -> Result<ConfigPayload> {
        self.record(Call::FetchConfig(name.to_string()));
        self.configs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::rejected(404, "Config file not found"))
    }

    async fn save_config(&self, name: &str, content: serde_json::Value) -> Result<()> {
        self.command(Call::SaveConfig {
            name: name.to_string(),
            content,
        })
        .await
    }

    async fn save_config_field(
        &self,
        name: &str,
        field_path: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        self.command(Call::SaveConfigField {
            name: name.to_string(),
            field_path: field_path.to_string(),
            value: value.clone(),
        })
        .await?;
        // The supervisor rewrites the whole file; model that as a new raw text.
        if let Some(payload) = self.configs.lock().unwrap().get_mut(name) {
            let value = value.as_str().map_or_else(|| value.to_string(), str::to_string);
            payload.raw = Some(format!("{}: {}\n", field_path, value));
        }
        Ok(())
    }
}
