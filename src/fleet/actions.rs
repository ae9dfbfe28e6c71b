//! Lifecycle commands: start, stop, add instance, remove instance.
//!
//! Every command takes the action lock for its target, sends one request and,
//! on success, schedules a follow-up poll instead of trusting the response to
//! describe the final process state. The supervisor starts and stops
//! processes asynchronously, so the state is only read back after a settle
//! delay.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;

use super::poller::refresh_fleet;
use super::store::FleetStore;
use crate::api::ControlApi;
use crate::config::{ActionConfig, LockScope};
use crate::error::{AppError, Result};
use crate::ids::{ActionKey, InstanceId, ProcessId};
use crate::task::Liveness;

/// Set of targets with an action in flight.
pub struct ActionLocks {
    scope: LockScope,
    in_flight: Mutex<HashSet<ActionKey>>,
}

impl ActionLocks {
    pub fn new(scope: LockScope) -> Self {
        Self {
            scope,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Take the lock for `key`, or `None` if the scope is already held.
    pub fn try_acquire(self: &Arc<Self>, key: ActionKey) -> Option<ActionGuard> {
        let mut held = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let blocked = match self.scope {
            LockScope::PerTarget => held.contains(&key),
            LockScope::Global => !held.is_empty(),
        };
        if blocked {
            return None;
        }
        held.insert(key.clone());
        drop(held);

        Some(ActionGuard {
            locks: Arc::clone(self),
            key,
        })
    }

    /// Whether a control for `key` should be disabled right now.
    pub fn is_locked(&self, key: &ActionKey) -> bool {
        let held = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        match self.scope {
            LockScope::PerTarget => held.contains(key),
            LockScope::Global => !held.is_empty(),
        }
    }

    pub fn in_flight(&self) -> Vec<ActionKey> {
        let held = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        held.iter().cloned().collect()
    }

    fn release(&self, key: &ActionKey) {
        let mut held = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(key);
    }
}

/// Releases its key when dropped, whichever way the action ended.
pub struct ActionGuard {
    locks: Arc<ActionLocks>,
    key: ActionKey,
}

impl Drop for ActionGuard {
    fn drop(&mut self) {
        self.locks.release(&self.key);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Remove,
}

impl Command {
    fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Remove => "remove",
        }
    }

    fn expected(self) -> Expected {
        match self {
            Self::Start => Expected::Running(true),
            Self::Stop => Expected::Running(false),
            Self::Remove => Expected::Absent,
        }
    }
}

/// State the target should reach once the supervisor has acted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expected {
    Running(bool),
    Absent,
}

impl Expected {
    fn is_met(self, observed: Option<bool>) -> bool {
        match self {
            Self::Running(running) => observed == Some(running),
            Self::Absent => observed.is_none(),
        }
    }
}

/// Delayed re-poll after a successful command, with optional backoff while
/// the target has not converged.
struct Followup {
    api: Arc<dyn ControlApi>,
    store: Arc<FleetStore>,
    liveness: Liveness,
    id: ProcessId,
    expected: Expected,
    delay: Duration,
    retries: u32,
    max_backoff: Duration,
}

impl Followup {
    async fn run(self) {
        let mut delay = self.delay;
        for attempt in 0..=self.retries {
            tokio::time::sleep(delay).await;
            if !self.liveness.is_alive() {
                return;
            }

            let polled = refresh_fleet(self.api.as_ref(), &self.store, &self.liveness)
                .await
                .is_ok();
            if polled && self.expected.is_met(self.store.running_state(&self.id)) {
                return;
            }

            if attempt < self.retries {
                delay = delay.saturating_mul(2).min(self.max_backoff);
                log::debug!(
                    "{} not settled yet, polling again in {:?}",
                    self.id,
                    delay
                );
            }
        }

        if self.retries > 0 {
            log::warn!(
                "{} did not reach {:?} after {} polls",
                self.id,
                self.expected,
                self.retries + 1
            );
        }
    }
}

/// Issues lifecycle commands against the control API.
pub struct ActionDispatcher {
    api: Arc<dyn ControlApi>,
    store: Arc<FleetStore>,
    locks: Arc<ActionLocks>,
    config: ActionConfig,
    liveness: Liveness,
    followups: Mutex<JoinSet<()>>,
}

impl ActionDispatcher {
    pub fn new(
        api: Arc<dyn ControlApi>,
        store: Arc<FleetStore>,
        liveness: Liveness,
        config: ActionConfig,
    ) -> Self {
        Self {
            api,
            store,
            locks: Arc::new(ActionLocks::new(config.lock_scope)),
            config,
            liveness,
            followups: Mutex::new(JoinSet::new()),
        }
    }

    pub fn locks(&self) -> &ActionLocks {
        &self.locks
    }

    pub fn is_busy(&self, key: &ActionKey) -> bool {
        self.locks.is_locked(key)
    }

    pub async fn start(&self, id: &ProcessId) -> Result<()> {
        self.dispatch(ActionKey::Process(id.clone()), Command::Start)
            .await
    }

    pub async fn stop(&self, id: &ProcessId) -> Result<()> {
        self.dispatch(ActionKey::Process(id.clone()), Command::Stop)
            .await
    }

    /// Start the next free instance number of `group`. Returns its id.
    pub async fn add_instance(&self, group: &str) -> Result<ProcessId> {
        let target = self
            .store
            .group(group)
            .ok_or_else(|| AppError::group_not_found(group))?;
        let candidate = target.next_instance();
        let id = candidate.process_id();
        self.dispatch(ActionKey::Instance(candidate), Command::Start)
            .await?;
        Ok(id)
    }

    /// Remove one instance. The last instance of a group is never removed.
    pub async fn remove_instance(&self, group: &str, number: u32) -> Result<()> {
        let target = self
            .store
            .group(group)
            .ok_or_else(|| AppError::group_not_found(group))?;
        if !target.can_remove() {
            return Err(AppError::last_instance(group));
        }
        let key = ActionKey::Instance(InstanceId::new(target.name, number));
        self.dispatch(key, Command::Remove).await
    }

    async fn dispatch(&self, key: ActionKey, command: Command) -> Result<()> {
        let Some(_guard) = self.locks.try_acquire(key.clone()) else {
            log::debug!("Ignoring {} of {}: action in flight", command.verb(), key);
            return Err(AppError::action_in_flight(&key.to_string()));
        };

        let id = key.wire_id();
        log::info!("Requesting {} of {}", command.verb(), id);
        let result = match command {
            Command::Start => self.api.start(&id).await,
            Command::Stop => self.api.stop(&id).await,
            Command::Remove => self.api.remove(&id).await,
        };

        match result {
            Ok(()) => {
                self.schedule_followup(id, command.expected());
                Ok(())
            }
            Err(e) => {
                log::warn!("Failed to {} {}: {}", command.verb(), id, e);
                Err(e)
            }
        }
    }

    fn schedule_followup(&self, id: ProcessId, expected: Expected) {
        let followup = Followup {
            api: Arc::clone(&self.api),
            store: Arc::clone(&self.store),
            liveness: self.liveness.clone(),
            id,
            expected,
            delay: self.config.settle_delay(),
            retries: self.config.convergence_retries,
            max_backoff: self.config.max_backoff(),
        };

        let mut followups = self.followups.lock().unwrap_or_else(|e| e.into_inner());
        while followups.try_join_next().is_some() {}
        followups.spawn(followup.run());
    }

    /// Abort pending follow-up polls.
    pub fn shutdown(&self) {
        let mut followups = self.followups.lock().unwrap_or_else(|e| e.into_inner());
        followups.abort_all();
    }
}
