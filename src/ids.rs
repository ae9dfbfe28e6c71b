//! Identifier scheme shared with the control API.
//!
//! Every controllable process is addressed by a flat string id. Instances of a
//! game-server group derive theirs from the group name and instance number:
//! `lowercase(group) + "_" + number`. The control API resolves ids the same
//! way, so these functions must stay byte-for-byte compatible with it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::api::Instance;

/// Wire id of any addressable process (proxy, limbo, service or instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ProcessId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Game-server group name as reported by the control API (case preserved).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupName(String);

impl GroupName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One numbered member of a group, which may not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId {
    group: GroupName,
    number: u32,
}

impl InstanceId {
    pub fn new(group: GroupName, number: u32) -> Self {
        Self { group, number }
    }

    pub fn group(&self) -> &GroupName {
        &self.group
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// The wire id the control API knows this instance by.
    pub fn process_id(&self) -> ProcessId {
        ProcessId(derive_id(self.group.as_str(), self.number))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.group.as_str().to_lowercase(), self.number)
    }
}

/// Key an in-flight action is locked under.
///
/// Fleet-level processes and group instances live in separate variants so a
/// view can tell which surface holds a lock, but both compare by wire id: an
/// instance started from the fleet list and the same instance added from its
/// group contend for one slot.
#[derive(Debug, Clone)]
pub enum ActionKey {
    Process(ProcessId),
    Instance(InstanceId),
}

impl ActionKey {
    pub fn wire_id(&self) -> ProcessId {
        match self {
            Self::Process(id) => id.clone(),
            Self::Instance(instance) => instance.process_id(),
        }
    }
}

impl PartialEq for ActionKey {
    fn eq(&self, other: &Self) -> bool {
        self.wire_id() == other.wire_id()
    }
}

impl Eq for ActionKey {}

impl std::hash::Hash for ActionKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.wire_id().hash(state);
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process(id) => write!(f, "{}", id),
            Self::Instance(instance) => write!(f, "{}", instance),
        }
    }
}

impl From<ProcessId> for ActionKey {
    fn from(id: ProcessId) -> Self {
        Self::Process(id)
    }
}

impl From<InstanceId> for ActionKey {
    fn from(id: InstanceId) -> Self {
        Self::Instance(id)
    }
}

/// Derive the wire id of a group instance.
pub fn derive_id(group: &str, instance: u32) -> String {
    format!("{}_{}", group.to_lowercase(), instance)
}

/// Next candidate instance number: one past the highest in use, or 0.
pub fn next_instance_number(instances: &[Instance]) -> u32 {
    instances
        .iter()
        .map(|i| i.instance)
        .max()
        .map_or(0, |max| max.saturating_add(1))
}

/// Split an instance id into its lowercased group and number.
///
/// The split happens at the last underscore, so group names that contain
/// underscores themselves still parse.
pub fn parse_instance_id(id: &str) -> Option<(String, u32)> {
    let (group, number) = id.rsplit_once('_')?;
    if group.is_empty() {
        return None;
    }
    let number = number.parse().ok()?;
    Some((group.to_string(), number))
}
