//! Application error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Client error that can be serialized for a view layer.
#[derive(Debug, Clone)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The control API answered with a non-success status
    Rejected,
    /// Request could not be sent or the response could not be read
    Network,
    /// Response body did not match the expected shape
    Decode,
    /// Editor buffer could not be parsed for its document type
    InvalidFormat,
    /// Selective download requested with nothing selected
    EmptySelection,
    /// Field path is empty or has empty segments
    InvalidFieldPath,
    /// Quick edit submitted without a value
    EmptyValue,
    /// Log line window not among the allowed options
    InvalidLineWindow,
    /// Removing the last instance of a group
    LastInstance,
    /// Group missing from the current fleet snapshot
    GroupNotFound,
    /// Another action holds the lock for this target
    ActionInFlight,
    /// Working buffer equals the saved buffer
    NothingToSave,
    /// A save is already running or the document is not loaded
    SaveInFlight,
    /// Client configuration error
    Config,
    /// File system error
    Io,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::Rejected => 1001,
            Self::Network => 1002,
            Self::Decode => 1003,
            Self::InvalidFormat => 2001,
            Self::EmptySelection => 2002,
            Self::InvalidFieldPath => 2003,
            Self::EmptyValue => 2004,
            Self::InvalidLineWindow => 2005,
            Self::LastInstance => 3001,
            Self::GroupNotFound => 3002,
            Self::ActionInFlight => 3003,
            Self::NothingToSave => 3004,
            Self::SaveInFlight => 3005,
            Self::Config => 4001,
            Self::Io => 4002,
            Self::Other => 9999,
        }
    }

    /// Whether the failure was raised locally, before anything was sent.
    pub fn is_local(&self) -> bool {
        !matches!(
            self,
            Self::Rejected | Self::Network | Self::Decode | Self::Config | Self::Io | Self::Other
        )
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn rejected(status: u16, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Rejected,
            HashMap::from([
                ("status".to_string(), status.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn network_with_url(url: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Network,
            HashMap::from([
                ("url".to_string(), url.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Decode, message)
    }

    pub fn invalid_format(document: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::InvalidFormat,
            HashMap::from([
                ("document".to_string(), document.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn empty_selection() -> Self {
        Self::with_detail(
            ErrorKind::EmptySelection,
            "select at least one service to download",
        )
    }

    pub fn invalid_field_path(path: &str) -> Self {
        Self::new(
            ErrorKind::InvalidFieldPath,
            HashMap::from([("path".to_string(), path.to_string())]),
        )
    }

    pub fn empty_value(field_path: &str) -> Self {
        Self::new(
            ErrorKind::EmptyValue,
            HashMap::from([("path".to_string(), field_path.to_string())]),
        )
    }

    pub fn invalid_line_window(lines: u32) -> Self {
        Self::new(
            ErrorKind::InvalidLineWindow,
            HashMap::from([("lines".to_string(), lines.to_string())]),
        )
    }

    pub fn last_instance(group: &str) -> Self {
        Self::new(
            ErrorKind::LastInstance,
            HashMap::from([("group".to_string(), group.to_string())]),
        )
    }

    pub fn group_not_found(group: &str) -> Self {
        Self::new(
            ErrorKind::GroupNotFound,
            HashMap::from([("group".to_string(), group.to_string())]),
        )
    }

    pub fn action_in_flight(key: &str) -> Self {
        Self::new(
            ErrorKind::ActionInFlight,
            HashMap::from([("id".to_string(), key.to_string())]),
        )
    }

    pub fn nothing_to_save() -> Self {
        Self::new(ErrorKind::NothingToSave, HashMap::new())
    }

    pub fn save_in_flight() -> Self {
        Self::new(ErrorKind::SaveInFlight, HashMap::new())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Operator-facing message, when one was attached.
    pub fn detail(&self) -> Option<&str> {
        self.payload.get("detail").map(String::as_str)
    }

    pub fn payload(&self) -> &HashMap<String, String> {
        &self.payload
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

/// Body-level failures: a response that does not parse is `Decode`, anything
/// else reqwest reports is `Network`.
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::decode(err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
