use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    Firework,
    Lights,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControllerStatus {
    Connected,
    #[default]
    Disconnected,
    Error,
}

/// A controller known to the desk, either discovered or entered by hand.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ControllerRecord {
    pub id: String,
    pub name: String,
    pub kind: ControllerKind,
    /// Host name or `host:port`
    pub address: String,
    #[serde(default)]
    pub status: ControllerStatus,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl ControllerRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: ControllerKind,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            address: address.into(),
            status: ControllerStatus::Disconnected,
            last_seen: None,
        }
    }
}
