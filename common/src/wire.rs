//! JSON bodies exchanged with the controller firmware. Every reply carries a
//! `success` flag; anything else is optional.

use serde::{Deserialize, Serialize};

use crate::{ControllerKind, EffectKind};

/// Generic reply to a command
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DeviceReply {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Reply to `GET /status`
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub success: bool,
    #[serde(default)]
    pub kind: Option<ControllerKind>,
    /// Area the firmware believes it is in
    #[serde(default)]
    pub area: Option<u8>,
    #[serde(default)]
    pub effect: Option<EffectKind>,
    #[serde(default)]
    pub relays: Option<Vec<bool>>,
    #[serde(default)]
    pub show_running: Option<bool>,
    #[serde(default)]
    pub uptime_ms: Option<u64>,
}

/// Reply to `GET /version`
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct VersionReport {
    pub success: bool,
    #[serde(default)]
    pub version: Option<String>,
}

/// Reply to `GET /wifi/info`
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct WifiReport {
    pub success: bool,
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub ip: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::On => "ON",
            RelayState::Off => "OFF",
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, RelayState::On)
    }
}

impl From<bool> for RelayState {
    fn from(on: bool) -> Self {
        if on {
            RelayState::On
        } else {
            RelayState::Off
        }
    }
}
