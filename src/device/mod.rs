//! Talking to controllers. [`DeviceApi`] is the REST surface of one board,
//! [`HttpDevice`] its reqwest implementation and [`ControllerHub`] the
//! registry that routes commands to the right board.

use std::sync::Arc;

use async_trait::async_trait;
use common::{ControllerRecord, EffectKind, StatusReport, VersionReport, WifiReport};
use thiserror::Error;

mod client;
mod hub;

pub use client::{HttpDevice, HttpDeviceFactory};
pub use hub::{ControllerHub, RelaySelection};

#[derive(Debug, Error)]
pub enum DeviceError {
    /// The safety gate refused a pyrotechnic command
    #[error("system is disarmed, refusing to {0}")]
    Disarmed(&'static str),

    #[error("{what} {value} is out of range 1-{max}")]
    OutOfRange { what: &'static str, value: u32, max: u32 },

    #[error("no controller with id '{0}'")]
    UnknownController(String),

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("could not reach {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} reported failure: {}", message.as_deref().unwrap_or("no details"))]
    Rejected { url: String, message: Option<String> },

    #[error("unexpected reply from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

impl DeviceError {
    /// Timeouts and aborted connections, the failures that say the board is
    /// probably gone rather than unhappy
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::Timeout { .. } | DeviceError::Connection { .. })
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

pub(crate) fn check_range(what: &'static str, value: u8, max: u8) -> DeviceResult<()> {
    if value == 0 || value > max {
        Err(DeviceError::OutOfRange {
            what,
            value: value as u32,
            max: max as u32,
        })
    } else {
        Ok(())
    }
}

/// The REST surface of a single controller
#[async_trait]
pub trait DeviceApi: Send + Sync {
    async fn status(&self) -> DeviceResult<StatusReport>;
    async fn version(&self) -> DeviceResult<VersionReport>;
    async fn wifi_info(&self) -> DeviceResult<WifiReport>;

    /// Navigate the firmware to an area (1-99)
    async fn set_area(&self, area: u8) -> DeviceResult<()>;
    /// Tell the firmware which area it is already in
    async fn sync_area(&self, area: u8) -> DeviceResult<()>;
    async fn fire_channel(&self, channel: u8) -> DeviceResult<()>;
    async fn emergency_stop(&self) -> DeviceResult<()>;
    async fn test_all(&self) -> DeviceResult<()>;

    async fn set_relay(&self, relay: u8, on: bool) -> DeviceResult<()>;
    async fn toggle_relay(&self, relay: u8) -> DeviceResult<()>;
    async fn set_all_relays(&self, on: bool) -> DeviceResult<()>;
    async fn start_effect(&self, kind: EffectKind, interval_ms: u32) -> DeviceResult<()>;
    async fn start_selective_effect(
        &self,
        kind: EffectKind,
        interval_ms: u32,
        relays: &[u8],
    ) -> DeviceResult<()>;
    async fn stop_effect(&self) -> DeviceResult<()>;

    /// Liveness check. Tries `/status`, then `/version`, then `/wifi/info`;
    /// the first success wins, otherwise the last failure is returned.
    async fn check_liveness(&self) -> DeviceResult<()> {
        if let Err(e) = self.status().await {
            log::debug!("Status probe failed ({}), trying version", e);
        } else {
            return Ok(());
        }

        if let Err(e) = self.version().await {
            log::debug!("Version probe failed ({}), trying wifi info", e);
        } else {
            return Ok(());
        }

        self.wifi_info().await.map(|_| ())
    }
}

/// Builds a device client for a controller record
pub trait DeviceFactory: Send + Sync {
    fn connect(&self, record: &ControllerRecord) -> Arc<dyn DeviceApi>;
}
