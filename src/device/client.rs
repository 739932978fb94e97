use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use common::{
    ControllerRecord, EffectKind, RelayState, StatusReport, VersionReport, WifiReport, MAX_AREA,
    MAX_CHANNELS, MAX_RELAYS,
};
use log::debug;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{check_range, DeviceApi, DeviceError, DeviceFactory, DeviceResult};

/// HTTP client for one controller. It keeps no state besides the address, so
/// it can be rebuilt freely.
#[derive(Clone, Debug)]
pub struct HttpDevice {
    client: Client,
    base_url: String,
}

impl HttpDevice {
    pub fn new(client: Client, address: &str) -> Self {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };

        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request and insist on a JSON body with `success: true`
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> DeviceResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {} {:?}", method, url, query);

        let response = self
            .client
            .request(method, &url)
            .query(query)
            .send()
            .await
            .map_err(|e| classify(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await.map_err(|e| classify(&url, e))?;

        match body.get("success").and_then(Value::as_bool) {
            Some(true) => {}
            Some(false) => {
                let message = body
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Err(DeviceError::Rejected { url, message });
            }
            None => {
                return Err(DeviceError::Malformed {
                    url,
                    reason: "missing boolean 'success' field".to_string(),
                })
            }
        }

        serde_json::from_value(body).map_err(|e| DeviceError::Malformed {
            url,
            reason: e.to_string(),
        })
    }

    async fn command(&self, path: &str, query: &[(&str, String)]) -> DeviceResult<()> {
        self.request::<Value>(Method::POST, path, query)
            .await
            .map(|_| ())
    }
}

fn classify(url: &str, error: reqwest::Error) -> DeviceError {
    let url = url.to_string();
    if error.is_timeout() {
        DeviceError::Timeout { url }
    } else if error.is_connect() || error.is_request() {
        DeviceError::Connection { url, source: error }
    } else if let Some(status) = error.status() {
        DeviceError::Status {
            url,
            status: status.as_u16(),
        }
    } else {
        DeviceError::Malformed {
            url,
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl DeviceApi for HttpDevice {
    async fn status(&self) -> DeviceResult<StatusReport> {
        self.request(Method::GET, "/status", &[]).await
    }

    async fn version(&self) -> DeviceResult<VersionReport> {
        self.request(Method::GET, "/version", &[]).await
    }

    async fn wifi_info(&self) -> DeviceResult<WifiReport> {
        self.request(Method::GET, "/wifi/info", &[]).await
    }

    async fn set_area(&self, area: u8) -> DeviceResult<()> {
        check_range("area", area, MAX_AREA)?;
        self.command("/area", &[("id", area.to_string())]).await
    }

    async fn sync_area(&self, area: u8) -> DeviceResult<()> {
        check_range("area", area, MAX_AREA)?;
        self.command("/sync", &[("id", area.to_string())]).await
    }

    async fn fire_channel(&self, channel: u8) -> DeviceResult<()> {
        check_range("channel", channel, MAX_CHANNELS)?;
        self.command("/channel", &[("id", channel.to_string())])
            .await
    }

    async fn emergency_stop(&self) -> DeviceResult<()> {
        self.command("/emergency/stop", &[]).await
    }

    async fn test_all(&self) -> DeviceResult<()> {
        self.command("/test/all", &[]).await
    }

    async fn set_relay(&self, relay: u8, on: bool) -> DeviceResult<()> {
        check_range("relay", relay, MAX_RELAYS)?;
        self.command(
            "/relay",
            &[
                ("id", relay.to_string()),
                ("state", RelayState::from(on).as_str().to_string()),
            ],
        )
        .await
    }

    async fn toggle_relay(&self, relay: u8) -> DeviceResult<()> {
        check_range("relay", relay, MAX_RELAYS)?;
        self.command("/relay/toggle", &[("id", relay.to_string())])
            .await
    }

    async fn set_all_relays(&self, on: bool) -> DeviceResult<()> {
        self.command("/all", &[("state", RelayState::from(on).as_str().to_string())])
            .await
    }

    async fn start_effect(&self, kind: EffectKind, interval_ms: u32) -> DeviceResult<()> {
        self.command(
            "/effect",
            &[
                ("type", kind.as_str().to_string()),
                ("interval", interval_ms.to_string()),
            ],
        )
        .await
    }

    async fn start_selective_effect(
        &self,
        kind: EffectKind,
        interval_ms: u32,
        relays: &[u8],
    ) -> DeviceResult<()> {
        for relay in relays {
            check_range("relay", *relay, MAX_RELAYS)?;
        }
        let relays = relays
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(",");

        self.command(
            "/effect/selective",
            &[
                ("type", kind.as_str().to_string()),
                ("interval", interval_ms.to_string()),
                ("relays", relays),
            ],
        )
        .await
    }

    async fn stop_effect(&self) -> DeviceResult<()> {
        self.command("/effect/stop", &[]).await
    }
}

/// Creates [`HttpDevice`]s that share one connection pool and timeout
#[derive(Clone)]
pub struct HttpDeviceFactory {
    client: Client,
}

impl HttpDeviceFactory {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl DeviceFactory for HttpDeviceFactory {
    fn connect(&self, record: &ControllerRecord) -> Arc<dyn DeviceApi> {
        Arc::new(HttpDevice::new(self.client.clone(), &record.address))
    }
}
