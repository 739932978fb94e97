//! Finding controllers. Discovery is a probe of a fixed list of well-known
//! hostnames, there is no network sweep.

use std::sync::Arc;

use common::{ControllerKind, ControllerRecord, ControllerStatus};
use log::{debug, info};
use tokio::task::JoinSet;

use crate::{
    config::DiscoveryHost,
    device::{ControllerHub, DeviceFactory, DeviceResult},
};

pub struct Discovery {
    hosts: Vec<DiscoveryHost>,
    factory: Arc<dyn DeviceFactory>,
}

impl Discovery {
    pub fn new(hosts: Vec<DiscoveryHost>, factory: Arc<dyn DeviceFactory>) -> Self {
        Self { hosts, factory }
    }

    /// Probe every configured host once. Hosts that fail all liveness
    /// fallbacks are left out. Results keep the configured order.
    pub async fn scan(&self) -> Vec<ControllerRecord> {
        let mut probes = JoinSet::new();

        for (index, host) in self.hosts.iter().enumerate() {
            let record = ControllerRecord::new(
                host_id(&host.host),
                host.name.clone(),
                host.kind,
                host.host.clone(),
            );
            let device = self.factory.connect(&record);

            probes.spawn(async move {
                let result = device.check_liveness().await;
                (index, record, result)
            });
        }

        let mut found = Vec::new();
        while let Some(joined) = probes.join_next().await {
            let Ok((index, mut record, result)) = joined else {
                continue;
            };
            match result {
                Ok(()) => {
                    record.status = ControllerStatus::Connected;
                    record.last_seen = Some(chrono::Utc::now());
                    found.push((index, record));
                }
                Err(e) => debug!("{} did not answer: {}", record.address, e),
            }
        }

        found.sort_by_key(|(index, _)| *index);
        let found: Vec<ControllerRecord> = found.into_iter().map(|(_, r)| r).collect();
        info!(
            "Discovery found {} of {} controllers",
            found.len(),
            self.hosts.len()
        );
        found
    }

    /// Scan and replace the hub's controllers with what answered
    pub async fn refresh(&self, hub: &ControllerHub) -> Vec<ControllerRecord> {
        let found = self.scan().await;
        hub.replace_all(found.clone());
        found
    }

    /// Check a single address without adding it anywhere
    pub async fn test_connection(&self, address: &str, kind: ControllerKind) -> DeviceResult<()> {
        let record = ControllerRecord::new(host_id(address), address, kind, address);
        self.factory.connect(&record).check_liveness().await
    }
}

/// Controller id for a hostname: the host without scheme, path or `.local`
pub fn host_id(host: &str) -> String {
    let host = host
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let host = host.split('/').next().unwrap_or(host);
    host.strip_suffix(".local").unwrap_or(host).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_id() {
        assert_eq!(host_id("lume-base.local"), "lume-base");
        assert_eq!(host_id("http://lume-controller-01.local/"), "lume-controller-01");
        assert_eq!(host_id("127.0.0.1:8080"), "127.0.0.1:8080");
        assert_eq!(host_id("board"), "board");
    }
}
