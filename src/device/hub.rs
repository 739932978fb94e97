use std::sync::Arc;

use common::{ControllerRecord, ControllerStatus, EffectKind, MAX_RELAYS};
use log::{info, warn};
use parking_lot::RwLock;
use tokio::task::JoinSet;

use super::{DeviceApi, DeviceError, DeviceFactory, DeviceResult};
use crate::{config::RelaySelectionMode, safety::SafetyGate};

/// Which relays a lighting effect drives
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelaySelection {
    All,
    /// A strict subset, sorted and without duplicates
    Only(Vec<u8>),
}

impl RelaySelection {
    /// Normalise a relay list. An empty list or one naming every relay means
    /// all of them.
    pub fn from_relays(relays: &[u8]) -> Self {
        let mut relays = relays.to_vec();
        relays.sort_unstable();
        relays.dedup();

        if relays.is_empty() || relays.len() >= MAX_RELAYS as usize {
            RelaySelection::All
        } else {
            RelaySelection::Only(relays)
        }
    }
}

struct Controller {
    record: ControllerRecord,
    device: Arc<dyn DeviceApi>,
}

/// Registry of known controllers and the one place commands are dispatched
/// from. It applies the safety gate and turns transport failures into status
/// changes.
pub struct ControllerHub {
    controllers: RwLock<Vec<Controller>>,
    factory: Arc<dyn DeviceFactory>,
    safety: SafetyGate,
    relay_selection: RelaySelectionMode,
}

impl ControllerHub {
    pub fn new(
        factory: Arc<dyn DeviceFactory>,
        safety: SafetyGate,
        relay_selection: RelaySelectionMode,
    ) -> Self {
        Self {
            controllers: RwLock::new(Vec::new()),
            factory,
            safety,
            relay_selection,
        }
    }

    pub fn safety(&self) -> &SafetyGate {
        &self.safety
    }

    /// Swap in a fresh set of controllers, rebuilding every client
    pub fn replace_all(&self, records: Vec<ControllerRecord>) {
        let controllers = records
            .into_iter()
            .map(|record| Controller {
                device: self.factory.connect(&record),
                record,
            })
            .collect();

        *self.controllers.write() = controllers;
    }

    /// Add a controller or replace the one with the same id
    pub fn upsert(&self, record: ControllerRecord) {
        let device = self.factory.connect(&record);
        let mut controllers = self.controllers.write();

        match controllers.iter_mut().find(|c| c.record.id == record.id) {
            Some(existing) => {
                existing.record = record;
                existing.device = device;
            }
            None => controllers.push(Controller { record, device }),
        }
    }

    pub fn remove(&self, id: &str) -> Option<ControllerRecord> {
        let mut controllers = self.controllers.write();
        let index = controllers.iter().position(|c| c.record.id == id)?;
        Some(controllers.remove(index).record)
    }

    pub fn records(&self) -> Vec<ControllerRecord> {
        self.controllers
            .read()
            .iter()
            .map(|c| c.record.clone())
            .collect()
    }

    pub fn record(&self, id: &str) -> Option<ControllerRecord> {
        self.controllers
            .read()
            .iter()
            .find(|c| c.record.id == id)
            .map(|c| c.record.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.controllers.read().iter().any(|c| c.record.id == id)
    }

    pub fn device(&self, id: &str) -> DeviceResult<Arc<dyn DeviceApi>> {
        self.controllers
            .read()
            .iter()
            .find(|c| c.record.id == id)
            .map(|c| c.device.clone())
            .ok_or_else(|| DeviceError::UnknownController(id.to_string()))
    }

    /// Record a new status. `Connected` also refreshes `last_seen`.
    pub fn set_status(&self, id: &str, status: ControllerStatus) {
        let mut controllers = self.controllers.write();
        let Some(controller) = controllers.iter_mut().find(|c| c.record.id == id) else {
            return;
        };

        if controller.record.status != status {
            info!(
                "Controller {} is now {:?} (was {:?})",
                id, status, controller.record.status
            );
        }

        controller.record.status = status;
        if status == ControllerStatus::Connected {
            controller.record.last_seen = Some(chrono::Utc::now());
        }
    }

    /// Downgrade a controller to disconnected when a call failed in transit
    fn observe<T>(&self, id: &str, result: DeviceResult<T>) -> DeviceResult<T> {
        if let Err(e) = &result {
            if e.is_transient() {
                self.set_status(id, ControllerStatus::Disconnected);
            }
        }
        result
    }

    pub async fn fire_channel(&self, id: &str, area: u8, channel: u8) -> DeviceResult<()> {
        self.safety.check("fire a channel")?;
        let device = self.device(id)?;

        let result = async {
            device.set_area(area).await?;
            device.fire_channel(channel).await
        }
        .await;

        self.observe(id, result)
    }

    pub async fn test_all(&self, id: &str) -> DeviceResult<()> {
        self.safety.check("test all channels")?;
        let device = self.device(id)?;
        self.observe(id, device.test_all().await)
    }

    pub async fn set_area(&self, id: &str, area: u8) -> DeviceResult<()> {
        let device = self.device(id)?;
        self.observe(id, device.set_area(area).await)
    }

    pub async fn sync_area(&self, id: &str, area: u8) -> DeviceResult<()> {
        let device = self.device(id)?;
        self.observe(id, device.sync_area(area).await)
    }

    pub async fn set_relay(&self, id: &str, relay: u8, on: bool) -> DeviceResult<()> {
        let device = self.device(id)?;
        self.observe(id, device.set_relay(relay, on).await)
    }

    pub async fn toggle_relay(&self, id: &str, relay: u8) -> DeviceResult<()> {
        let device = self.device(id)?;
        self.observe(id, device.toggle_relay(relay).await)
    }

    pub async fn set_all_relays(&self, id: &str, on: bool) -> DeviceResult<()> {
        let device = self.device(id)?;
        self.observe(id, device.set_all_relays(on).await)
    }

    /// Select the area and start an effect on the chosen relays
    pub async fn start_effect(
        &self,
        id: &str,
        area: u8,
        kind: EffectKind,
        interval_ms: u32,
        relays: &RelaySelection,
    ) -> DeviceResult<()> {
        let device = self.device(id)?;

        let result = async {
            device.set_area(area).await?;

            match relays {
                RelaySelection::All => device.start_effect(kind, interval_ms).await,
                RelaySelection::Only(relays) => match self.relay_selection {
                    RelaySelectionMode::Manual => {
                        manual_selection(device.as_ref(), kind, interval_ms, relays).await
                    }
                    RelaySelectionMode::Selective => {
                        match device
                            .start_selective_effect(kind, interval_ms, relays)
                            .await
                        {
                            Err(e) if !e.is_transient() => {
                                warn!(
                                    "Selective effect on {} failed ({}), switching relays by hand",
                                    id, e
                                );
                                manual_selection(device.as_ref(), kind, interval_ms, relays).await
                            }
                            other => other,
                        }
                    }
                },
            }
        }
        .await;

        self.observe(id, result)
    }

    pub async fn stop_effect(&self, id: &str) -> DeviceResult<()> {
        let device = self.device(id)?;
        self.observe(id, device.stop_effect().await)
    }

    pub async fn emergency_stop(&self, id: &str) -> DeviceResult<()> {
        let device = self.device(id)?;
        self.observe(id, device.emergency_stop().await)
    }

    /// Send an emergency stop to every known controller at once
    pub async fn emergency_stop_all(self: &Arc<Self>) -> Vec<(String, DeviceResult<()>)> {
        let mut tasks = JoinSet::new();

        for record in self.records() {
            let hub = self.clone();
            tasks.spawn(async move {
                let result = hub.emergency_stop(&record.id).await;
                (record.id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, result)) => {
                    if let Err(e) = &result {
                        warn!("Emergency stop to {} failed: {}", id, e);
                    }
                    results.push((id, result));
                }
                Err(e) => warn!("Emergency stop task failed: {}", e),
            }
        }

        info!("Emergency stop sent to {} controllers", results.len());
        results
    }
}

/// All relays off, the wanted relays on, then a plain effect. Works around
/// firmware whose selective-effect endpoint misbehaves.
async fn manual_selection(
    device: &dyn DeviceApi,
    kind: EffectKind,
    interval_ms: u32,
    relays: &[u8],
) -> DeviceResult<()> {
    device.set_all_relays(false).await?;
    for relay in relays {
        device.set_relay(*relay, true).await?;
    }
    device.start_effect(kind, interval_ms).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_selection() {
        assert_eq!(RelaySelection::from_relays(&[]), RelaySelection::All);
        assert_eq!(
            RelaySelection::from_relays(&[3, 1, 3]),
            RelaySelection::Only(vec![1, 3])
        );

        let every: Vec<u8> = (1..=MAX_RELAYS).collect();
        assert_eq!(RelaySelection::from_relays(&every), RelaySelection::All);
    }
}
