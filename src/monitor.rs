//! Periodic liveness polling of every known controller.

use std::{sync::Arc, time::Duration};

use common::ControllerStatus;
use log::{debug, warn};
use tokio::{
    task::{JoinHandle, JoinSet},
    time::{interval, MissedTickBehavior},
};

use crate::device::ControllerHub;

pub struct StatusMonitor {
    hub: Arc<ControllerHub>,
    interval: Duration,
}

impl StatusMonitor {
    pub fn new(hub: Arc<ControllerHub>, interval: Duration) -> Self {
        Self { hub, interval }
    }

    /// Poll every controller once and apply the results. Timeouts and lost
    /// connections mark a controller disconnected, any other failure marks
    /// it as being in error.
    pub async fn poll_once(&self) -> Vec<(String, ControllerStatus)> {
        let mut polls = JoinSet::new();

        for record in self.hub.records() {
            let Ok(device) = self.hub.device(&record.id) else {
                continue;
            };
            polls.spawn(async move { (record.id, device.check_liveness().await) });
        }

        let mut results = Vec::new();
        while let Some(joined) = polls.join_next().await {
            let (id, result) = match joined {
                Ok(poll) => poll,
                Err(e) => {
                    warn!("Status poll task failed: {}", e);
                    continue;
                }
            };

            let status = match result {
                Ok(()) => ControllerStatus::Connected,
                Err(e) if e.is_transient() => {
                    debug!("{} unreachable: {}", id, e);
                    ControllerStatus::Disconnected
                }
                Err(e) => {
                    debug!("{} answered badly: {}", id, e);
                    ControllerStatus::Error
                }
            };

            self.hub.set_status(&id, status);
            results.push((id, status));
        }

        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Poll forever on a fixed interval. The first poll runs straight away.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.poll_once().await;
            }
        })
    }
}
