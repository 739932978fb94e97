//! Shared fixtures: an in-memory controller that records every call with
//! its time on the tokio clock, and an audio backend that records what the
//! scheduler asked of it.

#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use common::{
    AudioTrack, ControllerKind, ControllerRecord, ControllerStatus, EffectKind, StatusReport,
    VersionReport, WifiReport,
};
use lume_desk::{
    config::RelaySelectionMode,
    device::{ControllerHub, DeviceApi, DeviceError, DeviceFactory, DeviceResult},
    safety::SafetyGate,
    show::{AudioBackend, AudioOutput},
};
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Status,
    SetArea(u8),
    SyncArea(u8),
    Fire(u8),
    EmergencyStop,
    TestAll,
    Relay(u8, bool),
    ToggleRelay(u8),
    AllRelays(bool),
    Effect(EffectKind),
    Selective(EffectKind, Vec<u8>),
    StopEffect,
}

#[derive(Clone, Debug)]
pub struct Call {
    pub at_ms: u64,
    pub controller: String,
    pub op: Op,
}

/// How a fake controller answers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behaviour {
    Healthy,
    Timeout,
    Reject,
}

#[derive(Clone)]
pub struct CallLog {
    start: Instant,
    calls: Arc<Mutex<Vec<Call>>>,
    behaviours: Arc<Mutex<HashMap<String, Behaviour>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            calls: Arc::new(Mutex::new(Vec::new())),
            behaviours: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn set_behaviour(&self, controller: &str, behaviour: Behaviour) {
        self.behaviours
            .lock()
            .insert(controller.to_string(), behaviour);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn ops(&self, controller: &str) -> Vec<Op> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.controller == controller)
            .map(|c| c.op.clone())
            .collect()
    }

    /// Times of every call matching `op`
    pub fn times_of(&self, op: &Op) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .filter(|c| &c.op == op)
            .map(|c| c.at_ms)
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&Op) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| matches(&c.op)).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

pub struct FakeDevice {
    controller: String,
    log: CallLog,
}

impl FakeDevice {
    /// Fail the way the configured behaviour says, without recording
    fn answer(&self) -> DeviceResult<()> {
        let url = format!("http://{}/", self.controller);
        let behaviour = self
            .log
            .behaviours
            .lock()
            .get(&self.controller)
            .copied()
            .unwrap_or(Behaviour::Healthy);

        match behaviour {
            Behaviour::Healthy => Ok(()),
            Behaviour::Timeout => Err(DeviceError::Timeout { url }),
            Behaviour::Reject => Err(DeviceError::Rejected {
                url,
                message: Some("no".to_string()),
            }),
        }
    }

    fn record(&self, op: Op) -> DeviceResult<()> {
        self.answer()?;
        self.log.calls.lock().push(Call {
            at_ms: self.log.start.elapsed().as_millis() as u64,
            controller: self.controller.clone(),
            op,
        });
        Ok(())
    }
}

#[async_trait]
impl DeviceApi for FakeDevice {
    async fn status(&self) -> DeviceResult<StatusReport> {
        self.record(Op::Status)?;
        Ok(StatusReport {
            success: true,
            ..Default::default()
        })
    }

    async fn version(&self) -> DeviceResult<VersionReport> {
        self.answer()?;
        Ok(VersionReport {
            success: true,
            version: Some("test".to_string()),
        })
    }

    async fn wifi_info(&self) -> DeviceResult<WifiReport> {
        self.answer()?;
        Ok(WifiReport {
            success: true,
            ..Default::default()
        })
    }

    async fn set_area(&self, area: u8) -> DeviceResult<()> {
        self.record(Op::SetArea(area))
    }

    async fn sync_area(&self, area: u8) -> DeviceResult<()> {
        self.record(Op::SyncArea(area))
    }

    async fn fire_channel(&self, channel: u8) -> DeviceResult<()> {
        self.record(Op::Fire(channel))
    }

    async fn emergency_stop(&self) -> DeviceResult<()> {
        self.record(Op::EmergencyStop)
    }

    async fn test_all(&self) -> DeviceResult<()> {
        self.record(Op::TestAll)
    }

    async fn set_relay(&self, relay: u8, on: bool) -> DeviceResult<()> {
        self.record(Op::Relay(relay, on))
    }

    async fn toggle_relay(&self, relay: u8) -> DeviceResult<()> {
        self.record(Op::ToggleRelay(relay))
    }

    async fn set_all_relays(&self, on: bool) -> DeviceResult<()> {
        self.record(Op::AllRelays(on))
    }

    async fn start_effect(&self, kind: EffectKind, _interval_ms: u32) -> DeviceResult<()> {
        self.record(Op::Effect(kind))
    }

    async fn start_selective_effect(
        &self,
        kind: EffectKind,
        _interval_ms: u32,
        relays: &[u8],
    ) -> DeviceResult<()> {
        self.record(Op::Selective(kind, relays.to_vec()))
    }

    async fn stop_effect(&self) -> DeviceResult<()> {
        self.record(Op::StopEffect)
    }
}

pub struct FakeFactory {
    pub log: CallLog,
}

impl DeviceFactory for FakeFactory {
    fn connect(&self, record: &ControllerRecord) -> Arc<dyn DeviceApi> {
        Arc::new(FakeDevice {
            controller: record.id.clone(),
            log: self.log.clone(),
        })
    }
}

pub const FIREWORKS: &str = "base";
pub const LIGHTS: &str = "lights";

/// A hub with one firework and one lighting controller, both connected
pub fn hub(armed: bool, mode: RelaySelectionMode) -> (Arc<ControllerHub>, CallLog) {
    let log = CallLog::new();
    let hub = Arc::new(ControllerHub::new(
        Arc::new(FakeFactory { log: log.clone() }),
        SafetyGate::new(armed),
        mode,
    ));

    let mut records = vec![
        ControllerRecord::new(FIREWORKS, "Base", ControllerKind::Firework, "base.local"),
        ControllerRecord::new(LIGHTS, "Lights", ControllerKind::Lights, "lights.local"),
    ];
    for record in &mut records {
        record.status = ControllerStatus::Connected;
    }
    hub.replace_all(records);

    (hub, log)
}

#[derive(Clone, Debug, PartialEq)]
pub enum AudioOp {
    Open(String),
    Seek(Duration),
    Play,
    Pause,
}

#[derive(Clone, Default)]
pub struct FakeAudio {
    pub ops: Arc<Mutex<Vec<AudioOp>>>,
}

impl FakeAudio {
    pub fn ops(&self) -> Vec<AudioOp> {
        self.ops.lock().clone()
    }
}

#[async_trait]
impl AudioBackend for FakeAudio {
    async fn open(&self, track: &AudioTrack) -> Result<Box<dyn AudioOutput>> {
        self.ops.lock().push(AudioOp::Open(track.name.clone()));
        Ok(Box::new(FakeOutput {
            ops: self.ops.clone(),
        }))
    }
}

struct FakeOutput {
    ops: Arc<Mutex<Vec<AudioOp>>>,
}

impl AudioOutput for FakeOutput {
    fn seek(&mut self, position: Duration) -> Result<()> {
        self.ops.lock().push(AudioOp::Seek(position));
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        self.ops.lock().push(AudioOp::Play);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.ops.lock().push(AudioOp::Pause);
        Ok(())
    }

    fn position(&self) -> Duration {
        Duration::ZERO
    }
}
