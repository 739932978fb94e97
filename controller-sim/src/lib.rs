//! A stand-in for the controller firmware. It serves the same REST surface
//! as the ESP32 boards, keeps their state in memory and records every command
//! it receives so tests can assert on what the desk sent.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::{
    ControllerKind, DeviceReply, EffectKind, RelayState, StatusReport, VersionReport, WifiReport,
    MAX_AREA, MAX_CHANNELS, MAX_RELAYS,
};
use serde::Deserialize;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

pub const FIRMWARE_VERSION: &str = "1.4.2";

/// Everything the simulator was asked to do, in arrival order
#[derive(Clone, Debug, PartialEq)]
pub enum SimCommand {
    SetArea(u8),
    SyncArea(u8),
    Fire(u8),
    EmergencyStop,
    TestAll,
    Relay(u8, bool),
    ToggleRelay(u8),
    AllRelays(bool),
    Effect(EffectKind, u32),
    SelectiveEffect(EffectKind, u32, Vec<u8>),
    StopEffect,
}

struct SimState {
    kind: ControllerKind,
    area: u8,
    relays: [bool; MAX_RELAYS as usize],
    effect: Option<EffectKind>,
    commands: Vec<SimCommand>,
    started: Instant,
    // Fault injection
    reject_commands: bool,
    status_enabled: bool,
    selective_enabled: bool,
    latency: Duration,
}

#[derive(Clone)]
pub struct Simulator {
    state: Arc<Mutex<SimState>>,
}

impl Simulator {
    pub fn new(kind: ControllerKind) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                kind,
                area: 1,
                relays: [false; MAX_RELAYS as usize],
                effect: None,
                commands: Vec::new(),
                started: Instant::now(),
                reject_commands: false,
                status_enabled: true,
                selective_enabled: true,
                latency: Duration::ZERO,
            })),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/status", get(status))
            .route("/version", get(version))
            .route("/wifi/info", get(wifi_info))
            .route("/area", post(set_area))
            .route("/sync", post(sync_area))
            .route("/channel", post(fire_channel))
            .route("/emergency/stop", post(emergency_stop))
            .route("/test/all", post(test_all))
            .route("/relay", post(set_relay))
            .route("/relay/toggle", post(toggle_relay))
            .route("/all", post(all_relays))
            .route("/effect", post(start_effect))
            .route("/effect/selective", post(selective_effect))
            .route("/effect/stop", post(stop_effect))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.clone())
    }

    /// Serve on an ephemeral localhost port until the returned handle drops
    pub async fn spawn(kind: ControllerKind) -> anyhow::Result<RunningSim> {
        let sim = Simulator::new(kind);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = sim.router();

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!("Simulator on {} stopped: {}", addr, e);
            }
        });

        info!("Simulated {:?} controller listening on http://{}", kind, addr);
        Ok(RunningSim { sim, addr, task })
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicking handler must not take the whole simulator down with it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn commands(&self) -> Vec<SimCommand> {
        self.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    pub fn area(&self) -> u8 {
        self.lock().area
    }

    pub fn relays(&self) -> Vec<bool> {
        self.lock().relays.to_vec()
    }

    pub fn effect(&self) -> Option<EffectKind> {
        self.lock().effect
    }

    /// Answer every command with `success: false`
    pub fn set_reject_commands(&self, reject: bool) {
        self.lock().reject_commands = reject;
    }

    /// Make `/status` answer 503, forcing clients onto the fallbacks
    pub fn set_status_enabled(&self, enabled: bool) {
        self.lock().status_enabled = enabled;
    }

    /// Make `/effect/selective` answer `success: false`
    pub fn set_selective_enabled(&self, enabled: bool) {
        self.lock().selective_enabled = enabled;
    }

    /// Delay every response
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    async fn delay(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Record and apply a command. `apply` returns the failure message when
    /// the command is not valid for this controller.
    async fn command(
        &self,
        command: SimCommand,
        apply: impl FnOnce(&mut SimState) -> Result<(), String>,
    ) -> Json<DeviceReply> {
        self.delay().await;

        let mut state = self.lock();
        if state.reject_commands {
            return Json(DeviceReply::failed("rejected by simulator"));
        }

        debug!("{:?} controller received {:?}", state.kind, command);
        match apply(&mut state) {
            Ok(()) => {
                state.commands.push(command);
                Json(DeviceReply::ok())
            }
            Err(message) => {
                warn!("Refusing {:?}: {}", command, message);
                Json(DeviceReply::failed(message))
            }
        }
    }
}

/// A simulator bound to a local port. Dropping it shuts the server down.
pub struct RunningSim {
    pub sim: Simulator,
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl RunningSim {
    /// Address in the form the desk stores in a controller record
    pub fn address(&self) -> String {
        self.addr.to_string()
    }
}

impl std::ops::Deref for RunningSim {
    type Target = Simulator;

    fn deref(&self) -> &Simulator {
        &self.sim
    }
}

impl Drop for RunningSim {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Deserialize)]
struct IdQuery {
    id: u8,
}

#[derive(Deserialize)]
struct RelayQuery {
    id: u8,
    state: RelayState,
}

#[derive(Deserialize)]
struct StateQuery {
    state: RelayState,
}

#[derive(Deserialize)]
struct EffectQuery {
    #[serde(rename = "type")]
    kind: EffectKind,
    interval: u32,
}

#[derive(Deserialize)]
struct SelectiveQuery {
    #[serde(rename = "type")]
    kind: EffectKind,
    interval: u32,
    relays: String,
}

fn check_range(what: &str, value: u8, max: u8) -> Result<(), String> {
    if value == 0 || value > max {
        Err(format!("{} {} out of range 1-{}", what, value, max))
    } else {
        Ok(())
    }
}

fn require_kind(state: &SimState, kind: ControllerKind) -> Result<(), String> {
    if state.kind == kind {
        Ok(())
    } else {
        Err(format!("not supported on a {:?} controller", state.kind))
    }
}

async fn status(State(sim): State<Simulator>) -> Response {
    sim.delay().await;
    let state = sim.lock();

    if !state.status_enabled {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    Json(StatusReport {
        success: true,
        kind: Some(state.kind),
        area: Some(state.area),
        effect: state.effect,
        relays: Some(state.relays.to_vec()),
        show_running: Some(false),
        uptime_ms: Some(state.started.elapsed().as_millis() as u64),
    })
    .into_response()
}

async fn version(State(sim): State<Simulator>) -> Json<VersionReport> {
    sim.delay().await;
    Json(VersionReport {
        success: true,
        version: Some(FIRMWARE_VERSION.to_string()),
    })
}

async fn wifi_info(State(sim): State<Simulator>) -> Json<WifiReport> {
    sim.delay().await;
    Json(WifiReport {
        success: true,
        ssid: Some("lume".to_string()),
        rssi: Some(-58),
        ip: Some("127.0.0.1".to_string()),
    })
}

async fn set_area(State(sim): State<Simulator>, Query(q): Query<IdQuery>) -> Json<DeviceReply> {
    sim.command(SimCommand::SetArea(q.id), |state| {
        check_range("area", q.id, MAX_AREA)?;
        state.area = q.id;
        Ok(())
    })
    .await
}

async fn sync_area(State(sim): State<Simulator>, Query(q): Query<IdQuery>) -> Json<DeviceReply> {
    sim.command(SimCommand::SyncArea(q.id), |state| {
        check_range("area", q.id, MAX_AREA)?;
        state.area = q.id;
        Ok(())
    })
    .await
}

async fn fire_channel(
    State(sim): State<Simulator>,
    Query(q): Query<IdQuery>,
) -> Json<DeviceReply> {
    sim.command(SimCommand::Fire(q.id), |state| {
        require_kind(state, ControllerKind::Firework)?;
        check_range("channel", q.id, MAX_CHANNELS)
    })
    .await
}

async fn emergency_stop(State(sim): State<Simulator>) -> Json<DeviceReply> {
    sim.command(SimCommand::EmergencyStop, |state| {
        state.relays = [false; MAX_RELAYS as usize];
        state.effect = None;
        Ok(())
    })
    .await
}

async fn test_all(State(sim): State<Simulator>) -> Json<DeviceReply> {
    sim.command(SimCommand::TestAll, |state| {
        require_kind(state, ControllerKind::Firework)
    })
    .await
}

async fn set_relay(State(sim): State<Simulator>, Query(q): Query<RelayQuery>) -> Json<DeviceReply> {
    sim.command(SimCommand::Relay(q.id, q.state.is_on()), |state| {
        require_kind(state, ControllerKind::Lights)?;
        check_range("relay", q.id, MAX_RELAYS)?;
        state.relays[q.id as usize - 1] = q.state.is_on();
        Ok(())
    })
    .await
}

async fn toggle_relay(State(sim): State<Simulator>, Query(q): Query<IdQuery>) -> Json<DeviceReply> {
    sim.command(SimCommand::ToggleRelay(q.id), |state| {
        require_kind(state, ControllerKind::Lights)?;
        check_range("relay", q.id, MAX_RELAYS)?;
        let relay = &mut state.relays[q.id as usize - 1];
        *relay = !*relay;
        Ok(())
    })
    .await
}

async fn all_relays(State(sim): State<Simulator>, Query(q): Query<StateQuery>) -> Json<DeviceReply> {
    sim.command(SimCommand::AllRelays(q.state.is_on()), |state| {
        require_kind(state, ControllerKind::Lights)?;
        state.relays = [q.state.is_on(); MAX_RELAYS as usize];
        Ok(())
    })
    .await
}

async fn start_effect(
    State(sim): State<Simulator>,
    Query(q): Query<EffectQuery>,
) -> Json<DeviceReply> {
    sim.command(SimCommand::Effect(q.kind, q.interval), |state| {
        require_kind(state, ControllerKind::Lights)?;
        state.effect = Some(q.kind);
        Ok(())
    })
    .await
}

async fn selective_effect(
    State(sim): State<Simulator>,
    Query(q): Query<SelectiveQuery>,
) -> Json<DeviceReply> {
    let relays: Result<Vec<u8>, _> = q
        .relays
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.trim().parse::<u8>())
        .collect();

    let relays = match relays {
        Ok(relays) => relays,
        Err(_) => return Json(DeviceReply::failed("bad relay list")),
    };

    sim.command(
        SimCommand::SelectiveEffect(q.kind, q.interval, relays.clone()),
        |state| {
            require_kind(state, ControllerKind::Lights)?;
            if !state.selective_enabled {
                return Err("selective effects unavailable".to_string());
            }
            for relay in &relays {
                check_range("relay", *relay, MAX_RELAYS)?;
            }
            state.relays = [false; MAX_RELAYS as usize];
            for relay in &relays {
                state.relays[*relay as usize - 1] = true;
            }
            state.effect = Some(q.kind);
            Ok(())
        },
    )
    .await
}

async fn stop_effect(State(sim): State<Simulator>) -> Json<DeviceReply> {
    sim.command(SimCommand::StopEffect, |state| {
        require_kind(state, ControllerKind::Lights)?;
        state.effect = None;
        Ok(())
    })
    .await
}
