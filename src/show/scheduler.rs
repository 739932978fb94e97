//! Show playback. One driver task ticks a clock and pops due events off the
//! queue; device calls are handed to one lane per controller so they reach
//! each controller in timeline order without blocking the clock.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use common::{EffectKind, Show};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{interval, Instant, MissedTickBehavior},
};

use super::{
    audio::{AudioBackend, AudioPhase, AudioSync},
    plan::{CueAction, PlanSettings, PlaybackError, ShowPlan},
    queue::{EventKind, EventQueue, PendingEvents},
    status::{ActiveEffect, ShowStatus},
};
use crate::{
    config::Config,
    device::{ControllerHub, DeviceError, RelaySelection},
    library::TypeLibrary,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Clock resolution of the driver
    pub tick: Duration,
    pub plan: PlanSettings,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            plan: PlanSettings::default(),
        }
    }
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            tick: config.tick(),
            plan: PlanSettings {
                trailing_buffer_ms: config.trailing_buffer_ms,
                audio_trailing_buffer_ms: config.audio_trailing_buffer_ms,
            },
        }
    }
}

/// One device call queued on a controller lane
#[derive(Debug)]
struct LaneJob {
    generation: u64,
    sequence_id: String,
    call: DeviceCall,
}

#[derive(Debug)]
enum DeviceCall {
    Fire {
        area: u8,
        channel: u8,
        firework: String,
    },
    StartEffect {
        area: u8,
        effect: EffectKind,
        interval_ms: u32,
        relays: RelaySelection,
    },
    StopEffect,
}

#[derive(Default)]
struct PlaybackState {
    show: Option<Show>,
    library: TypeLibrary,
    is_playing: bool,
    /// Timeline position at `started`, or the resume position while stopped
    offset_ms: u64,
    started: Option<Instant>,
    plan: Option<Arc<ShowPlan>>,
    queue: EventQueue,
    audio: AudioSync,
    active: BTreeMap<usize, ActiveEffect>,
    /// Effects left running by a pass that was replaced. Stopped as soon as
    /// the next pass is armed.
    orphaned: Vec<ActiveEffect>,
    lanes: HashMap<String, mpsc::UnboundedSender<LaneJob>>,
    driver: Option<JoinHandle<()>>,
}

impl PlaybackState {
    fn now_ms(&self) -> u64 {
        match self.started {
            Some(started) => self.offset_ms + started.elapsed().as_millis() as u64,
            None => self.offset_ms,
        }
    }

    /// The running plan, or one built from the loaded show
    fn plan_or_build(&self, settings: PlanSettings) -> Option<Arc<ShowPlan>> {
        if let Some(plan) = &self.plan {
            return Some(plan.clone());
        }
        self.show
            .as_ref()
            .and_then(|show| ShowPlan::build(show, &self.library, settings).ok())
            .map(Arc::new)
    }

    fn total_ms(&self, settings: PlanSettings) -> u64 {
        self.plan_or_build(settings)
            .map(|plan| plan.total_ms)
            .unwrap_or(0)
    }

    /// Queue the first pass of every cue at or after `offset_ms`, plus the
    /// show end
    fn arm_queue(&mut self, plan: &ShowPlan, offset_ms: u64) {
        self.queue.clear();
        for (index, cue) in plan.cues.iter().enumerate() {
            self.queue.push(cue.at_ms, EventKind::Cue { index, pass: 0 });
        }
        self.queue.push(plan.end_ms, EventKind::ShowEnd);

        let skipped = self.queue.discard_before(offset_ms);
        if skipped > 0 {
            debug!("Skipping {} cues before {}ms", skipped, offset_ms);
        }
    }

    /// Back to the idle state. Returns the driver so the caller decides
    /// whether to abort it.
    fn reset(&mut self) -> Option<JoinHandle<()>> {
        self.queue.clear();
        self.audio.stop();
        self.active.clear();
        self.orphaned.clear();
        self.lanes.clear();
        self.plan = None;
        self.started = None;
        self.offset_ms = 0;
        self.is_playing = false;
        self.driver.take()
    }

    fn lane(
        &mut self,
        controller_id: &str,
        hub: &Arc<ControllerHub>,
        generation: &Arc<AtomicU64>,
    ) -> &mpsc::UnboundedSender<LaneJob> {
        self.lanes
            .entry(controller_id.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(run_lane(
                    hub.clone(),
                    generation.clone(),
                    controller_id.to_string(),
                    rx,
                ));
                tx
            })
    }
}

struct Shared {
    hub: Arc<ControllerHub>,
    audio_backend: Arc<dyn AudioBackend>,
    settings: SchedulerSettings,
    /// Bumped on every play and stop. Work tagged with an older value is
    /// dropped.
    generation: Arc<AtomicU64>,
    state: Mutex<PlaybackState>,
    /// True from `play` until the closing emergency stop has been delivered
    running: watch::Sender<bool>,
}

pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(
        hub: Arc<ControllerHub>,
        audio_backend: Arc<dyn AudioBackend>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                hub,
                audio_backend,
                settings,
                generation: Arc::new(AtomicU64::new(0)),
                state: Mutex::new(PlaybackState::default()),
                running: watch::channel(false).0,
            }),
        }
    }

    /// Set the show and library used by the next `play`. A running pass
    /// keeps the snapshot it started with.
    pub fn load(&self, show: Show, library: TypeLibrary) {
        let mut state = self.shared.state.lock();
        info!(
            "Loaded show '{}' with {} sequences",
            show.name,
            show.sequences.len()
        );
        state.show = Some(show);
        state.library = library;
    }

    pub fn is_playing(&self) -> bool {
        self.shared.state.lock().is_playing
    }

    /// Current timeline position
    pub fn offset(&self) -> u64 {
        self.shared.state.lock().now_ms()
    }

    pub fn pending(&self) -> PendingEvents {
        self.shared.state.lock().queue.pending()
    }

    pub fn audio_phase(&self) -> AudioPhase {
        self.shared.state.lock().audio.phase()
    }

    pub fn status(&self) -> ShowStatus {
        let state = self.shared.state.lock();
        ShowStatus {
            is_running: state.is_playing,
            current_time_ms: state.now_ms(),
            total_duration_ms: state.total_ms(self.shared.settings.plan),
            active_effects: state.active.values().cloned().collect(),
        }
    }

    /// Start playback from the current offset. Returns as soon as the pass is
    /// armed; device calls happen on the driver's clock.
    pub async fn play(&self) -> Result<(), PlaybackError> {
        let (plan, generation) = {
            let mut state = self.shared.state.lock();

            let show = state.show.as_ref().ok_or(PlaybackError::NoShow)?;
            if show.sequences.is_empty() {
                return Err(PlaybackError::EmptyShow(show.name.clone()));
            }
            let plan = Arc::new(ShowPlan::build(
                show,
                &state.library,
                self.shared.settings.plan,
            )?);

            // Playing again re-arms from where the running pass is now
            if state.is_playing {
                let now = state.now_ms().min(plan.total_ms);
                let running: Vec<ActiveEffect> = state.active.values().cloned().collect();
                if let Some(driver) = state.reset() {
                    driver.abort();
                }
                state.offset_ms = now;
                state.orphaned = running;
            }

            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            (plan, generation)
        };

        let output = match &plan.audio {
            Some(track) => match self.shared.audio_backend.open(track).await {
                Ok(output) => Some(output),
                Err(e) => {
                    warn!("Playing '{}' without audio: {}", plan.name, e);
                    None
                }
            },
            None => None,
        };

        let mut state = self.shared.state.lock();
        if self.shared.generation.load(Ordering::SeqCst) != generation {
            debug!("Play of '{}' superseded while loading audio", plan.name);
            return Ok(());
        }

        let offset = state.offset_ms.min(plan.total_ms);
        state.offset_ms = offset;
        state.arm_queue(&plan, offset);
        if let (Some(track), Some(output)) = (&plan.audio, output) {
            state.audio.arm(track, output);
        }
        for effect in std::mem::take(&mut state.orphaned) {
            self.shared.send(
                &mut state,
                &effect.controller_id,
                &effect.sequence_id,
                DeviceCall::StopEffect,
                generation,
            );
        }

        state.started = Some(Instant::now());
        state.is_playing = true;
        state.plan = Some(plan.clone());
        state.driver = Some(tokio::spawn(drive(self.shared.clone(), generation)));
        self.shared.running.send_replace(true);

        info!(
            "Playing '{}' from {}ms ({} cues armed, ends at {}ms)",
            plan.name,
            offset,
            state.queue.pending().cues,
            plan.end_ms
        );
        Ok(())
    }

    /// Stop playback, rewind to the start and send an emergency stop to every
    /// controller. Safe to call at any time.
    pub async fn stop(&self) {
        let (was_playing, generation) = {
            let mut state = self.shared.state.lock();
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let was_playing = state.is_playing;
            if let Some(driver) = state.reset() {
                driver.abort();
            }
            (was_playing, generation)
        };

        if was_playing {
            info!("Show stopped");
        }
        self.shared.hub.emergency_stop_all().await;
        self.shared.settle(generation);
    }

    /// Wait until no pass is running and the emergency stop that ended the
    /// last one has been delivered. Returns at once when nothing was played.
    pub async fn wait_finished(&self) {
        let mut running = self.shared.running.subscribe();
        // The sender lives in `shared`, which outlives this borrow
        let _ = running.wait_for(|running| !running).await;
    }

    /// Move the playhead, clamped to the show length. While playing, the
    /// pass re-arms at the new position and cues before it are skipped.
    pub fn seek(&self, offset_ms: i64) -> u64 {
        let settings = self.shared.settings.plan;
        let mut state = self.shared.state.lock();
        let target = state
            .plan_or_build(settings)
            .map_or(0, |plan| plan.clamp(offset_ms));

        if let Some(plan) = state.plan.clone().filter(|_| state.is_playing) {
            state.arm_queue(&plan, target);
            // Effects still running are stopped right away
            let running: Vec<usize> = state.active.keys().copied().collect();
            for index in running {
                state.queue.push(target, EventKind::EffectStop { index });
            }
            state.audio.reposition(target);
            state.started = Some(Instant::now());
        }

        state.offset_ms = target;
        debug!("Seek to {}ms", target);
        target
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(driver) = self.shared.state.lock().driver.take() {
            driver.abort();
        }
    }
}

async fn drive(shared: Arc<Shared>, generation: u64) {
    let mut ticker = interval(shared.settings.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        if shared.tick() {
            shared.finish(generation).await;
            return;
        }
    }
}

impl Shared {
    /// Dispatch everything due. Returns true once the show end is reached.
    fn tick(&self) -> bool {
        let mut state = self.state.lock();
        let Some(plan) = state.plan.clone() else {
            return false;
        };
        let now = state.now_ms();
        let generation = self.generation.load(Ordering::SeqCst);

        state.audio.update(now);

        while let Some(event) = state.queue.pop_due(now) {
            match event.kind {
                EventKind::ShowEnd => return true,
                EventKind::Cue { index, pass } => {
                    let Some(cue) = plan.cues.get(index) else {
                        continue;
                    };

                    let call = match &cue.action {
                        CueAction::Fire {
                            channel, firework, ..
                        } => DeviceCall::Fire {
                            area: cue.area,
                            channel: *channel,
                            firework: firework.clone(),
                        },
                        CueAction::Effect {
                            effect,
                            name,
                            interval_ms,
                            duration_ms,
                            relays,
                        } => {
                            let until_ms = event.due_ms.saturating_add(*duration_ms);
                            state.queue.push(until_ms, EventKind::EffectStop { index });
                            state.active.insert(
                                index,
                                ActiveEffect {
                                    sequence_id: cue.sequence_id.clone(),
                                    controller_id: cue.controller_id.clone(),
                                    name: name.clone(),
                                    until_ms,
                                },
                            );
                            DeviceCall::StartEffect {
                                area: cue.area,
                                effect: *effect,
                                interval_ms: *interval_ms,
                                relays: relays.clone(),
                            }
                        }
                    };

                    if pass + 1 < cue.repeat {
                        state.queue.push(
                            cue.pass_start(pass + 1),
                            EventKind::Cue {
                                index,
                                pass: pass + 1,
                            },
                        );
                    }

                    debug!(
                        "{}ms: {} {} pass {}",
                        now,
                        cue.sequence_id,
                        cue.controller_id,
                        pass + 1
                    );
                    self.send(&mut state, &cue.controller_id, &cue.sequence_id, call, generation);
                }
                EventKind::EffectStop { index } => {
                    if state.active.remove(&index).is_none() {
                        continue;
                    }
                    if let Some(cue) = plan.cues.get(index) {
                        self.send(
                            &mut state,
                            &cue.controller_id,
                            &cue.sequence_id,
                            DeviceCall::StopEffect,
                            generation,
                        );
                    }
                }
            }
        }

        false
    }

    fn send(
        &self,
        state: &mut PlaybackState,
        controller_id: &str,
        sequence_id: &str,
        call: DeviceCall,
        generation: u64,
    ) {
        let job = LaneJob {
            generation,
            sequence_id: sequence_id.to_string(),
            call,
        };
        if state
            .lane(controller_id, &self.hub, &self.generation)
            .send(job)
            .is_err()
        {
            error!("Lane for {} is gone, dropping {}", controller_id, sequence_id);
        }
    }

    /// The show ran to its end
    async fn finish(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
            // This is the driver itself, so it is dropped rather than aborted
            drop(state.reset());
        }

        info!("Show finished");
        self.hub.emergency_stop_all().await;
        self.settle(generation + 1);
    }

    /// Mark playback as over, unless another pass started meanwhile
    fn settle(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) == generation {
            self.running.send_replace(false);
        }
    }
}

/// Runs the device calls of one controller in order. Calls from a pass that
/// has since been stopped are dropped.
async fn run_lane(
    hub: Arc<ControllerHub>,
    generation: Arc<AtomicU64>,
    controller_id: String,
    mut jobs: mpsc::UnboundedReceiver<LaneJob>,
) {
    while let Some(job) = jobs.recv().await {
        if generation.load(Ordering::SeqCst) != job.generation {
            continue;
        }

        let result = match &job.call {
            DeviceCall::Fire {
                area,
                channel,
                firework,
            } => {
                debug!(
                    "Firing {} on {} area {} channel {}",
                    firework, controller_id, area, channel
                );
                hub.fire_channel(&controller_id, *area, *channel).await
            }
            DeviceCall::StartEffect {
                area,
                effect,
                interval_ms,
                relays,
            } => {
                hub.start_effect(&controller_id, *area, *effect, *interval_ms, relays)
                    .await
            }
            DeviceCall::StopEffect => hub.stop_effect(&controller_id).await,
        };

        match result {
            Ok(()) => {}
            Err(DeviceError::Disarmed(_)) => {
                info!(
                    "Skipped {} on {}: system is disarmed",
                    job.sequence_id, controller_id
                );
            }
            Err(e) => warn!("{} on {} failed: {}", job.sequence_id, controller_id, e),
        }
    }
}
