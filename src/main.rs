use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Error};
use clap::{Parser, Subcommand, ValueEnum};
use common::{ControllerKind, ControllerRecord, EffectKind};
use log::{info, warn};
use lume_desk::{
    device::RelaySelection,
    discovery::host_id,
    exchange,
    prelude::*,
    validation::{validate_show, ValidationError},
};

/// Desk for ESP32 firework and lighting controllers
#[derive(Parser, Debug)]
#[command(name = "lume-desk", version)]
struct Args {
    /// RON config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Versions, paths and what the desk knows
    Info,
    /// Probe the well-known controller hostnames
    Discover,
    /// Add a controller by address after checking it answers
    Connect {
        address: String,
        #[arg(value_enum)]
        kind: KindArg,
        #[arg(long)]
        name: Option<String>,
    },
    /// Poll every known controller once
    Status,
    /// Allow firework commands
    Arm,
    /// Refuse firework commands
    Disarm,
    /// Fire one channel
    Fire {
        controller: String,
        #[arg(long, default_value_t = 1)]
        area: u8,
        channel: u8,
    },
    /// Fire every channel of the current area
    TestAll { controller: String },
    /// Switch a relay, or all relays when none is given
    Relay {
        controller: String,
        #[arg(value_enum)]
        state: RelayArg,
        relay: Option<u8>,
    },
    /// Start a lighting effect
    Effect {
        controller: String,
        effect: EffectKind,
        #[arg(long, default_value_t = 1)]
        area: u8,
        #[arg(long, default_value_t = 250)]
        interval: u32,
        /// Relays to drive, all when empty
        #[arg(long, value_delimiter = ',')]
        relays: Vec<u8>,
    },
    EffectStop { controller: String },
    /// Stop everything on every controller
    EmergencyStop,
    #[command(subcommand)]
    Show(ShowCommand),
    /// Play the current show
    Play {
        /// Start this many milliseconds in
        #[arg(long)]
        from: Option<i64>,
    },
    /// Write the current show to a file
    Export {
        path: PathBuf,
        /// Timing sheet instead of a show file
        #[arg(long)]
        csv: bool,
        /// Embed the audio file
        #[arg(long)]
        with_audio: bool,
    },
    /// Load a show file and make it current
    Import { path: PathBuf },
}

#[derive(Subcommand, Debug)]
enum ShowCommand {
    New { name: String },
    List,
    /// Make another show current
    Select { id: String },
    AddFirework {
        at: u64,
        controller: String,
        area: u8,
        channel: u8,
        firework_type: String,
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
    AddLighting {
        at: u64,
        controller: String,
        area: u8,
        effect_type: String,
        #[arg(long)]
        duration: Option<u64>,
        #[arg(long, value_delimiter = ',')]
        relays: Vec<u8>,
    },
    Move { sequence: String, at: u64 },
    Remove { sequence: String },
    AudioFile {
        path: PathBuf,
        #[arg(long)]
        duration_ms: u64,
    },
    AudioUrl {
        url: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        duration_ms: u64,
    },
    AudioOffset { offset_ms: u64 },
    Validate,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Firework,
    Lights,
}

impl From<KindArg> for ControllerKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Firework => ControllerKind::Firework,
            KindArg::Lights => ControllerKind::Lights,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RelayArg {
    On,
    Off,
    Toggle,
}

/// Everything a command needs, loaded from disk
struct Desk {
    config: Config,
    store: Store,
    snapshot: Snapshot,
    factory: Arc<HttpDeviceFactory>,
    hub: Arc<ControllerHub>,
}

impl Desk {
    fn open(config: Config) -> Result<Self, Error> {
        let store = Store::new(config.data_dir());
        let snapshot = store.load()?;
        let factory = Arc::new(HttpDeviceFactory::new(config.request_timeout())?);

        let hub = Arc::new(ControllerHub::new(
            factory.clone(),
            SafetyGate::new(snapshot.armed),
            config.relay_selection,
        ));
        hub.replace_all(snapshot.controllers.clone());

        Ok(Self {
            config,
            store,
            snapshot,
            factory,
            hub,
        })
    }

    fn save(&mut self) -> Result<(), Error> {
        self.snapshot.capture(&self.hub);
        self.store.save(&self.snapshot)
    }

    /// Apply an edit to the current show and persist it
    fn edit<T>(
        &mut self,
        f: impl FnOnce(&mut ShowEditor) -> Result<T, ValidationError>,
    ) -> Result<T, Error> {
        let show = self
            .snapshot
            .current()
            .cloned()
            .ok_or(ValidationError::NoShow)?;
        let mut editor = ShowEditor::from_show(show);
        let out = f(&mut editor)?;

        let show = editor.into_show();
        self.store.save_audio(&show)?;
        self.snapshot.put_show(show);
        self.save()?;
        Ok(out)
    }

    fn current_show(&self) -> Result<common::Show, Error> {
        let mut show = self
            .snapshot
            .current()
            .cloned()
            .ok_or(ValidationError::NoShow)?;
        if !self.store.restore_audio(&mut show)? {
            warn!("Audio of '{}' could not be restored", show.name);
        }
        Ok(show)
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::load_from(&args.config)?;
    let mut desk = Desk::open(config)?;

    match args.command {
        Command::Info => {
            println!("lume-desk {}", env!("CARGO_PKG_VERSION"));
            println!("Platform: {} {}", std::env::consts::OS, std::env::consts::ARCH);
            println!("Data: {}", desk.store.dir().display());
            println!(
                "Armed: {}",
                if desk.hub.safety().is_armed() { "yes" } else { "no" }
            );
            println!("Controllers: {}", desk.snapshot.controllers.len());
            println!("Shows: {}", desk.snapshot.shows.len());
            println!(
                "Relay selection: {:?}, tick {}ms",
                desk.config.relay_selection, desk.config.tick_ms
            );
        }
        Command::Discover => {
            let discovery = Discovery::new(desk.config.discovery.clone(), desk.factory.clone());
            let found = discovery.refresh(&desk.hub).await;
            for record in &found {
                println!("{:<24} {:?} {}", record.id, record.kind, record.address);
            }
            desk.save()?;
        }
        Command::Connect {
            address,
            kind,
            name,
        } => {
            let discovery = Discovery::new(Vec::new(), desk.factory.clone());
            discovery
                .test_connection(&address, kind.into())
                .await
                .with_context(|| format!("{} did not answer", address))?;

            let id = host_id(&address);
            let name = name.unwrap_or_else(|| id.clone());
            desk.hub
                .upsert(ControllerRecord::new(id.clone(), name, kind.into(), address));
            desk.hub.set_status(&id, common::ControllerStatus::Connected);
            desk.save()?;
            println!("Added {}", id);
        }
        Command::Status => {
            let monitor = StatusMonitor::new(desk.hub.clone(), desk.config.status_poll_interval());
            monitor.poll_once().await;
            for record in desk.hub.records() {
                let last_seen = record
                    .last_seen
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:<24} {:<10} {:<14} last seen {}",
                    record.id,
                    format!("{:?}", record.status),
                    record.address,
                    last_seen
                );
            }
            desk.save()?;
        }
        Command::Arm => {
            desk.hub.safety().arm();
            desk.save()?;
        }
        Command::Disarm => {
            desk.hub.safety().disarm();
            desk.save()?;
        }
        Command::Fire {
            controller,
            area,
            channel,
        } => desk.hub.fire_channel(&controller, area, channel).await?,
        Command::TestAll { controller } => desk.hub.test_all(&controller).await?,
        Command::Relay {
            controller,
            state,
            relay,
        } => match (relay, state) {
            (Some(relay), RelayArg::Toggle) => desk.hub.toggle_relay(&controller, relay).await?,
            (Some(relay), state) => {
                desk.hub
                    .set_relay(&controller, relay, matches!(state, RelayArg::On))
                    .await?
            }
            (None, RelayArg::Toggle) => bail!("toggle needs a relay number"),
            (None, state) => {
                desk.hub
                    .set_all_relays(&controller, matches!(state, RelayArg::On))
                    .await?
            }
        },
        Command::Effect {
            controller,
            effect,
            area,
            interval,
            relays,
        } => {
            let relays = RelaySelection::from_relays(&relays);
            desk.hub
                .start_effect(&controller, area, effect, interval, &relays)
                .await?
        }
        Command::EffectStop { controller } => desk.hub.stop_effect(&controller).await?,
        Command::EmergencyStop => {
            let failed = desk
                .hub
                .emergency_stop_all()
                .await
                .into_iter()
                .filter(|(_, result)| result.is_err())
                .count();
            if failed > 0 {
                bail!("{} controllers did not acknowledge the emergency stop", failed);
            }
        }
        Command::Show(command) => show_command(&mut desk, command)?,
        Command::Play { from } => play(&mut desk, from).await?,
        Command::Export {
            path,
            csv,
            with_audio,
        } => {
            let show = desk.current_show()?;
            let contents = if csv {
                exchange::export_csv(&show, &desk.snapshot.library)
            } else {
                let file = exchange::export_show(
                    &show,
                    &desk.snapshot.library,
                    &desk.snapshot.controllers,
                    with_audio,
                );
                exchange::to_json(&file)?
            };
            std::fs::write(&path, contents)
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Exported '{}' to {}", show.name, path.display());
        }
        Command::Import { path } => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let imported = exchange::import_show(&json, &mut desk.snapshot.library)?;

            for record in imported.controllers {
                if !desk.hub.contains(&record.id) {
                    desk.hub.upsert(record);
                }
            }
            desk.store.save_audio(&imported.show)?;
            println!("Imported '{}' as {}", imported.show.name, imported.show.id);
            desk.snapshot.put_show(imported.show);
            desk.save()?;
        }
    }

    Ok(())
}

fn show_command(desk: &mut Desk, command: ShowCommand) -> Result<(), Error> {
    match command {
        ShowCommand::New { name } => {
            let show = ShowEditor::new(&name)?.into_show();
            println!("Created '{}' ({})", show.name, show.id);
            desk.snapshot.put_show(show);
            desk.save()?;
        }
        ShowCommand::List => {
            for show in &desk.snapshot.shows {
                let marker = if desk.snapshot.current_show.as_deref() == Some(show.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {} {} ({} sequences)",
                    marker,
                    show.id,
                    show.name,
                    show.sequences.len()
                );
            }
            if let Some(show) = desk.snapshot.current() {
                for sequence in show.sorted_sequences() {
                    println!(
                        "    {:>8}ms {:<9} {} {} area {}",
                        sequence.timestamp_ms,
                        sequence.kind(),
                        sequence.id,
                        sequence.controller_id,
                        sequence.area
                    );
                }
            }
        }
        ShowCommand::Select { id } => {
            let show = desk
                .snapshot
                .show(&id)
                .cloned()
                .ok_or_else(|| anyhow!("no show with id {}", id))?;
            desk.snapshot.put_show(show);
            desk.save()?;
        }
        ShowCommand::AddFirework {
            at,
            controller,
            area,
            channel,
            firework_type,
            repeat,
        } => {
            let id = desk.edit(|editor| {
                let id = editor.add_firework(at, &controller, area, channel, &firework_type)?;
                if repeat != 1 {
                    let mut sequence = editor
                        .show()
                        .sequence(&id)
                        .cloned()
                        .ok_or_else(|| ValidationError::NotFound {
                            what: "sequence",
                            id: id.clone(),
                        })?;
                    sequence.repeat = repeat;
                    editor.update_sequence(sequence)?;
                }
                Ok(id)
            })?;
            println!("Added {}", id);
        }
        ShowCommand::AddLighting {
            at,
            controller,
            area,
            effect_type,
            duration,
            relays,
        } => {
            let relays = (!relays.is_empty()).then_some(relays);
            let id = desk.edit(|editor| {
                editor.add_lighting(at, &controller, area, &effect_type, duration, relays)
            })?;
            println!("Added {}", id);
        }
        ShowCommand::Move { sequence, at } => {
            desk.edit(|editor| editor.move_sequence(&sequence, at))?
        }
        ShowCommand::Remove { sequence } => {
            desk.edit(|editor| editor.remove_sequence(&sequence).map(|_| ()))?
        }
        ShowCommand::AudioFile { path, duration_ms } => {
            let data =
                std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "audio".to_string());
            desk.edit(|editor| editor.attach_audio_file(&name, data, duration_ms))?;
        }
        ShowCommand::AudioUrl {
            url,
            name,
            duration_ms,
        } => {
            let name = name.unwrap_or_else(|| url.clone());
            desk.edit(|editor| editor.link_audio_url(&name, &url, duration_ms))?;
        }
        ShowCommand::AudioOffset { offset_ms } => {
            desk.edit(|editor| editor.move_audio(offset_ms))?
        }
        ShowCommand::Validate => {
            let show = desk
                .snapshot
                .current()
                .ok_or(ValidationError::NoShow)?;
            let report = validate_show(show, &desk.snapshot.library, &desk.snapshot.controllers);
            println!("Timing valid:          {}", report.timing_valid);
            println!("Effects valid:         {}", report.effects_valid);
            println!("Controllers available: {}", report.controllers_available);
            for problem in &report.problems {
                println!("  - {}", problem);
            }
        }
    }

    Ok(())
}

fn audio_backend() -> Arc<dyn AudioBackend> {
    #[cfg(feature = "audio")]
    {
        match KiraAudio::new() {
            Ok(kira) => return Arc::new(kira),
            Err(e) => warn!("{}, falling back to silent playback", e),
        }
    }

    Arc::new(SilentAudio)
}

async fn play(desk: &mut Desk, from: Option<i64>) -> Result<(), Error> {
    let show = desk.current_show()?;
    let scheduler = Scheduler::new(
        desk.hub.clone(),
        audio_backend(),
        SchedulerSettings::from(&desk.config),
    );
    scheduler.load(show, desk.snapshot.library.clone());
    if let Some(from) = from {
        scheduler.seek(from);
    }

    let monitor =
        StatusMonitor::new(desk.hub.clone(), desk.config.status_poll_interval()).spawn();

    scheduler.play().await?;

    let mut progress = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping the show");
                scheduler.stop().await;
                break;
            }
            _ = progress.tick() => {
                let status = scheduler.status();
                if !status.is_running {
                    break;
                }
                let effects: Vec<&str> =
                    status.active_effects.iter().map(|e| e.name.as_str()).collect();
                info!(
                    "{:>7}ms / {}ms {}",
                    status.current_time_ms,
                    status.total_duration_ms,
                    effects.join(", ")
                );
            }
        }
    }

    // The closing emergency stop must reach every controller before the
    // runtime goes away
    scheduler.wait_finished().await;
    monitor.abort();
    desk.save()
}
