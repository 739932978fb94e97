use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Error};
use common::ControllerKind;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config.ron";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Hosts probed by discovery, one per controller kind
    pub discovery: Vec<DiscoveryHost>,
    pub request_timeout_ms: u64,
    pub status_poll_secs: u64,
    pub tick_ms: u64,
    /// Time kept after the last cue before a show without audio ends
    pub trailing_buffer_ms: u64,
    /// Time kept after the audio (or last cue) of a show with audio
    pub audio_trailing_buffer_ms: u64,
    pub relay_selection: RelaySelectionMode,
    /// Where the snapshot and audio blobs live
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DiscoveryHost {
    pub host: String,
    pub kind: ControllerKind,
    pub name: String,
}

/// How a lighting effect is restricted to a subset of relays
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum RelaySelectionMode {
    /// All relays off, wanted relays on, then a plain effect
    #[default]
    Manual,
    /// The firmware's selective-effect endpoint, falling back to `Manual`
    Selective,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery: vec![
                DiscoveryHost {
                    host: "lume-base.local".to_string(),
                    kind: ControllerKind::Firework,
                    name: "Firework base".to_string(),
                },
                DiscoveryHost {
                    host: "lume-controller-01.local".to_string(),
                    kind: ControllerKind::Lights,
                    name: "Lighting controller".to_string(),
                },
            ],
            request_timeout_ms: 3000,
            status_poll_secs: 10,
            tick_ms: 100,
            trailing_buffer_ms: 5000,
            audio_trailing_buffer_ms: 1000,
            relay_selection: RelaySelectionMode::Manual,
            data_dir: None,
        }
    }
}

impl Config {
    /// Load `config.ron` from the working directory
    pub fn load() -> Result<Config, Error> {
        Config::load_from(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Load a config file. A missing file gives the defaults.
    pub fn load_from(path: &Path) -> Result<Config, Error> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        let config = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            ron::from_str(&config).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("lume-desk"),
        }
    }
}
