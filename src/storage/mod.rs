//! Everything the desk remembers between runs: one JSON snapshot plus the
//! audio blobs the snapshot cannot hold.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use common::{AudioSource, ControllerRecord, Show};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{device::ControllerHub, library::TypeLibrary};

mod audio_blobs;

pub use audio_blobs::{checksum, AudioBlobStore, BlobLoad, BlobMeta};

const SNAPSHOT_FILE: &str = "state.json";

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub controllers: Vec<ControllerRecord>,
    #[serde(default)]
    pub shows: Vec<Show>,
    /// Id of the show being edited
    #[serde(default)]
    pub current_show: Option<String>,
    #[serde(default)]
    pub library: TypeLibrary,
    #[serde(default)]
    pub armed: bool,
}

impl Snapshot {
    pub fn show(&self, id: &str) -> Option<&Show> {
        self.shows.iter().find(|s| s.id == id)
    }

    pub fn current(&self) -> Option<&Show> {
        self.show(self.current_show.as_deref()?)
    }

    pub fn current_mut(&mut self) -> Option<&mut Show> {
        let id = self.current_show.clone()?;
        self.shows.iter_mut().find(|s| s.id == id)
    }

    /// Add or replace a show and make it the current one
    /// Take the live controller records and armed flag from the hub
    pub fn capture(&mut self, hub: &ControllerHub) {
        self.controllers = hub.records();
        self.armed = hub.safety().is_armed();
    }

    pub fn put_show(&mut self, show: Show) {
        self.current_show = Some(show.id.clone());
        match self.shows.iter_mut().find(|s| s.id == show.id) {
            Some(existing) => *existing = show,
            None => self.shows.push(show),
        }
    }
}

pub struct Store {
    dir: PathBuf,
    audio: AudioBlobStore,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            audio: AudioBlobStore::new(dir.join("audio")),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn audio(&self) -> &AudioBlobStore {
        &self.audio
    }

    /// Read the snapshot. A fresh install gets an empty one.
    pub fn load(&self) -> Result<Snapshot> {
        let path = self.dir.join(SNAPSHOT_FILE);
        if !path.exists() {
            debug!("No snapshot at {}, starting fresh", path.display());
            return Ok(Snapshot::default());
        }

        let json =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)?;
        write_atomic(&self.dir.join(SNAPSHOT_FILE), json.as_bytes())
    }

    /// Persist the bytes of a show's audio file, if it has any in memory
    pub fn save_audio(&self, show: &Show) -> Result<()> {
        if let Some(track) = &show.audio {
            if let AudioSource::File {
                data: Some(data), ..
            } = &track.source
            {
                self.audio.save(&track.id, data.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Re-attach audio bytes to a show loaded from the snapshot. Returns
    /// false when the show wants a file that could not be recovered.
    pub fn restore_audio(&self, show: &mut Show) -> Result<bool> {
        let Some(track) = show.audio.as_mut() else {
            return Ok(true);
        };
        if !track.needs_restore() {
            return Ok(true);
        }

        match self.audio.load(&track.id)?.into_data() {
            Some(bytes) => {
                if let AudioSource::File { data, .. } = &mut track.source {
                    *data = Some(bytes);
                }
                info!("Restored audio '{}'", track.name);
                Ok(true)
            }
            None => {
                warn!("Audio '{}' is missing and must be re-attached", track.name);
                Ok(false)
            }
        }
    }
}

/// Write to a temporary file beside `path`, then rename over it
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }

    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, data).with_context(|| format!("writing {}", temp_path.display()))?;
    fs::rename(&temp_path, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use common::{ControllerKind, ControllerStatus};

    use super::*;
    use crate::{
        config::RelaySelectionMode, device::HttpDeviceFactory, safety::SafetyGate,
        show::ShowEditor,
    };

    #[test]
    fn test_fresh_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = Store::new(dir.path()).load().unwrap();
        assert_eq!(snapshot, Snapshot::default());
        assert!(!snapshot.armed);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        let mut editor = ShowEditor::new("Finale").unwrap();
        editor.add_firework(2000, "lume-base", 1, 3, "comet").unwrap();

        let mut snapshot = Snapshot {
            controllers: vec![ControllerRecord::new(
                "lume-base",
                "Base",
                ControllerKind::Firework,
                "lume-base.local",
            )],
            armed: true,
            ..Default::default()
        };
        snapshot.put_show(editor.into_show());
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.current().unwrap().name, "Finale");
        assert!(!dir.path().join("state.tmp").exists());
    }

    #[test]
    fn test_audio_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        let mut editor = ShowEditor::new("With music").unwrap();
        editor
            .attach_audio_file("song.mp3", vec![1, 2, 3], 60_000)
            .unwrap();
        let show = editor.into_show();
        store.save_audio(&show).unwrap();

        let mut snapshot = Snapshot::default();
        snapshot.put_show(show);
        store.save(&snapshot).unwrap();

        let mut restored = store.load().unwrap();
        let show = restored.current_mut().unwrap();
        assert!(show.audio.as_ref().unwrap().needs_restore());

        assert!(store.restore_audio(show).unwrap());
        assert!(!show.audio.as_ref().unwrap().needs_restore());
    }

    #[test]
    fn test_missing_audio_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        let mut editor = ShowEditor::new("Lost").unwrap();
        editor
            .attach_audio_file("song.mp3", vec![1], 1000)
            .unwrap();
        let mut show: Show =
            serde_json::from_str(&serde_json::to_string(&editor.into_show()).unwrap()).unwrap();

        assert!(!store.restore_audio(&mut show).unwrap());
    }

    #[test]
    fn test_capture_keeps_live_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        let hub = ControllerHub::new(
            Arc::new(HttpDeviceFactory::new(Duration::from_secs(1)).unwrap()),
            SafetyGate::new(false),
            RelaySelectionMode::Manual,
        );
        hub.replace_all(vec![ControllerRecord::new(
            "lume-base",
            "Base",
            ControllerKind::Firework,
            "lume-base.local",
        )]);
        hub.set_status("lume-base", ControllerStatus::Error);
        hub.safety().arm();

        let mut snapshot = Snapshot::default();
        snapshot.capture(&hub);
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.armed);
        assert_eq!(loaded.controllers[0].status, ControllerStatus::Error);
    }
}
