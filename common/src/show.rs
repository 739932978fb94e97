use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Hardware limits of the controllers
pub const MAX_CHANNELS: u8 = 12;
pub const MAX_RELAYS: u8 = 12;
pub const MAX_AREA: u8 = 99;

/// A show is a set of timestamped sequences plus an optional audio track.
/// The sequences are kept in insertion order and only sorted when a show is
/// planned for playback.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Show {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sequences: Vec<Sequence>,
    #[serde(default)]
    pub audio: Option<AudioTrack>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: ShowMetadata,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ShowMetadata {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Declared length of the show, informational only
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl Show {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            sequences: Vec::new(),
            audio: None,
            created_at: now,
            modified_at: now,
            metadata: ShowMetadata::default(),
        }
    }

    pub fn sequence(&self, id: &str) -> Option<&Sequence> {
        self.sequences.iter().find(|s| s.id == id)
    }

    /// Sequences ordered by timestamp. Sequences sharing a timestamp keep
    /// their insertion order.
    pub fn sorted_sequences(&self) -> Vec<&Sequence> {
        let mut sorted: Vec<&Sequence> = self.sequences.iter().collect();
        sorted.sort_by_key(|s| s.timestamp_ms);
        sorted
    }
}

/// One scheduled action inside a show.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sequence {
    pub id: String,
    /// Milliseconds from the start of the show
    pub timestamp_ms: u64,
    pub controller_id: String,
    pub area: u8,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    #[serde(flatten)]
    pub action: SequenceAction,
}

fn default_repeat() -> u32 {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SequenceAction {
    /// Fire a pyrotechnic channel
    Firework {
        channel: u8,
        firework_type_id: String,
    },
    /// Run a lighting effect on a relay board
    Lighting {
        effect_type_id: String,
        #[serde(default)]
        duration_ms: Option<u64>,
        /// Relays to drive instead of the effect's default pattern
        #[serde(default)]
        relays: Option<Vec<u8>>,
    },
}

impl Sequence {
    pub fn kind(&self) -> &'static str {
        match self.action {
            SequenceAction::Firework { .. } => "firework",
            SequenceAction::Lighting { .. } => "lighting",
        }
    }

    pub fn is_firework(&self) -> bool {
        matches!(self.action, SequenceAction::Firework { .. })
    }
}

/// Audio played alongside a show. The track starts `start_offset_ms` into the
/// show timeline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AudioTrack {
    pub id: String,
    pub name: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub start_offset_ms: u64,
    pub source: AudioSource,
}

impl AudioTrack {
    /// Timeline position where the audio runs out
    pub fn end_ms(&self) -> u64 {
        self.start_offset_ms.saturating_add(self.duration_ms)
    }

    /// True for a local file whose bytes were not restored after a restart
    pub fn needs_restore(&self) -> bool {
        matches!(self.source, AudioSource::File { data: None, .. })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AudioSource {
    /// An uploaded file. The bytes only live in memory and are persisted
    /// separately from the show.
    File {
        file_name: String,
        #[serde(skip)]
        data: Option<AudioData>,
    },
    /// Audio streamed from a remote location
    Url { url: String },
}

/// In-memory audio file contents, cheap to clone.
#[derive(Clone, PartialEq)]
pub struct AudioData(Arc<[u8]>);

impl AudioData {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for AudioData {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl fmt::Debug for AudioData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AudioData({} bytes)", self.0.len())
    }
}
