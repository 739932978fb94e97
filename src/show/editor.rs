use chrono::Utc;
use common::{AudioData, AudioSource, AudioTrack, Sequence, SequenceAction, Show};
use log::info;
use uuid::Uuid;

use crate::validation::{check_audio, check_sequence, check_time, not_empty, ValidationError};

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Mutators for a show. Every change goes through a check first and bumps
/// the modification time.
#[derive(Clone, Debug)]
pub struct ShowEditor {
    show: Show,
}

impl ShowEditor {
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        not_empty("show name", name)?;
        Ok(Self {
            show: Show::new(new_id(), name.trim()),
        })
    }

    pub fn from_show(show: Show) -> Self {
        Self { show }
    }

    pub fn show(&self) -> &Show {
        &self.show
    }

    pub fn into_show(self) -> Show {
        self.show
    }

    fn touch(&mut self) {
        self.show.modified_at = Utc::now();
    }

    pub fn rename(&mut self, name: &str) -> Result<(), ValidationError> {
        not_empty("show name", name)?;
        self.show.name = name.trim().to_string();
        self.touch();
        Ok(())
    }

    pub fn set_description(&mut self, description: &str) {
        self.show.description = description.to_string();
        self.touch();
    }

    /// Add a sequence. An empty id gets a generated one; the final id is
    /// returned.
    pub fn add_sequence(&mut self, mut sequence: Sequence) -> Result<String, ValidationError> {
        if sequence.id.is_empty() {
            sequence.id = new_id();
        }
        check_sequence(&sequence)?;

        if self.show.sequence(&sequence.id).is_some() {
            return Err(ValidationError::Duplicate {
                what: "sequence",
                id: sequence.id,
            });
        }

        let id = sequence.id.clone();
        self.show.sequences.push(sequence);
        self.touch();
        Ok(id)
    }

    pub fn add_firework(
        &mut self,
        timestamp_ms: u64,
        controller_id: &str,
        area: u8,
        channel: u8,
        firework_type_id: &str,
    ) -> Result<String, ValidationError> {
        self.add_sequence(Sequence {
            id: String::new(),
            timestamp_ms,
            controller_id: controller_id.to_string(),
            area,
            repeat: 1,
            action: SequenceAction::Firework {
                channel,
                firework_type_id: firework_type_id.to_string(),
            },
        })
    }

    pub fn add_lighting(
        &mut self,
        timestamp_ms: u64,
        controller_id: &str,
        area: u8,
        effect_type_id: &str,
        duration_ms: Option<u64>,
        relays: Option<Vec<u8>>,
    ) -> Result<String, ValidationError> {
        self.add_sequence(Sequence {
            id: String::new(),
            timestamp_ms,
            controller_id: controller_id.to_string(),
            area,
            repeat: 1,
            action: SequenceAction::Lighting {
                effect_type_id: effect_type_id.to_string(),
                duration_ms,
                relays,
            },
        })
    }

    /// Replace the sequence with the same id
    pub fn update_sequence(&mut self, sequence: Sequence) -> Result<(), ValidationError> {
        check_sequence(&sequence)?;
        let slot = self
            .show
            .sequences
            .iter_mut()
            .find(|s| s.id == sequence.id)
            .ok_or_else(|| ValidationError::NotFound {
                what: "sequence",
                id: sequence.id.clone(),
            })?;
        *slot = sequence;
        self.touch();
        Ok(())
    }

    /// Change when a sequence fires. A running pass keeps the old time.
    pub fn move_sequence(&mut self, id: &str, timestamp_ms: u64) -> Result<(), ValidationError> {
        check_time("timestamp", timestamp_ms)?;
        let sequence = self
            .show
            .sequences
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| ValidationError::NotFound {
                what: "sequence",
                id: id.to_string(),
            })?;
        sequence.timestamp_ms = timestamp_ms;
        self.touch();
        Ok(())
    }

    pub fn remove_sequence(&mut self, id: &str) -> Result<Sequence, ValidationError> {
        let index = self
            .show
            .sequences
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| ValidationError::NotFound {
                what: "sequence",
                id: id.to_string(),
            })?;
        let removed = self.show.sequences.remove(index);
        self.touch();
        Ok(removed)
    }

    pub fn set_audio(&mut self, track: AudioTrack) -> Result<(), ValidationError> {
        check_audio(&track)?;

        info!("Show '{}' now uses audio '{}'", self.show.name, track.name);
        self.show.audio = Some(track);
        self.touch();
        Ok(())
    }

    /// Attach an uploaded file. Returns the new track id.
    pub fn attach_audio_file(
        &mut self,
        file_name: &str,
        data: Vec<u8>,
        duration_ms: u64,
    ) -> Result<String, ValidationError> {
        if data.is_empty() {
            return Err(ValidationError::Empty("audio file"));
        }

        let id = new_id();
        self.set_audio(AudioTrack {
            id: id.clone(),
            name: file_name.to_string(),
            duration_ms,
            start_offset_ms: 0,
            source: AudioSource::File {
                file_name: file_name.to_string(),
                data: Some(data.into()),
            },
        })?;
        Ok(id)
    }

    /// Link remote audio. Returns the new track id.
    pub fn link_audio_url(
        &mut self,
        name: &str,
        url: &str,
        duration_ms: u64,
    ) -> Result<String, ValidationError> {
        let id = new_id();
        self.set_audio(AudioTrack {
            id: id.clone(),
            name: name.to_string(),
            duration_ms,
            start_offset_ms: 0,
            source: AudioSource::Url {
                url: url.to_string(),
            },
        })?;
        Ok(id)
    }

    /// Slide the audio along the timeline
    pub fn move_audio(&mut self, start_offset_ms: u64) -> Result<(), ValidationError> {
        check_time("audio offset", start_offset_ms)?;
        let track = self.show.audio.as_mut().ok_or(ValidationError::NotFound {
            what: "audio track",
            id: String::new(),
        })?;
        track.start_offset_ms = start_offset_ms;
        self.touch();
        Ok(())
    }

    pub fn remove_audio(&mut self) -> Option<AudioTrack> {
        let removed = self.show.audio.take();
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// Re-attach file bytes recovered from storage after a restart. This
    /// does not count as an edit.
    pub fn restore_audio(&mut self, bytes: AudioData) -> Result<(), ValidationError> {
        match self.show.audio.as_mut().map(|t| &mut t.source) {
            Some(AudioSource::File { data, .. }) => {
                *data = Some(bytes);
                Ok(())
            }
            _ => Err(ValidationError::NotFound {
                what: "audio file",
                id: String::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_sort() {
        let mut editor = ShowEditor::new("Finale").unwrap();
        let late = editor.add_firework(4000, "base", 1, 1, "comet").unwrap();
        let early = editor
            .add_lighting(1000, "lights", 2, "strobe", None, Some(vec![1, 2]))
            .unwrap();

        let order: Vec<&str> = editor
            .show()
            .sorted_sequences()
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(order, vec![early.as_str(), late.as_str()]);
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut editor = ShowEditor::new("Finale").unwrap();

        assert!(matches!(
            editor.add_firework(0, "base", 0, 1, "comet"),
            Err(ValidationError::OutOfRange { what: "area", .. })
        ));
        assert!(matches!(
            editor.add_firework(0, "base", 100, 1, "comet"),
            Err(ValidationError::OutOfRange { what: "area", .. })
        ));
        assert!(matches!(
            editor.add_firework(0, "base", 1, 13, "comet"),
            Err(ValidationError::OutOfRange { what: "channel", .. })
        ));
        assert!(matches!(
            editor.add_lighting(0, "lights", 1, "strobe", None, Some(vec![0])),
            Err(ValidationError::OutOfRange { what: "relay", .. })
        ));
        assert!(ShowEditor::new("  ").is_err());
        assert!(editor.show().sequences.is_empty());
    }

    #[test]
    fn test_duplicate_sequence_id() {
        let mut editor = ShowEditor::new("Finale").unwrap();
        let id = editor.add_firework(0, "base", 1, 1, "comet").unwrap();
        let copy = editor.show().sequence(&id).unwrap().clone();

        assert_eq!(
            editor.add_sequence(copy),
            Err(ValidationError::Duplicate {
                what: "sequence",
                id
            })
        );
    }

    #[test]
    fn test_move_and_remove() {
        let mut editor = ShowEditor::new("Finale").unwrap();
        let id = editor.add_firework(1000, "base", 1, 1, "comet").unwrap();
        let before = editor.show().modified_at;

        editor.move_sequence(&id, 2500).unwrap();
        assert_eq!(editor.show().sequence(&id).unwrap().timestamp_ms, 2500);
        assert!(editor.show().modified_at >= before);

        editor.remove_sequence(&id).unwrap();
        assert!(editor.remove_sequence(&id).is_err());
    }

    #[test]
    fn test_audio_lifecycle() {
        let mut editor = ShowEditor::new("Finale").unwrap();
        assert!(editor.move_audio(100).is_err());

        editor
            .attach_audio_file("song.mp3", vec![1, 2, 3, 4], 60_000)
            .unwrap();
        editor.move_audio(2000).unwrap();
        assert_eq!(editor.show().audio.as_ref().unwrap().end_ms(), 62_000);

        // Simulate a restart: the bytes do not survive serialization
        let json = serde_json::to_string(editor.show()).unwrap();
        let mut editor = ShowEditor::from_show(serde_json::from_str(&json).unwrap());
        assert!(editor.show().audio.as_ref().unwrap().needs_restore());

        editor.restore_audio(vec![1, 2, 3, 4].into()).unwrap();
        assert!(!editor.show().audio.as_ref().unwrap().needs_restore());

        assert!(editor.remove_audio().is_some());
        assert!(editor.restore_audio(vec![1].into()).is_err());
    }

    #[test]
    fn test_timeline_bounds() {
        let mut editor = ShowEditor::new("Finale").unwrap();

        assert!(matches!(
            editor.attach_audio_file("song.mp3", vec![1], u64::MAX),
            Err(ValidationError::OutOfRange {
                what: "audio duration",
                ..
            })
        ));
        assert!(editor.show().audio.is_none());

        editor.attach_audio_file("song.mp3", vec![1], 60_000).unwrap();
        assert!(matches!(
            editor.move_audio(u64::MAX),
            Err(ValidationError::OutOfRange {
                what: "audio offset",
                ..
            })
        ));
        assert_eq!(editor.show().audio.as_ref().unwrap().start_offset_ms, 0);

        assert!(editor.add_firework(u64::MAX, "base", 1, 1, "comet").is_err());
        let id = editor.add_firework(1000, "base", 1, 1, "comet").unwrap();
        assert!(editor.move_sequence(&id, u64::MAX).is_err());
        assert!(editor
            .add_lighting(0, "lights", 1, "strobe", Some(u64::MAX), None)
            .is_err());
    }
}
