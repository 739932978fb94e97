//! A show resolved against the type library: every sequence becomes a cue
//! with concrete durations and relays. A plan is immutable, one playback
//! pass reads one plan.

use common::{AudioTrack, EffectKind, SequenceAction, Show};
use thiserror::Error;

use crate::{device::RelaySelection, library::TypeLibrary};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("no show loaded")]
    NoShow,

    #[error("show '{0}' has no sequences")]
    EmptyShow(String),

    #[error("sequence '{sequence}' uses unknown firework type '{type_id}'")]
    MissingFireworkType { sequence: String, type_id: String },

    #[error("sequence '{sequence}' uses unknown lighting type '{type_id}'")]
    MissingLightingType { sequence: String, type_id: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlanSettings {
    pub trailing_buffer_ms: u64,
    pub audio_trailing_buffer_ms: u64,
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self {
            trailing_buffer_ms: 5000,
            audio_trailing_buffer_ms: 1000,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShowPlan {
    pub show_id: String,
    pub name: String,
    /// Sorted by start time
    pub cues: Vec<Cue>,
    pub audio: Option<AudioTrack>,
    /// Length of the timeline, the upper bound for seeking
    pub total_ms: u64,
    /// When the show stops on its own
    pub end_ms: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cue {
    pub sequence_id: String,
    pub at_ms: u64,
    pub controller_id: String,
    pub area: u8,
    pub repeat: u32,
    pub action: CueAction,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CueAction {
    Fire {
        channel: u8,
        firework: String,
        duration_ms: u64,
        safety_delay_ms: u64,
    },
    Effect {
        effect: EffectKind,
        name: String,
        interval_ms: u32,
        duration_ms: u64,
        relays: RelaySelection,
    },
}

impl Cue {
    pub fn duration_ms(&self) -> u64 {
        match &self.action {
            CueAction::Fire { duration_ms, .. } | CueAction::Effect { duration_ms, .. } => {
                *duration_ms
            }
        }
    }

    /// Pause between two passes of a repeated cue
    pub fn gap_ms(&self) -> u64 {
        match &self.action {
            CueAction::Fire {
                safety_delay_ms, ..
            } => *safety_delay_ms,
            CueAction::Effect { .. } => 0,
        }
    }

    /// Start of the given pass, counting from zero
    pub fn pass_start(&self, pass: u32) -> u64 {
        let period = self.duration_ms().saturating_add(self.gap_ms());
        self.at_ms.saturating_add(period.saturating_mul(pass as u64))
    }

    /// When the last pass finishes
    pub fn end_ms(&self) -> u64 {
        let repeat = self.repeat.max(1);
        self.pass_start(repeat - 1).saturating_add(self.duration_ms())
    }
}

impl ShowPlan {
    pub fn build(
        show: &Show,
        library: &TypeLibrary,
        settings: PlanSettings,
    ) -> Result<Self, PlaybackError> {
        let mut cues = Vec::with_capacity(show.sequences.len());

        for sequence in show.sorted_sequences() {
            let action = match &sequence.action {
                SequenceAction::Firework {
                    channel,
                    firework_type_id,
                } => {
                    let firework = library.firework(firework_type_id).ok_or_else(|| {
                        PlaybackError::MissingFireworkType {
                            sequence: sequence.id.clone(),
                            type_id: firework_type_id.clone(),
                        }
                    })?;

                    CueAction::Fire {
                        channel: *channel,
                        firework: firework.name.clone(),
                        duration_ms: firework.duration_ms,
                        safety_delay_ms: firework.safety_delay_ms,
                    }
                }
                SequenceAction::Lighting {
                    effect_type_id,
                    duration_ms,
                    relays,
                } => {
                    let effect = library.lighting(effect_type_id).ok_or_else(|| {
                        PlaybackError::MissingLightingType {
                            sequence: sequence.id.clone(),
                            type_id: effect_type_id.clone(),
                        }
                    })?;

                    // Sequence override, then the template's pattern, then everything
                    let relays = relays
                        .as_deref()
                        .or(effect.relays.as_deref())
                        .map(RelaySelection::from_relays)
                        .unwrap_or(RelaySelection::All);

                    CueAction::Effect {
                        effect: effect.effect,
                        name: effect.name.clone(),
                        interval_ms: effect.interval_ms,
                        duration_ms: duration_ms.unwrap_or(effect.duration_ms),
                        relays,
                    }
                }
            };

            cues.push(Cue {
                sequence_id: sequence.id.clone(),
                at_ms: sequence.timestamp_ms,
                controller_id: sequence.controller_id.clone(),
                area: sequence.area,
                repeat: sequence.repeat.max(1),
                action,
            });
        }

        let last_cue_end = cues.iter().map(Cue::end_ms).max().unwrap_or(0);
        let (total_ms, buffer) = match &show.audio {
            Some(audio) => (
                last_cue_end.max(audio.end_ms()),
                settings.audio_trailing_buffer_ms,
            ),
            None => (last_cue_end, settings.trailing_buffer_ms),
        };

        Ok(Self {
            show_id: show.id.clone(),
            name: show.name.clone(),
            cues,
            audio: show.audio.clone(),
            total_ms,
            end_ms: total_ms.saturating_add(buffer),
        })
    }

    /// Timeline length a seek is clamped to
    pub fn clamp(&self, offset_ms: i64) -> u64 {
        u64::try_from(offset_ms).unwrap_or(0).min(self.total_ms)
    }
}

#[cfg(test)]
mod tests {
    use common::{AudioSource, AudioTrack, LightingEffectType};

    use super::*;
    use crate::show::ShowEditor;

    fn library() -> TypeLibrary {
        let mut library = TypeLibrary::stock();
        library
            .add_lighting(LightingEffectType {
                id: "left-wash".to_string(),
                name: "Left wash".to_string(),
                effect: EffectKind::Wave,
                duration_ms: 2000,
                interval_ms: 200,
                relays: Some(vec![1, 2, 3]),
            })
            .unwrap();
        library
    }

    #[test]
    fn test_single_firework_without_audio() {
        let mut editor = ShowEditor::new("Solo").unwrap();
        editor.add_firework(2000, "base", 1, 4, "comet").unwrap();

        let plan = ShowPlan::build(editor.show(), &library(), PlanSettings::default()).unwrap();

        assert_eq!(plan.cues.len(), 1);
        assert_eq!(plan.total_ms, 3500);
        assert_eq!(plan.end_ms, 8500);
    }

    #[test]
    fn test_audio_extends_timeline() {
        let mut editor = ShowEditor::new("Song").unwrap();
        editor.add_firework(1000, "base", 1, 1, "mine").unwrap();
        editor
            .set_audio(AudioTrack {
                id: "a".to_string(),
                name: "song".to_string(),
                duration_ms: 5000,
                start_offset_ms: 2000,
                source: AudioSource::Url {
                    url: "http://example.com/song.mp3".to_string(),
                },
            })
            .unwrap();

        let plan = ShowPlan::build(editor.show(), &library(), PlanSettings::default()).unwrap();

        assert_eq!(plan.total_ms, 7000);
        assert_eq!(plan.end_ms, 8000);
        assert_eq!(plan.clamp(-50), 0);
        assert_eq!(plan.clamp(8000), 7000);
        assert_eq!(plan.clamp(i64::MIN), 0);
        assert_eq!(plan.clamp(i64::MAX), 7000);
    }

    #[test]
    fn test_relay_resolution_order() {
        let mut editor = ShowEditor::new("Lights").unwrap();
        editor
            .add_lighting(0, "lights", 1, "left-wash", None, None)
            .unwrap();
        editor
            .add_lighting(10, "lights", 1, "left-wash", Some(500), Some(vec![7]))
            .unwrap();
        editor
            .add_lighting(20, "lights", 1, "strobe", None, None)
            .unwrap();

        let plan = ShowPlan::build(editor.show(), &library(), PlanSettings::default()).unwrap();
        let relays: Vec<&RelaySelection> = plan
            .cues
            .iter()
            .map(|cue| match &cue.action {
                CueAction::Effect { relays, .. } => relays,
                CueAction::Fire { .. } => unreachable!(),
            })
            .collect();

        assert_eq!(relays[0], &RelaySelection::Only(vec![1, 2, 3]));
        assert_eq!(relays[1], &RelaySelection::Only(vec![7]));
        assert_eq!(relays[2], &RelaySelection::All);
        assert_eq!(plan.cues[1].duration_ms(), 500);
    }

    #[test]
    fn test_repeats_extend_cue() {
        let mut editor = ShowEditor::new("Repeat").unwrap();
        let id = editor.add_firework(0, "base", 1, 1, "comet").unwrap();
        let mut sequence = editor.show().sequence(&id).unwrap().clone();
        sequence.repeat = 3;
        editor.update_sequence(sequence).unwrap();

        let plan = ShowPlan::build(editor.show(), &library(), PlanSettings::default()).unwrap();
        let cue = &plan.cues[0];

        // comet: 1500ms burn, 1000ms safety delay
        assert_eq!(cue.pass_start(1), 2500);
        assert_eq!(cue.pass_start(2), 5000);
        assert_eq!(cue.end_ms(), 6500);
    }

    #[test]
    fn test_unknown_type_is_reported() {
        let mut editor = ShowEditor::new("Broken").unwrap();
        let id = editor.add_firework(0, "base", 1, 1, "nope").unwrap();

        assert_eq!(
            ShowPlan::build(editor.show(), &library(), PlanSettings::default()),
            Err(PlaybackError::MissingFireworkType {
                sequence: id,
                type_id: "nope".to_string()
            })
        );
    }

    #[test]
    fn test_huge_durations_saturate() {
        let mut library = TypeLibrary::empty();
        library.fireworks.push(common::FireworkType {
            id: "endless".to_string(),
            name: "Endless".to_string(),
            duration_ms: u64::MAX / 2,
            safety_delay_ms: 0,
            description: String::new(),
        });
        let mut editor = ShowEditor::new("Endless").unwrap();
        let id = editor.add_firework(1000, "base", 1, 1, "endless").unwrap();
        let mut show = editor.into_show();
        show.sequences[0].repeat = 3;

        let plan = ShowPlan::build(&show, &library, PlanSettings::default()).unwrap();
        assert_eq!(plan.cues[0].sequence_id, id);
        assert_eq!(plan.total_ms, u64::MAX);
        assert_eq!(plan.end_ms, u64::MAX);
        assert_eq!(plan.clamp(i64::MAX), i64::MAX as u64);
    }
}
