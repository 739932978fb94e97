//! Input checks for show and library editing, plus the whole-show report
//! shown before a performance.

use std::collections::HashSet;

use common::{
    AudioSource, AudioTrack, ControllerRecord, ControllerStatus, FireworkType,
    LightingEffectType, Sequence, SequenceAction, Show, MAX_AREA, MAX_CHANNELS, MAX_RELAYS,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::library::TypeLibrary;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{what} {value} is out of range {min}-{max}")]
    OutOfRange {
        what: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("{what} '{id}' already exists")]
    Duplicate { what: &'static str, id: String },

    #[error("{what} '{id}' not found")]
    NotFound { what: &'static str, id: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("no show loaded")]
    NoShow,
}

pub fn in_range(what: &'static str, value: u64, min: u64, max: u64) -> Result<(), ValidationError> {
    if value < min || value > max {
        Err(ValidationError::OutOfRange {
            what,
            value,
            min,
            max,
        })
    } else {
        Ok(())
    }
}

pub fn not_empty(what: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Empty(what))
    } else {
        Ok(())
    }
}

/// Upper bound for every timestamp, offset and duration on a timeline.
/// Keeps cue arithmetic far away from overflow.
pub const MAX_TIME_MS: u64 = u32::MAX as u64;

pub fn check_time(what: &'static str, value: u64) -> Result<(), ValidationError> {
    in_range(what, value, 0, MAX_TIME_MS)
}

pub fn check_duration(what: &'static str, value: u64) -> Result<(), ValidationError> {
    in_range(what, value, 1, MAX_TIME_MS)
}

pub fn check_area(area: u8) -> Result<(), ValidationError> {
    in_range("area", area as u64, 1, MAX_AREA as u64)
}

pub fn check_channel(channel: u8) -> Result<(), ValidationError> {
    in_range("channel", channel as u64, 1, MAX_CHANNELS as u64)
}

pub fn check_relays(relays: &[u8]) -> Result<(), ValidationError> {
    relays
        .iter()
        .try_for_each(|relay| in_range("relay", *relay as u64, 1, MAX_RELAYS as u64))
}

pub fn check_sequence(sequence: &Sequence) -> Result<(), ValidationError> {
    not_empty("sequence id", &sequence.id)?;
    not_empty("controller id", &sequence.controller_id)?;
    check_time("timestamp", sequence.timestamp_ms)?;
    check_area(sequence.area)?;
    in_range("repeat", sequence.repeat as u64, 1, u16::MAX as u64)?;

    match &sequence.action {
        SequenceAction::Firework {
            channel,
            firework_type_id,
        } => {
            check_channel(*channel)?;
            not_empty("firework type", firework_type_id)
        }
        SequenceAction::Lighting {
            effect_type_id,
            duration_ms,
            relays,
        } => {
            not_empty("lighting type", effect_type_id)?;
            if let Some(duration_ms) = duration_ms {
                check_duration("effect duration", *duration_ms)?;
            }
            check_relays(relays.as_deref().unwrap_or_default())
        }
    }
}

pub fn check_audio(track: &AudioTrack) -> Result<(), ValidationError> {
    not_empty("audio id", &track.id)?;
    not_empty("audio name", &track.name)?;
    check_duration("audio duration", track.duration_ms)?;
    check_time("audio offset", track.start_offset_ms)?;
    if let AudioSource::Url { url } = &track.source {
        not_empty("audio url", url)?;
    }
    Ok(())
}

pub fn check_firework(firework: &FireworkType) -> Result<(), ValidationError> {
    not_empty("firework type id", &firework.id)?;
    not_empty("firework type name", &firework.name)?;
    check_duration("firework duration", firework.duration_ms)?;
    check_time("safety delay", firework.safety_delay_ms)
}

pub fn check_lighting(effect: &LightingEffectType) -> Result<(), ValidationError> {
    not_empty("lighting type id", &effect.id)?;
    not_empty("lighting type name", &effect.name)?;
    check_duration("effect duration", effect.duration_ms)?;
    in_range("effect interval", effect.interval_ms as u64, 1, 60_000)?;
    check_relays(effect.relays.as_deref().unwrap_or_default())
}

/// Pre-flight summary of a show
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    /// Sequence ids are unique and every sequence passes its range checks
    pub timing_valid: bool,
    /// Every referenced firework and lighting type exists
    pub effects_valid: bool,
    /// Every referenced controller is known and connected
    pub controllers_available: bool,
    pub problems: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.timing_valid && self.effects_valid && self.controllers_available
    }
}

pub fn validate_show(
    show: &Show,
    library: &TypeLibrary,
    controllers: &[ControllerRecord],
) -> ValidationReport {
    let mut report = ValidationReport {
        timing_valid: true,
        effects_valid: true,
        controllers_available: true,
        problems: Vec::new(),
    };

    let mut seen = HashSet::new();
    for sequence in &show.sequences {
        if !seen.insert(sequence.id.as_str()) {
            report.timing_valid = false;
            report
                .problems
                .push(format!("sequence id '{}' is used twice", sequence.id));
        }

        if let Err(e) = check_sequence(sequence) {
            report.timing_valid = false;
            report.problems.push(format!("sequence '{}': {}", sequence.id, e));
        }

        let template_known = match &sequence.action {
            SequenceAction::Firework {
                firework_type_id, ..
            } => library.firework(firework_type_id).is_some(),
            SequenceAction::Lighting { effect_type_id, .. } => {
                library.lighting(effect_type_id).is_some()
            }
        };
        if !template_known {
            report.effects_valid = false;
            report.problems.push(format!(
                "sequence '{}' refers to an unknown {} type",
                sequence.id,
                sequence.kind()
            ));
        }

        match controllers.iter().find(|c| c.id == sequence.controller_id) {
            Some(c) if c.status == ControllerStatus::Connected => {}
            Some(c) => {
                report.controllers_available = false;
                report.problems.push(format!(
                    "controller '{}' is {:?}",
                    c.id, c.status
                ));
            }
            None => {
                report.controllers_available = false;
                report.problems.push(format!(
                    "sequence '{}' targets unknown controller '{}'",
                    sequence.id, sequence.controller_id
                ));
            }
        }
    }

    report.problems.dedup();
    report
}
