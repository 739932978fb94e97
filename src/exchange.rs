//! Moving shows between desks. A show file carries the show together with
//! the templates and controllers it uses, and optionally its audio.

use std::collections::{BTreeSet, HashSet};

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use common::{
    AudioData, AudioSource, ControllerRecord, FireworkType, LightingEffectType, SequenceAction,
    Show,
};
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    library::TypeLibrary,
    show::new_id,
    validation::{check_audio, check_sequence, not_empty, ValidationError},
};

pub const FORMAT_TAG: &str = "lume-show";
pub const FORMAT_VERSION: &str = "1.2.0";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("not a show file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown file format '{0}'")]
    WrongFormat(String),

    #[error("show file version {found} is not compatible with this desk")]
    IncompatibleVersion { found: String },

    #[error("embedded audio is not valid base64: {0}")]
    BadAudio(#[from] base64::DecodeError),

    #[error("show file contains invalid data: {0}")]
    Invalid(#[from] ValidationError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ShowFile {
    pub format: String,
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub show: Show,
    #[serde(default)]
    pub firework_types: Vec<FireworkType>,
    #[serde(default)]
    pub lighting_types: Vec<LightingEffectType>,
    #[serde(default)]
    pub controllers: Vec<ControllerRecord>,
    /// Base64 audio file contents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

/// What an import produced
#[derive(Debug)]
pub struct Imported {
    pub show: Show,
    /// Templates that were new to the library
    pub added_types: usize,
    pub controllers: Vec<ControllerRecord>,
    /// Audio file bytes, already attached to `show`
    pub audio: Option<AudioData>,
}

/// Package a show with the templates and controllers its sequences use
pub fn export_show(
    show: &Show,
    library: &TypeLibrary,
    controllers: &[ControllerRecord],
    include_audio: bool,
) -> ShowFile {
    let mut fireworks = BTreeSet::new();
    let mut lighting = BTreeSet::new();
    let mut controller_ids = BTreeSet::new();

    for sequence in &show.sequences {
        controller_ids.insert(sequence.controller_id.as_str());
        match &sequence.action {
            SequenceAction::Firework {
                firework_type_id, ..
            } => {
                fireworks.insert(firework_type_id.as_str());
            }
            SequenceAction::Lighting { effect_type_id, .. } => {
                lighting.insert(effect_type_id.as_str());
            }
        }
    }

    let audio = if include_audio {
        show.audio.as_ref().and_then(|track| match &track.source {
            AudioSource::File {
                data: Some(data), ..
            } => Some(STANDARD.encode(data.as_bytes())),
            _ => None,
        })
    } else {
        None
    };

    ShowFile {
        format: FORMAT_TAG.to_string(),
        version: FORMAT_VERSION.to_string(),
        exported_at: Utc::now(),
        show: show.clone(),
        firework_types: library
            .fireworks
            .iter()
            .filter(|f| fireworks.contains(f.id.as_str()))
            .cloned()
            .collect(),
        lighting_types: library
            .lighting
            .iter()
            .filter(|l| lighting.contains(l.id.as_str()))
            .cloned()
            .collect(),
        controllers: controllers
            .iter()
            .filter(|c| controller_ids.contains(c.id.as_str()))
            .cloned()
            .collect(),
        audio,
    }
}

pub fn to_json(file: &ShowFile) -> serde_json::Result<String> {
    serde_json::to_string_pretty(file)
}

/// Read a show file. The show and its audio track get fresh ids, its
/// templates are merged into `library` (existing entries win) and any
/// embedded audio is re-attached. Everything is checked the way an edit
/// would be before the library is touched.
pub fn import_show(json: &str, library: &mut TypeLibrary) -> Result<Imported, ImportError> {
    let file: ShowFile = serde_json::from_str(json)?;

    if file.format != FORMAT_TAG {
        return Err(ImportError::WrongFormat(file.format));
    }
    if major(&file.version) != major(FORMAT_VERSION) {
        return Err(ImportError::IncompatibleVersion {
            found: file.version,
        });
    }

    let audio = match &file.audio {
        Some(encoded) => Some(AudioData::from(STANDARD.decode(encoded)?)),
        None => None,
    };

    let mut show = file.show;
    check_imported(&show)?;

    show.id = new_id();
    show.modified_at = Utc::now();
    if let Some(track) = show.audio.as_mut() {
        track.id = new_id();
        if let (AudioSource::File { data, .. }, Some(bytes)) = (&mut track.source, &audio) {
            *data = Some(bytes.clone());
        }
    }

    let added_types = library.merge(TypeLibrary {
        fireworks: file.firework_types,
        lighting: file.lighting_types,
    })?;

    info!(
        "Imported '{}' ({} sequences, {} new templates)",
        show.name,
        show.sequences.len(),
        added_types
    );

    Ok(Imported {
        show,
        added_types,
        controllers: file.controllers,
        audio,
    })
}

fn check_imported(show: &Show) -> Result<(), ValidationError> {
    not_empty("show name", &show.name)?;

    let mut seen = HashSet::new();
    for sequence in &show.sequences {
        check_sequence(sequence)?;
        if !seen.insert(sequence.id.as_str()) {
            return Err(ValidationError::Duplicate {
                what: "sequence",
                id: sequence.id.clone(),
            });
        }
    }

    show.audio.as_ref().map_or(Ok(()), check_audio)
}

fn major(version: &str) -> Option<u32> {
    version.split('.').next()?.trim().parse().ok()
}

/// Timing sheet of a show, one row per sequence in timestamp order
pub fn export_csv(show: &Show, library: &TypeLibrary) -> String {
    let mut csv = String::from("timestamp_ms,kind,controller,area,target,template,duration_ms\n");

    for sequence in show.sorted_sequences() {
        let (target, template, duration) = match &sequence.action {
            SequenceAction::Firework {
                channel,
                firework_type_id,
            } => {
                let firework = library.firework(firework_type_id);
                (
                    format!("channel {channel}"),
                    firework.map_or(firework_type_id.as_str(), |f| f.name.as_str()),
                    firework.map(|f| f.duration_ms),
                )
            }
            SequenceAction::Lighting {
                effect_type_id,
                duration_ms,
                relays,
            } => {
                let effect = library.lighting(effect_type_id);
                let relays = relays
                    .as_deref()
                    .or_else(|| effect.and_then(|e| e.relays.as_deref()));
                let target = match relays {
                    Some(relays) if !relays.is_empty() => format!(
                        "relays {}",
                        relays
                            .iter()
                            .map(|r| r.to_string())
                            .collect::<Vec<_>>()
                            .join(" ")
                    ),
                    _ => "all relays".to_string(),
                };
                (
                    target,
                    effect.map_or(effect_type_id.as_str(), |e| e.name.as_str()),
                    duration_ms.or(effect.map(|e| e.duration_ms)),
                )
            }
        };

        let row = [
            sequence.timestamp_ms.to_string(),
            sequence.kind().to_string(),
            sequence.controller_id.clone(),
            sequence.area.to_string(),
            target,
            template.to_string(),
            duration.map(|d| d.to_string()).unwrap_or_default(),
        ];
        let row: Vec<String> = row.iter().map(|field| csv_field(field)).collect();
        csv.push_str(&row.join(","));
        csv.push('\n');
    }

    csv
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use common::ControllerKind;

    use super::*;
    use crate::show::ShowEditor;

    fn show() -> Show {
        let mut editor = ShowEditor::new("Finale").unwrap();
        editor.add_firework(2000, "lume-base", 1, 3, "comet").unwrap();
        editor
            .add_lighting(500, "lume-controller-01", 2, "strobe", Some(4000), Some(vec![1, 2]))
            .unwrap();
        editor.into_show()
    }

    fn controllers() -> Vec<ControllerRecord> {
        vec![
            ControllerRecord::new("lume-base", "Base", ControllerKind::Firework, "lume-base.local"),
            ControllerRecord::new("spare", "Spare", ControllerKind::Lights, "spare.local"),
        ]
    }

    #[test]
    fn test_export_only_referenced() {
        let file = export_show(&show(), &TypeLibrary::stock(), &controllers(), true);

        assert_eq!(file.format, "lume-show");
        assert_eq!(file.firework_types.len(), 1);
        assert_eq!(file.firework_types[0].id, "comet");
        assert_eq!(file.lighting_types.len(), 1);
        assert_eq!(file.controllers.len(), 1);
        assert_eq!(file.audio, None);
    }

    #[test]
    fn test_round_trip() {
        let original = show();
        let json = to_json(&export_show(
            &original,
            &TypeLibrary::stock(),
            &controllers(),
            false,
        ))
        .unwrap();

        let mut library = TypeLibrary::empty();
        let imported = import_show(&json, &mut library).unwrap();

        assert_ne!(imported.show.id, original.id);
        assert_eq!(imported.show.sequences.len(), original.sequences.len());
        for (a, b) in imported.show.sequences.iter().zip(&original.sequences) {
            assert_eq!(a.timestamp_ms, b.timestamp_ms);
            assert_eq!(a.action, b.action);
        }
        assert_eq!(imported.added_types, 2);
        assert!(library.firework("comet").is_some());
        assert!(library.lighting("strobe").is_some());
    }

    #[test]
    fn test_audio_travels_with_the_show() {
        let mut editor = ShowEditor::from_show(show());
        editor
            .attach_audio_file("song.mp3", vec![7, 7, 7], 10_000)
            .unwrap();
        let json = to_json(&export_show(
            editor.show(),
            &TypeLibrary::stock(),
            &[],
            true,
        ))
        .unwrap();

        let imported = import_show(&json, &mut TypeLibrary::stock()).unwrap();
        assert_eq!(imported.audio.unwrap().as_bytes(), &[7, 7, 7]);
        assert!(!imported.show.audio.unwrap().needs_restore());
    }

    #[test]
    fn test_rejects_other_formats() {
        let mut file = export_show(&show(), &TypeLibrary::stock(), &[], false);
        file.format = "something-else".to_string();
        let err = import_show(&to_json(&file).unwrap(), &mut TypeLibrary::stock()).unwrap_err();
        assert!(matches!(err, ImportError::WrongFormat(_)));

        let mut file = export_show(&show(), &TypeLibrary::stock(), &[], false);
        file.version = "2.0.0".to_string();
        let err = import_show(&to_json(&file).unwrap(), &mut TypeLibrary::stock()).unwrap_err();
        assert!(matches!(err, ImportError::IncompatibleVersion { .. }));

        let mut file = export_show(&show(), &TypeLibrary::stock(), &[], false);
        file.version = "1.0.3".to_string();
        assert!(import_show(&to_json(&file).unwrap(), &mut TypeLibrary::stock()).is_ok());

        assert!(matches!(
            import_show("{", &mut TypeLibrary::stock()),
            Err(ImportError::Json(_))
        ));
    }

    #[test]
    fn test_csv() {
        let csv = export_csv(&show(), &TypeLibrary::stock());
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(
            lines[0],
            "timestamp_ms,kind,controller,area,target,template,duration_ms"
        );
        assert!(lines[1].starts_with("500,lighting,lume-controller-01,2,relays 1 2,"));
        assert!(lines[1].ends_with(",4000"));
        assert!(lines[2].starts_with("2000,firework,lume-base,1,channel 3,"));
        assert!(lines[2].ends_with(",1500"));
    }

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_imported_audio_gets_a_fresh_id() {
        let mut editor = ShowEditor::from_show(show());
        editor
            .attach_audio_file("song.mp3", vec![1, 2, 3], 10_000)
            .unwrap();
        let mut file = export_show(editor.show(), &TypeLibrary::stock(), &[], true);
        file.show.audio.as_mut().unwrap().id = "../../escaped".to_string();

        let imported = import_show(&to_json(&file).unwrap(), &mut TypeLibrary::stock()).unwrap();
        let id = &imported.show.audio.unwrap().id;
        assert_ne!(id, "../../escaped");
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
    }

    #[test]
    fn test_rejects_out_of_range_content() {
        let import = |file: &ShowFile, library: &mut TypeLibrary| {
            import_show(&to_json(file).unwrap(), library)
        };

        let mut file = export_show(&show(), &TypeLibrary::stock(), &[], false);
        file.show.sequences[0].area = 0;
        assert!(matches!(
            import(&file, &mut TypeLibrary::stock()),
            Err(ImportError::Invalid(ValidationError::OutOfRange { what: "area", .. }))
        ));

        let mut file = export_show(&show(), &TypeLibrary::stock(), &[], false);
        file.show.sequences[0].repeat = 0;
        assert!(matches!(
            import(&file, &mut TypeLibrary::stock()),
            Err(ImportError::Invalid(ValidationError::OutOfRange { what: "repeat", .. }))
        ));

        let mut file = export_show(&show(), &TypeLibrary::stock(), &[], false);
        let copy = file.show.sequences[0].clone();
        file.show.sequences.push(copy);
        assert!(matches!(
            import(&file, &mut TypeLibrary::stock()),
            Err(ImportError::Invalid(ValidationError::Duplicate { .. }))
        ));

        // A template too long to schedule never reaches the library
        let mut file = export_show(&show(), &TypeLibrary::stock(), &[], false);
        file.firework_types[0].duration_ms = u64::MAX / 2;
        let mut library = TypeLibrary::empty();
        assert!(matches!(
            import(&file, &mut library),
            Err(ImportError::Invalid(ValidationError::OutOfRange {
                what: "firework duration",
                ..
            }))
        ));
        assert_eq!(library, TypeLibrary::empty());
    }
}
