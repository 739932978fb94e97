use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Template for a pyrotechnic effect.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FireworkType {
    pub id: String,
    pub name: String,
    /// How long the effect burns
    pub duration_ms: u64,
    /// Minimum gap before the same channel is fired again
    #[serde(default)]
    pub safety_delay_ms: u64,
    #[serde(default)]
    pub description: String,
}

/// Template for a lighting effect run by a relay board.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LightingEffectType {
    pub id: String,
    pub name: String,
    pub effect: EffectKind,
    pub duration_ms: u64,
    /// Step interval handed to the firmware
    #[serde(default = "default_interval")]
    pub interval_ms: u32,
    /// Default relay pattern. `None` drives every relay.
    #[serde(default)]
    pub relays: Option<Vec<u8>>,
}

fn default_interval() -> u32 {
    250
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum EffectKind {
    Solid,
    Strobe,
    Chase,
    Wave,
    Random,
}

impl EffectKind {
    pub const ALL: [EffectKind; 5] = [
        EffectKind::Solid,
        EffectKind::Strobe,
        EffectKind::Chase,
        EffectKind::Wave,
        EffectKind::Random,
    ];

    /// Name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectKind::Solid => "SOLID",
            EffectKind::Strobe => "STROBE",
            EffectKind::Chase => "CHASE",
            EffectKind::Wave => "WAVE",
            EffectKind::Random => "RANDOM",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EffectKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown effect '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_kind_parse() {
        assert_eq!("strobe".parse::<EffectKind>().unwrap(), EffectKind::Strobe);
        assert_eq!("WAVE".parse::<EffectKind>().unwrap(), EffectKind::Wave);
        assert!("disco".parse::<EffectKind>().is_err());
    }

    #[test]
    fn test_effect_kind_wire_name() {
        let json = serde_json::to_string(&EffectKind::Chase).unwrap();
        assert_eq!(json, "\"CHASE\"");
    }
}
