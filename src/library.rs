use common::{EffectKind, FireworkType, LightingEffectType};
use serde::{Deserialize, Serialize};

use crate::validation::{check_firework, check_lighting, ValidationError};

/// The firework and lighting templates sequences are built from
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TypeLibrary {
    #[serde(default)]
    pub fireworks: Vec<FireworkType>,
    #[serde(default)]
    pub lighting: Vec<LightingEffectType>,
}

impl Default for TypeLibrary {
    fn default() -> Self {
        Self::stock()
    }
}

impl TypeLibrary {
    pub fn empty() -> Self {
        Self {
            fireworks: Vec::new(),
            lighting: Vec::new(),
        }
    }

    /// A starter library so a fresh install can build a show straight away
    pub fn stock() -> Self {
        let firework = |id: &str, name: &str, duration_ms, safety_delay_ms| FireworkType {
            id: id.to_string(),
            name: name.to_string(),
            duration_ms,
            safety_delay_ms,
            description: String::new(),
        };
        let lighting = |id: &str, name: &str, effect, duration_ms, interval_ms| {
            LightingEffectType {
                id: id.to_string(),
                name: name.to_string(),
                effect,
                duration_ms,
                interval_ms,
                relays: None,
            }
        };

        Self {
            fireworks: vec![
                firework("fountain", "Fountain", 8000, 1000),
                firework("comet", "Comet", 1500, 1000),
                firework("mine", "Mine", 500, 500),
                firework("cake-25", "25 shot cake", 20000, 2000),
            ],
            lighting: vec![
                lighting("solid", "Solid", EffectKind::Solid, 5000, 1000),
                lighting("strobe", "Strobe", EffectKind::Strobe, 3000, 100),
                lighting("chase", "Chase", EffectKind::Chase, 4000, 250),
                lighting("wave", "Wave", EffectKind::Wave, 6000, 300),
                lighting("random", "Random", EffectKind::Random, 5000, 200),
            ],
        }
    }

    pub fn firework(&self, id: &str) -> Option<&FireworkType> {
        self.fireworks.iter().find(|t| t.id == id)
    }

    pub fn lighting(&self, id: &str) -> Option<&LightingEffectType> {
        self.lighting.iter().find(|t| t.id == id)
    }

    pub fn add_firework(&mut self, firework: FireworkType) -> Result<(), ValidationError> {
        check_firework(&firework)?;
        if self.firework(&firework.id).is_some() {
            return Err(ValidationError::Duplicate {
                what: "firework type",
                id: firework.id,
            });
        }
        self.fireworks.push(firework);
        Ok(())
    }

    pub fn update_firework(&mut self, firework: FireworkType) -> Result<(), ValidationError> {
        check_firework(&firework)?;
        let slot = self
            .fireworks
            .iter_mut()
            .find(|t| t.id == firework.id)
            .ok_or_else(|| ValidationError::NotFound {
                what: "firework type",
                id: firework.id.clone(),
            })?;
        *slot = firework;
        Ok(())
    }

    pub fn remove_firework(&mut self, id: &str) -> Option<FireworkType> {
        let index = self.fireworks.iter().position(|t| t.id == id)?;
        Some(self.fireworks.remove(index))
    }

    pub fn add_lighting(&mut self, effect: LightingEffectType) -> Result<(), ValidationError> {
        check_lighting(&effect)?;
        if self.lighting(&effect.id).is_some() {
            return Err(ValidationError::Duplicate {
                what: "lighting type",
                id: effect.id,
            });
        }
        self.lighting.push(effect);
        Ok(())
    }

    pub fn update_lighting(&mut self, effect: LightingEffectType) -> Result<(), ValidationError> {
        check_lighting(&effect)?;
        let slot = self
            .lighting
            .iter_mut()
            .find(|t| t.id == effect.id)
            .ok_or_else(|| ValidationError::NotFound {
                what: "lighting type",
                id: effect.id.clone(),
            })?;
        *slot = effect;
        Ok(())
    }

    pub fn remove_lighting(&mut self, id: &str) -> Option<LightingEffectType> {
        let index = self.lighting.iter().position(|t| t.id == id)?;
        Some(self.lighting.remove(index))
    }

    /// Add the entries of `other` this library does not have yet. Returns how
    /// many were added. Nothing is added unless every incoming entry passes
    /// its checks.
    pub fn merge(&mut self, other: TypeLibrary) -> Result<usize, ValidationError> {
        other.fireworks.iter().try_for_each(check_firework)?;
        other.lighting.iter().try_for_each(check_lighting)?;

        let mut added = 0;
        for firework in other.fireworks {
            if self.firework(&firework.id).is_none() {
                self.fireworks.push(firework);
                added += 1;
            }
        }
        for effect in other.lighting {
            if self.lighting(&effect.id).is_none() {
                self.lighting.push(effect);
                added += 1;
            }
        }
        Ok(added)
    }
}
