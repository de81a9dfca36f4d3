//! Event definitions and the built-in catalog.

use super::conditions::{ContextRequirements, EventConditions};
use super::effects::EventEffects;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const BUILTIN_EVENT_CATALOG: &str = include_str!("data/catalog.json");

/// How often an event shows up relative to its peers.
///
/// Unknown names are kept as-is so a catalog written for a newer build still
/// loads; they weigh the same as a single common-ish ticket.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Rarity {
    #[default]
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
    Other(String),
}

impl Rarity {
    pub fn weight(&self) -> f64 {
        match self {
            Rarity::Common => 10.0,
            Rarity::Uncommon => 5.0,
            Rarity::Rare => 2.0,
            Rarity::Epic => 1.0,
            Rarity::Legendary => 0.5,
            Rarity::Other(_) => 1.0,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
            Rarity::Other(name) => name,
        }
    }
}

impl From<String> for Rarity {
    fn from(name: String) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "common" => Rarity::Common,
            "uncommon" => Rarity::Uncommon,
            "rare" => Rarity::Rare,
            "epic" => Rarity::Epic,
            "legendary" => Rarity::Legendary,
            _ => Rarity::Other(name),
        }
    }
}

impl From<Rarity> for String {
    fn from(rarity: Rarity) -> Self {
        rarity.as_str().to_string()
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventChoice {
    pub text: String,
    pub effects: EventEffects,
    /// Morality shift for picking this option.
    pub morality: f64,
}

fn repeatable_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDefinition {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub rarity: Rarity,
    /// How long the event stays active, in ms. Zero is instantaneous.
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub conditions: EventConditions,
    #[serde(default)]
    pub effects: EventEffects,
    /// Applied when a timed event runs out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_effects: Option<EventEffects>,
    /// Non-empty means the player has to pick one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<EventChoice>,
    #[serde(default = "repeatable_by_default")]
    pub repeatable: bool,
    #[serde(default)]
    pub cooldown: i64,
    #[serde(default)]
    pub last_triggered: Option<i64>,
    #[serde(default)]
    pub context_requirements: ContextRequirements,
    /// Scales selection weight with morality; positive favours good players.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub morality_influence: Option<f64>,
    /// Locked events are skipped until an `unlock.events` effect names them.
    #[serde(default)]
    pub locked: bool,
}

impl EventDefinition {
    pub fn new(id: &str, title: &str, rarity: Rarity) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            category: String::new(),
            rarity,
            duration: 0,
            conditions: EventConditions::default(),
            effects: EventEffects::default(),
            end_effects: None,
            choices: Vec::new(),
            repeatable: true,
            cooldown: 0,
            last_triggered: None,
            context_requirements: ContextRequirements::default(),
            morality_influence: None,
            locked: false,
        }
    }

    pub fn has_choices(&self) -> bool {
        !self.choices.is_empty()
    }

    /// Repeatability and cooldown only; conditions are checked separately.
    pub fn is_ready(&self, now: i64) -> bool {
        match self.last_triggered {
            None => true,
            Some(_) if !self.repeatable => false,
            Some(at) => now - at >= self.cooldown,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    events: Vec<EventDefinition>,
}

pub fn from_json_str(json: &str) -> Result<Vec<EventDefinition>, serde_json::Error> {
    let file: CatalogFile = serde_json::from_str(json)?;
    Ok(file.events)
}

pub fn builtin() -> Result<Vec<EventDefinition>, serde_json::Error> {
    from_json_str(BUILTIN_EVENT_CATALOG)
}
