//! Gating: hard conditions on world state and softer context requirements.

use crate::common::{ResourceBag, Scale, Season};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Read-only snapshot of the world, assembled once per event check.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldView {
    pub now: i64,
    pub resources: ResourceBag,
    pub morality: f64,
    pub reputation: BTreeMap<String, f64>,
    pub scale: Scale,
    pub controlled_systems: u32,
    pub unlocked_expansions: BTreeSet<String>,
    pub completed_projects: BTreeSet<String>,
    pub game_time_ms: i64,
    pub season: Season,
    pub active_construction: bool,
    /// Some resource is below its low-water fraction.
    pub low_resources: bool,
    /// Effective production is above the high-production threshold.
    pub high_production: bool,
    pub recent_moral_choice: bool,
}

impl Default for WorldView {
    fn default() -> Self {
        Self {
            now: 0,
            resources: ResourceBag::new(),
            morality: 0.0,
            reputation: BTreeMap::new(),
            scale: Scale::Local,
            controlled_systems: 1,
            unlocked_expansions: BTreeSet::new(),
            completed_projects: BTreeSet::new(),
            game_time_ms: 0,
            season: Season::Spring,
            active_construction: false,
            low_resources: false,
            high_production: false,
            recent_moral_choice: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventConditions {
    pub min_resources: ResourceBag,
    pub morality_min: Option<f64>,
    pub morality_max: Option<f64>,
    pub required_expansions: Vec<String>,
    pub required_projects: Vec<String>,
    pub min_reputation: BTreeMap<String, f64>,
    pub min_game_time_ms: i64,
    pub min_scale: Option<Scale>,
}

impl EventConditions {
    pub fn evaluate(&self, world: &WorldView) -> bool {
        let resources = self.min_resources.iter().all(|(name, needed)| {
            world.resources.get(name).copied().unwrap_or(0.0) >= *needed
        });
        let morality = self.morality_min.map_or(true, |min| world.morality >= min)
            && self.morality_max.map_or(true, |max| world.morality <= max);
        let expansions = self
            .required_expansions
            .iter()
            .all(|expansion| world.unlocked_expansions.contains(expansion));
        let projects = self
            .required_projects
            .iter()
            .all(|project| world.completed_projects.contains(project));
        let reputation = self.min_reputation.iter().all(|(faction, min)| {
            world.reputation.get(faction).copied().unwrap_or(0.0) >= *min
        });
        let scale = self.min_scale.map_or(true, |min| world.scale >= min);

        resources
            && morality
            && expansions
            && projects
            && reputation
            && scale
            && world.game_time_ms >= self.min_game_time_ms
    }
}

/// Situational requirements. `None` means "don't care".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextRequirements {
    pub active_construction: Option<bool>,
    pub low_resources: Option<bool>,
    pub high_production: Option<bool>,
    pub recent_moral_choice: Option<bool>,
    /// Any of these seasons; empty means any season.
    pub seasons: Vec<Season>,
    /// Fails if both expansions of any pair are unlocked.
    pub conflicting_expansions: Vec<(String, String)>,
}

impl ContextRequirements {
    pub fn evaluate(&self, world: &WorldView) -> bool {
        let flag = |wanted: Option<bool>, actual: bool| wanted.map_or(true, |w| w == actual);
        let conflict = self.conflicting_expansions.iter().any(|(a, b)| {
            world.unlocked_expansions.contains(a) && world.unlocked_expansions.contains(b)
        });

        flag(self.active_construction, world.active_construction)
            && flag(self.low_resources, world.low_resources)
            && flag(self.high_production, world.high_production)
            && flag(self.recent_moral_choice, world.recent_moral_choice)
            && (self.seasons.is_empty() || self.seasons.contains(&world.season))
            && !conflict
    }
}
