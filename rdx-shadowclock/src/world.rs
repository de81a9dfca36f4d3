//! World facts shared by the engines: morality, reputation, scale, owned
//! expansions, construction and game time. Also the statistics counters.

use crate::bus::EventBus;
use crate::common::{ResourceBag, Scale, Season};
use crate::config::{EventConfig, ResourceConfig, WorldConfig};
use crate::events::{self, topics, ExpansionUnlock};
use crate::heat::HeatContext;
use crate::ledger::Ledger;
use crate::modifiers::{Modifier, ModifierSet};
use crate::random_events::WorldView;
use crate::state::NamespaceWriter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

pub const MORALITY_LIMIT: f64 = 100.0;
pub const REPUTATION_LIMIT: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructionProject {
    pub id: String,
    pub duration_ms: i64,
    #[serde(default)]
    pub progress_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldData {
    pub morality: f64,
    pub reputation: BTreeMap<String, f64>,
    pub scale: Scale,
    pub controlled_systems: u32,
    pub unlocked_expansions: BTreeSet<String>,
    pub completed_projects: BTreeSet<String>,
    pub construction: Vec<ConstructionProject>,
    pub construction_modifiers: ModifierSet,
    pub last_moral_choice: Option<i64>,
    pub game_time_ms: i64,
}

impl Default for WorldData {
    fn default() -> Self {
        Self {
            morality: 0.0,
            reputation: BTreeMap::new(),
            scale: Scale::Local,
            controlled_systems: 1,
            unlocked_expansions: BTreeSet::new(),
            completed_projects: BTreeSet::new(),
            construction: Vec::new(),
            construction_modifiers: ModifierSet::new(),
            last_moral_choice: None,
            game_time_ms: 0,
        }
    }
}

/// Owns the `world` namespace.
pub struct WorldSystem {
    config: WorldConfig,
    recent_moral_choice_ms: i64,
    low_fraction: f64,
    high_production_threshold: f64,
    bus: EventBus,
    writer: NamespaceWriter,
    data: WorldData,
}

impl WorldSystem {
    pub fn new(
        config: WorldConfig,
        events: &EventConfig,
        resources: &ResourceConfig,
        bus: EventBus,
        writer: NamespaceWriter,
    ) -> Self {
        let data = WorldData {
            scale: config.starting_scale,
            controlled_systems: config.starting_controlled_systems,
            ..WorldData::default()
        };
        let world = Self {
            config,
            recent_moral_choice_ms: events.recent_moral_choice_ms,
            low_fraction: resources.low_fraction,
            high_production_threshold: resources.high_production_threshold,
            bus,
            writer,
            data,
        };
        world.mirror();
        world
    }

    pub fn data(&self) -> &WorldData {
        &self.data
    }

    pub fn heat_context(&self) -> HeatContext {
        HeatContext {
            controlled_systems: self.data.controlled_systems,
            scale: self.data.scale,
        }
    }

    pub fn change_morality(&mut self, amount: f64, reason: &str, now: i64) {
        if !amount.is_finite() {
            warn!(amount, reason, "Ignored non-finite morality change.");
            return;
        }
        self.data.morality = (self.data.morality + amount).clamp(-MORALITY_LIMIT, MORALITY_LIMIT);
        if amount != 0.0 {
            self.data.last_moral_choice = Some(now);
        }
        debug!(amount, reason, morality = self.data.morality, "Morality changed.");
        self.mirror();
    }

    pub fn change_reputation(&mut self, faction: &str, amount: f64, reason: &str) {
        if faction.is_empty() || !amount.is_finite() {
            warn!(faction, amount, reason, "Ignored invalid reputation change.");
            return;
        }
        let entry = self.data.reputation.entry(faction.to_string()).or_insert(0.0);
        *entry = (*entry + amount).clamp(-REPUTATION_LIMIT, REPUTATION_LIMIT);
        debug!(faction, amount, reason, "Reputation changed.");
        self.mirror();
    }

    /// Returns false if it was already unlocked.
    pub fn unlock_expansion(&mut self, expansion: &str, source: &str) -> bool {
        if !self.data.unlocked_expansions.insert(expansion.to_string()) {
            return false;
        }
        info!(expansion, source, "Expansion unlocked.");
        self.bus.queue(
            topics::EXPANSION_UNLOCKED,
            events::payload(&ExpansionUnlock {
                expansion: expansion.to_string(),
                source: source.to_string(),
            }),
        );
        self.mirror();
        true
    }

    pub fn set_scale(&mut self, scale: Scale) {
        if self.data.scale != scale {
            info!(from = %self.data.scale, to = %scale, "Scale changed.");
            self.data.scale = scale;
            self.mirror();
        }
    }

    pub fn set_controlled_systems(&mut self, count: u32) {
        self.data.controlled_systems = count;
        self.mirror();
    }

    pub fn start_project(&mut self, id: &str, duration_ms: i64) {
        self.data.construction.push(ConstructionProject {
            id: id.to_string(),
            duration_ms: duration_ms.max(0),
            progress_ms: 0.0,
        });
        debug!(project = id, duration_ms, "Construction started.");
        self.mirror();
    }

    /// Cancels `project`, or the most recently started project when `None`.
    pub fn cancel_project(&mut self, project: Option<&str>, source: &str) -> Option<String> {
        let index = match project {
            Some(id) => self.data.construction.iter().position(|p| p.id == id)?,
            None => self.data.construction.len().checked_sub(1)?,
        };
        let removed = self.data.construction.remove(index);
        info!(project = %removed.id, source, "Construction cancelled.");
        self.mirror();
        Some(removed.id)
    }

    pub fn modify_construction(
        &mut self,
        multiplier: f64,
        duration_ms: Option<i64>,
        source: &str,
        now: i64,
    ) {
        if !multiplier.is_finite() || multiplier < 0.0 {
            warn!(multiplier, source, "Ignored invalid construction modifier.");
            return;
        }
        let modifier = Modifier::new(multiplier, duration_ms.map(|d| now + d), source);
        self.data.construction_modifiers.insert(source, modifier);
        self.mirror();
    }

    pub fn construction_speed(&mut self, now: i64) -> f64 {
        self.data.construction_modifiers.combined(now)
    }

    /// Advances game time and construction by one tick.
    pub fn update(&mut self, delta_ms: i64, now: i64) {
        let delta_ms = delta_ms.max(0);
        self.data.game_time_ms += delta_ms;

        let speed = self.construction_speed(now);
        for project in &mut self.data.construction {
            project.progress_ms += delta_ms as f64 * speed;
        }
        let (done, building): (Vec<_>, Vec<_>) = std::mem::take(&mut self.data.construction)
            .into_iter()
            .partition(|project| project.progress_ms >= project.duration_ms as f64);
        self.data.construction = building;
        for project in done {
            info!(project = %project.id, "Construction complete.");
            self.data.completed_projects.insert(project.id);
        }
        self.mirror();
    }

    /// Snapshot for event gating.
    pub fn view(&self, now: i64, ledger: &dyn Ledger, production_rate: f64) -> WorldView {
        let resources: ResourceBag = ledger.snapshot();
        let low_resources = resources
            .iter()
            .any(|(name, amount)| *amount < ledger.cap(name) * self.low_fraction);
        WorldView {
            now,
            low_resources,
            resources,
            morality: self.data.morality,
            reputation: self.data.reputation.clone(),
            scale: self.data.scale,
            controlled_systems: self.data.controlled_systems,
            unlocked_expansions: self.data.unlocked_expansions.clone(),
            completed_projects: self.data.completed_projects.clone(),
            game_time_ms: self.data.game_time_ms,
            season: Season::at(now, &self.config.timezone),
            active_construction: !self.data.construction.is_empty(),
            high_production: production_rate >= self.high_production_threshold,
            recent_moral_choice: self
                .data
                .last_moral_choice
                .is_some_and(|at| now - at <= self.recent_moral_choice_ms),
        }
    }

    fn mirror(&self) {
        self.writer.set("", events::payload(&self.data));
    }

    pub fn save_state(&self) -> Value {
        events::payload(&self.data)
    }

    pub fn load_state(&mut self, data: &Value) -> bool {
        match serde_json::from_value::<WorldData>(data.clone()) {
            Ok(mut restored) => {
                restored.morality = restored.morality.clamp(-MORALITY_LIMIT, MORALITY_LIMIT);
                for value in restored.reputation.values_mut() {
                    *value = value.clamp(-REPUTATION_LIMIT, REPUTATION_LIMIT);
                }
                self.data = restored;
                self.mirror();
                true
            }
            Err(err) => {
                warn!(error = %err, "Could not restore world state.");
                false
            }
        }
    }
}

/// Session counters, published to the `stats` namespace once per tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatCounters {
    pub ticks: u64,
    pub heat_generated: f64,
    pub purges: u64,
    pub events_triggered: u64,
    pub choices_made: u64,
    pub upgrades_purchased: u64,
}

pub struct Statistics {
    writer: NamespaceWriter,
    counters: StatCounters,
}

impl Statistics {
    pub fn new(writer: NamespaceWriter) -> Self {
        Self {
            writer,
            counters: StatCounters::default(),
        }
    }

    pub fn counters(&self) -> &StatCounters {
        &self.counters
    }

    /// Counts a bus event if it is one we track.
    pub fn record(&mut self, topic: &str, data: &Value) {
        match topic {
            topics::HEAT_INCREASED => {
                let amount = data.get("amount").and_then(Value::as_f64).unwrap_or(0.0);
                self.counters.heat_generated += amount;
            }
            topics::HEAT_PURGE => self.counters.purges += 1,
            topics::EVENT_TRIGGERED => self.counters.events_triggered += 1,
            topics::EVENT_RESOLVED => {
                if data.pointer("/eventRecord/choiceIndex").is_some() {
                    self.counters.choices_made += 1;
                }
            }
            topics::UPGRADE_PURCHASED => self.counters.upgrades_purchased += 1,
            _ => {}
        }
    }

    /// Adds heat accrued passively; explicit increases arrive through `record`.
    pub fn record_passive_heat(&mut self, amount: f64) {
        if amount.is_finite() && amount > 0.0 {
            self.counters.heat_generated += amount;
        }
    }

    pub fn update(&mut self) {
        self.counters.ticks += 1;
        self.writer.set("", json!(self.counters));
    }

    pub fn save_state(&self) -> Value {
        events::payload(&self.counters)
    }

    pub fn load_state(&mut self, data: &Value) -> bool {
        match serde_json::from_value(data.clone()) {
            Ok(counters) => {
                self.counters = counters;
                true
            }
            Err(err) => {
                warn!(error = %err, "Could not restore statistics.");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::bag;
    use crate::ledger::ResourceLedger;
    use crate::state::GameState;

    fn world() -> (GameState, EventBus, WorldSystem) {
        let state = GameState::new();
        let bus = EventBus::new();
        let world = WorldSystem::new(
            WorldConfig::default(),
            &EventConfig::default(),
            &ResourceConfig::default(),
            bus.clone(),
            state.claim("world").unwrap(),
        );
        (state, bus, world)
    }

    #[test]
    fn morality_and_reputation_are_clamped() {
        let (state, _, mut world) = world();
        world.change_morality(150.0, "test", 10);
        assert_eq!(world.data().morality, 100.0);
        assert_eq!(world.data().last_moral_choice, Some(10));
        world.change_reputation("corporate", -250.0, "test");
        assert_eq!(world.data().reputation["corporate"], -100.0);
        assert_eq!(state.get_f64("world.morality"), Some(100.0));
    }

    #[test]
    fn expansions_unlock_once() {
        let (_, bus, mut world) = world();
        assert!(world.unlock_expansion("darknet_market", "test"));
        assert!(!world.unlock_expansion("darknet_market", "test"));
        assert_eq!(bus.pending(), 1);
    }

    #[test]
    fn construction_progresses_with_speed_modifiers() {
        let (_, _, mut world) = world();
        world.start_project("relay", 10_000);
        world.start_project("bunker", 100_000);
        world.modify_construction(2.0, Some(5_000), "overclock", 0);
        world.update(5_000, 0);
        assert!(world.data().completed_projects.contains("relay"));
        assert_eq!(world.data().construction.len(), 1);

        assert_eq!(world.construction_speed(5_001), 1.0);
        assert_eq!(world.cancel_project(None, "storm").as_deref(), Some("bunker"));
        assert_eq!(world.cancel_project(None, "storm"), None);
        assert_eq!(world.data().game_time_ms, 5_000);
    }

    #[test]
    fn view_derives_context_flags() {
        let (_, _, mut world) = world();
        let state = GameState::new();
        let ledger = ResourceLedger::new(
            state.claim("resources").unwrap(),
            &bag([("energy", 5.0)]),
            &bag([("energy", 100.0)]),
            100.0,
        );
        world.change_morality(-5.0, "test", 1_000);
        world.start_project("relay", 60_000);

        let view = world.view(2_000, &ledger, 12.0);
        assert!(view.low_resources);
        assert!(view.high_production);
        assert!(view.recent_moral_choice);
        assert!(view.active_construction);

        let later = world.view(1_000 + 10 * 60_000 + 1, &ledger, 1.0);
        assert!(!later.recent_moral_choice);
        assert!(!later.high_production);
    }

    #[test]
    fn statistics_count_tracked_topics() {
        let state = GameState::new();
        let mut stats = Statistics::new(state.claim("stats").unwrap());
        stats.record(topics::HEAT_INCREASED, &json!({ "amount": 2.5 }));
        stats.record(topics::HEAT_PURGE, &json!({}));
        stats.record(topics::EVENT_RESOLVED, &json!({ "eventRecord": { "choiceIndex": 1 } }));
        stats.record("ui:refresh", &Value::Null);
        stats.record_passive_heat(0.5);
        stats.record_passive_heat(f64::NAN);
        stats.update();
        assert_eq!(stats.counters().purges, 1);
        assert_eq!(stats.counters().choices_made, 1);
        assert_eq!(state.get_f64("stats.heatGenerated"), Some(3.0));
        assert_eq!(state.get_f64("stats.ticks"), Some(1.0));
    }
}
