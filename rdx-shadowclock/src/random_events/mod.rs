//! Random events: a periodic chance roll, condition gating, rarity-weighted
//! selection, player choices and timed events.
//!
//! The engine owns the catalog, the history and the active set. It never
//! touches another subsystem's state: resource effects go through the ledger
//! and everything else is queued on the bus.

pub mod catalog;
pub mod conditions;
pub mod effects;
pub mod selection;

use crate::bus::EventBus;
use crate::config::EventConfig;
use crate::error::{Result, ShadowError};
use crate::events::{self, topics, Notification, Severity};
use crate::ledger::Ledger;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

pub use catalog::{EventChoice, EventDefinition, Rarity};
pub use conditions::{ContextRequirements, EventConditions, WorldView};
pub use effects::{EventEffects, SpecialEffect};
pub use selection::ChanceInputs;

/// One triggering of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: u64,
    pub event_id: String,
    pub timestamp: i64,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice_index: Option<usize>,
}

/// A triggered event with a duration that has not run out yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEvent {
    #[serde(flatten)]
    pub record: EventRecord,
    pub event: EventDefinition,
    pub start_time: i64,
    pub end_time: i64,
}

/// A re-trigger scheduled by a special effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTrigger {
    pub event_id: String,
    pub due: i64,
}

/// Payload of `event:triggered`, `event:choice_required`, `event:resolved`
/// and `event:ended`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNotice {
    pub event: EventDefinition,
    pub event_record: EventRecord,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EventSnapshot {
    base_chance: Option<f64>,
    history: Vec<EventRecord>,
    active_events: Vec<ActiveEvent>,
    pending_triggers: Vec<PendingTrigger>,
    last_triggered: BTreeMap<String, i64>,
    unlocked_events: Vec<String>,
    next_record_id: u64,
    last_event_time: Option<i64>,
}

pub struct RandomEventEngine {
    config: EventConfig,
    bus: EventBus,
    ledger: Arc<dyn Ledger>,
    rng: StdRng,
    catalog: Vec<EventDefinition>,
    /// Ids that start locked; a load relocks any of these the save did not
    /// list as unlocked.
    locked_by_default: BTreeSet<String>,
    base_chance: f64,
    history: VecDeque<EventRecord>,
    active: Vec<ActiveEvent>,
    pending: Vec<PendingTrigger>,
    next_record_id: u64,
    last_event_time: i64,
}

impl RandomEventEngine {
    /// Builds an engine over the built-in catalog. `now` starts the
    /// no-event ramp.
    pub fn new(config: EventConfig, bus: EventBus, ledger: Arc<dyn Ledger>, now: i64) -> Self {
        let catalog = catalog::builtin().unwrap_or_else(|err| {
            error!(error = %err, "Built-in event catalog is unreadable; starting empty.");
            Vec::new()
        });
        Self::with_catalog(config, bus, ledger, catalog, now)
    }

    pub fn with_catalog(
        config: EventConfig,
        bus: EventBus,
        ledger: Arc<dyn Ledger>,
        catalog: Vec<EventDefinition>,
        now: i64,
    ) -> Self {
        let base_chance = config.base_chance;
        let locked_by_default = catalog
            .iter()
            .filter(|event| event.locked)
            .map(|event| event.id.clone())
            .collect();
        Self {
            config,
            bus,
            ledger,
            rng: StdRng::from_entropy(),
            catalog,
            locked_by_default,
            base_chance,
            history: VecDeque::new(),
            active: Vec::new(),
            pending: Vec::new(),
            next_record_id: 1,
            last_event_time: now,
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Adds a definition, replacing any with the same id.
    pub fn register_event(&mut self, event: EventDefinition) {
        if event.locked {
            self.locked_by_default.insert(event.id.clone());
        } else {
            self.locked_by_default.remove(&event.id);
        }
        match self.catalog.iter_mut().find(|known| known.id == event.id) {
            Some(known) => *known = event,
            None => self.catalog.push(event),
        }
    }

    pub fn catalog(&self) -> &[EventDefinition] {
        &self.catalog
    }

    pub fn event(&self, event_id: &str) -> Option<&EventDefinition> {
        self.catalog.iter().find(|event| event.id == event_id)
    }

    pub fn history(&self) -> impl DoubleEndedIterator<Item = &EventRecord> {
        self.history.iter()
    }

    pub fn active_events(&self) -> &[ActiveEvent] {
        &self.active
    }

    pub fn pending_triggers(&self) -> &[PendingTrigger] {
        &self.pending
    }

    /// Unresolved records that are waiting on a choice.
    pub fn awaiting_choice(&self) -> Vec<(&EventRecord, &EventDefinition)> {
        self.history
            .iter()
            .filter(|record| !record.resolved)
            .filter_map(|record| {
                self.event(&record.event_id)
                    .filter(|event| event.has_choices())
                    .map(|event| (record, event))
            })
            .collect()
    }

    pub fn base_chance(&self) -> f64 {
        self.base_chance
    }

    pub fn event_chance(&self, world: &WorldView) -> f64 {
        let window_start = world.now - self.config.spam_window_ms;
        let recent_events = self
            .history
            .iter()
            .filter(|record| record.timestamp > window_start)
            .count();
        selection::event_chance(
            &self.config,
            &ChanceInputs {
                base_chance: self.base_chance,
                morality: world.morality,
                since_last_event_ms: world.now - self.last_event_time,
                recent_events,
            },
        )
    }

    /// Ready, unlocked, and passing both conditions and context.
    pub fn eligible_events(&self, world: &WorldView) -> Vec<&EventDefinition> {
        self.catalog
            .iter()
            .filter(|event| !event.locked && event.is_ready(world.now))
            .filter(|event| conditions_hold(event, world))
            .collect()
    }

    /// One scheduled check: roll the chance, then pick among eligible events.
    pub fn check_for_event(&mut self, world: &WorldView) -> Option<EventRecord> {
        let chance = self.event_chance(world);
        let roll: f64 = self.rng.gen();
        if roll >= chance {
            trace!(chance, roll, "No event this check.");
            return None;
        }

        let (ids, weights): (Vec<String>, Vec<f64>) = self
            .eligible_events(world)
            .into_iter()
            .map(|event| {
                (
                    event.id.clone(),
                    selection::selection_weight(event, world.morality),
                )
            })
            .unzip();
        let index = selection::select_weighted(&mut self.rng, &weights)?;
        let event_id = ids.get(index)?;
        self.trigger_event(event_id, world.now).ok()
    }

    /// Fires `event_id` unconditionally.
    pub fn trigger_event(&mut self, event_id: &str, now: i64) -> Result<EventRecord> {
        let event = {
            let event = self
                .catalog
                .iter_mut()
                .find(|event| event.id == event_id)
                .ok_or_else(|| ShadowError::UnknownEvent(event_id.to_string()))?;
            event.last_triggered = Some(now);
            event.clone()
        };

        let mut record = EventRecord {
            id: self.next_record_id,
            event_id: event.id.clone(),
            timestamp: now,
            resolved: false,
            choice_index: None,
        };
        self.next_record_id += 1;
        self.last_event_time = now;
        info!(event_id, record_id = record.id, rarity = %event.rarity, "Event triggered.");

        if !event.has_choices() {
            self.apply_effects(&event.effects, &event.id, now);
            record.resolved = true;
        }

        let notice = EventNotice {
            event: event.clone(),
            event_record: record.clone(),
        };
        self.bus
            .queue(topics::EVENT_TRIGGERED, events::payload(&notice));
        if event.has_choices() {
            self.bus
                .queue(topics::EVENT_CHOICE_REQUIRED, events::payload(&notice));
        }
        self.bus.queue(
            topics::NOTIFICATION,
            events::payload(&Notification::new(event.title.clone(), Severity::Info)),
        );

        if event.duration > 0 {
            self.active.push(ActiveEvent {
                record: record.clone(),
                start_time: now,
                end_time: now + event.duration,
                event,
            });
        }
        self.push_history(record.clone());
        Ok(record)
    }

    /// Applies choice `choice_index` of an unresolved record. Returns false
    /// and does nothing if the record is unknown, already resolved, or has no
    /// such choice.
    pub fn handle_event_choice(&mut self, record_id: u64, choice_index: usize, now: i64) -> bool {
        let Some(record) = self.history.iter().find(|record| record.id == record_id) else {
            debug!(record_id, "Choice for unknown event record.");
            return false;
        };
        if record.resolved {
            return false;
        }
        let Some(event) = self.event(&record.event_id).cloned() else {
            return false;
        };
        let Some(choice) = event.choices.get(choice_index).cloned() else {
            debug!(record_id, choice_index, "No such choice.");
            return false;
        };

        self.apply_effects(&choice.effects, &event.id, now);
        if choice.morality != 0.0 {
            effects::request_morality(&self.bus, choice.morality, &format!("event:{}", event.id));
        }

        let mut resolved = None;
        for record in self.history.iter_mut().filter(|r| r.id == record_id) {
            record.resolved = true;
            record.choice_index = Some(choice_index);
            resolved = Some(record.clone());
        }
        for active in self.active.iter_mut().filter(|a| a.record.id == record_id) {
            active.record.resolved = true;
            active.record.choice_index = Some(choice_index);
        }

        if let Some(record) = resolved {
            info!(record_id, choice_index, event_id = %event.id, "Event choice made.");
            self.bus.queue(
                topics::EVENT_RESOLVED,
                events::payload(&EventNotice {
                    event,
                    event_record: record,
                }),
            );
        }
        true
    }

    /// Per-tick sweep: ends expired timed events and fires due re-triggers.
    pub fn update(&mut self, world: &WorldView) {
        let now = world.now;

        let (ended, still_active): (Vec<ActiveEvent>, Vec<ActiveEvent>) =
            std::mem::take(&mut self.active)
                .into_iter()
                .partition(|active| active.end_time <= now);
        self.active = still_active;
        for mut active in ended {
            if let Some(end_effects) = &active.event.end_effects {
                self.apply_effects(end_effects, &active.event.id, now);
            }
            active.record.resolved = true;
            for record in self.history.iter_mut().filter(|r| r.id == active.record.id) {
                record.resolved = true;
            }
            debug!(event_id = %active.event.id, "Timed event ended.");
            self.bus.queue(
                topics::EVENT_ENDED,
                events::payload(&EventNotice {
                    event: active.event,
                    event_record: active.record,
                }),
            );
        }

        let (due, waiting): (Vec<PendingTrigger>, Vec<PendingTrigger>) =
            std::mem::take(&mut self.pending)
                .into_iter()
                .partition(|pending| pending.due <= now);
        self.pending = waiting;
        for pending in due {
            let allowed = self
                .event(&pending.event_id)
                .is_some_and(|event| conditions_hold(event, world));
            if !allowed {
                debug!(
                    event_id = %pending.event_id,
                    "Delayed trigger dropped: conditions not met."
                );
                continue;
            }
            if let Err(err) = self.trigger_event(&pending.event_id, now) {
                warn!(error = %err, "Delayed trigger failed.");
            }
        }
    }

    fn apply_effects(&mut self, effects: &EventEffects, event_id: &str, now: i64) {
        effects.apply_external(self.ledger.as_ref(), &self.bus, event_id);

        for unlocked in &effects.unlock.events {
            match self.catalog.iter_mut().find(|event| &event.id == unlocked) {
                Some(event) if event.locked => {
                    event.locked = false;
                    info!(event_id = %unlocked, "Event unlocked.");
                }
                Some(_) => {}
                None => warn!(event_id = %unlocked, "Unlock names an unknown event."),
            }
        }

        for special in &effects.special {
            match special {
                SpecialEffect::TriggerEvent {
                    event_id: target,
                    delay_ms,
                } => self.pending.push(PendingTrigger {
                    event_id: target.clone(),
                    due: now + (*delay_ms).max(0),
                }),
                SpecialEffect::AdjustBaseChance { delta } => {
                    self.base_chance = (self.base_chance + delta).clamp(0.0, 1.0);
                    debug!(base_chance = self.base_chance, "Base event chance adjusted.");
                }
                SpecialEffect::ResetCooldowns => {
                    for event in self.catalog.iter_mut().filter(|event| event.repeatable) {
                        event.last_triggered = None;
                    }
                }
            }
        }
    }

    /// Appends, then evicts the oldest resolved records (or the oldest of
    /// all, if none are resolved) past the cap.
    fn push_history(&mut self, record: EventRecord) {
        self.history.push_back(record);
        while self.history.len() > self.config.history_cap {
            match self.history.iter().position(|record| record.resolved) {
                Some(index) => {
                    self.history.remove(index);
                }
                None => {
                    self.history.pop_front();
                }
            }
        }
    }

    pub fn save_state(&self) -> Value {
        let snapshot = EventSnapshot {
            base_chance: Some(self.base_chance),
            history: self.history.iter().cloned().collect(),
            active_events: self.active.clone(),
            pending_triggers: self.pending.clone(),
            last_triggered: self
                .catalog
                .iter()
                .filter_map(|event| event.last_triggered.map(|at| (event.id.clone(), at)))
                .collect(),
            unlocked_events: self
                .catalog
                .iter()
                .filter(|event| !event.locked)
                .map(|event| event.id.clone())
                .collect(),
            next_record_id: self.next_record_id,
            last_event_time: Some(self.last_event_time),
        };
        events::payload(&snapshot)
    }

    /// Restores from `save_state` output; returns false and leaves the engine
    /// untouched if the blob cannot be read. Catalog definitions are never
    /// taken from the blob, only their mutable fields.
    pub fn load_state(&mut self, data: &Value) -> bool {
        let snapshot: EventSnapshot = match serde_json::from_value(data.clone()) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "Could not restore event state.");
                return false;
            }
        };

        self.base_chance = snapshot.base_chance.unwrap_or(self.config.base_chance);
        for event in &mut self.catalog {
            event.last_triggered = snapshot.last_triggered.get(&event.id).copied();
            event.locked = self.locked_by_default.contains(&event.id)
                && !snapshot.unlocked_events.contains(&event.id);
        }
        self.history.clear();
        for record in snapshot.history {
            self.push_history(record);
        }
        self.active = snapshot
            .active_events
            .into_iter()
            .filter_map(|mut active| {
                let current = self.event(&active.record.event_id)?.clone();
                active.event = current;
                Some(active)
            })
            .collect();
        self.pending = snapshot.pending_triggers;
        let highest = self.history.iter().map(|record| record.id).max().unwrap_or(0);
        self.next_record_id = snapshot.next_record_id.max(highest + 1);
        if let Some(at) = snapshot.last_event_time {
            self.last_event_time = at;
        }
        debug!(records = self.history.len(), "Event state restored.");
        true
    }
}

fn conditions_hold(event: &EventDefinition, world: &WorldView) -> bool {
    event.conditions.evaluate(world) && event.context_requirements.evaluate(world)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusEvent;
    use crate::common::{bag, ResourceBag};
    use crate::ledger::ResourceLedger;
    use crate::state::GameState;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T0: i64 = 1_700_000_000_000;

    fn engine_with(catalog: Vec<EventDefinition>) -> (EventBus, ResourceLedger, RandomEventEngine) {
        let state = GameState::new();
        let bus = EventBus::new();
        let ledger = ResourceLedger::new(
            state.claim("resources").unwrap(),
            &bag([("credits", 100.0), ("data", 10.0)]),
            &ResourceBag::new(),
            10_000.0,
        );
        let engine = RandomEventEngine::with_catalog(
            EventConfig::default(),
            bus.clone(),
            Arc::new(ledger.clone()),
            catalog,
            T0,
        )
        .with_rng(StdRng::seed_from_u64(11));
        (bus, ledger, engine)
    }

    fn world(now: i64) -> WorldView {
        WorldView {
            now,
            ..WorldView::default()
        }
    }

    fn definition(value: Value) -> EventDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn count(bus: &EventBus, topic: &str) -> Arc<AtomicUsize> {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        bus.on(
            topic,
            move |_: &BusEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            None,
        );
        seen
    }

    #[test]
    fn instant_event_applies_and_resolves_at_trigger() {
        let (bus, ledger, mut engine) = engine_with(vec![definition(json!({
            "id": "windfall", "title": "Windfall",
            "effects": { "resources": { "credits": 50 } }
        }))]);
        let triggered = count(&bus, topics::EVENT_TRIGGERED);

        let record = engine.trigger_event("windfall", T0).unwrap();
        bus.process_queue();

        assert!(record.resolved);
        assert_eq!(ledger.amount("credits"), 150.0);
        assert_eq!(triggered.load(Ordering::SeqCst), 1);
        assert_eq!(engine.event("windfall").unwrap().last_triggered, Some(T0));
        assert!(matches!(
            engine.trigger_event("missing", T0),
            Err(ShadowError::UnknownEvent(_))
        ));
    }

    #[test]
    fn choices_wait_for_the_player() {
        let (bus, ledger, mut engine) = engine_with(vec![definition(json!({
            "id": "dilemma", "title": "Dilemma",
            "choices": [
                { "text": "Take", "effects": { "resources": { "credits": 10 } }, "morality": -5 },
                { "text": "Leave" }
            ]
        }))]);
        let morality = count(&bus, topics::MORALITY_CHANGE_REQUESTED);

        let record = engine.trigger_event("dilemma", T0).unwrap();
        assert!(!record.resolved);
        assert_eq!(engine.awaiting_choice().len(), 1);

        assert!(!engine.handle_event_choice(record.id, 7, T0));
        assert!(!engine.handle_event_choice(999, 0, T0));
        assert!(engine.handle_event_choice(record.id, 0, T0));
        assert!(!engine.handle_event_choice(record.id, 1, T0));
        bus.process_queue();

        let stored = engine.history().next().unwrap();
        assert!(stored.resolved);
        assert_eq!(stored.choice_index, Some(0));
        assert_eq!(ledger.amount("credits"), 110.0);
        assert_eq!(morality.load(Ordering::SeqCst), 1);
        assert!(engine.awaiting_choice().is_empty());
    }

    #[test]
    fn timed_events_end_with_end_effects() {
        let (bus, ledger, mut engine) = engine_with(vec![definition(json!({
            "id": "surge", "title": "Surge", "duration": 60000,
            "endEffects": { "resources": { "data": -10 } }
        }))]);
        let ended = count(&bus, topics::EVENT_ENDED);

        engine.trigger_event("surge", T0).unwrap();
        engine.update(&world(T0 + 59_999));
        assert_eq!(engine.active_events().len(), 1);

        engine.update(&world(T0 + 60_000));
        bus.process_queue();
        assert!(engine.active_events().is_empty());
        assert_eq!(ledger.amount("data"), 0.0);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eligibility_filters_cooldown_repeatable_lock_and_context() {
        let (_, _, mut engine) = engine_with(vec![
            definition(json!({ "id": "cool", "title": "Cool", "cooldown": 1000 })),
            definition(json!({ "id": "once", "title": "Once", "repeatable": false })),
            definition(json!({ "id": "hidden", "title": "Hidden", "locked": true })),
            definition(json!({
                "id": "builder", "title": "Builder",
                "contextRequirements": { "activeConstruction": true }
            })),
        ]);
        let ids = |engine: &RandomEventEngine, now| -> Vec<String> {
            engine
                .eligible_events(&world(now))
                .into_iter()
                .map(|event| event.id.clone())
                .collect()
        };
        assert_eq!(ids(&engine, T0), vec!["cool", "once"]);

        engine.trigger_event("cool", T0).unwrap();
        engine.trigger_event("once", T0).unwrap();
        assert!(ids(&engine, T0 + 999).is_empty());
        assert_eq!(ids(&engine, T0 + 1_000), vec!["cool"]);
    }

    #[test]
    fn specials_schedule_adjust_and_reset() {
        let (_, _, mut engine) = engine_with(vec![
            definition(json!({
                "id": "chain", "title": "Chain", "cooldown": 100000,
                "effects": { "special": [
                    { "type": "trigger_event", "eventId": "echo", "delayMs": 5000 },
                    { "type": "adjust_base_chance", "delta": 0.05 }
                ]}
            })),
            definition(json!({
                "id": "echo", "title": "Echo",
                "conditions": { "minGameTimeMs": 1000 }
            })),
            definition(json!({
                "id": "reset", "title": "Reset",
                "effects": { "special": [{ "type": "reset_cooldowns" }] }
            })),
        ]);

        engine.trigger_event("chain", T0).unwrap();
        assert!((engine.base_chance() - 0.15).abs() < 1e-12);
        assert_eq!(engine.pending_triggers().len(), 1);

        // Due, but the condition check still applies.
        engine.update(&world(T0 + 5_000));
        assert!(engine.pending_triggers().is_empty());
        assert_eq!(engine.history().count(), 1);

        engine.trigger_event("chain", T0 + 6_000).unwrap();
        let ready = WorldView {
            game_time_ms: 2_000,
            ..world(T0 + 11_000)
        };
        engine.update(&ready);
        assert_eq!(engine.history().last().unwrap().event_id, "echo");

        engine.trigger_event("reset", T0 + 12_000).unwrap();
        assert_eq!(engine.event("chain").unwrap().last_triggered, None);
    }

    #[test]
    fn unlock_effect_opens_locked_events() {
        let (_, _, mut engine) = engine_with(vec![
            definition(json!({
                "id": "key", "title": "Key",
                "effects": { "unlock": { "events": ["vault"] } }
            })),
            definition(json!({ "id": "vault", "title": "Vault", "locked": true })),
        ]);
        assert_eq!(engine.eligible_events(&world(T0)).len(), 1);
        engine.trigger_event("key", T0).unwrap();
        assert!(!engine.event("vault").unwrap().locked);
    }

    #[test]
    fn check_respects_the_roll() {
        let (_, _, mut engine) = engine_with(vec![definition(json!({ "id": "a", "title": "A" }))]);
        engine.base_chance = 0.0;
        assert!(engine.check_for_event(&world(T0)).is_none());

        engine.base_chance = 1.0;
        engine.config.max_chance = 1.0;
        let record = engine.check_for_event(&world(T0)).unwrap();
        assert_eq!(record.event_id, "a");
    }

    #[test]
    fn history_is_capped_evicting_resolved_first() {
        let (_, _, mut engine) = engine_with(vec![
            definition(json!({ "id": "plain", "title": "Plain" })),
            definition(json!({
                "id": "ask", "title": "Ask",
                "choices": [{ "text": "ok" }]
            })),
        ]);
        engine.config.history_cap = 3;
        let pending = engine.trigger_event("ask", T0).unwrap();
        for i in 0..5 {
            engine.trigger_event("plain", T0 + i).unwrap();
        }
        assert_eq!(engine.history().count(), 3);
        assert!(engine.history().any(|record| record.id == pending.id));
    }

    #[test]
    fn state_round_trips_and_tolerates_garbage() {
        let (_, _, mut engine) = engine_with(vec![
            definition(json!({ "id": "long", "title": "Long", "duration": 10000 })),
            definition(json!({ "id": "late", "title": "Late", "locked": true })),
        ]);
        engine.trigger_event("long", T0).unwrap();
        engine.register_event(definition(json!({ "id": "late", "title": "Late" })));
        let saved = engine.save_state();

        let (_, _, mut restored) = engine_with(vec![
            definition(json!({ "id": "long", "title": "Long", "duration": 10000 })),
            definition(json!({ "id": "late", "title": "Late", "locked": true })),
        ]);
        assert!(restored.load_state(&saved));
        assert_eq!(restored.active_events().len(), 1);
        assert_eq!(restored.event("long").unwrap().last_triggered, Some(T0));
        assert!(!restored.event("late").unwrap().locked);
        assert_eq!(restored.trigger_event("long", T0 + 1).unwrap().id, 2);

        assert!(!restored.load_state(&json!("garbage")));
        assert!(restored.load_state(&json!({})));
    }

    #[test]
    fn loading_relocks_events_unlocked_after_the_save() {
        let catalog = || {
            vec![
                definition(json!({
                    "id": "key", "title": "Key",
                    "effects": { "unlock": { "events": ["vault"] } }
                })),
                definition(json!({ "id": "vault", "title": "Vault", "locked": true })),
            ]
        };
        let (_, _, mut engine) = engine_with(catalog());
        let saved = engine.save_state();
        engine.trigger_event("key", T0).unwrap();
        assert!(!engine.event("vault").unwrap().locked);

        assert!(engine.load_state(&saved));
        assert!(engine.event("vault").unwrap().locked);
        assert!(!engine.event("key").unwrap().locked);
    }

    #[test]
    fn builtin_engine_has_a_catalog() {
        let state = GameState::new();
        let ledger = ResourceLedger::new(
            state.claim("resources").unwrap(),
            &ResourceBag::new(),
            &ResourceBag::new(),
            100.0,
        );
        let engine =
            RandomEventEngine::new(EventConfig::default(), EventBus::new(), Arc::new(ledger), T0);
        assert!(!engine.catalog().is_empty());
    }
}
