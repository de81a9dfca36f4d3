//! Event effects and their dispatch.
//!
//! Resource changes hit the ledger directly. Everything owned by another
//! subsystem (production, expansions, construction, morality, reputation)
//! is queued on the bus as a request. Unlocked events and special effects
//! concern the event engine itself and are handed back to it.

use crate::bus::EventBus;
use crate::common::ResourceBag;
use crate::events::{
    self, topics, ConstructionCancel, ConstructionModify, ExpansionUnlock, MoralityChange,
    ProductionModifier, ReputationChange,
};
use crate::ledger::Ledger;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnlockEffect {
    pub expansions: Vec<String>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConstructionEffect {
    /// Speed multiplier for active projects.
    pub speed_multiplier: Option<f64>,
    pub duration_ms: Option<i64>,
    /// Cancel `project`, or the most recent project when `project` is unset.
    pub cancel: bool,
    pub project: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpecialEffect {
    /// Fire another event after a delay.
    TriggerEvent {
        #[serde(rename = "eventId")]
        event_id: String,
        #[serde(rename = "delayMs", default)]
        delay_ms: i64,
    },
    /// Permanently shift the base event chance.
    AdjustBaseChance { delta: f64 },
    /// Clear the cooldown of every repeatable event.
    ResetCooldowns,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventEffects {
    /// Added to the ledger; the ledger floors at zero.
    pub resources: ResourceBag,
    /// Production multiplier per resource.
    pub production: BTreeMap<String, f64>,
    pub unlock: UnlockEffect,
    pub construction: Option<ConstructionEffect>,
    pub morality: f64,
    pub reputation: BTreeMap<String, f64>,
    pub special: Vec<SpecialEffect>,
}

impl EventEffects {
    pub fn is_empty(&self) -> bool {
        *self == EventEffects::default()
    }

    /// Applies everything that lives outside the event engine. `source` tags
    /// the requests so the receiving subsystem can log where they came from.
    pub fn apply_external(&self, ledger: &dyn Ledger, bus: &EventBus, source: &str) {
        for (resource, delta) in &self.resources {
            let applied = ledger.add(resource, *delta);
            debug!(source, resource, delta, applied, "Event resource effect.");
        }

        for (resource, multiplier) in &self.production {
            bus.queue(
                topics::PRODUCTION_MODIFIER_REQUESTED,
                events::payload(&ProductionModifier {
                    resource: resource.clone(),
                    multiplier: *multiplier,
                    source: source.to_string(),
                }),
            );
        }

        for expansion in &self.unlock.expansions {
            bus.queue(
                topics::EXPANSION_UNLOCK_REQUESTED,
                events::payload(&ExpansionUnlock {
                    expansion: expansion.clone(),
                    source: source.to_string(),
                }),
            );
        }

        if let Some(construction) = &self.construction {
            if construction.cancel {
                bus.queue(
                    topics::CONSTRUCTION_CANCEL_REQUESTED,
                    events::payload(&ConstructionCancel {
                        project: construction.project.clone(),
                        source: source.to_string(),
                    }),
                );
            }
            if let Some(multiplier) = construction.speed_multiplier {
                bus.queue(
                    topics::CONSTRUCTION_MODIFY_REQUESTED,
                    events::payload(&ConstructionModify {
                        multiplier,
                        duration_ms: construction.duration_ms,
                        source: source.to_string(),
                    }),
                );
            }
        }

        if self.morality != 0.0 {
            request_morality(bus, self.morality, source);
        }

        for (faction, amount) in &self.reputation {
            bus.queue(
                topics::REPUTATION_CHANGE_REQUESTED,
                events::payload(&ReputationChange {
                    faction: faction.clone(),
                    amount: *amount,
                    reason: source.to_string(),
                }),
            );
        }
    }
}

pub(crate) fn request_morality(bus: &EventBus, amount: f64, reason: &str) {
    bus.queue(
        topics::MORALITY_CHANGE_REQUESTED,
        events::payload(&MoralityChange {
            amount,
            reason: reason.to_string(),
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusEvent;
    use crate::common::bag;
    use crate::ledger::ResourceLedger;
    use crate::state::GameState;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn external_effects_hit_the_ledger_and_queue_requests() {
        let state = GameState::new();
        let bus = EventBus::new();
        let ledger = ResourceLedger::new(
            state.claim("resources").unwrap(),
            &bag([("credits", 30.0)]),
            &ResourceBag::new(),
            1_000.0,
        );
        let topics_seen = Arc::new(Mutex::new(Vec::new()));
        for topic in [
            topics::PRODUCTION_MODIFIER_REQUESTED,
            topics::MORALITY_CHANGE_REQUESTED,
            topics::CONSTRUCTION_CANCEL_REQUESTED,
        ] {
            let seen = topics_seen.clone();
            bus.on(
                topic,
                move |event: &BusEvent| {
                    seen.lock().unwrap().push(event.topic.clone());
                    Ok(())
                },
                None,
            );
        }

        let effects: EventEffects = serde_json::from_value(json!({
            "resources": { "credits": -50.0, "data": 5.0 },
            "production": { "energy": 1.5 },
            "construction": { "cancel": true },
            "morality": -5.0
        }))
        .unwrap();
        effects.apply_external(&ledger, &bus, "test_event");

        assert_eq!(ledger.amount("credits"), 0.0);
        assert_eq!(ledger.amount("data"), 5.0);
        assert_eq!(bus.pending(), 3);
        bus.process_queue();
        assert_eq!(
            *topics_seen.lock().unwrap(),
            vec![
                topics::PRODUCTION_MODIFIER_REQUESTED,
                topics::CONSTRUCTION_CANCEL_REQUESTED,
                topics::MORALITY_CHANGE_REQUESTED,
            ]
        );
    }

    #[test]
    fn specials_parse_from_tagged_json() {
        let specials: Vec<SpecialEffect> = serde_json::from_value(json!([
            { "type": "trigger_event", "eventId": "aftershock", "delayMs": 60000 },
            { "type": "adjust_base_chance", "delta": 0.02 },
            { "type": "reset_cooldowns" }
        ]))
        .unwrap();
        assert_eq!(
            specials[0],
            SpecialEffect::TriggerEvent {
                event_id: "aftershock".to_string(),
                delay_ms: 60_000
            }
        );
        assert_eq!(specials.len(), 3);
        assert!(EventEffects::default().is_empty());
    }
}
