//! Resource generation. Runs first in every tick so later systems see this
//! tick's income.

use crate::common::{ResourceBag, MS_PER_SECOND};
use crate::config::ResourceConfig;
use crate::ledger::Ledger;
use crate::modifiers::{Modifier, ModifierSet};
use crate::state::{BatchOptions, NamespaceWriter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub const PROCESSING: &str = "processing";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EconomySnapshot {
    production: BTreeMap<String, ModifierSet>,
    processing_bonus: ModifierSet,
}

/// Owns the `production` namespace.
pub struct ResourceSystem {
    config: ResourceConfig,
    ledger: Arc<dyn Ledger>,
    writer: NamespaceWriter,
    /// Per-resource multipliers, keyed by the source that asked for them.
    production: BTreeMap<String, ModifierSet>,
    processing_bonus: ModifierSet,
}

impl ResourceSystem {
    pub fn new(config: ResourceConfig, ledger: Arc<dyn Ledger>, writer: NamespaceWriter) -> Self {
        Self {
            config,
            ledger,
            writer,
            production: BTreeMap::new(),
            processing_bonus: ModifierSet::new(),
        }
    }

    /// Sets the multiplier `source` applies to `resource`. A multiplier of
    /// exactly 1.0 withdraws it.
    pub fn apply_production_modifier(&mut self, resource: &str, multiplier: f64, source: &str) {
        if !multiplier.is_finite() || multiplier < 0.0 {
            warn!(resource, multiplier, source, "Ignored invalid production modifier.");
            return;
        }
        let set = self.production.entry(resource.to_string()).or_default();
        if multiplier == 1.0 {
            set.remove(source);
        } else {
            set.insert(source, Modifier::permanent(multiplier, source));
        }
        debug!(resource, multiplier, source, "Production modifier set.");
    }

    /// Timed processing bonus, e.g. after a purge.
    pub fn grant_processing_bonus(&mut self, multiplier: f64, expiry: Option<i64>, source: &str) {
        self.processing_bonus
            .insert(source, Modifier::new(multiplier, expiry, source));
        debug!(multiplier, ?expiry, source, "Processing bonus granted.");
    }

    pub fn production_multiplier(&mut self, resource: &str, now: i64) -> f64 {
        let base = self
            .production
            .get_mut(resource)
            .map_or(1.0, |set| set.combined(now));
        if resource == PROCESSING {
            base * self.processing_bonus.combined(now)
        } else {
            base
        }
    }

    /// Effective generation per second for every producing resource.
    pub fn rates(&mut self, now: i64) -> ResourceBag {
        let bases: Vec<(String, f64)> = self
            .config
            .base_production
            .iter()
            .map(|(name, rate)| (name.clone(), *rate))
            .collect();
        bases
            .into_iter()
            .map(|(name, base)| {
                let rate = base * self.production_multiplier(&name, now);
                (name, rate)
            })
            .collect()
    }

    pub fn total_rate(&mut self, now: i64) -> f64 {
        self.rates(now).values().sum()
    }

    pub fn update(&mut self, delta_ms: i64, now: i64) {
        let seconds = delta_ms.max(0) as f64 / MS_PER_SECOND as f64;
        let rates = self.rates(now);
        for (resource, rate) in &rates {
            if *rate > 0.0 && seconds > 0.0 {
                self.ledger.add(resource, rate * seconds);
            }
        }
        trace!(seconds, "Resources generated.");
        let total: f64 = rates.values().sum();
        self.writer.batch_update(
            [("rates", json!(rates)), ("total", json!(total))],
            BatchOptions::default(),
        );
    }

    pub fn save_state(&self) -> Value {
        crate::events::payload(&EconomySnapshot {
            production: self.production.clone(),
            processing_bonus: self.processing_bonus.clone(),
        })
    }

    pub fn load_state(&mut self, data: &Value) -> bool {
        match serde_json::from_value::<EconomySnapshot>(data.clone()) {
            Ok(snapshot) => {
                self.production = snapshot.production;
                self.processing_bonus = snapshot.processing_bonus;
                true
            }
            Err(err) => {
                warn!(error = %err, "Could not restore production state.");
                false
            }
        }
    }
}
