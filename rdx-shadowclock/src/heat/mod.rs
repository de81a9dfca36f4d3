//! The heat engine: a detection-risk meter in `[0, 100]` that rises with the
//! size of the operation, is worked down by reduction methods, and resets
//! through a purge when it reaches 100.
//!
//! Every bus event raised here is queued, never emitted inline, so listeners
//! are free to call back into the engine once the scheduler flushes the queue.

pub mod backup;
pub mod purge;
pub mod reduction;

use crate::bus::EventBus;
use crate::common::{HeatLevel, Scale, MS_PER_HOUR, MS_PER_MINUTE};
use crate::config::HeatConfig;
use crate::error::{Result, ShadowError};
use crate::events::{
    self, topics, HeatAlert, HeatChanged, Notification, ProcessingBonus, ReductionChanged,
    Severity,
};
use crate::ledger::Ledger;
use crate::modifiers::{Modifier, ModifierSet};
use crate::state::{BatchOptions, NamespaceWriter};
use crate::upgrades::UpgradeQuery;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

pub use backup::BackupSystems;
pub use purge::{PurgeBonuses, PurgeRecord};
pub use reduction::{ReductionMethod, Requirement};

pub const MAX_HEAT: f64 = 100.0;

/// One logged heat increase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatSource {
    pub amount: f64,
    pub source: String,
    #[serde(default)]
    pub reason: String,
    pub timestamp: i64,
}

/// World facts the heat engine reads each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatContext {
    pub controlled_systems: u32,
    pub scale: Scale,
}

impl Default for HeatContext {
    fn default() -> Self {
        Self {
            controlled_systems: 1,
            scale: Scale::Local,
        }
    }
}

/// Persisted shape. Backups are written for inspection but re-derived on load.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct HeatSnapshot {
    current_heat: f64,
    heat_sources: Vec<HeatSource>,
    reduction_methods: BTreeMap<String, ReductionMethod>,
    generation_modifiers: ModifierSet,
    reduction_modifiers: ModifierSet,
    bonus_modifiers: ModifierSet,
    backup_systems: BackupSystems,
    purge_history: Vec<PurgeRecord>,
    alerts_sent: Vec<u32>,
    total_purges: u32,
}

pub struct HeatEngine {
    config: HeatConfig,
    bus: EventBus,
    writer: NamespaceWriter,
    upgrades: Arc<dyn UpgradeQuery>,
    ledger: Arc<dyn Ledger>,
    rng: StdRng,
    current_heat: f64,
    heat_sources: VecDeque<HeatSource>,
    reduction_methods: BTreeMap<String, ReductionMethod>,
    generation_modifiers: ModifierSet,
    reduction_modifiers: ModifierSet,
    /// Purge bonuses that are not heat multipliers: immunity, temporal
    /// prediction and the processing bonus.
    bonus_modifiers: ModifierSet,
    backups: BackupSystems,
    purge_history: VecDeque<PurgeRecord>,
    alerts_sent: BTreeSet<u32>,
    scale: Scale,
    total_purges: u32,
}

impl HeatEngine {
    pub fn new(
        config: HeatConfig,
        bus: EventBus,
        writer: NamespaceWriter,
        upgrades: Arc<dyn UpgradeQuery>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        let mut engine = Self {
            config,
            bus,
            writer,
            upgrades,
            ledger,
            rng: StdRng::from_entropy(),
            current_heat: 0.0,
            heat_sources: VecDeque::new(),
            reduction_methods: reduction::default_methods(),
            generation_modifiers: ModifierSet::new(),
            reduction_modifiers: ModifierSet::new(),
            bonus_modifiers: ModifierSet::new(),
            backups: BackupSystems::default(),
            purge_history: VecDeque::new(),
            alerts_sent: BTreeSet::new(),
            scale: Scale::Local,
            total_purges: 0,
        };
        engine.refresh_backups();
        engine.mirror(0);
        engine
    }

    /// Replaces the random source, for reproducible purges.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn current_heat(&self) -> f64 {
        self.current_heat
    }

    pub fn heat_level(&self) -> HeatLevel {
        HeatLevel::from_heat(self.current_heat)
    }

    pub fn heat_sources(&self) -> impl Iterator<Item = &HeatSource> {
        self.heat_sources.iter()
    }

    pub fn reduction_methods(&self) -> &BTreeMap<String, ReductionMethod> {
        &self.reduction_methods
    }

    pub fn backups(&self) -> BackupSystems {
        self.backups
    }

    pub fn purge_history(&self) -> impl DoubleEndedIterator<Item = &PurgeRecord> {
        self.purge_history.iter()
    }

    pub fn total_purges(&self) -> u32 {
        self.total_purges
    }

    pub fn generation_modifiers_mut(&mut self) -> &mut ModifierSet {
        &mut self.generation_modifiers
    }

    pub fn reduction_modifiers_mut(&mut self) -> &mut ModifierSet {
        &mut self.reduction_modifiers
    }

    pub fn generation_multiplier(&mut self, now: i64) -> f64 {
        self.generation_modifiers.combined(now)
    }

    pub fn reduction_multiplier(&mut self, now: i64) -> f64 {
        self.reduction_modifiers.combined(now)
    }

    pub fn is_purge_immune(&mut self, now: i64) -> bool {
        self.bonus_modifiers.active(purge::IMMUNITY_ID, now).is_some()
    }

    pub fn has_temporal_prediction(&mut self, now: i64) -> bool {
        self.bonus_modifiers
            .active(purge::TEMPORAL_PREDICTION_ID, now)
            .is_some()
    }

    /// Extra processing output granted by the last purge, e.g. `0.25`.
    pub fn processing_bonus(&mut self, now: i64) -> f64 {
        self.bonus_modifiers
            .active(purge::PROCESSING_BONUS_ID, now)
            .map_or(0.0, |modifier| modifier.multiplier - 1.0)
    }

    pub fn processing_bonus_modifier(&mut self, now: i64) -> Option<Modifier> {
        self.bonus_modifiers
            .active(purge::PROCESSING_BONUS_ID, now)
            .cloned()
    }

    /// One tick: passive heat, active reduction, clamp, alerts, purge check.
    /// Returns the passive heat generated this tick.
    pub fn update(&mut self, delta_ms: i64, now: i64, context: &HeatContext) -> f64 {
        if context.scale != self.scale {
            self.scale = context.scale;
            self.refresh_backups();
        }
        let delta_ms = delta_ms.max(0) as f64;

        let passive = self.config.passive_base
            * f64::from(context.controlled_systems).powf(self.config.passive_scaling)
            * context.scale.heat_modifier()
            * (delta_ms / MS_PER_MINUTE as f64)
            * self.generation_multiplier(now);
        self.current_heat += passive;

        let reduction = self.run_reduction_methods(delta_ms / MS_PER_HOUR as f64, now);
        self.current_heat -= reduction;

        self.current_heat = clamp_heat(self.current_heat);
        trace!(passive, reduction, heat = self.current_heat, "Heat tick.");

        self.check_alerts();
        self.check_purge(now);
        self.prune_sources(now);
        self.mirror(now);
        passive
    }

    /// Pays due costs and returns the heat removed this tick.
    fn run_reduction_methods(&mut self, delta_hours: f64, now: i64) -> f64 {
        let multiplier = self.reduction_multiplier(now);
        let mut total = 0.0;
        let mut deactivated = Vec::new();

        for (id, method) in self.reduction_methods.iter_mut() {
            if !method.active {
                continue;
            }
            if method.cost_due(now) {
                if self.ledger.spend(&method.cost, &format!("heat_reduction:{id}")) {
                    method.last_cost_time = now;
                } else {
                    method.active = false;
                    deactivated.push((id.clone(), method.name.clone()));
                    continue;
                }
            }
            total += method.reduction_rate * delta_hours * multiplier;
        }

        for (method_id, name) in deactivated {
            warn!(%method_id, "Reduction method deactivated: upkeep unaffordable.");
            self.bus.queue(
                topics::REDUCTION_DEACTIVATED,
                events::payload(&ReductionChanged {
                    method_id,
                    name: name.clone(),
                    active: false,
                    reason: Some("insufficient_resources".to_string()),
                }),
            );
            self.bus.queue(
                topics::NOTIFICATION,
                events::payload(&Notification::new(
                    format!("{name} shut down: not enough resources to keep it running."),
                    Severity::Warning,
                )),
            );
        }
        total
    }

    /// Adds heat through the generation multiplier. Returns the amount applied.
    pub fn increase_heat(&mut self, amount: f64, source: &str, reason: &str, now: i64) -> f64 {
        if !amount.is_finite() || amount <= 0.0 {
            warn!(amount, source, "Ignored invalid heat increase.");
            return 0.0;
        }
        let scaled = amount * self.generation_multiplier(now);
        let before = self.current_heat;
        self.current_heat = clamp_heat(before + scaled);
        let applied = self.current_heat - before;

        self.heat_sources.push_back(HeatSource {
            amount: applied,
            source: source.to_string(),
            reason: reason.to_string(),
            timestamp: now,
        });
        self.prune_sources(now);
        debug!(applied, source, reason, total = self.current_heat, "Heat increased.");
        self.bus.queue(
            topics::HEAT_INCREASED,
            events::payload(&HeatChanged {
                amount: applied,
                total: self.current_heat,
                source: source.to_string(),
                reason: reason.to_string(),
            }),
        );

        self.check_alerts();
        self.check_purge(now);
        self.mirror(now);
        applied
    }

    /// Removes heat directly, without modifiers. Returns the amount removed.
    pub fn decrease_heat(&mut self, amount: f64, source: &str, reason: &str, now: i64) -> f64 {
        if !amount.is_finite() || amount <= 0.0 {
            warn!(amount, source, "Ignored invalid heat decrease.");
            return 0.0;
        }
        let before = self.current_heat;
        self.current_heat = clamp_heat(before - amount);
        let removed = before - self.current_heat;
        debug!(removed, source, reason, total = self.current_heat, "Heat decreased.");
        self.bus.queue(
            topics::HEAT_DECREASED,
            events::payload(&HeatChanged {
                amount: removed,
                total: self.current_heat,
                source: source.to_string(),
                reason: reason.to_string(),
            }),
        );
        self.check_alerts();
        self.mirror(now);
        removed
    }

    /// Flips a reduction method. Activation pays the first upkeep at once.
    ///
    /// Returns the new active state.
    pub fn toggle_reduction_method(&mut self, method_id: &str, now: i64) -> Result<bool> {
        let method = self
            .reduction_methods
            .get_mut(method_id)
            .ok_or_else(|| ShadowError::UnknownReductionMethod(method_id.to_string()))?;

        if method.active {
            method.active = false;
        } else {
            if !method.requirements_met(self.upgrades.as_ref(), self.scale) {
                return Err(ShadowError::RequirementNotMet(method_id.to_string()));
            }
            if !self
                .ledger
                .spend(&method.cost, &format!("heat_reduction:{method_id}"))
            {
                return Err(ShadowError::InsufficientResources(method_id.to_string()));
            }
            method.active = true;
            method.last_cost_time = now;
        }

        let active = method.active;
        info!(method_id, active, "Reduction method toggled.");
        self.bus.queue(
            topics::REDUCTION_TOGGLED,
            events::payload(&ReductionChanged {
                method_id: method_id.to_string(),
                name: method.name.clone(),
                active,
                reason: None,
            }),
        );
        self.mirror(now);
        Ok(active)
    }

    /// Re-derives backups and adds any method the upgrade unlocks.
    pub fn on_upgrade_purchased(&mut self, upgrade_id: &str, now: i64) {
        self.refresh_backups();
        if let Some((method_id, method)) = reduction::unlocked_by(upgrade_id) {
            if self.reduction_methods.contains_key(&method_id) {
                return;
            }
            info!(%method_id, "Reduction method unlocked.");
            self.bus.queue(
                topics::REDUCTION_UNLOCKED,
                events::payload(&ReductionChanged {
                    method_id: method_id.clone(),
                    name: method.name.clone(),
                    active: false,
                    reason: Some(upgrade_id.to_string()),
                }),
            );
            self.reduction_methods.insert(method_id, method);
        }
        self.mirror(now);
    }

    pub fn refresh_backups(&mut self) {
        self.backups = BackupSystems::derive(self.upgrades.as_ref(), self.scale);
    }

    /// Emits one alert per threshold crossed upward; clears thresholds heat
    /// has fallen back below.
    fn check_alerts(&mut self) {
        let heat = self.current_heat;
        for &threshold in &self.config.alert_thresholds {
            if heat < f64::from(threshold) {
                self.alerts_sent.remove(&threshold);
                continue;
            }
            if !self.alerts_sent.insert(threshold) {
                continue;
            }
            let level = HeatLevel::from_heat(heat);
            info!(threshold, heat, %level, "Heat alert.");
            self.bus.queue(
                topics::HEAT_ALERT,
                events::payload(&HeatAlert {
                    threshold,
                    heat,
                    level: level.as_str().to_string(),
                }),
            );
            let severity = match threshold {
                t if t >= 80 => Severity::Danger,
                t if t >= 60 => Severity::Warning,
                _ => Severity::Info,
            };
            self.bus.queue(
                topics::NOTIFICATION,
                events::payload(&Notification::new(
                    format!("Heat has reached {threshold}%."),
                    severity,
                )),
            );
        }
    }

    fn check_purge(&mut self, now: i64) {
        if self.current_heat < MAX_HEAT {
            return;
        }
        if self.is_purge_immune(now) {
            debug!("Purge suppressed by immunity.");
            self.current_heat = self.config.immunity_heat_ceiling.min(MAX_HEAT);
            return;
        }
        self.execute_purge(now);
    }

    /// The purge transition. Strips resources, resets heat, grants bonuses.
    pub fn execute_purge(&mut self, now: i64) -> PurgeRecord {
        self.refresh_backups();
        let quality = self.backups.quality;

        let (low, high) = ordered(self.config.purge_loss_min, self.config.purge_loss_max);
        let roll = self.rng.gen_range(low..=high);
        let loss = purge::loss_rate(roll, quality);
        let recovery = purge::recovery_rate(quality);
        self.ledger
            .transform_all(&mut |_, amount| purge::apply_loss(amount, loss, recovery));

        self.current_heat = purge::reset_heat(self.config.purge_heat_reduction, quality);

        let bonuses = purge::bonuses_for(quality);
        for (id, modifier) in bonuses.status_modifiers(now) {
            self.bonus_modifiers.insert(id, modifier);
        }
        if let Some(modifier) = bonuses.generation_modifier(now) {
            self.generation_modifiers
                .insert(purge::HEAT_RESISTANCE_ID, modifier);
        }
        if let Some(modifier) = bonuses.processing_modifier(now) {
            self.bus.queue(
                topics::PROCESSING_BONUS_GRANTED,
                events::payload(&ProcessingBonus {
                    multiplier: modifier.multiplier,
                    expiry: modifier.expiry,
                    source: "purge".to_string(),
                }),
            );
            self.bonus_modifiers
                .insert(purge::PROCESSING_BONUS_ID, modifier);
        }

        let record = PurgeRecord {
            timestamp: now,
            heat_level: MAX_HEAT,
            backup_quality: quality,
            resource_loss_rate: loss,
            recovery_rate: recovery,
            bonuses,
        };
        self.purge_history.push_back(record.clone());
        while self.purge_history.len() > self.config.purge_history_cap {
            self.purge_history.pop_front();
        }
        self.heat_sources.clear();
        self.alerts_sent.clear();
        self.total_purges += 1;

        info!(
            quality,
            loss,
            recovery,
            heat = self.current_heat,
            "Purge executed."
        );
        self.bus
            .queue(topics::HEAT_PURGE, events::payload(&record));
        self.bus.queue(
            topics::NOTIFICATION,
            events::payload(&Notification::new(
                format!(
                    "Purge! Lost {:.0}% of resources, recovered {:.0}% from backups.",
                    loss * 100.0,
                    recovery * 100.0
                ),
                Severity::Danger,
            )),
        );
        self.mirror(now);
        record
    }

    fn prune_sources(&mut self, now: i64) {
        let horizon = now - self.config.source_retention_ms;
        self.heat_sources.retain(|source| source.timestamp > horizon);
        while self.heat_sources.len() > self.config.source_log_cap {
            self.heat_sources.pop_front();
        }
    }

    /// Publishes the readable summary into the `heat` namespace.
    fn mirror(&mut self, now: i64) {
        let immune = self.is_purge_immune(now);
        let active: Vec<&String> = self
            .reduction_methods
            .iter()
            .filter(|(_, method)| method.active)
            .map(|(id, _)| id)
            .collect();
        self.writer.batch_update(
            [
                ("current", json!(self.current_heat)),
                ("level", json!(self.heat_level().as_str())),
                ("backupQuality", json!(self.backups.quality)),
                ("immune", json!(immune)),
                ("activeMethods", json!(active)),
                ("totalPurges", json!(self.total_purges)),
            ],
            BatchOptions::default(),
        );
    }

    pub fn serialize(&self) -> Value {
        let snapshot = HeatSnapshot {
            current_heat: self.current_heat,
            heat_sources: self.heat_sources.iter().cloned().collect(),
            reduction_methods: self.reduction_methods.clone(),
            generation_modifiers: self.generation_modifiers.clone(),
            reduction_modifiers: self.reduction_modifiers.clone(),
            bonus_modifiers: self.bonus_modifiers.clone(),
            backup_systems: self.backups,
            purge_history: self.purge_history.iter().cloned().collect(),
            alerts_sent: self.alerts_sent.iter().copied().collect(),
            total_purges: self.total_purges,
        };
        events::payload(&snapshot)
    }

    /// Restores from `serialize` output. Missing fields take defaults and
    /// backups are re-derived from upgrades. Returns false, leaving the
    /// engine untouched, if the blob cannot be read.
    pub fn deserialize(&mut self, data: &Value) -> bool {
        let snapshot: HeatSnapshot = match serde_json::from_value(data.clone()) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "Could not restore heat state.");
                return false;
            }
        };

        self.current_heat = clamp_heat(snapshot.current_heat);
        self.heat_sources = snapshot.heat_sources.into();
        let mut methods = reduction::default_methods();
        methods.extend(snapshot.reduction_methods);
        self.reduction_methods = methods;
        self.generation_modifiers = snapshot.generation_modifiers;
        self.reduction_modifiers = snapshot.reduction_modifiers;
        self.bonus_modifiers = snapshot.bonus_modifiers;
        self.purge_history = snapshot.purge_history.into();
        while self.purge_history.len() > self.config.purge_history_cap {
            self.purge_history.pop_front();
        }
        self.alerts_sent = snapshot.alerts_sent.into_iter().collect();
        self.total_purges = snapshot.total_purges;
        self.refresh_backups();
        debug!(heat = self.current_heat, "Heat state restored.");
        true
    }
}

fn clamp_heat(heat: f64) -> f64 {
    if heat.is_nan() {
        return 0.0;
    }
    heat.clamp(0.0, MAX_HEAT)
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusEvent;
    use crate::common::{bag, ResourceBag};
    use crate::ledger::ResourceLedger;
    use crate::state::GameState;
    use crate::upgrades::{StateUpgrades, UpgradeRegistry};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T0: i64 = 1_700_000_000_000;

    struct Fixture {
        state: GameState,
        bus: EventBus,
        ledger: ResourceLedger,
        registry: UpgradeRegistry,
        heat: HeatEngine,
    }

    fn fixture(starting: ResourceBag) -> Fixture {
        let state = GameState::new();
        let bus = EventBus::new();
        let ledger = ResourceLedger::new(
            state.claim("resources").unwrap(),
            &starting,
            &ResourceBag::new(),
            1_000_000.0,
        );
        let registry = UpgradeRegistry::new(state.claim("upgrades").unwrap(), bus.clone());
        let heat = HeatEngine::new(
            HeatConfig::default(),
            bus.clone(),
            state.claim("heat").unwrap(),
            Arc::new(StateUpgrades::new(state.clone())),
            Arc::new(ledger.clone()),
        )
        .with_rng(StdRng::seed_from_u64(7));
        Fixture {
            state,
            bus,
            ledger,
            registry,
            heat,
        }
    }

    fn counter(bus: &EventBus, topic: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        bus.on(
            topic,
            move |_: &BusEvent| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            None,
        );
        count
    }

    fn idle() -> HeatContext {
        HeatContext {
            controlled_systems: 0,
            scale: Scale::Local,
        }
    }

    #[test]
    fn one_system_for_an_hour_generates_point_six() {
        let mut f = fixture(ResourceBag::new());
        let alerts = counter(&f.bus, topics::HEAT_ALERT);

        f.heat.update(60 * MS_PER_MINUTE, T0, &HeatContext::default());
        f.bus.process_queue();

        assert!((f.heat.current_heat() - 0.6).abs() < 1e-9);
        assert_eq!(alerts.load(Ordering::SeqCst), 0);
        assert_eq!(f.heat.heat_sources().count(), 0);
        assert_eq!(f.state.get_str("heat.level").as_deref(), Some("MINIMAL"));
    }

    #[test]
    fn higher_scales_are_quieter() {
        let mut f = fixture(ResourceBag::new());
        let context = HeatContext {
            controlled_systems: 1,
            scale: Scale::Cosmic,
        };
        f.heat.update(60 * MS_PER_MINUTE, T0, &context);
        assert!((f.heat.current_heat() - 0.06).abs() < 1e-9);
    }

    #[test]
    fn reduction_removes_its_rate_and_pays_once_per_interval() {
        let mut f = fixture(bag([("processing", 100.0)]));
        f.registry.grant("log_scrubber");
        f.heat.increase_heat(50.0, "test", "setup", T0);

        assert!(f.heat.toggle_reduction_method("log_scrubbing", T0).unwrap());
        assert_eq!(f.ledger.amount("processing"), 90.0);

        f.heat.update(MS_PER_HOUR, T0 + MS_PER_HOUR, &idle());
        assert!((f.heat.current_heat() - 48.0).abs() < 1e-9);
        assert_eq!(f.ledger.amount("processing"), 90.0);

        f.heat.update(1, T0 + MS_PER_HOUR + 1, &idle());
        assert_eq!(f.ledger.amount("processing"), 80.0);
    }

    #[test]
    fn unaffordable_upkeep_deactivates_the_method() {
        let mut f = fixture(bag([("energy", 7.0)]));
        let deactivated = counter(&f.bus, topics::REDUCTION_DEACTIVATED);
        f.heat.increase_heat(30.0, "test", "setup", T0);
        f.heat.toggle_reduction_method("proxy_rotation", T0).unwrap();

        f.heat.update(MS_PER_HOUR + 1, T0 + MS_PER_HOUR + 1, &idle());
        f.bus.process_queue();

        assert!(!f.heat.reduction_methods()["proxy_rotation"].active);
        assert_eq!(deactivated.load(Ordering::SeqCst), 1);
        assert_eq!(f.heat.current_heat(), 30.0);
        assert_eq!(f.ledger.amount("energy"), 2.0);
    }

    #[test]
    fn toggling_checks_requirements_and_funds() {
        let mut f = fixture(ResourceBag::new());
        assert!(matches!(
            f.heat.toggle_reduction_method("nope", T0),
            Err(ShadowError::UnknownReductionMethod(_))
        ));
        assert!(matches!(
            f.heat.toggle_reduction_method("log_scrubbing", T0),
            Err(ShadowError::RequirementNotMet(_))
        ));
        assert!(matches!(
            f.heat.toggle_reduction_method("proxy_rotation", T0),
            Err(ShadowError::InsufficientResources(_))
        ));
        assert!(!f.heat.reduction_methods()["proxy_rotation"].active);
    }

    #[test]
    fn alerts_fire_once_per_upward_crossing() {
        let mut f = fixture(ResourceBag::new());
        let alerts = counter(&f.bus, topics::HEAT_ALERT);

        f.heat.increase_heat(25.0, "test", "a", T0);
        f.heat.increase_heat(1.0, "test", "b", T0);
        f.heat.decrease_heat(10.0, "test", "c", T0);
        f.heat.increase_heat(10.0, "test", "d", T0);
        f.bus.process_queue();

        assert_eq!(alerts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn quality_two_purge_resets_heat_and_grants_processing() {
        let mut f = fixture(bag([("processing", 100.0), ("credits", 1_000.0)]));
        let purges = counter(&f.bus, topics::HEAT_PURGE);
        let bonuses = counter(&f.bus, topics::PROCESSING_BONUS_GRANTED);
        f.registry.grant("backup_local");
        f.registry.grant("backup_distributed");
        f.heat.on_upgrade_purchased("backup_distributed", T0);

        f.heat.increase_heat(100.0, "test", "overload", T0);
        f.bus.process_queue();

        let record = f.heat.purge_history().last().cloned().unwrap();
        assert_eq!(record.backup_quality, 2);
        assert!((record.recovery_rate - 0.4).abs() < 1e-12);
        assert!(record.resource_loss_rate >= 0.1 && record.resource_loss_rate <= 0.4);
        assert_eq!(f.heat.current_heat(), 10.0);
        assert_eq!(
            f.ledger.amount("processing"),
            purge::apply_loss(100.0, record.resource_loss_rate, 0.4)
        );

        assert!((f.heat.processing_bonus(T0) - 0.25).abs() < 1e-12);
        let modifier = f.heat.processing_bonus_modifier(T0).unwrap();
        assert_eq!(modifier.expiry, Some(T0 + 3_600_000));
        assert_eq!(f.heat.processing_bonus(T0 + 3_600_001), 0.0);

        assert_eq!(purges.load(Ordering::SeqCst), 1);
        assert_eq!(bonuses.load(Ordering::SeqCst), 1);
        assert_eq!(f.heat.heat_sources().count(), 0);
        assert_eq!(f.heat.total_purges(), 1);
    }

    #[test]
    fn immunity_holds_heat_below_the_purge_line() {
        let mut f = fixture(bag([("data", 50.0)]));
        for tier in ["backup_local", "backup_distributed", "backup_encrypted"] {
            f.registry.grant(tier);
        }
        f.heat.increase_heat(100.0, "test", "first", T0);
        assert_eq!(f.heat.total_purges(), 1);
        assert!(f.heat.is_purge_immune(T0 + 1_000));

        f.heat.increase_heat(200.0, "test", "second", T0 + 1_000);
        assert_eq!(f.heat.current_heat(), 99.0);
        assert_eq!(f.heat.total_purges(), 1);

        let later = T0 + 30 * MS_PER_MINUTE + 1;
        f.heat.increase_heat(5.0, "test", "third", later);
        assert_eq!(f.heat.total_purges(), 2);
    }

    #[test]
    fn top_quality_purge_halves_generation() {
        let mut f = fixture(ResourceBag::new());
        for tier in backup::BACKUP_TIER_UPGRADES {
            f.registry.grant(tier);
        }
        let record = f.heat.execute_purge(T0);
        assert!((record.recovery_rate - 0.8).abs() < 1e-12);
        assert_eq!(f.heat.current_heat(), 0.0);
        assert!(f.heat.has_temporal_prediction(T0));
        assert_eq!(f.heat.generation_multiplier(T0), 0.5);
        assert_eq!(f.heat.generation_multiplier(T0 + 2 * MS_PER_HOUR + 1), 1.0);
    }

    #[test]
    fn purchased_upgrade_can_unlock_a_method() {
        let mut f = fixture(ResourceBag::new());
        let unlocked = counter(&f.bus, topics::REDUCTION_UNLOCKED);
        f.registry.grant("quantum_obfuscation");
        f.heat.on_upgrade_purchased("quantum_obfuscation", T0);
        f.heat.on_upgrade_purchased("quantum_obfuscation", T0);
        f.bus.process_queue();
        assert!(f.heat.reduction_methods().contains_key("quantum_obfuscation"));
        assert_eq!(unlocked.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deserialize_tolerates_gaps_and_rederives_backups() {
        let mut f = fixture(ResourceBag::new());
        assert!(f.heat.deserialize(&json!({
            "currentHeat": 42.5,
            "backupSystems": {
                "quality": 4, "locations": 99, "redundancy": 3, "encryptionLevel": 3
            }
        })));
        assert_eq!(f.heat.current_heat(), 42.5);
        assert_eq!(f.heat.backups().quality, 0);
        assert_eq!(f.heat.reduction_methods().len(), 4);

        assert!(!f.heat.deserialize(&json!("garbage")));
        assert_eq!(f.heat.current_heat(), 42.5);
    }

    #[test]
    fn serialized_state_survives_a_reload() {
        let mut f = fixture(bag([("energy", 100.0)]));
        f.heat.increase_heat(33.0, "test", "setup", T0);
        f.heat.toggle_reduction_method("proxy_rotation", T0).unwrap();
        f.heat
            .reduction_modifiers_mut()
            .insert("boost", Modifier::permanent(1.5, "test"));
        let saved = f.heat.serialize();

        let mut other = fixture(ResourceBag::new());
        assert!(other.heat.deserialize(&saved));
        assert_eq!(other.heat.current_heat(), 33.0);
        assert!(other.heat.reduction_methods()["proxy_rotation"].active);
        assert_eq!(other.heat.reduction_multiplier(T0), 1.5);
        assert_eq!(other.heat.heat_sources().count(), 1);
    }

    proptest! {
        #[test]
        fn heat_stays_within_bounds(amounts in prop::collection::vec(0.0f64..250.0, 1..20)) {
            let mut f = fixture(bag([("processing", 500.0)]));
            for (i, amount) in amounts.into_iter().enumerate() {
                f.heat.increase_heat(amount, "prop", "bounds", T0 + i as i64);
                let heat = f.heat.current_heat();
                prop_assert!((0.0..=MAX_HEAT).contains(&heat));
            }
        }
    }
}
