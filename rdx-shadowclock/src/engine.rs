//! The engine that assembles and drives every Shadowclock subsystem.

use crate::bus::{BusEvent, EventBus};
use crate::common::{lock, now_ms, ResourceBag};
use crate::config::ShadowclockConfig;
use crate::economy::ResourceSystem;
use crate::error::Result;
use crate::events::{
    topics, ConstructionCancel, ConstructionModify, ExpansionUnlock, MoralityChange,
    ProcessingBonus, ProductionModifier, ReputationChange, UpgradePurchased,
};
use crate::heat::HeatEngine;
use crate::ledger::{Ledger, ResourceLedger};
use crate::random_events::{EventRecord, RandomEventEngine, WorldView};
use crate::scheduler::{priority, Scheduler, SystemStats, TickReport};
use crate::state::GameState;
use crate::upgrades::{UpgradeQuery, UpgradeRegistry};
use crate::world::{Statistics, WorldSystem};
use anyhow::Context;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Per-system time budgets, in milliseconds.
const FAST_BUDGET_MS: u64 = 5;
const SLOW_BUDGET_MS: u64 = 20;

/// The main Shadowclock engine.
///
/// Holds the bus, the state store and every subsystem, and drives them
/// through the scheduler. The engine is cheap to clone; clones share the same
/// running instance.
///
/// Subsystem guards returned by the accessors must be dropped before calling
/// `tick`, `force_update` or `load_game`, which lock them again.
#[derive(Clone)]
pub struct ShadowclockEngine {
    config: Arc<ShadowclockConfig>,
    bus: EventBus,
    state: GameState,
    /// Timestamp of the latest tick, read by bus listeners.
    clock: Arc<AtomicI64>,
    ledger: Arc<dyn Ledger>,
    upgrades: Arc<UpgradeRegistry>,
    heat: Arc<Mutex<HeatEngine>>,
    events: Arc<Mutex<RandomEventEngine>>,
    economy: Arc<Mutex<ResourceSystem>>,
    world: Arc<Mutex<WorldSystem>>,
    stats: Arc<Mutex<Statistics>>,
    scheduler: Arc<Mutex<Scheduler>>,
    shutdown: broadcast::Sender<()>,
}

impl ShadowclockEngine {
    /// Creates a new engine starting at the current wall-clock time.
    pub fn new(config: ShadowclockConfig) -> Result<Self> {
        Self::assemble(config, now_ms(), None)
    }

    /// Creates an engine with a fixed start time and random seed, so that
    /// purges and event rolls are reproducible.
    pub fn seeded(config: ShadowclockConfig, now: i64, seed: u64) -> Result<Self> {
        Self::assemble(config, now, Some(seed))
    }

    fn assemble(config: ShadowclockConfig, now: i64, seed: Option<u64>) -> Result<Self> {
        let bus = EventBus::new();
        let state = GameState::new();

        let ledger: Arc<dyn Ledger> = Arc::new(ResourceLedger::new(
            state.claim("resources")?,
            &config.resources.starting,
            &config.resources.caps,
            config.resources.default_cap,
        ));
        let upgrades = Arc::new(UpgradeRegistry::new(state.claim("upgrades")?, bus.clone()));

        let mut heat = HeatEngine::new(
            config.heat.clone(),
            bus.clone(),
            state.claim("heat")?,
            upgrades.clone() as Arc<dyn UpgradeQuery>,
            ledger.clone(),
        );
        let mut random_events =
            RandomEventEngine::new(config.events.clone(), bus.clone(), ledger.clone(), now);
        if let Some(seed) = seed {
            heat = heat.with_rng(StdRng::seed_from_u64(seed));
            random_events = random_events.with_rng(StdRng::seed_from_u64(seed.wrapping_add(1)));
        }
        let economy = ResourceSystem::new(
            config.resources.clone(),
            ledger.clone(),
            state.claim("production")?,
        );
        let world = WorldSystem::new(
            config.world.clone(),
            &config.events,
            &config.resources,
            bus.clone(),
            state.claim("world")?,
        );
        let stats = Statistics::new(state.claim("stats")?);
        let (shutdown, _) = broadcast::channel(1);

        let engine = Self {
            config: Arc::new(config),
            scheduler: Arc::new(Mutex::new(Scheduler::new(bus.clone()))),
            bus,
            state,
            clock: Arc::new(AtomicI64::new(now)),
            ledger,
            upgrades,
            heat: Arc::new(Mutex::new(heat)),
            events: Arc::new(Mutex::new(random_events)),
            economy: Arc::new(Mutex::new(economy)),
            world: Arc::new(Mutex::new(world)),
            stats: Arc::new(Mutex::new(stats)),
            shutdown,
        };
        engine.wire_listeners();
        engine.register_systems();
        info!("ShadowclockEngine assembled.");
        Ok(engine)
    }

    /// Routes cross-subsystem requests from the bus into their owners.
    fn wire_listeners(&self) {
        let bus = &self.bus;

        let heat = self.heat.clone();
        let clock = self.clock.clone();
        bus.on(
            topics::UPGRADE_PURCHASED,
            move |event| {
                let purchase: UpgradePurchased = decode(event)?;
                let now = clock.load(Ordering::Relaxed);
                lock(&heat).on_upgrade_purchased(&purchase.upgrade_id, now);
                Ok(())
            },
            Some("heat"),
        );

        let economy = self.economy.clone();
        bus.on(
            topics::PROCESSING_BONUS_GRANTED,
            move |event| {
                let bonus: ProcessingBonus = decode(event)?;
                lock(&economy).grant_processing_bonus(
                    bonus.multiplier,
                    bonus.expiry,
                    &bonus.source,
                );
                Ok(())
            },
            Some("economy"),
        );

        let economy = self.economy.clone();
        bus.on(
            topics::PRODUCTION_MODIFIER_REQUESTED,
            move |event| {
                let request: ProductionModifier = decode(event)?;
                lock(&economy).apply_production_modifier(
                    &request.resource,
                    request.multiplier,
                    &request.source,
                );
                Ok(())
            },
            Some("economy"),
        );

        let world = self.world.clone();
        let clock = self.clock.clone();
        bus.on(
            topics::MORALITY_CHANGE_REQUESTED,
            move |event| {
                let request: MoralityChange = decode(event)?;
                let now = clock.load(Ordering::Relaxed);
                lock(&world).change_morality(request.amount, &request.reason, now);
                Ok(())
            },
            Some("world"),
        );

        let world = self.world.clone();
        bus.on(
            topics::REPUTATION_CHANGE_REQUESTED,
            move |event| {
                let request: ReputationChange = decode(event)?;
                lock(&world).change_reputation(&request.faction, request.amount, &request.reason);
                Ok(())
            },
            Some("world"),
        );

        let world = self.world.clone();
        bus.on(
            topics::EXPANSION_UNLOCK_REQUESTED,
            move |event| {
                let request: ExpansionUnlock = decode(event)?;
                lock(&world).unlock_expansion(&request.expansion, &request.source);
                Ok(())
            },
            Some("world"),
        );

        let world = self.world.clone();
        let clock = self.clock.clone();
        bus.on(
            topics::CONSTRUCTION_MODIFY_REQUESTED,
            move |event| {
                let request: ConstructionModify = decode(event)?;
                lock(&world).modify_construction(
                    request.multiplier,
                    request.duration_ms,
                    &request.source,
                    clock.load(Ordering::Relaxed),
                );
                Ok(())
            },
            Some("world"),
        );

        let world = self.world.clone();
        bus.on(
            topics::CONSTRUCTION_CANCEL_REQUESTED,
            move |event| {
                let request: ConstructionCancel = decode(event)?;
                lock(&world).cancel_project(request.project.as_deref(), &request.source);
                Ok(())
            },
            Some("world"),
        );

        for topic in [
            topics::HEAT_INCREASED,
            topics::HEAT_PURGE,
            topics::EVENT_TRIGGERED,
            topics::EVENT_RESOLVED,
            topics::UPGRADE_PURCHASED,
        ] {
            let stats = self.stats.clone();
            bus.on(
                topic,
                move |event| {
                    lock(&stats).record(&event.topic, &event.data);
                    Ok(())
                },
                Some("statistics"),
            );
        }
    }

    fn register_systems(&self) {
        let mut scheduler = lock(&self.scheduler);

        let economy = self.economy.clone();
        scheduler.register_system(
            "resources",
            move |delta_ms, now| {
                lock(&economy).update(delta_ms, now);
                Ok(())
            },
            priority::RESOURCES,
            FAST_BUDGET_MS,
        );

        let (heat, world, stats) = (self.heat.clone(), self.world.clone(), self.stats.clone());
        scheduler.register_system(
            "heat",
            move |delta_ms, now| {
                let context = lock(&world).heat_context();
                let passive = lock(&heat).update(delta_ms, now, &context);
                lock(&stats).record_passive_heat(passive);
                Ok(())
            },
            priority::HEAT,
            FAST_BUDGET_MS,
        );

        let world = self.world.clone();
        scheduler.register_system(
            "world",
            move |delta_ms, now| {
                lock(&world).update(delta_ms, now);
                Ok(())
            },
            priority::EXPANSION,
            FAST_BUDGET_MS,
        );

        let (events, world, economy, ledger) = (
            self.events.clone(),
            self.world.clone(),
            self.economy.clone(),
            self.ledger.clone(),
        );
        scheduler.register_system(
            "events",
            move |_delta_ms, now| {
                let view = world_view(&world, &economy, ledger.as_ref(), now);
                lock(&events).update(&view);
                Ok(())
            },
            priority::EVENTS,
            SLOW_BUDGET_MS,
        );

        let stats = self.stats.clone();
        let bus = self.bus.clone();
        scheduler.register_system(
            "statistics",
            move |_delta_ms, now| {
                let ticks = {
                    let mut stats = lock(&stats);
                    stats.update();
                    stats.counters().ticks
                };
                bus.queue(topics::UI_REFRESH, json!({ "tick": ticks, "timestamp": now }));
                Ok(())
            },
            priority::STATISTICS,
            FAST_BUDGET_MS,
        );

        let (events, world, economy, ledger) = (
            self.events.clone(),
            self.world.clone(),
            self.economy.clone(),
            self.ledger.clone(),
        );
        scheduler.on_interval("event_check", self.config.events.check_interval_ms, move |now| {
            let view = world_view(&world, &economy, ledger.as_ref(), now);
            if let Some(record) = lock(&events).check_for_event(&view) {
                debug!(event_id = %record.event_id, "Event check fired.");
            }
            Ok(())
        });
    }
}

/// Reads a typed payload off a bus event.
fn decode<T: DeserializeOwned>(event: &BusEvent) -> anyhow::Result<T> {
    serde_json::from_value(event.data.clone())
        .with_context(|| format!("malformed payload on '{}'", event.topic))
}

fn world_view(
    world: &Mutex<WorldSystem>,
    economy: &Mutex<ResourceSystem>,
    ledger: &dyn Ledger,
    now: i64,
) -> WorldView {
    let production = lock(economy).total_rate(now);
    lock(world).view(now, ledger, production)
}

// Lifecycle and ticking.
impl ShadowclockEngine {
    /// Runs the tick loop until `stop` is called or Ctrl+C is received.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("ShadowclockEngine starting up...");
        let mut shutdown_rx = self.shutdown.subscribe();
        let period = self.config.clock.resolution.tick_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.start();
        self.bus
            .emit(topics::ENGINE_STARTED, json!({ "timestamp": now_ms() }));
        info!(
            "Engine running at {:?}. Press Ctrl+C to shut down.",
            self.config.clock.resolution
        );

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Stop requested.");
                    break;
                }
                result = &mut ctrl_c => {
                    if let Err(err) = result {
                        error!(error = %err, "Failed to listen for Ctrl+C.");
                    }
                    info!("Shutdown signal received.");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick(now_ms());
                }
            }
        }

        self.pause();
        self.bus
            .emit(topics::ENGINE_STOPPED, json!({ "timestamp": now_ms() }));
        info!("ShadowclockEngine has shut down.");
        Ok(())
    }

    /// Asks a running `run` loop to exit.
    pub fn stop(&self) {
        if self.shutdown.send(()).is_err() {
            debug!("Stop requested but the engine is not running.");
        }
    }

    /// Lets `tick` run. `run` does this itself.
    pub fn start(&self) {
        lock(&self.scheduler).start();
    }

    /// Stops ticking without tearing anything down.
    pub fn pause(&self) {
        lock(&self.scheduler).stop();
    }

    pub fn is_running(&self) -> bool {
        lock(&self.scheduler).is_running()
    }

    /// Runs one scheduled tick at `now`. Returns `None` while paused.
    pub fn tick(&self, now: i64) -> Option<TickReport> {
        self.clock.store(now, Ordering::Relaxed);
        lock(&self.scheduler).tick(now)
    }

    /// Runs one pass regardless of the running flag.
    pub fn force_update(&self, now: i64) -> TickReport {
        self.clock.store(now, Ordering::Relaxed);
        lock(&self.scheduler).force_update(now)
    }

    pub fn system_stats(&self) -> Vec<(String, i32, SystemStats)> {
        lock(&self.scheduler).registry().stats()
    }
}

// Player actions and accessors.
impl ShadowclockEngine {
    pub fn config(&self) -> &ShadowclockConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.ledger.as_ref()
    }

    pub fn upgrades(&self) -> &UpgradeRegistry {
        &self.upgrades
    }

    /// Time of the latest tick.
    pub fn now(&self) -> i64 {
        self.clock.load(Ordering::Relaxed)
    }

    pub fn heat(&self) -> MutexGuard<'_, HeatEngine> {
        lock(&self.heat)
    }

    pub fn random_events(&self) -> MutexGuard<'_, RandomEventEngine> {
        lock(&self.events)
    }

    pub fn economy(&self) -> MutexGuard<'_, ResourceSystem> {
        lock(&self.economy)
    }

    pub fn world(&self) -> MutexGuard<'_, WorldSystem> {
        lock(&self.world)
    }

    pub fn statistics(&self) -> MutexGuard<'_, Statistics> {
        lock(&self.stats)
    }

    /// Buys an upgrade. Its effects land on the next tick.
    pub fn purchase_upgrade(&self, upgrade_id: &str, cost: &ResourceBag) -> Result<()> {
        self.upgrades.purchase(upgrade_id, cost, self.ledger.as_ref())
    }

    pub fn toggle_reduction(&self, method_id: &str) -> Result<bool> {
        let now = self.now();
        lock(&self.heat).toggle_reduction_method(method_id, now)
    }

    pub fn trigger_event(&self, event_id: &str) -> Result<EventRecord> {
        let now = self.now();
        lock(&self.events).trigger_event(event_id, now)
    }

    pub fn handle_event_choice(&self, record_id: u64, choice_index: usize) -> bool {
        let now = self.now();
        lock(&self.events).handle_event_choice(record_id, choice_index, now)
    }
}

// Persistence.
impl ShadowclockEngine {
    /// Bundles the state store and every subsystem into one document.
    pub fn save_game(&self) -> Value {
        let now = self.now();
        let document = json!({
            "version": crate::VERSION,
            "savedAt": now,
            "state": self.state.snapshot(),
            "heat": lock(&self.heat).serialize(),
            "events": lock(&self.events).save_state(),
            "production": lock(&self.economy).save_state(),
            "world": lock(&self.world).save_state(),
            "stats": lock(&self.stats).save_state(),
        });
        self.bus.queue(topics::GAME_SAVED, json!({ "savedAt": now }));
        document
    }

    /// Restores a `save_game` document, then runs one forced update.
    ///
    /// Returns false if any section could not be restored; those sections
    /// keep their defaults.
    pub fn load_game(&self, document: &Value) -> bool {
        let Some(snapshot) = document.get("state").filter(|value| value.is_object()) else {
            warn!("Save document has no state snapshot; nothing loaded.");
            return false;
        };
        self.state.restore(snapshot.clone());

        let section = |name: &str| document.get(name).cloned().unwrap_or(Value::Null);
        let restored = [
            lock(&self.heat).deserialize(&section("heat")),
            lock(&self.events).load_state(&section("events")),
            lock(&self.economy).load_state(&section("production")),
            lock(&self.world).load_state(&section("world")),
            lock(&self.stats).load_state(&section("stats")),
        ];
        let ok = restored.iter().all(|done| *done);
        if ok {
            info!("Game loaded.");
        } else {
            warn!(?restored, "Game loaded with missing sections.");
        }

        self.force_update(self.now());
        self.bus.queue(topics::GAME_LOADED, json!({ "complete": ok }));
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{bag, MS_PER_SECOND};
    use std::sync::atomic::AtomicUsize;

    const T0: i64 = 1_700_000_000_000;

    fn engine() -> ShadowclockEngine {
        let engine = ShadowclockEngine::seeded(ShadowclockConfig::default(), T0, 7).unwrap();
        engine.start();
        engine
    }

    #[test]
    fn systems_run_in_priority_order() {
        let engine = engine();
        let names: Vec<String> = engine
            .system_stats()
            .into_iter()
            .map(|(name, _, _)| name)
            .collect();
        assert_eq!(names, ["resources", "heat", "world", "events", "statistics"]);
    }

    #[test]
    fn tick_is_skipped_while_paused() {
        let engine = engine();
        engine.pause();
        assert!(engine.tick(T0).is_none());
        assert_eq!(engine.force_update(T0).failures, 0);
    }

    #[test]
    fn upgrade_purchase_unlocks_a_method_on_next_tick() {
        let engine = engine();
        engine.tick(T0);
        engine
            .purchase_upgrade("quantum_obfuscation", &bag([("credits", 10.0)]))
            .unwrap();
        assert!(!engine.heat().reduction_methods().contains_key("quantum_obfuscation"));
        engine.tick(T0 + MS_PER_SECOND);
        assert!(engine.heat().reduction_methods().contains_key("quantum_obfuscation"));
        assert_eq!(engine.statistics().counters().upgrades_purchased, 1);
    }

    #[test]
    fn requests_on_the_bus_reach_their_owners() {
        let engine = engine();
        engine.bus().queue(
            topics::MORALITY_CHANGE_REQUESTED,
            json!({ "amount": -30.0, "reason": "test" }),
        );
        engine.bus().queue(
            topics::PRODUCTION_MODIFIER_REQUESTED,
            json!({ "resource": "energy", "multiplier": 2.0, "source": "test" }),
        );
        engine.tick(T0);
        assert_eq!(engine.world().data().morality, -30.0);
        assert_eq!(engine.economy().production_multiplier("energy", T0), 2.0);
    }

    #[test]
    fn malformed_requests_do_not_stop_the_tick() {
        let engine = engine();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        engine.bus().on(
            topics::MORALITY_CHANGE_REQUESTED,
            move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            None,
        );
        engine
            .bus()
            .queue(topics::MORALITY_CHANGE_REQUESTED, json!("not a request"));
        let report = engine.tick(T0).unwrap();
        assert_eq!(report.failures, 0);
        assert_eq!(seen.load(Ordering::Relaxed), 1);
        assert_eq!(engine.world().data().morality, 0.0);
    }

    #[test]
    fn load_rejects_documents_without_state() {
        let engine = engine();
        assert!(!engine.load_game(&json!({ "heat": {} })));
    }
}
