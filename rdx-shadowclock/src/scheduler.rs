//! The tick scheduler and the system registry it drives.
//!
//! A tick flushes the bus queue, runs every registered system once in
//! ascending priority order, fires any interval timers that came due, and
//! flushes the queue again so events raised during the tick are delivered
//! before it ends. Each system and timer is a fault boundary: an error or a
//! panic is logged and counted, and the tick carries on.

use crate::bus::EventBus;
use crate::common::{SystemId, TimerId};
use serde::Serialize;
use slotmap::SlotMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Default system priorities. Lower runs first.
pub mod priority {
    pub const RESOURCES: i32 = 10;
    pub const TIMELINE: i32 = 15;
    pub const HEAT: i32 = 20;
    pub const CONSCIOUSNESS: i32 = 25;
    pub const EXPANSION: i32 = 30;
    pub const EVENTS: i32 = 40;
    pub const OFFLINE: i32 = 45;
    pub const STATISTICS: i32 = 50;
}

/// `update(delta_ms, now_ms)`.
pub type SystemFn = Box<dyn FnMut(i64, i64) -> anyhow::Result<()> + Send>;

/// `fire(now_ms)`.
pub type TimerFn = Box<dyn FnMut(i64) -> anyhow::Result<()> + Send>;

/// Per-system telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemStats {
    pub runs: u64,
    pub failures: u64,
    pub over_budget: u64,
    pub last_duration: Duration,
    pub max_duration: Duration,
}

struct SystemEntry {
    name: String,
    priority: i32,
    /// Declarative only; overruns are logged, never preempted.
    budget: Duration,
    seq: u64,
    update: SystemFn,
    stats: SystemStats,
}

#[derive(Default)]
pub struct SystemRegistry {
    systems: SlotMap<SystemId, SystemEntry>,
    order: Vec<SystemId>,
    next_seq: u64,
}

impl SystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a system. Equal priorities run in registration order.
    pub fn register_system<F>(
        &mut self,
        name: &str,
        update: F,
        priority: i32,
        budget_ms: u64,
    ) -> SystemId
    where
        F: FnMut(i64, i64) -> anyhow::Result<()> + Send + 'static,
    {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = self.systems.insert(SystemEntry {
            name: name.to_string(),
            priority,
            budget: Duration::from_millis(budget_ms),
            seq,
            update: Box::new(update),
            stats: SystemStats::default(),
        });
        self.order.push(id);
        let systems = &self.systems;
        self.order
            .sort_by_key(|id| systems.get(*id).map(|entry| (entry.priority, entry.seq)));
        debug!(name, priority, budget_ms, "System registered.");
        id
    }

    pub fn unregister_system(&mut self, id: SystemId) -> bool {
        self.order.retain(|known| *known != id);
        self.systems.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// System names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter_map(|id| self.systems.get(*id))
            .map(|entry| entry.name.as_str())
            .collect()
    }

    /// `(name, priority, stats)` in execution order.
    pub fn stats(&self) -> Vec<(String, i32, SystemStats)> {
        self.order
            .iter()
            .filter_map(|id| self.systems.get(*id))
            .map(|entry| (entry.name.clone(), entry.priority, entry.stats.clone()))
            .collect()
    }

    /// Runs every system once. Returns how many failed.
    pub fn run_all(&mut self, delta_ms: i64, now: i64) -> usize {
        let mut failures = 0;
        for id in self.order.clone() {
            let Some(entry) = self.systems.get_mut(id) else {
                continue;
            };
            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (entry.update)(delta_ms, now)));
            let elapsed = started.elapsed();

            entry.stats.runs += 1;
            entry.stats.last_duration = elapsed;
            entry.stats.max_duration = entry.stats.max_duration.max(elapsed);
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    entry.stats.failures += 1;
                    error!(system = %entry.name, error = %err, "System update failed.");
                }
                Err(_) => {
                    failures += 1;
                    entry.stats.failures += 1;
                    error!(system = %entry.name, "System update panicked.");
                }
            }
            if elapsed > entry.budget {
                entry.stats.over_budget += 1;
                warn!(
                    system = %entry.name,
                    elapsed_ms = elapsed.as_secs_f64() * 1_000.0,
                    budget_ms = entry.budget.as_millis() as u64,
                    "System exceeded its budget."
                );
            }
        }
        failures
    }
}

/// Fires on a fixed wall-clock interval, checked once per tick.
struct IntervalTimer {
    name: String,
    interval_ms: i64,
    last_fired: Option<i64>,
    task: TimerFn,
}

impl IntervalTimer {
    /// Arms on the first tick it sees; fires once `interval_ms` has elapsed.
    fn process(&mut self, now: i64) -> Option<anyhow::Result<()>> {
        let last = *self.last_fired.get_or_insert(now);
        if now - last < self.interval_ms {
            return None;
        }
        self.last_fired = Some(now);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.task)(now)));
        Some(outcome.unwrap_or_else(|_| Err(anyhow::anyhow!("timer task panicked"))))
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub delta_ms: i64,
    pub failures: usize,
    pub timers_fired: usize,
    pub events_delivered: usize,
}

pub struct Scheduler {
    bus: EventBus,
    registry: SystemRegistry,
    timers: SlotMap<TimerId, IntervalTimer>,
    running: bool,
    last_tick: Option<i64>,
    tick_count: u64,
}

impl Scheduler {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            registry: SystemRegistry::new(),
            timers: SlotMap::with_key(),
            running: false,
            last_tick: None,
            tick_count: 0,
        }
    }

    pub fn registry(&self) -> &SystemRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SystemRegistry {
        &mut self.registry
    }

    pub fn register_system<F>(
        &mut self,
        name: &str,
        update: F,
        priority: i32,
        budget_ms: u64,
    ) -> SystemId
    where
        F: FnMut(i64, i64) -> anyhow::Result<()> + Send + 'static,
    {
        self.registry.register_system(name, update, priority, budget_ms)
    }

    /// Registers a task that runs every `interval_ms` of wall-clock time,
    /// after the systems of the tick in which it comes due.
    pub fn on_interval<F>(&mut self, name: &str, interval_ms: i64, task: F) -> TimerId
    where
        F: FnMut(i64) -> anyhow::Result<()> + Send + 'static,
    {
        debug!(name, interval_ms, "Interval timer added.");
        self.timers.insert(IntervalTimer {
            name: name.to_string(),
            interval_ms: interval_ms.max(1),
            last_fired: None,
            task: Box::new(task),
        })
    }

    pub fn remove_interval(&mut self, id: TimerId) -> bool {
        self.timers.remove(id).is_some()
    }

    pub fn start(&mut self) {
        if !self.running {
            info!("Scheduler started.");
        }
        self.running = true;
    }

    /// Stops ticking. The next `start` does not count the paused time as delta.
    pub fn stop(&mut self) {
        if self.running {
            info!(ticks = self.tick_count, "Scheduler stopped.");
        }
        self.running = false;
        self.last_tick = None;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// One scheduled tick. Does nothing while stopped.
    pub fn tick(&mut self, now: i64) -> Option<TickReport> {
        if !self.running {
            return None;
        }
        Some(self.pass(now))
    }

    /// Runs one pass even while stopped, e.g. right after a load.
    pub fn force_update(&mut self, now: i64) -> TickReport {
        debug!("Forced update.");
        self.pass(now)
    }

    fn pass(&mut self, now: i64) -> TickReport {
        let delta_ms = self.last_tick.map_or(0, |last| (now - last).max(0));
        self.last_tick = Some(now);
        self.tick_count += 1;

        let mut events_delivered = self.bus.process_queue();
        let mut failures = self.registry.run_all(delta_ms, now);

        let mut timers_fired = 0;
        for timer in self.timers.values_mut() {
            match timer.process(now) {
                None => {}
                Some(Ok(())) => timers_fired += 1,
                Some(Err(err)) => {
                    timers_fired += 1;
                    failures += 1;
                    error!(timer = %timer.name, error = %err, "Interval task failed.");
                }
            }
        }

        events_delivered += self.bus.process_queue();
        trace!(tick = self.tick_count, delta_ms, failures, "Tick complete.");
        TickReport {
            tick: self.tick_count,
            delta_ms,
            failures,
            timers_fired,
            events_delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusEvent;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn systems_run_in_priority_then_registration_order() {
        let seen = log();
        let mut registry = SystemRegistry::new();
        let systems = [
            ("stats", priority::STATISTICS),
            ("heat", priority::HEAT),
            ("resources", priority::RESOURCES),
            ("heat2", priority::HEAT),
        ];
        for (name, prio) in systems {
            let seen = seen.clone();
            registry.register_system(
                name,
                move |_, _| {
                    seen.lock().unwrap().push(name.to_string());
                    Ok(())
                },
                prio,
                5,
            );
        }
        registry.run_all(16, 0);
        assert_eq!(*seen.lock().unwrap(), vec!["resources", "heat", "heat2", "stats"]);
        assert_eq!(registry.names(), vec!["resources", "heat", "heat2", "stats"]);
    }

    #[test]
    fn failing_systems_do_not_block_the_rest() {
        let seen = log();
        let mut registry = SystemRegistry::new();
        registry.register_system("broken", |_, _| Err(anyhow::anyhow!("boom")), 1, 5);
        registry.register_system("panicky", |_, _| panic!("kaboom"), 2, 5);
        let tail = seen.clone();
        registry.register_system(
            "tail",
            move |_, _| {
                tail.lock().unwrap().push("tail".to_string());
                Ok(())
            },
            3,
            5,
        );

        assert_eq!(registry.run_all(0, 0), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["tail"]);
        let stats = registry.stats();
        assert_eq!(stats[0].2.failures, 1);
        assert_eq!(stats[1].2.failures, 1);
        assert_eq!(stats[2].2.runs, 1);
    }

    #[test]
    fn scheduler_passes_delta_and_respects_lifecycle() {
        let deltas = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(EventBus::new());
        let sink = deltas.clone();
        scheduler.register_system(
            "probe",
            move |delta, _| {
                sink.lock().unwrap().push(delta);
                Ok(())
            },
            priority::RESOURCES,
            5,
        );

        assert!(scheduler.tick(1_000).is_none());
        scheduler.start();
        scheduler.tick(1_000);
        scheduler.tick(1_250);
        scheduler.stop();
        scheduler.force_update(2_000);
        assert_eq!(*deltas.lock().unwrap(), vec![0, 250, 0]);
        assert_eq!(scheduler.tick_count(), 3);
    }

    #[test]
    fn queued_events_flush_within_the_tick() {
        let bus = EventBus::new();
        let seen = log();
        let sink = seen.clone();
        bus.on(
            "heat:increased",
            move |event: &BusEvent| {
                sink.lock().unwrap().push(event.topic.clone());
                Ok(())
            },
            None,
        );
        let mut scheduler = Scheduler::new(bus.clone());
        let producer = bus.clone();
        scheduler.register_system(
            "producer",
            move |_, _| {
                producer.queue("heat:increased", json!({ "amount": 1.0 }));
                Ok(())
            },
            priority::HEAT,
            5,
        );
        scheduler.start();
        let report = scheduler.tick(0).unwrap();
        assert_eq!(report.events_delivered, 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn interval_timers_fire_on_wall_clock_cadence() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(EventBus::new());
        let sink = fired.clone();
        let id = scheduler.on_interval("event_check", 30_000, move |now| {
            sink.lock().unwrap().push(now);
            Ok(())
        });
        scheduler.start();
        for now in (0..=90_000).step_by(10_000) {
            scheduler.tick(now);
        }
        assert_eq!(*fired.lock().unwrap(), vec![30_000, 60_000, 90_000]);
        assert!(scheduler.remove_interval(id));
        assert!(!scheduler.remove_interval(id));
    }
}
