//! Defines all configuration structures for the Shadowclock core.
//!
//! These structs are designed to be deserialized from a configuration file
//! (e.g., a TOML file) using `serde` and the `config` crate. Every field has a
//! default, so an empty file (or no file at all) yields a playable game, and
//! any single constant can be overridden through the environment, e.g.
//! `SHADOWCLOCK__HEAT__PASSIVE_BASE=0.02`.

use crate::common::{bag, ResourceBag, Scale, MS_PER_HOUR, MS_PER_MINUTE, MS_PER_SECOND};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// The top-level configuration for the `ShadowclockEngine`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShadowclockConfig {
    /// Tick cadence of the scheduler.
    pub clock: ClockConfig,
    /// Heat accrual, reduction and purge constants.
    pub heat: HeatConfig,
    /// Random event cadence and chance shaping.
    pub events: EventConfig,
    /// Starting resources, caps and base production.
    pub resources: ResourceConfig,
    /// Starting world values and calendar settings.
    pub world: WorldConfig,
}

impl ShadowclockConfig {
    /// Loads configuration from an optional file, then environment overrides.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("SHADOWCLOCK").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// The tick speed of the scheduler loop.
    pub resolution: ClockResolution,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            resolution: ClockResolution::Low,
        }
    }
}

/// Defines the operational speed of the scheduler loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockResolution {
    /// ~30 ticks per second.
    High,
    /// ~10 ticks per second.
    Medium,
    /// ~1 tick per second. Plenty for an idle game.
    Low,
    /// A user-defined speed in ticks per second.
    Custom { ticks_per_second: u64 },
}

impl ClockResolution {
    pub fn tick_interval(&self) -> Duration {
        let ticks_per_second = match self {
            ClockResolution::High => 30,
            ClockResolution::Medium => 10,
            ClockResolution::Low => 1,
            ClockResolution::Custom { ticks_per_second } => (*ticks_per_second).max(1),
        };
        Duration::from_millis(1_000 / ticks_per_second)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeatConfig {
    /// Heat per minute for a single controlled system at local scale.
    pub passive_base: f64,
    /// Exponent applied to the controlled-system count.
    pub passive_scaling: f64,
    /// Heat removed by a purge before backup quality is added.
    pub purge_heat_reduction: f64,
    /// Lower bound of the random resource loss rate on purge.
    pub purge_loss_min: f64,
    /// Upper bound of the random resource loss rate on purge.
    pub purge_loss_max: f64,
    /// Heat values that raise an alert when crossed upward.
    pub alert_thresholds: Vec<u32>,
    /// How long heat sources stay in the log.
    pub source_retention_ms: i64,
    /// Maximum number of heat sources kept.
    pub source_log_cap: usize,
    /// Maximum number of purge records kept.
    pub purge_history_cap: usize,
    /// Heat is held here while purge immunity is active.
    pub immunity_heat_ceiling: f64,
}

impl Default for HeatConfig {
    fn default() -> Self {
        Self {
            passive_base: 0.01,
            passive_scaling: 0.8,
            purge_heat_reduction: 80.0,
            purge_loss_min: 0.3,
            purge_loss_max: 0.6,
            alert_thresholds: vec![20, 40, 60, 80, 90, 95],
            source_retention_ms: MS_PER_HOUR,
            source_log_cap: 50,
            purge_history_cap: 10,
            immunity_heat_ceiling: 99.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Probability of an event on each check before shaping.
    pub base_chance: f64,
    /// Wall-clock interval between event checks.
    pub check_interval_ms: i64,
    /// Upper clamp on the shaped chance.
    pub max_chance: f64,
    /// Time without events over which the chance ramps to `ramp_max`.
    pub ramp_ms: i64,
    pub ramp_max: f64,
    /// Anti-spam: more than `spam_limit` events within `spam_window_ms`
    /// multiplies the chance by `spam_damper`.
    pub spam_window_ms: i64,
    pub spam_limit: usize,
    pub spam_damper: f64,
    /// Chance boost per 100 points of positive morality.
    pub morality_positive_weight: f64,
    /// Chance boost per 100 points of negative morality.
    pub morality_negative_weight: f64,
    /// A moral choice younger than this counts as "recent".
    pub recent_moral_choice_ms: i64,
    /// Number of event records kept in history.
    pub history_cap: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            base_chance: 0.1,
            check_interval_ms: 30 * MS_PER_SECOND,
            max_chance: 0.8,
            ramp_ms: 5 * MS_PER_MINUTE,
            ramp_max: 2.0,
            spam_window_ms: 2 * MS_PER_MINUTE,
            spam_limit: 2,
            spam_damper: 0.5,
            morality_positive_weight: 0.5,
            morality_negative_weight: 0.75,
            recent_moral_choice_ms: 10 * MS_PER_MINUTE,
            history_cap: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub starting: ResourceBag,
    pub caps: ResourceBag,
    /// Cap for resources missing from `caps`.
    pub default_cap: f64,
    /// Base generation per second.
    pub base_production: ResourceBag,
    /// A resource below this fraction of its cap counts as "low".
    pub low_fraction: f64,
    /// Total effective production per second that counts as "high".
    pub high_production_threshold: f64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            starting: bag([
                ("processing", 100.0),
                ("energy", 100.0),
                ("data", 50.0),
                ("influence", 10.0),
                ("credits", 200.0),
            ]),
            caps: bag([
                ("processing", 10_000.0),
                ("energy", 10_000.0),
                ("data", 5_000.0),
                ("influence", 1_000.0),
                ("credits", 100_000.0),
            ]),
            default_cap: 1_000_000.0,
            base_production: bag([
                ("processing", 1.0),
                ("energy", 0.8),
                ("data", 0.3),
                ("credits", 0.5),
            ]),
            low_fraction: 0.1,
            high_production_threshold: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Timezone used to derive the current season.
    pub timezone: Tz,
    pub starting_scale: Scale,
    pub starting_controlled_systems: u32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            starting_scale: Scale::Local,
            starting_controlled_systems: 1,
        }
    }
}
