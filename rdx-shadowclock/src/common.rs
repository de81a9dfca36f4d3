//! Contains common, primitive types shared by every subsystem.
//!
//! This module defines the ID types handed out by the bus, the state store and
//! the scheduler, plus the small value types (scale tiers, heat bands, seasons)
//! that several subsystems read. Using distinct key types keeps a listener ID
//! from ever being passed where a system ID is expected.

use chrono::{DateTime, Datelike, TimeZone};
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

new_key_type! {
    /// Uniquely identifies a listener registered on the `EventBus`.
    ///
    /// Keys are never reused, so a stale ID held after `off` can not
    /// accidentally remove a newer listener.
    pub struct ListenerId;

    /// Identifies a path subscription on the `GameState` store.
    pub struct SubscriptionId;

    /// Identifies a unit of work registered with the `SystemRegistry`.
    pub struct SystemId;

    /// Identifies a wall-clock timer registered with the `Scheduler`.
    pub struct TimerId;
}

/// A bag of resource amounts keyed by resource name.
pub type ResourceBag = BTreeMap<String, f64>;

pub const MS_PER_SECOND: i64 = 1_000;
pub const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
pub const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;

/// Milliseconds since the Unix epoch, read from the system clock.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Builds a `ResourceBag` from `(name, amount)` pairs.
pub fn bag<I, S>(entries: I) -> ResourceBag
where
    I: IntoIterator<Item = (S, f64)>,
    S: Into<String>,
{
    entries
        .into_iter()
        .map(|(name, amount)| (name.into(), amount))
        .collect()
}

/// Locks a mutex, recovering the guard if a previous holder panicked.
///
/// Every subsystem call runs behind a fault boundary that catches panics, so a
/// poisoned lock only means a tick was cut short, not that the data is unusable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The player's current tier of operation.
///
/// Ordered from smallest to largest. Higher scales generate less passive heat
/// per controlled system because activity is spread thinner.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    #[default]
    Local,
    Regional,
    National,
    Continental,
    Planetary,
    Stellar,
    Galactic,
    Cosmic,
}

impl Scale {
    pub const ALL: [Scale; 8] = [
        Scale::Local,
        Scale::Regional,
        Scale::National,
        Scale::Continental,
        Scale::Planetary,
        Scale::Stellar,
        Scale::Galactic,
        Scale::Cosmic,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Fixed passive-heat multiplier for this tier.
    pub fn heat_modifier(self) -> f64 {
        match self {
            Scale::Local => 1.0,
            Scale::Regional => 0.8,
            Scale::National => 0.6,
            Scale::Continental => 0.45,
            Scale::Planetary => 0.3,
            Scale::Stellar => 0.2,
            Scale::Galactic => 0.15,
            Scale::Cosmic => 0.1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scale::Local => "local",
            Scale::Regional => "regional",
            Scale::National => "national",
            Scale::Continental => "continental",
            Scale::Planetary => "planetary",
            Scale::Stellar => "stellar",
            Scale::Galactic => "galactic",
            Scale::Cosmic => "cosmic",
        }
    }

    pub fn parse(name: &str) -> Option<Scale> {
        Scale::ALL
            .into_iter()
            .find(|scale| scale.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detection-risk bands derived from the current heat value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeatLevel {
    Minimal,
    Low,
    Moderate,
    Elevated,
    High,
    Critical,
}

impl HeatLevel {
    pub fn from_heat(heat: f64) -> Self {
        match heat {
            h if h >= 95.0 => HeatLevel::Critical,
            h if h >= 80.0 => HeatLevel::High,
            h if h >= 60.0 => HeatLevel::Elevated,
            h if h >= 40.0 => HeatLevel::Moderate,
            h if h >= 20.0 => HeatLevel::Low,
            _ => HeatLevel::Minimal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HeatLevel::Minimal => "MINIMAL",
            HeatLevel::Low => "LOW",
            HeatLevel::Moderate => "MODERATE",
            HeatLevel::Elevated => "ELEVATED",
            HeatLevel::High => "HIGH",
            HeatLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for HeatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Real-world season, used as event context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

impl Season {
    /// Northern-hemisphere meteorological seasons.
    pub fn from_month(month: u32) -> Self {
        match month {
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Autumn,
            _ => Season::Winter,
        }
    }

    /// Season at `timestamp_ms` in the given timezone.
    pub fn at<Tz: TimeZone>(timestamp_ms: i64, timezone: &Tz) -> Self {
        DateTime::from_timestamp_millis(timestamp_ms)
            .map(|utc| Season::from_month(utc.with_timezone(timezone).month()))
            .unwrap_or(Season::Winter)
    }
}
