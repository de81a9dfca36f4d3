//! The purge transition: loss and recovery arithmetic, and the bonus table
//! keyed by backup quality.

use crate::common::{MS_PER_HOUR, MS_PER_MINUTE};
use crate::modifiers::Modifier;
use serde::{Deserialize, Serialize};

pub const MIN_LOSS_RATE: f64 = 0.1;
pub const MAX_RECOVERY_RATE: f64 = 0.9;

pub const PROCESSING_BONUS_ID: &str = "purge_processing_bonus";
pub const IMMUNITY_ID: &str = "purge_immunity";
pub const TEMPORAL_PREDICTION_ID: &str = "temporal_prediction";
pub const HEAT_RESISTANCE_ID: &str = "purge_heat_resistance";

/// Bonuses granted by one purge, as durations relative to the purge time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PurgeBonuses {
    /// Extra processing output, e.g. 0.25 for +25%.
    pub processing_bonus: f64,
    pub processing_duration_ms: i64,
    pub immunity_ms: i64,
    pub temporal_prediction_ms: i64,
    /// Multiplier on heat generation while it lasts.
    pub heat_resistance: f64,
    pub heat_resistance_ms: i64,
}

impl PurgeBonuses {
    pub fn is_empty(&self) -> bool {
        self.processing_bonus == 0.0
            && self.immunity_ms == 0
            && self.temporal_prediction_ms == 0
            && self.heat_resistance_ms == 0
    }

    /// The status flags (immunity, temporal prediction) as modifiers.
    pub fn status_modifiers(&self, now: i64) -> Vec<(&'static str, Modifier)> {
        let mut out = Vec::new();
        if self.immunity_ms > 0 {
            out.push((IMMUNITY_ID, Modifier::timed(1.0, now, self.immunity_ms, "purge")));
        }
        if self.temporal_prediction_ms > 0 {
            out.push((
                TEMPORAL_PREDICTION_ID,
                Modifier::timed(1.0, now, self.temporal_prediction_ms, "purge"),
            ));
        }
        out
    }

    /// The heat-generation modifier, if this tier grants one.
    pub fn generation_modifier(&self, now: i64) -> Option<Modifier> {
        (self.heat_resistance_ms > 0).then(|| {
            Modifier::timed(self.heat_resistance, now, self.heat_resistance_ms, "purge")
        })
    }

    /// The processing modifier, with `1 + bonus` as its multiplier.
    pub fn processing_modifier(&self, now: i64) -> Option<Modifier> {
        (self.processing_bonus > 0.0).then(|| {
            Modifier::timed(
                1.0 + self.processing_bonus,
                now,
                self.processing_duration_ms,
                "purge",
            )
        })
    }
}

/// Bonus table indexed by backup quality. Quality above the table uses the last row.
pub const BONUS_TIERS: [PurgeBonuses; 5] = [
    PurgeBonuses {
        processing_bonus: 0.0,
        processing_duration_ms: 0,
        immunity_ms: 0,
        temporal_prediction_ms: 0,
        heat_resistance: 1.0,
        heat_resistance_ms: 0,
    },
    PurgeBonuses {
        processing_bonus: 0.0,
        processing_duration_ms: 0,
        immunity_ms: 0,
        temporal_prediction_ms: 0,
        heat_resistance: 1.0,
        heat_resistance_ms: 0,
    },
    PurgeBonuses {
        processing_bonus: 0.25,
        processing_duration_ms: MS_PER_HOUR,
        immunity_ms: 0,
        temporal_prediction_ms: 0,
        heat_resistance: 1.0,
        heat_resistance_ms: 0,
    },
    PurgeBonuses {
        processing_bonus: 0.25,
        processing_duration_ms: MS_PER_HOUR,
        immunity_ms: 30 * MS_PER_MINUTE,
        temporal_prediction_ms: 0,
        heat_resistance: 1.0,
        heat_resistance_ms: 0,
    },
    PurgeBonuses {
        processing_bonus: 0.5,
        processing_duration_ms: MS_PER_HOUR,
        immunity_ms: 0,
        temporal_prediction_ms: MS_PER_HOUR,
        heat_resistance: 0.5,
        heat_resistance_ms: 2 * MS_PER_HOUR,
    },
];

pub fn bonuses_for(quality: u8) -> PurgeBonuses {
    let index = usize::from(quality).min(BONUS_TIERS.len() - 1);
    BONUS_TIERS[index]
}

/// `roll - quality * 0.1`, floored at 0.1.
pub fn loss_rate(roll: f64, quality: u8) -> f64 {
    (roll - f64::from(quality) * 0.1).max(MIN_LOSS_RATE)
}

/// `quality * 0.2`, capped at 0.9.
pub fn recovery_rate(quality: u8) -> f64 {
    (f64::from(quality) * 0.2).min(MAX_RECOVERY_RATE)
}

/// New amount after losing `floor(amount * loss)` and getting back
/// `floor(lost * recovery)` of it.
pub fn apply_loss(amount: f64, loss: f64, recovery: f64) -> f64 {
    let lost = (amount * loss).floor();
    let recovered = (lost * recovery).floor();
    amount - lost + recovered
}

pub fn reset_heat(purge_heat_reduction: f64, quality: u8) -> f64 {
    (100.0 - (purge_heat_reduction + f64::from(quality) * 5.0)).max(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeRecord {
    pub timestamp: i64,
    #[serde(default = "full_heat")]
    pub heat_level: f64,
    #[serde(default)]
    pub backup_quality: u8,
    #[serde(default)]
    pub resource_loss_rate: f64,
    #[serde(default)]
    pub recovery_rate: f64,
    #[serde(default)]
    pub bonuses: PurgeBonuses,
}

fn full_heat() -> f64 {
    100.0
}
