//! Chance shaping and rarity-weighted roulette.

use super::catalog::EventDefinition;
use crate::config::EventConfig;
use rand::Rng;

/// Inputs to the per-check probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChanceInputs {
    pub base_chance: f64,
    pub morality: f64,
    /// Time since the last event fired (or since the session began).
    pub since_last_event_ms: i64,
    /// Events fired inside the anti-spam window.
    pub recent_events: usize,
}

pub fn event_chance(config: &EventConfig, inputs: &ChanceInputs) -> f64 {
    let morality = inputs.morality.clamp(-100.0, 100.0);
    let positive = 1.0 + config.morality_positive_weight * morality.max(0.0) / 100.0;
    let negative = 1.0 + config.morality_negative_weight * (-morality).max(0.0) / 100.0;

    let ramp = if config.ramp_ms > 0 {
        (inputs.since_last_event_ms.max(0) as f64 / config.ramp_ms as f64).min(1.0)
    } else {
        1.0
    };
    let time = 1.0 + (config.ramp_max - 1.0) * ramp;

    let mut chance = inputs.base_chance * positive * negative * time;
    if inputs.recent_events > config.spam_limit {
        chance *= config.spam_damper;
    }
    if chance.is_nan() {
        return 0.0;
    }
    chance.clamp(0.0, config.max_chance)
}

/// Rarity weight, scaled by the event's morality influence if it has one.
pub fn selection_weight(event: &EventDefinition, morality: f64) -> f64 {
    let base = event.rarity.weight();
    match event.morality_influence {
        Some(influence) => base * (1.0 + influence * morality / 100.0).max(0.0),
        None => base,
    }
}

/// Walks cumulative weights until `roll` (in `[0, total)`) falls inside one.
///
/// Non-positive weights never win. Returns `None` if nothing can be picked.
pub fn pick_index(weights: &[f64], roll: f64) -> Option<usize> {
    let mut cumulative = 0.0;
    let mut last_live = None;
    for (index, weight) in weights.iter().enumerate() {
        if *weight <= 0.0 || !weight.is_finite() {
            continue;
        }
        cumulative += weight;
        last_live = Some(index);
        if roll < cumulative {
            return Some(index);
        }
    }
    // Float drift at the upper edge lands on the last live entry.
    last_live
}

pub fn select_weighted<R: Rng + ?Sized>(rng: &mut R, weights: &[f64]) -> Option<usize> {
    let total: f64 = weights
        .iter()
        .filter(|weight| weight.is_finite() && **weight > 0.0)
        .sum();
    if total <= 0.0 {
        return None;
    }
    let roll = rng.gen::<f64>() * total;
    pick_index(weights, roll)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random_events::catalog::Rarity;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn inputs(since: i64, recent: usize) -> ChanceInputs {
        ChanceInputs {
            base_chance: 0.1,
            morality: 0.0,
            since_last_event_ms: since,
            recent_events: recent,
        }
    }

    #[test]
    fn chance_ramps_over_five_minutes() {
        let config = EventConfig::default();
        assert!((event_chance(&config, &inputs(0, 0)) - 0.1).abs() < 1e-12);
        assert!((event_chance(&config, &inputs(150_000, 0)) - 0.15).abs() < 1e-12);
        assert!((event_chance(&config, &inputs(300_000, 0)) - 0.2).abs() < 1e-12);
        assert!((event_chance(&config, &inputs(3_000_000, 0)) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn spam_damper_and_clamp() {
        let config = EventConfig::default();
        assert!((event_chance(&config, &inputs(0, 2)) - 0.1).abs() < 1e-12);
        assert!((event_chance(&config, &inputs(0, 3)) - 0.05).abs() < 1e-12);

        let greedy = ChanceInputs {
            base_chance: 5.0,
            ..inputs(0, 0)
        };
        assert_eq!(event_chance(&config, &greedy), 0.8);
    }

    #[test]
    fn morality_extremes_both_raise_the_chance() {
        let config = EventConfig::default();
        let saint = ChanceInputs {
            morality: 100.0,
            ..inputs(0, 0)
        };
        let villain = ChanceInputs {
            morality: -100.0,
            ..inputs(0, 0)
        };
        assert!((event_chance(&config, &saint) - 0.15).abs() < 1e-12);
        assert!((event_chance(&config, &villain) - 0.175).abs() < 1e-12);
    }

    #[test]
    fn roulette_walks_cumulative_weights() {
        let weights = [10.0, 0.5];
        assert_eq!(pick_index(&weights, 0.0), Some(0));
        assert_eq!(pick_index(&weights, 9.999), Some(0));
        assert_eq!(pick_index(&weights, 10.0), Some(1));
        assert_eq!(pick_index(&weights, 10.5), Some(1));
        assert_eq!(pick_index(&[0.0, 2.0], 0.0), Some(1));
        assert_eq!(pick_index(&[], 0.0), None);
    }

    #[test]
    fn common_beats_legendary_about_twenty_to_one() {
        let weights = [Rarity::Common.weight(), Rarity::Legendary.weight()];
        let mut rng = StdRng::seed_from_u64(42);
        let samples = 100_000;
        let common = (0..samples)
            .filter(|_| select_weighted(&mut rng, &weights) == Some(0))
            .count();
        let share = common as f64 / samples as f64;
        assert!((share - 10.0 / 10.5).abs() < 0.01, "share was {share}");
    }

    #[test]
    fn morality_influence_scales_weight() {
        let mut event = EventDefinition::new("leak", "Leak", Rarity::Uncommon);
        assert_eq!(selection_weight(&event, 80.0), 5.0);
        event.morality_influence = Some(1.0);
        assert_eq!(selection_weight(&event, 50.0), 7.5);
        assert_eq!(selection_weight(&event, -100.0), 0.0);
    }
}
