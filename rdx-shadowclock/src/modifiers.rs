//! Time-bounded multiplicative modifiers.
//!
//! A `ModifierSet` holds modifiers keyed by id. Expiry is never polled: the
//! set evicts expired entries the next time it is read through `combined` or
//! `active`, so a modifier simply stops counting once `now > expiry`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modifier {
    pub multiplier: f64,
    /// Absolute expiry in epoch milliseconds; `None` never expires.
    #[serde(default)]
    pub expiry: Option<i64>,
    #[serde(default)]
    pub source: String,
}

impl Modifier {
    pub fn new(multiplier: f64, expiry: Option<i64>, source: impl Into<String>) -> Self {
        Self {
            multiplier,
            expiry,
            source: source.into(),
        }
    }

    pub fn permanent(multiplier: f64, source: impl Into<String>) -> Self {
        Self::new(multiplier, None, source)
    }

    /// Lasts `duration_ms` from `now`.
    pub fn timed(multiplier: f64, now: i64, duration_ms: i64, source: impl Into<String>) -> Self {
        Self::new(multiplier, Some(now + duration_ms), source)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expiry, Some(expiry) if now > expiry)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModifierSet {
    entries: BTreeMap<String, Modifier>,
}

impl ModifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the modifier with `id`.
    pub fn insert(&mut self, id: impl Into<String>, modifier: Modifier) -> Option<Modifier> {
        self.entries.insert(id.into(), modifier)
    }

    pub fn remove(&mut self, id: &str) -> Option<Modifier> {
        self.entries.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Modifier> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Modifier)> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops every entry whose expiry has passed.
    pub fn evict_expired(&mut self, now: i64) {
        self.entries.retain(|_, modifier| !modifier.is_expired(now));
    }

    /// Evicts expired entries, then returns the product of the survivors.
    ///
    /// An empty set yields `1.0`.
    pub fn combined(&mut self, now: i64) -> f64 {
        self.evict_expired(now);
        self.entries.values().map(|m| m.multiplier).product()
    }

    /// Evicts expired entries, then returns the modifier with `id` if it survives.
    pub fn active(&mut self, id: &str, now: i64) -> Option<&Modifier> {
        self.evict_expired(now);
        self.entries.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn modifiers_compound_and_expire_lazily() {
        let mut set = ModifierSet::new();
        set.insert("dampener", Modifier::new(0.5, Some(1_000), "test"));
        set.insert("spike", Modifier::permanent(2.0, "test"));

        assert_eq!(set.combined(500), 1.0);
        // Expiry is inclusive of the expiry instant itself.
        assert_eq!(set.combined(1_000), 1.0);
        assert_eq!(set.len(), 2);

        assert_eq!(set.combined(1_001), 2.0);
        assert_eq!(set.len(), 1);
        assert!(set.get("dampener").is_none());
    }

    #[test]
    fn empty_set_is_neutral() {
        assert_eq!(ModifierSet::new().combined(0), 1.0);
    }

    #[test]
    fn active_honours_expiry() {
        let mut set = ModifierSet::new();
        set.insert("shield", Modifier::timed(1.0, 0, 100, "purge"));
        assert!(set.active("shield", 100).is_some());
        assert!(set.active("shield", 101).is_none());
        assert!(set.is_empty());
    }

    proptest! {
        #[test]
        fn combined_is_the_product_of_live_multipliers(
            multipliers in prop::collection::vec(0.1f64..4.0, 0..8),
            expiries in prop::collection::vec(prop::option::of(0i64..200), 8),
            now in 0i64..200,
        ) {
            let mut set = ModifierSet::new();
            let mut expected = 1.0;
            for (i, multiplier) in multipliers.iter().enumerate() {
                let expiry = expiries[i];
                set.insert(format!("m{i}"), Modifier::new(*multiplier, expiry, "prop"));
                if !matches!(expiry, Some(e) if now > e) {
                    expected *= multiplier;
                }
            }
            let combined = set.combined(now);
            prop_assert!((combined - expected).abs() <= 1e-9 * expected.max(1.0));
        }
    }
}
