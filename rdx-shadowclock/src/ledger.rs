//! The resource ledger: amounts, caps and atomic spending.

use crate::common::{lock, ResourceBag};
use crate::state::{BatchOptions, NamespaceWriter};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// What the core needs from a resource store.
pub trait Ledger: Send + Sync {
    /// Current amount of `resource` (0 if unknown).
    fn amount(&self, resource: &str) -> f64;

    /// Cap for `resource`.
    fn cap(&self, resource: &str) -> f64;

    /// True if every entry of `cost` is covered.
    fn can_afford(&self, cost: &ResourceBag) -> bool;

    /// Debits the whole bag or nothing. Returns whether the debit happened.
    fn spend(&self, cost: &ResourceBag, reason: &str) -> bool;

    /// Adds `delta` (may be negative), clamped to `[0, cap]`. Returns the
    /// change actually applied.
    fn add(&self, resource: &str, delta: f64) -> f64;

    fn resource_names(&self) -> Vec<String>;

    /// Rewrites every resource in one atomic batch.
    fn transform_all(&self, f: &mut dyn FnMut(&str, f64) -> f64);

    /// All amounts, keyed by resource name.
    fn snapshot(&self) -> ResourceBag {
        self.resource_names()
            .into_iter()
            .map(|name| {
                let amount = self.amount(&name);
                (name, amount)
            })
            .collect()
    }
}

/// Ledger backed by the `resources` namespace of the state store.
///
/// Amounts live at `resources.<name>`.
#[derive(Clone)]
pub struct ResourceLedger {
    writer: Arc<NamespaceWriter>,
    caps: Arc<ResourceBag>,
    default_cap: f64,
    txn: Arc<Mutex<()>>,
}

impl ResourceLedger {
    /// Seeds the namespace with `starting` amounts (clamped to their caps).
    pub fn new(
        writer: NamespaceWriter,
        starting: &ResourceBag,
        caps: &ResourceBag,
        default_cap: f64,
    ) -> Self {
        let ledger = Self {
            writer: Arc::new(writer),
            caps: Arc::new(caps.clone()),
            default_cap,
            txn: Arc::new(Mutex::new(())),
        };
        let seeded: Vec<(String, Value)> = starting
            .iter()
            .map(|(name, amount)| (name.clone(), json!(ledger.clamp(name, *amount))))
            .collect();
        ledger.writer.batch_update(seeded, BatchOptions { silent: true });
        ledger
    }

    fn clamp(&self, resource: &str, amount: f64) -> f64 {
        if !amount.is_finite() {
            return 0.0;
        }
        amount.clamp(0.0, self.cap(resource))
    }
}

impl Ledger for ResourceLedger {
    fn amount(&self, resource: &str) -> f64 {
        self.writer
            .get(resource)
            .and_then(|value| value.as_f64())
            .unwrap_or(0.0)
    }

    fn cap(&self, resource: &str) -> f64 {
        self.caps.get(resource).copied().unwrap_or(self.default_cap)
    }

    fn can_afford(&self, cost: &ResourceBag) -> bool {
        cost.iter()
            .all(|(name, needed)| self.amount(name) >= *needed)
    }

    fn spend(&self, cost: &ResourceBag, reason: &str) -> bool {
        let _txn = lock(&self.txn);
        if cost.values().any(|amount| *amount < 0.0 || !amount.is_finite()) {
            warn!(reason, ?cost, "Rejected spend with a malformed cost.");
            return false;
        }
        if !self.can_afford(cost) {
            debug!(reason, ?cost, "Cannot afford cost.");
            return false;
        }
        let debits: Vec<(String, Value)> = cost
            .iter()
            .map(|(name, amount)| (name.clone(), json!(self.amount(name) - amount)))
            .collect();
        self.writer.batch_update(debits, BatchOptions::default());
        debug!(reason, ?cost, "Resources spent.");
        true
    }

    fn add(&self, resource: &str, delta: f64) -> f64 {
        if !delta.is_finite() {
            warn!(resource, delta, "Ignored non-finite resource change.");
            return 0.0;
        }
        let _txn = lock(&self.txn);
        let before = self.amount(resource);
        let after = self.clamp(resource, before + delta);
        if after != before {
            self.writer.set(resource, json!(after));
        }
        after - before
    }

    fn resource_names(&self) -> Vec<String> {
        match self.writer.get("") {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn transform_all(&self, f: &mut dyn FnMut(&str, f64) -> f64) {
        let _txn = lock(&self.txn);
        let rewritten: Vec<(String, Value)> = self
            .snapshot()
            .into_iter()
            .map(|(name, amount)| {
                let next = self.clamp(&name, f(&name, amount));
                (name, json!(next))
            })
            .collect();
        self.writer.batch_update(rewritten, BatchOptions::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::bag;
    use crate::state::GameState;

    fn ledger() -> (GameState, ResourceLedger) {
        let state = GameState::new();
        let ledger = ResourceLedger::new(
            state.claim("resources").unwrap(),
            &bag([("energy", 100.0), ("data", 20.0), ("credits", 5_000.0)]),
            &bag([("energy", 500.0), ("data", 50.0), ("credits", 1_000.0)]),
            1_000.0,
        );
        (state, ledger)
    }

    #[test]
    fn seeding_clamps_to_caps() {
        let (state, ledger) = ledger();
        assert_eq!(ledger.amount("credits"), 1_000.0);
        assert_eq!(state.get_f64("resources.energy"), Some(100.0));
        assert_eq!(ledger.amount("unknown"), 0.0);
    }

    #[test]
    fn spend_is_all_or_nothing() {
        let (_, ledger) = ledger();
        assert!(!ledger.spend(&bag([("energy", 10.0), ("data", 30.0)]), "test"));
        assert_eq!(ledger.amount("energy"), 100.0);
        assert_eq!(ledger.amount("data"), 20.0);

        assert!(ledger.spend(&bag([("energy", 10.0), ("data", 20.0)]), "test"));
        assert_eq!(ledger.amount("energy"), 90.0);
        assert_eq!(ledger.amount("data"), 0.0);

        assert!(ledger.spend(&ResourceBag::new(), "free"));
        assert!(!ledger.spend(&bag([("energy", -5.0)]), "refund"));
    }

    #[test]
    fn add_clamps_between_zero_and_cap() {
        let (_, ledger) = ledger();
        assert_eq!(ledger.add("data", 100.0), 30.0);
        assert_eq!(ledger.amount("data"), 50.0);
        assert_eq!(ledger.add("data", -80.0), -50.0);
        assert_eq!(ledger.amount("data"), 0.0);
        assert_eq!(ledger.add("data", f64::NAN), 0.0);
    }

    #[test]
    fn transform_all_rewrites_every_resource() {
        let (_, ledger) = ledger();
        ledger.transform_all(&mut |_, amount| amount / 2.0);
        assert_eq!(
            ledger.snapshot(),
            bag([("credits", 500.0), ("data", 10.0), ("energy", 50.0)])
        );
    }
}
