//! Upgrade ownership: the registry that records purchases and the read-only
//! query other subsystems use to gate features on them.

use crate::bus::EventBus;
use crate::common::ResourceBag;
use crate::error::{Result, ShadowError};
use crate::events::{self, topics, UpgradePurchased};
use crate::ledger::Ledger;
use crate::state::{GameState, NamespaceWriter};
use serde_json::Value;
use tracing::info;

/// Answers "is upgrade X purchased?".
pub trait UpgradeQuery: Send + Sync {
    fn is_purchased(&self, upgrade_id: &str) -> bool;
}

/// Null object for contexts with no upgrade system.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUpgrades;

impl UpgradeQuery for NoUpgrades {
    fn is_purchased(&self, _upgrade_id: &str) -> bool {
        false
    }
}

/// Reads ownership from `upgrades.purchased` in the state store.
#[derive(Debug, Clone)]
pub struct StateUpgrades {
    state: GameState,
}

impl StateUpgrades {
    pub fn new(state: GameState) -> Self {
        Self { state }
    }
}

fn purchased_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

impl UpgradeQuery for StateUpgrades {
    fn is_purchased(&self, upgrade_id: &str) -> bool {
        purchased_list(self.state.get("upgrades.purchased"))
            .iter()
            .any(|owned| owned == upgrade_id)
    }
}

/// Owns the `upgrades` namespace.
#[derive(Debug)]
pub struct UpgradeRegistry {
    writer: NamespaceWriter,
    bus: EventBus,
}

impl UpgradeRegistry {
    pub fn new(writer: NamespaceWriter, bus: EventBus) -> Self {
        if writer.get("purchased").is_none() {
            writer.set("purchased", Value::Array(Vec::new()));
        }
        Self { writer, bus }
    }

    pub fn purchased(&self) -> Vec<String> {
        purchased_list(self.writer.get("purchased"))
    }

    /// Spends `cost` and records the upgrade. Queues `upgrade:purchased`.
    pub fn purchase(
        &self,
        upgrade_id: &str,
        cost: &ResourceBag,
        ledger: &dyn Ledger,
    ) -> Result<()> {
        if self.is_purchased(upgrade_id) {
            return Err(ShadowError::AlreadyPurchased(upgrade_id.to_string()));
        }
        if !ledger.spend(cost, &format!("upgrade:{upgrade_id}")) {
            return Err(ShadowError::InsufficientResources(upgrade_id.to_string()));
        }
        self.record(upgrade_id, cost.clone());
        Ok(())
    }

    /// Records the upgrade without charging for it.
    pub fn grant(&self, upgrade_id: &str) -> bool {
        if self.is_purchased(upgrade_id) {
            return false;
        }
        self.record(upgrade_id, ResourceBag::new());
        true
    }

    fn record(&self, upgrade_id: &str, cost: ResourceBag) {
        let mut owned = self.purchased();
        owned.push(upgrade_id.to_string());
        self.writer.set(
            "purchased",
            Value::Array(owned.into_iter().map(Value::String).collect()),
        );
        info!(upgrade_id, "Upgrade purchased.");
        self.bus.queue(
            topics::UPGRADE_PURCHASED,
            events::payload(&UpgradePurchased {
                upgrade_id: upgrade_id.to_string(),
                cost,
            }),
        );
    }
}

impl UpgradeQuery for UpgradeRegistry {
    fn is_purchased(&self, upgrade_id: &str) -> bool {
        self.purchased().iter().any(|owned| owned == upgrade_id)
    }
}
