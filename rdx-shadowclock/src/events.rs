//! Defines the public bus topics and their payload shapes.
//!
//! The topic name and the payload field names are the wire contract between
//! the core and its observers. Payloads travel as `serde_json::Value` so that
//! front-ends can consume them without linking against these types, but every
//! topic published by the core has a typed struct here that produces it.

use crate::common::ResourceBag;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

/// String constants for every topic the core publishes or handles.
pub mod topics {
    // --- Lifecycle ---
    pub const ENGINE_STARTED: &str = "engine:started";
    pub const ENGINE_STOPPED: &str = "engine:stopped";
    pub const GAME_LOADED: &str = "game:loaded";
    pub const GAME_SAVED: &str = "game:saved";

    // --- Heat ---
    pub const HEAT_INCREASED: &str = "heat:increased";
    pub const HEAT_DECREASED: &str = "heat:decreased";
    pub const HEAT_ALERT: &str = "heat:alert";
    pub const HEAT_PURGE: &str = "heat:purge";
    pub const REDUCTION_TOGGLED: &str = "heat:reduction_toggled";
    pub const REDUCTION_DEACTIVATED: &str = "heat:reduction_deactivated";
    pub const REDUCTION_UNLOCKED: &str = "heat:reduction_unlocked";

    // --- Upgrades & resources ---
    pub const UPGRADE_PURCHASED: &str = "upgrade:purchased";
    pub const PRODUCTION_MODIFIER_REQUESTED: &str = "resources:production_modifier";
    pub const PROCESSING_BONUS_GRANTED: &str = "resources:processing_bonus";

    // --- World requests ---
    pub const MORALITY_CHANGE_REQUESTED: &str = "morality:change_requested";
    pub const REPUTATION_CHANGE_REQUESTED: &str = "reputation:change_requested";
    pub const EXPANSION_UNLOCK_REQUESTED: &str = "expansion:unlock_requested";
    pub const EXPANSION_UNLOCKED: &str = "expansion:unlocked";
    pub const CONSTRUCTION_MODIFY_REQUESTED: &str = "construction:modify_requested";
    pub const CONSTRUCTION_CANCEL_REQUESTED: &str = "construction:cancel_requested";

    // --- Random events ---
    pub const EVENT_TRIGGERED: &str = "event:triggered";
    pub const EVENT_CHOICE_REQUIRED: &str = "event:choice_required";
    pub const EVENT_RESOLVED: &str = "event:resolved";
    pub const EVENT_ENDED: &str = "event:ended";

    // --- UI ---
    pub const NOTIFICATION: &str = "ui:notification";
    pub const UI_REFRESH: &str = "ui:refresh";
}

/// Serializes a payload struct into the value carried on the bus.
pub fn payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|err| {
        error!(error = %err, "Failed to encode bus payload.");
        Value::Null
    })
}

/// Payload of `heat:increased` and `heat:decreased`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatChanged {
    pub amount: f64,
    pub total: f64,
    pub source: String,
    pub reason: String,
}

/// Payload of `heat:alert`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatAlert {
    pub threshold: u32,
    pub heat: f64,
    pub level: String,
}

/// Payload of `heat:reduction_toggled`, `heat:reduction_deactivated` and
/// `heat:reduction_unlocked`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReductionChanged {
    pub method_id: String,
    pub name: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of `upgrade:purchased`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePurchased {
    pub upgrade_id: String,
    #[serde(default)]
    pub cost: ResourceBag,
}

/// Payload of `resources:production_modifier`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionModifier {
    pub resource: String,
    pub multiplier: f64,
    pub source: String,
}

/// Payload of `resources:processing_bonus`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingBonus {
    pub multiplier: f64,
    pub expiry: Option<i64>,
    pub source: String,
}

/// Payload of `morality:change_requested`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoralityChange {
    pub amount: f64,
    pub reason: String,
}

/// Payload of `reputation:change_requested`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationChange {
    pub faction: String,
    pub amount: f64,
    pub reason: String,
}

/// Payload of `expansion:unlock_requested` and `expansion:unlocked`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionUnlock {
    pub expansion: String,
    pub source: String,
}

/// Payload of `construction:modify_requested`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructionModify {
    pub multiplier: f64,
    pub duration_ms: Option<i64>,
    pub source: String,
}

/// Payload of `construction:cancel_requested`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructionCancel {
    pub project: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Danger,
}

/// Payload of `ui:notification`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    pub severity: Severity,
}

impl Notification {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}
