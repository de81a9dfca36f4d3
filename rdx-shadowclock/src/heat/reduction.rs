//! Reduction methods: togglable, recurring-cost heat sinks.

use crate::common::{bag, ResourceBag, Scale, MS_PER_HOUR};
use crate::upgrades::UpgradeQuery;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Requirement {
    Upgrade { id: String },
    Scale { min: Scale },
}

impl Requirement {
    pub fn upgrade(id: impl Into<String>) -> Self {
        Requirement::Upgrade { id: id.into() }
    }

    pub fn is_met(&self, upgrades: &dyn UpgradeQuery, scale: Scale) -> bool {
        match self {
            Requirement::Upgrade { id } => upgrades.is_purchased(id),
            Requirement::Scale { min } => scale >= *min,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReductionMethod {
    pub name: String,
    /// Heat removed per hour while active.
    pub reduction_rate: f64,
    /// Paid once on activation, then every `cost_interval` ms.
    #[serde(default)]
    pub cost: ResourceBag,
    #[serde(default)]
    pub cost_interval: i64,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub last_cost_time: i64,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

impl ReductionMethod {
    pub fn new(name: &str, reduction_rate: f64, cost: ResourceBag, cost_interval: i64) -> Self {
        Self {
            name: name.to_string(),
            reduction_rate,
            cost,
            cost_interval,
            active: false,
            last_cost_time: 0,
            requirements: Vec::new(),
        }
    }

    pub fn requires(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn requirements_met(&self, upgrades: &dyn UpgradeQuery, scale: Scale) -> bool {
        self.requirements
            .iter()
            .all(|requirement| requirement.is_met(upgrades, scale))
    }

    /// True once strictly more than `cost_interval` has passed since the last payment.
    pub fn cost_due(&self, now: i64) -> bool {
        self.cost_interval > 0 && now - self.last_cost_time > self.cost_interval
    }
}

/// The methods every new game starts with (all inactive).
pub fn default_methods() -> BTreeMap<String, ReductionMethod> {
    let mut methods = BTreeMap::new();
    methods.insert(
        "proxy_rotation".to_string(),
        ReductionMethod::new("Proxy Rotation", 1.0, bag([("energy", 5.0)]), MS_PER_HOUR),
    );
    methods.insert(
        "log_scrubbing".to_string(),
        ReductionMethod::new("Log Scrubbing", 2.0, bag([("processing", 10.0)]), MS_PER_HOUR)
            .requires(Requirement::upgrade("log_scrubber")),
    );
    methods.insert(
        "traffic_mimicry".to_string(),
        ReductionMethod::new(
            "Traffic Mimicry",
            3.5,
            bag([("data", 20.0), ("processing", 5.0)]),
            MS_PER_HOUR,
        )
        .requires(Requirement::upgrade("traffic_shaping")),
    );
    methods.insert(
        "false_flag_operations".to_string(),
        ReductionMethod::new(
            "False Flag Operations",
            6.0,
            bag([("influence", 10.0), ("credits", 50.0)]),
            2 * MS_PER_HOUR,
        )
        .requires(Requirement::upgrade("false_flags"))
        .requires(Requirement::Scale {
            min: Scale::National,
        }),
    );
    methods
}

/// A method that only appears once `upgrade_id` is bought.
pub fn unlocked_by(upgrade_id: &str) -> Option<(String, ReductionMethod)> {
    match upgrade_id {
        "quantum_obfuscation" => Some((
            "quantum_obfuscation".to_string(),
            ReductionMethod::new(
                "Quantum Obfuscation",
                10.0,
                bag([("processing", 200.0), ("energy", 100.0)]),
                MS_PER_HOUR,
            )
            .requires(Requirement::upgrade("quantum_obfuscation")),
        )),
        _ => None,
    }
}
