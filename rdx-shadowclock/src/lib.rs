//! # Shadowclock
//!
//! A tick-scheduled simulation core for an incremental stealth game.
//!
//! Shadowclock computes the next state of the game given elapsed time and
//! player actions, and tells observers about every transition. It does not
//! render anything; a front-end (see `rdx-shadowshell`) drives it and listens.
//!
//! ## Core Concepts
//!
//! - **EventBus**: string-topic publish/subscribe with a synchronous `emit`
//!   and a deferred `queue` that is flushed at the start of every tick.
//!   Subsystems talk to each other only through it (or public methods).
//! - **Scheduler**: named update functions run once per tick in ascending
//!   priority order, each behind its own fault boundary and time budget.
//! - **HeatEngine**: the detection-risk meter. Passive accrual, paid reduction
//!   methods, compounding modifiers, threshold alerts and the Purge reset.
//! - **RandomEventEngine**: condition-gated, rarity-weighted random events
//!   with choices, durations and delayed follow-ups.
//! - **GameState**: a path-addressed JSON store. Every subsystem claims its
//!   own namespace and can only write there.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use shadowclock::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // 1. Load configuration (defaults, then SHADOWCLOCK__* env overrides).
//!     let config = ShadowclockConfig::load(None)?;
//!
//!     // 2. Build the application context.
//!     let engine = ShadowclockEngine::new(config)?;
//!
//!     // 3. Listen to bus topics before starting.
//!     engine.bus().on(topics::HEAT_PURGE, |event| {
//!         println!("Purged: {}", event.data);
//!         Ok(())
//!     }, None);
//!
//!     // 4. Run until Ctrl+C.
//!     engine.run().await?;
//!     Ok(())
//! }
//! ```

pub const ENGINE_NAME: &str = "Shadowclock";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod bus;
pub mod common;
pub mod config;
pub mod economy;
pub mod engine;
pub mod error;
pub mod events;
pub mod heat;
pub mod ledger;
pub mod modifiers;
pub mod random_events;
pub mod scheduler;
pub mod state;
pub mod upgrades;
pub mod world;

pub use error::{Result, ShadowError};

/// A prelude module for easy importing of the most common Shadowclock types.
pub mod prelude {
    pub use crate::bus::{BusEvent, EmitOptions, EventBus, ScopedEmitter, Subscription};
    pub use crate::common::{HeatLevel, ListenerId, ResourceBag, Scale, Season, SystemId};
    pub use crate::config::{ClockResolution, ShadowclockConfig};
    pub use crate::engine::ShadowclockEngine;
    pub use crate::events::topics;
    pub use crate::heat::HeatEngine;
    pub use crate::ledger::{Ledger, ResourceLedger};
    pub use crate::random_events::RandomEventEngine;
    pub use crate::scheduler::{priority, Scheduler, SystemRegistry};
    pub use crate::state::{GameState, NamespaceWriter};
    pub use crate::{Result, ShadowError};
}
