use anyhow::Result;
use shadowclock::common::{bag, MS_PER_MINUTE};
use shadowclock::config::{ClockConfig, ClockResolution};
use shadowclock::prelude::*;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging. RUST_LOG overrides the default level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // 2. Load configuration from an optional path plus SHADOWCLOCK__* overrides.
    let path = std::env::args().nth(1).map(PathBuf::from);
    let mut config = ShadowclockConfig::load(path.as_deref())?;
    if path.is_none() {
        config.clock = ClockConfig {
            resolution: ClockResolution::Medium,
        };
    }

    // 3. Create the engine.
    let engine = ShadowclockEngine::new(config)?;

    // 4. Log the interesting bus traffic.
    register_event_loggers(&engine);

    // 5. Seed a little activity so the dev loop has something to show.
    seed_demo_state(&engine);

    // 6. Run the engine.
    engine.run().await?;

    info!(stats = ?engine.statistics().counters(), "Session summary.");
    Ok(())
}

/// Subscribes a logger to each topic group.
fn register_event_loggers(engine: &ShadowclockEngine) {
    let bus = engine.bus();
    for topic in [
        topics::ENGINE_STARTED,
        topics::ENGINE_STOPPED,
        topics::GAME_SAVED,
        topics::GAME_LOADED,
    ] {
        bus.on(
            topic,
            |event| {
                info!("[ENGINE] => {} {}", event.topic, event.data);
                Ok(())
            },
            Some("shadowdev"),
        );
    }

    for topic in [
        topics::HEAT_ALERT,
        topics::HEAT_PURGE,
        topics::REDUCTION_TOGGLED,
        topics::REDUCTION_DEACTIVATED,
        topics::REDUCTION_UNLOCKED,
    ] {
        bus.on(
            topic,
            |event| {
                info!("[HEAT] => {} {}", event.topic, event.data);
                Ok(())
            },
            Some("shadowdev"),
        );
    }

    for topic in [
        topics::EVENT_TRIGGERED,
        topics::EVENT_CHOICE_REQUIRED,
        topics::EVENT_RESOLVED,
        topics::EVENT_ENDED,
    ] {
        bus.on(
            topic,
            |event| {
                let id = event.data.pointer("/event/id").and_then(|v| v.as_str());
                info!("[EVENT] => {} {}", event.topic, id.unwrap_or("?"));
                Ok(())
            },
            Some("shadowdev"),
        );
    }

    bus.on(
        topics::NOTIFICATION,
        |event| {
            let message = event.data.get("message").and_then(|v| v.as_str());
            info!("[UI] => {}", message.unwrap_or_default());
            Ok(())
        },
        Some("shadowdev"),
    );
}

/// Turns on the starter reduction method and adds a spike of heat.
fn seed_demo_state(engine: &ShadowclockEngine) {
    let now = engine.now();
    if let Err(err) = engine.toggle_reduction("proxy_rotation") {
        warn!(error = %err, "Could not start proxy rotation.");
    }
    engine
        .heat()
        .increase_heat(35.0, "shadowdev", "demo spike", now);
    if let Err(err) = engine.purchase_upgrade("backup_local", &bag([("credits", 50.0)])) {
        warn!(error = %err, "Could not buy the first backup tier.");
    }
    info!(
        check_every_min = engine.config().events.check_interval_ms as f64 / MS_PER_MINUTE as f64,
        "Demo state seeded."
    );
}
