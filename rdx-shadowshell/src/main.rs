use anyhow::{Context, Result};
use colored::Colorize;
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use shadowclock::common::{now_ms, ResourceBag, MS_PER_SECOND};
use shadowclock::events::Severity;
use shadowclock::prelude::*;
use shadowclock::{ENGINE_NAME, VERSION as LIB_VERSION};
use std::borrow::Cow;
use std::env;
use std::fs;
use tracing::info;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_SAVE: &str = "shadowclock-save.json";
/// Longest stretch a single `tick` command will simulate.
const MAX_TICK_SECONDS: u64 = 6 * 3_600;

/// Rustyline helper that highlights the command word.
#[derive(Completer, Helper, Hinter, Validator)]
struct CommandHighlighter;

impl Highlighter for CommandHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            Cow::Owned(format!("{} {}", command.yellow().bold(), rest.yellow()))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    let rule = "-".repeat(72);
    println!("{}", ENGINE_NAME.to_uppercase().cyan().bold());
    println!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    println!("{}", rule.dimmed());
}

/// Prints notifications and the most relevant bus traffic as it is delivered.
fn register_listeners(engine: &ShadowclockEngine) {
    let bus = engine.bus();
    bus.on(
        topics::NOTIFICATION,
        |event| {
            let message = event.data.get("message").and_then(|v| v.as_str()).unwrap_or("");
            let severity = event.data.get("severity").cloned().unwrap_or_default();
            let severity: Option<Severity> = serde_json::from_value(severity).ok();
            let line = match severity {
                Some(Severity::Danger) => message.red().bold(),
                Some(Severity::Warning) => message.yellow(),
                _ => message.normal(),
            };
            println!("<-- [NOTICE] {}", line);
            Ok(())
        },
        Some("shadowshell"),
    );
    bus.on(
        topics::EVENT_CHOICE_REQUIRED,
        |event| {
            let record = event.data.pointer("/eventRecord/id").and_then(|v| v.as_u64());
            let title = event.data.pointer("/event/title").and_then(|v| v.as_str());
            println!(
                "<-- [CHOICE] #{} {} (use 'events' then 'choose')",
                record.unwrap_or_default(),
                title.unwrap_or("?").magenta()
            );
            Ok(())
        },
        Some("shadowshell"),
    );
    bus.on(
        topics::REDUCTION_UNLOCKED,
        |event| {
            let method = event.data.get("methodId").and_then(|v| v.as_str());
            println!("<-- [HEAT] New reduction method: {}", method.unwrap_or("?").green());
            Ok(())
        },
        Some("shadowshell"),
    );
}

/// Advances the engine in one-second steps.
fn advance(engine: &ShadowclockEngine, now: &mut i64, seconds: u64) {
    for _ in 0..seconds.min(MAX_TICK_SECONDS) {
        *now += MS_PER_SECOND;
        engine.tick(*now);
    }
}

fn print_status(engine: &ShadowclockEngine) {
    let now = engine.now();
    {
        let mut heat = engine.heat();
        let level = heat.heat_level();
        let immune = heat.is_purge_immune(now);
        println!(
            "Heat      {:>6.2}  {}  (purges: {}, backup quality: {}, immune: {})",
            heat.current_heat(),
            level.as_str().bold(),
            heat.total_purges(),
            heat.backups().quality,
            immune
        );
        for (id, method) in heat.reduction_methods() {
            let marker = if method.active { "on ".green() } else { "off".dimmed() };
            println!(
                "  [{}] {:<24} -{:.1}/hr  cost {:?}",
                marker, id, method.reduction_rate, method.cost
            );
        }
    }
    let world = engine.world().data().clone();
    println!(
        "World     scale {}  systems {}  morality {:.0}  game time {}s",
        world.scale,
        world.controlled_systems,
        world.morality,
        world.game_time_ms / MS_PER_SECOND
    );
    println!("Resources");
    for (name, amount) in engine.ledger().snapshot() {
        println!("  {:<12} {:>12.1} / {}", name, amount, engine.ledger().cap(&name));
    }
}

fn print_events(engine: &ShadowclockEngine) {
    let events = engine.random_events();
    let waiting = events.awaiting_choice();
    if waiting.is_empty() {
        println!("No events are waiting for a choice.");
    }
    for (record, event) in waiting {
        println!("#{} {} - {}", record.id, event.title.magenta().bold(), event.description);
        for (index, choice) in event.choices.iter().enumerate() {
            println!("    {}) {}", index, choice.text);
        }
    }
    for active in events.active_events() {
        println!(
            "Active: {} until {}",
            active.event.title.cyan(),
            active.end_time
        );
    }
}

/// Parses `resource=amount` pairs.
fn parse_cost(args: &[&str]) -> Result<ResourceBag> {
    args.iter()
        .map(|pair| -> Result<(String, f64)> {
            let (name, amount) = pair
                .split_once('=')
                .with_context(|| format!("expected resource=amount, got '{pair}'"))?;
            let amount: f64 = amount
                .parse()
                .with_context(|| format!("'{amount}' is not a number"))?;
            Ok((name.to_string(), amount))
        })
        .collect()
}

fn save(engine: &ShadowclockEngine, path: &str) -> Result<()> {
    let document = engine.save_game();
    fs::write(path, serde_json::to_string_pretty(&document)?)
        .with_context(|| format!("could not write {path}"))?;
    Ok(())
}

fn load(engine: &ShadowclockEngine, path: &str) -> Result<bool> {
    let text = fs::read_to_string(path).with_context(|| format!("could not read {path}"))?;
    let document = serde_json::from_str(&text).context("save file is not JSON")?;
    Ok(engine.load_game(&document))
}

fn print_help() {
    println!("Available commands:");
    println!("  tick [S]                  - Advances the simulation S seconds (default 1).");
    println!("  status                    - Shows heat, reduction methods, world and resources.");
    println!("  toggle <METHOD>           - Toggles a heat reduction method.");
    println!("  heat <AMOUNT>             - Adds heat from a player action.");
    println!("  buy <UPGRADE> [R=N ...]   - Buys an upgrade for the given cost.");
    println!("  events                    - Lists events waiting for a choice.");
    println!("  choose <RECORD> <INDEX>   - Answers an event.");
    println!("  trigger <EVENT>           - Fires an event from the catalog.");
    println!("  systems                   - Shows scheduler telemetry.");
    println!("  save [PATH] / load [PATH] - Writes or reads a save file.");
    println!("  exit                      - Quits the shell.");
}

fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let config = ShadowclockConfig::load(None)?;
    let mut now = now_ms();
    let engine = ShadowclockEngine::seeded(config, now, now as u64)?;
    register_listeners(&engine);
    engine.start();
    engine.force_update(now);
    info!("{} ready; time only moves on 'tick'.", ENGINE_NAME.cyan());

    let mut rl = Editor::new()?;
    rl.set_helper(Some(CommandHighlighter));
    println!("Type 'help' for commands or 'exit' to quit.");

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(_) => {
                println!("Exiting shadowshell...");
                break;
            }
        };
        rl.add_history_entry(line.as_str())?;
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some(command) = args.first() else {
            continue;
        };

        match *command {
            "tick" => {
                let seconds = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(1);
                advance(&engine, &mut now, seconds);
                let ticks = engine.statistics().counters().ticks;
                println!("--> Advanced {}s (tick #{}).", seconds.min(MAX_TICK_SECONDS), ticks);
            }
            "status" => print_status(&engine),
            "toggle" => match args.get(1) {
                Some(method) => match engine.toggle_reduction(method) {
                    Ok(active) => {
                        println!("--> {} is now {}.", method, if active { "on" } else { "off" })
                    }
                    Err(err) => println!("{} {}", "Error:".red(), err),
                },
                None => println!("Usage: toggle <METHOD>"),
            },
            "heat" => match args.get(1).and_then(|s| s.parse::<f64>().ok()) {
                Some(amount) => {
                    let added = engine.heat().increase_heat(amount, "player", "shell", now);
                    println!("--> Heat +{:.2}.", added);
                }
                None => println!("Usage: heat <AMOUNT>"),
            },
            "buy" => match args.get(1) {
                Some(upgrade) => match parse_cost(&args[2..]) {
                    Ok(cost) => match engine.purchase_upgrade(upgrade, &cost) {
                        Ok(()) => println!("--> Bought {}. Effects apply next tick.", upgrade),
                        Err(err) => println!("{} {}", "Error:".red(), err),
                    },
                    Err(err) => println!("{} {}", "Error:".red(), err),
                },
                None => println!("Usage: buy <UPGRADE> [resource=amount ...]"),
            },
            "events" => print_events(&engine),
            "choose" => {
                let record = args.get(1).and_then(|s| s.parse::<u64>().ok());
                let index = args.get(2).and_then(|s| s.parse::<usize>().ok());
                match (record, index) {
                    (Some(record), Some(index)) if engine.handle_event_choice(record, index) => {
                        println!("--> Choice recorded.")
                    }
                    (Some(_), Some(_)) => println!("{} no such pending choice.", "Error:".red()),
                    _ => println!("Usage: choose <RECORD> <INDEX>"),
                }
            }
            "trigger" => match args.get(1) {
                Some(event_id) => match engine.trigger_event(event_id) {
                    Ok(record) => println!("--> Triggered {} as #{}.", event_id, record.id),
                    Err(err) => println!("{} {}", "Error:".red(), err),
                },
                None => println!("Usage: trigger <EVENT>"),
            },
            "systems" => {
                for (name, priority, stats) in engine.system_stats() {
                    println!(
                        "  {:<12} p{:<3} runs {:<6} failures {:<3} over budget {:<3} max {:?}",
                        name,
                        priority,
                        stats.runs,
                        stats.failures,
                        stats.over_budget,
                        stats.max_duration
                    );
                }
            }
            "save" => {
                let path = args.get(1).copied().unwrap_or(DEFAULT_SAVE);
                match save(&engine, path) {
                    Ok(()) => println!("--> Saved to {}.", path),
                    Err(err) => println!("{} {:#}", "Error:".red(), err),
                }
            }
            "load" => {
                let path = args.get(1).copied().unwrap_or(DEFAULT_SAVE);
                match load(&engine, path) {
                    Ok(true) => println!("--> Loaded {}.", path),
                    Ok(false) => println!("--> Loaded {} with some sections reset.", path),
                    Err(err) => println!("{} {:#}", "Error:".red(), err),
                }
            }
            "help" => print_help(),
            "exit" => break,
            _ => println!("Unknown command: '{}'. Type 'help'.", line),
        }
    }

    engine.pause();
    Ok(())
}
