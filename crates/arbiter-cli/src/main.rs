//! `arbiter-cli` – runs the arbiter against a headless demo world.
//!
//! The binary:
//!
//! 1. Loads `~/.arbiter/config.toml` (or `--config <path>`), falling back to
//!    the bundled defaults when the file is absent. `--init` writes the
//!    defaults out and exits.
//! 2. Builds the tick loop over a [`sim::SimWorld`] and pumps a
//!    [`sim::ScriptedSource`] into its ingestion channel.
//! 3. Prints one line per tick plus every alert and preemption published on
//!    the event bus.
//! 4. Stops cleanly on **Ctrl-C** or after `--ticks N`.

mod config;
mod sim;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arbiter_middleware::{Topic, TopicReceiver, pump};
use arbiter_runtime::{ArbiterLoop, init_tracing};
use arbiter_types::{ArbiterConfig, EventPayload, TickTelemetry};
use clap::Parser;
use colored::Colorize;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::sim::{ScriptedSource, SimWorld, demo_world};

#[derive(Parser, Debug)]
#[command(name = "arbiter", version, about = "Signal-driven arbiter running against a simulated world")]
struct Args {
    /// Config file to load instead of `~/.arbiter/config.toml`.
    #[arg(long, env = "ARBITER_CONFIG")]
    config: Option<PathBuf>,

    /// Write the default config to the config path and exit.
    #[arg(long)]
    init: bool,

    /// Stop after this many ticks instead of running until Ctrl-C.
    #[arg(long)]
    ticks: Option<u64>,

    /// Simulation steps per day/night cycle.
    #[arg(long, default_value_t = 40)]
    day_length: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"), ARBITER_LOG_FORMAT=json switches to
    // JSON lines, OTEL_EXPORTER_OTLP_ENDPOINT enables span export. The
    // per-tick console output below stays on println! for readability.
    let _tracing = init_tracing("arbiter");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let path = args.config.clone().unwrap_or_else(config::config_path);
    if args.init {
        config::save_to(&ArbiterConfig::default(), &path)?;
        println!("  {} Default config written to {}", "✓".green().bold(), path.display().to_string().bold());
        return Ok(());
    }
    let cfg = match config::load_from(&path)? {
        Some(cfg) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        None => {
            println!("  No config at {}; using bundled defaults.", path.display().to_string().dimmed());
            let mut cfg = ArbiterConfig::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(drive(cfg, args.ticks, args.day_length))
}

async fn drive(cfg: ArbiterConfig, ticks: Option<u64>, day_length: u64) -> Result<(), Box<dyn Error>> {
    let period = Duration::from_millis(cfg.tick_period_ms.max(1));
    let world = Arc::new(SimWorld::new(demo_world()));
    let (mut arbiter, handles) = ArbiterLoop::builder(cfg, world.clone()).world(world.snapshot()).build()?;

    // ── Shutdown ──────────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let on_ctrlc = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – finishing the current tick …".yellow().bold());
        on_ctrlc.cancel();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process with a signal instead");
    }

    // ── Signals and console ───────────────────────────────────────────────
    let source = Arc::new(ScriptedSource::new(world.clone(), period, day_length));
    let pump_task = pump(source, handles.signals.clone());

    let printer_stop = CancellationToken::new();
    let printer = tokio::spawn(print_events(
        [
            handles.bus.subscribe_to(Topic::Telemetry),
            handles.bus.subscribe_to(Topic::SystemAlerts),
            handles.bus.subscribe_to(Topic::Decisions),
        ],
        printer_stop.clone(),
    ));

    // ── Tick loop ─────────────────────────────────────────────────────────
    let completed = match ticks {
        Some(limit) => run_for(&mut arbiter, limit, period, &shutdown).await,
        None => arbiter.run(shutdown.clone()).await,
    };

    pump_task.abort();
    printer_stop.cancel();
    if let Err(e) = printer.await {
        warn!(error = %e, "console task ended abnormally");
    }

    info!(ticks = completed, level = %arbiter.degradation_level(), "arbiter stopped");
    println!();
    println!("  {} {} ticks, final level {}", "■".bold(), completed, arbiter.degradation_level().to_string().bold());
    let facts = world.snapshot();
    let summary: Vec<String> = facts.facts().iter().map(|(k, v)| format!("{k}={v:.2}")).collect();
    println!("  world: {}", summary.join(" ").dimmed());
    Ok(())
}

/// Tick exactly `limit` times at the configured period unless `shutdown`
/// fires first.
async fn run_for(arbiter: &mut ArbiterLoop, limit: u64, period: Duration, shutdown: &CancellationToken) -> u64 {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut completed = 0;
    while completed < limit {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                arbiter.tick().await;
                completed += 1;
            }
        }
    }
    completed
}

// ─────────────────────────────────────────────────────────────────────────────
// Console
// ─────────────────────────────────────────────────────────────────────────────

async fn print_events(receivers: [TopicReceiver; 3], stop: CancellationToken) {
    let [mut telemetry, mut alerts, mut decisions] = receivers;
    loop {
        let received = tokio::select! {
            _ = stop.cancelled() => break,
            r = telemetry.recv() => r,
            r = alerts.recv() => r,
            r = decisions.recv() => r,
        };
        match received {
            Ok(event) => println!("{}", describe(&event.payload)),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "console fell behind the event bus"),
            Err(RecvError::Closed) => return,
        }
    }

    // Flush whatever the last tick published before the stop.
    for rx in [&mut telemetry, &mut alerts, &mut decisions] {
        loop {
            match rx.try_recv() {
                Ok(event) => println!("{}", describe(&event.payload)),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }
}

fn describe(payload: &EventPayload) -> String {
    match payload {
        EventPayload::Tick(t) => describe_tick(t),
        EventPayload::Rejected(rejection) => format!("  {} {}", "rejected".red().bold(), rejection),
        EventPayload::Degradation { from, to, reason } => {
            format!("  {} {} → {} ({})", "degraded".yellow().bold(), from, to.to_string().bold(), reason)
        }
        EventPayload::Preempted { task, by, overhead_ms } => {
            format!("  {} task {} by {} in {:.2} ms", "preempted".magenta().bold(), short(task), short(by), overhead_ms)
        }
        EventPayload::ComponentFault { component, message } => {
            format!("  {} {}: {}", "fault".red().bold(), component.bold(), message)
        }
    }
}

fn describe_tick(t: &TickTelemetry) -> String {
    let goal = t.selected_goal.as_deref().unwrap_or("idle");
    let module = t.selected_module.as_deref().unwrap_or("-");
    let total = t.latency_ms.get("total").copied().unwrap_or_default();
    let mut line = format!(
        "{} {:<28} via {:<9} {:>7.2} ms  {}",
        format!("#{:<5}", t.tick).cyan(),
        goal,
        module,
        total,
        t.safe_mode_state.to_string().dimmed(),
    );
    if t.preemption_count > 0 {
        line.push_str(&format!("  {}", format!("preempted×{}", t.preemption_count).magenta()));
    }
    if let Some(reason) = &t.aborted {
        line.push_str(&format!("  {}", format!("aborted: {reason}").red()));
    }
    line
}

fn short(id: &impl std::fmt::Display) -> String {
    id.to_string().chars().take(8).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", "  ┌─┐┬─┐┌┐ ┬┌┬┐┌─┐┬─┐".bold().cyan());
    println!("{}", "  ├─┤├┬┘├┴┐│ │ ├┤ ├┬┘".bold().cyan());
    println!("{}", "  ┴ ┴┴└─└─┘┴ ┴ └─┘┴└─".bold().cyan());
    println!("  {}", "signal-driven goal arbitration".dimmed());
    println!();
}
