//! Host simulator: replays a JSON scenario through the loop service.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Adapters                                                    │
//! │  Replay (glucose, pump, profile, clock)  LogEventSink        │
//! │  MemStore (mode records, config)                             │
//! │  ─────────────────── Port Trait Boundary ─────────────────   │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  LoopService: Trend · Constraints · Modes              │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use apscore::adapters::log_sink::LogEventSink;
use apscore::adapters::mem_store::MemStore;
use apscore::adapters::replay::Replay;
use apscore::app::commands::AppCommand;
use apscore::app::service::LoopService;
use apscore::config::validate_config;
use apscore::constraints::ConstraintAggregator;
use apscore::mode::{ModeController, ModeHistory, StorageModeHistory};

#[derive(Parser, Debug)]
#[command(name = "apscore", version, about = "Replay a loop scenario through the decision core")]
struct Args {
    /// Scenario file (JSON)
    scenario: PathBuf,

    /// Print every stored mode record at the end
    #[arg(long)]
    records: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("apscore v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Scenario ───────────────────────────────────────────
    let text = std::fs::read_to_string(&args.scenario)
        .with_context(|| format!("reading {}", args.scenario.display()))?;
    let mut replay = Replay::from_json(&text).context("parsing scenario")?;
    validate_config(replay.config()).map_err(|e| anyhow::anyhow!("scenario config: {e}"))?;

    // ── 2. Assemble the core ──────────────────────────────────
    let gate = Arc::new(replay.objectives());
    let aggregator = ConstraintAggregator::standard(gate.clone());
    let modes = ModeController::new(StorageModeHistory::open(MemStore::new()), gate);
    let mut service = LoopService::new(replay.config().clone(), aggregator, modes);
    let mut sink = LogEventSink::new();
    service.start(&mut sink);

    // ── 3. Run ────────────────────────────────────────────────
    for _ in 0..replay.cycles() {
        replay.advance();
        let due: Vec<_> = replay.due_requests().cloned().collect();
        for request in due {
            let reply = service.handle_command(AppCommand::ChangeMode(request), &mut replay, &mut sink);
            info!(
                "cycle {}: {} ({})",
                replay.cycle(),
                if reply.success { "accepted" } else { "rejected" },
                reply.comment
            );
        }
        service.tick(&mut replay, &mut sink);
    }

    // ── 4. Summary ────────────────────────────────────────────
    let handle = service.mode_handle();
    handle.with(|mc| {
        info!(
            "finished after {} cycles in {} with {} mode records",
            service.cycle_count(),
            mc.current(),
            mc.history().len()
        );
        if args.records {
            for r in mc.history().records() {
                info!(
                    "record {} @{} {} {} min{} [{}]{}",
                    r.id,
                    r.timestamp_ms,
                    r.mode,
                    r.planned_duration_ms / 60_000,
                    if r.auto_forced { " forced" } else { "" },
                    r.reasons,
                    r.reference_id.map(|id| format!(" ref {id}")).unwrap_or_default()
                );
            }
        }
    });
    Ok(())
}
