//! Skywatch Simulator CLI
//!
//! Run named fleet scenarios or a custom JSON configuration.

use clap::Parser;
use skywatch_core::Strategy;
use skywatch_sim::scenarios::ScenarioId;
use skywatch_sim::{ScenarioResult, ScenarioRunner, SimConfig, SimExport};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Skywatch deterministic simulation CLI
#[derive(Parser, Debug)]
#[command(name = "skywatch-sim")]
#[command(about = "Run deterministic drone-fleet missions", long_about = None)]
struct Args {
    /// Master seed for determinism
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (baseline, exhaustive, opportunistic, lone_radiation,
    /// relay_gossip, last_reserve, full_coverage, wildfire, claim_conflict, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Custom mission configuration (JSON); replaces --scenario
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of consecutive seeds to run
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Fleet size for open-field runs
    #[arg(short, long)]
    fleet: Option<usize>,

    /// Target-selection strategy for open-field runs
    #[arg(long)]
    strategy: Option<Strategy>,

    /// Tick limit
    #[arg(short, long)]
    max_ticks: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Write the telemetry of a single run to this file
    #[arg(long)]
    export: Option<PathBuf>,
}

fn runner_for(args: &Args, seed: u64) -> ScenarioRunner {
    let mut runner = ScenarioRunner::new(seed);
    if let Some(n) = args.fleet {
        runner = runner.with_fleet_size(n);
    }
    if let Some(strategy) = args.strategy {
        runner = runner.with_strategy(strategy);
    }
    if let Some(max_ticks) = args.max_ticks {
        runner = runner.with_max_ticks(max_ticks);
    }
    runner
}

fn write_export(export: &SimExport, path: &PathBuf) -> bool {
    match export.write_to_file(path) {
        Ok(()) => {
            info!("Exported {} frames to {}", export.frames.len(), path.display());
            true
        }
        Err(e) => {
            error!("Failed to write export: {}", e);
            false
        }
    }
}

fn report(result: &ScenarioResult, json: bool) {
    if json {
        return;
    }
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED | ticks={} coverage={:.1}% treated={}/{} messages={}",
            result.scenario,
            result.seed,
            result.total_ticks,
            result.metrics.coverage * 100.0,
            result.metrics.hazards_treated,
            result.metrics.hazards_total,
            result.metrics.messages_sent,
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario,
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        std::process::exit(1);
    }

    if !args.json {
        info!("Skywatch Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut export_ok = true;

    if let Some(path) = &args.config {
        let mut config = match SimConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        };
        config.mission.seed = args.seed;
        let (result, export) = runner_for(&args, args.seed).run_custom(config);
        report(&result, args.json);
        if let Some(out) = &args.export {
            export_ok = write_export(&export, out);
        }
        all_results.push(result);
    } else {
        let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
            ScenarioId::all()
        } else {
            match args.scenario.parse() {
                Ok(id) => vec![id],
                Err(e) => {
                    eprintln!("Error: {}", e);
                    let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                    eprintln!("Available scenarios: {}, all", names.join(", "));
                    std::process::exit(1);
                }
            }
        };

        if args.export.is_some() && (scenarios.len() > 1 || args.seeds > 1) {
            eprintln!("Error: --export only supports a single scenario and seed");
            std::process::exit(1);
        }

        for seed_offset in 0..args.seeds {
            let seed = args.seed.wrapping_add(seed_offset as u64);
            let runner = runner_for(&args, seed);

            for scenario in &scenarios {
                if !args.json {
                    info!("▶ {}: {}", scenario.name(), scenario.description());
                }
                let result = match &args.export {
                    Some(out) => {
                        let (result, export) = runner.run_with_export(*scenario);
                        export_ok = write_export(&export, out);
                        result
                    }
                    None => runner.run(*scenario),
                };
                report(&result, args.json);
                all_results.push(result);
            }
        }
    }

    // Summary
    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": all_results,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!("Failed to encode summary: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("✅ All {} runs passed!", total);
        } else {
            error!("❌ {}/{} runs failed!", failed_count, total);
        }
    }

    if failed_count > 0 || !export_ok {
        std::process::exit(1);
    }
}
