//! keyq CLI: drive the dispatch queue through simulated workloads.

use clap::{Parser, Subcommand};
use keyq::config::Config;
use keyq::scenario::Scenario;
use keyq::simulation::{self, SimulationReport};
use keyq::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keyq", about = "Key-affinity dispatch queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a workload through the queue and verify ordering and exclusivity
    Simulate {
        /// TOML scenario file
        #[arg(long)]
        scenario: Option<PathBuf>,
        /// Generate messages across this many keys (ignored with --scenario)
        #[arg(long, default_value_t = 8)]
        keys: usize,
        /// Generated messages per key (ignored with --scenario)
        #[arg(long, default_value_t = 50)]
        per_key: usize,
        /// Override the worker count
        #[arg(long)]
        workers: Option<usize>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Simulate {
            scenario,
            keys,
            per_key,
            workers,
            json,
        } => cmd_simulate(&config, scenario, keys, per_key, workers, json).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn cmd_simulate(
    config: &Config,
    path: Option<PathBuf>,
    keys: usize,
    per_key: usize,
    workers: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        log_level: config.log_level.clone(),
        ..TelemetryConfig::new("keyq")
    })?;
    if guard.is_exporting() {
        tracing::info!(endpoint = ?config.otel_endpoint, "exporting telemetry over OTLP");
    }

    let mut scenario = match path {
        Some(ref path) => Scenario::load(path)?,
        None => Scenario::generated(keys, per_key),
    };
    if let Some(n) = workers {
        scenario.workers = Some(n);
    }

    let report = simulation::run(&scenario, config).await?;
    guard.force_flush();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.is_clean() {
        anyhow::bail!("simulation finished with violations or undelivered messages");
    }
    Ok(())
}

fn print_report(report: &SimulationReport) {
    println!("Workers:    {}", report.workers);
    println!("Keys:       {}", report.keys);
    println!("Enqueued:   {}", report.enqueued);
    println!("Delivered:  {}", report.delivered);
    println!("Remaining:  {}", report.remaining);
    println!("Elapsed:    {}ms", report.elapsed_ms);
    if report.timed_out {
        println!("Timed out:  yes");
    }

    println!();
    println!(
        "{:<8}  {:>10}  {:>8}  {:>12}",
        "WORKER", "PROCESSED", "FAILED", "EMPTY_POLLS"
    );
    println!("{}", "-".repeat(44));
    for worker in &report.per_worker {
        println!(
            "{:<8}  {:>10}  {:>8}  {:>12}",
            worker.worker.to_string(),
            worker.processed,
            worker.failed,
            worker.empty_polls
        );
    }

    for violation in report
        .fifo_violations
        .iter()
        .chain(&report.overlap_violations)
    {
        println!("VIOLATION: {violation}");
    }
}
