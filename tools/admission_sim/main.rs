//! Admission Simulator - Deterministic load scenarios for research_guard
//!
//! Usage:
//!   admission_sim --scenario burst --tasks 32
//!   admission_sim --scenario runaway-loop
//!   admission_sim --scenario budget --cost 2.5
//!   admission_sim --scenario hourly --config guard.toml
//!
//! Prints a machine-readable JSON report to stdout (or --output PATH) and
//! exits non-zero when the observed admissions differ from the expected ones.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use research_guard::{
    logging, AdmissionControl, GuardConfig, GuardError, ManualClock, DEFAULT_CLIENT_ID,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const QUERIES_PER_TASK: u32 = 4;
const HOURLY_CLIENTS: [&str; 3] = ["client-a", "client-b", "client-c"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Many tasks hammer one research topic at once
    Burst,
    /// A section refinement loop that never converges
    RunawayLoop,
    /// Sequential queries until the cost ceiling trips
    Budget,
    /// Several clients exhaust the hourly quota, then the window rolls
    Hourly,
}

impl Scenario {
    fn as_str(&self) -> &'static str {
        match self {
            Scenario::Burst => "burst",
            Scenario::RunawayLoop => "runaway-loop",
            Scenario::Budget => "budget",
            Scenario::Hourly => "hourly",
        }
    }
}

#[derive(Parser)]
#[command(name = "admission_sim")]
#[command(about = "Deterministic admission-control scenarios", long_about = None)]
struct Cli {
    #[arg(long, value_enum, default_value = "burst")]
    scenario: Scenario,

    /// Concurrent tasks for burst/hourly scenarios
    #[arg(long, default_value_t = 16)]
    tasks: u32,

    /// Cost per query in the budget scenario (USD)
    #[arg(long, default_value_t = 2.5)]
    cost: f64,

    /// Optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    scenario: String,
    tasks: u32,
    attempts: u32,
    admitted: u32,
    expected_admitted: u32,
    rejections: BTreeMap<String, u32>,
    success: bool,
    notes: String,
}

#[derive(Debug, Default)]
struct Tally {
    attempts: u32,
    admitted: u32,
    rejections: BTreeMap<String, u32>,
}

impl Tally {
    fn record<T>(&mut self, outcome: &Result<T, GuardError>) {
        self.attempts += 1;
        match outcome {
            Ok(_) => self.admitted += 1,
            Err(e) => {
                let key = match e.limit_kind() {
                    Some(kind) => kind.as_str().to_string(),
                    None => e.kind().to_string(),
                };
                *self.rejections.entry(key).or_insert(0) += 1;
            }
        }
    }

    fn merge(&mut self, other: Tally) {
        self.attempts += other.attempts;
        self.admitted += other.admitted;
        for (key, count) in other.rejections {
            *self.rejections.entry(key).or_insert(0) += count;
        }
    }

    fn into_report(
        self,
        scenario: Scenario,
        tasks: u32,
        expected_admitted: u32,
        notes: String,
    ) -> SimulationReport {
        SimulationReport {
            scenario: scenario.as_str().to_string(),
            tasks,
            attempts: self.attempts,
            admitted: self.admitted,
            expected_admitted,
            success: self.admitted == expected_admitted,
            rejections: self.rejections,
            notes,
        }
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

async fn simulate_burst(config: &GuardConfig, tasks: u32) -> Result<SimulationReport> {
    let clock = ManualClock::new();
    let control = AdmissionControl::with_clock(config, Arc::new(clock))?;
    let topic = "burst: competitor pricing survey";

    let handles: Vec<_> = (0..tasks)
        .map(|_| {
            let control = control.clone();
            tokio::spawn(async move {
                let mut tally = Tally::default();
                for _ in 0..QUERIES_PER_TASK {
                    tally.record(&control.admit_query(DEFAULT_CLIENT_ID, Some(topic), 0.0));
                    tokio::task::yield_now().await;
                }
                tally
            })
        })
        .collect();

    let mut tally = Tally::default();
    for handle in handles {
        tally.merge(handle.await.context("burst task panicked")?);
    }

    let limits = &config.rate_limit;
    let expected = tally
        .attempts
        .min(limits.max_queries_per_research)
        .min(limits.max_queries_per_hour);

    let notes = format!(
        "{} tasks raced on one topic; {} of {} attempts admitted \
         against a per-research limit of {}.",
        tasks, tally.admitted, tally.attempts, limits.max_queries_per_research
    );
    Ok(tally.into_report(Scenario::Burst, tasks, expected, notes))
}

fn simulate_runaway_loop(config: &GuardConfig) -> Result<SimulationReport> {
    let clock = ManualClock::new();
    let control = AdmissionControl::with_clock(config, Arc::new(clock.clone()))?;
    let mut tally = Tally::default();

    // Spacing check: a second pass right after the first is refused
    tally.record(&control.admit_iteration("runaway", "Recommendations", None));
    tally.record(&control.admit_iteration("runaway", "Recommendations", None));

    for _ in 0..50 {
        clock.advance_secs(1);
        let outcome = control.admit_iteration("runaway", "Recommendations", None);
        let tripped = outcome.is_err();
        tally.record(&outcome);
        if tripped {
            break;
        }
    }

    let expected = config.circuit.default_max_iterations;
    let notes = format!(
        "Refinement loop stopped after {} admitted passes (ceiling {}).",
        tally.admitted, expected
    );
    Ok(tally.into_report(Scenario::RunawayLoop, 1, expected, notes))
}

fn simulate_budget(config: &GuardConfig, cost: f64) -> Result<SimulationReport> {
    let clock = ManualClock::new();
    let control = AdmissionControl::with_clock(config, Arc::new(clock))?;
    let limits = &config.rate_limit;
    let mut tally = Tally::default();

    loop {
        let outcome = control.admit_query(DEFAULT_CLIENT_ID, Some("budget"), cost);
        let stop = outcome.is_err();
        tally.record(&outcome);
        if stop {
            break;
        }
    }

    // Same arithmetic the limiter uses, replayed without it
    let mut expected = 0u32;
    let mut spent = 0.0f64;
    while expected < limits.max_queries_per_research
        && expected < limits.max_queries_per_hour
        && spent + cost <= limits.cost_limit_usd
    {
        spent += cost;
        expected += 1;
    }

    let stats = control.rate_limiter().get_stats(Some("budget"))?;
    let spent_usd = stats.research.map(|r| r.total_cost_usd).unwrap_or(0.0);
    let notes = format!(
        "Spent ${:.2} of ${:.2} at ${:.2} per query before the first rejection.",
        spent_usd, limits.cost_limit_usd, cost
    );
    Ok(tally.into_report(Scenario::Budget, 1, expected, notes))
}

async fn simulate_hourly(config: &GuardConfig, tasks: u32) -> Result<SimulationReport> {
    let clock = ManualClock::new();
    let control = AdmissionControl::with_clock(config, Arc::new(clock.clone()))?;

    let handles: Vec<_> = (0..tasks)
        .map(|i| {
            let control = control.clone();
            let client = HOURLY_CLIENTS[i as usize % HOURLY_CLIENTS.len()];
            tokio::spawn(async move {
                let mut tally = Tally::default();
                for _ in 0..QUERIES_PER_TASK {
                    tally.record(&control.admit_query(client, None, 0.0));
                    tokio::task::yield_now().await;
                }
                tally
            })
        })
        .collect();

    let mut tally = Tally::default();
    for handle in handles {
        tally.merge(handle.await.context("hourly task panicked")?);
    }

    let limit = config.rate_limit.max_queries_per_hour;
    let mut expected = 0;
    for (idx, _) in HOURLY_CLIENTS.iter().enumerate() {
        let client_tasks = (0..tasks)
            .filter(|t| *t as usize % HOURLY_CLIENTS.len() == idx)
            .count() as u32;
        expected += (client_tasks * QUERIES_PER_TASK).min(limit);
    }

    // Window rolls: every client gets one more query through
    clock.advance_secs(3601);
    for client in HOURLY_CLIENTS {
        tally.record(&control.admit_query(client, None, 0.0));
        expected += 1;
    }

    let notes = format!(
        "{} clients shared {} tasks with an hourly limit of {} each; \
         window reset admitted one more per client.",
        HOURLY_CLIENTS.len(),
        tasks,
        limit
    );
    Ok(tally.into_report(Scenario::Hourly, tasks, expected, notes))
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GuardConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => GuardConfig::default(),
    };
    logging::init(&config.log)?;

    info!(scenario = cli.scenario.as_str(), tasks = cli.tasks, "Running simulation");

    let report = match cli.scenario {
        Scenario::Burst => simulate_burst(&config, cli.tasks).await?,
        Scenario::RunawayLoop => simulate_runaway_loop(&config)?,
        Scenario::Budget => simulate_budget(&config, cli.cost)?,
        Scenario::Hourly => simulate_hourly(&config, cli.tasks).await?,
    };

    let json = serde_json::to_string_pretty(&report)?;
    match &cli.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(path, &json)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            info!("Report saved to: {}", path.display());
        }
        None => println!("{}", json),
    }

    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}
