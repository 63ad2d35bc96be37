use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use gcsim_runtime::memory::config::GcStrategy;
use tracing::warn;

use crate::config::SimConfig;
use crate::perf::PerfHarness;
use crate::scenario::{self, Scenario};
use crate::simulator::{RunOptions, SimulationReport, Simulator, comparison_table};

#[derive(Parser, Debug)]
#[command(name = "gcsim")]
#[command(
    about = "Replay heap scenarios against reference counting, mark-and-sweep and cascade deletion",
    long_about = None
)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one scenario file
    Run {
        scenario: PathBuf,

        /// Collector to use, overriding the scenario and config
        #[arg(short, long)]
        strategy: Option<GcStrategy>,

        /// Write every heap event to this JSON-lines file
        #[arg(long)]
        event_log: Option<PathBuf>,

        /// Heap capacity in bytes
        #[arg(long)]
        max_heap: Option<usize>,

        /// Print the heap after every step
        #[arg(long)]
        dump: bool,
    },

    /// Run every scenario in a directory
    RunAll {
        dir: PathBuf,

        #[arg(short, long)]
        strategy: Option<GcStrategy>,
    },

    /// Run one scenario under every strategy
    Compare { scenario: PathBuf },

    /// Time the built-in workloads
    Perf {
        /// Comma-separated object counts
        #[arg(long, value_delimiter = ',')]
        sizes: Vec<usize>,

        /// Directory for performance_results.json
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long)]
        iterations: Option<usize>,
    },
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let mut config = SimConfig::load(self.config.as_deref())?;

        match self.command {
            Command::Run {
                scenario,
                strategy,
                event_log,
                max_heap,
                dump,
            } => {
                if let Some(max_heap) = max_heap {
                    config.gc.max_heap_size = max_heap;
                }
                if event_log.is_some() {
                    config.logging.event_log = event_log;
                }
                config.logging.dump_each_step |= dump;
                run_one(&config, &scenario, strategy)
            }
            Command::RunAll { dir, strategy } => run_all(&config, &dir, strategy),
            Command::Compare { scenario } => compare(&config, &scenario),
            Command::Perf {
                sizes,
                output,
                iterations,
            } => {
                if !sizes.is_empty() {
                    config.perf.sizes = sizes;
                }
                if let Some(output) = output {
                    config.perf.output_dir = output;
                }
                if let Some(iterations) = iterations {
                    config.perf.iterations = iterations;
                }
                perf(config)
            }
        }
    }
}

fn run_one(config: &SimConfig, path: &Path, strategy: Option<GcStrategy>) -> Result<()> {
    let scenario = Scenario::from_path(path)?;
    let options = RunOptions {
        strategy,
        event_log: config.logging.event_log.as_deref(),
        dump_each_step: config.logging.dump_each_step,
    };
    let report = Simulator::new(config.gc.clone()).run(&scenario, &options)?;
    print_report(&report);
    if let Some(log) = options.event_log {
        println!("Event log written to {}", log.display());
    }
    Ok(())
}

fn run_all(config: &SimConfig, dir: &Path, strategy: Option<GcStrategy>) -> Result<()> {
    let scenarios = scenario::load_all(dir)?;
    if scenarios.is_empty() {
        bail!("no scenario files found in {}", dir.display());
    }

    let simulator = Simulator::new(config.gc.clone());
    let options = RunOptions {
        strategy,
        ..RunOptions::default()
    };
    let mut failed = 0;
    for (path, loaded) in scenarios {
        let scenario = match loaded {
            Ok(scenario) => scenario,
            Err(err) => {
                warn!("skipping {}: {:#}", path.display(), err);
                println!("{} {}: {:#}", "SKIPPED".yellow(), path.display(), err);
                failed += 1;
                continue;
            }
        };
        let report = simulator
            .run(&scenario, &options)
            .with_context(|| format!("failed to run {}", path.display()))?;
        print_report(&report);
    }
    if failed > 0 {
        println!("{failed} scenario file(s) could not be loaded");
    }
    Ok(())
}

fn compare(config: &SimConfig, path: &Path) -> Result<()> {
    let scenario = Scenario::from_path(path)?;
    let reports = Simulator::new(config.gc.clone()).compare(&scenario)?;
    println!("{}", format!("=== {} ===", scenario.name).cyan().bold());
    if let Some(description) = &scenario.description {
        println!("{description}");
    }
    print!("{}", comparison_table(&reports));
    Ok(())
}

fn perf(config: SimConfig) -> Result<()> {
    println!(
        "{}",
        format!("Running workloads at sizes {:?}", config.perf.sizes)
            .cyan()
            .bold()
    );
    let output_dir = config.perf.output_dir.clone();
    let report = PerfHarness::new(config.perf).run()?;
    println!();
    print!("{}", report.summary_table());
    let path = report.save(&output_dir)?;
    println!("{} {}", "Results saved to".green(), path.display());
    Ok(())
}

fn print_report(report: &SimulationReport) {
    print!("{report}");
    let status = if report.cycle_leaks.is_empty() {
        "no unreachable objects".green()
    } else {
        format!("{} unreachable object(s) survived", report.cycle_leaks.len()).red()
    };
    println!("{status}");
    if report.rejected() > 0 {
        println!("{}", format!("{} step(s) rejected", report.rejected()).yellow());
    }
    println!();
}
