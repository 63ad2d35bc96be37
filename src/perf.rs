//! Timing harness: fixed workloads run against every strategy at several
//! object counts.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gcsim_runtime::memory::config::{GcConfig, GcStrategy};
use gcsim_runtime::{GcResult, GcStrategyTrait, NullSink, ObjectId, create_collector};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;
use utils::bench::compare_benchmarks;
use utils::{Benchmark, BenchmarkResult, Stopwatch};

use crate::config::PerfConfig;

pub const RESULTS_FILE: &str = "performance_results.json";

/// Strategy every other strategy is compared against.
const BASELINE: GcStrategy = GcStrategy::MarkSweep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Workload {
    /// root -> 1 -> 2 -> ... -> n, then the root is dropped
    SimpleLinear,
    /// root -> head of each small cycle, then the root is dropped
    CyclicGraph,
    /// Tree with a fixed branching factor, then the root is dropped
    CascadeTree,
}

impl Workload {
    pub const ALL: [Workload; 3] = [
        Workload::SimpleLinear,
        Workload::CyclicGraph,
        Workload::CascadeTree,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Workload::SimpleLinear => "simple_linear",
            Workload::CyclicGraph => "cyclic_graph",
            Workload::CascadeTree => "cascade_tree",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Workload::SimpleLinear => "Simple Linear Chain",
            Workload::CyclicGraph => "Cyclic Graph",
            Workload::CascadeTree => "Cascade Tree",
        }
    }
}

/// What one workload run did to the heap.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorkloadOutcome {
    pub operations: usize,
    /// Time spent allocating and linking
    pub build_ms: f64,
    /// Time spent dropping the root and collecting
    pub reclaim_ms: f64,
    pub objects_collected: usize,
    /// Objects still alive after the root was dropped and a collection ran
    pub objects_leaked: usize,
    pub memory_used: usize,
    pub memory_freed: usize,
    pub collection_runs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerfResult {
    pub test_name: String,
    pub scenario_type: Workload,
    pub strategy: GcStrategy,
    pub total_objects: usize,
    pub total_operations: usize,
    pub execution_time_ms: f64,
    pub median_time_ms: f64,
    pub std_dev_ms: f64,
    pub build_ms: f64,
    pub reclaim_ms: f64,
    /// Script operations per second at the mean time
    pub ops_per_sec: f64,
    /// Mean time change against the mark-and-sweep run, in percent
    pub vs_baseline_pct: Option<f64>,
    pub objects_collected: usize,
    pub objects_leaked: usize,
    pub memory_used: usize,
    pub memory_freed: usize,
    pub collection_runs: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerfStatistics {
    pub total_tests: usize,
    pub total_objects_tested: usize,
    pub total_time_ms: f64,
    pub total_objects_collected: usize,
    pub total_objects_leaked: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerfReport {
    pub test_suite: String,
    pub timestamp: String,
    pub tests: Vec<PerfResult>,
    pub statistics: PerfStatistics,
}

impl PerfReport {
    fn new(tests: Vec<PerfResult>) -> Self {
        let statistics = tests.iter().fold(PerfStatistics::default(), |mut acc, test| {
            acc.total_tests += 1;
            acc.total_objects_tested += test.total_objects;
            acc.total_time_ms += test.execution_time_ms;
            acc.total_objects_collected += test.objects_collected;
            acc.total_objects_leaked += test.objects_leaked;
            acc
        });
        Self {
            test_suite: "GC strategy performance".to_string(),
            timestamp: timestamp(),
            tests,
            statistics,
        }
    }

    /// Writes the report as pretty JSON into `dir`, returning the file path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        let path = dir.join(RESULTS_FILE);
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents + "\n")
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn summary_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<16} {:<20} {:>9} {:>11} {:>10} {:>9} {:>9} {:>9}",
            "Scenario", "Strategy", "Objects", "Time (ms)", "vs MS", "Collected", "Leaked", "Ops"
        );
        let _ = writeln!(out, "{}", "-".repeat(100));
        for test in &self.tests {
            let relative = test
                .vs_baseline_pct
                .map_or_else(|| "-".to_string(), |pct| format!("{pct:+.1}%"));
            let _ = writeln!(
                out,
                "{:<16} {:<20} {:>9} {:>11.2} {:>10} {:>9} {:>9} {:>9}",
                test.scenario_type.as_str(),
                test.strategy.as_str(),
                test.total_objects,
                test.execution_time_ms,
                relative,
                test.objects_collected,
                test.objects_leaked,
                test.total_operations
            );
        }
        out
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub struct PerfHarness {
    config: PerfConfig,
    show_progress: bool,
}

impl PerfHarness {
    pub fn new(config: PerfConfig) -> Self {
        Self {
            config,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn config(&self) -> &PerfConfig {
        &self.config
    }

    /// Runs every workload against every strategy at every configured size.
    pub fn run(&self) -> Result<PerfReport> {
        let total = Workload::ALL.len() * GcStrategy::ALL.len() * self.config.sizes.len();
        let progress = if self.show_progress {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                    .progress_chars("=>-"),
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        let mut tests = Vec::with_capacity(total);
        for workload in Workload::ALL {
            for &size in &self.config.sizes {
                let mut timings: Vec<(GcStrategy, BenchmarkResult)> = Vec::new();
                for strategy in GcStrategy::ALL {
                    let label = workload.as_str();
                    progress.set_message(format!("{label} / {strategy} / {size}"));
                    let (bench, outcome) = self.measure(workload, strategy, size);
                    let outcome = outcome.with_context(|| {
                        format!("{label} failed under {strategy} at {size} objects")
                    })?;
                    info!(
                        workload = workload.as_str(),
                        %strategy,
                        size,
                        mean_ms = bench.mean().as_secs_f64() * 1000.0,
                        leaked = outcome.objects_leaked,
                        "workload finished"
                    );
                    tests.push(result_row(workload, strategy, size, &bench, outcome));
                    timings.push((strategy, bench));
                    progress.inc(1);
                }
                attach_baseline(&mut tests, &timings);
            }
        }
        progress.finish_with_message("done");

        Ok(PerfReport::new(tests))
    }

    fn measure(
        &self,
        workload: Workload,
        strategy: GcStrategy,
        size: usize,
    ) -> (BenchmarkResult, GcResult<WorkloadOutcome>) {
        let name = format!("{}/{}/{}", workload.as_str(), strategy, size);
        Benchmark::new(name, self.config.iterations)
            .with_warmup(0)
            .run_with_output(|| run_workload(workload, strategy, size, &self.config))
    }
}

fn result_row(
    workload: Workload,
    strategy: GcStrategy,
    size: usize,
    bench: &BenchmarkResult,
    outcome: WorkloadOutcome,
) -> PerfResult {
    PerfResult {
        test_name: workload.title().to_string(),
        scenario_type: workload,
        strategy,
        total_objects: size,
        total_operations: outcome.operations,
        execution_time_ms: bench.mean().as_secs_f64() * 1000.0,
        median_time_ms: bench.median().as_secs_f64() * 1000.0,
        std_dev_ms: bench.std_dev().as_secs_f64() * 1000.0,
        build_ms: outcome.build_ms,
        reclaim_ms: outcome.reclaim_ms,
        ops_per_sec: bench.throughput(outcome.operations),
        vs_baseline_pct: None,
        objects_collected: outcome.objects_collected,
        objects_leaked: outcome.objects_leaked,
        memory_used: outcome.memory_used,
        memory_freed: outcome.memory_freed,
        collection_runs: outcome.collection_runs,
        timestamp: timestamp(),
    }
}

/// Fills in the relative timing of the last `timings.len()` rows.
fn attach_baseline(tests: &mut [PerfResult], timings: &[(GcStrategy, BenchmarkResult)]) {
    let Some((_, baseline)) = timings.iter().find(|(strategy, _)| *strategy == BASELINE) else {
        return;
    };
    let start = tests.len().saturating_sub(timings.len());
    for (row, (strategy, bench)) in tests[start..].iter_mut().zip(timings) {
        if *strategy != BASELINE {
            row.vs_baseline_pct = Some(compare_benchmarks(baseline, bench));
        }
    }
}

/// Builds one workload on a fresh collector, drops the root and collects.
pub fn run_workload(
    workload: Workload,
    strategy: GcStrategy,
    size: usize,
    config: &PerfConfig,
) -> GcResult<WorkloadOutcome> {
    let size = size.max(1);
    let object_size = config.object_size.max(1);
    let gc_config = GcConfig::new(strategy)
        .with_max_heap_size(size.saturating_mul(object_size).saturating_mul(2))
        .with_default_object_size(object_size);
    let mut gc = create_collector(gc_config, Box::new(NullSink));

    let mut stopwatch = Stopwatch::start_new();
    let root = gc.allocate_default()?;
    gc.add_root(root)?;
    let mut operations = 2;

    operations += match workload {
        Workload::SimpleLinear => build_chain(gc.as_mut(), root, size)?,
        Workload::CyclicGraph => build_cycles(gc.as_mut(), root, size, config.cycle_length)?,
        Workload::CascadeTree => build_tree(gc.as_mut(), root, size, config.branching)?,
    };
    let build = stopwatch.lap();

    gc.collect();
    gc.remove_root(root)?;
    gc.collect();
    operations += 3;
    let reclaim_ms = stopwatch.elapsed_ms();

    let summary = gc.summary();
    Ok(WorkloadOutcome {
        operations,
        build_ms: build.as_secs_f64() * 1000.0,
        reclaim_ms,
        objects_collected: summary.objects_collected,
        objects_leaked: gc.alive_objects(),
        memory_used: summary.heap_peak,
        memory_freed: summary.bytes_freed,
        collection_runs: summary.collections,
    })
}

fn build_chain(gc: &mut dyn GcStrategyTrait, root: ObjectId, size: usize) -> GcResult<usize> {
    let mut operations = 0;
    let mut prev = root;
    for _ in 1..size {
        let next = gc.allocate_default()?;
        gc.add_reference(prev, next)?;
        operations += 2;
        prev = next;
    }
    Ok(operations)
}

fn build_cycles(
    gc: &mut dyn GcStrategyTrait,
    root: ObjectId,
    size: usize,
    cycle_length: usize,
) -> GcResult<usize> {
    let cycle_length = cycle_length.max(2);
    let mut operations = 0;
    let mut remaining = size - 1;
    let mut members = Vec::with_capacity(cycle_length);
    while remaining > 0 {
        members.clear();
        for _ in 0..cycle_length.min(remaining) {
            members.push(gc.allocate_default()?);
            operations += 1;
        }
        remaining -= members.len();

        gc.add_reference(root, members[0])?;
        operations += 1;
        if members.len() > 1 {
            for (index, &from) in members.iter().enumerate() {
                let to = members[(index + 1) % members.len()];
                gc.add_reference(from, to)?;
                operations += 1;
            }
        }
    }
    Ok(operations)
}

fn build_tree(
    gc: &mut dyn GcStrategyTrait,
    root: ObjectId,
    size: usize,
    branching: usize,
) -> GcResult<usize> {
    let branching = branching.max(1);
    let mut operations = 0;
    let mut nodes = Vec::with_capacity(size);
    nodes.push(root);
    for index in 1..size {
        let parent = nodes[(index - 1) / branching];
        let child = gc.allocate_default()?;
        gc.add_reference(parent, child)?;
        operations += 2;
        nodes.push(child);
    }
    Ok(operations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(dir: &Path) -> PerfConfig {
        PerfConfig {
            sizes: vec![10, 31],
            iterations: 1,
            output_dir: dir.to_path_buf(),
            ..PerfConfig::default()
        }
    }

    #[test]
    fn test_chain_is_fully_reclaimed_everywhere() {
        let config = PerfConfig::default();
        for strategy in GcStrategy::ALL {
            let outcome = run_workload(Workload::SimpleLinear, strategy, 50, &config).unwrap();
            assert_eq!(outcome.objects_leaked, 0, "{strategy}");
            assert_eq!(outcome.objects_collected, 50, "{strategy}");
            assert_eq!(outcome.memory_freed, 50 * 64, "{strategy}");
            assert_eq!(outcome.operations, 2 + 49 * 2 + 3);
        }
    }

    #[test]
    fn test_cycles_leak_without_tracing() {
        let config = PerfConfig::default();
        // 1 root + 3 cycles of 3
        let rc = run_workload(Workload::CyclicGraph, GcStrategy::ReferenceCounting, 10, &config)
            .unwrap();
        assert_eq!(rc.objects_leaked, 9);
        assert_eq!(rc.objects_collected, 1);

        let cascade =
            run_workload(Workload::CyclicGraph, GcStrategy::CascadeDeletion, 10, &config).unwrap();
        assert_eq!(cascade.objects_leaked, 9);

        let ms = run_workload(Workload::CyclicGraph, GcStrategy::MarkSweep, 10, &config).unwrap();
        assert_eq!(ms.objects_leaked, 0);
        assert_eq!(ms.objects_collected, 10);
        assert_eq!(ms.collection_runs, 2);
    }

    #[test]
    fn test_tree_shape() {
        let config = PerfConfig {
            branching: 2,
            ..PerfConfig::default()
        };
        for strategy in GcStrategy::ALL {
            let outcome = run_workload(Workload::CascadeTree, strategy, 15, &config).unwrap();
            assert_eq!(outcome.objects_leaked, 0, "{strategy}");
            assert_eq!(outcome.memory_used, 15 * 64);
        }
    }

    #[test]
    fn test_harness_writes_results() {
        let dir = tempfile::tempdir().unwrap();
        let harness = PerfHarness::new(small_config(dir.path())).with_progress(false);
        let report = harness.run().unwrap();

        assert_eq!(report.tests.len(), 3 * 3 * 2);
        assert_eq!(report.statistics.total_tests, 18);
        let baseline_rows = report
            .tests
            .iter()
            .filter(|test| test.vs_baseline_pct.is_none())
            .count();
        assert_eq!(baseline_rows, 6);
        assert!(report.summary_table().contains("cyclic_graph"));
        assert!(
            report
                .tests
                .iter()
                .all(|test| test.ops_per_sec.is_finite() && test.ops_per_sec >= 0.0)
        );

        let path = report.save(&harness.config().output_dir).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["tests"].as_array().map(Vec::len), Some(18));
        assert_eq!(json["tests"][0]["scenario_type"], "simple_linear");
        assert_eq!(json["tests"][0]["strategy"], "reference_counting");
        assert!(json["tests"][0]["ops_per_sec"].is_number());
    }
}
