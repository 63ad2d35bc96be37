//! Scenario driver: replays a script against one collector and reports the
//! outcome of every step.

use std::fmt;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;
use gcsim_runtime::memory::config::{GcConfig, GcStrategy};
use gcsim_runtime::memory::events::MemorySink;
use gcsim_runtime::{
    GcError, GcStrategyTrait, GcSummary, HeapSnapshot, ObjectId, create_collector,
};
use tracing::{debug, info};

use crate::event_log::{FanoutSink, JsonLinesSink};
use crate::scenario::{Command, Operation, Scenario};

/// Result of a single scenario step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub step: u64,
    pub operation: &'static str,
    pub description: Option<String>,
    pub result: Result<String, GcError>,
}

impl StepOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub scenario: String,
    pub strategy: GcStrategy,
    pub steps: Vec<StepOutcome>,
    /// End-of-run leak pass
    pub leaks: Vec<ObjectId>,
    /// Objects only kept alive by unreachable referrers
    pub cycle_leaks: Vec<ObjectId>,
    pub events: usize,
    pub summary: GcSummary,
    pub final_heap: HeapSnapshot,
    /// Heap after every step, when requested
    pub dumps: Vec<HeapSnapshot>,
}

impl SimulationReport {
    pub fn rejected(&self) -> usize {
        self.steps.iter().filter(|step| !step.is_ok()).count()
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} [{}] ===", self.scenario, self.strategy)?;
        for (index, step) in self.steps.iter().enumerate() {
            match &step.result {
                Ok(message) => write!(f, "[{}] {}: {}", step.step, step.operation, message)?,
                Err(err) => write!(f, "[{}] {} FAILED: {}", step.step, step.operation, err)?,
            }
            if let Some(description) = &step.description {
                write!(f, "  ({description})")?;
            }
            writeln!(f)?;
            if let Some(dump) = self.dumps.get(index) {
                write!(f, "{dump}")?;
            }
        }
        writeln!(f)?;
        write!(f, "{}", self.final_heap)?;

        if self.leaks.is_empty() {
            writeln!(f, "LEAKS: none")?;
        } else {
            writeln!(f, "LEAKS: {}", join_ids(&self.leaks))?;
        }
        if !self.cycle_leaks.is_empty() {
            writeln!(f, "UNREACHABLE (cycle leaks): {}", join_ids(&self.cycle_leaks))?;
        }
        writeln!(f, "{}", self.summary)
    }
}

fn join_ids(ids: &[ObjectId]) -> String {
    ids.iter()
        .map(ObjectId::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Knobs for one simulation run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions<'a> {
    /// Takes precedence over the scenario's own strategy
    pub strategy: Option<GcStrategy>,
    pub event_log: Option<&'a Path>,
    pub dump_each_step: bool,
}

pub struct Simulator {
    gc: GcConfig,
}

impl Simulator {
    pub fn new(gc: GcConfig) -> Self {
        Self { gc }
    }

    /// Strategy used for `scenario`: explicit override, then the scenario's
    /// own choice, then the configured default.
    pub fn strategy_for(&self, scenario: &Scenario, options: &RunOptions<'_>) -> GcStrategy {
        options
            .strategy
            .or(scenario.strategy)
            .unwrap_or(self.gc.strategy)
    }

    pub fn run(&self, scenario: &Scenario, options: &RunOptions<'_>) -> Result<SimulationReport> {
        let strategy = self.strategy_for(scenario, options);
        let config = GcConfig {
            strategy,
            ..self.gc.clone()
        };

        let events = MemorySink::new();
        let mut sink = FanoutSink::new().with(events.clone());
        if let Some(path) = options.event_log {
            sink = sink.with(JsonLinesSink::create(path)?);
        }
        let mut gc = create_collector(config, Box::new(sink));

        info!(scenario = %scenario.name, %strategy, "running scenario");
        let mut steps = Vec::with_capacity(scenario.operations.len());
        let mut dumps = Vec::new();
        for (index, step) in scenario.operations.iter().enumerate() {
            let step_no = index as u64 + 1;
            gc.set_current_step(step_no);
            let result = apply(gc.as_mut(), &step.op);
            debug!(step = step_no, op = step.op.name(), ok = result.is_ok(), "step applied");
            steps.push(StepOutcome {
                step: step_no,
                operation: step.op.name(),
                description: step.description.clone(),
                result,
            });
            if options.dump_each_step {
                dumps.push(gc.snapshot());
            }
        }

        gc.set_current_step(scenario.operations.len() as u64 + 1);
        let leaks = gc.detect_leaks();
        let cycle_leaks = gc.cycle_leaks();
        gc.flush_events();

        Ok(SimulationReport {
            scenario: scenario.name.clone(),
            strategy,
            steps,
            leaks,
            cycle_leaks,
            events: events.len(),
            summary: gc.summary(),
            final_heap: gc.snapshot(),
            dumps,
        })
    }

    /// Runs the same script against every strategy.
    pub fn compare(&self, scenario: &Scenario) -> Result<Vec<SimulationReport>> {
        GcStrategy::ALL
            .into_iter()
            .map(|strategy| {
                let options = RunOptions {
                    strategy: Some(strategy),
                    ..RunOptions::default()
                };
                self.run(scenario, &options)
            })
            .collect()
    }
}

/// Applies one scripted operation and describes what happened.
pub fn apply(gc: &mut dyn GcStrategyTrait, op: &Operation) -> Result<String, GcError> {
    let message = match op.resolve()? {
        Command::Allocate { id, size } => {
            let size = size.unwrap_or(gc.config().default_object_size);
            let id = gc.allocate_object(id, size)?;
            format!("{id} ({size} bytes)")
        }
        Command::AddRoot(id) => {
            gc.add_root(id)?;
            format!("root -> {id}")
        }
        Command::RemoveRoot(id) => {
            let before = gc.total_memory();
            gc.remove_root(id)?;
            describe_release(format!("root -X-> {id}"), before, gc.total_memory())
        }
        Command::AddRef { from, to } => {
            gc.add_reference(from, to)?;
            format!("{from} -> {to}")
        }
        Command::RemoveRef { from, to } => {
            let before = gc.total_memory();
            gc.remove_reference(from, to)?;
            describe_release(format!("{from} -X-> {to}"), before, gc.total_memory())
        }
        Command::Collect => {
            let stats = gc.collect_with_stats();
            format!(
                "freed {} objects, {} bytes in {:.3} ms",
                stats.objects_collected,
                stats.bytes_freed,
                stats.duration_ms()
            )
        }
    };
    Ok(message)
}

fn describe_release(edge: String, before: usize, after: usize) -> String {
    if after < before {
        format!("{edge}, {} bytes reclaimed", before - after)
    } else {
        edge
    }
}

/// Side-by-side view of the same scenario under each strategy.
pub fn comparison_table(reports: &[SimulationReport]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<20} {:>7} {:>10} {:>10} {:>11} {:>8} {:>6}",
        "strategy", "alive", "in use", "freed", "collections", "rejected", "leaks"
    );
    for report in reports {
        let _ = writeln!(
            out,
            "{:<20} {:>7} {:>10} {:>10} {:>11} {:>8} {:>6}",
            report.strategy.as_str(),
            report.summary.alive_objects,
            report.summary.heap_used,
            report.summary.bytes_freed,
            report.summary.collections,
            report.rejected(),
            report.cycle_leaks.len()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Operation::*;

    fn cycle_leak() -> Scenario {
        Scenario::new(
            "cycle leak",
            vec![
                Allocate {
                    object_id: Some(1),
                    size: Some(16),
                },
                Allocate {
                    object_id: Some(2),
                    size: Some(16),
                },
                AddRef {
                    from_id: 0,
                    to_id: 1,
                },
                AddRef {
                    from_id: 1,
                    to_id: 2,
                },
                AddRef {
                    from_id: 2,
                    to_id: 1,
                },
                RemoveRef {
                    from_id: 0,
                    to_id: 1,
                },
                Collect,
            ],
        )
    }

    fn simulator() -> Simulator {
        Simulator::new(GcConfig::default())
    }

    #[test]
    fn test_cycle_leak_per_strategy() {
        let reports = simulator().compare(&cycle_leak()).unwrap();
        let alive: Vec<usize> = reports.iter().map(|r| r.summary.alive_objects).collect();
        assert_eq!(alive, vec![2, 0, 2]);

        let rc = &reports[0];
        assert_eq!(rc.strategy, GcStrategy::ReferenceCounting);
        assert_eq!(rc.leaks, vec![ObjectId::new(1), ObjectId::new(2)]);
        assert_eq!(rc.cycle_leaks, rc.leaks);
        assert_eq!(rc.rejected(), 0);

        let collect = reports[1].steps.last().unwrap();
        assert_eq!(collect.operation, "collect");
        let message = collect.result.as_deref().unwrap();
        assert!(message.starts_with("freed 2 objects, 32 bytes in "), "{message}");
        assert!(message.ends_with(" ms"));

        let table = comparison_table(&reports);
        assert!(table.contains("mark_sweep"));
        assert_eq!(table.lines().count(), 4);
    }

    #[test]
    fn test_rejected_steps_do_not_stop_the_run() {
        let scenario = Scenario::new(
            "bad ids",
            vec![
                Allocate {
                    object_id: Some(-4),
                    size: None,
                },
                RemoveRef {
                    from_id: 1,
                    to_id: 2,
                },
                Allocate {
                    object_id: None,
                    size: None,
                },
            ],
        );
        let report = simulator().run(&scenario, &RunOptions::default()).unwrap();
        assert_eq!(report.rejected(), 2);
        assert!(matches!(
            report.steps[0].result,
            Err(GcError::InvalidIdentity { raw: -4, .. })
        ));
        assert_eq!(report.steps[2].result.as_deref(), Ok("obj_1 (64 bytes)"));
    }

    #[test]
    fn test_bundled_scenarios() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
        let expected = [
            ("basic.json", vec![1]),
            ("cascade_chain.yaml", vec![1, 2]),
            ("cascade_delete.json", vec![]),
            ("cycle_leak.json", vec![1, 2]),
            ("ms_cycle.json", vec![1]),
            ("multiple_refs.json", vec![1, 2]),
        ];

        let loaded = crate::scenario::load_all(&dir).unwrap();
        assert_eq!(loaded.len(), expected.len());
        for ((path, scenario), (file, alive)) in loaded.into_iter().zip(expected) {
            assert!(path.ends_with(file));
            let report = simulator()
                .run(&scenario.unwrap(), &RunOptions::default())
                .unwrap();
            assert_eq!(report.rejected(), 0, "{file}");
            let alive: Vec<ObjectId> = alive.into_iter().map(ObjectId::new).collect();
            let ids: Vec<ObjectId> = report.final_heap.objects.iter().map(|o| o.id).collect();
            assert_eq!(ids, alive, "{file}");
        }
    }

    #[test]
    fn test_event_log_matches_documented_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let scenario = Scenario::new(
            "basic",
            vec![
                Allocate {
                    object_id: Some(1),
                    size: None,
                },
                Allocate {
                    object_id: Some(2),
                    size: None,
                },
                AddRef {
                    from_id: 1,
                    to_id: 2,
                },
                RemoveRef {
                    from_id: 1,
                    to_id: 2,
                },
            ],
        );
        let options = RunOptions {
            strategy: Some(GcStrategy::ReferenceCounting),
            event_log: Some(&path),
            dump_each_step: true,
        };
        let report = simulator().run(&scenario, &options).unwrap();
        assert_eq!(report.dumps.len(), 4);
        // the remaining object 1 has a zero count and is not a leak
        assert!(report.leaks.is_empty());
        assert_eq!(report.events, 5);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents.lines().collect::<Vec<_>>(),
            vec![
                r#"{"event":"allocate","object":1}"#,
                r#"{"event":"allocate","object":2}"#,
                r#"{"event":"add_ref","from":1,"to":2,"ref_count":1}"#,
                r#"{"event":"remove_ref","from":1,"to":2,"ref_count":0}"#,
                r#"{"event":"delete","object":2}"#,
            ]
        );
        assert!(report.to_string().contains("LEAKS: none"));
    }
}
