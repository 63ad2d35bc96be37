use std::fmt;
use std::time::{Duration, Instant};

/// Repeats a workload and keeps per-iteration wall-clock samples.
pub struct Benchmark {
    name: String,
    iterations: usize,
    warmup: usize,
    samples: Vec<Duration>,
}

impl Benchmark {
    pub fn new(name: impl Into<String>, iterations: usize) -> Self {
        let iterations = iterations.max(1);
        Self {
            name: name.into(),
            iterations,
            warmup: std::cmp::min(iterations / 10, 10),
            samples: Vec::with_capacity(iterations),
        }
    }

    /// Overrides the number of untimed warmup runs.
    pub fn with_warmup(mut self, warmup: usize) -> Self {
        self.warmup = warmup;
        self
    }

    /// Run a benchmark with the given function
    pub fn run<F, T>(&mut self, f: F) -> BenchmarkResult
    where
        F: FnMut() -> T,
    {
        self.run_with_output(f).0
    }

    /// Like [`Benchmark::run`], but also hands back the output of the final
    /// timed iteration so callers can report what the workload produced.
    pub fn run_with_output<F, T>(&mut self, mut f: F) -> (BenchmarkResult, T)
    where
        F: FnMut() -> T,
    {
        self.samples.clear();

        for _ in 0..self.warmup {
            let _ = f();
        }

        let mut last = None;
        for _ in 0..self.iterations {
            let start = Instant::now();
            let output = f();
            self.samples.push(start.elapsed());
            last = Some(output);
        }

        let result = BenchmarkResult {
            name: self.name.clone(),
            iterations: self.iterations,
            samples: self.samples.clone(),
        };
        // iterations is clamped to at least one in `new`
        let output = match last {
            Some(output) => output,
            None => f(),
        };
        (result, output)
    }
}

/// Result of a benchmark run
#[derive(Clone, Debug)]
pub struct BenchmarkResult {
    pub name: String,
    pub iterations: usize,
    pub samples: Vec<Duration>,
}

impl BenchmarkResult {
    pub fn mean(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }

    pub fn median(&self) -> Duration {
        let mut sorted = self.samples.clone();
        sorted.sort();
        sorted.get(sorted.len() / 2).copied().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        *self.samples.iter().min().unwrap_or(&Duration::ZERO)
    }

    pub fn max(&self) -> Duration {
        *self.samples.iter().max().unwrap_or(&Duration::ZERO)
    }

    pub fn std_dev(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let mean = self.mean();
        let variance: f64 = self
            .samples
            .iter()
            .map(|&sample| {
                let diff = sample.as_secs_f64() - mean.as_secs_f64();
                diff * diff
            })
            .sum::<f64>()
            / self.samples.len() as f64;
        Duration::from_secs_f64(variance.sqrt())
    }

    pub fn throughput(&self, items: usize) -> f64 {
        let secs = self.mean().as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        items as f64 / secs
    }
}

impl fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Benchmark: {}", self.name)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Mean:       {:?}", self.mean())?;
        writeln!(f, "  Median:     {:?}", self.median())?;
        writeln!(f, "  Min:        {:?}", self.min())?;
        writeln!(f, "  Max:        {:?}", self.max())?;
        writeln!(f, "  Std Dev:    {:?}", self.std_dev())?;
        Ok(())
    }
}

/// Compare two benchmark results, as a percentage change of the mean.
pub fn compare_benchmarks(baseline: &BenchmarkResult, current: &BenchmarkResult) -> f64 {
    let baseline_mean = baseline.mean().as_secs_f64();
    let current_mean = current.mean().as_secs_f64();
    if baseline_mean == 0.0 {
        return 0.0;
    }
    ((current_mean - baseline_mean) / baseline_mean) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benchmark() {
        let mut bench = Benchmark::new("test", 10);
        let result = bench.run(|| {
            std::thread::sleep(Duration::from_micros(10));
        });

        assert_eq!(result.samples.len(), 10);
        assert!(result.mean() >= Duration::from_micros(10));
    }

    #[test]
    fn test_run_with_output_returns_last_value() {
        let mut counter = 0;
        let mut bench = Benchmark::new("counter", 3).with_warmup(2);
        let (result, last) = bench.run_with_output(|| {
            counter += 1;
            counter
        });

        assert_eq!(result.iterations, 3);
        // two warmups plus three timed runs
        assert_eq!(last, 5);
    }

    #[test]
    fn test_zero_iterations_clamped() {
        let mut bench = Benchmark::new("empty", 0).with_warmup(0);
        let result = bench.run(|| ());
        assert_eq!(result.iterations, 1);
        assert!(result.median() <= result.max());
    }
}
