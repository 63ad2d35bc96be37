pub mod bench;
pub mod logger;
pub mod timer;

pub use bench::{Benchmark, BenchmarkResult};
pub use logger::{init_logging, init_logging_with_default};
pub use timer::Stopwatch;
