//! Simulator configuration
//!
//! Layering, lowest precedence first: defaults, then an optional TOML file,
//! then `GCSIM_*` environment variables, then command-line flags.

use std::path::{Path, PathBuf};

use gcsim_runtime::memory::config::GcConfig;
use serde::{Deserialize, Serialize};

/// Complete simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SimConfig {
    /// Garbage collection configuration
    pub gc: GcConfig,

    /// Event log and heap dump configuration
    pub logging: LoggingConfig,

    /// Performance harness configuration
    pub perf: PerfConfig,
}

impl SimConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            gc: GcConfig::from_env(),
            logging: LoggingConfig::from_env(),
            perf: PerfConfig::from_env(),
        }
    }

    /// Load configuration from TOML file
    #[cfg(feature = "toml-config")]
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: SimConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from TOML file (stub when toml feature is disabled)
    #[cfg(not(feature = "toml-config"))]
    pub fn from_file(_path: &Path) -> anyhow::Result<Self> {
        anyhow::bail!("TOML support not enabled. Enable the 'toml-config' feature.")
    }

    /// Save configuration to TOML file
    #[cfg(feature = "toml-config")]
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Defaults or the given file, with the environment merged on top.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.merge_with_env())
    }

    /// Merge with environment variables (env vars take precedence)
    pub fn merge_with_env(mut self) -> Self {
        let env_config = Self::from_env();

        if env_set("GCSIM_GC_STRATEGY") {
            self.gc.strategy = env_config.gc.strategy;
        }
        if env_set("GCSIM_MAX_HEAP") {
            self.gc.max_heap_size = env_config.gc.max_heap_size;
        }
        if env_set("GCSIM_OBJECT_SIZE") {
            self.gc.default_object_size = env_config.gc.default_object_size;
        }
        if env_set("GCSIM_AUTO_GC") {
            self.gc.auto_gc = env_config.gc.auto_gc;
        }
        if env_set("GCSIM_GC_THRESHOLD") {
            self.gc.memory_threshold = env_config.gc.memory_threshold;
        }

        if env_set("GCSIM_EVENT_LOG") {
            self.logging.event_log = env_config.logging.event_log;
        }
        if env_set("GCSIM_DUMP_STEPS") {
            self.logging.dump_each_step = env_config.logging.dump_each_step;
        }

        if env_set("GCSIM_PERF_SIZES") {
            self.perf.sizes = env_config.perf.sizes;
        }
        if env_set("GCSIM_PERF_OUTPUT") {
            self.perf.output_dir = env_config.perf.output_dir;
        }

        self
    }
}

fn env_set(name: &str) -> bool {
    std::env::var_os(name).is_some()
}

/// Event log and heap dump configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// JSON-lines file receiving one event per heap mutation
    pub event_log: Option<PathBuf>,

    /// Print the heap after every scenario step
    pub dump_each_step: bool,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("GCSIM_EVENT_LOG")
            && !val.is_empty()
        {
            config.event_log = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("GCSIM_DUMP_STEPS") {
            config.dump_each_step = val.parse().unwrap_or(true);
        }

        config
    }
}

/// Performance harness configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfConfig {
    /// Object counts to run every workload at
    pub sizes: Vec<usize>,

    /// Declared size of each allocated object
    pub object_size: usize,

    /// Members per cycle in the cyclic workload
    pub cycle_length: usize,

    /// Children per node in the tree workload
    pub branching: usize,

    /// Timed repetitions per workload
    pub iterations: usize,

    /// Directory receiving the JSON results
    pub output_dir: PathBuf,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            sizes: vec![1_000, 10_000, 100_000],
            object_size: 64,
            cycle_length: 3,
            branching: 3,
            iterations: 3,
            output_dir: PathBuf::from("perf_results"),
        }
    }
}

impl PerfConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("GCSIM_PERF_SIZES")
            && let Ok(sizes) = parse_sizes(&val)
        {
            config.sizes = sizes;
        }

        if let Ok(val) = std::env::var("GCSIM_PERF_OUTPUT") {
            config.output_dir = PathBuf::from(val);
        }

        config
    }
}

/// Parses a comma-separated list of object counts, e.g. `100,1000`.
pub fn parse_sizes(input: &str) -> Result<Vec<usize>, String> {
    let sizes = input
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<usize>()
                .map_err(|err| format!("invalid size '{part}': {err}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if sizes.is_empty() {
        return Err("no sizes given".to_string());
    }
    Ok(sizes)
}
