//! Garbage collection configuration

use std::fmt;

use serde::{Deserialize, Serialize};

/// Garbage collection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GcStrategy {
    /// Per-object counters with eager cascade deletion (leaks cycles)
    ReferenceCounting,
    /// Reachability from roots, on demand or under memory pressure
    #[default]
    MarkSweep,
    /// Eager deletion of subgraphs that lose their last incoming edge
    CascadeDeletion,
}

impl GcStrategy {
    pub const ALL: [GcStrategy; 3] = [
        GcStrategy::ReferenceCounting,
        GcStrategy::MarkSweep,
        GcStrategy::CascadeDeletion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GcStrategy::ReferenceCounting => "reference_counting",
            GcStrategy::MarkSweep => "mark_sweep",
            GcStrategy::CascadeDeletion => "cascade_deletion",
        }
    }
}

impl fmt::Display for GcStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GcStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rc" | "reference-counting" | "reference_counting" => Ok(GcStrategy::ReferenceCounting),
            "mark-sweep" | "mark_sweep" | "ms" => Ok(GcStrategy::MarkSweep),
            "cascade" | "cascade-deletion" | "cascade_deletion" | "cd" => {
                Ok(GcStrategy::CascadeDeletion)
            }
            _ => Err(format!("Unknown GC strategy: {}", s)),
        }
    }
}

/// Garbage collection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// GC strategy to use
    pub strategy: GcStrategy,
    /// Heap capacity in bytes
    pub max_heap_size: usize,
    /// Size given to objects allocated without an explicit size
    pub default_object_size: usize,
    /// Collect ahead of an allocation that would cross `memory_threshold`
    pub auto_gc: bool,
    /// Fraction of capacity (0.0-1.0) that counts as memory pressure
    pub memory_threshold: f64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            strategy: GcStrategy::MarkSweep,
            max_heap_size: 1024 * 1024, // 1 MiB
            default_object_size: 64,
            auto_gc: false,
            memory_threshold: 0.8, // 80% of capacity
        }
    }
}

impl GcConfig {
    /// Create a new GC configuration
    pub fn new(strategy: GcStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    pub fn with_max_heap_size(mut self, max_heap_size: usize) -> Self {
        self.max_heap_size = max_heap_size;
        self
    }

    pub fn with_default_object_size(mut self, size: usize) -> Self {
        self.default_object_size = size;
        self
    }

    /// Byte level above which an allocation counts as memory pressure.
    pub fn pressure_limit(&self) -> usize {
        (self.max_heap_size as f64 * self.memory_threshold.clamp(0., 1.)) as usize
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(strategy_str) = std::env::var("GCSIM_GC_STRATEGY")
            && let Ok(strategy) = strategy_str.parse()
        {
            config.strategy = strategy;
        }

        if let Ok(max_heap) = std::env::var("GCSIM_MAX_HEAP")
            && let Ok(bytes) = max_heap.parse::<usize>()
        {
            config.max_heap_size = bytes;
        }

        if let Ok(size) = std::env::var("GCSIM_OBJECT_SIZE")
            && let Ok(bytes) = size.parse::<usize>()
        {
            config.default_object_size = bytes;
        }

        if let Ok(auto_gc) = std::env::var("GCSIM_AUTO_GC") {
            config.auto_gc = auto_gc.parse().unwrap_or(true);
        }

        if let Ok(threshold) = std::env::var("GCSIM_GC_THRESHOLD")
            && let Ok(threshold_val) = threshold.parse::<f64>()
        {
            config.memory_threshold = threshold_val.clamp(0., 1.);
        }

        config
    }
}
