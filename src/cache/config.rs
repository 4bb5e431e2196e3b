use serde::{Deserialize, Serialize};

/// Victim selection policy within a set.
///
/// Both are deterministic. `FIFO` evicts the least-recently-installed line,
/// `LRU` the least-recently-used one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplacementPolicy {
    #[default]
    FIFO,
    LRU,
}

/// Flattened per-cache configuration derived from the validated
/// [`crate::config::Config`].
#[derive(Clone, Debug)]
pub struct Config {
    pub latency: u64,
    pub line_size: u32,
    pub line_size_log2: u32,
    pub associativity: usize,
    pub num_sets: usize,
    pub total_lines: usize,
    pub miss_queue_size: usize,
    pub mshr_entries: usize,
    pub mshr_max_merge: usize,
    pub replacement_policy: ReplacementPolicy,
}

impl From<&crate::config::Config> for Config {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            latency: config.latency,
            line_size: config.line_size,
            line_size_log2: config.line_size_log2(),
            associativity: config.assoc,
            num_sets: config.num_sets(),
            total_lines: config.total_lines(),
            miss_queue_size: config.miss_queue_size,
            mshr_entries: config.mshr_entries,
            mshr_max_merge: config.mshr_max_merge,
            replacement_policy: config.replacement_policy,
        }
    }
}
