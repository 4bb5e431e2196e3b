use crate::{address, cache};

use rangemap::RangeSet;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Highest simulated address (exclusive) when no address ranges are configured.
pub const ALL_MEMORY_END: address = 1 << 40;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("hit latency must be at least one cycle")]
    ZeroLatency,

    #[error("line size {0} is not a power of two")]
    BadLineSize(u32),

    #[error("associativity {assoc} does not match {line_per_set} lines per set")]
    InconsistentAssociativity { assoc: usize, line_per_set: usize },

    #[error(
        "capacity mismatch: size is {size} bytes but {num_sets} sets x {assoc} ways x {line_size} byte lines is {actual} bytes"
    )]
    CapacityMismatch {
        size: u64,
        num_sets: usize,
        assoc: usize,
        line_size: u32,
        actual: u64,
    },

    #[error("{queue} size must be non-zero")]
    EmptyQueue { queue: &'static str },

    #[error("cache must have at least one CPU-side port")]
    NoPorts,

    #[error("address range {0:?} is empty")]
    EmptyAddressRange(Range<address>),
}

/// Prefetcher attached to the cache.
///
/// `None` disables prefetching entirely.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrefetcherKind {
    #[default]
    None,
    NextLine,
}

/// Configuration of a single cache instance.
///
/// The number of sets is `1 << param_for_set` and each set holds
/// `line_per_set` lines, which must agree with `assoc`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub name: String,

    /// Total capacity in bytes.
    pub size: u64,

    /// Cycles taken on a hit or to resolve a miss once the fill arrived.
    pub latency: u64,

    /// Associativity (ways per set).
    pub assoc: usize,

    /// Lines per set. Must equal `assoc`.
    pub line_per_set: usize,

    /// The number of sets is `1 << param_for_set`.
    pub param_for_set: u32,

    /// Cache line size in bytes.
    ///
    /// This is a system-wide parameter passed explicitly at construction.
    pub line_size: u32,

    /// Address ranges serviced by the CPU-side port.
    ///
    /// An empty list means all of memory.
    pub addr_ranges: Vec<Range<address>>,

    pub replacement_policy: cache::config::ReplacementPolicy,

    /// Number of CPU-side sub-ports (e.g. instruction + data).
    pub num_cpu_ports: usize,

    /// Depth of each CPU-side request and response FIFO.
    pub cpu_queue_size: usize,

    /// Depth of the memory-side miss queue.
    pub miss_queue_size: usize,

    /// Number of distinct blocks that may have outstanding fills.
    pub mshr_entries: usize,

    /// Number of requests that may merge onto one outstanding fill.
    pub mshr_max_merge: usize,

    /// Round-trip latency of the downstream memory in cycles.
    pub mem_latency: u64,

    /// Depth of the downstream memory request FIFO.
    pub mem_queue_size: usize,

    pub prefetcher: PrefetcherKind,
}

impl Default for Config {
    fn default() -> Self {
        // 4 lines per set, 1 << 2 sets, 64 byte lines
        Self {
            name: "cache".to_string(),
            size: 1024,
            latency: 1,
            assoc: 4,
            line_per_set: 4,
            param_for_set: 2,
            line_size: 64,
            addr_ranges: Vec::new(),
            replacement_policy: cache::config::ReplacementPolicy::FIFO,
            num_cpu_ports: 2,
            cpu_queue_size: 8,
            miss_queue_size: 8,
            mshr_entries: 16,
            mshr_max_merge: 8,
            mem_latency: 100,
            mem_queue_size: 8,
            prefetcher: PrefetcherKind::None,
        }
    }
}

impl Config {
    #[must_use]
    pub fn num_sets(&self) -> usize {
        1 << self.param_for_set
    }

    #[must_use]
    pub fn total_lines(&self) -> usize {
        self.num_sets() * self.assoc
    }

    #[must_use]
    pub fn line_size_log2(&self) -> u32 {
        self.line_size.trailing_zeros()
    }

    /// The serviced address ranges as a set supporting membership tests.
    #[must_use]
    pub fn address_ranges(&self) -> RangeSet<address> {
        let mut ranges = RangeSet::new();
        if self.addr_ranges.is_empty() {
            ranges.insert(0..ALL_MEMORY_END);
        } else {
            for range in &self.addr_ranges {
                ranges.insert(range.clone());
            }
        }
        ranges
    }

    /// Checks the configured geometry.
    ///
    /// Construction of the simulator fails on the first violation.
    pub fn validate(&self) -> Result<(), Error> {
        if self.latency < 1 {
            return Err(Error::ZeroLatency);
        }
        if self.line_size == 0 || !self.line_size.is_power_of_two() {
            return Err(Error::BadLineSize(self.line_size));
        }
        if self.assoc != self.line_per_set {
            return Err(Error::InconsistentAssociativity {
                assoc: self.assoc,
                line_per_set: self.line_per_set,
            });
        }
        let actual = self.num_sets() as u64 * self.assoc as u64 * u64::from(self.line_size);
        if actual != self.size {
            return Err(Error::CapacityMismatch {
                size: self.size,
                num_sets: self.num_sets(),
                assoc: self.assoc,
                line_size: self.line_size,
                actual,
            });
        }
        for (queue, size) in [
            ("cpu queue", self.cpu_queue_size),
            ("miss queue", self.miss_queue_size),
            ("mshr table", self.mshr_entries),
            ("mshr merge", self.mshr_max_merge),
            ("memory queue", self.mem_queue_size),
        ] {
            if size == 0 {
                return Err(Error::EmptyQueue { queue });
            }
        }
        if self.num_cpu_ports == 0 {
            return Err(Error::NoPorts);
        }
        for range in &self.addr_ranges {
            if range.is_empty() {
                return Err(Error::EmptyAddressRange(range.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, Error};

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.num_sets(), 4);
        assert_eq!(config.total_lines(), 16);
        assert_eq!(config.line_size_log2(), 6);
    }

    #[test]
    fn capacity_must_match_geometry() {
        let config = Config {
            size: 2048,
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(Error::CapacityMismatch {
                size: 2048,
                num_sets: 4,
                assoc: 4,
                line_size: 64,
                actual: 1024,
            })
        );
    }

    #[test]
    fn set_parameters_must_agree() {
        let config = Config {
            assoc: 2,
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(Error::InconsistentAssociativity {
                assoc: 2,
                line_per_set: 4,
            })
        );
    }

    #[test]
    fn latency_of_zero_is_rejected() {
        let config = Config {
            latency: 0,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(Error::ZeroLatency));
    }

    #[test]
    fn line_size_must_be_power_of_two() {
        let config = Config {
            line_size: 48,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(Error::BadLineSize(48)));
    }

    #[test]
    fn empty_ranges_default_to_all_memory() {
        let config = Config::default();
        let ranges = config.address_ranges();
        assert!(ranges.contains(&0x1000));
        assert!(ranges.contains(&(super::ALL_MEMORY_END - 1)));
    }

    #[test]
    fn explicit_ranges_are_respected() {
        let config = Config {
            addr_ranges: vec![0x0..0x1000, 0x8000..0x9000],
            ..Config::default()
        };
        let ranges = config.address_ranges();
        assert!(ranges.contains(&0xfff));
        assert!(!ranges.contains(&0x1000));
        assert!(ranges.contains(&0x8000));
    }
}
