use crate::cache::{RequestStatus, ReservationFailure};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::IntoEnumIterator;

/// Per-cache counters, keyed by access outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cache {
    pub accesses: HashMap<RequestStatus, u64>,
    pub reservation_failures: HashMap<ReservationFailure, u64>,
    pub fills: u64,
    pub writebacks: u64,
    pub prefetches: u64,
}

impl Cache {
    pub fn inc_access(&mut self, status: RequestStatus) {
        *self.accesses.entry(status).or_insert(0) += 1;
    }

    pub fn inc_failure(&mut self, failure: ReservationFailure) {
        *self.reservation_failures.entry(failure).or_insert(0) += 1;
    }

    #[must_use]
    pub fn num_accesses(&self, status: RequestStatus) -> u64 {
        self.accesses.get(&status).copied().unwrap_or(0)
    }

    /// Demand accesses that completed without going to memory.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.num_accesses(RequestStatus::HIT);
        let total: u64 = RequestStatus::iter()
            .filter(|status| *status != RequestStatus::RESERVATION_FAIL)
            .map(|status| self.num_accesses(status))
            .sum();
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

impl std::fmt::Display for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for status in RequestStatus::iter() {
            writeln!(f, "{:>24}: {}", format!("{status:?}"), self.num_accesses(status))?;
        }
        for failure in ReservationFailure::iter() {
            let count = self
                .reservation_failures
                .get(&failure)
                .copied()
                .unwrap_or(0);
            writeln!(f, "{:>24}: {}", format!("{failure:?}"), count)?;
        }
        writeln!(f, "{:>24}: {}", "FILLS", self.fills)?;
        writeln!(f, "{:>24}: {}", "WRITEBACKS", self.writebacks)?;
        writeln!(f, "{:>24}: {}", "PREFETCHES", self.prefetches)
    }
}

/// Whole-simulation counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sim {
    pub cycles: u64,
    /// Requests rejected at the CPU-side port before reaching the cache.
    pub rejected: u64,
    pub cache: Cache,
}

impl std::fmt::Display for Sim {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "{:>24}: {}", "CYCLES", self.cycles)?;
        writeln!(f, "{:>24}: {}", "REJECTED", self.rejected)?;
        self.cache.fmt(f)
    }
}
