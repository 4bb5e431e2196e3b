pub mod base;
pub mod block;
pub mod config;
pub mod controller;
pub mod data;
pub mod event;

pub use controller::CacheController;
pub use data::Data;
pub use event::Event;

use serde::{Deserialize, Serialize};

/// Outcome of one cache access.
#[derive(
    Debug, strum::EnumIter, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum RequestStatus {
    HIT = 0,
    /// Tag matched a line whose fill is still outstanding.
    HIT_RESERVED,
    MISS,
    /// Merged onto an outstanding fill for the same block; no new
    /// downstream request was issued.
    MSHR_HIT,
    /// The request could not be accepted this cycle and must be retried.
    RESERVATION_FAIL,
}

/// Why an access could not be accepted this cycle.
#[derive(
    Debug, strum::EnumIter, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ReservationFailure {
    /// All lines in the target set are reserved for outstanding fills.
    LINE_ALLOC_FAIL = 0,
    /// The memory-side miss queue is full.
    MISS_QUEUE_FULL,
    MSHR_ENTRY_FAIL,
    MSHR_MERGE_ENTRY_FAIL,
}
