#![allow(
    clippy::upper_case_acronyms,
    non_camel_case_types,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation
)]

pub mod cache;
pub mod config;
pub mod dram;
pub mod fifo;
pub mod interconn;
pub mod mem_fetch;
pub mod mshr;
pub mod prefetch;
pub mod sim;
pub mod stats;
pub mod tag_array;

pub use sim::Simulator;

/// Byte address into the simulated address space.
pub type address = u64;
