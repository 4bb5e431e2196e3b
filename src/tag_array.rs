use crate::{address, cache, mem_fetch};

use cache::block::Block;
use cache::config::ReplacementPolicy;
use cache::controller::CacheController;
use cache::RequestStatus;

/// Prior contents of a valid dirty line that was chosen as a victim.
///
/// Carries the data bytes so the controller can issue the write-back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedBlock {
    pub block_addr: address,
    pub data: Vec<u8>,
    pub dirty_size: usize,
}

/// Result of a tag array access.
#[derive(Debug, PartialEq, Eq)]
pub struct AccessStatus {
    pub index: Option<usize>,
    pub writeback: bool,
    pub evicted: Option<EvictedBlock>,
    pub status: RequestStatus,
}

/// Set-associative tag and data array.
///
/// Lines are stored flat, `num_sets * associativity` in total, line `way` of
/// set `s` at index `s * associativity + way`.
#[derive(Debug)]
pub struct TagArray<B, CC> {
    pub lines: Vec<B>,
    controller: CC,
    config: cache::config::Config,
    pub num_access: usize,
    pub num_miss: usize,
    pub num_pending_hit: usize,
    pub num_reservation_fail: usize,
    pub num_dirty: usize,
}

impl<CC> TagArray<cache::block::Line, CC> {
    #[must_use]
    pub fn new(config: cache::config::Config, controller: CC) -> Self {
        let lines = (0..config.total_lines)
            .map(|_| cache::block::Line::new(config.line_size))
            .collect();
        Self {
            lines,
            controller,
            config,
            num_access: 0,
            num_miss: 0,
            num_pending_hit: 0,
            num_reservation_fail: 0,
            num_dirty: 0,
        }
    }
}

impl<B, CC> TagArray<B, CC>
where
    B: Block,
    CC: CacheController,
{
    /// Probes the target set without modifying any state.
    ///
    /// # Returns
    /// The cache index of the hit or victim line, and the request status.
    /// `RESERVATION_FAIL` carries no index: every line in the set is
    /// reserved for an outstanding fill.
    #[must_use]
    pub fn probe(&self, block_addr: address) -> (Option<usize>, RequestStatus) {
        let set_index = self.controller.set_index(block_addr);
        let tag = self.controller.tag(block_addr);

        let mut invalid_line = None;
        let mut valid_line = None;
        let mut valid_time = u64::MAX;
        let mut all_reserved = true;

        for way in 0..self.config.associativity {
            let idx = set_index * self.config.associativity + way;
            let line = &self.lines[idx];
            if line.tag() == tag {
                match line.status() {
                    cache::block::Status::RESERVED => {
                        return (Some(idx), RequestStatus::HIT_RESERVED);
                    }
                    cache::block::Status::VALID | cache::block::Status::MODIFIED => {
                        return (Some(idx), RequestStatus::HIT);
                    }
                    cache::block::Status::INVALID => {}
                }
            }
            if !line.is_reserved() {
                all_reserved = false;
                if line.is_invalid() {
                    invalid_line = Some(idx);
                } else {
                    // track the replacement candidate among valid lines
                    let candidate_time = match self.config.replacement_policy {
                        ReplacementPolicy::FIFO => line.alloc_time(),
                        ReplacementPolicy::LRU => line.last_access_time(),
                    };
                    if candidate_time < valid_time {
                        valid_time = candidate_time;
                        valid_line = Some(idx);
                    }
                }
            }
        }

        if all_reserved {
            // miss, and no line in the set can be allocated this cycle
            return (None, RequestStatus::RESERVATION_FAIL);
        }

        let index = match (invalid_line, valid_line) {
            (Some(invalid), _) => invalid,
            (None, Some(valid)) => valid,
            (None, None) => {
                panic!("found neither a valid nor an invalid victim line");
            }
        };
        (Some(index), RequestStatus::MISS)
    }

    /// Accesses the tag array, updating replacement state and allocating a
    /// victim line on a miss.
    #[must_use]
    pub fn access(
        &mut self,
        block_addr: address,
        fetch: &mem_fetch::MemFetch,
        time: u64,
    ) -> AccessStatus {
        log::trace!("tag_array::access({}, time={})", fetch, time);
        self.num_access += 1;

        let mut writeback = false;
        let mut evicted = None;

        let (index, status) = self.probe(block_addr);
        match status {
            RequestStatus::HIT | RequestStatus::HIT_RESERVED => {
                if status == RequestStatus::HIT_RESERVED {
                    self.num_pending_hit += 1;
                }
                let index = index.expect("hit has index");
                self.lines[index].set_last_access_time(time);
            }
            RequestStatus::MISS => {
                self.num_miss += 1;
                let index = index.expect("miss has victim index");
                let line = &mut self.lines[index];
                if line.is_modified() {
                    writeback = true;
                    evicted = Some(EvictedBlock {
                        block_addr: line.block_addr(),
                        data: line.data().to_vec(),
                        dirty_size: line.dirty_size(),
                    });
                    self.num_dirty -= 1;
                }
                log::trace!(
                    "tag_array::allocate(index={}, tag={:#x}, modified={}, time={})",
                    index,
                    self.controller.tag(block_addr),
                    writeback,
                    time,
                );
                line.allocate(
                    self.controller.tag(block_addr),
                    self.controller.block_addr(block_addr),
                    time,
                );
            }
            RequestStatus::RESERVATION_FAIL => {
                self.num_reservation_fail += 1;
            }
            RequestStatus::MSHR_HIT => {
                panic!("tag_array access: status {status:?} should never be returned");
            }
        }
        AccessStatus {
            index,
            writeback,
            evicted,
            status,
        }
    }

    /// Installs fill data into the line reserved for it.
    pub fn fill_on_miss(&mut self, index: usize, data: &[u8], time: u64) {
        debug_assert!(self.lines[index].is_reserved());
        self.lines[index].fill(data, time);
    }

    /// Invalidates all tags, resetting the array.
    pub fn invalidate(&mut self) {
        for line in &mut self.lines {
            line.set_status(cache::block::Status::INVALID);
        }
        self.num_dirty = 0;
    }

    #[must_use]
    pub fn get_block(&self, index: usize) -> &B {
        &self.lines[index]
    }

    #[must_use]
    pub fn get_block_mut(&mut self, index: usize) -> &mut B {
        &mut self.lines[index]
    }

    /// The number of lines this array holds.
    #[must_use]
    pub fn size(&self) -> usize {
        self.lines.len()
    }
}
