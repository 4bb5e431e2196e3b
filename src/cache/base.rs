use crate::{address, cache, interconn as ic, mem_fetch, mshr, stats, tag_array};

use cache::block::Block;
use cache::controller::CacheController;
use cache::RequestStatus;
use console::style;
use itertools::Itertools;
use std::collections::{HashMap, VecDeque};

/// A fill in flight on the memory-side port.
#[derive(Debug, Clone)]
struct PendingFill {
    cache_index: usize,
    is_prefetch: bool,
}

/// Common cache machinery: tag array, miss status handling registers, the
/// memory-side miss queue and the CPU-side response queue.
///
/// The access policy (hit and miss handlers) lives in [`super::Data`].
pub struct Base<B, CC> {
    pub name: String,
    pub config: cache::config::Config,
    pub controller: CC,

    pub tag_array: tag_array::TagArray<B, CC>,
    pub mshrs: mshr::Table<mem_fetch::MemFetch>,

    /// Requests on their way to the memory-side port.
    pub miss_queue: VecDeque<mem_fetch::MemFetch>,

    /// One entry per fill outstanding on the memory side, keyed by block
    /// address. Also tracks fills with no waiters (prefetches).
    pending: HashMap<address, PendingFill>,

    /// Completed replies, stamped with the cycle they become visible to the
    /// CPU-side port. Pushed in non-decreasing time order.
    response_queue: VecDeque<ic::Packet<mem_fetch::MemFetch>>,

    mem_port: Option<ic::Port<mem_fetch::MemFetch>>,

    pub stats: stats::Cache,
}

#[derive(Debug, Clone)]
pub struct Builder<CC> {
    pub name: String,
    pub config: cache::config::Config,
    pub controller: CC,
}

impl<CC> Builder<CC>
where
    CC: CacheController,
{
    #[must_use]
    pub fn build(self) -> Base<cache::block::Line, CC> {
        let tag_array = tag_array::TagArray::new(self.config.clone(), self.controller.clone());
        let mshrs = mshr::Table::new(self.config.mshr_entries, self.config.mshr_max_merge);
        let miss_queue = VecDeque::with_capacity(self.config.miss_queue_size);
        Base {
            name: self.name,
            config: self.config,
            controller: self.controller,
            tag_array,
            mshrs,
            miss_queue,
            pending: HashMap::new(),
            response_queue: VecDeque::new(),
            mem_port: None,
            stats: stats::Cache::default(),
        }
    }
}

impl<B, CC> Base<B, CC> {
    /// Checks whether `n` more misses can be handled this cycle.
    #[must_use]
    pub fn miss_queue_can_fit(&self, n: usize) -> bool {
        self.miss_queue.len() + n <= self.config.miss_queue_size
    }

    #[must_use]
    pub fn miss_queue_full(&self) -> bool {
        self.miss_queue.len() >= self.config.miss_queue_size
    }

    pub fn set_mem_port(&mut self, port: ic::Port<mem_fetch::MemFetch>) {
        self.mem_port = Some(port);
    }

    /// Checks if a fill for this block is outstanding on the memory side.
    #[must_use]
    pub fn waiting_for_fill(&self, block_addr: address) -> bool {
        self.pending.contains_key(&block_addr)
    }

    /// Checks for fills still on their way to or from the memory side.
    #[must_use]
    pub fn has_inflight_fills(&self) -> bool {
        !self.miss_queue.is_empty() || !self.pending.is_empty()
    }

    /// The oldest reply regardless of when it becomes visible.
    #[must_use]
    pub fn peek_response(&self) -> Option<&ic::Packet<mem_fetch::MemFetch>> {
        self.response_queue.front()
    }

    /// The oldest reply, if it is visible at `time`.
    #[must_use]
    pub fn top_response(&self, time: u64) -> Option<&ic::Packet<mem_fetch::MemFetch>> {
        self.response_queue.front().filter(|packet| packet.time <= time)
    }

    pub fn pop_response(&mut self) -> Option<ic::Packet<mem_fetch::MemFetch>> {
        self.response_queue.pop_front()
    }

    fn schedule_response(&mut self, mut fetch: mem_fetch::MemFetch, ready: u64) {
        debug_assert!(fetch.is_reply());
        debug_assert!(self
            .response_queue
            .back()
            .map_or(true, |packet| packet.time <= ready));
        fetch.set_status(mem_fetch::Status::IN_CACHE_RESPONSE_QUEUE, ready);
        self.response_queue.push_back(ic::Packet { fetch, time: ready });
    }
}

impl<B, CC> Base<B, CC>
where
    B: Block,
    CC: CacheController,
{
    /// Read miss handler: merge onto an outstanding fill for the same block
    /// or allocate a victim line and issue a new fill downstream.
    ///
    /// Coalescing is the key property here: at most one fill request leaves
    /// on the memory side per block address, no matter how many requests
    /// miss on it while the fill is in flight.
    pub fn send_read_request(
        &mut self,
        addr: address,
        block_addr: address,
        fetch: mem_fetch::MemFetch,
        time: u64,
        events: &mut Vec<cache::Event>,
    ) -> (RequestStatus, Option<tag_array::EvictedBlock>) {
        let mshr_addr = self.controller.mshr_addr(addr);
        let mshr_hit = self.mshrs.get(mshr_addr).is_some() || self.pending.contains_key(&mshr_addr);
        let mshr_full = self.mshrs.full(mshr_addr);

        log::debug!(
            "{}::send_read_request({}) (mshr_hit={}, mshr_full={}, miss_queue_full={})",
            self.name,
            fetch,
            mshr_hit,
            mshr_full,
            self.miss_queue_full(),
        );

        if mshr_hit && !mshr_full {
            // merge onto the outstanding fill; no downstream request
            let _ = self.tag_array.access(block_addr, &fetch, time);
            self.mshrs.add(mshr_addr, fetch);
            (RequestStatus::MSHR_HIT, None)
        } else if !mshr_hit && !mshr_full && !self.miss_queue_full() {
            let access = self.tag_array.access(block_addr, &fetch, time);
            if access.status == RequestStatus::RESERVATION_FAIL {
                self.stats
                    .inc_failure(cache::ReservationFailure::LINE_ALLOC_FAIL);
                return (RequestStatus::RESERVATION_FAIL, None);
            }
            debug_assert_eq!(access.status, RequestStatus::MISS);
            let cache_index = access.index.expect("miss has victim index");

            let port_id = fetch.port_id;
            self.mshrs.add(mshr_addr, fetch);
            self.pending.insert(
                mshr_addr,
                PendingFill {
                    cache_index,
                    is_prefetch: false,
                },
            );

            // one line-sized read on the memory side
            let mut fill = mem_fetch::Builder {
                addr: mshr_addr,
                kind: mem_fetch::Kind::READ_REQUEST,
                port_id,
                req_size_bytes: self.config.line_size,
                data: None,
                is_prefetch: false,
                inject_cycle: time,
            }
            .build();
            fill.set_status(mem_fetch::Status::IN_CACHE_MISS_QUEUE, time);
            self.miss_queue.push_back(fill);
            events.push(cache::Event::ReadRequestSent);

            (RequestStatus::MISS, access.evicted)
        } else {
            let failure = if mshr_full {
                if mshr_hit {
                    cache::ReservationFailure::MSHR_MERGE_ENTRY_FAIL
                } else {
                    cache::ReservationFailure::MSHR_ENTRY_FAIL
                }
            } else {
                cache::ReservationFailure::MISS_QUEUE_FULL
            };
            self.stats.inc_failure(failure);
            (RequestStatus::RESERVATION_FAIL, None)
        }
    }

    /// Issues a fill with no waiters on behalf of the prefetcher.
    ///
    /// # Returns
    /// Whether the prefetch was issued, and the evicted dirty block if the
    /// victim line needs a write-back.
    pub fn send_prefetch_request(
        &mut self,
        block_addr: address,
        time: u64,
        events: &mut Vec<cache::Event>,
    ) -> (bool, Option<tag_array::EvictedBlock>) {
        if self.pending.contains_key(&block_addr) || self.mshrs.get(block_addr).is_some() {
            return (false, None);
        }
        let (_, probe_status) = self.tag_array.probe(block_addr);
        if probe_status != RequestStatus::MISS {
            return (false, None);
        }
        if !self.miss_queue_can_fit(2) {
            return (false, None);
        }

        let mut fetch = mem_fetch::Builder {
            addr: block_addr,
            kind: mem_fetch::Kind::READ_REQUEST,
            port_id: crate::prefetch::PREFETCH_PORT,
            req_size_bytes: self.config.line_size,
            data: None,
            is_prefetch: true,
            inject_cycle: time,
        }
        .build();

        let access = self.tag_array.access(block_addr, &fetch, time);
        debug_assert_eq!(access.status, RequestStatus::MISS);
        self.pending.insert(
            block_addr,
            PendingFill {
                cache_index: access.index.expect("miss has victim index"),
                is_prefetch: true,
            },
        );

        fetch.set_status(mem_fetch::Status::IN_CACHE_MISS_QUEUE, time);
        self.miss_queue.push_back(fetch);
        events.push(cache::Event::PrefetchRequestSent);
        self.stats.prefetches += 1;
        log::debug!(
            "{}::send_prefetch_request(block_addr={:#x})",
            self.name,
            block_addr
        );
        (true, access.evicted)
    }

    /// Queues a write-back of an evicted dirty line on the memory side.
    ///
    /// Write-backs carry the line data and expect no acknowledgement; the
    /// caller must have checked miss queue capacity.
    pub fn send_write_back(
        &mut self,
        evicted: tag_array::EvictedBlock,
        time: u64,
        events: &mut Vec<cache::Event>,
    ) {
        debug_assert!(!self.miss_queue_full());
        let mut writeback = mem_fetch::Builder {
            addr: evicted.block_addr,
            kind: mem_fetch::Kind::WRITE_REQUEST,
            port_id: crate::prefetch::PREFETCH_PORT,
            req_size_bytes: self.config.line_size,
            data: Some(evicted.data.clone()),
            is_prefetch: false,
            inject_cycle: time,
        }
        .build();
        writeback.set_status(mem_fetch::Status::IN_CACHE_MISS_QUEUE, time);
        log::debug!("{}::send_write_back({})", self.name, writeback);
        self.miss_queue.push_back(writeback);
        events.push(cache::Event::WriteBackRequestSent {
            evicted_block: evicted,
        });
        self.stats.writebacks += 1;
    }

    /// Schedules a completed reply, visible `latency` cycles from `time`.
    pub fn respond(&mut self, fetch: mem_fetch::MemFetch, time: u64) {
        self.schedule_response(fetch, time + self.config.latency);
    }

    /// Fill response from the memory side.
    ///
    /// Installs the line and releases all merged waiters in FIFO arrival
    /// order; every waiter's reply becomes visible `latency` cycles after
    /// the fill, earliest-arriving first.
    pub fn fill(&mut self, fetch: mem_fetch::MemFetch, time: u64) {
        let block_addr = self.controller.block_addr(fetch.addr());
        log::debug!("{}::fill({}, block_addr={:#x})", self.name, fetch, block_addr);

        let Some(pending) = self.pending.remove(&block_addr) else {
            panic!(
                "{}: fill for block {:#x} with no pending entry ({})",
                self.name, block_addr, fetch,
            );
        };
        let data = fetch.data.expect("fill reply carries one line of data");
        self.tag_array.fill_on_miss(pending.cache_index, &data, time);
        self.stats.fills += 1;

        let Some(waiters) = self.mshrs.drain(block_addr) else {
            debug_assert!(pending.is_prefetch);
            return;
        };
        for waiter in waiters {
            let offset = self.controller.offset(waiter.addr());
            let size = waiter.req_size_bytes as usize;
            let reply = if waiter.is_write() {
                // write-allocate: the write lands after the install
                let payload = waiter.data.clone().expect("write carries payload");
                let was_modified = self.tag_array.get_block(pending.cache_index).is_modified();
                self.tag_array
                    .get_block_mut(pending.cache_index)
                    .write(offset, &payload, time);
                if !was_modified {
                    self.tag_array.num_dirty += 1;
                }
                waiter.into_reply(None)
            } else {
                let data = self
                    .tag_array
                    .get_block(pending.cache_index)
                    .read(offset, size)
                    .to_vec();
                waiter.into_reply(Some(data))
            };
            self.respond(reply, time);
        }
    }

    /// Sends the next miss queue entry to the memory-side port, respecting
    /// its flow control.
    pub fn cycle(&mut self, time: u64) {
        let Some(mem_port) = &self.mem_port else {
            return;
        };
        if log::log_enabled!(log::Level::Debug) && !self.miss_queue.is_empty() {
            log::debug!(
                "{}::cycle(time={}) miss queue=[{}]",
                self.name,
                time,
                style(self.miss_queue.iter().map(ToString::to_string).join(", ")).blue(),
            );
        }
        if let Some(fetch) = self.miss_queue.front() {
            let mut mem_port = mem_port.lock().unwrap();
            if mem_port.can_send(&[fetch.req_size_bytes]) {
                let mut fetch = self.miss_queue.pop_front().unwrap();
                fetch.set_status(mem_fetch::Status::IN_MEM_REQUEST_QUEUE, time);
                mem_port.send(ic::Packet { fetch, time });
            }
        }
    }
}
