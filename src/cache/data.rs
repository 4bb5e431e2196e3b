use crate::{address, cache, config, mem_fetch, prefetch, stats};

use cache::block::Block;
use cache::controller::CacheController;
use cache::RequestStatus;
use rangemap::RangeSet;

/// Single-level set-associative data cache.
///
/// Write-back with write-allocate: write hits dirty the line in place, write
/// misses fetch the line first and apply the store on fill. Dirty victims
/// leave as write-backs on the memory side.
pub struct Data<B, CC> {
    pub inner: super::base::Base<B, CC>,
    prefetcher: Option<Box<dyn prefetch::Prefetcher>>,
    addr_ranges: RangeSet<address>,
}

#[derive(Debug, Clone)]
pub struct Builder<'a> {
    pub name: String,
    pub config: &'a config::Config,
}

impl<'a> Builder<'a> {
    #[must_use]
    pub fn build(self) -> Data<cache::block::Line, cache::controller::Linear> {
        let cache_config: cache::config::Config = self.config.into();
        let controller = cache::controller::Linear::new(&cache_config);
        let inner = super::base::Builder {
            name: self.name,
            config: cache_config,
            controller,
        }
        .build();
        let prefetcher = prefetch::build(self.config.prefetcher, self.config.line_size);
        Data {
            inner,
            prefetcher,
            addr_ranges: self.config.address_ranges(),
        }
    }
}

impl<B, CC> Data<B, CC> {
    #[must_use]
    pub fn stats(&self) -> &stats::Cache {
        &self.inner.stats
    }

    #[must_use]
    pub fn has_inflight_fills(&self) -> bool {
        self.inner.has_inflight_fills()
    }

    #[must_use]
    pub fn peek_response(&self) -> Option<&crate::interconn::Packet<mem_fetch::MemFetch>> {
        self.inner.peek_response()
    }

    pub fn set_mem_port(&mut self, port: crate::interconn::Port<mem_fetch::MemFetch>) {
        self.inner.set_mem_port(port);
    }

    #[must_use]
    pub fn top_response(&self, time: u64) -> Option<&crate::interconn::Packet<mem_fetch::MemFetch>> {
        self.inner.top_response(time)
    }

    pub fn pop_response(&mut self) -> Option<crate::interconn::Packet<mem_fetch::MemFetch>> {
        self.inner.pop_response()
    }
}

impl<B, CC> Data<B, CC>
where
    B: Block,
    CC: CacheController,
{
    /// Services one CPU-side request.
    ///
    /// Returns [`RequestStatus::RESERVATION_FAIL`] when the request cannot be
    /// admitted this cycle; the caller keeps it queued and retries later.
    pub fn access(
        &mut self,
        fetch: mem_fetch::MemFetch,
        time: u64,
        events: &mut Vec<cache::Event>,
    ) -> RequestStatus {
        let addr = fetch.addr();
        let block_addr = self.inner.controller.block_addr(addr);
        let (probe_index, probe_status) = self.inner.tag_array.probe(block_addr);
        log::debug!(
            "{}::access({}) probe={:?} (block_addr={:#x})",
            self.inner.name,
            fetch,
            probe_status,
            block_addr,
        );

        let status = match (fetch.is_write(), probe_status) {
            (false, RequestStatus::HIT) => {
                self.read_hit(addr, probe_index.unwrap(), fetch, time)
            }
            (true, RequestStatus::HIT) => {
                self.write_hit(addr, probe_index.unwrap(), fetch, time)
            }
            (false, RequestStatus::HIT_RESERVED | RequestStatus::MISS) => {
                self.read_miss(addr, block_addr, fetch, time, events)
            }
            (true, RequestStatus::HIT_RESERVED | RequestStatus::MISS) => {
                self.write_miss(addr, block_addr, fetch, time, events)
            }
            (_, RequestStatus::RESERVATION_FAIL) => {
                self.inner
                    .stats
                    .inc_failure(cache::ReservationFailure::LINE_ALLOC_FAIL);
                RequestStatus::RESERVATION_FAIL
            }
            (_, status) => unreachable!("probe cannot return {status:?}"),
        };
        self.inner.stats.inc_access(status);

        if status != RequestStatus::RESERVATION_FAIL {
            let candidate = self
                .prefetcher
                .as_mut()
                .and_then(|prefetcher| prefetcher.notify_access(addr, status));
            if let Some(prefetch_addr) = candidate {
                self.issue_prefetch(prefetch_addr, time, events);
            }
        }
        status
    }

    fn read_hit(
        &mut self,
        addr: address,
        _index: usize,
        fetch: mem_fetch::MemFetch,
        time: u64,
    ) -> RequestStatus {
        let block_addr = self.inner.controller.block_addr(addr);
        let access = self.inner.tag_array.access(block_addr, &fetch, time);
        debug_assert_eq!(access.status, RequestStatus::HIT);
        let index = access.index.expect("hit has index");

        let offset = self.inner.controller.offset(addr);
        let size = fetch.req_size_bytes as usize;
        let data = self.inner.tag_array.get_block(index).read(offset, size).to_vec();
        let reply = fetch.into_reply(Some(data));
        self.inner.respond(reply, time);
        RequestStatus::HIT
    }

    fn write_hit(
        &mut self,
        addr: address,
        _index: usize,
        fetch: mem_fetch::MemFetch,
        time: u64,
    ) -> RequestStatus {
        let block_addr = self.inner.controller.block_addr(addr);
        let access = self.inner.tag_array.access(block_addr, &fetch, time);
        debug_assert_eq!(access.status, RequestStatus::HIT);
        let index = access.index.expect("hit has index");

        let offset = self.inner.controller.offset(addr);
        let payload = fetch.data.clone().expect("write carries payload");
        let was_modified = self.inner.tag_array.get_block(index).is_modified();
        self.inner
            .tag_array
            .get_block_mut(index)
            .write(offset, &payload, time);
        if !was_modified {
            self.inner.tag_array.num_dirty += 1;
        }

        let reply = fetch.into_reply(None);
        self.inner.respond(reply, time);
        RequestStatus::HIT
    }

    fn read_miss(
        &mut self,
        addr: address,
        block_addr: address,
        fetch: mem_fetch::MemFetch,
        time: u64,
        events: &mut Vec<cache::Event>,
    ) -> RequestStatus {
        // fill plus a possible write-back
        if !self.inner.miss_queue_can_fit(2) {
            self.inner
                .stats
                .inc_failure(cache::ReservationFailure::MISS_QUEUE_FULL);
            return RequestStatus::RESERVATION_FAIL;
        }
        let (status, evicted) = self
            .inner
            .send_read_request(addr, block_addr, fetch, time, events);
        if let Some(evicted) = evicted {
            self.inner.send_write_back(evicted, time, events);
        }
        status
    }

    /// Write-allocate: the store is parked in the MSHR entry and applied
    /// when the line arrives.
    fn write_miss(
        &mut self,
        addr: address,
        block_addr: address,
        fetch: mem_fetch::MemFetch,
        time: u64,
        events: &mut Vec<cache::Event>,
    ) -> RequestStatus {
        if !self.inner.miss_queue_can_fit(2) {
            self.inner
                .stats
                .inc_failure(cache::ReservationFailure::MISS_QUEUE_FULL);
            return RequestStatus::RESERVATION_FAIL;
        }
        let (status, evicted) = self
            .inner
            .send_read_request(addr, block_addr, fetch, time, events);
        if let Some(evicted) = evicted {
            self.inner.send_write_back(evicted, time, events);
        }
        status
    }

    fn issue_prefetch(&mut self, addr: address, time: u64, events: &mut Vec<cache::Event>) {
        let block_addr = self.inner.controller.block_addr(addr);
        if !self.addr_ranges.contains(&block_addr) {
            return;
        }
        let (issued, evicted) = self.inner.send_prefetch_request(block_addr, time, events);
        if issued {
            if let Some(evicted) = evicted {
                self.inner.send_write_back(evicted, time, events);
            }
        }
    }

    /// Fill response from the memory side.
    pub fn fill(&mut self, fetch: mem_fetch::MemFetch, time: u64) {
        self.inner.fill(fetch, time);
    }

    pub fn cycle(&mut self, time: u64) {
        self.inner.cycle(time);
    }

    /// Invalidates all lines, dropping dirty data.
    pub fn flush(&mut self) {
        self.inner.tag_array.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use crate::{cache, config, mem_fetch};
    use cache::RequestStatus;

    fn data_cache(
        config: &config::Config,
    ) -> super::Data<cache::block::Line, cache::controller::Linear> {
        super::Builder {
            name: "dcache".to_string(),
            config,
        }
        .build()
    }

    fn read_fetch(addr: crate::address, time: u64) -> mem_fetch::MemFetch {
        mem_fetch::Builder {
            addr,
            kind: mem_fetch::Kind::READ_REQUEST,
            port_id: 0,
            req_size_bytes: 4,
            data: None,
            is_prefetch: false,
            inject_cycle: time,
        }
        .build()
    }

    fn line_reply(
        addr: crate::address,
        line_size: u32,
        byte: u8,
    ) -> mem_fetch::MemFetch {
        mem_fetch::Builder {
            addr,
            kind: mem_fetch::Kind::READ_REQUEST,
            port_id: 0,
            req_size_bytes: line_size,
            data: None,
            is_prefetch: false,
            inject_cycle: 0,
        }
        .build()
        .into_reply(Some(vec![byte; line_size as usize]))
    }

    #[test]
    fn cold_read_misses_and_issues_one_fill() {
        let config = config::Config::default();
        let mut dcache = data_cache(&config);
        let mut events = Vec::new();

        let status = dcache.access(read_fetch(0x100, 0), 0, &mut events);
        assert_eq!(status, RequestStatus::MISS);
        assert!(cache::event::was_read_sent(&events));
        assert!(cache::event::was_writeback_sent(&events).is_none());
        assert_eq!(dcache.inner.miss_queue.len(), 1);
        assert!(dcache.inner.waiting_for_fill(0x100));
    }

    #[test]
    fn evicting_a_dirty_line_emits_a_write_back() {
        let config = config::Config::default();
        let mut dcache = data_cache(&config);
        let mut events = Vec::new();

        // dirty block in set 0
        let write = mem_fetch::Builder {
            addr: 0x0,
            kind: mem_fetch::Kind::WRITE_REQUEST,
            port_id: 0,
            req_size_bytes: 4,
            data: Some(vec![0xaa; 4]),
            is_prefetch: false,
            inject_cycle: 0,
        }
        .build();
        assert_eq!(dcache.access(write, 0, &mut events), RequestStatus::MISS);
        dcache.fill(line_reply(0x0, config.line_size, 0), 10);

        // reserve the other three ways of set 0
        events.clear();
        for way in 1..4u64 {
            let status = dcache.access(read_fetch(way * 0x100, 20), 20, &mut events);
            assert_eq!(status, RequestStatus::MISS);
        }
        assert!(cache::event::was_writeback_sent(&events).is_none());

        // a fifth block in set 0 must push the dirty line out
        let status = dcache.access(read_fetch(0x400, 30), 30, &mut events);
        assert_eq!(status, RequestStatus::MISS);
        let evicted = cache::event::was_writeback_sent(&events).expect("write-back event");
        assert_eq!(evicted.block_addr, 0x0);
        assert_eq!(evicted.data[0..4], [0xaa; 4]);
        assert_eq!(evicted.dirty_size, 4);
        assert_eq!(dcache.stats().writebacks, 1);
    }

    #[test]
    fn prefetch_issue_is_visible_in_events() {
        let config = config::Config {
            prefetcher: config::PrefetcherKind::NextLine,
            ..config::Config::default()
        };
        let mut dcache = data_cache(&config);
        let mut events = Vec::new();

        assert_eq!(
            dcache.access(read_fetch(0x100, 0), 0, &mut events),
            RequestStatus::MISS
        );
        assert!(cache::event::was_read_sent(&events));
        assert!(cache::event::was_prefetch_sent(&events));
        assert!(dcache.inner.waiting_for_fill(0x140));
        // the demand fill and the prefetch fill
        assert_eq!(dcache.inner.miss_queue.len(), 2);
    }

    #[test]
    fn second_miss_on_same_block_is_coalesced() {
        let config = config::Config::default();
        let mut dcache = data_cache(&config);
        let mut events = Vec::new();

        assert_eq!(
            dcache.access(read_fetch(0x100, 0), 0, &mut events),
            RequestStatus::MISS
        );
        assert_eq!(
            dcache.access(read_fetch(0x104, 1), 1, &mut events),
            RequestStatus::MSHR_HIT
        );
        // still exactly one downstream fill
        assert_eq!(dcache.inner.miss_queue.len(), 1);
    }

    #[test]
    fn fill_releases_waiters_oldest_first() {
        let config = config::Config::default();
        let mut dcache = data_cache(&config);
        let mut events = Vec::new();

        let first = read_fetch(0x100, 0);
        let first_uid = first.uid;
        let second = read_fetch(0x104, 1);
        let second_uid = second.uid;
        dcache.access(first, 0, &mut events);
        dcache.access(second, 1, &mut events);

        dcache.fill(line_reply(0x100, config.line_size, 7), 100);

        let ready = 100 + config.latency;
        let head = dcache.pop_response().unwrap();
        assert_eq!(head.time, ready);
        assert_eq!(head.fetch.uid, first_uid);
        let next = dcache.pop_response().unwrap();
        assert_eq!(next.fetch.uid, second_uid);
        assert_eq!(next.fetch.data.as_deref(), Some(&[7u8, 7, 7, 7][..]));
    }

    #[test]
    fn write_miss_applies_store_on_fill() {
        let config = config::Config::default();
        let mut dcache = data_cache(&config);
        let mut events = Vec::new();

        let write = mem_fetch::Builder {
            addr: 0x208,
            kind: mem_fetch::Kind::WRITE_REQUEST,
            port_id: 0,
            req_size_bytes: 4,
            data: Some(vec![0xaa; 4]),
            is_prefetch: false,
            inject_cycle: 0,
        }
        .build();
        assert_eq!(dcache.access(write, 0, &mut events), RequestStatus::MISS);

        dcache.fill(line_reply(0x200, config.line_size, 0), 50);

        let ack = dcache.pop_response().unwrap();
        assert_eq!(ack.fetch.kind, mem_fetch::Kind::WRITE_ACK);

        // the stored bytes are now in the line
        let status = dcache.access(read_fetch(0x208, 60), 60, &mut events);
        assert_eq!(status, RequestStatus::HIT);
        let read = dcache.pop_response().unwrap();
        assert_eq!(read.fetch.data.as_deref(), Some(&[0xaa; 4][..]));
    }

    #[test]
    fn full_mshr_table_rejects_new_misses() {
        let config = config::Config {
            mshr_entries: 1,
            ..config::Config::default()
        };
        let mut dcache = data_cache(&config);
        let mut events = Vec::new();

        assert_eq!(
            dcache.access(read_fetch(0x100, 0), 0, &mut events),
            RequestStatus::MISS
        );
        // a different block has no free entry left
        assert_eq!(
            dcache.access(read_fetch(0x400, 1), 1, &mut events),
            RequestStatus::RESERVATION_FAIL
        );
        // merging onto the tracked block still works
        assert_eq!(
            dcache.access(read_fetch(0x104, 2), 2, &mut events),
            RequestStatus::MSHR_HIT
        );
    }

    #[test]
    fn miss_queue_backpressure_rejects_admission() {
        let config = config::Config {
            miss_queue_size: 1,
            ..config::Config::default()
        };
        let mut dcache = data_cache(&config);
        let mut events = Vec::new();

        // can_fit(2) fails with a single-slot miss queue
        let status = dcache.access(read_fetch(0x100, 0), 0, &mut events);
        assert_eq!(status, RequestStatus::RESERVATION_FAIL);
        assert!(dcache.inner.miss_queue.is_empty());
        assert!(!dcache.inner.waiting_for_fill(0x100));
    }
}
