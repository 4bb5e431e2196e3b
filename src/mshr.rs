use crate::{address, mem_fetch};
use std::collections::{HashMap, VecDeque};

/// Waiters for one outstanding fill, in arrival order.
#[derive(Debug)]
pub struct Entry<F> {
    requests: VecDeque<F>,
}

impl<F> Entry<F> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &F> {
        self.requests.iter()
    }
}

impl<F> Default for Entry<F> {
    fn default() -> Self {
        Self {
            requests: VecDeque::new(),
        }
    }
}

/// Miss status handling registers.
///
/// Tracks the set of block addresses with an outstanding fill and the
/// requests merged onto each of them. An entry is present exactly while its
/// waiter list is non-empty: `drain` removes the entry together with the
/// waiters.
#[derive(Debug)]
pub struct Table<F> {
    num_entries: usize,
    max_merged: usize,
    entries: HashMap<address, Entry<F>>,
}

impl<F> Table<F> {
    #[must_use]
    pub fn new(num_entries: usize, max_merged: usize) -> Self {
        Self {
            num_entries,
            max_merged,
            entries: HashMap::with_capacity(num_entries),
        }
    }

    /// Checks if there is no more space for tracking a new memory access.
    #[must_use]
    pub fn full(&self, block_addr: address) -> bool {
        match self.entries.get(&block_addr) {
            Some(entry) => entry.requests.len() >= self.max_merged,
            None => self.entries.len() >= self.num_entries,
        }
    }

    /// Pending requests for a given block address.
    #[must_use]
    pub fn get(&self, block_addr: address) -> Option<&Entry<F>> {
        self.entries.get(&block_addr)
    }

    #[must_use]
    pub fn num_outstanding(&self) -> usize {
        self.entries.len()
    }

    /// Removes and returns all waiters for a completed fill, in FIFO order.
    #[must_use]
    pub fn drain(&mut self, block_addr: address) -> Option<VecDeque<F>> {
        let entry = self.entries.remove(&block_addr)?;
        debug_assert!(!entry.requests.is_empty());
        Some(entry.requests)
    }
}

impl Table<mem_fetch::MemFetch> {
    /// Adds or merges an access onto the entry for `block_addr`.
    ///
    /// # Panics
    /// A second concurrent write from the same sub-port to the same pending
    /// address is a protocol violation by the requester; the simulation
    /// halts rather than produce silently wrong timing.
    pub fn add(&mut self, block_addr: address, fetch: mem_fetch::MemFetch) {
        let entry = self.entries.entry(block_addr).or_default();
        assert!(entry.requests.len() < self.max_merged);

        if fetch.is_write() {
            if let Some(dup) = entry
                .requests
                .iter()
                .find(|pending| {
                    pending.is_write()
                        && pending.port_id == fetch.port_id
                        && pending.addr() == fetch.addr()
                })
            {
                panic!(
                    "protocol violation: port {} issued {} while {} is still pending on block {:#x}",
                    fetch.port_id, fetch, dup, block_addr,
                );
            }
        }

        log::trace!(
            "mshr::add(block_addr={:#x}, {}) => {} waiters",
            block_addr,
            fetch,
            entry.requests.len() + 1
        );
        entry.requests.push_back(fetch);
        debug_assert!(self.entries.len() <= self.num_entries);
    }
}

#[cfg(test)]
mod tests {
    use super::Table;
    use crate::mem_fetch::{self, Kind};

    fn fetch(addr: crate::address, kind: Kind, port_id: usize) -> mem_fetch::MemFetch {
        let data = match kind {
            Kind::WRITE_REQUEST => Some(vec![0xab; 4]),
            _ => None,
        };
        mem_fetch::Builder {
            addr,
            kind,
            port_id,
            req_size_bytes: 4,
            data,
            is_prefetch: false,
            inject_cycle: 0,
        }
        .build()
    }

    #[test]
    fn waiters_drain_in_arrival_order() {
        let mut mshrs = Table::new(4, 4);
        let first = fetch(0x100, Kind::READ_REQUEST, 0);
        let second = fetch(0x104, Kind::READ_REQUEST, 1);
        let first_uid = first.uid;
        let second_uid = second.uid;

        assert!(mshrs.get(0x100).is_none());
        assert_eq!(mshrs.num_outstanding(), 0);
        mshrs.add(0x100, first);
        mshrs.add(0x100, second);
        assert_eq!(mshrs.get(0x100).map(super::Entry::len), Some(2));
        // merged waiters share one outstanding fill
        assert_eq!(mshrs.num_outstanding(), 1);

        let drained = mshrs.drain(0x100).unwrap();
        let uids: Vec<u64> = drained.iter().map(|f| f.uid).collect();
        assert_eq!(uids, vec![first_uid, second_uid]);
        assert!(mshrs.get(0x100).is_none());
        assert_eq!(mshrs.num_outstanding(), 0);
        assert!(mshrs.drain(0x100).is_none());
    }

    #[test]
    fn merge_capacity_backpressure() {
        let mut mshrs = Table::new(1, 2);
        assert!(!mshrs.full(0x40));
        mshrs.add(0x40, fetch(0x40, Kind::READ_REQUEST, 0));
        // distinct block: table itself is full
        assert!(mshrs.full(0x80));
        // same block: one merge slot left
        assert!(!mshrs.full(0x40));
        mshrs.add(0x40, fetch(0x44, Kind::READ_REQUEST, 0));
        assert!(mshrs.full(0x40));
    }

    #[test]
    #[should_panic(expected = "protocol violation")]
    fn duplicate_concurrent_write_from_same_port_panics() {
        let mut mshrs = Table::new(4, 4);
        mshrs.add(0x100, fetch(0x108, Kind::WRITE_REQUEST, 0));
        mshrs.add(0x100, fetch(0x108, Kind::WRITE_REQUEST, 0));
    }

    #[test]
    fn same_address_writes_from_different_ports_merge() {
        let mut mshrs = Table::new(4, 4);
        mshrs.add(0x100, fetch(0x108, Kind::WRITE_REQUEST, 0));
        mshrs.add(0x100, fetch(0x108, Kind::WRITE_REQUEST, 1));
        assert_eq!(mshrs.get(0x100).map(super::Entry::len), Some(2));
    }
}
