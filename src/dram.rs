use crate::{address, fifo::Fifo, interconn as ic, mem_fetch};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Backing store with a fixed access latency.
///
/// Reads produce a reply `latency` cycles after they are accepted from the
/// request port. Writes (write-backs from the cache) are absorbed without an
/// acknowledgement. Unwritten bytes read as zero.
pub struct MainMemory {
    latency: u64,
    request_queue: Arc<Mutex<Fifo<ic::Packet<mem_fetch::MemFetch>>>>,
    /// Accepted reads waiting out the latency, in ready order.
    latency_queue: VecDeque<ic::Packet<mem_fetch::MemFetch>>,
    store: HashMap<address, u8>,
}

impl MainMemory {
    #[must_use]
    pub fn new(latency: u64, queue_size: usize) -> Self {
        Self {
            latency,
            request_queue: Arc::new(Mutex::new(Fifo::new(Some(queue_size)))),
            latency_queue: VecDeque::new(),
            store: HashMap::new(),
        }
    }

    /// The request-side port the cache sends into.
    #[must_use]
    pub fn port(&self) -> ic::Port<mem_fetch::MemFetch> {
        self.request_queue.clone()
    }

    #[must_use]
    pub fn busy(&self) -> bool {
        !self.latency_queue.is_empty() || !self.request_queue.lock().unwrap().is_empty()
    }

    /// The simulated contents of `[addr, addr + len)`.
    #[must_use]
    pub fn read(&self, addr: address, len: usize) -> Vec<u8> {
        (addr..addr + len as u64)
            .map(|a| self.store.get(&a).copied().unwrap_or(0))
            .collect()
    }

    pub fn write(&mut self, addr: address, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.store.insert(addr + i as u64, *byte);
        }
    }

    /// Drains the request port and returns the replies due at `time`.
    pub fn cycle(&mut self, time: u64) -> Vec<mem_fetch::MemFetch> {
        // drain the port before touching the store, the guard borrows it
        let incoming: Vec<_> = {
            let mut queue = self.request_queue.lock().unwrap();
            std::iter::from_fn(|| queue.dequeue()).collect()
        };
        for mut packet in incoming {
            match packet.fetch.kind {
                mem_fetch::Kind::WRITE_REQUEST => {
                    let data = packet.fetch.data.take().expect("write carries payload");
                    log::debug!(
                        "memory: write {} bytes at {:#x}",
                        data.len(),
                        packet.fetch.addr
                    );
                    self.write(packet.fetch.addr, &data);
                }
                mem_fetch::Kind::READ_REQUEST => {
                    packet
                        .fetch
                        .set_status(mem_fetch::Status::IN_MEM_LATENCY_QUEUE, time);
                    packet.time = time + self.latency;
                    self.latency_queue.push_back(packet);
                }
                kind => panic!("memory port received {kind:?}"),
            }
        }

        let mut replies = Vec::new();
        while let Some(packet) = self.latency_queue.front() {
            if packet.time > time {
                break;
            }
            let packet = self.latency_queue.pop_front().unwrap();
            let data = self.read(packet.fetch.addr, packet.fetch.req_size_bytes as usize);
            replies.push(packet.fetch.into_reply(Some(data)));
        }
        replies
    }
}

#[cfg(test)]
mod tests {
    use crate::{interconn as ic, mem_fetch};
    use ic::Connection;

    fn read_packet(addr: crate::address, size: u32, time: u64) -> ic::Packet<mem_fetch::MemFetch> {
        let fetch = mem_fetch::Builder {
            addr,
            kind: mem_fetch::Kind::READ_REQUEST,
            port_id: 0,
            req_size_bytes: size,
            data: None,
            is_prefetch: false,
            inject_cycle: time,
        }
        .build();
        ic::Packet { fetch, time }
    }

    #[test]
    fn read_completes_after_latency() {
        let mut mem = super::MainMemory::new(10, 8);
        mem.write(0x40, &[1, 2, 3, 4]);

        {
            let port = mem.port();
            let mut port = port.lock().unwrap();
            assert!(port.can_send(&[4]));
            port.send(read_packet(0x40, 4, 0));
        }

        for time in 0..10 {
            assert!(mem.cycle(time).is_empty());
        }
        let replies = mem.cycle(10);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind, mem_fetch::Kind::READ_REPLY);
        assert_eq!(replies[0].data.as_deref(), Some(&[1, 2, 3, 4][..]));
    }

    #[test]
    fn unwritten_bytes_read_as_zero() {
        let mem = super::MainMemory::new(1, 8);
        assert_eq!(mem.read(0x1000, 3), vec![0, 0, 0]);
    }

    #[test]
    fn write_and_read_accepted_in_one_cycle() {
        let mut mem = super::MainMemory::new(2, 8);
        let write = mem_fetch::Builder {
            addr: 0xc0,
            kind: mem_fetch::Kind::WRITE_REQUEST,
            port_id: 0,
            req_size_bytes: 4,
            data: Some(vec![4, 3, 2, 1]),
            is_prefetch: false,
            inject_cycle: 0,
        }
        .build();
        {
            let port = mem.port();
            let mut port = port.lock().unwrap();
            port.send(ic::Packet { fetch: write, time: 0 });
            port.send(read_packet(0xc0, 4, 0));
        }

        assert!(mem.cycle(0).is_empty());
        assert!(mem.cycle(1).is_empty());
        let replies = mem.cycle(2);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].data.as_deref(), Some(&[4, 3, 2, 1][..]));
    }

    #[test]
    fn writeback_is_absorbed_without_a_reply() {
        let mut mem = super::MainMemory::new(5, 8);
        let fetch = mem_fetch::Builder {
            addr: 0x80,
            kind: mem_fetch::Kind::WRITE_REQUEST,
            port_id: 0,
            req_size_bytes: 4,
            data: Some(vec![9, 9, 9, 9]),
            is_prefetch: false,
            inject_cycle: 0,
        }
        .build();
        mem.port().lock().unwrap().send(ic::Packet { fetch, time: 0 });

        assert!(mem.cycle(0).is_empty());
        assert!(!mem.busy());
        assert_eq!(mem.read(0x80, 4), vec![9, 9, 9, 9]);
    }
}
