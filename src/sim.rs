use crate::{address, cache, config, dram, fifo::Fifo, interconn as ic, mem_fetch, stats};

use cache::RequestStatus;
use rangemap::RangeSet;

/// One CPU-side sub-port: a request FIFO in, a response FIFO out.
///
/// Both queues preserve arrival order; the head request blocks younger ones
/// on the same port until the cache admits it.
pub struct CorePort {
    pub id: usize,
    pub request_queue: Fifo<ic::Packet<mem_fetch::MemFetch>>,
    pub response_queue: Fifo<ic::Packet<mem_fetch::MemFetch>>,
}

impl CorePort {
    fn new(id: usize, queue_size: usize) -> Self {
        Self {
            id,
            request_queue: Fifo::new(Some(queue_size)),
            response_queue: Fifo::new(Some(queue_size)),
        }
    }
}

/// Cycle-driven simulator wiring CPU-side ports, one data cache and the
/// backing memory.
///
/// Each [`cycle`](Self::cycle) advances every component once. Requests flow
/// port -> cache -> memory; replies flow back the same way with the
/// configured latencies applied.
pub struct Simulator {
    pub config: config::Config,
    addr_ranges: RangeSet<address>,
    pub cache: cache::Data<cache::block::Line, cache::controller::Linear>,
    pub mem: dram::MainMemory,
    pub ports: Vec<CorePort>,
    cycle: u64,
    rejected: u64,
}

impl Simulator {
    pub fn new(config: config::Config) -> Result<Self, config::Error> {
        config.validate()?;
        let cache = cache::data::Builder {
            name: config.name.clone(),
            config: &config,
        }
        .build();
        let mem = dram::MainMemory::new(config.mem_latency, config.mem_queue_size);
        let ports = (0..config.num_cpu_ports)
            .map(|id| CorePort::new(id, config.cpu_queue_size))
            .collect();
        let addr_ranges = config.address_ranges();

        let mut sim = Self {
            config,
            addr_ranges,
            cache,
            mem,
            ports,
            cycle: 0,
            rejected: 0,
        };
        let port = sim.mem.port();
        sim.cache.set_mem_port(port);
        Ok(sim)
    }

    #[must_use]
    pub fn current_cycle(&self) -> u64 {
        self.cycle
    }

    /// Hands a read request to a CPU-side port.
    ///
    /// Returns the transaction uid, or `None` when the port FIFO is full and
    /// the caller must retry later.
    pub fn send_read(&mut self, port_id: usize, addr: address, size: u32) -> Option<u64> {
        self.send(port_id, addr, mem_fetch::Kind::READ_REQUEST, size, None)
    }

    /// Hands a write request to a CPU-side port.
    pub fn send_write(&mut self, port_id: usize, addr: address, data: Vec<u8>) -> Option<u64> {
        let size = data.len() as u32;
        self.send(port_id, addr, mem_fetch::Kind::WRITE_REQUEST, size, Some(data))
    }

    fn send(
        &mut self,
        port_id: usize,
        addr: address,
        kind: mem_fetch::Kind,
        size: u32,
        data: Option<Vec<u8>>,
    ) -> Option<u64> {
        let port = &mut self.ports[port_id];
        if !port.request_queue.can_fit(1) {
            return None;
        }
        let mut fetch = mem_fetch::Builder {
            addr,
            kind,
            port_id,
            req_size_bytes: size,
            data,
            is_prefetch: false,
            inject_cycle: self.cycle,
        }
        .build();
        fetch.set_status(mem_fetch::Status::IN_CPU_REQUEST_QUEUE, self.cycle);
        let uid = fetch.uid;
        port.request_queue.enqueue(ic::Packet {
            fetch,
            time: self.cycle,
        });
        Some(uid)
    }

    /// The oldest completed response on a port, if any.
    pub fn pop_response(&mut self, port_id: usize) -> Option<ic::Packet<mem_fetch::MemFetch>> {
        self.ports[port_id].response_queue.dequeue()
    }

    /// Advances the simulation by one cycle.
    pub fn cycle(&mut self) {
        let time = self.cycle;
        log::trace!("===== cycle {time} =====");

        // completed cache replies become visible on their ports
        while let Some(packet) = self.cache.top_response(time) {
            let port_id = packet.fetch.port_id;
            debug_assert!(port_id < self.ports.len());
            if !self.ports[port_id].response_queue.can_fit(1) {
                break;
            }
            let mut packet = self.cache.pop_response().unwrap();
            packet
                .fetch
                .set_status(mem_fetch::Status::IN_CPU_RESPONSE_QUEUE, time);
            self.ports[port_id].response_queue.enqueue(packet);
        }

        // each port offers its head request to the cache
        for port_id in 0..self.ports.len() {
            let Some(packet) = self.ports[port_id].request_queue.first() else {
                continue;
            };
            let addr = packet.fetch.addr();
            let size = packet.fetch.req_size_bytes;
            let offset = addr & u64::from(self.config.line_size - 1);
            let in_range = self.addr_ranges.contains(&addr);
            let crosses_line = offset + u64::from(size) > u64::from(self.config.line_size);

            if !in_range || crosses_line {
                // rejected synchronously, before the cache sees it
                if !self.ports[port_id].response_queue.can_fit(1) {
                    continue;
                }
                let packet = self.ports[port_id].request_queue.dequeue().unwrap();
                log::warn!(
                    "port {port_id}: rejecting {} (in_range={in_range}, crosses_line={crosses_line})",
                    packet.fetch,
                );
                let mut reply = packet.fetch.into_error_reply();
                reply.set_status(mem_fetch::Status::REJECTED, time);
                self.rejected += 1;
                self.ports[port_id]
                    .response_queue
                    .enqueue(ic::Packet { fetch: reply, time });
                continue;
            }

            let fetch = packet.fetch.clone();
            let mut events = Vec::new();
            let status = self.cache.access(fetch, time, &mut events);
            log::trace!("port {port_id}: head request -> {status:?}");
            if status != RequestStatus::RESERVATION_FAIL {
                self.ports[port_id].request_queue.dequeue();
            }
        }

        // miss queue drains into the memory port
        self.cache.cycle(time);

        // memory returns due fills
        for reply in self.mem.cycle(time) {
            self.cache.fill(reply, time);
        }

        self.cycle += 1;
    }

    /// Whether cycling can still make progress.
    ///
    /// Responses already parked in a CPU-side response FIFO do not count;
    /// they wait for the requester to pop them. A cache reply whose target
    /// FIFO is full does not count either: delivery is blocked until the
    /// requester drains the port, so cycling cannot move it.
    #[must_use]
    pub fn busy(&self) -> bool {
        let deliverable_response = self
            .cache
            .peek_response()
            .map_or(false, |packet| {
                self.ports[packet.fetch.port_id].response_queue.can_fit(1)
            });
        self.ports.iter().any(|port| !port.request_queue.is_empty())
            || self.cache.has_inflight_fills()
            || self.mem.busy()
            || deliverable_response
    }

    /// Runs until all deliverable work has drained into the response FIFOs.
    pub fn run_to_completion(&mut self) {
        while self.busy() {
            self.cycle();
        }
    }

    #[must_use]
    pub fn stats(&self) -> stats::Sim {
        stats::Sim {
            cycles: self.cycle,
            rejected: self.rejected,
            cache: self.cache.stats().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{config, mem_fetch};
    use color_eyre::eyre;

    #[test]
    fn invalid_config_fails_construction() {
        let config = config::Config {
            size: 4096,
            ..config::Config::default()
        };
        assert!(super::Simulator::new(config).is_err());
    }

    #[test]
    fn out_of_range_request_is_rejected_synchronously() -> eyre::Result<()> {
        let config = config::Config {
            addr_ranges: vec![0x0..0x1000],
            ..config::Config::default()
        };
        let mut sim = super::Simulator::new(config)?;
        let uid = sim.send_read(0, 0x2000, 4).unwrap();

        sim.cycle();
        let reply = sim.pop_response(0).unwrap();
        assert_eq!(reply.fetch.uid, uid);
        assert_eq!(reply.fetch.kind, mem_fetch::Kind::ERROR_REPLY);
        assert_eq!(sim.stats().rejected, 1);
        Ok(())
    }

    #[test]
    fn line_crossing_request_is_rejected() -> eyre::Result<()> {
        let mut sim = super::Simulator::new(config::Config::default())?;
        // starts 4 bytes before a line boundary, asks for 8
        sim.send_read(0, 0x7c, 8).unwrap();

        sim.cycle();
        let reply = sim.pop_response(0).unwrap();
        assert_eq!(reply.fetch.kind, mem_fetch::Kind::ERROR_REPLY);
        Ok(())
    }

    #[test]
    fn port_fifo_applies_backpressure() -> eyre::Result<()> {
        let config = config::Config {
            cpu_queue_size: 2,
            ..config::Config::default()
        };
        let mut sim = super::Simulator::new(config)?;
        assert!(sim.send_read(0, 0x0, 4).is_some());
        assert!(sim.send_read(0, 0x40, 4).is_some());
        assert!(sim.send_read(0, 0x80, 4).is_none());
        Ok(())
    }
}
