use std::sync::{Arc, Mutex};

/// A unit of transport between two components, stamped with the cycle it
/// was handed to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<D> {
    pub fetch: D,
    pub time: u64,
}

impl<D> std::fmt::Display for Packet<D>
where
    D: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.fetch, self.time)
    }
}

/// One direction of a port between two components.
///
/// `can_send` is the flow-control probe: a sender must check it and hold
/// its packet when the connection is busy. Nothing is ever dropped.
pub trait Connection<P>: Send + Sync + 'static {
    #[must_use]
    fn can_send(&self, packets: &[u32]) -> bool;

    fn send(&mut self, packet: P);
}

/// Shared handle to a connection.
pub type Port<P> = Arc<Mutex<dyn Connection<Packet<P>>>>;

#[cfg(test)]
mod tests {
    use super::{Connection, Packet};
    use crate::fifo::Fifo;

    #[test]
    fn fifo_backpressure_through_connection() {
        let mut port: Fifo<Packet<u64>> = Fifo::new(Some(1));
        assert!(port.can_send(&[8]));
        port.send(Packet { fetch: 1, time: 0 });
        assert!(!port.can_send(&[8]));
    }
}
