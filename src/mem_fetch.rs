use crate::address;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static FETCH_UID: AtomicU64 = AtomicU64::new(0);

/// Request or response kind carried by the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    READ_REQUEST = 0,
    WRITE_REQUEST,
    READ_REPLY,
    WRITE_ACK,
    /// Synchronous rejection of a malformed or out-of-range request.
    ERROR_REPLY,
}

/// Location of the envelope in the simulated memory system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    INITIALIZED,
    IN_CPU_REQUEST_QUEUE,
    IN_CACHE_MISS_QUEUE,
    IN_MEM_REQUEST_QUEUE,
    IN_MEM_LATENCY_QUEUE,
    IN_CACHE_RESPONSE_QUEUE,
    IN_CPU_RESPONSE_QUEUE,
    REJECTED,
}

/// Transport envelope for one memory transaction.
///
/// Replies are derived from their request and keep its `uid`, which is what
/// requesters use to match responses to transactions.
#[derive(Debug, Clone)]
pub struct MemFetch {
    pub uid: u64,
    pub addr: address,
    pub req_size_bytes: u32,
    pub kind: Kind,
    /// CPU-side sub-port this transaction entered through.
    pub port_id: usize,
    /// Write payload for requests, read data for replies.
    pub data: Option<Vec<u8>>,
    /// Fills issued by the prefetcher have no requester waiting on them.
    pub is_prefetch: bool,
    pub status: Status,
    pub last_status_change: u64,
    /// Cycle the transaction entered the system.
    pub inject_cycle: u64,
}

#[derive(Debug, Clone)]
pub struct Builder {
    pub addr: address,
    pub kind: Kind,
    pub port_id: usize,
    pub req_size_bytes: u32,
    pub data: Option<Vec<u8>>,
    pub is_prefetch: bool,
    pub inject_cycle: u64,
}

impl Builder {
    #[must_use]
    pub fn build(self) -> MemFetch {
        let uid = FETCH_UID.fetch_add(1, Ordering::SeqCst);
        debug_assert!(self
            .data
            .as_ref()
            .map_or(true, |data| data.len() == self.req_size_bytes as usize));
        MemFetch {
            uid,
            addr: self.addr,
            req_size_bytes: self.req_size_bytes,
            kind: self.kind,
            port_id: self.port_id,
            data: self.data,
            is_prefetch: self.is_prefetch,
            status: Status::INITIALIZED,
            last_status_change: 0,
            inject_cycle: self.inject_cycle,
        }
    }
}

impl MemFetch {
    #[must_use]
    pub fn addr(&self) -> address {
        self.addr
    }

    #[must_use]
    pub fn is_write(&self) -> bool {
        self.kind == Kind::WRITE_REQUEST
    }

    #[must_use]
    pub fn is_read(&self) -> bool {
        self.kind == Kind::READ_REQUEST
    }

    #[must_use]
    pub fn is_reply(&self) -> bool {
        matches!(
            self.kind,
            Kind::READ_REPLY | Kind::WRITE_ACK | Kind::ERROR_REPLY
        )
    }

    pub fn set_status(&mut self, status: Status, time: u64) {
        self.status = status;
        self.last_status_change = time;
    }

    /// Turns a request into its reply, keeping the transaction uid.
    #[must_use]
    pub fn into_reply(self, data: Option<Vec<u8>>) -> Self {
        debug_assert!(!self.is_reply());
        let kind = match self.kind {
            Kind::READ_REQUEST => Kind::READ_REPLY,
            Kind::WRITE_REQUEST => Kind::WRITE_ACK,
            kind => panic!("cannot build reply for {kind:?}"),
        };
        Self { kind, data, ..self }
    }

    /// Turns a request into a synchronous rejection.
    #[must_use]
    pub fn into_error_reply(self) -> Self {
        Self {
            kind: Kind::ERROR_REPLY,
            data: None,
            ..self
        }
    }
}

impl std::fmt::Display for MemFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}(addr={}, uid={})", self.kind, self.addr, self.uid)?;
        if self.is_prefetch {
            write!(f, "[prefetch]")?;
        }
        Ok(())
    }
}

impl PartialEq for MemFetch {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for MemFetch {}

#[cfg(test)]
mod tests {
    use super::{Builder, Kind};

    fn read(addr: super::address) -> super::MemFetch {
        Builder {
            addr,
            kind: Kind::READ_REQUEST,
            port_id: 0,
            req_size_bytes: 4,
            data: None,
            is_prefetch: false,
            inject_cycle: 0,
        }
        .build()
    }

    #[test]
    fn uids_are_unique() {
        let first = read(0x100);
        let second = read(0x100);
        assert_ne!(first.uid, second.uid);
        assert_ne!(first, second);
    }

    #[test]
    fn reply_keeps_uid_and_flips_kind() {
        let fetch = read(0x80);
        let uid = fetch.uid;
        let reply = fetch.into_reply(Some(vec![0u8; 4]));
        assert_eq!(reply.uid, uid);
        assert_eq!(reply.kind, Kind::READ_REPLY);
        assert!(reply.is_reply());
    }

    #[test]
    fn error_reply_has_no_payload() {
        let fetch = Builder {
            addr: 0xdead_0000,
            kind: Kind::WRITE_REQUEST,
            port_id: 1,
            req_size_bytes: 4,
            data: Some(vec![1, 2, 3, 4]),
            is_prefetch: false,
            inject_cycle: 3,
        }
        .build();
        let reply = fetch.into_error_reply();
        assert_eq!(reply.kind, Kind::ERROR_REPLY);
        assert_eq!(reply.data, None);
        assert_eq!(reply.port_id, 1);
    }
}
