use crate::{address, cache::RequestStatus, config};

/// Port id used for fills that no CPU-side requester is waiting on.
pub const PREFETCH_PORT: usize = usize::MAX;

/// Observes the demand access stream and proposes blocks to fetch ahead.
pub trait Prefetcher: std::fmt::Debug + Send + Sync + 'static {
    /// Called once per admitted demand access with its outcome.
    ///
    /// Returns an address whose block should be brought into the cache, or
    /// `None` to stay quiet this access.
    fn notify_access(&mut self, addr: address, status: RequestStatus) -> Option<address>;
}

/// Fetches the sequentially next line after every demand miss.
#[derive(Debug, Clone)]
pub struct NextLine {
    line_size: u32,
}

impl NextLine {
    #[must_use]
    pub fn new(line_size: u32) -> Self {
        Self { line_size }
    }
}

impl Prefetcher for NextLine {
    fn notify_access(&mut self, addr: address, status: RequestStatus) -> Option<address> {
        match status {
            RequestStatus::MISS => Some(addr + u64::from(self.line_size)),
            _ => None,
        }
    }
}

#[must_use]
pub fn build(kind: config::PrefetcherKind, line_size: u32) -> Option<Box<dyn Prefetcher>> {
    match kind {
        config::PrefetcherKind::None => None,
        config::PrefetcherKind::NextLine => Some(Box::new(NextLine::new(line_size))),
    }
}

#[cfg(test)]
mod tests {
    use super::Prefetcher;
    use crate::cache::RequestStatus;

    #[test]
    fn next_line_fires_on_miss_only() {
        let mut prefetcher = super::NextLine::new(64);
        assert_eq!(
            prefetcher.notify_access(0x104, RequestStatus::MISS),
            Some(0x144)
        );
        assert_eq!(prefetcher.notify_access(0x104, RequestStatus::HIT), None);
        assert_eq!(prefetcher.notify_access(0x104, RequestStatus::MSHR_HIT), None);
    }
}
