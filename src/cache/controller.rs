use crate::address;

/// Address translation for a cache instance.
///
/// The tag deliberately keeps the index bits (it equals the block address),
/// which allows set index functions where different indices map to the same
/// set without tag aliasing.
pub trait CacheController: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Cache line tag for an address.
    #[must_use]
    fn tag(&self, addr: address) -> address;

    /// Address with the block offset bits masked off.
    #[must_use]
    fn block_addr(&self, addr: address) -> address;

    /// Set index for an address.
    #[must_use]
    fn set_index(&self, addr: address) -> usize;

    /// Byte offset within the cache line.
    #[must_use]
    fn offset(&self, addr: address) -> usize;

    /// Address used to key the miss status handling registers.
    #[must_use]
    fn mshr_addr(&self, addr: address) -> address {
        self.block_addr(addr)
    }
}

/// Linear set index: `(addr >> line_size_log2) mod num_sets`.
#[derive(Debug, Clone)]
pub struct Linear {
    line_size_log2: u32,
    num_sets: usize,
    offset_mask: u64,
}

impl Linear {
    #[must_use]
    pub fn new(config: &super::config::Config) -> Self {
        Self {
            line_size_log2: config.line_size_log2,
            num_sets: config.num_sets,
            offset_mask: u64::from(config.line_size - 1),
        }
    }
}

impl CacheController for Linear {
    fn tag(&self, addr: address) -> address {
        addr & !self.offset_mask
    }

    fn block_addr(&self, addr: address) -> address {
        addr & !self.offset_mask
    }

    fn set_index(&self, addr: address) -> usize {
        ((addr >> self.line_size_log2) as usize) % self.num_sets
    }

    fn offset(&self, addr: address) -> usize {
        (addr & self.offset_mask) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheController, Linear};
    use crate::cache;

    fn linear() -> Linear {
        // 4 sets x 2 ways x 64 byte lines
        let config = cache::config::Config {
            latency: 1,
            line_size: 64,
            line_size_log2: 6,
            associativity: 2,
            num_sets: 4,
            total_lines: 8,
            miss_queue_size: 8,
            mshr_entries: 8,
            mshr_max_merge: 4,
            replacement_policy: cache::config::ReplacementPolicy::FIFO,
        };
        Linear::new(&config)
    }

    #[test]
    fn block_addr_masks_offset_bits() {
        let translation = linear();
        assert_eq!(translation.block_addr(0x0), 0x0);
        assert_eq!(translation.block_addr(0x3f), 0x0);
        assert_eq!(translation.block_addr(0x40), 0x40);
        assert_eq!(translation.block_addr(0x47), 0x40);
        assert_eq!(translation.offset(0x47), 0x7);
    }

    #[test]
    fn set_index_wraps_around() {
        let translation = linear();
        assert_eq!(translation.set_index(0x00), 0);
        assert_eq!(translation.set_index(0x40), 1);
        assert_eq!(translation.set_index(0x80), 2);
        assert_eq!(translation.set_index(0xc0), 3);
        // fifth block wraps back to set 0
        assert_eq!(translation.set_index(0x100), 0);
    }

    #[test]
    fn mshr_addr_is_block_addr() {
        let translation = linear();
        assert_eq!(translation.mshr_addr(0x104), translation.block_addr(0x104));
    }
}
