use crate::address;
use bitvec::vec::BitVec;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Status {
    INVALID = 0,
    /// Allocated for an outstanding fill.
    RESERVED,
    VALID,
    /// Holds data newer than the downstream memory.
    MODIFIED,
}

/// Storage and state of a single cache line.
pub trait Block: std::fmt::Debug + std::fmt::Display + Send + Sync + 'static {
    /// Reserves this line for an incoming fill.
    fn allocate(&mut self, tag: address, block_addr: address, time: u64);

    /// Installs fill data, making the line valid.
    fn fill(&mut self, data: &[u8], time: u64);

    /// Writes bytes at `offset`, marking the line modified.
    fn write(&mut self, offset: usize, data: &[u8], time: u64);

    #[must_use]
    fn read(&self, offset: usize, len: usize) -> &[u8];

    #[must_use]
    fn data(&self) -> &[u8];

    #[must_use]
    fn tag(&self) -> address;

    #[must_use]
    fn block_addr(&self) -> address;

    #[must_use]
    fn status(&self) -> Status;

    fn set_status(&mut self, status: Status);

    #[must_use]
    fn is_valid(&self) -> bool {
        self.status() == Status::VALID
    }

    #[must_use]
    fn is_modified(&self) -> bool {
        self.status() == Status::MODIFIED
    }

    #[must_use]
    fn is_invalid(&self) -> bool {
        self.status() == Status::INVALID
    }

    #[must_use]
    fn is_reserved(&self) -> bool {
        self.status() == Status::RESERVED
    }

    fn set_last_access_time(&mut self, time: u64);

    #[must_use]
    fn last_access_time(&self) -> u64;

    #[must_use]
    fn alloc_time(&self) -> u64;

    #[must_use]
    fn dirty_size(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub tag: address,
    pub block_addr: address,
    pub status: Status,

    alloc_time: u64,
    fill_time: u64,
    pub last_access_time: u64,

    data: Box<[u8]>,
    dirty_byte_mask: BitVec,
}

impl Line {
    #[must_use]
    pub fn new(line_size: u32) -> Self {
        let line_size = line_size as usize;
        Self {
            tag: 0,
            block_addr: 0,
            status: Status::INVALID,
            alloc_time: 0,
            fill_time: 0,
            last_access_time: 0,
            data: vec![0u8; line_size].into_boxed_slice(),
            dirty_byte_mask: BitVec::repeat(false, line_size),
        }
    }
}

impl std::fmt::Display for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Line")
            .field("addr", &self.block_addr)
            .field("status", &self.status)
            .finish()
    }
}

impl Block for Line {
    fn allocate(&mut self, tag: address, block_addr: address, time: u64) {
        self.tag = tag;
        self.block_addr = block_addr;
        self.alloc_time = time;
        self.last_access_time = time;
        self.fill_time = 0;
        self.status = Status::RESERVED;
        self.data.fill(0);
        self.dirty_byte_mask.fill(false);
    }

    fn fill(&mut self, data: &[u8], time: u64) {
        debug_assert_eq!(self.status, Status::RESERVED);
        debug_assert_eq!(data.len(), self.data.len());
        self.data.copy_from_slice(data);
        self.fill_time = time;
        self.status = Status::VALID;
    }

    fn write(&mut self, offset: usize, data: &[u8], time: u64) {
        debug_assert!(offset + data.len() <= self.data.len());
        self.data[offset..offset + data.len()].copy_from_slice(data);
        for byte in offset..offset + data.len() {
            self.dirty_byte_mask.set(byte, true);
        }
        self.last_access_time = time;
        self.status = Status::MODIFIED;
    }

    fn read(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.data.len());
        &self.data[offset..offset + len]
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn tag(&self) -> address {
        self.tag
    }

    fn block_addr(&self) -> address {
        self.block_addr
    }

    fn status(&self) -> Status {
        self.status
    }

    fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    fn set_last_access_time(&mut self, time: u64) {
        self.last_access_time = time;
    }

    fn last_access_time(&self) -> u64 {
        self.last_access_time
    }

    fn alloc_time(&self) -> u64 {
        self.alloc_time
    }

    fn dirty_size(&self) -> usize {
        self.dirty_byte_mask.count_ones()
    }
}

#[cfg(test)]
mod tests {
    use super::{Block, Line, Status};

    #[test]
    fn allocate_then_fill_makes_line_valid() {
        let mut line = Line::new(64);
        assert!(line.is_invalid());

        line.allocate(0x100, 0x100, 10);
        assert!(line.is_reserved());
        assert_eq!(line.alloc_time(), 10);

        line.fill(&[7u8; 64], 20);
        assert!(line.is_valid());
        assert_eq!(line.read(0, 4), &[7, 7, 7, 7]);
    }

    #[test]
    fn write_marks_dirty_bytes() {
        let mut line = Line::new(64);
        line.allocate(0x40, 0x40, 0);
        line.fill(&[0u8; 64], 1);

        line.write(8, &[0xaa, 0xbb], 2);
        assert!(line.is_modified());
        assert_eq!(line.dirty_size(), 2);
        assert_eq!(line.read(8, 2), &[0xaa, 0xbb]);
        assert_eq!(line.read(10, 1), &[0]);
        assert_eq!(line.last_access_time(), 2);
    }

    #[test]
    fn allocate_clears_previous_contents() {
        let mut line = Line::new(64);
        line.allocate(0x40, 0x40, 0);
        line.fill(&[1u8; 64], 1);
        line.write(0, &[9], 2);

        line.allocate(0x80, 0x80, 3);
        assert!(line.is_reserved());
        assert_eq!(line.dirty_size(), 0);
        assert_eq!(line.data()[0], 0);
    }
}
