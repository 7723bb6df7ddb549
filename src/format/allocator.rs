//! Append-only file space allocation.
//!
//! The allocator hands out offsets from a cursor that only ever grows.
//! Freed space is never reused within one write session.

use std::fmt;

use crate::directory::NodeId;
use crate::util::{Error, Result};

/// What an allocated extent holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExtentKind {
    Header,
    Attributes,
    NameIndex,
    ChunkTable,
    Payload,
}

impl fmt::Display for ExtentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Header => "headers",
            Self::Attributes => "attributes",
            Self::NameIndex => "name indices",
            Self::ChunkTable => "chunk tables",
            Self::Payload => "payload",
        };
        f.write_str(name)
    }
}

/// One allocated byte range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extent {
    pub kind: ExtentKind,
    /// Node the block belongs to, when it belongs to one.
    pub node: Option<NodeId>,
    pub offset: u64,
    pub len: u64,
}

/// Record of every allocation made during a write session.
#[derive(Clone, Debug, Default)]
pub struct LayoutTable {
    extents: Vec<Extent>,
}

impl LayoutTable {
    #[inline]
    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    /// Total bytes allocated for one kind of extent.
    pub fn bytes(&self, kind: ExtentKind) -> u64 {
        self.extents.iter().filter(|e| e.kind == kind).map(|e| e.len).sum()
    }

    /// Offset and length of a node's block of one kind.
    pub fn extent(&self, kind: ExtentKind, node: NodeId) -> Option<(u64, u64)> {
        self.extents
            .iter()
            .find(|e| e.kind == kind && e.node == Some(node))
            .map(|e| (e.offset, e.len))
    }

    /// Number of extents of one kind.
    pub fn count(&self, kind: ExtentKind) -> usize {
        self.extents.iter().filter(|e| e.kind == kind).count()
    }
}

/// Monotonic offset allocator.
#[derive(Debug)]
pub struct LayoutAllocator {
    cursor: u64,
    table: LayoutTable,
}

impl LayoutAllocator {
    /// Create an allocator whose first allocation starts at or after `start`.
    pub fn new(start: u64) -> Self {
        Self { cursor: start, table: LayoutTable::default() }
    }

    /// Reserve `size` bytes aligned to `alignment` (a power of two).
    ///
    /// Fails with [`Error::OutOfSpace`] if the range would not fit in a
    /// 64-bit offset.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<u64> {
        if !alignment.is_power_of_two() {
            return Err(Error::other(format!("alignment {} is not a power of two", alignment)));
        }
        let offset = self
            .cursor
            .checked_add(alignment - 1)
            .map(|c| c & !(alignment - 1))
            .ok_or(Error::OutOfSpace)?;
        let end = offset.checked_add(size).ok_or(Error::OutOfSpace)?;
        self.cursor = end;
        Ok(offset)
    }

    /// Reserve space and record it in the layout table.
    pub fn allocate_extent(&mut self, kind: ExtentKind, size: u64, alignment: u64) -> Result<u64> {
        self.record(kind, None, size, alignment)
    }

    /// Reserve space for a block owned by `node`.
    pub fn allocate_for(&mut self, node: NodeId, kind: ExtentKind, size: u64, alignment: u64) -> Result<u64> {
        self.record(kind, Some(node), size, alignment)
    }

    fn record(&mut self, kind: ExtentKind, node: Option<NodeId>, size: u64, alignment: u64) -> Result<u64> {
        let offset = self.allocate(size, alignment)?;
        self.table.extents.push(Extent { kind, node, offset, len: size });
        Ok(offset)
    }

    /// End of the highest allocation so far.
    #[inline]
    pub fn high_water_mark(&self) -> u64 {
        self.cursor
    }

    #[inline]
    pub fn table(&self) -> &LayoutTable {
        &self.table
    }

    pub fn into_table(self) -> LayoutTable {
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_and_aligned() -> Result<()> {
        let mut alloc = LayoutAllocator::new(32);
        assert_eq!(alloc.allocate(5, 8)?, 32);
        assert_eq!(alloc.allocate(3, 8)?, 40);
        assert_eq!(alloc.allocate(1, 1)?, 43);
        assert_eq!(alloc.allocate(0, 16)?, 48);
        assert_eq!(alloc.high_water_mark(), 48);
        Ok(())
    }

    #[test]
    fn test_out_of_space() {
        let mut alloc = LayoutAllocator::new(u64::MAX - 4);
        assert!(matches!(alloc.allocate(8, 1), Err(Error::OutOfSpace)));
        assert!(matches!(alloc.allocate(0, 16), Err(Error::OutOfSpace)));
    }

    #[test]
    fn test_bad_alignment() {
        let mut alloc = LayoutAllocator::new(0);
        assert!(alloc.allocate(1, 3).is_err());
        assert!(alloc.allocate(1, 0).is_err());
    }

    #[test]
    fn test_table() -> Result<()> {
        let mut alloc = LayoutAllocator::new(0);
        alloc.allocate_for(NodeId::ROOT, ExtentKind::Header, 25, 8)?;
        alloc.allocate_extent(ExtentKind::Payload, 100, 8)?;
        alloc.allocate_extent(ExtentKind::Payload, 50, 8)?;
        assert_eq!(alloc.table().bytes(ExtentKind::Payload), 150);
        assert_eq!(alloc.table().count(ExtentKind::Header), 1);
        assert_eq!(alloc.table().extent(ExtentKind::Header, NodeId::ROOT), Some((0, 25)));
        assert_eq!(alloc.table().extent(ExtentKind::Attributes, NodeId::ROOT), None);
        Ok(())
    }
}
