//! Finalize-time chunk encoding and placement.

use rayon::prelude::*;
use tracing::trace;

use super::chunks::{block_cells, ChunkBuf};
use super::{Dataset, Layout};
use crate::core::compress;
use crate::format::layout::{BlockRef, DiskLayout, CHUNK_ZLIB, DEFAULT_ALIGNMENT};
use crate::format::{ExtentKind, LayoutAllocator, WritePlan};
use crate::util::codec::Decoder;
use crate::util::{Coord, Error, Result};

/// Location of one stored chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Chunk index along each dimension.
    pub coord: Coord,
    pub offset: u64,
    /// Bytes on disk, after compression.
    pub stored_len: u64,
    pub compressed: bool,
}

/// Serializes dataset chunks into the output file.
///
/// Chunks are encoded (and compressed) independently, in parallel when
/// enabled; offsets are then assigned one chunk at a time through the
/// allocator, so placement is deterministic.
#[derive(Clone, Debug)]
pub struct StorageEngine {
    /// Compression level for chunked datasets without their own level.
    pub default_compression: u32,
    pub alignment: u64,
    pub parallel: bool,
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self {
            default_compression: 0,
            alignment: DEFAULT_ALIGNMENT,
            parallel: true,
        }
    }
}

impl StorageEngine {
    /// Effective compression level of a dataset.
    pub fn compression_level(&self, dataset: &Dataset) -> u32 {
        match dataset.layout() {
            Layout::Chunked { compression, .. } => compression.unwrap_or(self.default_compression),
            Layout::Contiguous => 0,
        }
    }

    /// Encode the dataset's chunks, reserve space for them and queue their
    /// bytes. Returns one record per stored chunk, sorted by coordinate.
    ///
    /// Chunks of a chunked dataset that hold only fill values are not
    /// stored; they read back as fill either way.
    pub fn write(
        &self,
        dataset: &Dataset,
        allocator: &mut LayoutAllocator,
        plan: &mut WritePlan,
    ) -> Result<Vec<ChunkRecord>> {
        let level = self.compression_level(dataset);
        let chunked = dataset.layout().is_chunked();
        let chunk_shape = dataset.chunk_shape();
        let empty = if chunked {
            let cells = block_cells(dataset.element_type(), &chunk_shape)?;
            Some(ChunkBuf::filled(dataset.element_type(), dataset.fill(), cells))
        } else {
            None
        };

        let encode = |(coord, chunk): (&Coord, &ChunkBuf)| -> Result<Option<(Coord, Vec<u8>, bool)>> {
            if empty.as_ref() == Some(chunk) {
                return Ok(None);
            }
            let raw = chunk.encode();
            Ok(Some(match compress(&raw, level)? {
                Some(packed) => (coord.clone(), packed, true),
                None => (coord.clone(), raw, false),
            }))
        };

        let mut encoded: Vec<(Coord, Vec<u8>, bool)> = if self.parallel {
            dataset
                .store()
                .map()
                .par_iter()
                .map(encode)
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .flatten()
                .collect()
        } else {
            dataset
                .store()
                .map()
                .iter()
                .map(encode)
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .flatten()
                .collect()
        };
        encoded.sort_by(|a, b| a.0.cmp(&b.0));

        let mut records = Vec::with_capacity(encoded.len());
        for (coord, bytes, compressed) in encoded {
            let stored_len = bytes.len() as u64;
            let offset = allocator.allocate_extent(ExtentKind::Payload, stored_len, self.alignment)?;
            trace!(?coord, offset, stored_len, compressed, "placed chunk");
            plan.push(offset, bytes);
            records.push(ChunkRecord { coord, offset, stored_len, compressed });
        }
        Ok(records)
    }

    /// Place the chunk table (for chunked datasets) and describe the layout.
    pub(crate) fn place_layout(
        &self,
        dataset: &Dataset,
        records: &[ChunkRecord],
        allocator: &mut LayoutAllocator,
        plan: &mut WritePlan,
    ) -> Result<DiskLayout> {
        match dataset.layout() {
            Layout::Contiguous => Ok(match records.first() {
                Some(r) => DiskLayout::Contiguous { offset: r.offset, len: r.stored_len },
                None => DiskLayout::Contiguous { offset: 0, len: 0 },
            }),
            Layout::Chunked { chunk_shape, .. } => {
                let count = u32::try_from(records.len())
                    .map_err(|_| Error::other(format!("{} chunks exceed the table limit", records.len())))?;
                let table = encode_chunk_table(records);
                let offset = if table.is_empty() {
                    0
                } else {
                    allocator.allocate_extent(ExtentKind::ChunkTable, table.len() as u64, self.alignment)?
                };
                if !table.is_empty() {
                    plan.push(offset, table);
                }
                Ok(DiskLayout::Chunked {
                    chunk_shape: chunk_shape.clone(),
                    compression: self.compression_level(dataset) as u8,
                    table: BlockRef { offset, count },
                })
            }
        }
    }
}

/// Encode chunk table entries: coordinate, offset, stored length, flags.
pub(crate) fn encode_chunk_table(records: &[ChunkRecord]) -> Vec<u8> {
    let mut buf = Vec::new();
    for r in records {
        for &c in &r.coord {
            buf.extend_from_slice(&c.to_le_bytes());
        }
        buf.extend_from_slice(&r.offset.to_le_bytes());
        buf.extend_from_slice(&r.stored_len.to_le_bytes());
        buf.push(if r.compressed { CHUNK_ZLIB } else { 0 });
    }
    buf
}

/// Decode `count` chunk table entries of the given rank.
pub(crate) fn decode_chunk_table(d: &mut Decoder<'_>, rank: usize, count: u32) -> Result<Vec<ChunkRecord>> {
    let entry = 8 * rank + 17;
    if (count as usize).saturating_mul(entry) > d.remaining() {
        return Err(Error::UnexpectedEof((count as u64).saturating_mul(entry as u64)));
    }
    let mut records: Vec<ChunkRecord> = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut coord = Coord::with_capacity(rank);
        for _ in 0..rank {
            coord.push(d.u64()?);
        }
        let offset = d.u64()?;
        let stored_len = d.u64()?;
        let flags = d.u8()?;
        if flags & !CHUNK_ZLIB != 0 {
            return Err(Error::invalid(format!("unknown chunk flags {:#04x}", flags)));
        }
        if records.last().map_or(false, |prev| prev.coord >= coord) {
            return Err(Error::invalid("chunk table not sorted"));
        }
        records.push(ChunkRecord { coord, offset, stored_len, compressed: flags & CHUNK_ZLIB != 0 });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Selection;
    use crate::storage::DatasetBuilder;

    #[test]
    fn test_sparse_chunks_placed_in_order() -> Result<()> {
        let mut ds = DatasetBuilder::of::<i32>([10]).chunked(&[4]).build()?;
        ds.write_typed(&Selection::from(8..10), &[8, 9])?;
        ds.write_typed(&Selection::from(0..2), &[0, 0])?;

        let engine = StorageEngine::default();
        let mut alloc = LayoutAllocator::new(32);
        let mut plan = WritePlan::new();
        let records = engine.write(&ds, &mut alloc, &mut plan)?;

        // The chunk holding only fill values is not stored.
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].coord.as_slice(), &[2]);
        assert_eq!(records[0].offset, 32);
        assert_eq!(records[0].stored_len, 16);
        assert_eq!(plan.len(), 1);
        Ok(())
    }

    #[test]
    fn test_compressed_chunks() -> Result<()> {
        let mut ds = DatasetBuilder::of::<u8>([4096]).chunked(&[1024]).compression(6).build()?;
        ds.write_typed(&Selection::from(0..4096), &vec![7u8; 4096])?;

        let engine = StorageEngine { parallel: false, ..StorageEngine::default() };
        let mut alloc = LayoutAllocator::new(0);
        let mut plan = WritePlan::new();
        let records = engine.write(&ds, &mut alloc, &mut plan)?;
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.compressed && r.stored_len < 1024));

        let layout = engine.place_layout(&ds, &records, &mut alloc, &mut plan)?;
        let DiskLayout::Chunked { compression, table, .. } = layout else {
            panic!("expected chunked layout");
        };
        assert_eq!(compression, 6);
        assert_eq!(table.count, 4);
        Ok(())
    }

    #[test]
    fn test_chunk_table_codec() -> Result<()> {
        let records = vec![
            ChunkRecord { coord: Coord::from_slice(&[0, 1]), offset: 64, stored_len: 10, compressed: false },
            ChunkRecord { coord: Coord::from_slice(&[1, 0]), offset: 80, stored_len: 7, compressed: true },
        ];
        let bytes = encode_chunk_table(&records);
        assert_eq!(decode_chunk_table(&mut Decoder::new(&bytes), 2, 2)?, records);
        assert!(decode_chunk_table(&mut Decoder::new(&bytes), 2, 3).is_err());
        Ok(())
    }
}
