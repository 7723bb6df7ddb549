//! Chunk buffers, the in-memory chunk store, and the selection read/write
//! algorithms shared by in-memory and on-disk datasets.

use std::borrow::Cow;
use std::collections::BTreeMap;

use super::hyperslab::{chunk_runs, intersecting_chunks};
use crate::core::Selection;
use crate::util::codec::{put_cells, Decoder};
use crate::util::{Coord, ElementType, Error, Result};

/// Decoded cells of one chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ChunkBuf {
    Fixed(Vec<u8>),
    VarLen(Vec<Vec<u8>>),
}

impl ChunkBuf {
    /// A chunk of `cells` fill values.
    pub(crate) fn filled(element_type: ElementType, fill: &[u8], cells: usize) -> Self {
        if element_type.is_variable() {
            Self::VarLen(vec![Vec::new(); cells])
        } else {
            Self::Fixed(fill.repeat(cells))
        }
    }

    /// Serialized form: raw cells, or `(u64 len, bytes)` per variable-length cell.
    pub(crate) fn encode(&self) -> Vec<u8> {
        match self {
            Self::Fixed(bytes) => bytes.clone(),
            Self::VarLen(cells) => {
                let mut buf = Vec::with_capacity(cells.iter().map(|c| 8 + c.len()).sum());
                put_cells(&mut buf, cells);
                buf
            }
        }
    }

    pub(crate) fn decode(bytes: &[u8], element_type: ElementType, cells: usize) -> Result<Self> {
        match element_type.size() {
            Some(size) => {
                if Some(bytes.len()) != cells.checked_mul(size) {
                    return Err(Error::invalid(format!(
                        "chunk holds {} bytes, expected {} cells of {}",
                        bytes.len(),
                        cells,
                        element_type
                    )));
                }
                Ok(Self::Fixed(bytes.to_vec()))
            }
            None => {
                let mut d = Decoder::new(bytes);
                let decoded = d.cells(cells)?;
                if !d.is_empty() {
                    return Err(Error::invalid("trailing bytes after variable-length chunk"));
                }
                Ok(Self::VarLen(decoded))
            }
        }
    }
}

/// Where chunk buffers come from when reading a selection.
pub(crate) trait ChunkSource {
    /// The chunk at `coord`, or `None` if it was never written.
    fn chunk(&self, coord: &[u64]) -> Result<Option<Cow<'_, ChunkBuf>>>;
}

/// Sparse in-memory chunk map, keyed by chunk coordinate.
#[derive(Clone, Debug, Default)]
pub(crate) struct ChunkStore {
    chunks: BTreeMap<Coord, ChunkBuf>,
}

impl ChunkStore {
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Coord, &ChunkBuf)> {
        self.chunks.iter()
    }

    pub(crate) fn map(&self) -> &BTreeMap<Coord, ChunkBuf> {
        &self.chunks
    }

    pub(crate) fn map_mut(&mut self) -> &mut BTreeMap<Coord, ChunkBuf> {
        &mut self.chunks
    }
}

impl ChunkSource for ChunkStore {
    fn chunk(&self, coord: &[u64]) -> Result<Option<Cow<'_, ChunkBuf>>> {
        Ok(self.chunks.get(coord).map(Cow::Borrowed))
    }
}

/// Geometry needed to move cells between chunks and a selection buffer.
pub(crate) struct ChunkGeometry<'a> {
    pub element_type: ElementType,
    pub chunk_shape: &'a [u64],
    pub fill: &'a [u8],
}

impl ChunkGeometry<'_> {
    pub(crate) fn cells_per_chunk(&self) -> Result<usize> {
        block_cells(self.element_type, self.chunk_shape)
    }

    fn element_size(&self) -> Result<usize> {
        self.element_type.size().ok_or_else(|| Error::TypeMismatch {
            expected: "fixed-size element type".to_string(),
            actual: self.element_type.to_string(),
        })
    }

    fn varlen_check(&self) -> Result<()> {
        if self.element_type.is_variable() {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                expected: "variable-length element type".to_string(),
                actual: self.element_type.to_string(),
            })
        }
    }

    /// Read the selection's fixed-size cells, filling absent regions.
    pub(crate) fn read_fixed(&self, src: &impl ChunkSource, sel: &Selection) -> Result<Vec<u8>> {
        let size = self.element_size()?;
        let n = selection_len(sel)?;
        let mut out = self.fill.repeat(n);
        for coord in intersecting_chunks(sel.start(), sel.count(), self.chunk_shape) {
            let Some(chunk) = src.chunk(&coord)? else { continue };
            let ChunkBuf::Fixed(bytes) = &*chunk else {
                return Err(Error::invalid("variable-length chunk in fixed-size dataset"));
            };
            for run in chunk_runs(sel.start(), sel.count(), self.chunk_shape, &coord) {
                let src_range = run.chunk_offset * size..(run.chunk_offset + run.len) * size;
                let dst = run.sel_offset * size;
                let cells = bytes.get(src_range).ok_or_else(|| Error::invalid("short chunk"))?;
                out[dst..dst + cells.len()].copy_from_slice(cells);
            }
        }
        Ok(out)
    }

    /// Read the selection's variable-length cells; absent cells are empty.
    pub(crate) fn read_varlen(&self, src: &impl ChunkSource, sel: &Selection) -> Result<Vec<Vec<u8>>> {
        self.varlen_check()?;
        let mut out = vec![Vec::new(); selection_len(sel)?];
        for coord in intersecting_chunks(sel.start(), sel.count(), self.chunk_shape) {
            let Some(chunk) = src.chunk(&coord)? else { continue };
            let ChunkBuf::VarLen(cells) = &*chunk else {
                return Err(Error::invalid("fixed-size chunk in variable-length dataset"));
            };
            for run in chunk_runs(sel.start(), sel.count(), self.chunk_shape, &coord) {
                let src = cells
                    .get(run.chunk_offset..run.chunk_offset + run.len)
                    .ok_or_else(|| Error::invalid("short chunk"))?;
                out[run.sel_offset..run.sel_offset + run.len].clone_from_slice(src);
            }
        }
        Ok(out)
    }

    /// Write fixed-size cells into the store, creating chunks as needed.
    pub(crate) fn write_fixed(&self, store: &mut ChunkStore, sel: &Selection, data: &[u8]) -> Result<()> {
        let size = self.element_size()?;
        let expected = selection_len(sel)?
            .checked_mul(size)
            .ok_or_else(|| Error::shape("selection too large"))?;
        if data.len() != expected {
            return Err(Error::shape(format!(
                "{} bytes for {} elements of {}, expected {}",
                data.len(),
                sel.num_elements(),
                self.element_type,
                expected
            )));
        }
        let cells = self.cells_per_chunk()?;
        for coord in intersecting_chunks(sel.start(), sel.count(), self.chunk_shape) {
            let runs = chunk_runs(sel.start(), sel.count(), self.chunk_shape, &coord);
            let chunk = store
                .chunks
                .entry(coord)
                .or_insert_with(|| ChunkBuf::filled(self.element_type, self.fill, cells));
            let ChunkBuf::Fixed(bytes) = chunk else {
                return Err(Error::invalid("variable-length chunk in fixed-size dataset"));
            };
            for run in runs {
                let src = &data[run.sel_offset * size..(run.sel_offset + run.len) * size];
                let dst = run.chunk_offset * size;
                bytes[dst..dst + src.len()].copy_from_slice(src);
            }
        }
        Ok(())
    }

    /// Write variable-length cells into the store.
    pub(crate) fn write_varlen<C: AsRef<[u8]>>(
        &self,
        store: &mut ChunkStore,
        sel: &Selection,
        items: &[C],
    ) -> Result<()> {
        self.varlen_check()?;
        if items.len() != selection_len(sel)? {
            return Err(Error::shape(format!(
                "{} items for {} selected elements",
                items.len(),
                sel.num_elements()
            )));
        }
        let cells = self.cells_per_chunk()?;
        for coord in intersecting_chunks(sel.start(), sel.count(), self.chunk_shape) {
            let runs = chunk_runs(sel.start(), sel.count(), self.chunk_shape, &coord);
            let chunk = store
                .chunks
                .entry(coord)
                .or_insert_with(|| ChunkBuf::filled(self.element_type, self.fill, cells));
            let ChunkBuf::VarLen(chunk_cells) = chunk else {
                return Err(Error::invalid("fixed-size chunk in variable-length dataset"));
            };
            for run in runs {
                for i in 0..run.len {
                    chunk_cells[run.chunk_offset + i] = items[run.sel_offset + i].as_ref().to_vec();
                }
            }
        }
        Ok(())
    }
}

/// Cells in a block of `extents`.
///
/// Fails with [`Error::OutOfSpace`] when the block's in-memory size does not
/// fit the address space. Variable-length cells count one `Vec` each.
pub(crate) fn block_cells(element_type: ElementType, extents: &[u64]) -> Result<usize> {
    let cells = extents
        .iter()
        .try_fold(1usize, |acc, &e| acc.checked_mul(usize::try_from(e).ok()?))
        .ok_or(Error::OutOfSpace)?;
    let width = element_type.size().unwrap_or(std::mem::size_of::<Vec<u8>>()).max(1);
    match cells.checked_mul(width) {
        Some(bytes) if bytes <= isize::MAX as usize => Ok(cells),
        _ => Err(Error::OutOfSpace),
    }
}

fn selection_len(sel: &Selection) -> Result<usize> {
    usize::try_from(sel.num_elements())
        .ok()
        .filter(|&n| n != usize::MAX)
        .ok_or_else(|| Error::shape(format!("selection {} too large", sel)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry<'a>(chunk: &'a [u64], fill: &'a [u8]) -> ChunkGeometry<'a> {
        ChunkGeometry { element_type: ElementType::Int32, chunk_shape: chunk, fill }
    }

    #[test]
    fn test_write_then_read() -> Result<()> {
        let fill = 0i32.to_le_bytes();
        let g = geometry(&[4], &fill);
        let mut store = ChunkStore::default();
        let data: Vec<u8> = [5i32, 6].iter().flat_map(|v| v.to_le_bytes()).collect();
        g.write_fixed(&mut store, &Selection::from(3..5), &data)?;
        assert_eq!(store.len(), 2);

        let out = g.read_fixed(&store, &Selection::from(2..6))?;
        let values: Vec<i32> = out.chunks_exact(4).map(|c| i32::from_le_bytes(c.try_into().unwrap())).collect();
        assert_eq!(values, vec![0, 5, 6, 0]);
        Ok(())
    }

    #[test]
    fn test_length_mismatch() {
        let fill = 0i32.to_le_bytes();
        let g = geometry(&[4], &fill);
        let mut store = ChunkStore::default();
        let err = g.write_fixed(&mut store, &Selection::from(0..2), &[0; 4]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_varlen_cells() -> Result<()> {
        let g = ChunkGeometry { element_type: ElementType::VarBytes, chunk_shape: &[2], fill: &[] };
        let mut store = ChunkStore::default();
        g.write_varlen(&mut store, &Selection::from(1..3), &[vec![1u8, 2], vec![]])?;
        let out = g.read_varlen(&store, &Selection::from(0..4))?;
        assert_eq!(out, vec![vec![], vec![1, 2], vec![], vec![]]);
        assert!(g.read_fixed(&store, &Selection::from(0..1)).is_err());
        Ok(())
    }

    #[test]
    fn test_block_cells() -> Result<()> {
        assert_eq!(block_cells(ElementType::Int64, &[4, 5])?, 20);
        assert_eq!(block_cells(ElementType::Int64, &[0, 5])?, 0);
        assert_eq!(block_cells(ElementType::Int64, &[])?, 1);
        assert!(matches!(block_cells(ElementType::Int64, &[1 << 62]), Err(Error::OutOfSpace)));
        assert!(matches!(block_cells(ElementType::UInt8, &[u64::MAX / 2, 3]), Err(Error::OutOfSpace)));
        assert!(matches!(block_cells(ElementType::VarBytes, &[1 << 60]), Err(Error::OutOfSpace)));
        Ok(())
    }

    #[test]
    fn test_chunk_codec() -> Result<()> {
        let chunk = ChunkBuf::VarLen(vec![b"ab".to_vec(), Vec::new()]);
        let bytes = chunk.encode();
        assert_eq!(ChunkBuf::decode(&bytes, ElementType::VarString, 2)?, chunk);
        assert!(ChunkBuf::decode(&[0; 7], ElementType::UInt32, 2).is_err());
        Ok(())
    }
}
