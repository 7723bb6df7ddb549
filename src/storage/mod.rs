//! Dataset storage engine.
//!
//! Datasets keep their cells in a sparse map of chunks. A contiguous dataset
//! is a single chunk spanning its whole extent; a chunked dataset is split
//! into `chunk_shape` blocks, each stored independently. Chunks that were
//! never written read back as the fill value.

mod chunks;
mod engine;
mod hyperslab;

pub use engine::{ChunkRecord, StorageEngine};
pub(crate) use chunks::{block_cells, ChunkBuf, ChunkGeometry, ChunkSource, ChunkStore};
pub(crate) use engine::decode_chunk_table;

use tracing::{debug, trace};

use crate::core::{Selection, MAX_LEVEL};
use crate::util::{decode_bools, Coord, Element, ElementType, Error, Result, Shape};
use hyperslab::for_each_cell;

/// Storage layout of a dataset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Layout {
    /// One run holding every cell in row-major order.
    Contiguous,
    /// Fixed-size blocks, optionally zlib compressed (level 1-9).
    Chunked { chunk_shape: Coord, compression: Option<u32> },
}

impl Layout {
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, Self::Chunked { .. })
    }
}

/// Describes a dataset before it is added to a group.
#[derive(Clone, Debug)]
pub struct DatasetBuilder {
    element_type: ElementType,
    shape: Shape,
    chunk_shape: Option<Coord>,
    compression: Option<u32>,
    fill: Option<Vec<u8>>,
}

impl DatasetBuilder {
    /// Contiguous dataset of the given type and shape.
    pub fn new(element_type: ElementType, shape: impl Into<Shape>) -> Self {
        Self {
            element_type,
            shape: shape.into(),
            chunk_shape: None,
            compression: None,
            fill: None,
        }
    }

    /// Contiguous dataset of a numeric type.
    pub fn of<T: Element>(shape: impl Into<Shape>) -> Self {
        Self::new(T::TYPE, shape)
    }

    /// Use chunked layout.
    pub fn chunked(mut self, chunk_shape: &[u64]) -> Self {
        self.chunk_shape = Some(chunk_shape.into());
        self
    }

    /// Compress chunks with zlib at `level`. Requires chunked layout.
    pub fn compression(mut self, level: u32) -> Self {
        self.compression = Some(level);
        self
    }

    /// Fill value as one element's bytes.
    pub fn fill_bytes(mut self, fill: &[u8]) -> Self {
        self.fill = Some(fill.to_vec());
        self
    }

    /// Fill value of a numeric dataset.
    pub fn fill<T: Element>(self, value: T) -> Self {
        self.fill_bytes(&crate::util::encode_elements(&[value]))
    }

    /// Validate and create the dataset.
    pub fn build(self) -> Result<Dataset> {
        let Self { element_type, shape, chunk_shape, compression, fill } = self;
        element_type.validate()?;

        for (i, dim) in shape.dims().iter().enumerate() {
            if !dim.allows(dim.size) {
                return Err(Error::InvalidShape(format!(
                    "dimension {} has extent {} above its maximum",
                    i, dim.size
                )));
            }
        }

        let layout = match chunk_shape {
            Some(chunk_shape) => {
                if shape.is_scalar() {
                    return Err(Error::InvalidShape("scalar datasets cannot be chunked".into()));
                }
                if chunk_shape.len() != shape.rank() {
                    return Err(Error::InvalidShape(format!(
                        "chunk rank {} differs from dataset rank {}",
                        chunk_shape.len(),
                        shape.rank()
                    )));
                }
                if chunk_shape.iter().any(|&c| c == 0) {
                    return Err(Error::InvalidShape("chunk extents must be positive".into()));
                }
                block_cells(element_type, &chunk_shape)?;
                if let Some(level) = compression {
                    if level > MAX_LEVEL {
                        return Err(Error::other(format!(
                            "compression level {} above {}",
                            level, MAX_LEVEL
                        )));
                    }
                }
                Layout::Chunked { chunk_shape, compression }
            }
            None => {
                if compression.is_some() {
                    return Err(Error::InvalidShape("compression requires chunked layout".into()));
                }
                if shape.dims().iter().skip(1).any(|d| d.max != Some(d.size)) {
                    return Err(Error::InvalidShape(
                        "only the outermost dimension of a contiguous dataset may be resizable".into(),
                    ));
                }
                block_cells(element_type, &contiguous_or_chunked(&Layout::Contiguous, &shape.sizes()))?;
                Layout::Contiguous
            }
        };

        let fill = match (fill, element_type.size()) {
            (None, Some(size)) => match element_type {
                ElementType::FixedString { pad, .. } => vec![pad; size],
                _ => vec![0; size],
            },
            (None, None) => Vec::new(),
            (Some(fill), Some(size)) if fill.len() == size => {
                if element_type == ElementType::Bool {
                    decode_bools(&fill)?;
                }
                fill
            }
            (Some(fill), Some(size)) => {
                return Err(Error::shape(format!(
                    "fill value has {} bytes, {} needs {}",
                    fill.len(),
                    element_type,
                    size
                )));
            }
            (Some(_), None) => {
                return Err(Error::InvalidShape(
                    "variable-length datasets always fill with empty cells".into(),
                ));
            }
        };

        Ok(Dataset { element_type, shape, layout, fill, store: ChunkStore::default() })
    }
}

/// An in-memory dataset: shape, type, layout and written chunks.
#[derive(Clone, Debug)]
pub struct Dataset {
    element_type: ElementType,
    shape: Shape,
    layout: Layout,
    fill: Vec<u8>,
    store: ChunkStore,
}

impl Dataset {
    #[inline]
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Fill value bytes (empty for variable-length types).
    #[inline]
    pub fn fill(&self) -> &[u8] {
        &self.fill
    }

    /// Number of chunks written so far.
    #[inline]
    pub fn num_chunks(&self) -> usize {
        self.store.len()
    }

    /// Chunk extents. A contiguous dataset is one chunk spanning its extent.
    pub fn chunk_shape(&self) -> Coord {
        contiguous_or_chunked(&self.layout, &self.shape.sizes())
    }

    pub(crate) fn store(&self) -> &ChunkStore {
        &self.store
    }

    fn geometry<'a>(&'a self, chunk_shape: &'a [u64]) -> ChunkGeometry<'a> {
        ChunkGeometry { element_type: self.element_type, chunk_shape, fill: &self.fill }
    }

    /// Write every cell.
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let sel = Selection::all(&self.shape.sizes());
        self.write_selection(&sel, data)
    }

    /// Write fixed-size cells of a selection, in row-major order.
    pub fn write_selection(&mut self, sel: &Selection, data: &[u8]) -> Result<()> {
        sel.validate(&self.shape.sizes())?;
        if self.element_type == ElementType::Bool {
            decode_bools(data)?;
        }
        let chunk_shape = self.chunk_shape();
        let geometry = ChunkGeometry { element_type: self.element_type, chunk_shape: &chunk_shape, fill: &self.fill };
        geometry.write_fixed(&mut self.store, sel, data)?;
        trace!(selection = %sel, chunks = self.store.len(), "wrote cells");
        Ok(())
    }

    /// Write numeric values of a selection.
    pub fn write_typed<T: Element>(&mut self, sel: &Selection, values: &[T]) -> Result<()> {
        self.check_type(T::TYPE)?;
        self.write_selection(sel, &crate::util::encode_elements(values))
    }

    /// Write variable-length cells of a selection.
    pub fn write_varlen<C: AsRef<[u8]>>(&mut self, sel: &Selection, items: &[C]) -> Result<()> {
        sel.validate(&self.shape.sizes())?;
        if self.element_type == ElementType::VarString {
            for item in items {
                std::str::from_utf8(item.as_ref()).map_err(|e| Error::TypeMismatch {
                    expected: "UTF-8 string".to_string(),
                    actual: format!("invalid UTF-8 ({})", e),
                })?;
            }
        }
        let chunk_shape = self.chunk_shape();
        let geometry = ChunkGeometry { element_type: self.element_type, chunk_shape: &chunk_shape, fill: &self.fill };
        geometry.write_varlen(&mut self.store, sel, items)
    }

    /// Read fixed-size cells of a selection; unwritten cells read as fill.
    pub fn read(&self, sel: &Selection) -> Result<Vec<u8>> {
        sel.validate(&self.shape.sizes())?;
        let chunk_shape = self.chunk_shape();
        self.geometry(&chunk_shape).read_fixed(&self.store, sel)
    }

    /// Read numeric values of a selection.
    pub fn read_typed<T: Element>(&self, sel: &Selection) -> Result<Vec<T>> {
        self.check_type(T::TYPE)?;
        crate::util::decode_elements(&self.read(sel)?)
    }

    /// Read variable-length cells of a selection.
    pub fn read_varlen(&self, sel: &Selection) -> Result<Vec<Vec<u8>>> {
        sel.validate(&self.shape.sizes())?;
        let chunk_shape = self.chunk_shape();
        self.geometry(&chunk_shape).read_varlen(&self.store, sel)
    }

    fn check_type(&self, expected: ElementType) -> Result<()> {
        if self.element_type != expected {
            return Err(Error::TypeMismatch {
                expected: expected.to_string(),
                actual: self.element_type.to_string(),
            });
        }
        Ok(())
    }

    /// Change the current extents.
    ///
    /// Contiguous datasets may only change their outermost dimension.
    /// Chunked datasets may change any dimension within its maximum; chunks
    /// wholly outside the new extent are dropped and cells of surviving
    /// chunks that fall outside it are reset to fill.
    pub fn resize(&mut self, new_sizes: &[u64]) -> Result<()> {
        if new_sizes.len() != self.shape.rank() {
            return Err(Error::shape(format!(
                "resize to rank {}, dataset has rank {}",
                new_sizes.len(),
                self.shape.rank()
            )));
        }
        for (i, (dim, &size)) in self.shape.dims().iter().zip(new_sizes).enumerate() {
            if !dim.allows(size) {
                return Err(Error::UnsupportedResize(format!(
                    "dimension {} cannot grow to {} (maximum {})",
                    i,
                    size,
                    dim.max.unwrap_or(size)
                )));
            }
        }

        let old_sizes = self.shape.sizes();
        match &self.layout {
            Layout::Contiguous => {
                if old_sizes.iter().zip(new_sizes).skip(1).any(|(a, b)| a != b) {
                    return Err(Error::UnsupportedResize(
                        "contiguous datasets can only change their outermost dimension".into(),
                    ));
                }
                block_cells(self.element_type, &contiguous_or_chunked(&self.layout, new_sizes))?;
                let cells = block_cells(self.element_type, new_sizes)?;
                let key = Coord::from_elem(0, new_sizes.len());
                if cells == 0 {
                    self.store.map_mut().clear();
                } else if let Some(chunk) = self.store.map_mut().get_mut(&key) {
                    match chunk {
                        ChunkBuf::Fixed(bytes) => {
                            let size = self.fill.len();
                            let old_cells = if size == 0 { 0 } else { bytes.len() / size };
                            if cells < old_cells {
                                bytes.truncate(cells * size);
                            } else {
                                bytes.extend(self.fill.repeat(cells - old_cells));
                            }
                        }
                        ChunkBuf::VarLen(items) => items.resize(cells, Vec::new()),
                    }
                }
            }
            Layout::Chunked { chunk_shape, .. } => {
                let chunk_shape = chunk_shape.clone();
                let shrinking = old_sizes.iter().zip(new_sizes).any(|(a, b)| b < a);
                if shrinking {
                    let before = self.store.len();
                    self.store.map_mut().retain(|coord, _| {
                        coord.iter().zip(&chunk_shape).zip(new_sizes).all(|((&i, &c), &n)| i * c < n)
                    });
                    let fill = &self.fill;
                    for (coord, chunk) in self.store.map_mut().iter_mut() {
                        let straddles = coord
                            .iter()
                            .zip(&chunk_shape)
                            .zip(new_sizes)
                            .any(|((&i, &c), &n)| (i + 1) * c > n);
                        if !straddles {
                            continue;
                        }
                        for_each_cell(&chunk_shape, coord, |point, index| {
                            if point.iter().zip(new_sizes).any(|(p, n)| p >= n) {
                                match &mut *chunk {
                                    ChunkBuf::Fixed(bytes) => {
                                        let size = fill.len();
                                        bytes[index * size..(index + 1) * size].copy_from_slice(fill);
                                    }
                                    ChunkBuf::VarLen(items) => items[index].clear(),
                                }
                            }
                        });
                    }
                    trace!(dropped = before - self.store.len(), "dropped chunks outside new extent");
                }
            }
        }

        debug!(from = ?old_sizes.as_slice(), to = ?new_sizes, "resized dataset");
        self.shape = self.shape.with_sizes(new_sizes);
        Ok(())
    }
}

/// Chunk extents for a layout: the chunk shape, or the whole extent (each
/// dimension at least one) for contiguous storage.
pub(crate) fn contiguous_or_chunked(layout: &Layout, sizes: &[u64]) -> Coord {
    match layout {
        Layout::Chunked { chunk_shape, .. } => chunk_shape.clone(),
        Layout::Contiguous => sizes.iter().map(|&s| s.max(1)).collect(),
    }
}
