//! Container reader.
//!
//! A [`ContainerReader`] only exists once the superblock has been parsed and
//! validated. Object headers are decoded on first access together with their
//! attribute block, name index and chunk table, and cached by offset. Chunk
//! payloads go through a size-bounded [`ChunkCache`].
//!
//! Readers are cheap to clone and may be shared between threads.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::RwLock;
use tracing::debug;

use super::layout::*;
use crate::core::{decompress, AttributeValue, ChunkCache, Selection, DEFAULT_CHUNK_CACHE_BYTES};
use crate::link::{join_path, resolve_path, split_path, Edge, LinkContext, LinkGraph, Target, VisitedLinks};
use crate::storage::{contiguous_or_chunked, decode_chunk_table, ChunkBuf, ChunkGeometry, ChunkRecord, ChunkSource, Layout};
use crate::util::codec::Decoder;
use crate::util::{decode_elements, strip_padding, Coord, Element, ElementType, Error, Result, Shape};

/// Initial window for decoding blocks of unknown length in buffered mode.
const PARSE_WINDOW: usize = 4096;

// ============================================================================
// Options
// ============================================================================

/// Reader configuration.
#[derive(Clone, Debug)]
pub struct ReadOptions {
    /// Memory-map files instead of buffered reads.
    pub use_mmap: bool,
    /// Soft/external links followed within one lookup before giving up.
    pub max_link_depth: usize,
    /// Budget of the decoded chunk cache in bytes.
    pub chunk_cache_bytes: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            use_mmap: true,
            max_link_depth: 32,
            chunk_cache_bytes: DEFAULT_CHUNK_CACHE_BYTES,
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }

    pub fn max_link_depth(mut self, depth: usize) -> Self {
        self.max_link_depth = depth;
        self
    }

    pub fn chunk_cache_bytes(mut self, bytes: usize) -> Self {
        self.chunk_cache_bytes = bytes;
        self
    }
}

// ============================================================================
// Input streams
// ============================================================================

/// Random-access byte source of a container.
pub struct IStreams {
    inner: StreamsInner,
    size: u64,
}

enum StreamsInner {
    /// Memory-mapped file (preferred for large files)
    Mmap(Mmap),
    /// Buffered file access
    File(RwLock<File>),
    /// Container held in memory
    Memory(Vec<u8>),
}

impl IStreams {
    /// Open a file for reading with memory mapping.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_opts(path, true)
    }

    /// Open a file with optional memory mapping.
    pub fn open_opts(path: impl AsRef<Path>, use_mmap: bool) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();

        let inner = if use_mmap && size > 0 {
            // Safety: the file is opened read-only; containers are immutable once finalized.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MmapFailed(e.to_string()))?;
            StreamsInner::Mmap(mmap)
        } else {
            StreamsInner::File(RwLock::new(file))
        };
        Ok(Self { inner, size })
    }

    /// Wrap an in-memory container image.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { size: bytes.len() as u64, inner: StreamsInner::Memory(bytes) }
    }

    /// Total size of the source.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        matches!(self.inner, StreamsInner::Mmap(_))
    }

    fn check_range(&self, pos: u64, len: usize) -> Result<()> {
        let end = pos.checked_add(len as u64).ok_or(Error::UnexpectedEof(u64::MAX))?;
        if end > self.size {
            return Err(Error::UnexpectedEof(end));
        }
        Ok(())
    }

    /// Read bytes at a specific position.
    pub fn read_bytes(&self, pos: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(pos, &mut buf)?;
        Ok(buf)
    }

    /// Read bytes into an existing buffer.
    pub fn read_into(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        self.check_range(pos, buf.len())?;
        match &self.inner {
            StreamsInner::Mmap(mmap) => buf.copy_from_slice(&mmap[pos as usize..pos as usize + buf.len()]),
            StreamsInner::Memory(bytes) => buf.copy_from_slice(&bytes[pos as usize..pos as usize + buf.len()]),
            StreamsInner::File(file) => {
                let mut f = file.write();
                f.seek(SeekFrom::Start(pos))?;
                f.read_exact(buf)?;
            }
        }
        Ok(())
    }

    /// Decode a block of unknown length starting at `pos`.
    ///
    /// Mapped and in-memory sources decode straight from the backing bytes;
    /// buffered files read a window that doubles until the block fits.
    fn parse<T>(&self, pos: u64, f: impl Fn(&mut Decoder<'_>) -> Result<T>) -> Result<T> {
        self.check_range(pos, 0)?;
        let direct = match &self.inner {
            StreamsInner::Mmap(mmap) => Some(&mmap[pos as usize..]),
            StreamsInner::Memory(bytes) => Some(&bytes[pos as usize..]),
            StreamsInner::File(_) => None,
        };
        if let Some(slice) = direct {
            return f(&mut Decoder::at(slice, pos));
        }

        let available = self.size - pos;
        let mut window = PARSE_WINDOW as u64;
        loop {
            let len = window.min(available);
            let buf = self.read_bytes(pos, len as usize)?;
            match f(&mut Decoder::at(&buf, pos)) {
                Err(Error::UnexpectedEof(_)) if len < available => window = window.saturating_mul(2),
                result => return result,
            }
        }
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Decoded object header plus the blocks it points at.
pub(crate) struct NodeRecord {
    header: ObjectHeader,
    attributes: Vec<(String, AttributeValue)>,
    entries: Vec<(String, DiskLink)>,
    chunks: Vec<ChunkRecord>,
}

struct ReaderInner {
    streams: IStreams,
    superblock: Superblock,
    context: LinkContext,
    records: RwLock<HashMap<u64, Arc<NodeRecord>>>,
    cache: ChunkCache,
}

/// Read-only view of a finalized container.
#[derive(Clone)]
pub struct ContainerReader {
    inner: Arc<ReaderInner>,
}

impl std::fmt::Debug for ContainerReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerReader")
            .field("identity", &self.identity())
            .field("size", &self.size())
            .finish()
    }
}

impl ContainerReader {
    /// Open a container file with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ReadOptions::default())
    }

    /// Open a container file.
    pub fn open_with(path: impl AsRef<Path>, options: ReadOptions) -> Result<Self> {
        let path = path.as_ref();
        Self::open_in(path, LinkContext::for_file(path, options))
    }

    pub(crate) fn open_in(path: &Path, context: LinkContext) -> Result<Self> {
        let streams = IStreams::open_opts(path, context.options().use_mmap)?;
        Self::from_streams(streams, context)
    }

    /// Read a container image held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_bytes_with(bytes, ReadOptions::default())
    }

    pub fn from_bytes_with(bytes: Vec<u8>, options: ReadOptions) -> Result<Self> {
        Self::from_streams(IStreams::from_bytes(bytes), LinkContext::detached(options))
    }

    fn from_streams(streams: IStreams, context: LinkContext) -> Result<Self> {
        if streams.size() < SUPERBLOCK_SIZE as u64 {
            return Err(Error::UnexpectedEof(streams.size()));
        }
        let superblock = Superblock::parse(&streams.read_bytes(0, SUPERBLOCK_SIZE)?)?;
        if superblock.eof > streams.size() {
            return Err(Error::UnexpectedEof(superblock.eof));
        }
        debug!(
            file = %context.identity().display(),
            version = superblock.version,
            size = streams.size(),
            mapped = streams.is_mapped(),
            "opened container"
        );

        let reader = Self {
            inner: Arc::new(ReaderInner {
                cache: ChunkCache::new(context.options().chunk_cache_bytes),
                streams,
                superblock,
                context,
                records: RwLock::new(HashMap::new()),
            }),
        };
        if !reader.record(superblock.root_offset)?.header.is_group() {
            return Err(Error::invalid("root object is not a group"));
        }
        Ok(reader)
    }

    #[inline]
    pub fn version(&self) -> u16 {
        self.inner.superblock.version
    }

    #[inline]
    pub fn superblock(&self) -> &Superblock {
        &self.inner.superblock
    }

    /// Size of the backing file or buffer.
    #[inline]
    pub fn size(&self) -> u64 {
        self.inner.streams.size()
    }

    /// Canonical path of the container, or `<memory>`.
    #[inline]
    pub fn identity(&self) -> &Path {
        self.inner.context.identity()
    }

    #[inline]
    pub fn options(&self) -> &ReadOptions {
        self.inner.context.options()
    }

    #[inline]
    pub fn context(&self) -> &LinkContext {
        &self.inner.context
    }

    #[inline]
    pub fn cache(&self) -> &ChunkCache {
        &self.inner.cache
    }

    /// The root group.
    pub fn root(&self) -> Result<IGroup> {
        self.root_inode().into_group()
    }

    pub(crate) fn root_inode(&self) -> INode {
        INode {
            reader: self.clone(),
            offset: self.inner.superblock.root_offset,
            path: "/".to_string(),
        }
    }

    /// Resolve an absolute path, following soft and external links.
    pub fn lookup(&self, path: &str) -> Result<INode> {
        let root = self.root_inode();
        let mut visited = VisitedLinks::new(self.options().max_link_depth);
        self.resolve_from(&root, path, &mut visited)
    }

    /// Look up a group by path.
    pub fn group(&self, path: &str) -> Result<IGroup> {
        self.lookup(path)?.into_group()
    }

    /// Look up a dataset by path.
    pub fn dataset(&self, path: &str) -> Result<IDataset> {
        self.lookup(path)?.into_dataset()
    }

    pub(crate) fn resolve_from(&self, base: &INode, path: &str, visited: &mut VisitedLinks) -> Result<INode> {
        match resolve_path(self, &base.offset, &base.path, path, visited)? {
            Target::Local(offset) => Ok(INode {
                reader: self.clone(),
                offset,
                path: normalize_path(&base.path, path),
            }),
            Target::External(node) => Ok(node),
        }
    }

    /// Every path below the root in depth-first order, children sorted by
    /// name. Soft and external links are listed, not followed; a group
    /// reachable through several hard links is descended once.
    pub fn walk(&self) -> Result<Vec<WalkEntry>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let root = self.inner.superblock.root_offset;
        seen.insert(root);
        let mut stack = vec![(root, String::new())];
        while let Some((offset, path)) = stack.pop() {
            let record = self.record(offset)?;
            let mut children = Vec::new();
            for (name, link) in &record.entries {
                let child_path = join_path(&path, name);
                let kind = match link {
                    DiskLink::Hard(target) => {
                        let child = self.record(*target)?;
                        if child.header.is_group() {
                            if seen.insert(*target) {
                                children.push((*target, child_path.clone()));
                            }
                            EntryKind::Group
                        } else {
                            EntryKind::Dataset
                        }
                    }
                    DiskLink::Soft(target) => EntryKind::SoftLink(target.clone()),
                    DiskLink::External { file, path } => EntryKind::ExternalLink {
                        file: file.display().to_string(),
                        path: path.clone(),
                    },
                };
                out.push(WalkEntry { path: child_path, kind });
            }
            stack.extend(children);
        }
        Ok(reorder_depth_first(out))
    }

    /// Decoded record of the object at `offset`.
    fn record(&self, offset: u64) -> Result<Arc<NodeRecord>> {
        if let Some(record) = self.inner.records.read().get(&offset) {
            return Ok(Arc::clone(record));
        }
        let sb = &self.inner.superblock;
        if offset < SUPERBLOCK_SIZE as u64 || offset >= sb.eof {
            return Err(Error::invalid(format!("object offset {} outside file", offset)));
        }

        let streams = &self.inner.streams;
        let header = streams.parse(offset, ObjectHeader::decode)?;
        let attributes = match header.attributes {
            BlockRef { count: 0, .. } => Vec::new(),
            BlockRef { offset, count } => streams.parse(offset, |d| decode_attributes(d, count))?,
        };
        let (entries, chunks) = match &header.body {
            HeaderBody::Group { index: BlockRef { count: 0, .. } } => (Vec::new(), Vec::new()),
            HeaderBody::Group { index } => {
                let count = index.count;
                (streams.parse(index.offset, |d| decode_name_index(d, count))?, Vec::new())
            }
            HeaderBody::Dataset { shape, layout, .. } => match layout {
                DiskLayout::Chunked { table, .. } if table.count > 0 => {
                    let (rank, count) = (shape.rank(), table.count);
                    (Vec::new(), streams.parse(table.offset, |d| decode_chunk_table(d, rank, count))?)
                }
                DiskLayout::Contiguous { offset, len } if *len > 0 => {
                    let coord = Coord::from_elem(0, shape.rank());
                    let record = ChunkRecord { coord, offset: *offset, stored_len: *len, compressed: false };
                    (Vec::new(), vec![record])
                }
                _ => (Vec::new(), Vec::new()),
            },
        };

        let record = Arc::new(NodeRecord { header, attributes, entries, chunks });
        let mut records = self.inner.records.write();
        Ok(Arc::clone(records.entry(offset).or_insert(record)))
    }
}

impl LinkGraph for ContainerReader {
    type Node = u64;

    fn root_node(&self) -> u64 {
        self.inner.superblock.root_offset
    }

    fn is_group(&self, node: &u64) -> Result<bool> {
        Ok(self.record(*node)?.header.is_group())
    }

    fn child(&self, group: &u64, name: &str) -> Result<Option<Edge<u64>>> {
        let record = self.record(*group)?;
        let found = record
            .entries
            .binary_search_by(|(n, _)| n.as_str().cmp(name))
            .ok()
            .map(|i| match &record.entries[i].1 {
                DiskLink::Hard(offset) => Edge::Node(*offset),
                DiskLink::Soft(path) => Edge::Soft(path.clone()),
                DiskLink::External { file, path } => Edge::External { file: file.clone(), path: path.clone() },
            });
        Ok(found)
    }

    fn context(&self) -> &LinkContext {
        &self.inner.context
    }
}

/// Canonical "/a/b" form of `path` resolved against `base`.
fn normalize_path(base: &str, path: &str) -> String {
    let mut out = if path.starts_with('/') { String::new() } else { base.trim_end_matches('/').to_string() };
    for segment in split_path(path) {
        out = join_path(&out, segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Sort walk entries so that every group is followed by its subtree.
fn reorder_depth_first(mut entries: Vec<WalkEntry>) -> Vec<WalkEntry> {
    entries.sort_by(|a, b| split_path(&a.path).cmp(split_path(&b.path)));
    entries
}

// ============================================================================
// Traversal
// ============================================================================

/// What a walked path refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Group,
    Dataset,
    SoftLink(String),
    ExternalLink { file: String, path: String },
}

/// One path produced by [`ContainerReader::walk`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: String,
    pub kind: EntryKind,
}

// ============================================================================
// Node handles
// ============================================================================

/// Handle to an object of a container.
#[derive(Clone)]
pub struct INode {
    reader: ContainerReader,
    offset: u64,
    path: String,
}

impl std::fmt::Debug for INode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("INode")
            .field("file", &self.reader.identity())
            .field("path", &self.path)
            .field("offset", &self.offset)
            .finish()
    }
}

impl INode {
    /// Path the node was reached by.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment, or `/` for the root.
    pub fn name(&self) -> &str {
        split_path(&self.path).last().unwrap_or("/")
    }

    /// Header offset; nodes shared through hard links have the same offset.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Container this node belongs to.
    #[inline]
    pub fn reader(&self) -> &ContainerReader {
        &self.reader
    }

    fn record(&self) -> Result<Arc<NodeRecord>> {
        self.reader.record(self.offset)
    }

    pub fn is_group(&self) -> Result<bool> {
        Ok(self.record()?.header.is_group())
    }

    pub fn is_dataset(&self) -> Result<bool> {
        Ok(self.record()?.header.is_dataset())
    }

    /// Attributes in stored order.
    pub fn attributes(&self) -> Result<Vec<(String, AttributeValue)>> {
        Ok(self.record()?.attributes.clone())
    }

    pub fn attribute_names(&self) -> Result<Vec<String>> {
        Ok(self.record()?.attributes.iter().map(|(n, _)| n.clone()).collect())
    }

    /// One attribute by name.
    pub fn attribute(&self, name: &str) -> Result<AttributeValue> {
        self.record()?
            .attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| Error::NameNotFound(format!("{}@{}", self.path, name)))
    }

    pub fn into_group(self) -> Result<IGroup> {
        if !self.is_group()? {
            return Err(Error::NotAGroup(self.path));
        }
        Ok(IGroup { node: self })
    }

    pub fn into_dataset(self) -> Result<IDataset> {
        let record = self.record()?;
        match &record.header.body {
            HeaderBody::Dataset { element_type, shape, fill, layout } => Ok(IDataset {
                element_type: *element_type,
                shape: shape.clone(),
                fill: fill.clone(),
                layout: layout.clone(),
                record: Arc::clone(&record),
                node: self,
            }),
            HeaderBody::Group { .. } => Err(Error::NotADataset(self.path)),
        }
    }
}

/// A group of a container.
#[derive(Clone, Debug)]
pub struct IGroup {
    node: INode,
}

impl IGroup {
    #[inline]
    pub fn node(&self) -> &INode {
        &self.node
    }

    #[inline]
    pub fn path(&self) -> &str {
        self.node.path()
    }

    /// Number of entries.
    pub fn len(&self) -> Result<usize> {
        Ok(self.node.record()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Entry names, sorted.
    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self.node.record()?.entries.iter().map(|(n, _)| n.clone()).collect())
    }

    /// Stored links, sorted by name.
    pub fn entries(&self) -> Result<Vec<(String, DiskLink)>> {
        Ok(self.node.record()?.entries.clone())
    }

    /// The link stored under `name`, without following it.
    pub fn link(&self, name: &str) -> Result<Option<DiskLink>> {
        let record = self.node.record()?;
        Ok(record.entries.iter().find(|(n, _)| n == name).map(|(_, l)| l.clone()))
    }

    /// Child by name, following links.
    pub fn get(&self, name: &str) -> Result<INode> {
        if name.contains('/') {
            return Err(Error::InvalidName(name.to_string()));
        }
        self.lookup(name)
    }

    /// Resolve a path relative to this group.
    pub fn lookup(&self, path: &str) -> Result<INode> {
        let reader = self.node.reader();
        let mut visited = VisitedLinks::new(reader.options().max_link_depth);
        reader.resolve_from(&self.node, path, &mut visited)
    }

    pub fn attributes(&self) -> Result<Vec<(String, AttributeValue)>> {
        self.node.attributes()
    }

    pub fn attribute(&self, name: &str) -> Result<AttributeValue> {
        self.node.attribute(name)
    }
}

/// A dataset of a container.
#[derive(Clone)]
pub struct IDataset {
    node: INode,
    element_type: ElementType,
    shape: Shape,
    fill: Vec<u8>,
    layout: DiskLayout,
    record: Arc<NodeRecord>,
}

impl std::fmt::Debug for IDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IDataset")
            .field("path", &self.node.path)
            .field("element_type", &self.element_type)
            .field("shape", &self.shape)
            .finish()
    }
}

impl IDataset {
    #[inline]
    pub fn node(&self) -> &INode {
        &self.node
    }

    #[inline]
    pub fn path(&self) -> &str {
        self.node.path()
    }

    #[inline]
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Fill value bytes (empty for variable-length types).
    #[inline]
    pub fn fill(&self) -> &[u8] {
        &self.fill
    }

    /// Storage layout as recorded in the header.
    pub fn layout(&self) -> Layout {
        match &self.layout {
            DiskLayout::Contiguous { .. } => Layout::Contiguous,
            DiskLayout::Chunked { chunk_shape, compression, .. } => Layout::Chunked {
                chunk_shape: chunk_shape.clone(),
                compression: (*compression > 0).then_some(u32::from(*compression)),
            },
        }
    }

    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self.layout, DiskLayout::Chunked { .. })
    }

    /// Chunk extents; a contiguous dataset is one chunk spanning its extent.
    pub fn chunk_shape(&self) -> Coord {
        contiguous_or_chunked(&self.layout(), &self.shape.sizes())
    }

    /// Number of stored chunks.
    #[inline]
    pub fn num_chunks(&self) -> usize {
        self.record.chunks.len()
    }

    /// Payload bytes on disk.
    pub fn stored_bytes(&self) -> u64 {
        self.record.chunks.iter().map(|c| c.stored_len).sum()
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> u64 {
        self.shape.num_elements()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn attributes(&self) -> Result<Vec<(String, AttributeValue)>> {
        self.node.attributes()
    }

    pub fn attribute(&self, name: &str) -> Result<AttributeValue> {
        self.node.attribute(name)
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

    /// Read fixed-size cells of a selection; absent regions read as fill.
    pub fn read(&self, sel: &Selection) -> Result<Vec<u8>> {
        sel.validate(&self.shape.sizes())?;
        let chunk_shape = self.chunk_shape();
        let geometry = ChunkGeometry { element_type: self.element_type, chunk_shape: &chunk_shape, fill: &self.fill };
        geometry.read_fixed(&DiskChunks { dataset: self, cells: geometry.cells_per_chunk()? }, sel)
    }

    /// Read every fixed-size cell.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        self.read(&Selection::all(&self.shape.sizes()))
    }

    /// Read numeric values of a selection.
    pub fn read_typed<T: Element>(&self, sel: &Selection) -> Result<Vec<T>> {
        self.check_type(T::TYPE)?;
        decode_elements(&self.read(sel)?)
    }

    /// Read variable-length cells of a selection.
    pub fn read_varlen(&self, sel: &Selection) -> Result<Vec<Vec<u8>>> {
        sel.validate(&self.shape.sizes())?;
        let chunk_shape = self.chunk_shape();
        let geometry = ChunkGeometry { element_type: self.element_type, chunk_shape: &chunk_shape, fill: &self.fill };
        geometry.read_varlen(&DiskChunks { dataset: self, cells: geometry.cells_per_chunk()? }, sel)
    }

    /// Read string cells (fixed-length with padding removed, or variable-length).
    pub fn read_strings(&self, sel: &Selection) -> Result<Vec<String>> {
        let cells: Vec<Vec<u8>> = match self.element_type {
            ElementType::FixedString { len, pad } => {
                let bytes = self.read(sel)?;
                bytes
                    .chunks(len.max(1) as usize)
                    .take(sel.num_elements() as usize)
                    .map(|cell| strip_padding(cell, pad).to_vec())
                    .collect()
            }
            ElementType::VarString => self.read_varlen(sel)?,
            other => {
                return Err(Error::TypeMismatch { expected: "string".to_string(), actual: other.to_string() });
            }
        };
        cells.into_iter().map(|c| String::from_utf8(c).map_err(Error::from)).collect()
    }
}

/// Chunks of an on-disk dataset, decoded through the reader's cache.
struct DiskChunks<'a> {
    dataset: &'a IDataset,
    cells: usize,
}

impl ChunkSource for DiskChunks<'_> {
    fn chunk(&self, coord: &[u64]) -> Result<Option<Cow<'_, ChunkBuf>>> {
        let chunks = &self.dataset.record.chunks;
        let Ok(index) = chunks.binary_search_by(|r| r.coord.as_slice().cmp(coord)) else {
            return Ok(None);
        };
        let record = &chunks[index];
        let reader = self.dataset.node.reader();

        let bytes = match reader.cache().get(record.offset) {
            Some(bytes) => bytes,
            None => {
                let len = usize::try_from(record.stored_len)
                    .map_err(|_| Error::invalid(format!("chunk of {} bytes", record.stored_len)))?;
                let raw = reader.inner.streams.read_bytes(record.offset, len)?;
                let raw = if record.compressed { decompress(&raw)? } else { raw };
                reader.cache().insert(record.offset, raw)
            }
        };
        ChunkBuf::decode(&bytes, self.dataset.element_type, self.cells).map(|c| Some(Cow::Owned(c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_and_bad_input() {
        assert!(matches!(ContainerReader::from_bytes(vec![0; 8]), Err(Error::UnexpectedEof(8))));
        assert!(matches!(ContainerReader::from_bytes(vec![0; 64]), Err(Error::BadMagic)));

        let mut bytes = Superblock::new(32, 4096).encode().unwrap();
        bytes.resize(64, 0);
        assert!(matches!(ContainerReader::from_bytes(bytes), Err(Error::UnexpectedEof(4096))));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/", "/a//b/"), "/a/b");
        assert_eq!(normalize_path("/g", "x"), "/g/x");
        assert_eq!(normalize_path("/g", "/"), "/");
    }

    #[test]
    fn test_parse_window_grows() -> Result<()> {
        let mut bytes = vec![0u8; PARSE_WINDOW * 3];
        let n = bytes.len();
        bytes[n - 1] = 7;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("raw.bin");
        std::fs::write(&path, &bytes)?;

        let streams = IStreams::open_opts(&path, false)?;
        assert!(!streams.is_mapped());
        let last = streams.parse(0, |d| {
            d.bytes(n - 1)?;
            d.u8()
        })?;
        assert_eq!(last, 7);
        assert!(streams.parse(0, |d| d.bytes(n + 1).map(|_| ())).is_err());
        Ok(())
    }
}
