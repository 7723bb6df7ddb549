//! Container writer.
//!
//! A [`ContainerWriter`] owns the in-memory [`Directory`] of a new container
//! and moves through [`WritePhase`]s: `Empty` until the first mutation,
//! `Populating` while the directory is built, `Finalizing` while bytes are
//! written, and `Closed` afterwards (also after a failed finalize).
//!
//! Finalize lays the file out in one pass:
//! 1. Collect nodes depth-first over hard links, each shared node once.
//! 2. Reserve a header for every node right after the superblock.
//! 3. Per node, place its attribute block, then its name index or its chunk
//!    payloads and chunk table.
//! 4. Write all blocks in offset order, then the superblock at offset 0.
//!
//! File targets are written to a temporary file beside the destination and
//! persisted over it only after the superblock is in place.

use std::collections::HashMap;
use std::fmt;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, trace};

use super::allocator::{ExtentKind, LayoutAllocator, LayoutTable};
use super::layout::*;
use super::reader::ReadOptions;
use super::stream::{OStream, WritePlan};
use crate::core::{AttributeValue, Selection, MAX_LEVEL};
use crate::directory::{Directory, Link, LookupResult, NodeId, NodeKind};
use crate::link::LinkContext;
use crate::storage::{Dataset, DatasetBuilder, StorageEngine};
use crate::util::{Element, Error, Result};

/// Name of the root attribute recording the producing application.
pub const APPLICATION_ATTRIBUTE: &str = "application";

// ============================================================================
// Options and state
// ============================================================================

/// Writer configuration.
#[derive(Clone, Debug)]
pub struct WriteOptions {
    /// Compression level for chunked datasets that do not set one (0 = none).
    pub compression: u32,
    /// Alignment of every block in the file, a power of two.
    pub alignment: u64,
    /// Encode chunks on the rayon pool.
    pub parallel: bool,
    /// Stored as the root `application` attribute when set.
    pub application: Option<String>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: 0,
            alignment: DEFAULT_ALIGNMENT,
            parallel: true,
            application: None,
        }
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compression(mut self, level: u32) -> Self {
        self.compression = level;
        self
    }

    pub fn alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn application(mut self, name: impl Into<String>) -> Self {
        self.application = Some(name.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.compression > MAX_LEVEL {
            return Err(Error::other(format!("compression level {} above {}", self.compression, MAX_LEVEL)));
        }
        if !self.alignment.is_power_of_two() {
            return Err(Error::other(format!("alignment {} is not a power of two", self.alignment)));
        }
        Ok(())
    }
}

/// Lifecycle of a write session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WritePhase {
    Empty,
    Populating,
    Finalizing,
    Closed,
}

impl fmt::Display for WritePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Populating => "populating",
            Self::Finalizing => "finalizing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
enum WriteTarget {
    File(PathBuf),
    Memory,
}

/// Summary of a finalized container.
#[derive(Clone, Debug)]
pub struct ContainerStats {
    pub groups: usize,
    pub datasets: usize,
    pub attributes: usize,
    pub chunks: usize,
    /// Total file length.
    pub eof: u64,
    /// Every block placed in the file.
    pub layout: LayoutTable,
}

impl ContainerStats {
    #[inline]
    pub fn nodes(&self) -> usize {
        self.groups + self.datasets
    }

    #[inline]
    pub fn payload_bytes(&self) -> u64 {
        self.layout.bytes(ExtentKind::Payload)
    }
}

impl fmt::Display for ContainerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} groups, {} datasets, {} attributes, {} chunks, {} bytes",
            self.groups, self.datasets, self.attributes, self.chunks, self.eof
        )
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Builds a container in memory and writes it out once.
pub struct ContainerWriter {
    directory: Directory,
    phase: WritePhase,
    target: WriteTarget,
    options: WriteOptions,
}

impl ContainerWriter {
    /// Start a container that will be written to `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with(path, WriteOptions::default())
    }

    pub fn create_with(path: impl AsRef<Path>, options: WriteOptions) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref();
        let context = LinkContext::for_file(path, ReadOptions::default());
        Ok(Self {
            directory: Directory::with_context(context),
            phase: WritePhase::Empty,
            target: WriteTarget::File(path.to_path_buf()),
            options,
        })
    }

    /// Start a container with no backing file; finish it with
    /// [`finalize_to_vec`](Self::finalize_to_vec).
    pub fn in_memory() -> Self {
        Self {
            directory: Directory::new(),
            phase: WritePhase::Empty,
            target: WriteTarget::Memory,
            options: WriteOptions::default(),
        }
    }

    pub fn in_memory_with(options: WriteOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options, ..Self::in_memory() })
    }

    #[inline]
    pub fn phase(&self) -> WritePhase {
        self.phase
    }

    #[inline]
    pub fn options(&self) -> &WriteOptions {
        &self.options
    }

    /// Destination file, if any.
    pub fn path(&self) -> Option<&Path> {
        match &self.target {
            WriteTarget::File(path) => Some(path),
            WriteTarget::Memory => None,
        }
    }

    #[inline]
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.directory.root()
    }

    /// Directory for mutation; only before finalize.
    fn begin(&mut self) -> Result<&mut Directory> {
        match self.phase {
            WritePhase::Empty | WritePhase::Populating => {
                self.phase = WritePhase::Populating;
                Ok(&mut self.directory)
            }
            WritePhase::Finalizing | WritePhase::Closed => Err(Error::Frozen),
        }
    }

    // ------------------------------------------------------------------------
    // Directory operations
    // ------------------------------------------------------------------------

    pub fn add_group(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.begin()?.add_group(parent, name)
    }

    /// Create every missing group along an absolute path and return the last.
    pub fn create_groups(&mut self, path: &str) -> Result<NodeId> {
        let dir = self.begin()?;
        let mut current = dir.root();
        for segment in crate::link::split_path(path) {
            let existing = dir.entries(current)?.find(|(n, _)| *n == segment).map(|(_, l)| l.clone());
            current = match existing {
                Some(Link::Hard(id)) if dir.node(id)?.is_group() => id,
                Some(_) => return Err(Error::NotAGroup(segment.to_string())),
                None => dir.add_group(current, segment)?,
            };
        }
        Ok(current)
    }

    pub fn add_dataset(&mut self, parent: NodeId, name: &str, builder: DatasetBuilder) -> Result<NodeId> {
        self.begin()?.add_dataset(parent, name, builder)
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: impl Into<AttributeValue>) -> Result<()> {
        self.begin()?.set_attribute(node, name, value)
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<AttributeValue> {
        self.begin()?.remove_attribute(node, name)
    }

    pub fn add_link(&mut self, parent: NodeId, name: &str, link: Link) -> Result<()> {
        self.begin()?.add_link(parent, name, link)
    }

    pub fn unlink(&mut self, parent: NodeId, name: &str) -> Result<Link> {
        self.begin()?.unlink(parent, name)
    }

    /// Resolve a path in the container being built.
    pub fn lookup(&self, path: &str) -> Result<LookupResult> {
        self.directory.lookup(path)
    }

    /// Resolve a path that must stay inside this container.
    pub fn resolve(&self, path: &str) -> Result<NodeId> {
        self.directory.resolve(path)
    }

    // ------------------------------------------------------------------------
    // Dataset data
    // ------------------------------------------------------------------------

    pub fn dataset(&self, id: NodeId) -> Result<&Dataset> {
        self.directory.dataset(id)
    }

    fn dataset_mut(&mut self, id: NodeId) -> Result<&mut Dataset> {
        self.begin()?.dataset_mut(id)
    }

    /// Write every cell of a dataset.
    pub fn write_data(&mut self, dataset: NodeId, data: &[u8]) -> Result<()> {
        self.dataset_mut(dataset)?.write_all(data)
    }

    pub fn write_selection(&mut self, dataset: NodeId, sel: &Selection, data: &[u8]) -> Result<()> {
        self.dataset_mut(dataset)?.write_selection(sel, data)
    }

    pub fn write_typed<T: Element>(&mut self, dataset: NodeId, sel: &Selection, values: &[T]) -> Result<()> {
        self.dataset_mut(dataset)?.write_typed(sel, values)
    }

    pub fn write_varlen<C: AsRef<[u8]>>(&mut self, dataset: NodeId, sel: &Selection, items: &[C]) -> Result<()> {
        self.dataset_mut(dataset)?.write_varlen(sel, items)
    }

    pub fn resize(&mut self, dataset: NodeId, new_sizes: &[u64]) -> Result<()> {
        self.dataset_mut(dataset)?.resize(new_sizes)
    }

    pub fn read(&self, dataset: NodeId, sel: &Selection) -> Result<Vec<u8>> {
        self.directory.dataset(dataset)?.read(sel)
    }

    pub fn read_varlen(&self, dataset: NodeId, sel: &Selection) -> Result<Vec<Vec<u8>>> {
        self.directory.dataset(dataset)?.read_varlen(sel)
    }

    // ------------------------------------------------------------------------
    // Finalize
    // ------------------------------------------------------------------------

    /// Freeze the directory. The phase only changes once the directory is
    /// complete, so an error here leaves the session open.
    fn enter_finalize(&mut self) -> Result<()> {
        if matches!(self.phase, WritePhase::Finalizing | WritePhase::Closed) {
            return Err(Error::Frozen);
        }
        if let Some(app) = self.options.application.clone() {
            let root = self.directory.root();
            self.directory.set_attribute(root, APPLICATION_ATTRIBUTE, app)?;
        }
        self.phase = WritePhase::Finalizing;
        Ok(())
    }

    /// Write the container to its destination file and close the session.
    ///
    /// On error the destination is left as it was and the session is closed.
    pub fn finalize(&mut self) -> Result<ContainerStats> {
        let path = match &self.target {
            WriteTarget::File(path) => path.clone(),
            WriteTarget::Memory => {
                return Err(Error::other("in-memory container; use finalize_to_vec"));
            }
        };
        self.enter_finalize()?;
        let result = self.persist(&path);
        self.phase = WritePhase::Closed;
        if let Ok(stats) = &result {
            debug!(path = %path.display(), %stats, "finalized container");
        }
        result
    }

    fn persist(&self, path: &Path) -> Result<ContainerStats> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir)?;
        let stats = write_image(&self.directory, &self.options, tmp.as_file())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(stats)
    }

    /// Write the container image to memory and close the session.
    pub fn finalize_to_vec(&mut self) -> Result<Vec<u8>> {
        self.enter_finalize()?;
        let mut buf = std::io::Cursor::new(Vec::new());
        let result = write_image(&self.directory, &self.options, &mut buf);
        self.phase = WritePhase::Closed;
        let stats = result?;
        debug!(%stats, "finalized in-memory container");
        Ok(buf.into_inner())
    }
}

/// Lay out `dir` and write the full image to `out`.
fn write_image<W: Write + Seek>(dir: &Directory, options: &WriteOptions, out: W) -> Result<ContainerStats> {
    let engine = StorageEngine {
        default_compression: options.compression,
        alignment: options.alignment,
        parallel: options.parallel,
    };
    let order = collect_nodes(dir)?;
    let mut alloc = LayoutAllocator::new(SUPERBLOCK_SIZE as u64);
    let mut plan = WritePlan::new();

    // Headers first; sizes do not depend on the offsets they hold.
    let mut offsets = HashMap::with_capacity(order.len());
    let mut sizes = Vec::with_capacity(order.len());
    for &id in &order {
        let size = header_for(dir, id, &engine, BlockRef::default(), None)?.encode()?.len() as u64;
        offsets.insert(id, alloc.allocate_for(id, ExtentKind::Header, size, options.alignment)?);
        sizes.push(size);
    }

    let mut stats = ContainerStats {
        groups: 0,
        datasets: 0,
        attributes: 0,
        chunks: 0,
        eof: 0,
        layout: LayoutTable::default(),
    };
    for (&id, &reserved) in order.iter().zip(&sizes) {
        let node = dir.node(id)?;
        let attributes = if node.attributes().is_empty() {
            BlockRef::default()
        } else {
            let block = encode_attributes(node.attributes().iter().map(|(n, v)| (n.as_str(), v)))?;
            let offset = alloc.allocate_for(id, ExtentKind::Attributes, block.len() as u64, options.alignment)?;
            plan.push(offset, block);
            BlockRef { offset, count: node.attributes().len() as u32 }
        };
        stats.attributes += node.attributes().len();

        let header = match node.kind() {
            NodeKind::Group(entries) => {
                stats.groups += 1;
                let mut links = Vec::with_capacity(entries.len());
                for (name, link) in entries {
                    let disk = match link {
                        Link::Hard(target) => DiskLink::Hard(
                            *offsets.get(target).ok_or_else(|| Error::NameNotFound(target.to_string()))?,
                        ),
                        Link::Soft(path) => DiskLink::Soft(path.clone()),
                        Link::External { file, path } => DiskLink::External { file: file.clone(), path: path.clone() },
                    };
                    links.push((name.as_str(), disk));
                }
                let count = links.len() as u32;
                let index = if links.is_empty() {
                    BlockRef::default()
                } else {
                    let block = encode_name_index(links)?;
                    let offset = alloc.allocate_for(id, ExtentKind::NameIndex, block.len() as u64, options.alignment)?;
                    plan.push(offset, block);
                    BlockRef { offset, count }
                };
                header_for(dir, id, &engine, attributes, Some(HeaderBody::Group { index }))?
            }
            NodeKind::Dataset(ds) => {
                stats.datasets += 1;
                let records = engine.write(ds, &mut alloc, &mut plan)?;
                stats.chunks += records.len();
                let layout = engine.place_layout(ds, &records, &mut alloc, &mut plan)?;
                trace!(%id, chunks = records.len(), "placed dataset");
                ObjectHeader {
                    attributes,
                    body: HeaderBody::Dataset {
                        element_type: ds.element_type(),
                        shape: ds.shape().clone(),
                        fill: ds.fill().to_vec(),
                        layout,
                    },
                }
            }
        };

        let bytes = header.encode()?;
        if bytes.len() as u64 != reserved {
            return Err(Error::other(format!(
                "header of {} is {} bytes, {} reserved",
                id,
                bytes.len(),
                reserved
            )));
        }
        plan.push(offsets[&id], bytes);
    }

    let eof = alloc.high_water_mark();
    let superblock = Superblock::new(offsets[&dir.root()], eof);
    debug!(nodes = order.len(), blocks = plan.len(), eof, "writing container image");

    let mut stream = OStream::new(out)?;
    stream.write_bytes(&[0u8; SUPERBLOCK_SIZE])?;
    plan.write_to(&mut stream, eof)?;
    stream.flush()?;
    stream.seek(0)?;
    stream.write_bytes(&superblock.encode()?)?;
    stream.flush()?;

    stats.eof = eof;
    stats.layout = alloc.into_table();
    Ok(stats)
}

/// Nodes reachable from the root through hard links, depth-first, once each.
fn collect_nodes(dir: &Directory) -> Result<Vec<NodeId>> {
    let mut order = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut stack = vec![dir.root()];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        order.push(id);
        if dir.node(id)?.is_group() {
            let children: Vec<NodeId> = dir
                .entries(id)?
                .filter_map(|(_, link)| match link {
                    Link::Hard(child) => Some(*child),
                    _ => None,
                })
                .collect();
            stack.extend(children.into_iter().rev());
        }
    }
    Ok(order)
}

/// Header of `id` with the given block references. Without `body`, a
/// placeholder of the final size is produced.
fn header_for(
    dir: &Directory,
    id: NodeId,
    engine: &StorageEngine,
    attributes: BlockRef,
    body: Option<HeaderBody>,
) -> Result<ObjectHeader> {
    if let Some(body) = body {
        return Ok(ObjectHeader { attributes, body });
    }
    let body = match dir.node(id)?.kind() {
        NodeKind::Group(_) => HeaderBody::Group { index: BlockRef::default() },
        NodeKind::Dataset(ds) => HeaderBody::Dataset {
            element_type: ds.element_type(),
            shape: ds.shape().clone(),
            fill: ds.fill().to_vec(),
            layout: match ds.layout() {
                crate::storage::Layout::Contiguous => DiskLayout::Contiguous { offset: 0, len: 0 },
                crate::storage::Layout::Chunked { chunk_shape, .. } => DiskLayout::Chunked {
                    chunk_shape: chunk_shape.clone(),
                    compression: engine.compression_level(ds) as u8,
                    table: BlockRef::default(),
                },
            },
        },
    };
    Ok(ObjectHeader { attributes, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ContainerReader;

    #[test]
    fn test_phases() -> Result<()> {
        let mut w = ContainerWriter::in_memory();
        assert_eq!(w.phase(), WritePhase::Empty);
        let root = w.root();
        w.add_group(root, "g")?;
        assert_eq!(w.phase(), WritePhase::Populating);

        let bytes = w.finalize_to_vec()?;
        assert_eq!(w.phase(), WritePhase::Closed);
        assert!(matches!(w.add_group(root, "h"), Err(Error::Frozen)));
        assert!(matches!(w.finalize_to_vec(), Err(Error::Frozen)));
        assert_eq!(&bytes[..8], MAGIC);
        Ok(())
    }

    #[test]
    fn test_empty_container() -> Result<()> {
        let bytes = ContainerWriter::in_memory().finalize_to_vec()?;
        let reader = ContainerReader::from_bytes(bytes)?;
        assert!(reader.root()?.is_empty()?);
        assert!(reader.walk()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_header_offsets_aligned() -> Result<()> {
        let mut w = ContainerWriter::in_memory_with(WriteOptions::new().alignment(64))?;
        let root = w.root();
        let d = w.add_dataset(root, "d", DatasetBuilder::of::<u8>([3]))?;
        w.write_data(d, &[1, 2, 3])?;
        w.set_attribute(d, "x", 1u8)?;
        let bytes = w.finalize_to_vec()?;
        let reader = ContainerReader::from_bytes(bytes)?;
        let node = reader.lookup("/d")?;
        assert_eq!(node.offset() % 64, 0);
        assert_eq!(reader.dataset("/d")?.read_all()?, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_bad_options() {
        assert!(ContainerWriter::in_memory_with(WriteOptions::new().alignment(3)).is_err());
        assert!(ContainerWriter::in_memory_with(WriteOptions::new().compression(12)).is_err());
    }

    #[test]
    fn test_application_attribute_before_freeze() -> Result<()> {
        let mut w = ContainerWriter::in_memory_with(WriteOptions::new().application("hcf-test"))?;
        let root = w.root();
        w.set_attribute(root, APPLICATION_ATTRIBUTE, "user value")?;
        assert_eq!(w.phase(), WritePhase::Populating);

        w.enter_finalize()?;
        assert_eq!(w.phase(), WritePhase::Finalizing);
        let expected = AttributeValue::from("hcf-test");
        assert_eq!(w.directory().node(root)?.attribute(APPLICATION_ATTRIBUTE), Some(&expected));
        assert!(matches!(w.enter_finalize(), Err(Error::Frozen)));
        Ok(())
    }

    #[test]
    fn test_memory_target_needs_vec() {
        let mut w = ContainerWriter::in_memory();
        assert!(w.finalize().is_err());
        assert_eq!(w.phase(), WritePhase::Empty);
    }

    #[test]
    fn test_create_groups() -> Result<()> {
        let mut w = ContainerWriter::in_memory();
        let deep = w.create_groups("/a/b/c")?;
        assert_eq!(w.create_groups("a/b/c")?, deep);
        assert_eq!(w.resolve("/a/b/c")?, deep);
        let root = w.root();
        w.add_dataset(root, "d", DatasetBuilder::of::<u8>([1]))?;
        assert!(matches!(w.create_groups("/d/x"), Err(Error::NotAGroup(_))));
        Ok(())
    }
}
