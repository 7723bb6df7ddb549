//! On-disk layout: constants, superblock and object header encodings.
//!
//! All integers are little-endian. A container looks like
//!
//! ```text
//! [superblock: 32 bytes][object headers][attribute blocks][name indices]
//! [chunk tables][chunk payloads]
//! ```
//!
//! The superblock is written last, so a file whose magic is missing was
//! never finalized.

use std::io::{Cursor, Seek, Write};
use std::path::PathBuf;

use super::stream::OStream;
use crate::core::AttributeValue;
use crate::util::codec::{put_element_type, put_name, put_string, Decoder};
use crate::util::{Coord, Dim, ElementType, Error, Result, Shape, UNLIMITED};

/// Magic bytes at the start of a container.
pub const MAGIC: &[u8; 8] = b"\x89HCF\r\n\x1a\n";

/// Size of the superblock in bytes.
pub const SUPERBLOCK_SIZE: usize = 32;

/// Current format version.
pub const CURRENT_VERSION: u16 = 1;

/// Byte order marker for little-endian payloads.
pub const BYTE_ORDER_LITTLE: u8 = 0;

/// Offset of the version in the superblock.
pub const VERSION_OFFSET: usize = 8;

/// Offset of the byte order marker in the superblock.
pub const BYTE_ORDER_OFFSET: usize = 10;

/// Offset of the root group position in the superblock.
pub const ROOT_POS_OFFSET: usize = 16;

/// Offset of the recorded file length in the superblock.
pub const EOF_OFFSET: usize = 24;

/// Default alignment of allocated blocks.
pub const DEFAULT_ALIGNMENT: u64 = 8;

/// Object kind tags.
pub const KIND_GROUP: u8 = 1;
pub const KIND_DATASET: u8 = 2;

/// Dataset layout tags.
pub const LAYOUT_CONTIGUOUS: u8 = 1;
pub const LAYOUT_CHUNKED: u8 = 2;

/// Link descriptor tags.
pub const LINK_HARD: u8 = 1;
pub const LINK_SOFT: u8 = 2;
pub const LINK_EXTERNAL: u8 = 3;

/// Chunk flag: payload is zlib compressed.
pub const CHUNK_ZLIB: u8 = 1;

// ============================================================================
// Superblock
// ============================================================================

/// Fixed-size block at offset 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Superblock {
    pub version: u16,
    pub root_offset: u64,
    /// Total file length at finalize.
    pub eof: u64,
}

impl Superblock {
    pub fn new(root_offset: u64, eof: u64) -> Self {
        Self { version: CURRENT_VERSION, root_offset, eof }
    }

    /// Write the superblock fields in order: magic, version, byte order,
    /// two reserved fields, root offset and eof.
    pub fn write_to<W: Write + Seek>(&self, stream: &mut OStream<W>) -> Result<()> {
        stream.write_bytes(MAGIC)?;
        stream.write_u16(self.version)?;
        stream.write_u8(BYTE_ORDER_LITTLE)?;
        stream.write_u8(0)?;
        stream.write_u32(0)?;
        stream.write_u64(self.root_offset)?;
        stream.write_u64(self.eof)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut stream = OStream::new(Cursor::new(Vec::with_capacity(SUPERBLOCK_SIZE)))?;
        self.write_to(&mut stream)?;
        Ok(stream.into_inner()?.into_inner())
    }

    /// Parse and validate the superblock.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < SUPERBLOCK_SIZE {
            return Err(Error::UnexpectedEof(data.len() as u64));
        }
        if &data[..8] != MAGIC {
            return Err(Error::BadMagic);
        }

        let mut d = Decoder::at(&data[VERSION_OFFSET..SUPERBLOCK_SIZE], VERSION_OFFSET as u64);
        let version = d.u16()?;
        if version != CURRENT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let byte_order = d.u8()?;
        if byte_order != BYTE_ORDER_LITTLE {
            return Err(Error::invalid(format!("unsupported byte order marker {}", byte_order)));
        }
        d.u8()?;
        d.u32()?;
        let root_offset = d.u64()?;
        let eof = d.u64()?;

        if root_offset < SUPERBLOCK_SIZE as u64 || root_offset >= eof {
            return Err(Error::invalid(format!("root offset {} outside file", root_offset)));
        }
        Ok(Self { version, root_offset, eof })
    }
}

// ============================================================================
// Object headers
// ============================================================================

/// Location and entry count of a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockRef {
    pub offset: u64,
    pub count: u32,
}

/// Storage description of a dataset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiskLayout {
    /// One payload run; `len == 0` means never written.
    Contiguous { offset: u64, len: u64 },
    /// Independently stored chunks listed in a chunk table.
    Chunked { chunk_shape: Coord, compression: u8, table: BlockRef },
}

/// Kind-specific part of an object header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderBody {
    Group { index: BlockRef },
    Dataset {
        element_type: ElementType,
        shape: Shape,
        fill: Vec<u8>,
        layout: DiskLayout,
    },
}

/// Decoded object header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectHeader {
    pub attributes: BlockRef,
    pub body: HeaderBody,
}

impl ObjectHeader {
    #[inline]
    pub fn is_group(&self) -> bool {
        matches!(self.body, HeaderBody::Group { .. })
    }

    #[inline]
    pub fn is_dataset(&self) -> bool {
        matches!(self.body, HeaderBody::Dataset { .. })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(64);
        match &self.body {
            HeaderBody::Group { index } => {
                buf.push(KIND_GROUP);
                put_block(&mut buf, self.attributes);
                put_block(&mut buf, *index);
            }
            HeaderBody::Dataset { element_type, shape, fill, layout } => {
                buf.push(KIND_DATASET);
                put_block(&mut buf, self.attributes);
                put_element_type(&mut buf, *element_type);
                buf.extend_from_slice(&(shape.rank() as u32).to_le_bytes());
                for dim in shape.dims() {
                    buf.extend_from_slice(&dim.size.to_le_bytes());
                    buf.extend_from_slice(&dim.max.unwrap_or(UNLIMITED).to_le_bytes());
                }
                let fill_len = u32::try_from(fill.len())
                    .map_err(|_| Error::ValueTooLong { len: fill.len(), max: u32::MAX as usize })?;
                buf.extend_from_slice(&fill_len.to_le_bytes());
                buf.extend_from_slice(fill);
                match layout {
                    DiskLayout::Contiguous { offset, len } => {
                        buf.push(LAYOUT_CONTIGUOUS);
                        buf.extend_from_slice(&offset.to_le_bytes());
                        buf.extend_from_slice(&len.to_le_bytes());
                    }
                    DiskLayout::Chunked { chunk_shape, compression, table } => {
                        buf.push(LAYOUT_CHUNKED);
                        for &c in chunk_shape {
                            buf.extend_from_slice(&c.to_le_bytes());
                        }
                        buf.push(*compression);
                        put_block(&mut buf, *table);
                    }
                }
            }
        }
        Ok(buf)
    }

    pub fn decode(d: &mut Decoder<'_>) -> Result<Self> {
        let kind = d.u8()?;
        let attributes = read_block(d)?;
        let body = match kind {
            KIND_GROUP => HeaderBody::Group { index: read_block(d)? },
            KIND_DATASET => {
                let element_type = d.element_type()?;
                let rank = d.u32()? as usize;
                if rank > d.remaining() / 16 {
                    return Err(Error::UnexpectedEof(d.remaining() as u64));
                }
                let mut dims = Vec::with_capacity(rank);
                for _ in 0..rank {
                    let size = d.u64()?;
                    let max = d.u64()?;
                    let max = (max != UNLIMITED).then_some(max);
                    if max.map_or(false, |m| size > m) {
                        return Err(Error::invalid(format!("extent {} exceeds maximum", size)));
                    }
                    dims.push(Dim { size, max });
                }
                let fill_len = d.u32()? as usize;
                let fill = d.bytes(fill_len)?.to_vec();
                if element_type.size().map_or(fill_len != 0, |s| s != fill_len) {
                    return Err(Error::invalid(format!(
                        "fill value of {} bytes for {}",
                        fill_len, element_type
                    )));
                }
                let layout = match d.u8()? {
                    LAYOUT_CONTIGUOUS => DiskLayout::Contiguous { offset: d.u64()?, len: d.u64()? },
                    LAYOUT_CHUNKED => {
                        let mut chunk_shape = Coord::with_capacity(rank);
                        for _ in 0..rank {
                            let c = d.u64()?;
                            if c == 0 {
                                return Err(Error::invalid("zero chunk extent"));
                            }
                            chunk_shape.push(c);
                        }
                        let compression = d.u8()?;
                        DiskLayout::Chunked { chunk_shape, compression, table: read_block(d)? }
                    }
                    other => return Err(Error::invalid(format!("unknown layout tag {}", other))),
                };
                HeaderBody::Dataset { element_type, shape: Shape::from(dims), fill, layout }
            }
            other => return Err(Error::invalid(format!("unknown object kind {}", other))),
        };
        Ok(Self { attributes, body })
    }
}

fn put_block(buf: &mut Vec<u8>, block: BlockRef) {
    buf.extend_from_slice(&block.offset.to_le_bytes());
    buf.extend_from_slice(&block.count.to_le_bytes());
}

fn read_block(d: &mut Decoder<'_>) -> Result<BlockRef> {
    Ok(BlockRef { offset: d.u64()?, count: d.u32()? })
}

// ============================================================================
// Name index
// ============================================================================

/// Link descriptor stored in a group's name index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiskLink {
    /// Offset of the target's object header.
    Hard(u64),
    Soft(String),
    External { file: PathBuf, path: String },
}

/// Encode a name index. Entries must already be sorted by name.
pub fn encode_name_index<'a>(
    entries: impl IntoIterator<Item = (&'a str, DiskLink)>,
) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for (name, link) in entries {
        put_name(&mut buf, name)?;
        match link {
            DiskLink::Hard(offset) => {
                buf.push(LINK_HARD);
                buf.extend_from_slice(&offset.to_le_bytes());
            }
            DiskLink::Soft(path) => {
                buf.push(LINK_SOFT);
                put_string(&mut buf, &path)?;
            }
            DiskLink::External { file, path } => {
                buf.push(LINK_EXTERNAL);
                let file = file
                    .to_str()
                    .ok_or_else(|| Error::invalid(format!("external file {} is not UTF-8", file.display())))?;
                put_string(&mut buf, file)?;
                put_string(&mut buf, &path)?;
            }
        }
    }
    Ok(buf)
}

/// Decode `count` name index entries.
pub fn decode_name_index(d: &mut Decoder<'_>, count: u32) -> Result<Vec<(String, DiskLink)>> {
    let mut entries: Vec<(String, DiskLink)> = Vec::with_capacity((count as usize).min(d.remaining() / 3));
    for _ in 0..count {
        let name = d.name()?;
        let link = match d.u8()? {
            LINK_HARD => DiskLink::Hard(d.u64()?),
            LINK_SOFT => DiskLink::Soft(d.string()?),
            LINK_EXTERNAL => DiskLink::External { file: PathBuf::from(d.string()?), path: d.string()? },
            other => return Err(Error::invalid(format!("unknown link tag {} for {:?}", other, name))),
        };
        if entries.last().map_or(false, |(prev, _)| prev.as_str() >= name.as_str()) {
            return Err(Error::invalid(format!("name index not sorted at {:?}", name)));
        }
        entries.push((name, link));
    }
    Ok(entries)
}

// ============================================================================
// Attribute block
// ============================================================================

/// Encode an attribute block.
pub fn encode_attributes<'a>(
    attributes: impl IntoIterator<Item = (&'a str, &'a AttributeValue)>,
) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for (name, value) in attributes {
        put_name(&mut buf, name)?;
        put_element_type(&mut buf, value.element_type());
        let encoded = value.encode();
        buf.extend_from_slice(&(encoded.len() as u64).to_le_bytes());
        buf.extend_from_slice(&encoded);
    }
    Ok(buf)
}

/// Decode `count` attributes.
pub fn decode_attributes(d: &mut Decoder<'_>, count: u32) -> Result<Vec<(String, AttributeValue)>> {
    let mut attributes = Vec::with_capacity((count as usize).min(d.remaining() / 16));
    for _ in 0..count {
        let name = d.name()?;
        let element_type = d.element_type()?;
        let len = d.len_u64()?;
        let value = AttributeValue::decode(d.bytes(len)?, element_type)?;
        attributes.push((name, value));
    }
    Ok(attributes)
}
