//! Core layer - values and helpers shared by the writer and the reader.
//!
//! This module provides:
//! - [`AttributeValue`] - Typed attribute values and their encoding
//! - [`Selection`] - Hyper-rectangular index ranges
//! - [`ChunkCache`] - Decoded chunk cache for readers
//! - zlib chunk compression

mod attribute;
mod cache;
mod compression;
mod selection;

pub use attribute::{AttributeData, AttributeValue};
pub use cache::{ChunkCache, DEFAULT_CHUNK_CACHE_BYTES};
pub use compression::{compress, decompress, is_compressed, MAX_LEVEL};
pub use selection::Selection;
