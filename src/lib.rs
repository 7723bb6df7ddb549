//! # hcf
//!
//! Writer and reader for a hierarchical binary container format: a tree of
//! named groups holding typed n-dimensional datasets, with small typed
//! attributes on every object and hard, soft and external links between
//! them.
//!
//! ## Modules
//!
//! - [`util`] - Element types, shapes, errors
//! - [`core`] - Attribute values, selections, chunk cache, compression
//! - [`storage`] - Contiguous and chunked dataset storage
//! - [`directory`] - In-memory object tree of a container being written
//! - [`link`] - Path resolution across soft and external links
//! - [`format`] - On-disk layout, [`ContainerWriter`] and [`ContainerReader`]
//! - [`tools`] - Summaries, search, linking and fixture generation
//!
//! ## Example
//!
//! ```no_run
//! use hcf::prelude::*;
//!
//! # fn main() -> hcf::Result<()> {
//! let mut writer = ContainerWriter::create("out.hcf")?;
//! let root = writer.root();
//! let d = writer.add_dataset(root, "d", DatasetBuilder::of::<i32>([4]))?;
//! writer.write_typed(d, &Selection::from(0..4), &[1, 2, 3, 4])?;
//! writer.set_attribute(d, "note", "hello")?;
//! writer.finalize()?;
//!
//! let reader = ContainerReader::open("out.hcf")?;
//! let values: Vec<i32> = reader.dataset("/d")?.read_typed(&Selection::from(0..4))?;
//! assert_eq!(values, vec![1, 2, 3, 4]);
//! # Ok(())
//! # }
//! ```

pub mod util;
pub mod core;
pub mod storage;
pub mod directory;
pub mod link;
pub mod format;
pub mod tools;

// Re-export commonly used types
pub use util::{ElementType, Error, Result, Shape};
pub use format::{ContainerReader, ContainerWriter, ReadOptions, WriteOptions};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{AttributeValue, Selection};
    pub use crate::directory::{Link, NodeId};
    pub use crate::format::{
        ContainerReader, ContainerStats, ContainerWriter, EntryKind, IDataset, IGroup, INode,
        ReadOptions, WalkEntry, WriteOptions,
    };
    pub use crate::storage::{DatasetBuilder, Layout};
    pub use crate::util::{Dim, Element, ElementType, Error, Result, Shape};
}
