//! On-disk container format.
//!
//! This module provides:
//! - [`layout`] - Binary layout constants and block codecs
//! - [`LayoutAllocator`] - Append-only offset allocation
//! - [`OStream`] / [`WritePlan`] - Positioned output
//! - [`ContainerWriter`] - Builds and finalizes a container
//! - [`ContainerReader`] - Parses and serves a finalized container

pub mod layout;
mod allocator;
mod reader;
mod stream;
mod writer;

pub use allocator::{Extent, ExtentKind, LayoutAllocator, LayoutTable};
pub use layout::{DiskLink, Superblock};
pub use reader::{ContainerReader, EntryKind, IDataset, IGroup, INode, IStreams, ReadOptions, WalkEntry};
pub use stream::{OStream, WritePlan};
pub use writer::{ContainerStats, ContainerWriter, WriteOptions, WritePhase, APPLICATION_ATTRIBUTE};
