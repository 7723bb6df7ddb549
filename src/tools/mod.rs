//! Tooling built on top of the reader and writer.
//!
//! - [`info`] - Dataset summaries and previews
//! - [`search`] - Fuzzy path search over a container
//! - [`linker`] - Combine containers through external links
//! - [`fixtures`] - Reference containers covering every feature

pub mod fixtures;
mod info;
mod linker;
mod search;

pub use fixtures::write_fixtures;
pub use info::{format_size, DatasetInfo, DatasetPreview};
pub use linker::link_files;
pub use search::{full_traversal, highlight_spans, search, SearchHit};
