//! Directory nodes and links.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::core::AttributeValue;
use crate::storage::Dataset;

/// Stable identity of a node in a [`Directory`](super::Directory).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A named reference from a group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Link {
    /// Shares ownership of the target.
    Hard(NodeId),
    /// Path re-resolved on every lookup; may dangle.
    Soft(String),
    /// Path inside another container file.
    External { file: PathBuf, path: String },
}

impl Link {
    pub fn soft(path: impl Into<String>) -> Self {
        Self::Soft(path.into())
    }

    pub fn external(file: impl Into<PathBuf>, path: impl Into<String>) -> Self {
        Self::External { file: file.into(), path: path.into() }
    }

    #[inline]
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Hard(_))
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hard(id) => write!(f, "{}", id),
            Self::Soft(path) => write!(f, "-> {}", path),
            Self::External { file, path } => write!(f, "-> {}:{}", file.display(), path),
        }
    }
}

/// Group or dataset payload of a node.
#[derive(Clone, Debug)]
pub enum NodeKind {
    Group(BTreeMap<String, Link>),
    Dataset(Box<Dataset>),
}

/// An object in the directory.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) attributes: Vec<(String, AttributeValue)>,
    pub(crate) hard_links: u32,
}

impl Node {
    pub(crate) fn group() -> Self {
        Self { kind: NodeKind::Group(BTreeMap::new()), attributes: Vec::new(), hard_links: 0 }
    }

    pub(crate) fn dataset(dataset: Dataset) -> Self {
        Self { kind: NodeKind::Dataset(Box::new(dataset)), attributes: Vec::new(), hard_links: 0 }
    }

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[inline]
    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group(_))
    }

    #[inline]
    pub fn is_dataset(&self) -> bool {
        matches!(self.kind, NodeKind::Dataset(_))
    }

    /// Attributes in insertion order.
    #[inline]
    pub fn attributes(&self) -> &[(String, AttributeValue)] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Number of hard links to this node.
    #[inline]
    pub fn hard_links(&self) -> u32 {
        self.hard_links
    }

    pub(crate) fn entries(&self) -> Option<&BTreeMap<String, Link>> {
        match &self.kind {
            NodeKind::Group(entries) => Some(entries),
            NodeKind::Dataset(_) => None,
        }
    }

    pub fn as_dataset(&self) -> Option<&Dataset> {
        match &self.kind {
            NodeKind::Dataset(ds) => Some(ds.as_ref()),
            NodeKind::Group(_) => None,
        }
    }
}
