//! In-memory object directory.
//!
//! Nodes live in an arena and are referenced by [`NodeId`]. Groups map names
//! to [`Link`]s; a hard link shares ownership of its target, counted in the
//! target's `hard_links`. The root is owned by the container and starts with
//! one reference. When the last hard link to a node is removed the node is
//! released, together with everything only it kept alive. Ids are never
//! reused.
//!
//! Every operation validates before it mutates, so a failed call leaves the
//! directory unchanged.

mod node;

pub use node::{Link, Node, NodeId, NodeKind};

use std::collections::BTreeMap;

use tracing::trace;

use crate::core::AttributeValue;
use crate::format::ReadOptions;
use crate::link::{resolve_path, Edge, LinkContext, LinkGraph, Target, VisitedLinks};
use crate::storage::{Dataset, DatasetBuilder};
use crate::util::{Error, Result};

/// Result of a directory lookup: a local node or a node of an external
/// container.
pub type LookupResult = Target<NodeId>;

/// Tree of groups and datasets, with attributes and links.
#[derive(Clone)]
pub struct Directory {
    nodes: Vec<Option<Node>>,
    context: LinkContext,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    /// Empty directory holding only the root group.
    pub fn new() -> Self {
        Self::with_context(LinkContext::detached(ReadOptions::default()))
    }

    /// Empty directory whose external links resolve in `context`.
    pub fn with_context(context: LinkContext) -> Self {
        let mut root = Node::group();
        root.hard_links = 1;
        Self { nodes: vec![Some(root)], context }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.index()), Some(Some(_)))
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::NameNotFound(id.to_string()))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::NameNotFound(id.to_string()))
    }

    #[inline]
    pub fn context(&self) -> &LinkContext {
        &self.context
    }

    // ------------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------------

    /// Create an empty group under `parent`.
    pub fn add_group(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.check_insert(parent, name)?;
        let id = self.push(Node::group())?;
        self.insert(parent, name, Link::Hard(id))?;
        trace!(%parent, name, %id, "added group");
        Ok(id)
    }

    /// Create a dataset under `parent`.
    pub fn add_dataset(&mut self, parent: NodeId, name: &str, builder: DatasetBuilder) -> Result<NodeId> {
        self.check_insert(parent, name)?;
        let dataset = builder.build()?;
        let id = self.push(Node::dataset(dataset))?;
        self.insert(parent, name, Link::Hard(id))?;
        trace!(%parent, name, %id, "added dataset");
        Ok(id)
    }

    /// Store a link under `parent`.
    ///
    /// A hard link to a released node fails with [`Error::NameNotFound`];
    /// one that would make `parent` its own descendant fails with
    /// [`Error::LinkCycle`]. External file names must be valid UTF-8.
    pub fn add_link(&mut self, parent: NodeId, name: &str, link: Link) -> Result<()> {
        self.check_insert(parent, name)?;
        match &link {
            Link::Hard(target) => {
                self.node(*target)?;
                if self.reaches(*target, parent) {
                    return Err(Error::LinkCycle(name.to_string()));
                }
            }
            Link::External { file, .. } if file.to_str().is_none() => {
                return Err(Error::invalid(format!("external file {} is not UTF-8", file.display())));
            }
            Link::Soft(_) | Link::External { .. } => {}
        }
        self.insert(parent, name, link)
    }

    /// Remove the link `name` from `parent` and return it.
    pub fn unlink(&mut self, parent: NodeId, name: &str) -> Result<Link> {
        let entries = self.entries_mut(parent)?;
        let link = entries.remove(name).ok_or_else(|| Error::NameNotFound(name.to_string()))?;
        if let Link::Hard(target) = link {
            self.release(target);
        }
        trace!(%parent, name, "unlinked");
        Ok(link)
    }

    /// Links of a group, sorted by name.
    pub fn entries(&self, group: NodeId) -> Result<impl Iterator<Item = (&str, &Link)>> {
        let node = self.node(group)?;
        let entries = node.entries().ok_or_else(|| Error::NotAGroup(group.to_string()))?;
        Ok(entries.iter().map(|(n, l)| (n.as_str(), l)))
    }

    fn entries_mut(&mut self, group: NodeId) -> Result<&mut BTreeMap<String, Link>> {
        match &mut self.node_mut(group)?.kind {
            NodeKind::Group(entries) => Ok(entries),
            NodeKind::Dataset(_) => Err(Error::NotAGroup(group.to_string())),
        }
    }

    fn check_insert(&self, parent: NodeId, name: &str) -> Result<()> {
        validate_name(name)?;
        let entries = self
            .node(parent)?
            .entries()
            .ok_or_else(|| Error::NotAGroup(parent.to_string()))?;
        if entries.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn push(&mut self, node: Node) -> Result<NodeId> {
        let id = u32::try_from(self.nodes.len()).map_err(|_| Error::other("too many nodes"))?;
        self.nodes.push(Some(node));
        Ok(NodeId(id))
    }

    fn insert(&mut self, parent: NodeId, name: &str, link: Link) -> Result<()> {
        if let Link::Hard(target) = link {
            self.node_mut(target)?.hard_links += 1;
        }
        self.entries_mut(parent)?.insert(name.to_string(), link);
        Ok(())
    }

    /// Drop one hard reference to `id`, releasing nodes that lose their last.
    fn release(&mut self, id: NodeId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(node) = self.nodes.get_mut(id.index()).and_then(Option::as_mut) else {
                continue;
            };
            node.hard_links = node.hard_links.saturating_sub(1);
            if node.hard_links > 0 {
                continue;
            }
            if let Some(Node { kind: NodeKind::Group(entries), .. }) = self.nodes[id.index()].take() {
                pending.extend(entries.into_values().filter_map(|link| match link {
                    Link::Hard(child) => Some(child),
                    _ => None,
                }));
            }
            trace!(%id, "released node");
        }
    }

    /// Whether `to` is reachable from `from` through hard links.
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if std::mem::replace(&mut seen[id.index()], true) {
                continue;
            }
            if let Ok(Node { kind: NodeKind::Group(entries), .. }) = self.node(id) {
                stack.extend(entries.values().filter_map(|link| match link {
                    Link::Hard(child) => Some(*child),
                    _ => None,
                }));
            }
        }
        false
    }

    // ------------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------------

    /// Set an attribute, replacing any existing value of the same name.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: impl Into<AttributeValue>) -> Result<()> {
        validate_name(name)?;
        let value = value.into();
        let attributes = &mut self.node_mut(node)?.attributes;
        match attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => attributes.push((name.to_string(), value)),
        }
        Ok(())
    }

    /// Remove an attribute and return its value.
    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<AttributeValue> {
        let attributes = &mut self.node_mut(node)?.attributes;
        let index = attributes
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| Error::NameNotFound(name.to_string()))?;
        Ok(attributes.remove(index).1)
    }

    /// Attributes of a node in insertion order.
    pub fn attributes(&self, node: NodeId) -> Result<&[(String, AttributeValue)]> {
        Ok(self.node(node)?.attributes())
    }

    // ------------------------------------------------------------------------
    // Datasets
    // ------------------------------------------------------------------------

    pub fn dataset(&self, id: NodeId) -> Result<&Dataset> {
        self.node(id)?.as_dataset().ok_or_else(|| Error::NotADataset(id.to_string()))
    }

    pub fn dataset_mut(&mut self, id: NodeId) -> Result<&mut Dataset> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Dataset(ds) => Ok(ds.as_mut()),
            NodeKind::Group(_) => Err(Error::NotADataset(id.to_string())),
        }
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    /// Resolve a path, following soft and external links.
    pub fn lookup(&self, path: &str) -> Result<LookupResult> {
        self.lookup_from(self.root(), "/", path)
    }

    /// Resolve a path relative to `group` (absolute paths start at the root).
    pub fn lookup_from(&self, group: NodeId, group_path: &str, path: &str) -> Result<LookupResult> {
        let mut visited = VisitedLinks::new(self.context.options().max_link_depth);
        resolve_path(self, &group, group_path, path, &mut visited)
    }

    /// Resolve a path that must stay inside this directory.
    pub fn resolve(&self, path: &str) -> Result<NodeId> {
        match self.lookup(path)? {
            Target::Local(id) => Ok(id),
            Target::External(node) => Err(Error::other(format!(
                "{} resolves into external container {}",
                path,
                node.reader().identity().display()
            ))),
        }
    }
}

impl LinkGraph for Directory {
    type Node = NodeId;

    fn root_node(&self) -> NodeId {
        self.root()
    }

    fn is_group(&self, node: &NodeId) -> Result<bool> {
        Ok(self.node(*node)?.is_group())
    }

    fn child(&self, group: &NodeId, name: &str) -> Result<Option<Edge<NodeId>>> {
        let entries = self
            .node(*group)?
            .entries()
            .ok_or_else(|| Error::NotAGroup(group.to_string()))?;
        Ok(entries.get(name).map(|link| match link {
            Link::Hard(id) => Edge::Node(*id),
            Link::Soft(path) => Edge::Soft(path.clone()),
            Link::External { file, path } => Edge::External { file: file.clone(), path: path.clone() },
        }))
    }

    fn context(&self) -> &LinkContext {
        &self.context
    }
}

/// Names are non-empty, fit the on-disk length field and contain no `/`.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name.contains('/') || name.len() > u16::MAX as usize {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Selection;

    fn names(dir: &Directory, group: NodeId) -> Vec<String> {
        dir.entries(group).unwrap().map(|(n, _)| n.to_string()).collect()
    }

    #[test]
    fn test_duplicate_name_leaves_group_unchanged() -> Result<()> {
        let mut dir = Directory::new();
        let root = dir.root();
        let g = dir.add_group(root, "g")?;
        assert!(matches!(dir.add_group(root, "g"), Err(Error::DuplicateName(_))));
        assert!(matches!(
            dir.add_dataset(root, "g", DatasetBuilder::of::<u8>([1])),
            Err(Error::DuplicateName(_))
        ));
        assert_eq!(names(&dir, root), vec!["g"]);
        assert_eq!(dir.resolve("/g")?, g);
        assert_eq!(dir.len(), 2);
        Ok(())
    }

    #[test]
    fn test_invalid_names_and_parents() -> Result<()> {
        let mut dir = Directory::new();
        let root = dir.root();
        assert!(matches!(dir.add_group(root, ""), Err(Error::InvalidName(_))));
        assert!(matches!(dir.add_group(root, "a/b"), Err(Error::InvalidName(_))));
        let ds = dir.add_dataset(root, "d", DatasetBuilder::of::<i32>([4]))?;
        assert!(matches!(dir.add_group(ds, "x"), Err(Error::NotAGroup(_))));
        assert!(matches!(dir.dataset(root), Err(Error::NotADataset(_))));
        Ok(())
    }

    #[test]
    fn test_hard_links_share_and_release() -> Result<()> {
        let mut dir = Directory::new();
        let root = dir.root();
        let a = dir.add_group(root, "a")?;
        let b = dir.add_group(root, "b")?;
        let inner = dir.add_group(a, "inner")?;
        let d = dir.add_dataset(inner, "d", DatasetBuilder::of::<u8>([2]))?;
        dir.add_link(b, "shared", Link::Hard(inner))?;
        assert_eq!(dir.node(inner)?.hard_links(), 2);
        assert_eq!(dir.resolve("/b/shared/d")?, d);

        dir.unlink(a, "inner")?;
        assert!(dir.contains(inner));
        assert_eq!(dir.node(inner)?.hard_links(), 1);

        dir.unlink(b, "shared")?;
        assert!(!dir.contains(inner));
        assert!(!dir.contains(d));
        assert!(matches!(dir.add_link(a, "again", Link::Hard(d)), Err(Error::NameNotFound(_))));
        assert!(names(&dir, a).is_empty());
        Ok(())
    }

    #[test]
    fn test_hard_link_cycle_rejected() -> Result<()> {
        let mut dir = Directory::new();
        let root = dir.root();
        let a = dir.add_group(root, "a")?;
        let b = dir.add_group(a, "b")?;
        assert!(matches!(dir.add_link(b, "up", Link::Hard(a)), Err(Error::LinkCycle(_))));
        assert!(matches!(dir.add_link(b, "me", Link::Hard(b)), Err(Error::LinkCycle(_))));
        assert!(matches!(dir.add_link(a, "root", Link::Hard(root)), Err(Error::LinkCycle(_))));
        assert!(names(&dir, b).is_empty());
        Ok(())
    }

    #[test]
    fn test_soft_links() -> Result<()> {
        let mut dir = Directory::new();
        let root = dir.root();
        let g = dir.add_group(root, "g")?;
        let d = dir.add_dataset(g, "data", DatasetBuilder::of::<f32>([3]))?;
        dir.add_link(root, "alias", Link::soft("/g/data"))?;
        dir.add_link(g, "sibling", Link::soft("data"))?;
        dir.add_link(root, "dangling", Link::soft("/nowhere"))?;
        dir.add_link(root, "self", Link::soft("/self"))?;

        assert_eq!(dir.resolve("/alias")?, d);
        assert_eq!(dir.resolve("/g/sibling")?, d);
        assert!(matches!(dir.lookup("/dangling"), Err(Error::NameNotFound(_))));
        assert!(matches!(dir.lookup("/self"), Err(Error::LinkCycle(_))));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_external_file_must_be_utf8() -> Result<()> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let mut dir = Directory::new();
        let root = dir.root();
        let file = std::path::PathBuf::from(OsStr::from_bytes(b"data\xff.hcf"));
        assert!(matches!(
            dir.add_link(root, "ext", Link::external(file, "/d")),
            Err(Error::InvalidStructure(_))
        ));
        assert!(names(&dir, root).is_empty());
        dir.add_link(root, "ext", Link::external("data.hcf", "/d"))?;
        assert_eq!(names(&dir, root), vec!["ext"]);
        Ok(())
    }

    #[test]
    fn test_attributes() -> Result<()> {
        let mut dir = Directory::new();
        let root = dir.root();
        dir.set_attribute(root, "note", "hello")?;
        dir.set_attribute(root, "count", 3i32)?;
        dir.set_attribute(root, "note", "bye")?;
        let attrs = dir.attributes(root)?;
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].0, "note");
        assert_eq!(attrs[0].1.as_string()?, "bye");

        assert_eq!(dir.remove_attribute(root, "count")?.as_scalar::<i32>()?, 3);
        assert!(matches!(dir.remove_attribute(root, "count"), Err(Error::NameNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_dataset_access() -> Result<()> {
        let mut dir = Directory::new();
        let root = dir.root();
        let d = dir.add_dataset(root, "d", DatasetBuilder::of::<i32>([4]))?;
        dir.dataset_mut(d)?.write_typed(&Selection::from(0..4), &[1, 2, 3, 4])?;
        assert_eq!(dir.dataset(d)?.read_typed::<i32>(&Selection::from(0..4))?, vec![1, 2, 3, 4]);
        Ok(())
    }
}
