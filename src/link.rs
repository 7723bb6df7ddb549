//! Link resolution.
//!
//! Paths are resolved one segment at a time. Hard links are plain edges of
//! the graph. Soft links re-enter resolution with their stored path (relative
//! paths start at the group holding the link). External links open the target
//! container through a shared [`ExternalFiles`] registry and continue there.
//!
//! Every soft or external hop is recorded in a [`VisitedLinks`] stack as a
//! `(file, link path)` pair for the duration of its resolution. Meeting a
//! pair that is still on the stack, or exceeding the configured depth, fails
//! with [`Error::LinkCycle`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::format::{ContainerReader, INode, ReadOptions};
use crate::util::{Error, Result};

/// Identity used for containers that have no backing file.
pub const MEMORY_IDENTITY: &str = "<memory>";

// ============================================================================
// Graph abstraction
// ============================================================================

/// One step out of a group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Edge<N> {
    Node(N),
    Soft(String),
    External { file: PathBuf, path: String },
}

/// Result of resolving a path.
#[derive(Clone, Debug)]
pub enum Target<N> {
    /// A node of the container the lookup started in.
    Local(N),
    /// A node of another container, reached through an external link.
    External(INode),
}

impl<N> Target<N> {
    /// The local node, if resolution stayed in this container.
    pub fn local(self) -> Option<N> {
        match self {
            Self::Local(n) => Some(n),
            Self::External(_) => None,
        }
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }
}

/// A container's group structure as seen by the resolver.
pub trait LinkGraph {
    type Node: Clone;

    fn root_node(&self) -> Self::Node;

    fn is_group(&self, node: &Self::Node) -> Result<bool>;

    /// The link stored under `name` in `group`, if any.
    fn child(&self, group: &Self::Node, name: &str) -> Result<Option<Edge<Self::Node>>>;

    fn context(&self) -> &LinkContext;
}

// ============================================================================
// Cycle detection
// ============================================================================

/// Stack of soft/external links currently being resolved.
#[derive(Debug)]
pub struct VisitedLinks {
    stack: Vec<(PathBuf, String)>,
    max_depth: usize,
}

impl VisitedLinks {
    pub fn new(max_depth: usize) -> Self {
        Self { stack: Vec::new(), max_depth }
    }

    /// Number of links being resolved.
    #[inline]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn enter(&mut self, file: &Path, path: &str) -> Result<()> {
        let revisit = self.stack.iter().any(|(f, p)| f == file && p == path);
        if revisit || self.stack.len() >= self.max_depth {
            debug!(file = %file.display(), path, depth = self.stack.len(), "link cycle");
            return Err(Error::LinkCycle(path.to_string()));
        }
        self.stack.push((file.to_path_buf(), path.to_string()));
        Ok(())
    }

    fn leave(&mut self) {
        self.stack.pop();
    }
}

// ============================================================================
// External file registry
// ============================================================================

type ReaderMap = HashMap<PathBuf, ContainerReader>;

/// Containers opened through external links, keyed by canonical path.
///
/// Cloning shares the registry. Readers opened through it keep only a weak
/// handle back, so dropping the registry's owner closes them.
#[derive(Clone, Default)]
pub struct ExternalFiles {
    readers: Arc<RwLock<ReaderMap>>,
}

impl ExternalFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open external containers.
    pub fn len(&self) -> usize {
        self.readers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.read().is_empty()
    }

    /// Open `file` or reuse an already open handle.
    ///
    /// Relative names are tried against `base_dir` first, then the working
    /// directory.
    pub fn open(&self, base_dir: Option<&Path>, file: &Path, options: &ReadOptions) -> Result<ContainerReader> {
        let unavailable = |reason: String| Error::ExternalUnavailable { file: file.to_path_buf(), reason };

        let mut candidates = Vec::with_capacity(2);
        if file.is_relative() {
            if let Some(dir) = base_dir {
                candidates.push(dir.join(file));
            }
        }
        candidates.push(file.to_path_buf());

        let found = candidates
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| unavailable("no such file".to_string()))?;
        let key = found.canonicalize().map_err(|e| unavailable(e.to_string()))?;

        if let Some(reader) = self.readers.read().get(&key) {
            trace!(file = %key.display(), "reusing external container");
            return Ok(reader.clone());
        }

        let context = LinkContext {
            identity: key.clone(),
            base_dir: key.parent().map(Path::to_path_buf),
            registry: Registry::Shared(Arc::downgrade(&self.readers)),
            options: options.clone(),
        };
        let reader = ContainerReader::open_in(&key, context).map_err(|e| unavailable(e.to_string()))?;
        debug!(file = %key.display(), "opened external container");

        let mut readers = self.readers.write();
        Ok(readers.entry(key).or_insert(reader).clone())
    }
}

#[derive(Clone)]
enum Registry {
    Owned(ExternalFiles),
    Shared(Weak<RwLock<ReaderMap>>),
}

/// Where a container lives and how its external links are opened.
#[derive(Clone)]
pub struct LinkContext {
    identity: PathBuf,
    base_dir: Option<PathBuf>,
    registry: Registry,
    options: ReadOptions,
}

impl LinkContext {
    /// Context of a container with no backing file. External links resolve
    /// against the working directory.
    pub fn detached(options: ReadOptions) -> Self {
        Self {
            identity: PathBuf::from(MEMORY_IDENTITY),
            base_dir: None,
            registry: Registry::Owned(ExternalFiles::new()),
            options,
        }
    }

    /// Context of a container stored at `path` (which need not exist yet).
    pub fn for_file(path: &Path, options: ReadOptions) -> Self {
        let identity = canonical_identity(path);
        Self {
            base_dir: identity.parent().map(Path::to_path_buf),
            identity,
            registry: Registry::Owned(ExternalFiles::new()),
            options,
        }
    }

    /// File identity used in cycle detection.
    #[inline]
    pub fn identity(&self) -> &Path {
        &self.identity
    }

    /// Directory relative external file names resolve against.
    #[inline]
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    #[inline]
    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    /// The registry external links are opened through.
    pub fn externals(&self) -> ExternalFiles {
        match &self.registry {
            Registry::Owned(files) => files.clone(),
            Registry::Shared(weak) => weak
                .upgrade()
                .map(|readers| ExternalFiles { readers })
                .unwrap_or_default(),
        }
    }
}

/// Canonical form of `path`, tolerating a file that does not exist yet.
pub(crate) fn canonical_identity(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    match (parent.canonicalize(), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Split a path into its non-empty segments.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".")
}

/// Join a group path and a child name.
pub fn join_path(group: &str, name: &str) -> String {
    format!("{}/{}", group.trim_end_matches('/'), name)
}

/// Resolve `path` in `graph`.
///
/// Absolute paths start at the root. Relative paths start at `base`, whose
/// own path is `base_path`.
pub fn resolve_path<G: LinkGraph>(
    graph: &G,
    base: &G::Node,
    base_path: &str,
    path: &str,
    visited: &mut VisitedLinks,
) -> Result<Target<G::Node>> {
    let (mut node, mut prefix) = if path.starts_with('/') {
        (graph.root_node(), String::new())
    } else {
        (base.clone(), base_path.trim_end_matches('/').to_string())
    };

    let segments: Vec<&str> = split_path(path).collect();
    for (i, segment) in segments.iter().enumerate() {
        if !graph.is_group(&node)? {
            let at = if prefix.is_empty() { "/" } else { prefix.as_str() };
            return Err(Error::NotAGroup(at.to_string()));
        }
        let link_path = join_path(&prefix, segment);
        let edge = graph
            .child(&node, segment)?
            .ok_or_else(|| Error::NameNotFound(link_path.clone()))?;

        match edge {
            Edge::Node(child) => node = child,
            Edge::Soft(target) => {
                trace!(link = %link_path, %target, "following soft link");
                visited.enter(graph.context().identity(), &link_path)?;
                let resolved = resolve_path(graph, &node, &prefix, &target, visited);
                visited.leave();
                match resolved? {
                    Target::Local(n) => node = n,
                    Target::External(inode) => return continue_external(inode, &segments[i + 1..], visited),
                }
            }
            Edge::External { file, path: target } => {
                trace!(link = %link_path, file = %file.display(), %target, "following external link");
                visited.enter(graph.context().identity(), &link_path)?;
                let resolved = follow_external(graph.context(), &file, &target, visited);
                visited.leave();
                return continue_external(resolved?, &segments[i + 1..], visited);
            }
        }
        prefix = link_path;
    }
    Ok(Target::Local(node))
}

fn follow_external(context: &LinkContext, file: &Path, path: &str, visited: &mut VisitedLinks) -> Result<INode> {
    let reader = context.externals().open(context.base_dir(), file, context.options())?;
    let absolute = if path.starts_with('/') { path.to_string() } else { format!("/{}", path) };
    let root = reader.root_inode();
    reader.resolve_from(&root, &absolute, visited)
}

fn continue_external<N>(inode: INode, rest: &[&str], visited: &mut VisitedLinks) -> Result<Target<N>> {
    if rest.is_empty() {
        return Ok(Target::External(inode));
    }
    let reader = inode.reader().clone();
    let resolved = reader.resolve_from(&inode, &rest.join("/"), visited)?;
    Ok(Target::External(resolved))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal graph: groups are indices, entries are listed per group.
    struct Toy {
        groups: Vec<Vec<(&'static str, Edge<usize>)>>,
        context: LinkContext,
    }

    impl LinkGraph for Toy {
        type Node = usize;

        fn root_node(&self) -> usize {
            0
        }

        fn is_group(&self, node: &usize) -> Result<bool> {
            Ok(*node < self.groups.len())
        }

        fn child(&self, group: &usize, name: &str) -> Result<Option<Edge<usize>>> {
            Ok(self.groups[*group].iter().find(|(n, _)| *n == name).map(|(_, e)| e.clone()))
        }

        fn context(&self) -> &LinkContext {
            &self.context
        }
    }

    fn toy() -> Toy {
        // 0 is the root, 1 is /a, 99 is a leaf under /a.
        Toy {
            groups: vec![
                vec![
                    ("a", Edge::Node(1)),
                    ("loop", Edge::Soft("/loop".into())),
                    ("up", Edge::Soft("/a/d".into())),
                    ("rel", Edge::Soft("a/d".into())),
                    ("ping", Edge::Soft("/pong".into())),
                    ("pong", Edge::Soft("ping".into())),
                ],
                vec![("d", Edge::Node(99)), ("self", Edge::Soft("self".into()))],
            ],
            context: LinkContext::detached(ReadOptions::default()),
        }
    }

    fn resolve(g: &Toy, path: &str) -> Result<Option<usize>> {
        let mut visited = VisitedLinks::new(32);
        let target = resolve_path(g, &0, "/", path, &mut visited)?;
        assert_eq!(visited.depth(), 0);
        Ok(target.local())
    }

    #[test]
    fn test_hard_and_soft() -> Result<()> {
        let g = toy();
        assert_eq!(resolve(&g, "/a/d")?, Some(99));
        assert_eq!(resolve(&g, "a//d/")?, Some(99));
        assert_eq!(resolve(&g, "/up")?, Some(99));
        assert_eq!(resolve(&g, "/rel")?, Some(99));
        assert_eq!(resolve(&g, "/")?, Some(0));
        Ok(())
    }

    #[test]
    fn test_missing_and_not_group() {
        let g = toy();
        assert!(matches!(resolve(&g, "/nope"), Err(Error::NameNotFound(p)) if p == "/nope"));
        assert!(matches!(resolve(&g, "/a/d/x"), Err(Error::NotAGroup(p)) if p == "/a/d"));
    }

    #[test]
    fn test_cycles() {
        let g = toy();
        assert!(matches!(resolve(&g, "/loop"), Err(Error::LinkCycle(_))));
        assert!(matches!(resolve(&g, "/a/self"), Err(Error::LinkCycle(_))));
        assert!(matches!(resolve(&g, "/ping"), Err(Error::LinkCycle(_))));
    }

    #[test]
    fn test_depth_limit() {
        let g = toy();
        let mut visited = VisitedLinks::new(0);
        assert!(matches!(
            resolve_path(&g, &0, "/", "/up", &mut visited),
            Err(Error::LinkCycle(_))
        ));
    }

    #[test]
    fn test_missing_external() {
        let files = ExternalFiles::new();
        let err = files
            .open(None, Path::new("definitely/not/here.hcf"), &ReadOptions::default())
            .err();
        assert!(matches!(err, Some(Error::ExternalUnavailable { .. })));
        assert!(files.is_empty());
    }

    #[test]
    fn test_paths() {
        assert_eq!(join_path("", "a"), "/a");
        assert_eq!(join_path("/a/", "b"), "/a/b");
        assert_eq!(split_path("/a/./b//c").collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }
}
