//! Producer-side snapshot trees
//!
//! Every producer module emits a [`SnapshotTree`] each cycle: a full
//! description of its subtree at that instant, not a delta. The
//! reconciliation engine diffs consecutive snapshots by node path, so the
//! path of every node must be unique within one tree.
//!
//! # Arena layout
//!
//! Nodes live in a flat arena and refer to each other by index. A child
//! stores its parent as a back-index rather than an owning reference, which
//! keeps the tree trivially cloneable and sidesteps cyclic ownership when
//! walking or rebuilding it.
//!
//! # Path identity
//!
//! A node's path is the chain of ancestor names joined by
//! [`PATH_SEPARATOR`]. Inserting a node whose computed path already exists
//! in the tree is rejected with [`BridgeError::DuplicatePath`]; there is no
//! silent shadowing.

use crate::error::{BridgeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Separator between path segments, both in snapshots and in the merged tree
pub const PATH_SEPARATOR: &str = "/";

/// Quality code attached to snapshot values and merged nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Quality {
    /// Value is trustworthy
    #[default]
    Good,
    /// Value is known to be wrong or stale
    Bad,
    /// Value is usable but suspect
    Warning,
}

impl Quality {
    /// Parse a quality code from its textual or numeric form
    ///
    /// Unknown codes map to [`Quality::Warning`] rather than failing, so a
    /// producer with a sloppy quality column degrades instead of erroring.
    pub fn from_code(code: &str) -> Self {
        match code.to_ascii_lowercase().as_str() {
            "good" | "1" => Quality::Good,
            "bad" | "2" => Quality::Bad,
            "warning" | "3" => Quality::Warning,
            _ => Quality::Warning,
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Quality::Good => write!(f, "Good"),
            Quality::Bad => write!(f, "Bad"),
            Quality::Warning => write!(f, "Warning"),
        }
    }
}

/// Index of a node within its [`SnapshotTree`] arena
pub type NodeIdx = usize;

/// Whether a snapshot node is a grouping folder or carries a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotKind {
    /// Grouping node with no payload
    Folder,
    /// Leaf node with a scalar payload
    Variable,
}

/// One element of a snapshot tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotNode {
    /// Local segment identifier, unique among siblings
    pub name: String,
    /// Scalar payload; present exactly for [`SnapshotKind::Variable`]
    pub value: Option<String>,
    /// When the value was sampled
    pub timestamp: DateTime<Utc>,
    /// Quality of the sampled value
    pub quality: Quality,
    /// Back-index of the owning node; `None` for roots
    pub parent: Option<NodeIdx>,
    /// Child indices; insertion order carries no meaning
    pub children: Vec<NodeIdx>,
    /// Folder or variable
    pub kind: SnapshotKind,
    /// Cached ancestor-chain path, derived at insertion
    path: String,
}

impl SnapshotNode {
    /// The ancestor chain of names joined by [`PATH_SEPARATOR`]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// True if this node has children
    pub fn is_parent(&self) -> bool {
        !self.children.is_empty()
    }
}

/// An immutable-at-the-leaf tree a producer emits each cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotTree {
    nodes: Vec<SnapshotNode>,
    roots: Vec<NodeIdx>,
    #[serde(skip)]
    seen_paths: HashSet<String>,
}

impl SnapshotTree {
    /// Create an empty snapshot tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes in the tree
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the tree holds no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Root indices of the tree
    pub fn roots(&self) -> &[NodeIdx] {
        &self.roots
    }

    /// Access a node by index
    pub fn node(&self, idx: NodeIdx) -> &SnapshotNode {
        &self.nodes[idx]
    }

    /// Add a folder node under `parent` (or as a root when `None`)
    pub fn add_folder(&mut self, parent: Option<NodeIdx>, name: impl Into<String>) -> Result<NodeIdx> {
        self.insert(parent, name.into(), None, Utc::now(), Quality::Good)
    }

    /// Add a variable node under `parent` (or as a root when `None`)
    pub fn add_variable(
        &mut self,
        parent: Option<NodeIdx>,
        name: impl Into<String>,
        value: impl Into<String>,
        timestamp: DateTime<Utc>,
        quality: Quality,
    ) -> Result<NodeIdx> {
        self.insert(parent, name.into(), Some(value.into()), timestamp, quality)
    }

    fn insert(
        &mut self,
        parent: Option<NodeIdx>,
        name: String,
        value: Option<String>,
        timestamp: DateTime<Utc>,
        quality: Quality,
    ) -> Result<NodeIdx> {
        let path = match parent {
            Some(p) => format!("{}{}{}", self.nodes[p].path, PATH_SEPARATOR, name),
            None => name.clone(),
        };

        if !self.seen_paths.insert(path.clone()) {
            return Err(BridgeError::DuplicatePath(path));
        }

        let kind = if value.is_some() {
            SnapshotKind::Variable
        } else {
            SnapshotKind::Folder
        };

        let idx = self.nodes.len();
        self.nodes.push(SnapshotNode {
            name,
            value,
            timestamp,
            quality,
            parent,
            children: Vec::new(),
            kind,
            path,
        });

        match parent {
            Some(p) => self.nodes[p].children.push(idx),
            None => self.roots.push(idx),
        }

        Ok(idx)
    }

    /// Breadth-first walk over the whole tree, parents before children
    ///
    /// This is the canonical traversal order for reconciliation: a folder is
    /// always visited (and therefore materialized) before any node that
    /// needs it as a parent.
    pub fn breadth_first(&self) -> BreadthFirstIter<'_> {
        BreadthFirstIter {
            tree: self,
            queue: self.roots.iter().copied().collect(),
        }
    }
}

/// Iterator produced by [`SnapshotTree::breadth_first`]
pub struct BreadthFirstIter<'a> {
    tree: &'a SnapshotTree,
    queue: VecDeque<NodeIdx>,
}

impl<'a> Iterator for BreadthFirstIter<'a> {
    type Item = (NodeIdx, &'a SnapshotNode);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.queue.pop_front()?;
        let node = &self.tree.nodes[idx];
        self.queue.extend(node.children.iter().copied());
        Some((idx, node))
    }
}
