//! Builders for snapshot trees and envelopes
//!
//! Integration tests describe trees by slash-separated paths; the builder
//! creates intermediate folders on demand so a test only names the leaves
//! it cares about.

use chrono::Utc;
use nodebridge_rs::mailbox::{ActionKind, Envelope};
use nodebridge_rs::snapshot::{NodeIdx, Quality, SnapshotTree};
use std::collections::HashMap;

/// Builds a [`SnapshotTree`] from slash-separated paths
#[derive(Default)]
pub struct TreeBuilder {
    tree: SnapshotTree,
    folders: HashMap<String, NodeIdx>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_folder(&mut self, path: &str) -> NodeIdx {
        if let Some(idx) = self.folders.get(path) {
            return *idx;
        }
        let (parent, name) = match path.rfind('/') {
            Some(pos) => (Some(self.ensure_folder(&path[..pos])), &path[pos + 1..]),
            None => (None, path),
        };
        let idx = self
            .tree
            .add_folder(parent, name)
            .unwrap_or_else(|e| panic!("folder {path}: {e}"));
        self.folders.insert(path.to_string(), idx);
        idx
    }

    /// Add a folder chain, creating missing ancestors
    pub fn folder(mut self, path: &str) -> Self {
        self.ensure_folder(path);
        self
    }

    /// Add a leaf with [`Quality::Good`], creating missing ancestors
    pub fn leaf(self, path: &str, value: &str) -> Self {
        self.leaf_with_quality(path, value, Quality::Good)
    }

    /// Add a leaf with an explicit quality, creating missing ancestors
    pub fn leaf_with_quality(mut self, path: &str, value: &str, quality: Quality) -> Self {
        let (parent, name) = match path.rfind('/') {
            Some(pos) => (Some(self.ensure_folder(&path[..pos])), &path[pos + 1..]),
            None => (None, path),
        };
        self.tree
            .add_variable(parent, name, value, Utc::now(), quality)
            .unwrap_or_else(|e| panic!("leaf {path}: {e}"));
        self
    }

    pub fn build(self) -> SnapshotTree {
        self.tree
    }
}

/// Envelope with an explicit action over a built tree
pub fn envelope(tree: SnapshotTree, space: &str, action: ActionKind) -> Envelope {
    Envelope::new(tree, space, Quality::Good, action)
}
