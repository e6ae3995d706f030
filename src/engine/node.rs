//! Persistent indexed nodes of the merged tree
//!
//! A [`IndexedNode`] is the reconciliation engine's long-lived
//! representation of one node, surviving across snapshot generations. It is
//! distinct from the transient [`SnapshotNode`](crate::snapshot::SnapshotNode)
//! a producer emits: snapshot nodes are identified by their path within one
//! emission, indexed nodes by a globally unique path (space name plus
//! snapshot path) and a stable numeric id that doubles as the protocol node
//! identifier.

use crate::snapshot::{Quality, SnapshotNode, PATH_SEPARATOR};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Path of the synthetic root node
pub const SCADA_ROOT_PATH: &str = "root";

/// Leaf segment under which a folder's own value is materialized
pub const VALUE_SUFFIX: &str = "value";

/// Stable numeric identifier of an indexed node
///
/// Assigned once at creation by the engine, monotonically increasing,
/// never reused. Exposed to protocol clients as the node number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an indexed node in the merged hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// The synthetic root; exactly one exists
    Scada,
    /// A subtree root, one per registered space name
    Channel,
    /// An intermediate folder inside a subtree
    Device,
    /// A leaf carrying a value
    Measure,
}

impl NodeKind {
    /// True only for [`NodeKind::Measure`]
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeKind::Measure)
    }
}

/// A scalar payload after numeric coercion
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// Integral value
    Int(i64),
    /// Floating-point value
    Float(f64),
    /// Anything that did not parse as a number
    Text(String),
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::Text(v) => write!(f, "{v}"),
        }
    }
}

/// Coerce an incoming string payload to its tightest scalar form
///
/// Integral first, float second, verbatim text as the fallback.
pub fn coerce_scalar(raw: &str) -> ScalarValue {
    if let Ok(v) = raw.parse::<i64>() {
        ScalarValue::Int(v)
    } else if let Ok(v) = raw.parse::<f64>() {
        ScalarValue::Float(v)
    } else {
        ScalarValue::Text(raw.to_string())
    }
}

/// One node of the merged tree, as tracked by the reconciliation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedNode {
    /// Globally unique, stable numeric identifier
    pub id: NodeId,
    /// Space name + separator + snapshot path; the diffing key
    pub path: String,
    /// Path of the owning folder; empty only for the synthetic root
    pub parent_path: String,
    /// Position in the hierarchy
    pub kind: NodeKind,
    /// True only for [`NodeKind::Measure`]
    pub is_terminal: bool,
    /// Name shown to protocol clients
    pub display_name: String,
    /// Owning space name; empty for the synthetic root
    pub space_name: String,
    /// Current value; only meaningful for terminal nodes
    pub value: Option<String>,
    /// Timestamp of the current value
    pub timestamp: DateTime<Utc>,
    /// Quality of the current value
    pub quality: Quality,
    /// Set when the node diverged from its materialized form; cleared by
    /// the attribute-sync pass. Not part of the serialized shape.
    #[serde(skip)]
    pub dirty: bool,
}

impl IndexedNode {
    /// The synthetic root under which every channel hangs
    pub fn scada_root(id: NodeId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            path: SCADA_ROOT_PATH.to_string(),
            parent_path: String::new(),
            kind: NodeKind::Scada,
            is_terminal: false,
            display_name: display_name.into(),
            space_name: String::new(),
            value: None,
            timestamp: Utc::now(),
            quality: Quality::Good,
            dirty: true,
        }
    }

    /// Subtree root for a registered space name
    pub fn channel(space_name: impl Into<String>, id: NodeId) -> Self {
        let space_name = space_name.into();
        Self {
            id,
            path: space_name.clone(),
            parent_path: SCADA_ROOT_PATH.to_string(),
            kind: NodeKind::Channel,
            is_terminal: false,
            display_name: space_name.clone(),
            space_name,
            value: None,
            timestamp: Utc::now(),
            quality: Quality::Good,
            dirty: true,
        }
    }

    /// Intermediate folder built from a snapshot folder node
    pub fn folder(space_name: &str, node: &SnapshotNode, id: NodeId) -> Self {
        Self {
            id,
            path: Self::full_path(space_name, node.path()),
            parent_path: Self::parent_full_path(space_name, node.path()),
            kind: NodeKind::Device,
            is_terminal: false,
            display_name: node.name.clone(),
            space_name: space_name.to_string(),
            value: None,
            timestamp: node.timestamp,
            quality: node.quality,
            dirty: true,
        }
    }

    /// Leaf built from a snapshot variable node
    pub fn leaf(space_name: &str, node: &SnapshotNode, id: NodeId) -> Self {
        Self {
            id,
            path: Self::full_path(space_name, node.path()),
            parent_path: Self::parent_full_path(space_name, node.path()),
            kind: NodeKind::Measure,
            is_terminal: true,
            display_name: node.name.clone(),
            space_name: space_name.to_string(),
            value: node.value.clone(),
            timestamp: node.timestamp,
            quality: node.quality,
            dirty: true,
        }
    }

    fn full_path(space_name: &str, snapshot_path: &str) -> String {
        format!("{space_name}{PATH_SEPARATOR}{snapshot_path}")
    }

    fn parent_full_path(space_name: &str, snapshot_path: &str) -> String {
        match snapshot_path.rfind(PATH_SEPARATOR) {
            Some(pos) => Self::full_path(space_name, &snapshot_path[..pos]),
            None => space_name.to_string(),
        }
    }

    /// The snapshot-relative identity of this node, used when diffing
    ///
    /// Strips the owning space prefix and a trailing
    /// [`VALUE_SUFFIX`] segment, so that a folder's materialized value leaf
    /// compares equal to the folder node in the incoming snapshot.
    pub fn display_path(&self) -> &str {
        let mut path = self.path.as_str();
        if !self.space_name.is_empty() {
            if let Some(stripped) =
                path.strip_prefix(&format!("{}{}", self.space_name, PATH_SEPARATOR))
            {
                path = stripped;
            }
        }
        path.strip_suffix(&format!("{PATH_SEPARATOR}{VALUE_SUFFIX}"))
            .unwrap_or(path)
    }

    /// Coerced current value, if any
    pub fn scalar_value(&self) -> Option<ScalarValue> {
        self.value.as_deref().map(coerce_scalar)
    }

    /// Replace value and timestamp, marking the node dirty on change
    pub fn update_value(&mut self, value: Option<String>, timestamp: DateTime<Utc>) {
        if self.value != value || self.timestamp != timestamp {
            self.value = value;
            self.timestamp = timestamp;
            self.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotTree;

    fn leaf_node() -> IndexedNode {
        let mut tree = SnapshotTree::new();
        let temp = tree.add_folder(None, "temp").unwrap();
        let idx = tree
            .add_variable(Some(temp), "sensor1", "21.5", Utc::now(), Quality::Good)
            .unwrap();
        IndexedNode::leaf("line1", tree.node(idx), NodeId(7))
    }

    #[test]
    fn test_coerce_scalar() {
        assert_eq!(coerce_scalar("42"), ScalarValue::Int(42));
        assert_eq!(coerce_scalar("-17"), ScalarValue::Int(-17));
        assert_eq!(coerce_scalar("21.5"), ScalarValue::Float(21.5));
        assert_eq!(
            coerce_scalar("on fire"),
            ScalarValue::Text("on fire".to_string())
        );
    }

    #[test]
    fn test_leaf_paths() {
        let node = leaf_node();
        assert_eq!(node.path, "line1/temp/sensor1");
        assert_eq!(node.parent_path, "line1/temp");
        assert!(node.is_terminal);
        assert_eq!(node.kind, NodeKind::Measure);
    }

    #[test]
    fn test_root_level_snapshot_node_parents_to_channel() {
        let mut tree = SnapshotTree::new();
        let idx = tree
            .add_variable(None, "heartbeat", "1", Utc::now(), Quality::Good)
            .unwrap();
        let node = IndexedNode::leaf("line1", tree.node(idx), NodeId(3));
        assert_eq!(node.path, "line1/heartbeat");
        assert_eq!(node.parent_path, "line1");
    }

    #[test]
    fn test_display_path_strips_space_and_value_suffix() {
        let node = leaf_node();
        assert_eq!(node.display_path(), "temp/sensor1");

        let mut tree = SnapshotTree::new();
        let temp = tree.add_folder(None, "temp").unwrap();
        let idx = tree
            .add_variable(Some(temp), VALUE_SUFFIX, "5", Utc::now(), Quality::Good)
            .unwrap();
        let value_leaf = IndexedNode::leaf("line1", tree.node(idx), NodeId(9));
        // line1/temp/value compares as the folder path temp
        assert_eq!(value_leaf.display_path(), "temp");
    }

    #[test]
    fn test_update_value_marks_dirty_only_on_change() {
        let mut node = leaf_node();
        node.dirty = false;

        let ts = node.timestamp;
        node.update_value(node.value.clone(), ts);
        assert!(!node.dirty);

        node.update_value(Some("22.0".to_string()), ts);
        assert!(node.dirty);
        assert_eq!(node.value.as_deref(), Some("22.0"));
    }

    #[test]
    fn test_channel_shape() {
        let channel = IndexedNode::channel("line1", NodeId(2));
        assert_eq!(channel.path, "line1");
        assert_eq!(channel.parent_path, SCADA_ROOT_PATH);
        assert_eq!(channel.kind, NodeKind::Channel);
        assert!(!channel.is_terminal);
    }
}
