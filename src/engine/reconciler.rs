//! Snapshot reconciliation against the live node space
//!
//! The [`ReconciliationEngine`] owns the master list of [`IndexedNode`]s and
//! the only handle onto the [`NodeSpace`] adapter. Every envelope drained
//! from the mailbox is applied in two phases:
//!
//! 1. The snapshot is merged into the master list (matching nodes update in
//!    place, new nodes are appended, vanished nodes are dropped).
//! 2. An attribute-sync pass materializes the master list into the live
//!    node space and a distinction pass removes live nodes that no longer
//!    have a backing entity.
//!
//! Adapter failures during phase 2 are logged per node and never abort the
//! pass; the next structural envelope retries the failed nodes because
//! their entities are still in the master list.

use crate::engine::node::{IndexedNode, NodeId, NodeKind, ScalarValue, SCADA_ROOT_PATH};
use crate::engine::nodespace::{DataType, FolderHandle, NodeSpace, ValueRank, VariableHandle};
use crate::error::{BridgeError, Result};
use crate::mailbox::{ActionKind, Envelope};
use crate::snapshot::{SnapshotNode, SnapshotTree};
use std::collections::{HashMap, HashSet};

/// Merge a sampled snapshot node into an existing entity
fn apply_sample(entity: &mut IndexedNode, node: &SnapshotNode) {
    entity.update_value(node.value.clone(), node.timestamp);
    if entity.quality != node.quality {
        entity.quality = node.quality;
        entity.dirty = true;
    }
}

/// Declared data type for a leaf, derived from its current value
fn data_type_for(entity: &IndexedNode) -> DataType {
    match entity.scalar_value() {
        Some(ScalarValue::Int(_)) => DataType::Int64,
        Some(ScalarValue::Text(_)) => DataType::Text,
        _ => DataType::Double,
    }
}

/// Applies envelopes to the master node list and the live node space
pub struct ReconciliationEngine {
    node_space: Box<dyn NodeSpace>,
    /// Master list; the single source of truth the live space is synced from
    entities: Vec<IndexedNode>,
    /// Live folder handles by full path
    folders: HashMap<String, FolderHandle>,
    /// Live variable handles by entity id
    leaves: HashMap<NodeId, VariableHandle>,
    /// Registered space names and their channel entity ids
    spaces: HashMap<String, NodeId>,
    next_id: u32,
    root_display_name: String,
    bootstrapped: bool,
}

impl ReconciliationEngine {
    /// Create an engine over a node-space adapter
    pub fn new(node_space: Box<dyn NodeSpace>, root_display_name: impl Into<String>) -> Self {
        Self {
            node_space,
            entities: Vec::new(),
            folders: HashMap::new(),
            leaves: HashMap::new(),
            spaces: HashMap::new(),
            next_id: 0,
            root_display_name: root_display_name.into(),
            bootstrapped: false,
        }
    }

    fn next_id(&mut self) -> NodeId {
        self.next_id += 1;
        NodeId(self.next_id)
    }

    /// Materialize the synthetic root node; must run once before `apply`
    pub fn bootstrap(&mut self) -> Result<()> {
        if self.bootstrapped {
            return Err(BridgeError::Lifecycle(
                "engine already bootstrapped".to_string(),
            ));
        }
        let id = self.next_id();
        let display_name = self.root_display_name.clone();
        self.entities.push(IndexedNode::scada_root(id, display_name));
        self.sync_attributes();
        self.bootstrapped = true;
        Ok(())
    }

    /// Apply one envelope drained from the mailbox
    pub fn apply(&mut self, envelope: Envelope) -> Result<()> {
        if !self.bootstrapped {
            return Err(BridgeError::Lifecycle(
                "engine not bootstrapped".to_string(),
            ));
        }

        let space = envelope.space_name.as_str();
        let registered = self.spaces.contains_key(space);
        // Auto resolves by registration state; Update on an unregistered
        // space self-heals as an Add instead of dropping the snapshot.
        let action = match envelope.action {
            ActionKind::Auto | ActionKind::Update if !registered => ActionKind::Add,
            ActionKind::Auto => ActionKind::Update,
            other => other,
        };
        tracing::debug!(
            space,
            ?action,
            nodes = envelope.entities.len(),
            "Applying envelope"
        );

        let structural = match action {
            ActionKind::Add => {
                self.register_channel(space);
                self.add_all(space, &envelope.entities);
                true
            }
            ActionKind::Update => {
                self.update_from(space, &envelope.entities);
                true
            }
            ActionKind::UpdateValues => {
                self.update_values(space, &envelope.entities);
                false
            }
            ActionKind::Delete => {
                if registered {
                    self.remove_space(space);
                } else {
                    tracing::debug!(space, "Delete for unregistered space ignored");
                }
                true
            }
            ActionKind::Replace => {
                if registered {
                    self.remove_space(space);
                }
                self.register_channel(space);
                self.add_all(space, &envelope.entities);
                true
            }
            ActionKind::Auto => unreachable!("Auto is resolved above"),
        };

        if structural {
            self.sync_attributes();
            self.remove_distinctions();
        }
        Ok(())
    }

    /// Register a channel entity for a space name, if not already present
    fn register_channel(&mut self, space: &str) {
        if self.spaces.contains_key(space) {
            return;
        }
        let id = self.next_id();
        self.spaces.insert(space.to_string(), id);
        self.entities.push(IndexedNode::channel(space, id));
        tracing::info!(space, "Registered space");
    }

    /// Upsert every snapshot node into the master list
    fn add_all(&mut self, space: &str, tree: &SnapshotTree) {
        for (_, snap) in tree.breadth_first() {
            let existing = self.entities.iter().position(|e| {
                e.space_name == space
                    && e.kind != NodeKind::Channel
                    && e.display_path() == snap.path()
            });
            match existing {
                Some(i) => apply_sample(&mut self.entities[i], snap),
                None => {
                    let node = self.entity_from(space, snap);
                    self.entities.push(node);
                }
            }
        }
    }

    /// Diff the snapshot against the space's current entities
    ///
    /// Matching entities update in place, unmatched snapshot nodes are
    /// appended, and entities absent from the snapshot are dropped from the
    /// master list (the distinction pass then removes their live nodes).
    fn update_from(&mut self, space: &str, tree: &SnapshotTree) {
        let mut unmatched: HashMap<String, usize> = self
            .entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.space_name == space && e.kind != NodeKind::Channel)
            .map(|(i, e)| (e.display_path().to_string(), i))
            .collect();

        for (_, snap) in tree.breadth_first() {
            match unmatched.remove(snap.path()) {
                Some(i) => apply_sample(&mut self.entities[i], snap),
                None => {
                    let node = self.entity_from(space, snap);
                    self.entities.push(node);
                }
            }
        }

        if !unmatched.is_empty() {
            let stale: HashSet<usize> = unmatched.into_values().collect();
            let mut i = 0;
            self.entities.retain(|_| {
                let keep = !stale.contains(&i);
                i += 1;
                keep
            });
        }
    }

    /// Value-only fast path; never creates or removes nodes
    fn update_values(&mut self, space: &str, tree: &SnapshotTree) {
        for (_, snap) in tree.breadth_first() {
            if snap.value.is_none() {
                continue;
            }
            let entity = self
                .entities
                .iter_mut()
                .find(|e| e.is_terminal && e.space_name == space && e.display_path() == snap.path());
            let Some(entity) = entity else {
                tracing::debug!(space, path = snap.path(), "Value for unknown node skipped");
                continue;
            };
            apply_sample(entity, snap);
            if !entity.dirty {
                continue;
            }
            entity.dirty = false;
            let id = entity.id;
            let timestamp = entity.timestamp;
            let quality = entity.quality;
            let value = entity.scalar_value();
            if let (Some(handle), Some(value)) = (self.leaves.get(&id).copied(), value) {
                if let Err(e) =
                    self.node_space.update_variable(handle, &value, timestamp, quality)
                {
                    tracing::warn!(space, id = %id, "Value push failed: {}", e);
                }
            }
        }
    }

    fn entity_from(&mut self, space: &str, snap: &SnapshotNode) -> IndexedNode {
        let id = self.next_id();
        if snap.value.is_some() {
            IndexedNode::leaf(space, snap, id)
        } else {
            IndexedNode::folder(space, snap, id)
        }
    }

    /// Drop a space's entities from the master list and unregister it
    fn remove_space(&mut self, space: &str) {
        self.spaces.remove(space);
        self.entities.retain(|e| e.space_name != space);
        tracing::info!(space, "Removed space");
    }

    /// Materialize every entity that has no live node yet and push pending
    /// attribute changes for those that do
    fn sync_attributes(&mut self) {
        for i in 0..self.entities.len() {
            let entity = self.entities[i].clone();
            match self.sync_entity(&entity) {
                Ok(()) => self.entities[i].dirty = false,
                Err(e) => {
                    tracing::warn!(path = %entity.path, "Attribute sync failed: {}", e);
                }
            }
        }
    }

    fn sync_entity(&mut self, entity: &IndexedNode) -> Result<()> {
        if entity.is_terminal {
            match self.leaves.get(&entity.id).copied() {
                Some(handle) => {
                    if entity.dirty {
                        if let Some(value) = entity.scalar_value() {
                            self.node_space.update_variable(
                                handle,
                                &value,
                                entity.timestamp,
                                entity.quality,
                            )?;
                        }
                        self.node_space.clear_change_masks(handle.into())?;
                    }
                }
                None => {
                    let parent = self.resolve_parent_folder(&entity.parent_path)?;
                    let handle = self.node_space.create_variable(
                        parent,
                        &entity.path,
                        &entity.display_name,
                        data_type_for(entity),
                        ValueRank::Scalar,
                    )?;
                    if let Some(value) = entity.scalar_value() {
                        self.node_space.update_variable(
                            handle,
                            &value,
                            entity.timestamp,
                            entity.quality,
                        )?;
                    }
                    self.leaves.insert(entity.id, handle);
                }
            }
        } else {
            match self.folders.get(&entity.path).copied() {
                Some(handle) => {
                    if entity.dirty {
                        self.node_space.rename_node(handle.into(), &entity.display_name)?;
                        self.node_space.clear_change_masks(handle.into())?;
                    }
                }
                None => {
                    let parent = if entity.parent_path.is_empty() {
                        None
                    } else {
                        Some(self.resolve_parent_folder(&entity.parent_path)?)
                    };
                    let handle =
                        self.node_space
                            .create_folder(parent, &entity.path, &entity.display_name)?;
                    self.node_space.clear_change_masks(handle.into())?;
                    self.folders.insert(entity.path.clone(), handle);
                }
            }
        }
        Ok(())
    }

    /// Resolve (materializing on demand) the live folder for a parent path
    ///
    /// Probe order: live folder index, then the master list (the entity and
    /// its ancestors are materialized recursively), then the bare space
    /// registry as a last resort.
    fn resolve_parent_folder(&mut self, parent_path: &str) -> Result<FolderHandle> {
        if let Some(handle) = self.folders.get(parent_path) {
            return Ok(*handle);
        }

        let entity = self
            .entities
            .iter()
            .find(|e| !e.is_terminal && e.path == parent_path)
            .cloned();
        if let Some(entity) = entity {
            let parent = if entity.parent_path.is_empty() {
                None
            } else {
                Some(self.resolve_parent_folder(&entity.parent_path)?)
            };
            let handle =
                self.node_space
                    .create_folder(parent, &entity.path, &entity.display_name)?;
            self.node_space.clear_change_masks(handle.into())?;
            self.folders.insert(entity.path.clone(), handle);
            if let Some(e) = self.entities.iter_mut().find(|e| e.path == parent_path) {
                e.dirty = false;
            }
            return Ok(handle);
        }

        if self.spaces.contains_key(parent_path) {
            let root = self.resolve_parent_folder(SCADA_ROOT_PATH)?;
            let handle = self
                .node_space
                .create_folder(Some(root), parent_path, parent_path)?;
            self.folders.insert(parent_path.to_string(), handle);
            return Ok(handle);
        }

        Err(BridgeError::node_space(
            "resolve_parent",
            parent_path,
            "no live folder, entity or registered space matches",
        ))
    }

    /// Remove live nodes whose backing entity is gone from the master list
    fn remove_distinctions(&mut self) {
        let terminal_ids: HashSet<NodeId> = self
            .entities
            .iter()
            .filter(|e| e.is_terminal)
            .map(|e| e.id)
            .collect();
        let folder_paths: HashSet<&str> = self
            .entities
            .iter()
            .filter(|e| !e.is_terminal)
            .map(|e| e.path.as_str())
            .collect();

        let stale_leaves: Vec<(NodeId, VariableHandle)> = self
            .leaves
            .iter()
            .filter(|(id, _)| !terminal_ids.contains(id))
            .map(|(id, h)| (*id, *h))
            .collect();
        for (id, handle) in stale_leaves {
            if let Err(e) = self.node_space.remove_node(handle.into()) {
                tracing::warn!(id = %id, "Failed to remove live variable: {}", e);
            }
            self.leaves.remove(&id);
        }

        let stale_folders: Vec<(String, FolderHandle)> = self
            .folders
            .iter()
            .filter(|(path, _)| !folder_paths.contains(path.as_str()))
            .map(|(path, h)| (path.clone(), *h))
            .collect();
        for (path, handle) in stale_folders {
            if let Err(e) = self.node_space.remove_node(handle.into()) {
                tracing::warn!(path, "Failed to remove live folder: {}", e);
            }
            self.folders.remove(&path);
        }
    }

    /// Registered space names, sorted
    pub fn spaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.spaces.keys().cloned().collect();
        names.sort();
        names
    }

    /// True if the space name has a registered channel
    pub fn is_registered(&self, space: &str) -> bool {
        self.spaces.contains_key(space)
    }

    /// The full master list, in insertion order
    pub fn nodes(&self) -> &[IndexedNode] {
        &self.entities
    }

    /// Look up one entity by its stable id
    pub fn node_by_id(&self, id: NodeId) -> Option<&IndexedNode> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Remove a registered space and its whole subtree
    ///
    /// Unlike a [`ActionKind::Delete`] envelope this is a control-plane call
    /// and an unknown space name is a caller error.
    pub fn delete_space(&mut self, space: &str) -> Result<()> {
        if !self.spaces.contains_key(space) {
            return Err(BridgeError::UnknownSpace(space.to_string()));
        }
        self.remove_space(space);
        self.sync_attributes();
        self.remove_distinctions();
        Ok(())
    }
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("entities", &self.entities.len())
            .field("spaces", &self.spaces.keys())
            .field("bootstrapped", &self.bootstrapped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::nodespace::{MockNodeSpace, NodeSpaceCall, RecordingNodeSpace};
    use crate::snapshot::Quality;
    use chrono::Utc;

    fn engine_with_recorder() -> (ReconciliationEngine, RecordingNodeSpace) {
        let space = RecordingNodeSpace::new();
        let mut engine = ReconciliationEngine::new(Box::new(space.clone()), "Root");
        engine.bootstrap().unwrap();
        (engine, space)
    }

    fn two_sensor_tree(v1: &str, v2: &str) -> SnapshotTree {
        let mut tree = SnapshotTree::new();
        let temp = tree.add_folder(None, "temp").unwrap();
        tree.add_variable(Some(temp), "sensor1", v1, Utc::now(), Quality::Good)
            .unwrap();
        tree.add_variable(Some(temp), "sensor2", v2, Utc::now(), Quality::Good)
            .unwrap();
        tree
    }

    #[test]
    fn test_bootstrap_creates_root_once() {
        let (mut engine, space) = engine_with_recorder();
        assert_eq!(space.folder_paths(), vec!["root"]);

        let err = engine.bootstrap().unwrap_err();
        assert!(matches!(err, BridgeError::Lifecycle(_)));
    }

    #[test]
    fn test_apply_before_bootstrap_is_a_lifecycle_error() {
        let mut engine =
            ReconciliationEngine::new(Box::new(RecordingNodeSpace::new()), "Root");
        let err = engine
            .apply(Envelope::auto(SnapshotTree::new(), "line1"))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Lifecycle(_)));
    }

    #[test]
    fn test_auto_registers_then_materializes() {
        let (mut engine, space) = engine_with_recorder();
        engine
            .apply(Envelope::auto(two_sensor_tree("21.5", "19.0"), "line1"))
            .unwrap();

        assert!(engine.is_registered("line1"));
        assert_eq!(space.folder_paths(), vec!["line1", "line1/temp", "root"]);
        let sensor1 = space.variable("line1/temp/sensor1").unwrap();
        assert_eq!(sensor1.value, Some(ScalarValue::Float(21.5)));
    }

    #[test]
    fn test_update_diffs_against_current_state() {
        let (mut engine, space) = engine_with_recorder();
        engine
            .apply(Envelope::auto(two_sensor_tree("21.5", "19.0"), "line1"))
            .unwrap();

        // Second generation: sensor1 changed, sensor2 gone, sensor3 new
        let mut next = SnapshotTree::new();
        let temp = next.add_folder(None, "temp").unwrap();
        next.add_variable(Some(temp), "sensor1", "22.0", Utc::now(), Quality::Good)
            .unwrap();
        next.add_variable(Some(temp), "sensor3", "5", Utc::now(), Quality::Good)
            .unwrap();
        engine.apply(Envelope::auto(next, "line1")).unwrap();

        let paths: Vec<&str> = engine.nodes().iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"line1/temp/sensor1"));
        assert!(paths.contains(&"line1/temp/sensor3"));
        assert!(!paths.contains(&"line1/temp/sensor2"));

        assert_eq!(
            space.variable("line1/temp/sensor1").unwrap().value,
            Some(ScalarValue::Float(22.0))
        );
        assert!(space.variable("line1/temp/sensor2").is_none());
        assert!(space.variable("line1/temp/sensor3").is_some());
    }

    #[test]
    fn test_update_preserves_node_ids_of_survivors() {
        let (mut engine, _space) = engine_with_recorder();
        engine
            .apply(Envelope::auto(two_sensor_tree("21.5", "19.0"), "line1"))
            .unwrap();
        let id_before = engine
            .nodes()
            .iter()
            .find(|e| e.path == "line1/temp/sensor1")
            .unwrap()
            .id;

        engine
            .apply(Envelope::auto(two_sensor_tree("22.0", "19.0"), "line1"))
            .unwrap();
        let id_after = engine
            .nodes()
            .iter()
            .find(|e| e.path == "line1/temp/sensor1")
            .unwrap()
            .id;
        assert_eq!(id_before, id_after);
    }

    #[test]
    fn test_add_is_idempotent() {
        let (mut engine, space) = engine_with_recorder();
        let envelope = |tree| Envelope::new(tree, "line1", Quality::Good, ActionKind::Add);

        engine.apply(envelope(two_sensor_tree("21.5", "19.0"))).unwrap();
        let (folders, variables) = space.live_counts();
        engine.apply(envelope(two_sensor_tree("21.5", "19.0"))).unwrap();
        assert_eq!(space.live_counts(), (folders, variables));

        let creates = space
            .calls()
            .iter()
            .filter(|c| {
                matches!(c, NodeSpaceCall::CreateVariable { path, .. } if path == "line1/temp/sensor1")
            })
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn test_update_values_is_never_structural() {
        let (mut engine, space) = engine_with_recorder();
        engine
            .apply(Envelope::auto(two_sensor_tree("21.5", "19.0"), "line1"))
            .unwrap();
        space.clear_calls();

        // sensor9 does not exist and must not be created by a value update
        let mut tree = SnapshotTree::new();
        let temp = tree.add_folder(None, "temp").unwrap();
        tree.add_variable(Some(temp), "sensor1", "30.0", Utc::now(), Quality::Good)
            .unwrap();
        tree.add_variable(Some(temp), "sensor9", "1", Utc::now(), Quality::Good)
            .unwrap();
        engine
            .apply(Envelope::new(tree, "line1", Quality::Good, ActionKind::UpdateValues))
            .unwrap();

        assert!(space.variable("line1/temp/sensor9").is_none());
        assert_eq!(
            space.variable("line1/temp/sensor1").unwrap().value,
            Some(ScalarValue::Float(30.0))
        );
        for call in space.calls() {
            assert!(
                matches!(call, NodeSpaceCall::UpdateVariable { .. }),
                "unexpected structural call: {call:?}"
            );
        }
    }

    #[test]
    fn test_replace_rebuilds_the_subtree() {
        let (mut engine, space) = engine_with_recorder();
        engine
            .apply(Envelope::auto(two_sensor_tree("21.5", "19.0"), "line1"))
            .unwrap();

        let mut tree = SnapshotTree::new();
        let pressure = tree.add_folder(None, "pressure").unwrap();
        tree.add_variable(Some(pressure), "gauge", "1.2", Utc::now(), Quality::Good)
            .unwrap();
        engine
            .apply(Envelope::new(tree, "line1", Quality::Good, ActionKind::Replace))
            .unwrap();

        assert!(space.variable("line1/temp/sensor1").is_none());
        assert!(space.variable("line1/pressure/gauge").is_some());
        let paths: Vec<&str> = engine.nodes().iter().map(|e| e.path.as_str()).collect();
        assert!(!paths.contains(&"line1/temp"));
        assert!(paths.contains(&"line1/pressure/gauge"));
    }

    #[test]
    fn test_delete_envelope_is_silent_for_unknown_space() {
        let (mut engine, _space) = engine_with_recorder();
        engine
            .apply(Envelope::new(
                SnapshotTree::new(),
                "ghost",
                Quality::Good,
                ActionKind::Delete,
            ))
            .unwrap();
        assert!(!engine.is_registered("ghost"));
    }

    #[test]
    fn test_delete_space_control_plane_errors_on_unknown() {
        let (mut engine, space) = engine_with_recorder();
        let err = engine.delete_space("ghost").unwrap_err();
        assert!(matches!(err, BridgeError::UnknownSpace(_)));

        engine
            .apply(Envelope::auto(two_sensor_tree("1", "2"), "line1"))
            .unwrap();
        engine.delete_space("line1").unwrap();
        assert!(!engine.is_registered("line1"));
        assert_eq!(space.folder_paths(), vec!["root"]);
        assert_eq!(space.live_counts(), (1, 0));
    }

    #[test]
    fn test_adapter_failure_keeps_entities_and_pass_continues() {
        let mut mock = MockNodeSpace::new();
        mock.expect_create_folder()
            .returning(|_, _, _| Err(BridgeError::node_space("create_folder", "x", "down")));
        mock.expect_create_variable()
            .returning(|_, _, _, _, _| {
                Err(BridgeError::node_space("create_variable", "x", "down"))
            });
        mock.expect_clear_change_masks().returning(|_| Ok(()));
        mock.expect_remove_node().returning(|_| Ok(()));

        let mut engine = ReconciliationEngine::new(Box::new(mock), "Root");
        engine.bootstrap().unwrap();
        engine
            .apply(Envelope::auto(two_sensor_tree("1", "2"), "line1"))
            .unwrap();

        // Nothing materialized, but the master list keeps every entity for
        // the next pass to retry
        let paths: Vec<&str> = engine.nodes().iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"line1/temp/sensor1"));
        assert!(paths.contains(&"line1/temp/sensor2"));
    }

    #[test]
    fn test_quality_change_marks_and_pushes() {
        let (mut engine, space) = engine_with_recorder();
        engine
            .apply(Envelope::auto(two_sensor_tree("21.5", "19.0"), "line1"))
            .unwrap();

        let mut tree = SnapshotTree::new();
        let temp = tree.add_folder(None, "temp").unwrap();
        tree.add_variable(Some(temp), "sensor1", "21.5", Utc::now(), Quality::Bad)
            .unwrap();
        tree.add_variable(Some(temp), "sensor2", "19.0", Utc::now(), Quality::Good)
            .unwrap();
        engine.apply(Envelope::auto(tree, "line1")).unwrap();

        assert_eq!(space.variable("line1/temp/sensor1").unwrap().quality, Quality::Bad);
    }
}
