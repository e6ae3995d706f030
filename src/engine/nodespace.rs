//! Abstract interface to the live node-space server
//!
//! The reconciliation engine never talks to a protocol stack directly; it
//! drives every mutation through the [`NodeSpace`] trait. A production
//! adapter translates these calls into live protocol nodes; the bundled
//! [`RecordingNodeSpace`] keeps the same state in memory with an ordered
//! call log, which is what the demo binary and the test suite run against.
//!
//! # Write validation
//!
//! Variables are created with a declared [`DataType`]. When a protocol
//! client writes to a variable, the adapter is expected to run the value
//! through [`validate_write`] and reject type mismatches; the recording
//! implementation demonstrates the contract via
//! [`RecordingNodeSpace::client_write`].

use crate::engine::node::{coerce_scalar, ScalarValue};
use crate::error::{BridgeError, Result};
use crate::snapshot::Quality;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Handle onto a live folder node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FolderHandle(pub u64);

/// Handle onto a live variable node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableHandle(pub u64);

/// Handle onto any live node, for operations shared by both kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeHandle {
    /// A folder node
    Folder(FolderHandle),
    /// A variable node
    Variable(VariableHandle),
}

impl From<FolderHandle> for NodeHandle {
    fn from(handle: FolderHandle) -> Self {
        NodeHandle::Folder(handle)
    }
}

impl From<VariableHandle> for NodeHandle {
    fn from(handle: VariableHandle) -> Self {
        NodeHandle::Variable(handle)
    }
}

/// Declared data type of a live variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// 64-bit floating point; the default for measuring points
    Double,
    /// 64-bit integer
    Int64,
    /// Free-form text
    Text,
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Double => write!(f, "Double"),
            DataType::Int64 => write!(f, "Int64"),
            DataType::Text => write!(f, "Text"),
        }
    }
}

/// Shape of a live variable's value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRank {
    /// Single value
    Scalar,
    /// One-dimensional array
    OneDimension,
}

/// Validate a client-written raw value against a declared data type
///
/// Returns the coerced scalar on success. This is the engine-level write
/// validator adapters must invoke from their write callbacks.
pub fn validate_write(data_type: DataType, raw: &str) -> Result<ScalarValue> {
    let mismatch = || BridgeError::TypeMismatch {
        expected: data_type.to_string(),
        value: raw.to_string(),
    };
    match data_type {
        DataType::Double => raw
            .parse::<f64>()
            .map(ScalarValue::Float)
            .map_err(|_| mismatch()),
        DataType::Int64 => raw
            .parse::<i64>()
            .map(ScalarValue::Int)
            .map_err(|_| mismatch()),
        DataType::Text => Ok(coerce_scalar(raw)),
    }
}

/// The node-space mutation interface consumed by the reconciliation engine
#[cfg_attr(test, mockall::automock)]
pub trait NodeSpace: Send {
    /// Create a folder node; `parent` is `None` only for the synthetic root
    fn create_folder(
        &mut self,
        parent: Option<FolderHandle>,
        path: &str,
        display_name: &str,
    ) -> Result<FolderHandle>;

    /// Create a variable node under an existing folder
    fn create_variable(
        &mut self,
        parent: FolderHandle,
        path: &str,
        display_name: &str,
        data_type: DataType,
        rank: ValueRank,
    ) -> Result<VariableHandle>;

    /// Push value, timestamp and quality onto a live variable
    fn update_variable(
        &mut self,
        handle: VariableHandle,
        value: &ScalarValue,
        timestamp: DateTime<Utc>,
        quality: Quality,
    ) -> Result<()>;

    /// Change the display name of a live node
    fn rename_node(&mut self, handle: NodeHandle, display_name: &str) -> Result<()>;

    /// Remove a live node (and, for folders, everything the server hangs
    /// under it)
    fn remove_node(&mut self, handle: NodeHandle) -> Result<()>;

    /// Flush pending change notifications for a node
    fn clear_change_masks(&mut self, handle: NodeHandle) -> Result<()>;
}

/// One recorded node-space mutation, in application order
#[derive(Debug, Clone, PartialEq)]
pub enum NodeSpaceCall {
    CreateFolder { path: String, display_name: String },
    CreateVariable { path: String, display_name: String, data_type: DataType },
    UpdateVariable { path: String, value: String },
    RenameNode { path: String, display_name: String },
    RemoveNode { path: String },
    ClearChangeMasks { path: String },
}

/// State of one live variable inside the recording node space
#[derive(Debug, Clone)]
pub struct LiveVariable {
    pub path: String,
    pub display_name: String,
    pub data_type: DataType,
    pub value: Option<ScalarValue>,
    pub timestamp: DateTime<Utc>,
    pub quality: Quality,
}

#[derive(Debug, Clone)]
struct LiveFolder {
    path: String,
    #[allow(dead_code)]
    display_name: String,
}

#[derive(Debug, Default)]
struct RecordingInner {
    next_handle: u64,
    folders: HashMap<u64, LiveFolder>,
    variables: HashMap<u64, LiveVariable>,
    calls: Vec<NodeSpaceCall>,
}

impl RecordingInner {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn path_of(&self, handle: NodeHandle) -> Result<String> {
        match handle {
            NodeHandle::Folder(FolderHandle(h)) => self
                .folders
                .get(&h)
                .map(|f| f.path.clone())
                .ok_or_else(|| stale_handle("folder", h)),
            NodeHandle::Variable(VariableHandle(h)) => self
                .variables
                .get(&h)
                .map(|v| v.path.clone())
                .ok_or_else(|| stale_handle("variable", h)),
        }
    }
}

fn stale_handle(kind: &str, handle: u64) -> BridgeError {
    BridgeError::node_space("lookup", format!("{kind}#{handle}"), "stale handle")
}

/// In-memory node space that records every mutation
///
/// Clones share the same underlying state, so a test can hand one clone to
/// the engine and inspect the call log through another.
#[derive(Debug, Clone, Default)]
pub struct RecordingNodeSpace {
    inner: Arc<Mutex<RecordingInner>>,
}

impl RecordingNodeSpace {
    /// Create an empty recording node space
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordingInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the ordered call log
    pub fn calls(&self) -> Vec<NodeSpaceCall> {
        self.lock().calls.clone()
    }

    /// Drop the recorded calls, keeping live state
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Paths of all live folders
    pub fn folder_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.lock().folders.values().map(|f| f.path.clone()).collect();
        paths.sort();
        paths
    }

    /// Look up a live variable by path
    pub fn variable(&self, path: &str) -> Option<LiveVariable> {
        self.lock().variables.values().find(|v| v.path == path).cloned()
    }

    /// Number of live (folders, variables)
    pub fn live_counts(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.folders.len(), inner.variables.len())
    }

    /// Simulate a protocol client writing to a variable
    ///
    /// Runs the engine-level write validator against the variable's declared
    /// type, rejecting mismatched values — the write-callback contract a
    /// production adapter must wire up.
    pub fn client_write(&self, handle: VariableHandle, raw: &str) -> Result<ScalarValue> {
        let mut inner = self.lock();
        let var = inner
            .variables
            .get_mut(&handle.0)
            .ok_or_else(|| stale_handle("variable", handle.0))?;
        let value = validate_write(var.data_type, raw)?;
        var.value = Some(value.clone());
        var.timestamp = Utc::now();
        Ok(value)
    }

    /// Handle of a live variable by path, for driving `client_write` in tests
    pub fn variable_handle(&self, path: &str) -> Option<VariableHandle> {
        self.lock()
            .variables
            .iter()
            .find(|(_, v)| v.path == path)
            .map(|(h, _)| VariableHandle(*h))
    }
}

impl NodeSpace for RecordingNodeSpace {
    fn create_folder(
        &mut self,
        _parent: Option<FolderHandle>,
        path: &str,
        display_name: &str,
    ) -> Result<FolderHandle> {
        let mut inner = self.lock();
        let handle = inner.next_handle();
        inner.folders.insert(
            handle,
            LiveFolder {
                path: path.to_string(),
                display_name: display_name.to_string(),
            },
        );
        inner.calls.push(NodeSpaceCall::CreateFolder {
            path: path.to_string(),
            display_name: display_name.to_string(),
        });
        Ok(FolderHandle(handle))
    }

    fn create_variable(
        &mut self,
        parent: FolderHandle,
        path: &str,
        display_name: &str,
        data_type: DataType,
        _rank: ValueRank,
    ) -> Result<VariableHandle> {
        let mut inner = self.lock();
        if !inner.folders.contains_key(&parent.0) {
            return Err(BridgeError::node_space(
                "create_variable",
                path,
                "parent folder does not exist",
            ));
        }
        let handle = inner.next_handle();
        inner.variables.insert(
            handle,
            LiveVariable {
                path: path.to_string(),
                display_name: display_name.to_string(),
                data_type,
                value: None,
                timestamp: Utc::now(),
                quality: Quality::Good,
            },
        );
        inner.calls.push(NodeSpaceCall::CreateVariable {
            path: path.to_string(),
            display_name: display_name.to_string(),
            data_type,
        });
        Ok(VariableHandle(handle))
    }

    fn update_variable(
        &mut self,
        handle: VariableHandle,
        value: &ScalarValue,
        timestamp: DateTime<Utc>,
        quality: Quality,
    ) -> Result<()> {
        let mut inner = self.lock();
        let var = inner
            .variables
            .get_mut(&handle.0)
            .ok_or_else(|| stale_handle("variable", handle.0))?;
        var.value = Some(value.clone());
        var.timestamp = timestamp;
        var.quality = quality;
        let path = var.path.clone();
        inner.calls.push(NodeSpaceCall::UpdateVariable {
            path,
            value: value.to_string(),
        });
        Ok(())
    }

    fn rename_node(&mut self, handle: NodeHandle, display_name: &str) -> Result<()> {
        let mut inner = self.lock();
        let path = inner.path_of(handle)?;
        match handle {
            NodeHandle::Folder(FolderHandle(h)) => {
                if let Some(folder) = inner.folders.get_mut(&h) {
                    folder.display_name = display_name.to_string();
                }
            }
            NodeHandle::Variable(VariableHandle(h)) => {
                if let Some(var) = inner.variables.get_mut(&h) {
                    var.display_name = display_name.to_string();
                }
            }
        }
        inner.calls.push(NodeSpaceCall::RenameNode {
            path,
            display_name: display_name.to_string(),
        });
        Ok(())
    }

    fn remove_node(&mut self, handle: NodeHandle) -> Result<()> {
        let mut inner = self.lock();
        let path = inner.path_of(handle)?;
        match handle {
            NodeHandle::Folder(FolderHandle(h)) => {
                inner.folders.remove(&h);
            }
            NodeHandle::Variable(VariableHandle(h)) => {
                inner.variables.remove(&h);
            }
        }
        inner.calls.push(NodeSpaceCall::RemoveNode { path });
        Ok(())
    }

    fn clear_change_masks(&mut self, handle: NodeHandle) -> Result<()> {
        let mut inner = self.lock();
        let path = inner.path_of(handle)?;
        inner.calls.push(NodeSpaceCall::ClearChangeMasks { path });
        Ok(())
    }
}
