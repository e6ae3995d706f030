//! Reconciliation engine
//!
//! Everything between the mailbox and the live node space: the persistent
//! indexed node list, the node-space adapter seam, the reconciliation
//! passes and the consumer loop that drives them.

pub mod consumer;
pub mod node;
pub mod nodespace;
pub mod reconciler;

pub use consumer::EngineConsumer;
pub use node::{coerce_scalar, IndexedNode, NodeId, NodeKind, ScalarValue};
pub use nodespace::{
    DataType, FolderHandle, NodeHandle, NodeSpace, RecordingNodeSpace, ValueRank, VariableHandle,
};
pub use reconciler::ReconciliationEngine;
