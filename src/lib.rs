//! NodeBridge: producer modules bridged into a live node space
//!
//! The bridge sits between data-producing modules and a hierarchical node
//! space of the kind industrial protocol servers expose. Each module owns
//! one subtree and emits full snapshots of it on its own thread; a bounded
//! mailbox carries the snapshots, in global FIFO order, to a single
//! reconciliation engine that diffs them against its master node list and
//! materializes the result through a pluggable [`engine::NodeSpace`]
//! adapter.
//!
//! # Architecture
//!
//! ```text
//! module threads ──▶ Mailbox (bounded FIFO) ──▶ EngineConsumer
//!                                                    │
//!                                          ReconciliationEngine
//!                                                    │
//!                                          NodeSpace adapter
//! ```
//!
//! [`server::NodeBridgeServer`] assembles the pieces and owns their
//! lifecycles; modules are discovered from a watched directory or
//! installed in code.

pub mod config;
pub mod engine;
pub mod error;
pub mod mailbox;
pub mod module;
pub mod server;
pub mod snapshot;

pub use config::BridgeConfig;
pub use engine::{NodeSpace, ReconciliationEngine, RecordingNodeSpace};
pub use error::{BridgeError, Result};
pub use mailbox::{ActionKind, Envelope, Mailbox};
pub use module::{DataModule, ModuleFactory, ModuleRegistry};
pub use server::NodeBridgeServer;
pub use snapshot::{Quality, SnapshotTree};
