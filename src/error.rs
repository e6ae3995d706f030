//! Error handling for the NodeBridge server
//!
//! This module defines the custom error type and a Result alias used
//! throughout the crate. Errors fall into four families: lifecycle misuse
//! (caller bugs, always surfaced), per-envelope reconciliation faults
//! (logged, never fatal to the consumer loop), module production faults
//! (logged, the module keeps running), and node-space adapter faults
//! (logged with operation and path, the pass continues).

use thiserror::Error;

/// Main error type for NodeBridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Lifecycle misuse: stopping a stopped module, double-starting the
    /// server, and similar caller errors
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Errors related to the producer/consumer mailbox
    #[error("Mailbox error: {0}")]
    Mailbox(String),

    /// Errors raised by a producer module
    #[error("Module error: {0}")]
    Module(String),

    /// Operation referenced a space name that is not registered
    #[error("Unknown space name: {0}")]
    UnknownSpace(String),

    /// A snapshot node would duplicate an existing path in the same tree
    #[error("Duplicate snapshot path: {0}")]
    DuplicatePath(String),

    /// A client write carried a value incompatible with the declared type
    #[error("Type mismatch: cannot write {value:?} as {expected}")]
    TypeMismatch { expected: String, value: String },

    /// Node-space adapter failure during materialization
    #[error("Node-space error during {operation} at '{path}': {message}")]
    NodeSpace {
        operation: String,
        path: String,
        message: String,
    },

    /// Errors related to configuration or module manifests
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Build a node-space error with operation and path context
    pub fn node_space(
        operation: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        BridgeError::NodeSpace {
            operation: operation.into(),
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for NodeBridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
