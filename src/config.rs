//! Server configuration
//!
//! Holds the tunables for the bridge server: where producer modules are
//! discovered, how often the directory is rescanned, and the sizing of the
//! mailbox between producers and the reconciliation consumer. Configuration
//! is stored as TOML and every field has a sensible default, so a missing
//! file is not an error.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default directory scanned for producer modules
pub const DEFAULT_MODULES_DIR: &str = "modules";

/// Default interval between module-directory scans, in milliseconds
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 10_000;

/// Default sleep of the consumer loop when the mailbox is empty, in milliseconds
pub const DEFAULT_CONSUMER_BACKOFF_MS: u64 = 100;

/// Default sleep between send retries when the mailbox is full, in milliseconds
pub const DEFAULT_SEND_RETRY_BACKOFF_MS: u64 = 25;

/// Default display name of the synthetic root node
pub const DEFAULT_ROOT_DISPLAY_NAME: &str = "Root";

/// Configuration for a [`crate::server::NodeBridgeServer`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Directory watched for module subdirectories
    pub modules_dir: PathBuf,

    /// Interval between periodic module-directory scans (milliseconds)
    pub scan_interval_ms: u64,

    /// Mailbox capacity; producers block (with retries) beyond this depth
    pub mailbox_capacity: usize,

    /// Consumer sleep when the mailbox is empty (milliseconds)
    pub consumer_backoff_ms: u64,

    /// Producer sleep between retries when the mailbox is full (milliseconds)
    pub send_retry_backoff_ms: u64,

    /// Display name given to the synthetic root node
    pub root_display_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            modules_dir: PathBuf::from(DEFAULT_MODULES_DIR),
            scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
            mailbox_capacity: crate::mailbox::DEFAULT_CAPACITY,
            consumer_backoff_ms: DEFAULT_CONSUMER_BACKOFF_MS,
            send_retry_backoff_ms: DEFAULT_SEND_RETRY_BACKOFF_MS,
            root_display_name: DEFAULT_ROOT_DISPLAY_NAME.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Interval between module-directory scans
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    /// Consumer back-off on an empty mailbox
    pub fn consumer_backoff(&self) -> Duration {
        Duration::from_millis(self.consumer_backoff_ms)
    }

    /// Producer back-off on a full mailbox
    pub fn send_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.send_retry_backoff_ms)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("failed to parse config: {e}")))
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Using default configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BridgeError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}
