//! Producer module contract
//!
//! A producer module owns one subtree of the merged space, named by its
//! space name, and emits a full [`SnapshotTree`] of that subtree each
//! cycle. The provided [`DataModule::run_loop`] turns any implementation
//! into a well-behaved producer thread body: produce, wrap, send, sleep,
//! and bail out promptly when the cancellation flag is set.

use crate::error::Result;
use crate::mailbox::{Envelope, Mailbox};
use crate::snapshot::SnapshotTree;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Manifest file name expected inside each module directory
pub const MODULE_MANIFEST: &str = "module.toml";

/// Granularity of the cancellation-aware sleep
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Sleep for `duration`, waking early when `cancel` is set
pub fn sleep_with_cancel(duration: Duration, cancel: &AtomicBool) {
    let mut remaining = duration;
    while !remaining.is_zero() && !cancel.load(Ordering::SeqCst) {
        let slice = remaining.min(SLEEP_SLICE);
        std::thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}

/// A producer of snapshot trees for one subtree of the merged space
pub trait DataModule: Send {
    /// Stable identifier of the subtree this module owns
    fn space_name(&self) -> &str;

    /// Pause between production cycles
    fn interval(&self) -> Duration;

    /// Produce one full snapshot of the subtree
    fn produce(&mut self) -> Result<SnapshotTree>;

    /// Production loop run on the module's own thread
    ///
    /// A failed cycle is logged and skipped; the loop only ends when the
    /// cancellation flag is set or the mailbox consumer is gone.
    fn run_loop(&mut self, mailbox: &Mailbox, cancel: &AtomicBool) {
        tracing::info!(space = self.space_name(), "Module loop started");
        while !cancel.load(Ordering::SeqCst) {
            match self.produce() {
                Ok(tree) => {
                    let envelope = Envelope::auto(tree, self.space_name());
                    if let Err(e) = mailbox.send(envelope) {
                        tracing::error!(space = self.space_name(), "Send failed, stopping: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(space = self.space_name(), "Production cycle failed: {}", e);
                }
            }
            sleep_with_cancel(self.interval(), cancel);
        }
        tracing::info!(space = self.space_name(), "Module loop stopped");
    }
}

/// Builds module instances from a manifest
pub trait ModuleFactory: Send + Sync {
    /// Factory name matched against [`ModuleSpec::factory`]
    fn name(&self) -> &str;

    /// Instantiate a module from its manifest
    fn create(&self, spec: &ModuleSpec) -> Result<Box<dyn DataModule>>;
}

/// Parsed `module.toml` manifest of one module directory
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleSpec {
    /// Name of the factory that builds this module
    pub factory: String,
    /// Space name override; defaults to the directory name
    pub space_name: Option<String>,
    /// Cycle interval override, in milliseconds
    pub interval_ms: Option<u64>,
    /// Factory-specific parameters
    #[serde(default)]
    pub params: toml::Table,
}

impl ModuleSpec {
    /// Read and parse the manifest inside a module directory
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(MODULE_MANIFEST);
        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content).map_err(|e| {
            crate::error::BridgeError::Config(format!(
                "failed to parse {}: {e}",
                path.display()
            ))
        })
    }

    /// Float parameter helper, accepting integer TOML values too
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        match self.params.get(key) {
            Some(toml::Value::Float(v)) => Some(*v),
            Some(toml::Value::Integer(v)) => Some(*v as f64),
            _ => None,
        }
    }
}
