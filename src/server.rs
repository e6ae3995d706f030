//! Bridge server facade
//!
//! [`NodeBridgeServer`] wires the pieces together and owns their
//! lifecycles: the mailbox, the reconciliation engine with its consumer
//! thread, and the module registry with its directory-watcher thread.
//! Producers and the consumer share nothing but the mailbox; the engine is
//! behind a mutex so control-plane queries interleave with envelope
//! application.

use crate::config::BridgeConfig;
use crate::engine::node::{IndexedNode, NodeId};
use crate::engine::nodespace::NodeSpace;
use crate::engine::{EngineConsumer, ReconciliationEngine};
use crate::error::{BridgeError, Result};
use crate::mailbox::Mailbox;
use crate::module::{DataModule, ModuleFactory, ModuleRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

/// The assembled bridge: modules in, reconciled node space out
pub struct NodeBridgeServer {
    config: BridgeConfig,
    engine: Arc<Mutex<ReconciliationEngine>>,
    registry: Arc<Mutex<ModuleRegistry>>,
    mailbox: Mailbox,
    running: Arc<AtomicBool>,
    consumer_handle: Option<JoinHandle<()>>,
    watcher_handle: Option<JoinHandle<()>>,
    bootstrapped: bool,
}

impl NodeBridgeServer {
    /// Assemble a server over a node-space adapter; nothing runs yet
    pub fn new(config: BridgeConfig, node_space: Box<dyn NodeSpace>) -> Self {
        let mailbox =
            Mailbox::new(config.mailbox_capacity).with_retry_backoff(config.send_retry_backoff());
        let engine = Arc::new(Mutex::new(ReconciliationEngine::new(
            node_space,
            config.root_display_name.clone(),
        )));
        let registry = Arc::new(Mutex::new(ModuleRegistry::new(
            mailbox.clone(),
            config.modules_dir.clone(),
        )));
        Self {
            config,
            engine,
            registry,
            mailbox,
            running: Arc::new(AtomicBool::new(false)),
            consumer_handle: None,
            watcher_handle: None,
            bootstrapped: false,
        }
    }

    fn lock_engine(&self) -> Result<MutexGuard<'_, ReconciliationEngine>> {
        self.engine
            .lock()
            .map_err(|_| BridgeError::Lifecycle("engine lock poisoned".to_string()))
    }

    fn lock_registry(&self) -> Result<MutexGuard<'_, ModuleRegistry>> {
        self.registry
            .lock()
            .map_err(|_| BridgeError::Lifecycle("registry lock poisoned".to_string()))
    }

    /// True while the consumer and watcher threads are live
    pub fn is_running(&self) -> bool {
        self.consumer_handle.is_some()
    }

    /// Bootstrap the engine and spawn the consumer and watcher threads
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(BridgeError::Lifecycle(
                "server is already running".to_string(),
            ));
        }

        if !self.bootstrapped {
            self.lock_engine()?.bootstrap()?;
            self.bootstrapped = true;
        }

        // Discover modules present at startup before the watcher takes over
        self.lock_registry()?.scan_once();

        let running = Arc::new(AtomicBool::new(true));
        self.running = running.clone();

        let consumer = EngineConsumer::new(
            self.engine.clone(),
            self.mailbox.clone(),
            running.clone(),
            self.config.consumer_backoff(),
        );
        self.consumer_handle = Some(
            std::thread::Builder::new()
                .name("engine-consumer".to_string())
                .spawn(move || consumer.run())?,
        );

        let registry = self.registry.clone();
        let interval = self.config.scan_interval();
        self.watcher_handle = Some(
            std::thread::Builder::new()
                .name("module-watcher".to_string())
                .spawn(move || watch_modules(registry, running, interval))?,
        );

        tracing::info!("Server started");
        Ok(())
    }

    /// Stop modules, then the watcher and consumer threads
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Err(BridgeError::Lifecycle("server is not running".to_string()));
        }

        // Producers go first so nothing refills the mailbox while draining
        self.lock_registry()?.stop_all();
        self.running.store(false, Ordering::SeqCst);

        for handle in [self.watcher_handle.take(), self.consumer_handle.take()]
            .into_iter()
            .flatten()
        {
            if handle.join().is_err() {
                return Err(BridgeError::Lifecycle(
                    "server worker thread panicked".to_string(),
                ));
            }
        }
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Handle onto the shared mailbox, for out-of-band producers
    pub fn mailbox(&self) -> Mailbox {
        self.mailbox.clone()
    }

    /// Register a module factory for directory discovery
    pub fn register_factory(&self, factory: Box<dyn ModuleFactory>) -> Result<()> {
        self.lock_registry()?.register_factory(factory);
        Ok(())
    }

    /// Install and start a module built in code
    pub fn install_module(
        &self,
        key: impl Into<String>,
        module: Box<dyn DataModule>,
    ) -> Result<()> {
        self.lock_registry()?.install(key, module)
    }

    /// Keys of all installed modules, sorted
    pub fn module_keys(&self) -> Result<Vec<String>> {
        Ok(self.lock_registry()?.keys())
    }

    /// Start one stopped module
    pub fn start_module(&self, key: &str) -> Result<()> {
        self.lock_registry()?.start(key)
    }

    /// Stop one running module
    pub fn stop_module(&self, key: &str) -> Result<()> {
        self.lock_registry()?.stop(key)
    }

    /// Registered space names, sorted
    pub fn spaces(&self) -> Result<Vec<String>> {
        Ok(self.lock_engine()?.spaces())
    }

    /// Remove a registered space and its whole subtree
    pub fn delete_space(&self, space: &str) -> Result<()> {
        self.lock_engine()?.delete_space(space)
    }

    /// Snapshot of the engine's master node list
    pub fn nodes(&self) -> Result<Vec<IndexedNode>> {
        Ok(self.lock_engine()?.nodes().to_vec())
    }

    /// Look up one master-list entity by its stable id
    pub fn node_by_id(&self, id: NodeId) -> Result<Option<IndexedNode>> {
        Ok(self.lock_engine()?.node_by_id(id).cloned())
    }
}

impl Drop for NodeBridgeServer {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

/// Watcher thread body: rescan the modules directory until stopped
fn watch_modules(registry: Arc<Mutex<ModuleRegistry>>, running: Arc<AtomicBool>, interval: Duration) {
    const SLICE: Duration = Duration::from_millis(50);
    tracing::debug!("Module watcher started");
    while running.load(Ordering::SeqCst) {
        match registry.lock() {
            Ok(mut registry) => {
                let started = registry.scan_once();
                if started > 0 {
                    tracing::info!(started, "Watcher picked up new modules");
                }
            }
            Err(_) => {
                tracing::error!("Registry lock poisoned, watcher stopping");
                break;
            }
        }
        let mut remaining = interval;
        while !remaining.is_zero() && running.load(Ordering::SeqCst) {
            let slice = remaining.min(SLICE);
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }
    tracing::debug!("Module watcher stopped");
}
