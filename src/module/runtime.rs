//! Per-module thread lifecycle
//!
//! Each producer module runs on its own OS thread, owned by a
//! [`ModuleRuntime`]. Cancellation is cooperative: stopping stores into a
//! shared flag the loop polls, then joins the thread and recovers the
//! module instance so the runtime can be started again. Stopping a module
//! that is not running is a caller error, not a no-op.

use crate::error::{BridgeError, Result};
use crate::mailbox::Mailbox;
use crate::module::contract::DataModule;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Lifecycle state of a module runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Built but never started
    Created,
    /// Production thread is live
    Running,
    /// Stopped after running; can be started again
    Stopped,
}

/// Owns one module instance and its production thread
pub struct ModuleRuntime {
    key: String,
    space_name: String,
    /// Present exactly while the thread is not running
    module: Option<Box<dyn DataModule>>,
    mailbox: Mailbox,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<Box<dyn DataModule>>>,
    state: RuntimeState,
}

impl ModuleRuntime {
    /// Wrap a module instance; the thread is not started yet
    pub fn new(key: impl Into<String>, module: Box<dyn DataModule>, mailbox: Mailbox) -> Self {
        let key = key.into();
        let space_name = module.space_name().to_string();
        Self {
            key,
            space_name,
            module: Some(module),
            mailbox,
            cancel: Arc::new(AtomicBool::new(false)),
            handle: None,
            state: RuntimeState::Created,
        }
    }

    /// Runtime key, normally the module's directory name
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Space name of the owned module
    pub fn space_name(&self) -> &str {
        &self.space_name
    }

    /// Current lifecycle state
    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Spawn the production thread
    ///
    /// A fresh cancellation flag is allocated per start, so a stale stop
    /// request can never cancel a later run.
    pub fn start(&mut self) -> Result<()> {
        if self.state == RuntimeState::Running {
            return Err(BridgeError::Lifecycle(format!(
                "module '{}' is already running",
                self.key
            )));
        }
        let mut module = self.module.take().ok_or_else(|| {
            BridgeError::Lifecycle(format!("module '{}' instance unavailable", self.key))
        })?;

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel = cancel.clone();
        let mailbox = self.mailbox.clone();
        let handle = std::thread::Builder::new()
            .name(format!("module-{}", self.key))
            .spawn(move || {
                module.run_loop(&mailbox, &cancel);
                module
            })?;
        self.handle = Some(handle);
        self.state = RuntimeState::Running;
        tracing::info!(key = %self.key, space = %self.space_name, "Module started");
        Ok(())
    }

    /// Cancel the production thread and join it
    pub fn stop(&mut self) -> Result<()> {
        if self.state != RuntimeState::Running {
            return Err(BridgeError::Lifecycle(format!(
                "module '{}' is not running",
                self.key
            )));
        }
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(module) => self.module = Some(module),
                Err(_) => {
                    self.state = RuntimeState::Stopped;
                    return Err(BridgeError::Module(format!(
                        "module '{}' thread panicked",
                        self.key
                    )));
                }
            }
        }
        self.state = RuntimeState::Stopped;
        tracing::info!(key = %self.key, "Module stopped");
        Ok(())
    }

    /// True while the production thread is live
    pub fn is_running(&self) -> bool {
        self.state == RuntimeState::Running
    }
}

impl Drop for ModuleRuntime {
    fn drop(&mut self) {
        // Leave no detached thread behind
        if self.state == RuntimeState::Running {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotTree;
    use std::time::Duration;

    struct TickModule;

    impl DataModule for TickModule {
        fn space_name(&self) -> &str {
            "tick"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(1)
        }

        fn produce(&mut self) -> Result<SnapshotTree> {
            Ok(SnapshotTree::new())
        }
    }

    fn runtime() -> (ModuleRuntime, Mailbox) {
        let mailbox = Mailbox::new(64);
        (
            ModuleRuntime::new("tick", Box::new(TickModule), mailbox.clone()),
            mailbox,
        )
    }

    #[test]
    fn test_start_stop_start_cycle() {
        let (mut runtime, mailbox) = runtime();
        assert_eq!(runtime.state(), RuntimeState::Created);

        runtime.start().unwrap();
        assert!(runtime.is_running());
        while mailbox.is_empty() {
            std::thread::sleep(Duration::from_millis(1));
        }
        runtime.stop().unwrap();
        assert_eq!(runtime.state(), RuntimeState::Stopped);

        // The recovered module can run again
        runtime.start().unwrap();
        runtime.stop().unwrap();
    }

    #[test]
    fn test_double_start_is_a_lifecycle_error() {
        let (mut runtime, _mailbox) = runtime();
        runtime.start().unwrap();
        let err = runtime.start().unwrap_err();
        assert!(matches!(err, BridgeError::Lifecycle(_)));
        runtime.stop().unwrap();
    }

    #[test]
    fn test_stop_without_running_is_a_lifecycle_error() {
        let (mut runtime, _mailbox) = runtime();
        let err = runtime.stop().unwrap_err();
        assert!(matches!(err, BridgeError::Lifecycle(_)));

        runtime.start().unwrap();
        runtime.stop().unwrap();
        let err = runtime.stop().unwrap_err();
        assert!(matches!(err, BridgeError::Lifecycle(_)));
    }
}
