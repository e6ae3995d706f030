//! Module discovery and registry
//!
//! The registry holds the factories the server knows how to instantiate
//! and the runtimes it currently owns, keyed by module directory name.
//! [`ModuleRegistry::scan_once`] walks the modules directory, skips every
//! directory already keyed, and starts any new module whose manifest names
//! a known factory. A directory that fails to load is logged and retried
//! on the next scan, so dropping a corrected manifest in place is enough
//! to recover.

use crate::error::{BridgeError, Result};
use crate::mailbox::Mailbox;
use crate::module::contract::{DataModule, ModuleFactory, ModuleSpec, MODULE_MANIFEST};
use crate::module::runtime::{ModuleRuntime, RuntimeState};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default cycle interval for modules whose manifest omits one
pub const DEFAULT_MODULE_INTERVAL: Duration = Duration::from_secs(1);

/// Factories plus the module runtimes built from them
pub struct ModuleRegistry {
    factories: HashMap<String, Box<dyn ModuleFactory>>,
    runtimes: HashMap<String, ModuleRuntime>,
    mailbox: Mailbox,
    modules_dir: PathBuf,
}

impl ModuleRegistry {
    /// Create a registry scanning `modules_dir`
    pub fn new(mailbox: Mailbox, modules_dir: impl Into<PathBuf>) -> Self {
        Self {
            factories: HashMap::new(),
            runtimes: HashMap::new(),
            mailbox,
            modules_dir: modules_dir.into(),
        }
    }

    /// Register a factory; replaces any previous factory of the same name
    pub fn register_factory(&mut self, factory: Box<dyn ModuleFactory>) {
        let name = factory.name().to_string();
        if self.factories.insert(name.clone(), factory).is_some() {
            tracing::warn!(name, "Factory replaced");
        }
    }

    /// Install and start a module built in code rather than discovered
    pub fn install(&mut self, key: impl Into<String>, module: Box<dyn DataModule>) -> Result<()> {
        let key = key.into();
        if self.runtimes.contains_key(&key) {
            return Err(BridgeError::Module(format!(
                "module key '{key}' is already installed"
            )));
        }
        let mut runtime = ModuleRuntime::new(key.clone(), module, self.mailbox.clone());
        runtime.start()?;
        self.runtimes.insert(key, runtime);
        Ok(())
    }

    /// Scan the modules directory once, starting newly appeared modules
    ///
    /// Returns the number of modules started by this scan. A missing
    /// modules directory is not an error; it simply yields nothing.
    pub fn scan_once(&mut self) -> usize {
        let entries = match std::fs::read_dir(&self.modules_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %self.modules_dir.display(), "Scan skipped: {}", e);
                return 0;
            }
        };

        let mut started = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(key) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            if self.runtimes.contains_key(&key) {
                continue;
            }
            if !path.join(MODULE_MANIFEST).is_file() {
                tracing::debug!(key, "Directory without manifest skipped");
                continue;
            }
            match self.load_and_start(&key, &path) {
                Ok(()) => started += 1,
                Err(e) => tracing::warn!(key, "Module failed to start: {}", e),
            }
        }
        started
    }

    fn load_and_start(&mut self, key: &str, dir: &std::path::Path) -> Result<()> {
        let spec = ModuleSpec::load(dir)?;
        let factory = self.factories.get(&spec.factory).ok_or_else(|| {
            BridgeError::Config(format!("unknown factory '{}'", spec.factory))
        })?;

        let mut spec = spec;
        if spec.space_name.is_none() {
            spec.space_name = Some(key.to_string());
        }
        let module = factory.create(&spec)?;

        let mut runtime = ModuleRuntime::new(key, module, self.mailbox.clone());
        runtime.start()?;
        self.runtimes.insert(key.to_string(), runtime);
        Ok(())
    }

    /// Start one stopped module by key
    pub fn start(&mut self, key: &str) -> Result<()> {
        self.runtimes
            .get_mut(key)
            .ok_or_else(|| BridgeError::Module(format!("unknown module '{key}'")))?
            .start()
    }

    /// Stop one running module by key
    pub fn stop(&mut self, key: &str) -> Result<()> {
        self.runtimes
            .get_mut(key)
            .ok_or_else(|| BridgeError::Module(format!("unknown module '{key}'")))?
            .stop()
    }

    /// Start every stopped module, logging failures and continuing
    pub fn start_all(&mut self) {
        for runtime in self.runtimes.values_mut() {
            if runtime.state() != RuntimeState::Running {
                if let Err(e) = runtime.start() {
                    tracing::warn!(key = runtime.key(), "Start failed: {}", e);
                }
            }
        }
    }

    /// Stop every running module, logging failures and continuing
    pub fn stop_all(&mut self) {
        for runtime in self.runtimes.values_mut() {
            if runtime.is_running() {
                if let Err(e) = runtime.stop() {
                    tracing::warn!(key = runtime.key(), "Stop failed: {}", e);
                }
            }
        }
    }

    /// Keys of all installed modules, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.runtimes.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Lifecycle state of one module, if installed
    pub fn state(&self, key: &str) -> Option<RuntimeState> {
        self.runtimes.get(key).map(|r| r.state())
    }

    /// Number of installed modules
    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    /// True if no module is installed
    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::sim::CounterFactory;

    fn registry_with_counter(dir: &std::path::Path) -> ModuleRegistry {
        let mut registry = ModuleRegistry::new(Mailbox::new(64), dir);
        registry.register_factory(Box::new(CounterFactory));
        registry
    }

    fn write_manifest(dir: &std::path::Path, key: &str, body: &str) {
        let module_dir = dir.join(key);
        std::fs::create_dir_all(&module_dir).unwrap();
        std::fs::write(module_dir.join(MODULE_MANIFEST), body).unwrap();
    }

    #[test]
    fn test_scan_starts_new_modules_once() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "m1", "factory = \"counter\"\ninterval_ms = 50\n");
        let mut registry = registry_with_counter(dir.path());

        assert_eq!(registry.scan_once(), 1);
        assert_eq!(registry.state("m1"), Some(RuntimeState::Running));

        // A rescan must not duplicate the already keyed directory
        assert_eq!(registry.scan_once(), 0);
        assert_eq!(registry.len(), 1);

        registry.stop_all();
    }

    #[test]
    fn test_scan_retries_broken_directory_after_fix() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "m1", "factory = \"no-such-factory\"\n");
        let mut registry = registry_with_counter(dir.path());

        assert_eq!(registry.scan_once(), 0);
        assert!(registry.is_empty());

        write_manifest(dir.path(), "m1", "factory = \"counter\"\ninterval_ms = 50\n");
        assert_eq!(registry.scan_once(), 1);
        registry.stop_all();
    }

    #[test]
    fn test_scan_skips_files_and_bare_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.txt"), "not a module").unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        let mut registry = registry_with_counter(dir.path());
        assert_eq!(registry.scan_once(), 0);
    }

    #[test]
    fn test_missing_modules_dir_is_not_an_error() {
        let mut registry = registry_with_counter(std::path::Path::new("definitely/not/here"));
        assert_eq!(registry.scan_once(), 0);
    }

    #[test]
    fn test_stop_unknown_key_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_with_counter(dir.path());
        assert!(matches!(
            registry.stop("ghost"),
            Err(BridgeError::Module(_))
        ));
    }
}
