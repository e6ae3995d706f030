//! Producer modules
//!
//! The producing side of the bridge: the module contract, the per-module
//! thread runtime, the directory-scanning registry and the built-in
//! simulation generators.

pub mod contract;
pub mod registry;
pub mod runtime;
pub mod sim;

pub use contract::{DataModule, ModuleFactory, ModuleSpec, MODULE_MANIFEST};
pub use registry::ModuleRegistry;
pub use runtime::{ModuleRuntime, RuntimeState};
pub use sim::{CounterFactory, CounterModule, SineFactory, SineModule};
