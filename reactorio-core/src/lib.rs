//! Registry, chronology, strand, dispatch and the reactor/proactor core
//! built on top of `reactorio-driver`'s backend abstraction, plus the
//! factory surface named in §6: `create_reactor`/`create_proactor`/
//! `create_interface`, `create_thread`, the named driver-factory registry,
//! and process-wide default-instance slots.

#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod authorization;
pub mod chronology;
mod config;
mod core;
pub mod dispatch;
mod entry;
pub mod registry;
pub mod strand;
mod waiter;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use once_cell::sync::Lazy;
use reactorio_driver::{DriverType, Error, Result};

pub use authorization::Authorization;
pub use chronology::{Chronology, TimerEvent, TimerId};
pub use config::{Config, ConfigBuilder};
pub use core::Core;
pub use dispatch::Invoker;
pub use entry::{CallbackSlot, EntryRef};
pub use registry::{Registry, ShowKind};
pub use strand::{Strand, StrandExecutor};
pub use waiter::{WaiterId, WaiterOptions};

/// A named, swappable way to construct a [`reactorio_driver::Driver`],
/// registered via [`register_driver_factory`] (§6 "Backend registry").
pub type DriverFactory = Arc<dyn Fn() -> reactorio_driver::Result<Box<dyn reactorio_driver::Driver>> + Send + Sync>;

static DRIVER_FACTORIES: Lazy<StdMutex<HashMap<String, DriverFactory>>> = Lazy::new(|| StdMutex::new(HashMap::new()));

/// Register a named driver factory, overriding any previous registration
/// under the same name (§6 `register_driver_factory`). Intended for tests
/// and embedders that want a driver backend this crate doesn't build in by
/// default -- the closed [`DriverType`] set is unaffected.
pub fn register_driver_factory(name: impl Into<String>, factory: DriverFactory) {
    DRIVER_FACTORIES.lock().unwrap().insert(name.into(), factory);
}

/// Look up a previously registered driver factory by name.
pub fn lookup_driver_factory(name: &str) -> Option<DriverFactory> {
    DRIVER_FACTORIES.lock().unwrap().get(name).cloned()
}

/// Whether `name` resolves to either a built-in [`DriverType`] or a
/// registered factory (§6 `supports_driver`).
pub fn supports_driver(name: &str) -> bool {
    DriverType::parse(name).map(|o| o.is_some()).unwrap_or(false) || DRIVER_FACTORIES.lock().unwrap().contains_key(name)
}

/// Build a readiness-backed core, resolving the platform default reactor
/// backend when `config.driver` is unset (§6 `create_reactor`). The actual
/// platform-identity decision lives in [`DriverType::default_reactor`]
/// (`C8`); the top-level selection facade beyond that is an external
/// collaborator per this crate's stated scope.
pub fn create_reactor(config: Config) -> Result<Arc<Core>> {
    let driver_type = config.driver.unwrap_or_else(DriverType::default_reactor);
    Core::new(config, driver_type)
}

/// Build a completion-backed core (§6 `create_proactor`). Fails with
/// [`Error::NotImplemented`] on platforms with no completion backend
/// (`default_proactor` returns `None`) and no `config.driver` override.
pub fn create_proactor(config: Config) -> Result<Arc<Core>> {
    let driver_type = match config.driver {
        Some(d) => d,
        None => DriverType::default_proactor().ok_or(Error::NotImplemented("no completion backend on this platform"))?,
    };
    Core::new(config, driver_type)
}

/// Build a unified interface over whichever family the platform favors,
/// preferring a completion backend when one exists (§6 `create_interface`).
/// `_data_pool` names the buffer-pool collaborator the interface would draw
/// receive buffers from; full buffer-carrying I/O submission is out of
/// scope here; the parameter is accepted for surface compatibility and
/// otherwise unused.
pub fn create_interface<P>(config: Config, _data_pool: P) -> Result<Arc<Core>> {
    let driver_type = config
        .driver
        .or_else(DriverType::default_proactor)
        .unwrap_or_else(DriverType::default_reactor);
    Core::new(config, driver_type)
}

/// Spawn an OS thread that registers as a waiter on `core` and runs its
/// wait loop until `core.stop()` is called (§6 `create_thread`).
pub fn create_thread(_config: &Config, core: Arc<Core>) -> std::thread::JoinHandle<Result<()>> {
    std::thread::spawn(move || {
        let waiter = core.register_waiter(WaiterOptions::default());
        let result = core.run(waiter);
        core.deregister_waiter(waiter);
        result
    })
}

macro_rules! default_instance_slot {
    ($ty:ty, $get:ident, $set:ident, $slot:ident) => {
        static $slot: Lazy<StdMutex<Option<$ty>>> = Lazy::new(|| StdMutex::new(None));

        pub fn $get() -> Option<$ty> {
            $slot.lock().unwrap().clone()
        }

        pub fn $set(value: $ty) {
            *$slot.lock().unwrap() = Some(value);
        }
    };
}

// Process-wide, lazily-initialized default-instance slots (§6). `resolver`
// is omitted: DNS resolution is named as an external collaborator and this
// crate defines no resolver type for a slot to hold.
default_instance_slot!(Strand, default_strand, set_default_strand, DEFAULT_STRAND);
default_instance_slot!(StrandExecutor, default_executor, set_default_executor, DEFAULT_EXECUTOR);
default_instance_slot!(DriverType, default_driver, set_default_driver, DEFAULT_DRIVER);
default_instance_slot!(Arc<Core>, default_reactor_instance, set_default_reactor_instance, DEFAULT_REACTOR);
default_instance_slot!(Arc<Core>, default_proactor_instance, set_default_proactor_instance, DEFAULT_PROACTOR);
default_instance_slot!(Arc<Core>, default_interface_instance, set_default_interface_instance, DEFAULT_INTERFACE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_reactor_builds_a_working_core() {
        let config = Config::builder().build().unwrap();
        let core = create_reactor(config).unwrap();
        assert!(!core.is_stopped());
    }

    #[test]
    fn supports_driver_recognizes_builtin_names() {
        assert!(supports_driver("epoll"));
        assert!(!supports_driver("made-up"));
    }

    #[test]
    fn register_and_lookup_driver_factory() {
        register_driver_factory("test-factory", Arc::new(|| Err(Error::NotImplemented("test"))));
        assert!(supports_driver("test-factory"));
        assert!(lookup_driver_factory("test-factory").is_some());
        assert!(lookup_driver_factory("does-not-exist").is_none());
    }

    #[test]
    fn default_reactor_instance_slot_round_trips() {
        let config = Config::builder().build().unwrap();
        let core = create_reactor(config).unwrap();
        set_default_reactor_instance(core.clone());
        assert!(default_reactor_instance().is_some());
    }
}
