//! Plugin-based ACD backend registry
//!
//! The registry lets ACD backends be registered by name at runtime, so the
//! daemon can pick one from configuration without hardcoding the choice.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ipv4ll_core::{AcdRegistry, Ipv4ll};
//!
//! let registry = AcdRegistry::new();
//! let link = ipv4ll_acd_sim::SimLink::new();
//! ipv4ll_acd_sim::register(&registry, &link);
//!
//! let ipv4ll = registry.create_context("sim")?;
//! ```
//!
//! ## Registration
//!
//! Backend crates expose a `register()` function:
//!
//! ```rust,ignore
//! pub fn register(registry: &AcdRegistry) {
//!     registry.register_backend("mybackend", Box::new(MyFactory));
//! }
//! ```

use crate::engine::Ipv4ll;
use crate::error::{Error, Result};
use crate::traits::{AcdEngine, AcdEngineFactory};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Registry of ACD backend factories
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct AcdRegistry {
    backends: RwLock<HashMap<String, Box<dyn AcdEngineFactory>>>,
}

impl AcdRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an ACD backend factory
    ///
    /// # Parameters
    ///
    /// - `name`: Backend name (e.g., "sim")
    /// - `factory`: Factory object for creating engine instances
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register_backend(&self, name: impl Into<String>, factory: Box<dyn AcdEngineFactory>) {
        let name = name.into();
        debug!("Registering ACD backend '{}'", name);

        self.backends
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, factory);
    }

    /// Create an ACD engine from the named backend
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn AcdEngine>)`: A fresh, stopped engine
    /// - `Err(Error::InvalidArgument)`: No backend registered under `name`
    pub fn create_engine(&self, name: &str) -> Result<Box<dyn AcdEngine>> {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);

        let factory = backends.get(name).ok_or_else(|| {
            Error::invalid_argument(format!("ACD backend '{}' is not registered", name))
        })?;

        factory.create().map_err(Error::from_acd)
    }

    /// Create an IPv4LL context on the named backend
    pub fn create_context(&self, name: &str) -> Result<Ipv4ll> {
        self.create_engine(name).map(Ipv4ll::with_engine)
    }

    /// Check whether a backend is registered
    pub fn has_backend(&self, name: &str) -> bool {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Names of all registered backends, sorted
    pub fn backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
