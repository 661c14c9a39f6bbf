//! Statically-linked module handler sets
//!
//! Portico does not reload code at runtime. A module's implementation is a
//! [`ModuleHandlers`] value linked into the host binary and registered here
//! under the module's id; hot-swap replaces the registry entry and the
//! mount table's router handle in one atomic step per structure. Importing
//! a package updates a module's files and descriptor, then re-mounts
//! whatever handler set is currently registered for that id.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use dashmap::DashMap;

/// A versioned set of handlers for one module: its router factory and the
/// DDL backing every table the module declares.
pub trait ModuleHandlers: Send + Sync {
    /// Build a fresh router for mounting. Called once per mount.
    fn build_router(&self) -> Router;

    /// DDL for a declared table, or `None` if this handler set does not
    /// know the table, which fails swap pre-validation.
    fn table_ddl(&self, table: &str) -> Option<String>;
}

/// Handler set built from a ready-made router and a DDL map. The common way
/// for embedders and tests to register modules.
pub struct StaticModuleHandlers {
    router: Router,
    ddl: HashMap<String, String>,
}

impl StaticModuleHandlers {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            ddl: HashMap::new(),
        }
    }

    pub fn with_table(mut self, name: impl Into<String>, ddl: impl Into<String>) -> Self {
        self.ddl.insert(name.into(), ddl.into());
        self
    }
}

impl ModuleHandlers for StaticModuleHandlers {
    fn build_router(&self) -> Router {
        self.router.clone()
    }

    fn table_ddl(&self, table: &str) -> Option<String> {
        self.ddl.get(table).cloned()
    }
}

/// Handler sets keyed by module id. Registering an id that already exists
/// replaces the entry; that is how a new module version is installed.
#[derive(Default)]
pub struct HandlerRegistry {
    inner: DashMap<String, Arc<dyn ModuleHandlers>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, module_id: impl Into<String>, handlers: Arc<dyn ModuleHandlers>) {
        self.inner.insert(module_id.into(), handlers);
    }

    pub fn get(&self, module_id: &str) -> Option<Arc<dyn ModuleHandlers>> {
        self.inner.get(module_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, module_id: &str) -> bool {
        self.inner.contains_key(module_id)
    }

    pub fn remove(&self, module_id: &str) -> Option<Arc<dyn ModuleHandlers>> {
        self.inner.remove(module_id).map(|(_, handlers)| handlers)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
