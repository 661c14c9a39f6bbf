//! In-process module runtime for Portico
//!
//! This crate owns the registered-module state of a running server:
//! - [`DescriptorStore`]: validated module descriptors keyed by id
//! - [`RouteMountTable`]: live route ownership with conflict detection
//! - [`HandlerRegistry`]: statically-linked handler sets per module
//! - discovery of descriptor files from the modules directory
//! - [`LifecycleService`]: validate, register, deploy, mount
//! - the per-request enablement gate in front of every module router
//!
//! Module dispatch goes through the mount table on every request, so
//! mounting and unmounting take effect on the live listener without a
//! restart.

pub mod discovery;
pub mod gate;
pub mod handlers;
pub mod lifecycle;
pub mod mount;
pub mod store;

pub use gate::{module_surface, GateState};
pub use handlers::{HandlerRegistry, ModuleHandlers, StaticModuleHandlers};
pub use lifecycle::{LifecycleService, ModuleStatus};
pub use mount::{MountedRoute, RouteMountTable};
pub use store::DescriptorStore;
