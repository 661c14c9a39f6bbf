//! Portico Core Types and Traits
//!
//! This crate provides the fundamental types and traits used throughout Portico:
//! - Module descriptors and packages
//! - Tenant types and lifecycle states
//! - Schema-name validation for tenant isolation
//! - Store trait abstractions implemented by the control plane

pub mod descriptor;
pub mod error;
pub mod package;
pub mod schema_name;
pub mod stores;
pub mod tenant;

pub use descriptor::ModuleDescriptor;
pub use error::{Error, Result};
pub use package::ModulePackage;
pub use tenant::{TenantId, TenantRecord, TenantStatus};
