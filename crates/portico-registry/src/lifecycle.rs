//! Module lifecycle: validate, register, deploy, mount
//!
//! The lifecycle service ties the descriptor store, mount table, handler
//! registry, and control plane together. Registration order is the
//! caller's responsibility: a descriptor can only depend on modules that
//! are already registered, which makes dependency cycles structurally
//! impossible.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use portico_core::descriptor::ModuleDescriptor;
use portico_core::error::{Error, Result};
use portico_core::stores::{PermissionCatalog, TableDefinition, TableDeployer, TenantDirectory};

use crate::discovery;
use crate::handlers::HandlerRegistry;
use crate::mount::{namespaced_prefix, MountedEndpoint, MountedRoute, RouteMountTable, MOUNT_NAMESPACE};
use crate::store::DescriptorStore;

/// One line of `GET /modules/status`.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleStatus {
    pub id: String,
    pub name: String,
    pub version: String,
    pub mounted: bool,
    pub route_prefix: String,
}

/// Outcome of a discovery sweep.
#[derive(Debug, Default, Serialize)]
pub struct DiscoverySummary {
    pub registered: Vec<String>,
    pub skipped: Vec<SkippedModule>,
}

#[derive(Debug, Serialize)]
pub struct SkippedModule {
    pub id: String,
    pub reason: String,
}

pub struct LifecycleService {
    store: Arc<DescriptorStore>,
    mounts: Arc<RouteMountTable>,
    handlers: Arc<HandlerRegistry>,
    deployer: Arc<dyn TableDeployer>,
    tenants: Arc<dyn TenantDirectory>,
    permissions: Arc<dyn PermissionCatalog>,
    modules_dir: PathBuf,
}

impl LifecycleService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<DescriptorStore>,
        mounts: Arc<RouteMountTable>,
        handlers: Arc<HandlerRegistry>,
        deployer: Arc<dyn TableDeployer>,
        tenants: Arc<dyn TenantDirectory>,
        permissions: Arc<dyn PermissionCatalog>,
        modules_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            mounts,
            handlers,
            deployer,
            tenants,
            permissions,
            modules_dir: modules_dir.into(),
        }
    }

    pub fn store(&self) -> &Arc<DescriptorStore> {
        &self.store
    }

    pub fn mounts(&self) -> &Arc<RouteMountTable> {
        &self.mounts
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// Registry-level validation of a descriptor. `replacing` names a
    /// module whose own registration and mounts are ignored, which is what
    /// hot-swap pre-validation needs while the old version is still live.
    pub fn validate(&self, descriptor: &ModuleDescriptor, replacing: Option<&str>) -> Result<()> {
        descriptor.validate_shape()?;

        if self.store.contains(&descriptor.id) && replacing != Some(descriptor.id.as_str()) {
            return Err(Error::DuplicateModule(descriptor.id.clone()));
        }

        for dependency in &descriptor.dependencies {
            if !self.store.contains(dependency) {
                return Err(Error::MissingDependency {
                    module: descriptor.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        for other in self.store.list() {
            if other.id != descriptor.id && other.api_routes.prefix == descriptor.api_routes.prefix
            {
                return Err(Error::RoutePrefixConflict {
                    prefix: descriptor.api_routes.prefix.clone(),
                    owner: other.id.clone(),
                });
            }
        }

        let (prefixes, endpoints) = Self::mount_claims(descriptor);
        self.mounts
            .check_conflicts(&prefixes, &endpoints, Some(&descriptor.id))?;

        Ok(())
    }

    /// The prefixes and endpoint keys a descriptor would claim when
    /// mounted: the namespaced prefix always, the declared prefix as a
    /// legacy alias when it is usable.
    fn mount_claims(descriptor: &ModuleDescriptor) -> (Vec<String>, Vec<(String, String)>) {
        let prefix = namespaced_prefix(&descriptor.id);
        let legacy = Self::legacy_prefix(descriptor);

        let mut prefixes = vec![prefix.clone()];
        if let Some(legacy) = &legacy {
            prefixes.push(legacy.clone());
        }

        let mut endpoints = Vec::new();
        for endpoint in &descriptor.api_routes.endpoints {
            for method in &endpoint.methods {
                endpoints.push((method.clone(), format!("{}{}", prefix, endpoint.path)));
                if let Some(legacy) = &legacy {
                    endpoints.push((method.clone(), format!("{}{}", legacy, endpoint.path)));
                }
            }
        }
        (prefixes, endpoints)
    }

    fn legacy_prefix(descriptor: &ModuleDescriptor) -> Option<String> {
        let declared = &descriptor.api_routes.prefix;
        // Declared prefixes inside the mount namespace would fight the
        // namespaced routes themselves.
        if declared.starts_with(MOUNT_NAMESPACE) {
            return None;
        }
        Some(declared.clone())
    }

    /// Resolve the DDL for every table a descriptor declares. Fails if the
    /// module has no handler set or the set lacks a declared table.
    pub fn table_definitions(&self, descriptor: &ModuleDescriptor) -> Result<Vec<TableDefinition>> {
        let handler_set = self.handlers.get(&descriptor.id).ok_or_else(|| {
            Error::Validation(format!(
                "No handler set registered for module '{}'",
                descriptor.id
            ))
        })?;

        descriptor
            .database
            .tables
            .iter()
            .map(|table| {
                handler_set
                    .table_ddl(table)
                    .map(|ddl| TableDefinition {
                        name: table.clone(),
                        ddl,
                    })
                    .ok_or_else(|| {
                        Error::Validation(format!(
                            "Module '{}' declares table '{}' but its handler set has no schema definition for it",
                            descriptor.id, table
                        ))
                    })
            })
            .collect()
    }

    /// Validate and register a descriptor: record permissions, deploy its
    /// tables into every active tenant, store it.
    ///
    /// Table deployment is best-effort per tenant. Tenants are isolated by
    /// design, so one tenant's failure is logged and does not abort
    /// registration for the others.
    pub async fn register(&self, descriptor: ModuleDescriptor) -> Result<()> {
        self.validate(&descriptor, None)?;
        let tables = self.table_definitions(&descriptor)?;

        self.permissions
            .record(&descriptor.id, &descriptor.permissions)
            .await?;

        for tenant in self.tenants.list_active().await? {
            if let Err(e) = self.deployer.deploy(&tenant, &tables).await {
                warn!(
                    module_id = %descriptor.id,
                    tenant_id = %tenant.id,
                    error = %e,
                    "Table deployment failed for tenant, continuing with others"
                );
            }
        }

        let id = descriptor.id.clone();
        let version = descriptor.version.clone();
        self.store.insert(descriptor)?;
        info!(module_id = %id, version = %version, "Registered module");
        Ok(())
    }

    /// Remove a descriptor from the registry. Never drops tables: a module
    /// can be disabled and unmounted but tenant data is retained.
    pub async fn unregister(&self, module_id: &str) -> Result<Arc<ModuleDescriptor>> {
        let removed = self
            .store
            .remove(module_id)
            .ok_or_else(|| Error::NotFound(format!("Module '{}' is not registered", module_id)))?;
        info!(module_id = %module_id, "Unregistered module");
        Ok(removed)
    }

    /// Mount a registered module's router behind the enablement gate.
    pub fn mount(&self, module_id: &str) -> Result<()> {
        let descriptor = self
            .store
            .get(module_id)
            .ok_or_else(|| Error::NotFound(format!("Module '{}' is not registered", module_id)))?;
        let handler_set = self.handlers.get(module_id).ok_or_else(|| {
            Error::Validation(format!(
                "No handler set registered for module '{}'",
                module_id
            ))
        })?;

        let prefix = namespaced_prefix(module_id);
        let legacy_prefix = Self::legacy_prefix(&descriptor);

        let mut endpoints = Vec::new();
        for endpoint in &descriptor.api_routes.endpoints {
            for method in &endpoint.methods {
                endpoints.push(MountedEndpoint {
                    method: method.clone(),
                    full_path: format!("{}{}", prefix, endpoint.path),
                    permissions: endpoint.permissions.clone(),
                });
                if let Some(legacy) = &legacy_prefix {
                    endpoints.push(MountedEndpoint {
                        method: method.clone(),
                        full_path: format!("{}{}", legacy, endpoint.path),
                        permissions: endpoint.permissions.clone(),
                    });
                }
            }
        }

        self.mounts.mount(MountedRoute {
            module_id: module_id.to_string(),
            version: descriptor.version.clone(),
            prefix: prefix.clone(),
            legacy_prefix,
            endpoints,
            router: handler_set.build_router(),
        })?;

        info!(module_id = %module_id, prefix = %prefix, "Mounted module router");
        Ok(())
    }

    /// Remove a module's live mount. Takes effect on the next request.
    pub fn unmount(&self, module_id: &str) -> Result<()> {
        self.mounts
            .unmount(module_id)
            .ok_or_else(|| Error::NotFound(format!("Module '{}' is not mounted", module_id)))?;
        info!(module_id = %module_id, "Unmounted module router");
        Ok(())
    }

    /// Discover descriptors from the modules directory and bring every new
    /// one up. Already-registered modules are left untouched; a version
    /// change goes through hot-swap, not rediscovery.
    pub async fn discover_and_register(&self) -> Result<DiscoverySummary> {
        let mut summary = DiscoverySummary::default();

        for descriptor in discovery::discover(&self.modules_dir).await? {
            let id = descriptor.id.clone();
            if self.store.contains(&id) {
                continue;
            }

            match self.register_and_mount(descriptor).await {
                Ok(()) => summary.registered.push(id),
                Err(e) => {
                    warn!(module_id = %id, error = %e, "Skipping module during discovery");
                    summary.skipped.push(SkippedModule {
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(summary)
    }

    pub async fn register_and_mount(&self, descriptor: ModuleDescriptor) -> Result<()> {
        let id = descriptor.id.clone();
        self.register(descriptor).await?;
        self.mount(&id)
    }

    pub fn status(&self) -> Vec<ModuleStatus> {
        self.store
            .list()
            .into_iter()
            .map(|descriptor| {
                let mounted = self.mounts.is_mounted(&descriptor.id);
                ModuleStatus {
                    id: descriptor.id.clone(),
                    name: descriptor.name.clone(),
                    version: descriptor.version.clone(),
                    mounted,
                    route_prefix: namespaced_prefix(&descriptor.id),
                }
            })
            .collect()
    }
}
