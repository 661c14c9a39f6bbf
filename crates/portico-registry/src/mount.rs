//! Live route ownership with conflict detection
//!
//! The mount table is consulted on every module request, so mounting and
//! unmounting are immediately visible to the listener. At most one module
//! may claim a prefix, and no two mounted endpoints may share a
//! method+path combination; violations are hard errors.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::Router;

use portico_core::error::{Error, Result};

/// Fixed namespace every module is mounted under, independent of the
/// prefix the module declares for itself.
pub const MOUNT_NAMESPACE: &str = "/plugins";

pub fn namespaced_prefix(module_id: &str) -> String {
    format!("{}/{}", MOUNT_NAMESPACE, module_id)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MountedEndpoint {
    pub method: String,
    pub full_path: String,
    pub permissions: Vec<String>,
}

/// One module's live mount: its namespaced prefix, optional legacy alias,
/// bookkeeping endpoints, and the router handle serving its traffic.
#[derive(Clone)]
pub struct MountedRoute {
    pub module_id: String,
    pub version: String,
    pub prefix: String,
    pub legacy_prefix: Option<String>,
    pub endpoints: Vec<MountedEndpoint>,
    pub router: Router,
}

#[derive(Default)]
struct Inner {
    mounts: HashMap<String, Arc<MountedRoute>>,
    /// prefix (namespaced and legacy) -> owning module id
    prefixes: HashMap<String, String>,
    /// (method, full path) -> owning module id
    endpoints: HashMap<(String, String), String>,
}

#[derive(Default)]
pub struct RouteMountTable {
    inner: RwLock<Inner>,
}

impl RouteMountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a candidate mount against live state without mounting it.
    /// `exclude` ignores one module's own claims, which is what a hot-swap
    /// pre-validation needs while the old version is still mounted.
    pub fn check_conflicts(
        &self,
        prefixes: &[String],
        endpoints: &[(String, String)],
        exclude: Option<&str>,
    ) -> Result<()> {
        let inner = self.inner.read().expect("mount table poisoned");
        Self::check_conflicts_locked(&inner, prefixes, endpoints, exclude)
    }

    fn check_conflicts_locked(
        inner: &Inner,
        prefixes: &[String],
        endpoints: &[(String, String)],
        exclude: Option<&str>,
    ) -> Result<()> {
        for prefix in prefixes {
            if let Some(owner) = inner.prefixes.get(prefix) {
                if Some(owner.as_str()) != exclude {
                    return Err(Error::RoutePrefixConflict {
                        prefix: prefix.clone(),
                        owner: owner.clone(),
                    });
                }
            }
        }
        for (method, path) in endpoints {
            if let Some(owner) = inner.endpoints.get(&(method.clone(), path.clone())) {
                if Some(owner.as_str()) != exclude {
                    return Err(Error::Conflict(format!(
                        "Endpoint '{} {}' already mounted by module '{}'",
                        method, path, owner
                    )));
                }
            }
        }
        Ok(())
    }

    /// Install a mount. Re-validates conflicts under the write lock so a
    /// racing mount cannot slip between check and insert.
    pub fn mount(&self, route: MountedRoute) -> Result<()> {
        let mut inner = self.inner.write().expect("mount table poisoned");

        if inner.mounts.contains_key(&route.module_id) {
            return Err(Error::Conflict(format!(
                "Module '{}' is already mounted",
                route.module_id
            )));
        }

        let mut prefixes = vec![route.prefix.clone()];
        if let Some(legacy) = &route.legacy_prefix {
            prefixes.push(legacy.clone());
        }
        let endpoint_keys: Vec<(String, String)> = route
            .endpoints
            .iter()
            .map(|e| (e.method.clone(), e.full_path.clone()))
            .collect();

        Self::check_conflicts_locked(&inner, &prefixes, &endpoint_keys, None)?;

        for prefix in prefixes {
            inner.prefixes.insert(prefix, route.module_id.clone());
        }
        for key in endpoint_keys {
            inner.endpoints.insert(key, route.module_id.clone());
        }
        inner
            .mounts
            .insert(route.module_id.clone(), Arc::new(route));
        Ok(())
    }

    /// Remove a module's mount and every prefix/endpoint claim it holds.
    pub fn unmount(&self, module_id: &str) -> Option<Arc<MountedRoute>> {
        let mut inner = self.inner.write().expect("mount table poisoned");
        let removed = inner.mounts.remove(module_id)?;
        inner.prefixes.retain(|_, owner| owner != module_id);
        inner.endpoints.retain(|_, owner| owner != module_id);
        Some(removed)
    }

    pub fn get(&self, module_id: &str) -> Option<Arc<MountedRoute>> {
        self.inner
            .read()
            .expect("mount table poisoned")
            .mounts
            .get(module_id)
            .cloned()
    }

    pub fn is_mounted(&self, module_id: &str) -> bool {
        self.get(module_id).is_some()
    }

    /// Longest-prefix match of a request path against every claimed prefix.
    /// Returns the mount and the remainder of the path (always starting
    /// with '/').
    pub fn resolve(&self, path: &str) -> Option<(Arc<MountedRoute>, String)> {
        let inner = self.inner.read().expect("mount table poisoned");

        let mut best: Option<(&String, &String)> = None;
        for (prefix, owner) in &inner.prefixes {
            let matches = path == prefix
                || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'));
            if matches && best.map(|(p, _)| prefix.len() > p.len()).unwrap_or(true) {
                best = Some((prefix, owner));
            }
        }

        let (prefix, owner) = best?;
        let mount = inner.mounts.get(owner)?.clone();
        let rest = &path[prefix.len()..];
        let rest = if rest.is_empty() { "/" } else { rest };
        Some((mount, rest.to_string()))
    }

    pub fn list(&self) -> Vec<Arc<MountedRoute>> {
        let inner = self.inner.read().expect("mount table poisoned");
        let mut mounts: Vec<Arc<MountedRoute>> = inner.mounts.values().cloned().collect();
        mounts.sort_by(|a, b| a.module_id.cmp(&b.module_id));
        mounts
    }
}
