//! Filesystem discovery of module descriptors
//!
//! Modules live under a fixed convention: `modules/<id>/module.config.json`.
//! Discovery enumerates the directory, parses and shape-validates each
//! descriptor, and returns them ordered so that dependencies can be
//! registered before their dependents. Invalid entries are logged and
//! skipped rather than failing the whole sweep.

use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use portico_core::descriptor::{ModuleDescriptor, DESCRIPTOR_FILE};
use portico_core::error::{Error, Result};

/// Enumerate and parse every module descriptor under `modules_dir`.
pub async fn discover(modules_dir: &Path) -> Result<Vec<ModuleDescriptor>> {
    if !modules_dir.exists() {
        warn!(dir = %modules_dir.display(), "Modules directory does not exist, nothing to discover");
        return Ok(Vec::new());
    }

    let mut descriptors = Vec::new();
    let mut entries = fs::read_dir(modules_dir).await.map_err(Error::Io)?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(Error::Io)?
    {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let dir_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        let descriptor_path = path.join(DESCRIPTOR_FILE);
        if !descriptor_path.exists() {
            debug!(module_dir = %dir_name, "No descriptor file, skipping directory");
            continue;
        }

        match load_descriptor(&descriptor_path).await {
            Ok(descriptor) => {
                if descriptor.id != dir_name {
                    warn!(
                        module_dir = %dir_name,
                        descriptor_id = %descriptor.id,
                        "Descriptor id does not match its directory name, skipping"
                    );
                    continue;
                }
                descriptors.push(descriptor);
            }
            Err(e) => {
                warn!(
                    module_dir = %dir_name,
                    error = %e,
                    "Invalid module descriptor, skipping"
                );
            }
        }
    }

    Ok(order_by_dependencies(descriptors))
}

/// Read and shape-validate a single descriptor file.
pub async fn load_descriptor(path: &Path) -> Result<ModuleDescriptor> {
    let contents = fs::read_to_string(path).await.map_err(Error::Io)?;
    let descriptor: ModuleDescriptor = serde_json::from_str(&contents)?;
    descriptor.validate_shape()?;
    Ok(descriptor)
}

/// Order descriptors so that every dependency within the set precedes its
/// dependents. Dependencies outside the set are assumed to be registered
/// already and do not constrain the order; a cycle within the set leaves
/// the remainder in id order, to be rejected at registration time.
fn order_by_dependencies(mut pending: Vec<ModuleDescriptor>) -> Vec<ModuleDescriptor> {
    pending.sort_by(|a, b| a.id.cmp(&b.id));

    let in_set: std::collections::HashSet<String> =
        pending.iter().map(|d| d.id.clone()).collect();
    let mut emitted: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let (ready, rest): (Vec<ModuleDescriptor>, Vec<ModuleDescriptor>) =
            pending.into_iter().partition(|d| {
                d.dependencies
                    .iter()
                    .all(|dep| !in_set.contains(dep) || emitted.contains(dep))
            });

        if ready.is_empty() {
            // Dependency cycle among the remainder; registration will
            // surface MissingDependency for these.
            ordered.extend(rest);
            break;
        }

        for descriptor in ready {
            emitted.insert(descriptor.id.clone());
            ordered.push(descriptor);
        }
        pending = rest;
    }

    ordered
}
