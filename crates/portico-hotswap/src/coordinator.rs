//! The hot-swap coordinator
//!
//! Per module, the state machine is `Active(v)` -> `PreValidating` ->
//! `Swapping` -> `Active(v')`, with `RollingBack` -> `Active(v)` on a swap
//! failure and `Fatal` when the rollback itself fails. Pre-validation
//! never touches the live registry or mount table: a candidate that fails
//! it leaves the running module observably untouched, which is what makes
//! hot-swap safe to attempt speculatively.
//!
//! Overlapping swaps for one module id would race on the backup/restore
//! state, so the coordinator holds a per-module mutex across the whole
//! pre-validate -> swap -> rollback sequence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use portico_core::descriptor::DESCRIPTOR_FILE;
use portico_core::error::{Error, Result};
use portico_core::package::{ModulePackage, PACKAGE_FORMAT_VERSION};
use portico_registry::{discovery, LifecycleService};

use crate::fsutil;
use crate::sanitize;

/// Where a module currently sits in the swap state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapPhase {
    Active,
    PreValidating,
    Swapping,
    RollingBack,
    /// Rollback failed; the module needs manual intervention and process
    /// health is degraded until it gets it.
    Fatal,
}

/// Outcome of a successful swap.
#[derive(Debug, Clone, Serialize)]
pub struct SwapReport {
    pub module_id: String,
    pub previous_version: Option<String>,
    pub version: String,
}

pub struct HotswapCoordinator {
    lifecycle: Arc<LifecycleService>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    phases: DashMap<String, SwapPhase>,
}

impl HotswapCoordinator {
    pub fn new(lifecycle: Arc<LifecycleService>) -> Self {
        Self {
            lifecycle,
            locks: DashMap::new(),
            phases: DashMap::new(),
        }
    }

    fn lock_for(&self, module_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(module_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn phase(&self, module_id: &str) -> Option<SwapPhase> {
        self.phases.get(module_id).map(|entry| entry.value().clone())
    }

    /// Module ids stuck in `Fatal`. Non-empty means degraded health.
    pub fn fatal_modules(&self) -> Vec<String> {
        let mut fatal: Vec<String> = self
            .phases
            .iter()
            .filter(|entry| *entry.value() == SwapPhase::Fatal)
            .map(|entry| entry.key().clone())
            .collect();
        fatal.sort();
        fatal
    }

    pub fn has_fatal(&self) -> bool {
        !self.fatal_modules().is_empty()
    }

    /// Swap a module to the candidate version found in its module
    /// directory. Serialized per module id.
    pub async fn hotswap(&self, module_id: &str) -> Result<SwapReport> {
        let lock = self.lock_for(module_id);
        let _guard = lock.lock().await;
        self.hotswap_locked(module_id).await
    }

    async fn hotswap_locked(&self, module_id: &str) -> Result<SwapReport> {
        let was_registered = self.lifecycle.store().contains(module_id);
        self.phases
            .insert(module_id.to_string(), SwapPhase::PreValidating);

        // Pre-validate in isolation. Nothing below this block runs unless
        // the candidate is fully viable, so a failure here is a no-op for
        // the running module.
        let candidate = match self.pre_validate(module_id).await {
            Ok(candidate) => candidate,
            Err(e) => {
                if was_registered {
                    self.phases.insert(module_id.to_string(), SwapPhase::Active);
                } else {
                    self.phases.remove(module_id);
                }
                return Err(e);
            }
        };

        let backup = self.lifecycle.store().get(module_id);
        let previous_version = backup.as_ref().map(|b| b.version.clone());

        self.phases.insert(module_id.to_string(), SwapPhase::Swapping);
        info!(
            module_id = %module_id,
            from = previous_version.as_deref().unwrap_or("none"),
            to = %candidate.version,
            "Starting atomic swap"
        );

        let version = candidate.version.clone();
        if let Err(swap_error) = self.swap(module_id, candidate, backup.is_some()).await {
            self.phases
                .insert(module_id.to_string(), SwapPhase::RollingBack);
            warn!(
                module_id = %module_id,
                error = %swap_error,
                "Swap failed, rolling back"
            );

            match self.rollback(module_id, backup.as_deref()).await {
                Ok(()) => {
                    if backup.is_some() {
                        self.phases.insert(module_id.to_string(), SwapPhase::Active);
                    } else {
                        // First install failed; there is no active version.
                        self.phases.remove(module_id);
                    }
                    Err(Error::Swap(swap_error.to_string()))
                }
                Err(rollback_error) => {
                    self.phases.insert(module_id.to_string(), SwapPhase::Fatal);
                    error!(
                        module_id = %module_id,
                        swap_error = %swap_error,
                        rollback_error = %rollback_error,
                        "Rollback failed, module requires manual intervention"
                    );
                    Err(Error::Fatal {
                        swap: swap_error.to_string(),
                        rollback: rollback_error.to_string(),
                    })
                }
            }
        } else {
            self.phases.insert(module_id.to_string(), SwapPhase::Active);
            info!(module_id = %module_id, version = %version, "Swap complete");
            Ok(SwapReport {
                module_id: module_id.to_string(),
                previous_version,
                version,
            })
        }
    }

    /// Load the candidate descriptor and run every structural check against
    /// it without touching live state.
    async fn pre_validate(
        &self,
        module_id: &str,
    ) -> Result<portico_core::descriptor::ModuleDescriptor> {
        let descriptor_path = self
            .lifecycle
            .modules_dir()
            .join(module_id)
            .join(DESCRIPTOR_FILE);
        if !descriptor_path.exists() {
            return Err(Error::NotFound(format!(
                "No candidate descriptor at '{}'",
                descriptor_path.display()
            )));
        }

        let candidate = discovery::load_descriptor(&descriptor_path).await?;
        if candidate.id != module_id {
            return Err(Error::Validation(format!(
                "Candidate descriptor id '{}' does not match module '{}'",
                candidate.id, module_id
            )));
        }

        // Same validation as registration, minus the self-duplicate check.
        self.lifecycle.validate(&candidate, Some(module_id))?;
        // Every declared table must have a schema definition available.
        self.lifecycle.table_definitions(&candidate)?;

        Ok(candidate)
    }

    /// The swap itself: tear down the old version, bring up the new one.
    /// Any error from here triggers rollback in the caller.
    async fn swap(
        &self,
        module_id: &str,
        candidate: portico_core::descriptor::ModuleDescriptor,
        was_registered: bool,
    ) -> Result<()> {
        if was_registered {
            // The old version may be registered but unmounted; that is not
            // an error for the teardown half.
            if let Err(e) = self.lifecycle.unmount(module_id) {
                if !e.is_not_found() {
                    return Err(e);
                }
            }
            self.lifecycle.unregister(module_id).await?;
        }

        self.lifecycle.register(candidate).await?;
        self.lifecycle.mount(module_id)
    }

    /// Restore the backup after a failed swap. Clears any half-installed
    /// candidate state first so re-registration cannot conflict.
    async fn rollback(
        &self,
        module_id: &str,
        backup: Option<&portico_core::descriptor::ModuleDescriptor>,
    ) -> Result<()> {
        let _ = self.lifecycle.mounts().unmount(module_id);
        let _ = self.lifecycle.store().remove(module_id);

        if let Some(backup) = backup {
            self.lifecycle.register(backup.clone()).await?;
            self.lifecycle.mount(module_id)?;
        }
        Ok(())
    }

    /// Import an untrusted package: validate shape, sanitize every file,
    /// write under the module's own directory, then hot-swap. Rejection
    /// happens before the first filesystem write.
    pub async fn import_package(&self, package: ModulePackage) -> Result<SwapReport> {
        package.validate_shape()?;
        sanitize::validate_package_files(&package)?;

        let module_id = package.id.clone();
        let lock = self.lock_for(&module_id);
        let _guard = lock.lock().await;

        let module_dir = self.lifecycle.modules_dir().join(&module_id);
        for (raw_path, content) in &package.files {
            let relative = sanitize::sanitize_relative_path(raw_path)?;
            fsutil::persist_atomic(&module_dir.join(relative), content.as_bytes())?;
        }

        // A package without an explicit descriptor file still carries its
        // descriptor in `config`; materialize it for discovery and swap.
        if !package.files.contains_key(DESCRIPTOR_FILE) {
            let descriptor_json = serde_json::to_vec_pretty(&package.config)?;
            fsutil::persist_atomic(&module_dir.join(DESCRIPTOR_FILE), &descriptor_json)?;
        }

        info!(
            module_id = %module_id,
            files = package.files.len(),
            "Imported module package, swapping"
        );
        self.hotswap_locked(&module_id).await
    }

    /// Export a module's directory and registered descriptor as a package.
    /// Used for migration and backup, not as a security boundary.
    pub async fn export_package(&self, module_id: &str) -> Result<ModulePackage> {
        let descriptor = self.lifecycle.store().get(module_id).ok_or_else(|| {
            Error::NotFound(format!("Module '{}' is not registered", module_id))
        })?;

        let module_dir = self.lifecycle.modules_dir().join(module_id);
        let mut files = BTreeMap::new();
        collect_files(&module_dir, PathBuf::new(), &mut files).await?;

        Ok(ModulePackage {
            id: module_id.to_string(),
            config: (*descriptor).clone(),
            files,
            exported_at: Utc::now(),
            version: PACKAGE_FORMAT_VERSION.to_string(),
        })
    }
}

/// Recursively read a module directory into relative-path -> content
/// pairs. Non-UTF-8 files are an error rather than silently skipped.
fn collect_files<'a>(
    root: &'a Path,
    relative: PathBuf,
    files: &'a mut BTreeMap<String, String>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let dir = root.join(&relative);
        let mut entries = fs::read_dir(&dir).await.map_err(Error::Io)?;

        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => {
                    return Err(Error::Validation(format!(
                        "Non-UTF-8 file name under '{}'",
                        dir.display()
                    )));
                }
            };
            let entry_relative = relative.join(&name);
            let file_type = entry.file_type().await.map_err(Error::Io)?;

            if file_type.is_dir() {
                collect_files(root, entry_relative, files).await?;
            } else {
                let content = fs::read_to_string(entry.path()).await.map_err(|e| {
                    Error::Validation(format!(
                        "File '{}' is not valid UTF-8 or unreadable: {}",
                        entry.path().display(),
                        e
                    ))
                })?;
                let key = entry_relative
                    .to_string_lossy()
                    .replace(std::path::MAIN_SEPARATOR, "/");
                files.insert(key, content);
            }
        }
        Ok(())
    })
}
