//! In-memory registry of validated module descriptors

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use portico_core::descriptor::ModuleDescriptor;
use portico_core::error::{Error, Result};

/// Descriptors keyed by module id. Immutable once inserted; a hot-swap
/// removes and re-inserts rather than mutating in place.
#[derive(Default)]
pub struct DescriptorStore {
    inner: RwLock<HashMap<String, Arc<ModuleDescriptor>>>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<ModuleDescriptor>> {
        self.inner.read().expect("descriptor store poisoned").get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().expect("descriptor store poisoned").contains_key(id)
    }

    /// Insert a descriptor; uniqueness of `id` is an invariant.
    pub fn insert(&self, descriptor: ModuleDescriptor) -> Result<Arc<ModuleDescriptor>> {
        let mut inner = self.inner.write().expect("descriptor store poisoned");
        if inner.contains_key(&descriptor.id) {
            return Err(Error::DuplicateModule(descriptor.id));
        }
        let descriptor = Arc::new(descriptor);
        inner.insert(descriptor.id.clone(), descriptor.clone());
        Ok(descriptor)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<ModuleDescriptor>> {
        self.inner.write().expect("descriptor store poisoned").remove(id)
    }

    /// All registered descriptors, sorted by id for stable output.
    pub fn list(&self) -> Vec<Arc<ModuleDescriptor>> {
        let mut descriptors: Vec<Arc<ModuleDescriptor>> = self
            .inner
            .read()
            .expect("descriptor store poisoned")
            .values()
            .cloned()
            .collect();
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("descriptor store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
