//! Method registry.
//!
//! Maps an algorithm name to one live module instance. Initialization runs
//! lazily on the first `resolve` and never again for that registration.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info};

use crate::error::{AnnotateError, Result};
use crate::method::EmbeddingMethod;

struct Entry {
    module: Arc<dyn EmbeddingMethod>,
    initialized: Mutex<bool>,
}

#[derive(Default)]
pub struct MethodRegistry {
    entries: RwLock<Vec<(String, Arc<Entry>)>>,
}

/// Algorithm names become store field keys, so `.` and `$` are reserved.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') || name.contains('$') {
        return Err(AnnotateError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module` under `name`. A re-registration replaces the module
    /// in place and resets its initialization flag.
    pub fn register(&self, name: &str, module: Arc<dyn EmbeddingMethod>) -> Result<()> {
        validate_name(name)?;
        let entry = Arc::new(Entry {
            module,
            initialized: Mutex::new(false),
        });

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => {
                slot.1 = entry;
                debug!(method = %name, "Replaced method registration");
            }
            None => {
                entries.push((name.to_string(), entry));
                info!(method = %name, "Registered method");
            }
        }
        Ok(())
    }

    /// Return the module for `name`, initializing it on first use.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn EmbeddingMethod>> {
        validate_name(name)?;
        let entry = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, e)| e.clone())
                .ok_or_else(|| AnnotateError::UnknownMethod(name.to_string()))?
        };

        // Held across initialize so concurrent resolvers wait for the first.
        let mut initialized = entry.initialized.lock().unwrap_or_else(PoisonError::into_inner);
        if !*initialized {
            info!(method = %name, "Initializing method");
            entry.module.initialize()?;
            *initialized = true;
        }
        Ok(entry.module.clone())
    }

    /// Registered names in registration order.
    pub fn list_names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(n, _)| n == name)
    }
}
