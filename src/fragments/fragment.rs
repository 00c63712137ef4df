//! Fragment data types.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::fragments::store::StoreError;

/// Server modules a fragment needs, keyed by module name.
///
/// The value is the resource locator (for httpd, the shared object file name
/// relative to the modules directory).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleDeps(IndexMap<String, String>);

impl ModuleDeps {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Builder-style insert, used by producers.
    pub fn with(mut self, module: impl Into<String>, locator: impl Into<String>) -> Self {
        self.0.insert(module.into(), locator.into());
        self
    }

    /// Add one dependency, refusing a second locator for a known module.
    pub fn insert(&mut self, module: &str, locator: &str) -> Result<(), StoreError> {
        match self.0.get(module) {
            Some(existing) if existing != locator => Err(StoreError::DependencyConflict {
                module: module.to_string(),
                existing: existing.clone(),
                requested: locator.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.0.insert(module.to_string(), locator.to_string());
                Ok(())
            }
        }
    }

    /// Union `other` into `self` in `other`'s order.
    pub fn absorb(&mut self, other: &ModuleDeps) -> Result<(), StoreError> {
        for (module, locator) in other.iter() {
            self.insert(module, locator)?;
        }
        Ok(())
    }

    pub fn get(&self, module: &str) -> Option<&str> {
        self.0.get(module).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ModuleDeps {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A named unit of generated front-end configuration.
///
/// Matches the producer contract `{module-dependencies, config-segment}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigFragment {
    pub module_dependencies: ModuleDeps,
    pub config_segment: String,
}

impl ConfigFragment {
    pub fn new(config_segment: impl Into<String>, module_dependencies: ModuleDeps) -> Self {
        Self {
            module_dependencies,
            config_segment: config_segment.into(),
        }
    }
}
