//! In-memory fragment store.
//!
//! # Responsibilities
//! - Own every fragment's lifetime, keyed by fragment id
//! - Preserve insertion order for deterministic merges
//! - Detect module dependency conflicts at merge time

use indexmap::IndexMap;
use thiserror::Error;

use crate::fragments::fragment::{ConfigFragment, ModuleDeps};

/// Errors raised by store mutations and merges.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// `add` was called with an id that is already stored.
    #[error("fragment {0} already exists")]
    DuplicateId(String),

    /// `update` or `remove` named an id that is not stored.
    #[error("fragment {0} not found")]
    NotFound(String),

    /// One or more ids of a batch removal were not stored.
    #[error("fragments not found: {}", .0.join(", "))]
    NotFoundBatch(Vec<String>),

    /// Two fragments need different files for the same module.
    #[error("module {module} requested as {requested} but already provided by {existing}")]
    DependencyConflict {
        module: String,
        existing: String,
        requested: String,
    },
}

/// Result of merging every stored fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedConfig {
    pub text: String,
    pub deps: ModuleDeps,
}

/// Fragments keyed by id, in insertion order.
#[derive(Debug, Default)]
pub struct ConfigStore {
    fragments: IndexMap<String, ConfigFragment>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: &str, fragment: ConfigFragment) -> Result<(), StoreError> {
        if self.fragments.contains_key(id) {
            return Err(StoreError::DuplicateId(id.to_string()));
        }
        self.fragments.insert(id.to_string(), fragment);
        Ok(())
    }

    /// Replace a fragment in place; its merge position does not move.
    pub fn update(&mut self, id: &str, fragment: ConfigFragment) -> Result<(), StoreError> {
        match self.fragments.get_mut(id) {
            Some(slot) => {
                *slot = fragment;
                Ok(())
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    pub fn remove(&mut self, id: &str) -> Result<ConfigFragment, StoreError> {
        self.fragments
            .shift_remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Remove every listed id that exists.
    ///
    /// Removal is per id: present ids are removed even when others are
    /// missing, and the missing ones are reported afterwards.
    pub fn remove_batch<I, S>(&mut self, ids: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut removed = 0;
        let mut missing = Vec::new();
        for id in ids {
            let id = id.as_ref();
            if self.fragments.shift_remove(id).is_some() {
                removed += 1;
            } else {
                missing.push(id.to_string());
            }
        }
        if missing.is_empty() {
            Ok(removed)
        } else {
            Err(StoreError::NotFoundBatch(missing))
        }
    }

    pub fn get(&self, id: &str) -> Option<&ConfigFragment> {
        self.fragments.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.fragments.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.fragments.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Concatenate fragment text and union dependencies, in insertion order.
    pub fn merge(&self) -> Result<MergedConfig, StoreError> {
        let mut merged = MergedConfig::default();
        for fragment in self.fragments.values() {
            merged.deps.absorb(&fragment.module_dependencies)?;
            merged.text.push_str(&fragment.config_segment);
            if !fragment.config_segment.ends_with('\n') {
                merged.text.push('\n');
            }
            merged.text.push('\n');
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(text: &str, deps: &[(&str, &str)]) -> ConfigFragment {
        ConfigFragment::new(text, deps.iter().copied().collect())
    }

    #[test]
    fn add_rejects_duplicate_id() {
        let mut store = ConfigStore::new();
        store.add("a", fragment("A", &[])).unwrap();
        assert_eq!(
            store.add("a", fragment("B", &[])),
            Err(StoreError::DuplicateId("a".into()))
        );
        assert_eq!(store.get("a").unwrap().config_segment, "A");
    }

    #[test]
    fn update_and_remove_require_existing_id() {
        let mut store = ConfigStore::new();
        assert_eq!(
            store.update("x", fragment("X", &[])),
            Err(StoreError::NotFound("x".into()))
        );
        assert_eq!(store.remove("x"), Err(StoreError::NotFound("x".into())));
    }

    #[test]
    fn merge_follows_insertion_order_not_sorting() {
        let mut store = ConfigStore::new();
        store.add("zeta", fragment("Z", &[])).unwrap();
        store.add("alpha", fragment("A", &[])).unwrap();
        store.add("mid", fragment("M", &[])).unwrap();

        // update keeps the original position
        store.update("zeta", fragment("Z2", &[])).unwrap();

        let merged = store.merge().unwrap();
        assert_eq!(merged.text, "Z2\n\nA\n\nM\n\n");
    }

    #[test]
    fn merge_unions_dependencies() {
        let mut store = ConfigStore::new();
        store
            .add("a", fragment("A", &[("proxy_module", "mod_proxy.so")]))
            .unwrap();
        store
            .add(
                "b",
                fragment(
                    "B",
                    &[("proxy_module", "mod_proxy.so"), ("ssl_module", "mod_ssl.so")],
                ),
            )
            .unwrap();

        let merged = store.merge().unwrap();
        let modules: Vec<_> = merged.deps.iter().collect();
        assert_eq!(
            modules,
            vec![("proxy_module", "mod_proxy.so"), ("ssl_module", "mod_ssl.so")]
        );
    }

    #[test]
    fn merge_reports_dependency_conflict() {
        let mut store = ConfigStore::new();
        store
            .add("a", fragment("A", &[("php_module", "libphp7.so")]))
            .unwrap();
        store
            .add("b", fragment("B", &[("php_module", "libphp8.so")]))
            .unwrap();

        let err = store.merge().unwrap_err();
        assert_eq!(
            err,
            StoreError::DependencyConflict {
                module: "php_module".into(),
                existing: "libphp7.so".into(),
                requested: "libphp8.so".into(),
            }
        );

        // withdrawing the offender makes the store mergeable again
        store.remove("b").unwrap();
        assert!(store.merge().is_ok());
    }

    #[test]
    fn merge_never_yields_two_locators_for_one_module() {
        let locators = ["a.so", "b.so"];
        let mut store = ConfigStore::new();
        for step in 0..16usize {
            let id = format!("f{}", step % 5);
            let frag = fragment("T", &[("m", locators[step % 2]), ("n", "n.so")]);
            if store.contains(&id) {
                if step % 3 == 0 {
                    store.remove(&id).unwrap();
                } else {
                    store.update(&id, frag).unwrap();
                }
            } else {
                store.add(&id, frag).unwrap();
            }

            let distinct: std::collections::HashSet<_> = store
                .ids()
                .filter_map(|id| store.get(id)?.module_dependencies.get("m"))
                .collect();
            match store.merge() {
                Ok(merged) => {
                    assert!(distinct.len() <= 1);
                    if let Some(locator) = merged.deps.get("m") {
                        assert!(distinct.contains(locator));
                    }
                }
                Err(err) => {
                    assert!(distinct.len() > 1);
                    assert!(matches!(err, StoreError::DependencyConflict { .. }));
                }
            }
        }
    }

    #[test]
    fn merge_is_idempotent() {
        let mut store = ConfigStore::new();
        store.add("a", fragment("A\nB", &[("x", "x.so")])).unwrap();
        store.add("b", fragment("C\n", &[])).unwrap();
        assert_eq!(store.merge().unwrap(), store.merge().unwrap());
    }

    #[test]
    fn remove_batch_is_best_effort_per_id() {
        let mut store = ConfigStore::new();
        store.add("a", fragment("A", &[])).unwrap();
        store.add("b", fragment("B", &[])).unwrap();
        store.add("c", fragment("C", &[])).unwrap();

        let err = store.remove_batch(["a", "missing", "c"]).unwrap_err();
        assert_eq!(err, StoreError::NotFoundBatch(vec!["missing".into()]));
        assert_eq!(store.ids().collect::<Vec<_>>(), vec!["b"]);

        assert_eq!(store.remove_batch(["b"]), Ok(1));
        assert!(store.is_empty());
    }
}
