//! Memoized class hierarchy closures.

use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;

use crate::{index::BytecodeIndex, Result};

/// Caches transitive subclass and superclass sets of one application.
///
/// The index only answers immediate relations; rules widen every class target across all of
/// its descendants, so the closures are computed once per class and shared afterwards. A cache
/// belongs to exactly one application and is dropped with it.
#[derive(Debug, Default)]
pub struct HierarchyCache {
    /// Class -> all transitive subclasses, breadth-first order.
    subclasses: DashMap<String, Arc<[String]>>,
    /// Class -> superclass chain, nearest first.
    superclasses: DashMap<String, Arc<[String]>>,
}

impl HierarchyCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all transitive subclasses of `class`, excluding `class` itself.
    ///
    /// # Arguments
    ///
    /// * `index` - The application index to query on a cache miss
    /// * `class` - The root class
    ///
    /// # Errors
    ///
    /// Propagates index errors; failed lookups are not cached.
    pub fn subclasses(&self, index: &dyn BytecodeIndex, class: &str) -> Result<Arc<[String]>> {
        if let Some(cached) = self.subclasses.get(class) {
            return Ok(Arc::clone(cached.value()));
        }

        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(class.to_string());

        let mut result = Vec::new();
        let mut worklist = vec![class.to_string()];
        let mut cursor = 0;
        while cursor < worklist.len() {
            let current = worklist[cursor].clone();
            cursor += 1;

            for child in index.subclasses(&current)? {
                if seen.insert(child.clone()) {
                    result.push(child.clone());
                    worklist.push(child);
                }
            }
        }

        let result: Arc<[String]> = result.into();
        self.subclasses
            .insert(class.to_string(), Arc::clone(&result));
        Ok(result)
    }

    /// Returns the superclass chain of `class`, nearest ancestor first.
    ///
    /// # Errors
    ///
    /// Propagates index errors; failed lookups are not cached.
    pub fn superclasses(&self, index: &dyn BytecodeIndex, class: &str) -> Result<Arc<[String]>> {
        if let Some(cached) = self.superclasses.get(class) {
            return Ok(Arc::clone(cached.value()));
        }

        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(class.to_string());

        let mut result = Vec::new();
        let mut current = class.to_string();
        while let Some(parent) = index.superclass(&current)? {
            if !seen.insert(parent.clone()) {
                break;
            }
            result.push(parent.clone());
            current = parent;
        }

        let result: Arc<[String]> = result.into();
        self.superclasses
            .insert(class.to_string(), Arc::clone(&result));
        Ok(result)
    }

    /// Returns `true` if `ancestor` appears in the superclass chain of `class`.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn is_subclass_of(
        &self,
        index: &dyn BytecodeIndex,
        class: &str,
        ancestor: &str,
    ) -> Result<bool> {
        Ok(self
            .superclasses(index, class)?
            .iter()
            .any(|parent| parent == ancestor))
    }

    /// Number of cached subclass closures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subclasses.len()
    }

    /// Returns `true` if no subclass closure has been computed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subclasses.is_empty()
    }
}
