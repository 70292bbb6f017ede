//! Per-frame name/value store
//!
//! An `Env` maps glyph names to text-at-rest values and tracks which names
//! are veiled. Environments are value-copied, never aliased, when crossing a
//! frame boundary (invocation, chorus branch, sanctum, route declaration) -
//! that copy is the engine's isolation invariant.

use std::collections::{HashMap, HashSet};

use super::value::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Env {
    values: HashMap<String, String>,
    veiled: HashSet<String>,
}

impl Env {
    pub fn new() -> Env {
        Env::default()
    }

    /// Raw stored text for a name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Classified value for a name, tainted when the name is veiled.
    pub fn read(&self, name: &str) -> Option<Value> {
        self.values
            .get(name)
            .map(|raw| Value::classify(raw).with_taint(self.is_veiled(name)))
    }

    /// Store a value without touching the veil marker. Used for parameter
    /// binding, request bindings, and in-place numeric updates.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Plain bind: stores the value and clears any veil. Re-binding a veiled
    /// name without `Veiled` is the language's explicit surfacing act.
    pub fn bind(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_string(), value.into());
        self.veiled.remove(name);
    }

    /// Veiled bind: stores the value and marks the name veiled.
    pub fn bind_veiled(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_string(), value.into());
        self.veiled.insert(name.to_string());
    }

    /// Mark a name veiled without changing its value.
    pub fn veil(&mut self, name: &str) {
        self.veiled.insert(name.to_string());
    }

    pub fn is_veiled(&self, name: &str) -> bool {
        self.veiled.contains(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Delete a binding and its veil marker. Fleeting-name scrubbing runs
    /// through here on every frame exit path.
    pub fn remove(&mut self, name: &str) {
        self.values.remove(name);
        self.veiled.remove(name);
    }

    /// Copy of this environment containing only ordinary-visibility names.
    /// Veiled names never propagate implicitly across a frame boundary.
    pub fn child_visible(&self) -> Env {
        let values = self
            .values
            .iter()
            .filter(|(name, _)| !self.veiled.contains(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Env {
            values,
            veiled: HashSet::new(),
        }
    }

    /// Iterate over all bindings, veiled ones included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
