//! Insertion-ordered name → object map.
//!
//! The registry is the identity authority at decode time: a record that
//! names an object resolves it here. Iteration order is insertion order,
//! which is also the order of full-scene snapshots, so a snapshot replayed
//! elsewhere rebuilds the registry in the same order.

use indexmap::IndexMap;

use crate::object::SceneObject;

#[derive(Debug, Clone, Default)]
pub struct ObjectRegistry {
    objects: IndexMap<String, SceneObject>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&SceneObject> {
        self.objects.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut SceneObject> {
        self.objects.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    /// Whether `name` refers to a constructed (live) object.
    pub fn is_live(&self, name: &str) -> bool {
        self.objects.get(name).is_some_and(|o| o.exists)
    }

    /// Insert `object`, or refresh the state of the entry already holding
    /// its name. A refreshed entry keeps its position and existence flag.
    pub(crate) fn stage(&mut self, object: SceneObject) {
        match self.objects.get_mut(object.name()) {
            Some(existing) => existing.refresh_from(object),
            None => {
                self.objects.insert(object.name().to_string(), object);
            }
        }
    }

    /// Remove an entry, preserving the order of the rest.
    pub(crate) fn remove(&mut self, name: &str) -> Option<SceneObject> {
        self.objects.shift_remove(name)
    }

    /// All entries in insertion order, staged ones included.
    pub fn iter(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects.values()
    }

    /// Live entries in insertion order.
    pub fn live(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects.values().filter(|o| o.exists)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }
}
