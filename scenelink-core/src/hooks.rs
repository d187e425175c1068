//! Collaborator boundaries.
//!
//! Replication only needs narrow contracts from the rest of an application:
//! how an object's type-specific payload is encoded, whether a hidden object
//! is still needed by something visible, and where local edits go for undo.

use std::collections::BTreeSet;

use crate::events::SceneEvent;
use crate::object::SceneObject;
use crate::store::{SceneStore, StoreError};

/// Encodes and installs the type-specific payload of an object.
///
/// `decode` runs while the object is being constructed from a received
/// record and may mutate the store freely; any events it fires are
/// attributed to that object.
pub trait PayloadCodec: Send + Sync {
    fn encode(&self, object: &SceneObject) -> Vec<u8>;

    fn decode(&self, store: &mut SceneStore, name: &str, bytes: Vec<u8>) -> Result<(), StoreError>;
}

/// Passes payload bytes through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaquePayload;

impl PayloadCodec for OpaquePayload {
    fn encode(&self, object: &SceneObject) -> Vec<u8> {
        object.payload.clone()
    }

    fn decode(&self, store: &mut SceneStore, name: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        store.set_payload(name, bytes)
    }
}

/// Answers whether an undisplayed object is still depended upon by
/// something else (and so must be part of a full-scene snapshot).
pub trait DependencyOracle: Send + Sync {
    fn is_depended_upon(&self, store: &SceneStore, name: &str) -> bool;
}

/// Nothing depends on anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDependencies;

impl DependencyOracle for NoDependencies {
    fn is_depended_upon(&self, _store: &SceneStore, _name: &str) -> bool {
        false
    }
}

/// A fixed set of names that are always depended upon.
#[derive(Debug, Clone, Default)]
pub struct FixedDependencies(pub BTreeSet<String>);

impl FixedDependencies {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }
}

impl DependencyOracle for FixedDependencies {
    fn is_depended_upon(&self, _store: &SceneStore, name: &str) -> bool {
        self.0.contains(name)
    }
}

/// Receives local edits before they are replicated.
pub trait UndoSink: Send {
    fn record(&mut self, event: &SceneEvent);
}

impl UndoSink for Vec<SceneEvent> {
    fn record(&mut self, event: &SceneEvent) {
        self.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_payload_roundtrip() {
        let mut store = SceneStore::new();
        store
            .add_object(SceneObject::geometry("a").with_payload(vec![1, 2, 3]))
            .unwrap();
        let bytes = OpaquePayload.encode(store.get("a").unwrap());
        assert_eq!(bytes, vec![1, 2, 3]);

        OpaquePayload.decode(&mut store, "a", vec![9]).unwrap();
        assert_eq!(store.get("a").unwrap().payload, vec![9]);
    }

    #[test]
    fn test_dependency_oracles() {
        let store = SceneStore::new();
        assert!(!NoDependencies.is_depended_upon(&store, "x"));
        let fixed = FixedDependencies::new(["x"]);
        assert!(fixed.is_depended_upon(&store, "x"));
        assert!(!fixed.is_depended_upon(&store, "y"));
    }
}
