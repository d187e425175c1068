//! Tag → decoder registry.
//!
//! Resolution of a block tag is a two-branch function:
//!
//! 1. the tag is the name of a live object → [`Record::Reuse`] of that
//!    object, carrying whatever state fields the block has;
//! 2. the tag is a registered record kind → that kind's decoder.
//!
//! Anything else is an unresolved tag and aborts the enclosing context.
//! The `DONE` sentinel is resolved before either branch and is never
//! shadowed by an object name.

use rustc_hash::FxHashMap;
use scenelink_core::SceneStore;
use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::record::{read_patch, tags, DecodeFn, Record, STANDARD_KINDS};
use crate::text::Fields;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("record tag '{0}' is already registered")]
    DuplicateTag(String),
}

#[derive(Clone, Default)]
pub struct CommandCatalog {
    kinds: FxHashMap<String, DecodeFn>,
}

impl std::fmt::Debug for CommandCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.kinds.keys().collect();
        tags.sort();
        f.debug_struct("CommandCatalog").field("tags", &tags).finish()
    }
}

impl CommandCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog holding every built-in record kind.
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        for (tag, decode) in STANDARD_KINDS {
            catalog.kinds.insert((*tag).to_string(), *decode);
        }
        catalog
    }

    pub fn register(&mut self, tag: impl Into<String>, decode: DecodeFn) -> Result<(), CatalogError> {
        let tag = tag.into();
        if self.kinds.contains_key(&tag) {
            return Err(CatalogError::DuplicateTag(tag));
        }
        self.kinds.insert(tag, decode);
        Ok(())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.kinds.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Resolve `fields.tag()` against the live registry, then the catalog.
    pub fn decode(&self, fields: &Fields, store: &SceneStore) -> Result<Record, ProtocolError> {
        let tag = fields.tag();
        if tag == tags::DONE {
            return Ok(Record::Done);
        }
        if store.is_live(tag) {
            return Ok(Record::Reuse {
                name: tag.to_string(),
                patch: read_patch(fields)?,
            });
        }
        match self.kinds.get(tag) {
            Some(decode) => decode(fields),
            None => Err(ProtocolError::UnknownTag(tag.to_string())),
        }
    }
}
