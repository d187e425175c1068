//! # scenelink-core: Scene data model shared by every replica
//!
//! The scene is a named collection of objects plus a handful of global
//! state blocks (camera, window, view, I/O). Everything that mutates it goes
//! through [`SceneStore`], which queues a [`SceneEvent`] for every change so
//! the replication layer can decide what to send to peers.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ SceneStore                                   │
//! │  ├── ObjectRegistry   name → SceneObject     │
//! │  ├── DisplaySet       visible names          │
//! │  ├── Camera / WindowState / ViewState / Io   │
//! │  ├── vars             global variables       │
//! │  └── EventQueue       SceneEvent FIFO ───────┼──► replication
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`object`]: `SceneObject`, its serializable state and patches
//! - [`registry`]: insertion-ordered object registry
//! - [`display`]: display set with buffered (bulk-load) mode
//! - [`events`]: notification types and queue
//! - [`globals`]: camera, window, view and I/O state
//! - [`store`]: the mutation API
//! - [`hooks`]: collaborator traits (payload codecs, dependency oracle, undo)

pub mod display;
pub mod events;
pub mod globals;
pub mod hooks;
pub mod object;
pub mod registry;
pub mod store;

pub use display::DisplaySet;
pub use events::{EventQueue, SceneEvent};
pub use globals::{Camera, ClipPlane, Color, IoState, ViewState, WindowState};
pub use hooks::{
    DependencyOracle, FixedDependencies, NoDependencies, OpaquePayload, PayloadCodec, UndoSink,
};
pub use object::{ObjectKind, ObjectPatch, SceneObject, Transform};
pub use registry::ObjectRegistry;
pub use store::{SceneStore, StoreError};
