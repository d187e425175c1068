//! # scenelink-sync: Peer-to-peer scene replication
//!
//! Every node holds a full replica of the scene. Local edits become
//! contexts (batches of text records ending in `DONE`) sent to every peer;
//! received contexts are applied through the same mutation path, without
//! being echoed back.
//!
//! ```text
//! ┌─────────────┐   length-prefixed    ┌─────────────┐
//! │ SceneNode A │ ◄──────────────────► │ SceneNode B │
//! └──────┬──────┘   PeerMessage frames └──────┬──────┘
//!        │                                    │
//!        ▼                                    ▼
//! ReplicationSession                  ReplicationSession
//!   ├── CommandCatalog (tag → decoder)
//!   └── SceneStore (scenelink-core)
//! ```
//!
//! ## Modules
//!
//! - [`framing`]: 4-byte length prefix and stream reassembly
//! - [`protocol`]: bincode-encoded control envelope
//! - [`text`]: tagged-field text form of records
//! - [`record`]: the record kinds, their encoding and application
//! - [`catalog`]: tag resolution
//! - [`session`]: echo suppression, snapshots, context application
//! - [`persist`]: scene files
//! - [`connection`] / [`peers`]: connections and the peer mesh
//! - [`config`] / [`node`]: the node event loop

pub mod catalog;
pub mod config;
pub mod connection;
pub mod framing;
pub mod node;
pub mod peers;
pub mod persist;
pub mod protocol;
pub mod record;
pub mod session;
pub mod text;

pub use catalog::{CatalogError, CommandCatalog};
pub use config::NodeConfig;
pub use connection::{ConnectionError, ConnectionStats, PeerConnection, PeerId};
pub use framing::{encode_frame, FrameDecoder, FramingError};
pub use node::{NodeError, NodeEvent, NodeHandle, NodeStats, SceneNode};
pub use peers::{BroadcastReport, PeerRegistry, RegistryStats};
pub use persist::{LoadError, LoadOutcome, SaveError, SceneLoader, FILE_HEADER};
pub use protocol::{MessageType, PeerHint, PeerMessage, ProtocolError};
pub use record::{DecodeFn, Record};
pub use session::{
    encode_context, ContextError, ContextErrorKind, ContextReport, ReplicationSession,
    SessionConfig, SessionMode, SessionStats, SnapshotTarget, Source,
};
