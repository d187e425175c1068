//! Peer-to-peer control protocol.
//!
//! Every socket frame carries one bincode-encoded [`PeerMessage`]:
//! ```text
//! ┌──────────┬──────────────────────────────┐
//! │ msg_type │ payload                      │
//! │ 1 byte   │ variable (depends on type)   │
//! └──────────┴──────────────────────────────┘
//! ```
//!
//! `Context` messages carry replication contexts in the tagged-field text
//! form (see [`crate::text`]); the remaining types are handshake and
//! housekeeping messages that never appear in files.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message types for the peer protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Replication context (records terminated by `DONE`)
    Context = 1,
    /// Handshake carrying the sender's listening port
    Identify = 2,
    /// Address of another peer to connect to
    AddConnection = 3,
    /// Free-text diagnostic
    Text = 4,
    /// Inner message gated by a named filter
    Broadcast = 5,
    /// Barrier marker
    Barrier = 6,
    /// Sender is leaving
    Quit = 7,
}

/// Address hint sent by the rendezvous peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerHint {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FilteredEnvelope {
    filter: String,
    inner: Vec<u8>,
}

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMessage {
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

impl PeerMessage {
    fn new(msg_type: MessageType, payload: Vec<u8>) -> Self {
        Self { msg_type, payload }
    }

    /// A replication context.
    pub fn context(body: impl Into<String>) -> Self {
        Self::new(MessageType::Context, body.into().into_bytes())
    }

    pub fn identify(listen_port: u16) -> Self {
        Self::new(MessageType::Identify, listen_port.to_be_bytes().to_vec())
    }

    pub fn add_connection(host: impl Into<String>, port: u16) -> Result<Self, ProtocolError> {
        let hint = PeerHint {
            host: host.into(),
            port,
        };
        Ok(Self::new(MessageType::AddConnection, to_bytes(&hint)?))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(MessageType::Text, text.into().into_bytes())
    }

    /// Wrap `inner` so that only receivers accepting `filter` process it.
    pub fn broadcast(filter: impl Into<String>, inner: &PeerMessage) -> Result<Self, ProtocolError> {
        let envelope = FilteredEnvelope {
            filter: filter.into(),
            inner: inner.encode()?,
        };
        Ok(Self::new(MessageType::Broadcast, to_bytes(&envelope)?))
    }

    pub fn barrier() -> Self {
        Self::new(MessageType::Barrier, Vec::new())
    }

    pub fn quit() -> Self {
        Self::new(MessageType::Quit, Vec::new())
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        to_bytes(self)
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        from_bytes(bytes)
    }

    // ─── Typed payload accessors ────────────────────────────────

    pub fn context_body(&self) -> Result<&str, ProtocolError> {
        self.expect(MessageType::Context)?;
        std::str::from_utf8(&self.payload).map_err(|_| ProtocolError::InvalidUtf8)
    }

    pub fn identify_port(&self) -> Result<u16, ProtocolError> {
        self.expect(MessageType::Identify)?;
        let bytes: [u8; 2] = self
            .payload
            .as_slice()
            .try_into()
            .map_err(|_| ProtocolError::Deserialization("identify payload is not a port".into()))?;
        Ok(u16::from_be_bytes(bytes))
    }

    pub fn hint(&self) -> Result<PeerHint, ProtocolError> {
        self.expect(MessageType::AddConnection)?;
        from_bytes(&self.payload)
    }

    pub fn text_body(&self) -> Result<&str, ProtocolError> {
        self.expect(MessageType::Text)?;
        std::str::from_utf8(&self.payload).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Filter name and wrapped message of a `Broadcast`.
    pub fn filtered(&self) -> Result<(String, PeerMessage), ProtocolError> {
        self.expect(MessageType::Broadcast)?;
        let envelope: FilteredEnvelope = from_bytes(&self.payload)?;
        Ok((envelope.filter, PeerMessage::decode(&envelope.inner)?))
    }

    fn expect(&self, expected: MessageType) -> Result<(), ProtocolError> {
        if self.msg_type != expected {
            return Err(ProtocolError::InvalidMessageType {
                expected,
                actual: self.msg_type,
            });
        }
        Ok(())
    }
}

fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

fn from_bytes<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    Ok(value)
}

/// Errors in message envelopes or context bodies.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("expected {expected:?} message, got {actual:?}")]
    InvalidMessageType {
        expected: MessageType,
        actual: MessageType,
    },

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("unresolved tag '{0}'")]
    UnknownTag(String),

    #[error("{tag}: field '{field}' {reason}")]
    MalformedField {
        tag: String,
        field: String,
        reason: String,
    },

    #[error("line {line}: expected {expected}, found '{found}'")]
    UnexpectedToken {
        line: usize,
        expected: &'static str,
        found: String,
    },

    #[error("line {line}: unterminated {what}")]
    Unterminated { line: usize, what: &'static str },

    #[error("context ended without DONE")]
    MissingSentinel,
}
