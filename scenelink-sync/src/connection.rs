//! One live peer channel.
//!
//! Socket I/O happens in the node's reader and writer tasks; a
//! `PeerConnection` holds what the event loop needs: the reassembly buffer
//! for inbound bytes and the sending half of the writer task's queue.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::framing::{encode_frame, FrameDecoder, FramingError};
use crate::protocol::{PeerMessage, ProtocolError};

/// Identity of a connection, local to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// Transport-level failures. Any of these ends the connection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("could not connect to {addr} after {attempts} attempts: {reason}")]
    Refused {
        addr: String,
        attempts: u32,
        reason: String,
    },

    #[error("read failed: {0}")]
    Read(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("peer closed the connection")]
    Closed,

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub messages_in: u64,
    pub messages_out: u64,
}

#[derive(Debug)]
pub struct PeerConnection {
    id: PeerId,
    remote: SocketAddr,
    /// Port the remote listens on, learned from its `Identify`
    listen_port: Option<u16>,
    decoder: FrameDecoder,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    stats: ConnectionStats,
}

impl PeerConnection {
    pub fn new(remote: SocketAddr, outgoing: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            id: PeerId::new(),
            remote,
            listen_port: None,
            decoder: FrameDecoder::default(),
            outgoing,
            stats: ConnectionStats::default(),
        }
    }

    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.decoder = FrameDecoder::new(max_frame);
        self
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn listen_port(&self) -> Option<u16> {
        self.listen_port
    }

    pub fn set_listen_port(&mut self, port: u16) {
        self.listen_port = Some(port);
    }

    /// Address other peers can reach this one at, once it has identified.
    pub fn listen_addr(&self) -> Option<(String, u16)> {
        self.listen_port
            .map(|port| (self.remote.ip().to_string(), port))
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Frame and queue one message.
    pub fn send(&mut self, msg: &PeerMessage) -> Result<(), ConnectionError> {
        let frame = encode_frame(&msg.encode()?);
        self.send_frame(frame)
    }

    /// Queue an already framed message.
    pub fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), ConnectionError> {
        let len = frame.len() as u64;
        self.outgoing
            .send(frame)
            .map_err(|_| ConnectionError::Write("writer task has stopped".into()))?;
        self.stats.bytes_out += len;
        self.stats.messages_out += 1;
        Ok(())
    }

    /// Feed bytes just read from the socket and return every message they
    /// complete. An incomplete tail stays buffered for the next read.
    pub fn poll_read(&mut self, chunk: &[u8]) -> Result<Vec<PeerMessage>, ConnectionError> {
        self.stats.bytes_in += chunk.len() as u64;
        let frames = self.decoder.decode(chunk)?;
        let mut messages = Vec::with_capacity(frames.len());
        for frame in frames {
            messages.push(PeerMessage::decode(&frame)?);
            self.stats.messages_in += 1;
        }
        Ok(messages)
    }

    /// The error that end-of-stream amounts to right now: a clean close
    /// between frames, or an unexpected EOF inside one.
    pub fn end_of_stream(&self) -> ConnectionError {
        match self.decoder.finish() {
            Ok(()) => ConnectionError::Closed,
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> (PeerConnection, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        (PeerConnection::new(addr, tx), rx)
    }

    #[test]
    fn test_send_frames_message() {
        let (mut c, mut rx) = conn();
        c.send(&PeerMessage::identify(7000)).unwrap();

        let frame = rx.try_recv().unwrap();
        let len = u32::from_be_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - 4);
        let decoded = PeerMessage::decode(&frame[4..]).unwrap();
        assert_eq!(decoded.identify_port().unwrap(), 7000);
        assert_eq!(c.stats().messages_out, 1);
    }

    #[test]
    fn test_send_after_writer_stopped() {
        let (mut c, rx) = conn();
        drop(rx);
        assert!(matches!(
            c.send(&PeerMessage::barrier()),
            Err(ConnectionError::Write(_))
        ));
    }

    #[test]
    fn test_poll_read_reassembles() {
        let (mut c, _rx) = conn();
        let mut bytes = encode_frame(&PeerMessage::text("one").encode().unwrap());
        bytes.extend(encode_frame(&PeerMessage::text("two").encode().unwrap()));
        let split = bytes.len() - 3;

        let first = c.poll_read(&bytes[..split]).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].text_body().unwrap(), "one");
        assert!(matches!(c.end_of_stream(), ConnectionError::Framing(_)));

        let second = c.poll_read(&bytes[split..]).unwrap();
        assert_eq!(second[0].text_body().unwrap(), "two");
        assert_eq!(c.end_of_stream(), ConnectionError::Closed);
    }

    #[test]
    fn test_garbage_frame_is_protocol_error() {
        let (mut c, _rx) = conn();
        let err = c.poll_read(&encode_frame(&[0xFF, 0xFF, 0xFF])).unwrap_err();
        assert!(matches!(err, ConnectionError::Protocol(_)));
    }

    #[test]
    fn test_listen_addr_after_identify() {
        let (mut c, _rx) = conn();
        assert!(c.listen_addr().is_none());
        c.set_listen_port(9100);
        assert_eq!(c.listen_addr(), Some(("127.0.0.1".to_string(), 9100)));
    }
}
