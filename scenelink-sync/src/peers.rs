//! The set of active peer connections.
//!
//! ```text
//!            ┌──────────── PeerRegistry ────────────┐
//! broadcast ─┤ encode once ─► conn A ─► writer task │
//!            │              ─► conn B ─► writer task │
//!            │              ─► conn C ✗ (removed)    │
//!            └───────────────────────────────────────┘
//! ```
//!
//! Connections are kept in join order. A connection whose send fails is
//! removed during the same broadcast; removal happens exactly once, and
//! later events for a removed id find nothing.
//!
//! One node per mesh is the rendezvous peer. When a newcomer identifies
//! itself there, the rendezvous replies with the listening address of every
//! other known peer so the newcomer can connect to them directly.

use indexmap::IndexMap;

use crate::connection::{ConnectionError, PeerConnection, PeerId};
use crate::framing::encode_frame;
use crate::protocol::{PeerMessage, ProtocolError};

#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub accepted: u64,
    pub connected: u64,
    pub removed: u64,
    pub broadcasts: u64,
    pub send_failures: u64,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Connections removed because their send failed
    pub removed: Vec<PeerId>,
}

#[derive(Debug)]
pub struct PeerRegistry {
    peers: IndexMap<PeerId, PeerConnection>,
    rendezvous: bool,
    barriers_seen: usize,
    stats: RegistryStats,
}

impl PeerRegistry {
    pub fn new(rendezvous: bool) -> Self {
        Self {
            peers: IndexMap::new(),
            rendezvous,
            barriers_seen: 0,
            stats: RegistryStats::default(),
        }
    }

    pub fn is_rendezvous(&self) -> bool {
        self.rendezvous
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerConnection> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut PeerConnection> {
        self.peers.get_mut(&id)
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    /// Add an inbound connection and send it the join context.
    pub fn accept(&mut self, conn: PeerConnection, join: &PeerMessage) -> Result<PeerId, ConnectionError> {
        let id = self.insert(conn);
        self.stats.accepted += 1;
        if let Err(e) = self.send_to(id, join) {
            self.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Add an outbound connection and identify ourselves to it.
    pub fn add_connected(&mut self, conn: PeerConnection, own_port: u16) -> Result<PeerId, ConnectionError> {
        let id = self.insert(conn);
        self.stats.connected += 1;
        if let Err(e) = self.send_to(id, &PeerMessage::identify(own_port)) {
            self.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    fn insert(&mut self, conn: PeerConnection) -> PeerId {
        let id = conn.id();
        log::info!("peer {id} added ({})", conn.remote());
        self.peers.insert(id, conn);
        id
    }

    /// Remove a connection. Returns it the first time only.
    pub fn remove(&mut self, id: PeerId) -> Option<PeerConnection> {
        let conn = self.peers.shift_remove(&id)?;
        self.stats.removed += 1;
        log::debug!("peer {id} at {} dropped from registry", conn.remote());
        Some(conn)
    }

    pub fn send_to(&mut self, id: PeerId, msg: &PeerMessage) -> Result<(), ConnectionError> {
        self.peers
            .get_mut(&id)
            .ok_or(ConnectionError::Closed)?
            .send(msg)
    }

    /// Send `msg` to every connection, dropping those that fail.
    pub fn broadcast(&mut self, msg: &PeerMessage) -> Result<BroadcastReport, ProtocolError> {
        let frame = encode_frame(&msg.encode()?);
        self.stats.broadcasts += 1;

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for (id, conn) in self.peers.iter_mut() {
            match conn.send_frame(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    log::warn!("send to peer {id} failed: {e}");
                    failed.push(*id);
                }
            }
        }
        for id in failed {
            self.stats.send_failures += 1;
            if self.remove(id).is_some() {
                report.removed.push(id);
            }
        }
        Ok(report)
    }

    /// Record the listening port of `from`; the rendezvous peer answers
    /// with hints for every other peer whose address is known. Returns the
    /// number of hints sent.
    pub fn handle_identify(&mut self, from: PeerId, port: u16) -> Result<usize, ConnectionError> {
        let conn = self.peers.get_mut(&from).ok_or(ConnectionError::Closed)?;
        conn.set_listen_port(port);
        if !self.rendezvous {
            return Ok(0);
        }

        let hints: Vec<(String, u16)> = self
            .peers
            .values()
            .filter(|c| c.id() != from)
            .filter_map(PeerConnection::listen_addr)
            .collect();
        for (host, port) in &hints {
            log::debug!("gossip to {from}: {host}:{port}");
            self.send_to(from, &PeerMessage::add_connection(host.clone(), *port)?)?;
        }
        Ok(hints.len())
    }

    /// Whether a connection to `host:port` already exists.
    pub fn knows(&self, host: &str, port: u16) -> bool {
        self.peers.values().any(|c| {
            c.listen_addr().is_some_and(|(h, p)| h == host && p == port)
                || (c.remote().ip().to_string() == host && c.remote().port() == port)
        })
    }

    // ─── Barrier ────────────────────────────────────────────────

    /// Announce a barrier to every peer.
    pub fn announce_barrier(&mut self) -> Result<BroadcastReport, ProtocolError> {
        self.broadcast(&PeerMessage::barrier())
    }

    /// Count a barrier marker received from a peer.
    pub fn record_barrier(&mut self) {
        self.barriers_seen += 1;
    }

    /// Whether every current peer has announced the barrier.
    pub fn barrier_reached(&self) -> bool {
        self.barriers_seen >= self.peers.len()
    }

    /// Consume one round of barrier markers.
    pub fn release_barrier(&mut self) {
        self.barriers_seen = self.barriers_seen.saturating_sub(self.peers.len());
    }
}
