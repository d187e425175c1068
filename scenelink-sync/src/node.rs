//! A replicating scene node.
//!
//! ```text
//!  TcpListener ──accept──┐
//!                        ▼
//!  reader tasks ──NetEvent──►  ┌──────── run() ────────┐  ──NodeEvent──► observer
//!                              │ SceneStore            │
//!  NodeHandle ──NodeCommand──► │ ReplicationSession    │
//!                              │ PeerRegistry          │
//!                              └───────────┬───────────┘
//!                                          ▼
//!                                   writer tasks ──► sockets
//! ```
//!
//! One task owns all scene state; socket I/O happens in per-connection
//! reader and writer tasks that talk to it over channels. Nothing is
//! shared, so there are no locks. Within a connection, contexts are
//! applied in arrival order.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use rustc_hash::FxHashMap;
use scenelink_core::{DependencyOracle, NoDependencies, PayloadCodec, SceneStore, UndoSink};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::connection::{ConnectionError, PeerConnection, PeerId};
use crate::peers::{PeerRegistry, RegistryStats};
use crate::persist::{self, LoadError, LoadOutcome, SaveError, SceneLoader};
use crate::protocol::{MessageType, PeerMessage, ProtocolError};
use crate::session::{
    encode_context, ContextError, ContextErrorKind, ReplicationSession, SessionStats,
    SnapshotTarget, Source,
};

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Save(#[from] SaveError),

    #[error("node has stopped")]
    Stopped,
}

/// What the node reports to its observer.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    PeerAccepted { id: PeerId, addr: SocketAddr },
    PeerConnected { id: PeerId, addr: SocketAddr },
    PeerRemoved { id: PeerId, reason: String },
    ContextApplied { source: Source, records: usize },
    /// A context stopped on an application error. The connection stays up.
    ContextFailed { source: Source, error: ContextError },
    Text { from: PeerId, text: String },
}

#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    pub peers: usize,
    pub registry: RegistryStats,
    pub session: SessionStats,
}

type Reply<T> = oneshot::Sender<Result<T, NodeError>>;

enum NodeCommand {
    Edit(Box<dyn FnOnce(&mut SceneStore) + Send>),
    Inspect(Box<dyn FnOnce(&SceneStore) + Send>),
    Connect { host: String, port: u16, reply: Reply<PeerId> },
    Save { path: PathBuf, full: bool, reply: Reply<usize> },
    Load { path: PathBuf, reply: Reply<LoadOutcome> },
    Send { message: PeerMessage, reply: Reply<usize> },
    Barrier(oneshot::Sender<()>),
    Stats(oneshot::Sender<NodeStats>),
    Shutdown(oneshot::Sender<()>),
}

enum NetEvent {
    Data(PeerId, Vec<u8>),
    Eof(PeerId),
    Failed(PeerId, String),
    Dialed {
        stream: TcpStream,
        reply: Option<Reply<PeerId>>,
    },
    DialFailed {
        error: ConnectionError,
        reply: Option<Reply<PeerId>>,
    },
}

// ─── Handle ─────────────────────────────────────────────────────

/// Cloneable control surface for a running node.
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<NodeCommand>,
    local_port: u16,
}

impl NodeHandle {
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    async fn send(&self, command: NodeCommand) -> Result<(), NodeError> {
        self.commands.send(command).await.map_err(|_| NodeError::Stopped)
    }

    /// Run a local edit. The events it fires are replicated to every peer.
    pub async fn edit<R, F>(&self, f: F) -> Result<R, NodeError>
    where
        R: Send + 'static,
        F: FnOnce(&mut SceneStore) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(NodeCommand::Edit(Box::new(move |store: &mut SceneStore| {
            let _ = tx.send(f(store));
        })))
        .await?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    /// Read the scene.
    pub async fn inspect<R, F>(&self, f: F) -> Result<R, NodeError>
    where
        R: Send + 'static,
        F: FnOnce(&SceneStore) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(NodeCommand::Inspect(Box::new(move |store: &SceneStore| {
            let _ = tx.send(f(store));
        })))
        .await?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    /// Connect to another node, retrying per the node's configuration.
    pub async fn connect(&self, host: impl Into<String>, port: u16) -> Result<PeerId, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::Connect {
            host: host.into(),
            port,
            reply,
        })
        .await?;
        rx.await.map_err(|_| NodeError::Stopped)?
    }

    pub async fn save_full(&self, path: impl Into<PathBuf>) -> Result<usize, NodeError> {
        self.save(path.into(), true).await
    }

    pub async fn save_incremental(&self, path: impl Into<PathBuf>) -> Result<usize, NodeError> {
        self.save(path.into(), false).await
    }

    async fn save(&self, path: PathBuf, full: bool) -> Result<usize, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::Save { path, full, reply }).await?;
        rx.await.map_err(|_| NodeError::Stopped)?
    }

    /// Load a scene file. A native load replicates to peers like a local edit.
    pub async fn load(&self, path: impl Into<PathBuf>) -> Result<LoadOutcome, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::Load {
            path: path.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| NodeError::Stopped)?
    }

    /// Send a free-text diagnostic to every peer. Returns the number of
    /// peers it was delivered to.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<usize, NodeError> {
        self.send_message(PeerMessage::text(text)).await
    }

    /// Send `message` wrapped in a named filter. Only peers that accept
    /// `filter` act on it.
    pub async fn broadcast_filtered(
        &self,
        filter: impl Into<String>,
        message: &PeerMessage,
    ) -> Result<usize, NodeError> {
        let wrapped = PeerMessage::broadcast(filter, message).map_err(ConnectionError::from)?;
        self.send_message(wrapped).await
    }

    async fn send_message(&self, message: PeerMessage) -> Result<usize, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::Send { message, reply }).await?;
        rx.await.map_err(|_| NodeError::Stopped)?
    }

    /// Announce a barrier and wait until every peer has announced one.
    pub async fn barrier(&self) -> Result<(), NodeError> {
        let (tx, rx) = oneshot::channel();
        self.send(NodeCommand::Barrier(tx)).await?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    pub async fn stats(&self) -> Result<NodeStats, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.send(NodeCommand::Stats(tx)).await?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    pub async fn peer_count(&self) -> Result<usize, NodeError> {
        Ok(self.stats().await?.peers)
    }

    /// Tell every peer we are leaving and stop the node.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        let (tx, rx) = oneshot::channel();
        self.send(NodeCommand::Shutdown(tx)).await?;
        rx.await.map_err(|_| NodeError::Stopped)
    }
}

// ─── Node ───────────────────────────────────────────────────────

pub struct SceneNode {
    listener: TcpListener,
    commands: mpsc::Receiver<NodeCommand>,
    net_rx: mpsc::UnboundedReceiver<NetEvent>,
    state: NodeState,
}

struct NodeState {
    config: NodeConfig,
    local_port: u16,
    store: SceneStore,
    session: ReplicationSession,
    registry: PeerRegistry,
    oracle: Box<dyn DependencyOracle>,
    loaders: Vec<Box<dyn SceneLoader>>,
    readers: FxHashMap<PeerId, JoinHandle<()>>,
    barrier_waiters: Vec<oneshot::Sender<()>>,
    net_tx: mpsc::UnboundedSender<NetEvent>,
    events: mpsc::Sender<NodeEvent>,
}

impl SceneNode {
    /// Bind the listener. The node does nothing until [`SceneNode::run`].
    pub async fn bind(
        config: NodeConfig,
    ) -> Result<(Self, NodeHandle, mpsc::Receiver<NodeEvent>), NodeError> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|source| NodeError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;
        let local_port = listener
            .local_addr()
            .map_err(|source| NodeError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?
            .port();
        log::info!("scene node listening on port {local_port}");

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (net_tx, net_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));

        let state = NodeState {
            local_port,
            store: SceneStore::new(),
            session: ReplicationSession::new(config.session_config()),
            registry: PeerRegistry::new(config.rendezvous),
            oracle: Box::new(NoDependencies),
            loaders: Vec::new(),
            readers: FxHashMap::default(),
            barrier_waiters: Vec::new(),
            net_tx,
            events: event_tx,
            config,
        };
        let node = Self {
            listener,
            commands: cmd_rx,
            net_rx,
            state,
        };
        let handle = NodeHandle {
            commands: cmd_tx,
            local_port,
        };
        Ok((node, handle, event_rx))
    }

    pub fn local_port(&self) -> u16 {
        self.state.local_port
    }

    pub fn with_store(mut self, store: SceneStore) -> Self {
        self.state.store = store;
        self
    }

    pub fn with_codec(mut self, codec: Box<dyn PayloadCodec>) -> Self {
        let session = std::mem::take(&mut self.state.session);
        self.state.session = session.with_codec(codec);
        self
    }

    pub fn with_oracle(mut self, oracle: Box<dyn DependencyOracle>) -> Self {
        self.state.oracle = oracle;
        self
    }

    /// Append an alternate-format loader to the fallback chain.
    pub fn with_loader(mut self, loader: Box<dyn SceneLoader>) -> Self {
        self.state.loaders.push(loader);
        self
    }

    pub fn with_undo_sink(mut self, undo: Box<dyn UndoSink>) -> Self {
        self.state.session.set_undo_sink(undo);
        self
    }

    /// Run until shut down or every handle is dropped.
    pub async fn run(mut self) -> Result<(), NodeError> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.state.on_accept(stream, addr),
                    Err(e) => log::warn!("accept failed: {e}"),
                },
                Some(event) = self.net_rx.recv() => self.state.on_net(event),
                command = self.commands.recv() => match command {
                    Some(NodeCommand::Shutdown(done)) => {
                        self.state.shutdown();
                        let _ = done.send(());
                        return Ok(());
                    }
                    Some(command) => self.state.on_command(command),
                    None => {
                        self.state.shutdown();
                        return Ok(());
                    }
                },
            }
        }
    }
}

impl NodeState {
    fn emit(&self, event: NodeEvent) {
        if let Err(e) = self.events.try_send(event) {
            log::debug!("node event dropped: {e}");
        }
    }

    // ─── Connections ────────────────────────────────────────────

    /// Spawn the socket tasks for `stream` and wrap it in a connection.
    fn attach(&mut self, stream: TcpStream, addr: SocketAddr) -> PeerConnection {
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("set_nodelay on {addr}: {e}");
        }
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = PeerConnection::new(addr, tx).with_max_frame(self.config.max_frame);
        let id = conn.id();

        tokio::spawn(write_loop(id, write_half, rx, self.net_tx.clone()));
        let reader = tokio::spawn(read_loop(
            id,
            read_half,
            self.config.read_buffer_size,
            self.net_tx.clone(),
        ));
        self.readers.insert(id, reader);
        conn
    }

    fn on_accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        log::debug!("incoming connection from {addr}");
        let records = self
            .session
            .full_snapshot(&self.store, self.oracle.as_ref(), SnapshotTarget::Peer);
        let join = PeerMessage::context(encode_context(&records));
        let conn = self.attach(stream, addr);
        let id = conn.id();
        match self.registry.accept(conn, &join) {
            Ok(id) => self.emit(NodeEvent::PeerAccepted { id, addr }),
            Err(e) => {
                log::error!("could not send scene to {addr}: {e}");
                self.forget(id, e.to_string());
            }
        }
    }

    fn dial(&self, host: String, port: u16, reply: Option<Reply<PeerId>>) {
        let net = self.net_tx.clone();
        let attempts = self.config.connect_attempts;
        let delay = self.config.connect_retry_delay;
        tokio::spawn(async move {
            let addr = format!("{host}:{port}");
            let event = match connect_with_retry(&addr, attempts, delay).await {
                Ok(stream) => NetEvent::Dialed { stream, reply },
                Err(error) => NetEvent::DialFailed { error, reply },
            };
            let _ = net.send(event);
        });
    }

    fn on_dialed(&mut self, stream: TcpStream, reply: Option<Reply<PeerId>>) {
        let result: Result<PeerId, NodeError> = match stream.peer_addr() {
            Ok(addr) => {
                let conn = self.attach(stream, addr);
                let id = conn.id();
                match self.registry.add_connected(conn, self.local_port) {
                    Ok(id) => {
                        self.emit(NodeEvent::PeerConnected { id, addr });
                        Ok(id)
                    }
                    Err(e) => {
                        self.forget(id, e.to_string());
                        Err(e.into())
                    }
                }
            }
            Err(e) => Err(ConnectionError::Read(e.to_string()).into()),
        };
        match reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    log::warn!("gossiped connection failed: {e}");
                }
            }
        }
    }

    /// Remove a peer. Later events for the same id find nothing.
    fn remove_peer(&mut self, id: PeerId, reason: impl Into<String>) {
        if self.registry.remove(id).is_some() {
            self.forget(id, reason.into());
        }
    }

    /// Stop the reader for a connection the registry no longer holds.
    fn forget(&mut self, id: PeerId, reason: String) {
        if let Some(reader) = self.readers.remove(&id) {
            reader.abort();
        }
        log::info!("peer {id} gone: {reason}");
        self.emit(NodeEvent::PeerRemoved { id, reason });
        self.check_barrier();
    }

    // ─── Inbound ────────────────────────────────────────────────

    fn on_net(&mut self, event: NetEvent) {
        match event {
            NetEvent::Data(id, bytes) => {
                let Some(conn) = self.registry.get_mut(id) else {
                    return;
                };
                let messages = match conn.poll_read(&bytes) {
                    Ok(messages) => messages,
                    Err(e) => {
                        log::error!("peer {id}: {e}");
                        self.remove_peer(id, e.to_string());
                        return;
                    }
                };
                for msg in messages {
                    if !self.registry.contains(id) {
                        break;
                    }
                    if let Err(e) = self.on_message(id, msg) {
                        log::error!("peer {id}: {e}");
                        self.remove_peer(id, e.to_string());
                    }
                }
                self.flush_outbound();
            }
            NetEvent::Eof(id) => {
                let Some(conn) = self.registry.get(id) else {
                    return;
                };
                let reason = conn.end_of_stream();
                if reason != ConnectionError::Closed {
                    log::error!("peer {id}: {reason}");
                }
                self.remove_peer(id, reason.to_string());
            }
            NetEvent::Failed(id, reason) => {
                if self.registry.contains(id) {
                    log::error!("peer {id}: {reason}");
                }
                self.remove_peer(id, reason);
            }
            NetEvent::Dialed { stream, reply } => self.on_dialed(stream, reply),
            NetEvent::DialFailed { error, reply } => match reply {
                Some(reply) => {
                    let _ = reply.send(Err(error.into()));
                }
                None => log::warn!("{error}"),
            },
        }
    }

    fn on_message(&mut self, from: PeerId, msg: PeerMessage) -> Result<(), ConnectionError> {
        match msg.msg_type {
            MessageType::Context => {
                let source = Source::Peer(from);
                let result = self
                    .session
                    .apply_context(&mut self.store, msg.context_body()?, source);
                match result {
                    Ok(report) => self.emit(NodeEvent::ContextApplied {
                        source,
                        records: report.records,
                    }),
                    Err(error) => {
                        if let ContextErrorKind::Protocol(e) = &error.kind {
                            return Err(e.clone().into());
                        }
                        self.emit(NodeEvent::ContextFailed { source, error });
                    }
                }
            }
            MessageType::Identify => {
                let hints = self.registry.handle_identify(from, msg.identify_port()?)?;
                if hints > 0 {
                    log::info!("sent {hints} peer addresses to {from}");
                }
            }
            MessageType::AddConnection => {
                let hint = msg.hint()?;
                if self.registry.knows(&hint.host, hint.port) {
                    log::debug!("already connected to {}:{}", hint.host, hint.port);
                } else {
                    log::info!("connecting to gossiped peer {}:{}", hint.host, hint.port);
                    self.dial(hint.host, hint.port, None);
                }
            }
            MessageType::Text => {
                let text = msg.text_body()?.to_string();
                log::info!("peer {from}: {text}");
                self.emit(NodeEvent::Text { from, text });
            }
            MessageType::Broadcast => {
                let (filter, inner) = msg.filtered()?;
                if self.config.accepts_filter(&filter) {
                    return self.on_message(from, inner);
                }
                log::debug!("ignoring broadcast for filter '{filter}'");
            }
            MessageType::Barrier => {
                self.registry.record_barrier();
                self.check_barrier();
            }
            MessageType::Quit => self.remove_peer(from, "peer quit"),
        }
        Ok(())
    }

    // ─── Outbound ───────────────────────────────────────────────

    /// Pump pending scene events and send the resulting contexts.
    fn flush_outbound(&mut self) {
        self.session.pump(&mut self.store);
        for body in self.session.take_outbound() {
            if let Err(e) = self.send_to_all(&PeerMessage::context(body)) {
                log::error!("could not encode context: {e}");
            }
        }
    }

    /// Broadcast `msg`, forgetting peers whose send failed. Returns the
    /// number of peers it reached.
    fn send_to_all(&mut self, msg: &PeerMessage) -> Result<usize, ProtocolError> {
        let report = self.registry.broadcast(msg)?;
        for id in report.removed {
            self.forget(id, "send failed".into());
        }
        Ok(report.delivered)
    }

    fn check_barrier(&mut self) {
        if self.barrier_waiters.is_empty() || !self.registry.barrier_reached() {
            return;
        }
        self.registry.release_barrier();
        for waiter in self.barrier_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    // ─── Commands ───────────────────────────────────────────────

    fn on_command(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::Edit(f) => {
                f(&mut self.store);
                self.flush_outbound();
            }
            NodeCommand::Inspect(f) => f(&self.store),
            NodeCommand::Connect { host, port, reply } => self.dial(host, port, Some(reply)),
            NodeCommand::Save { path, full, reply } => {
                let result = if full {
                    persist::save_full(&path, &self.store, &self.session, self.oracle.as_ref())
                } else {
                    persist::save_incremental(&path, &self.store, &self.session)
                };
                let _ = reply.send(result.map_err(NodeError::from));
            }
            NodeCommand::Load { path, reply } => {
                let result = persist::load(&path, &mut self.store, &mut self.session, &self.loaders);
                self.flush_outbound();
                let _ = reply.send(result.map_err(NodeError::from));
            }
            NodeCommand::Send { message, reply } => {
                let result = self
                    .send_to_all(&message)
                    .map_err(|e| NodeError::from(ConnectionError::from(e)));
                let _ = reply.send(result);
            }
            NodeCommand::Barrier(done) => {
                match self.registry.announce_barrier() {
                    Ok(report) => {
                        for id in report.removed {
                            self.forget(id, "send failed".into());
                        }
                    }
                    Err(e) => log::error!("could not announce barrier: {e}"),
                }
                self.barrier_waiters.push(done);
                self.check_barrier();
            }
            NodeCommand::Stats(reply) => {
                let _ = reply.send(NodeStats {
                    peers: self.registry.len(),
                    registry: self.registry.stats().clone(),
                    session: self.session.stats().clone(),
                });
            }
            NodeCommand::Shutdown(done) => {
                self.shutdown();
                let _ = done.send(());
            }
        }
    }

    fn shutdown(&mut self) {
        log::info!("shutting down, notifying {} peers", self.registry.len());
        if let Err(e) = self.send_to_all(&PeerMessage::quit()) {
            log::error!("could not encode quit: {e}");
        }
        for id in self.registry.ids() {
            self.remove_peer(id, "shutting down");
        }
    }
}

// ─── Socket tasks ───────────────────────────────────────────────

/// Connect to `addr`, retrying up to `attempts` times.
pub async fn connect_with_retry(
    addr: &str,
    attempts: u32,
    delay: Duration,
) -> Result<TcpStream, ConnectionError> {
    let attempts = attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                log::debug!("connect to {addr} failed (attempt {attempt}/{attempts}): {e}");
                last_error = e.to_string();
            }
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    Err(ConnectionError::Refused {
        addr: addr.to_string(),
        attempts,
        reason: last_error,
    })
}

async fn read_loop(
    id: PeerId,
    mut reader: OwnedReadHalf,
    buffer_size: usize,
    net: mpsc::UnboundedSender<NetEvent>,
) {
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let event = match reader.read(&mut buf).await {
            Ok(0) => NetEvent::Eof(id),
            Ok(n) => NetEvent::Data(id, buf[..n].to_vec()),
            Err(e) => NetEvent::Failed(id, ConnectionError::Read(e.to_string()).to_string()),
        };
        let last = !matches!(event, NetEvent::Data(..));
        if net.send(event).is_err() || last {
            return;
        }
    }
}

async fn write_loop(
    id: PeerId,
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    net: mpsc::UnboundedSender<NetEvent>,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            log::warn!("write to peer {id} failed: {e}");
            let _ = net.send(NetEvent::Failed(id, ConnectionError::Write(e.to_string()).to_string()));
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_with_retry_gives_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect_with_retry(&format!("127.0.0.1:{port}"), 3, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Refused { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_edit_and_inspect_without_peers() {
        let (node, handle, _events) = SceneNode::bind(NodeConfig::for_testing()).await.unwrap();
        let task = tokio::spawn(node.run());

        handle
            .edit(|store| store.set_var("answer", "42"))
            .await
            .unwrap();
        let value = handle
            .inspect(|store| store.var("answer").map(str::to_string))
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("42"));
        assert_eq!(handle.peer_count().await.unwrap(), 0);

        handle.barrier().await.unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert!(matches!(handle.peer_count().await, Err(NodeError::Stopped)));
    }
}
