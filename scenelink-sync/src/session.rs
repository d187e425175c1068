//! Replication policy: scene events out, received records in.
//!
//! ```text
//!   local edit ──► SceneStore ──► SceneEvent ──► pump() ──► outbox ──► peers
//!                      ▲                           │
//!                      │                     suppressed while
//!   peer context ──► apply_context() ─────── APPLYING or marked
//! ```
//!
//! Applying a received record fires the same events a local edit would.
//! Two guards keep those from being sent back out:
//!
//! - the session mode is `Applying` for the whole of a peer context;
//! - a per-object marker is held while a construction record runs, which
//!   covers events fired by payload codecs on that object's behalf.
//!
//! Contexts loaded from files are applied in `Idle` mode without markers,
//! so a scene loaded from disk reaches connected peers like a local edit.

use rustc_hash::FxHashSet;
use scenelink_core::{
    DependencyOracle, ObjectPatch, OpaquePayload, PayloadCodec, SceneEvent, SceneObject,
    SceneStore, StoreError, UndoSink,
};
use thiserror::Error;

use crate::catalog::CommandCatalog;
use crate::connection::PeerId;
use crate::protocol::ProtocolError;
use crate::record::{tags, Record};
use crate::text::BlockReader;

/// Where a context came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Peer(PeerId),
    File,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Peer(id) => write!(f, "peer {id}"),
            Self::File => write!(f, "file"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Idle,
    Applying,
}

/// Destination of a full-scene snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotTarget {
    Peer,
    /// Files also carry I/O state
    File,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Send camera changes to peers
    pub distribute_camera: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            distribute_camera: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub contexts_applied: u64,
    pub contexts_failed: u64,
    pub records_applied: u64,
    pub echoes_suppressed: u64,
    pub contexts_produced: u64,
}

/// Result of applying one context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextReport {
    /// Records applied, not counting `DONE`
    pub records: usize,
    /// Events that were not replicated because they were echoes
    pub suppressed: usize,
    pub camera_loaded: bool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextErrorKind {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Apply(#[from] StoreError),
}

/// A context that stopped part-way. Records before `index` stay applied.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("context aborted at record {index} ({tag}, line {line}): {kind}")]
pub struct ContextError {
    pub index: usize,
    pub line: usize,
    pub tag: String,
    #[source]
    pub kind: ContextErrorKind,
}

impl ContextError {
    fn new(index: usize, line: usize, tag: &str, kind: impl Into<ContextErrorKind>) -> Self {
        Self {
            index,
            line,
            tag: tag.to_string(),
            kind: kind.into(),
        }
    }

    /// Protocol failures poison the channel; application failures only
    /// abort the context.
    pub fn is_protocol(&self) -> bool {
        matches!(self.kind, ContextErrorKind::Protocol(_))
    }
}

/// Join `records` into a context body, terminating it with `DONE`.
pub fn encode_context(records: &[Record]) -> String {
    let mut body = String::new();
    for record in records {
        body.push_str(&record.encode());
        body.push('\n');
    }
    if !records.last().is_some_and(Record::is_done) {
        body.push_str(&Record::Done.encode());
        body.push('\n');
    }
    body
}

pub struct ReplicationSession {
    config: SessionConfig,
    catalog: CommandCatalog,
    codec: Box<dyn PayloadCodec>,
    undo: Option<Box<dyn UndoSink>>,
    mode: SessionMode,
    /// Set while any received context (peer or file) is being applied
    inbound: Option<Source>,
    markers: FxHashSet<String>,
    outbox: Vec<Vec<Record>>,
    stats: SessionStats,
}

impl Default for ReplicationSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl ReplicationSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            catalog: CommandCatalog::standard(),
            codec: Box::new(OpaquePayload),
            undo: None,
            mode: SessionMode::Idle,
            inbound: None,
            markers: FxHashSet::default(),
            outbox: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn with_codec(mut self, codec: Box<dyn PayloadCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_catalog(mut self, catalog: CommandCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn set_undo_sink(&mut self, undo: Box<dyn UndoSink>) {
        self.undo = Some(undo);
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn is_marked(&self, name: &str) -> bool {
        self.markers.contains(name)
    }

    // ─── Outbound ───────────────────────────────────────────────

    /// Turn queued store events into outbound contexts.
    pub fn pump(&mut self, store: &mut SceneStore) {
        for event in store.take_events() {
            if self.mode == SessionMode::Applying
                || event.subject().is_some_and(|n| self.markers.contains(n))
            {
                log::debug!("suppressed echo of {event:?}");
                self.stats.echoes_suppressed += 1;
                continue;
            }
            if self.inbound.is_none() {
                if let Some(undo) = self.undo.as_mut() {
                    undo.record(&event);
                }
            }
            if let Some(records) = self.outbound_records(store, &event) {
                self.outbox.push(records);
                self.stats.contexts_produced += 1;
            }
        }
    }

    /// Drain pending outbound contexts as encoded bodies.
    pub fn take_outbound(&mut self) -> Vec<String> {
        self.outbox
            .drain(..)
            .map(|records| encode_context(&records))
            .collect()
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbox.is_empty()
    }

    fn outbound_records(&self, store: &SceneStore, event: &SceneEvent) -> Option<Vec<Record>> {
        if let Some(name) = event.subject().filter(|n| self.is_reserved(n)) {
            log::warn!("'{name}' collides with a record tag, not replicating {event:?}");
            return None;
        }
        if let SceneEvent::Destroyed { name, networked } = event {
            return (*networked).then(|| vec![Record::Destroy { name: name.clone() }]);
        }

        let object = match event.subject() {
            Some(name) => {
                let object = store.get(name).filter(|o| o.exists())?;
                if !object.networked {
                    log::trace!("{name} is not networked, not replicating {event:?}");
                    return None;
                }
                Some(object)
            }
            None => None,
        };
        let name = || object.map(|o| o.name().to_string()).unwrap_or_default();

        let record = match event {
            SceneEvent::Created(_) => {
                let object = object?;
                return Some(vec![
                    self.send_geom(object),
                    Record::Create { name: name() },
                ]);
            }
            SceneEvent::Displayed(_) => Record::Display { name: name(), on: true },
            SceneEvent::Undisplayed(_) => Record::Display { name: name(), on: false },
            SceneEvent::Recolored(_) => Record::Color {
                name: name(),
                color: object?.color,
            },
            SceneEvent::Transformed(_) => Record::Xform {
                name: name(),
                xform: object?.xform,
            },
            SceneEvent::TransparencyChanged(_) => Record::Transp {
                name: name(),
                value: object?.transparency,
            },
            SceneEvent::TextureChanged(_) => Record::Texture {
                name: name(),
                texture: object?.texture.clone(),
            },
            SceneEvent::GeometryChanged(_) => Record::UpdateGeom {
                name: name(),
                patch: ObjectPatch {
                    payload: Some(self.codec.encode(object?)),
                    ..ObjectPatch::default()
                },
            },
            SceneEvent::Grabbed { grabbed, .. } => Record::Grab {
                name: name(),
                grab: *grabbed,
            },
            SceneEvent::ObjectVarChanged { key, .. } => Record::Hash {
                name: name(),
                key: key.clone(),
                value: object?.vars.get(key)?.clone(),
            },
            SceneEvent::VarChanged(key) => Record::Var {
                key: key.clone(),
                value: store.var(key)?.to_string(),
            },
            SceneEvent::CameraMoved => {
                if !self.config.distribute_camera {
                    return None;
                }
                Record::Camera(store.camera().clone())
            }
            SceneEvent::RenderModeChanged => Record::RenderMode(store.view().render_mode.clone()),
            SceneEvent::ClipChanged => Record::ClipInfo(store.view().clip.clone()),
            SceneEvent::Destroyed { .. } => return None,
        };
        Some(vec![record])
    }

    /// Object names that would be read back as a record tag.
    fn is_reserved(&self, name: &str) -> bool {
        self.catalog.contains(name)
    }

    fn send_geom(&self, object: &SceneObject) -> Record {
        let mut wire = object.clone();
        wire.payload = self.codec.encode(object);
        Record::SendGeom(Box::new(wire))
    }

    // ─── Snapshots ──────────────────────────────────────────────

    /// Records that rebuild the scene from empty.
    ///
    /// Every networked, savable live object that is displayed (or hidden
    /// but depended upon) gets its full state followed by its construction,
    /// in registry order. Hidden ones are then undisplayed, and the global
    /// state blocks follow.
    pub fn full_snapshot(
        &self,
        store: &SceneStore,
        oracle: &dyn DependencyOracle,
        target: SnapshotTarget,
    ) -> Vec<Record> {
        let mut records = Vec::new();
        let mut hidden = Vec::new();
        for object in store.registry().live() {
            if !(object.networked && object.savable) || self.is_reserved(object.name()) {
                continue;
            }
            let name = object.name();
            let displayed = store.is_displayed(name);
            if !displayed && !oracle.is_depended_upon(store, name) {
                continue;
            }
            records.push(self.send_geom(object));
            records.push(Record::Create {
                name: name.to_string(),
            });
            if !displayed {
                hidden.push(name.to_string());
            }
        }
        records.extend(
            hidden
                .into_iter()
                .map(|name| Record::Display { name, on: false }),
        );
        if target == SnapshotTarget::File {
            records.push(Record::Io(store.io().clone()));
        }
        records.push(Record::Camera(store.camera().clone()));
        records.push(Record::Window(store.window().clone()));
        records.push(Record::View(store.view().clone()));
        records.push(Record::Done);
        records
    }

    /// Records that bring an already-synced replica up to date.
    pub fn incremental(&self, store: &SceneStore) -> Vec<Record> {
        let mut records: Vec<Record> = store
            .registry()
            .live()
            .filter(|o| o.networked && o.savable && store.is_displayed(o.name()))
            .filter(|o| !self.is_reserved(o.name()))
            .map(|o| {
                let mut patch = ObjectPatch::from_object(o);
                patch.payload = Some(self.codec.encode(o));
                Record::UpdateGeom {
                    name: o.name().to_string(),
                    patch,
                }
            })
            .collect();
        records.push(Record::Camera(store.camera().clone()));
        records.push(Record::Done);
        records
    }

    // ─── Inbound ────────────────────────────────────────────────

    /// Decode and apply one context body.
    ///
    /// Display changes are buffered for the duration so observers see the
    /// context's effect at once. On error the context stops at the failing
    /// record; earlier records are not rolled back.
    pub fn apply_context(
        &mut self,
        store: &mut SceneStore,
        body: &str,
        source: Source,
    ) -> Result<ContextReport, ContextError> {
        // Anything queued before this point is a local edit.
        self.pump(store);

        let suppressed_before = self.stats.echoes_suppressed;
        self.inbound = Some(source);
        if matches!(source, Source::Peer(_)) {
            self.mode = SessionMode::Applying;
        }
        store.buffer_display();

        let result = self.apply_records(store, body, source);

        store.flush_display();
        self.pump(store);
        self.mode = SessionMode::Idle;
        self.inbound = None;

        match result {
            Ok(mut report) => {
                report.suppressed = (self.stats.echoes_suppressed - suppressed_before) as usize;
                self.stats.contexts_applied += 1;
                log::debug!("applied {} records from {source}", report.records);
                Ok(report)
            }
            Err(e) => {
                self.stats.contexts_failed += 1;
                log::warn!("context from {source} aborted: {e}");
                Err(e)
            }
        }
    }

    fn apply_records(
        &mut self,
        store: &mut SceneStore,
        body: &str,
        source: Source,
    ) -> Result<ContextReport, ContextError> {
        let mut reader = BlockReader::new(body);
        let mut report = ContextReport::default();
        let mark_constructions = matches!(source, Source::Peer(_));

        loop {
            let index = report.records;
            let block = match reader.next_block() {
                Ok(Some(block)) => block,
                Ok(None) => {
                    return Err(ContextError::new(
                        index,
                        reader.line(),
                        tags::DONE,
                        ProtocolError::MissingSentinel,
                    ));
                }
                Err(e) => return Err(ContextError::new(index, reader.line(), "?", e)),
            };
            let tag = block.tag().to_string();
            let record = self
                .catalog
                .decode(&block.fields, store)
                .map_err(|e| ContextError::new(index, block.line, &tag, e))?;
            if record.is_done() {
                return Ok(report);
            }
            if let Record::SendGeom(object) = &record {
                if self.is_reserved(object.name()) {
                    let reserved = StoreError::ReservedName(object.name().to_string());
                    return Err(ContextError::new(index, block.line, &tag, reserved));
                }
            }
            log::trace!("{source}: applying {tag} (record {index}, line {})", block.line);

            if matches!(record, Record::Camera(_)) {
                report.camera_loaded = true;
            }
            let marker = record
                .constructs()
                .filter(|_| mark_constructions)
                .map(str::to_string);
            if let Some(name) = &marker {
                self.markers.insert(name.clone());
            }
            let result = record.apply(store, self.codec.as_ref());
            self.pump(store);
            if let Some(name) = &marker {
                self.markers.remove(name);
            }
            result.map_err(|e| ContextError::new(index, block.line, &tag, e))?;

            self.stats.records_applied += 1;
            report.records += 1;
        }
    }

    /// Hold the construction marker for `name` while `f` runs. Events `f`
    /// fires about `name` are treated as echoes.
    pub fn while_marked<R>(
        &mut self,
        store: &mut SceneStore,
        name: &str,
        f: impl FnOnce(&mut SceneStore) -> R,
    ) -> R {
        self.markers.insert(name.to_string());
        let out = f(store);
        self.pump(store);
        self.markers.remove(name);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenelink_core::{Camera, Color, FixedDependencies, NoDependencies, ObjectKind, Transform};

    fn peer() -> Source {
        Source::Peer(PeerId::new())
    }

    fn tags_of(records: &[Record]) -> Vec<String> {
        records.iter().map(|r| r.tag().to_string()).collect()
    }

    #[test]
    fn test_local_create_produces_send_geom_then_create() {
        let mut store = SceneStore::new();
        let mut session = ReplicationSession::default();
        store.add_object(SceneObject::geometry("cube1")).unwrap();
        session.pump(&mut store);

        let out = session.take_outbound();
        assert_eq!(out.len(), 2, "created and displayed are separate contexts");
        assert!(out[0].starts_with("SEND_GEOM { name cube1"));
        assert!(out[0].contains("\nCREATE { name cube1 }\nDONE { }\n"));
        assert_eq!(out[1], "DISPLAY { name cube1 on 1 }\nDONE { }\n");
    }

    #[test]
    fn test_non_networked_object_not_replicated() {
        let mut store = SceneStore::new();
        let mut session = ReplicationSession::default();
        store
            .add_object(SceneObject::geometry("local").with_networked(false))
            .unwrap();
        store.set_color("local", Color::BLACK).unwrap();
        store.destroy("local").unwrap();
        session.pump(&mut store);
        assert!(!session.has_outbound());
    }

    #[test]
    fn test_no_echo_while_applying_peer_context() {
        let mut store = SceneStore::new();
        let mut session = ReplicationSession::default();
        let body = "SEND_GEOM { name a class mesh kind geometry networked 1 savable 1 \
                    color { 1 0 0 } xform { 1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1 } payload AQ== }\n\
                    CREATE { name a }\nCOLOR { name a color { 0 0 1 } }\nDONE { }\n";

        let report = session.apply_context(&mut store, body, peer()).unwrap();
        assert_eq!(report.records, 3);
        assert!(report.suppressed >= 3);
        assert!(!session.has_outbound());
        assert_eq!(session.mode(), SessionMode::Idle);
        assert!(!session.is_marked("a"));
        assert_eq!(store.get("a").unwrap().color, Color::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_edits_after_apply_replicate_again() {
        let mut store = SceneStore::new();
        let mut session = ReplicationSession::default();
        let snapshot = {
            let mut origin = SceneStore::new();
            origin.add_object(SceneObject::geometry("a")).unwrap();
            encode_context(&ReplicationSession::default().full_snapshot(
                &origin,
                &NoDependencies,
                SnapshotTarget::Peer,
            ))
        };
        session.apply_context(&mut store, &snapshot, peer()).unwrap();

        store.set_xform("a", Transform::scale(3.0)).unwrap();
        session.pump(&mut store);
        let out = session.take_outbound();
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("XFORM { name a xform { 3 0 0 0"));
    }

    #[test]
    fn test_file_source_replicates_loaded_objects() {
        let mut store = SceneStore::new();
        let mut session = ReplicationSession::default();
        let mut origin = SceneStore::new();
        origin.add_object(SceneObject::geometry("a")).unwrap();
        let body = encode_context(&session.full_snapshot(&origin, &NoDependencies, SnapshotTarget::File));

        session.apply_context(&mut store, &body, Source::File).unwrap();
        let out = session.take_outbound();
        assert!(out.iter().any(|c| c.contains("CREATE { name a }")));
        assert!(out.iter().any(|c| c.starts_with("DISPLAY { name a on 1 }")));
    }

    #[test]
    fn test_undo_sink_sees_local_edits_only() {
        struct Shared(std::sync::Arc<std::sync::Mutex<Vec<SceneEvent>>>);
        impl UndoSink for Shared {
            fn record(&mut self, event: &SceneEvent) {
                self.0.lock().unwrap().push(event.clone());
            }
        }
        let log = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut session = ReplicationSession::default();
        session.set_undo_sink(Box::new(Shared(log.clone())));
        let mut store = SceneStore::new();

        session
            .apply_context(&mut store, "VAR { key k value remote }\nDONE { }\n", peer())
            .unwrap();
        session
            .apply_context(&mut store, "VAR { key k value disk }\nDONE { }\n", Source::File)
            .unwrap();
        assert!(log.lock().unwrap().is_empty());

        store.set_var("k", "local");
        session.pump(&mut store);
        assert_eq!(*log.lock().unwrap(), vec![SceneEvent::VarChanged("k".into())]);
    }

    #[test]
    fn test_marker_suppresses_codec_events_while_idle() {
        let mut store = SceneStore::new();
        store.add_object(SceneObject::geometry("a")).unwrap();
        store.add_object(SceneObject::geometry("b")).unwrap();
        let mut session = ReplicationSession::default();
        session.pump(&mut store);
        session.take_outbound();

        session.while_marked(&mut store, "a", |store| {
            store.set_payload("a", vec![1]).unwrap();
            store.set_payload("b", vec![2]).unwrap();
        });
        let out = session.take_outbound();
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("UPDATE_GEOM { name b"));
    }

    #[test]
    fn test_full_snapshot_ordering() {
        let mut store = SceneStore::new();
        for name in ["a", "b", "c", "d"] {
            store.add_object(SceneObject::geometry(name)).unwrap();
        }
        store.undisplay("b").unwrap();
        store.undisplay("c").unwrap();
        store
            .add_object(SceneObject::geometry("scratch").with_savable(false))
            .unwrap();
        let session = ReplicationSession::default();
        let oracle = FixedDependencies::new(["b"]);

        let records = session.full_snapshot(&store, &oracle, SnapshotTarget::Peer);
        assert_eq!(
            tags_of(&records),
            vec![
                "SEND_GEOM", "CREATE", "SEND_GEOM", "CREATE", "SEND_GEOM", "CREATE", "DISPLAY",
                "CHNG_CAM", "CHNG_WIN", "CHNG_VIEW", "DONE",
            ]
        );
        assert_eq!(records[1], Record::Create { name: "a".into() });
        assert_eq!(records[3], Record::Create { name: "b".into() });
        assert_eq!(records[5], Record::Create { name: "d".into() });
        assert_eq!(records[6], Record::Display { name: "b".into(), on: false });

        let to_file = session.full_snapshot(&store, &oracle, SnapshotTarget::File);
        assert!(to_file.iter().any(|r| r.tag() == tags::CHNG_IO));
    }

    #[test]
    fn test_incremental_covers_displayed_only() {
        let mut store = SceneStore::new();
        store.add_object(SceneObject::geometry("shown")).unwrap();
        store.add_object(SceneObject::geometry("hidden")).unwrap();
        store.undisplay("hidden").unwrap();

        let records = ReplicationSession::default().incremental(&store);
        assert_eq!(tags_of(&records), vec!["UPDATE_GEOM", "CHNG_CAM", "DONE"]);
        assert!(matches!(&records[0], Record::UpdateGeom { name, .. } if name == "shown"));
    }

    #[test]
    fn test_incremental_with_element_applies_on_replica() {
        let mut origin = SceneStore::new();
        origin
            .add_object(SceneObject::new("label", "text", ObjectKind::Element).with_payload(vec![4]))
            .unwrap();
        origin.add_object(SceneObject::geometry("cube")).unwrap();
        let session = ReplicationSession::default();
        let full = encode_context(&session.full_snapshot(&origin, &NoDependencies, SnapshotTarget::File));

        let mut replica = SceneStore::new();
        let mut replica_session = ReplicationSession::default();
        replica_session.apply_context(&mut replica, &full, Source::File).unwrap();

        origin.set_payload("label", vec![5, 6]).unwrap();
        origin.set_color("cube", Color::BLACK).unwrap();
        origin.set_camera(Camera {
            focal: 12.0,
            ..Camera::default()
        });
        let delta = encode_context(&session.incremental(&origin));
        let report = replica_session
            .apply_context(&mut replica, &delta, Source::File)
            .unwrap();

        assert!(report.camera_loaded);
        assert_eq!(replica.get("label").unwrap().payload, vec![5, 6]);
        assert_eq!(replica.get("cube").unwrap().color, Color::BLACK);
        assert_eq!(replica.camera().focal, 12.0);
    }

    #[test]
    fn test_file_reload_replicates_changed_attributes() {
        let mut store = SceneStore::new();
        let mut session = ReplicationSession::default();
        store.add_object(SceneObject::geometry("a")).unwrap();
        session.pump(&mut store);
        session.take_outbound();

        let mut on_disk = SceneStore::new();
        on_disk
            .add_object(SceneObject::geometry("a").with_color(Color::BLACK))
            .unwrap();
        let body = encode_context(&session.full_snapshot(&on_disk, &NoDependencies, SnapshotTarget::File));
        session.apply_context(&mut store, &body, Source::File).unwrap();

        assert_eq!(store.get("a").unwrap().color, Color::BLACK);
        let out = session.take_outbound();
        assert!(
            out.iter().any(|c| c.starts_with("COLOR { name a color { 0 0 0 } }")),
            "{out:?}"
        );

        // The same reload from a peer is an echo.
        on_disk.set_color("a", Color::WHITE).unwrap();
        let body = encode_context(&session.full_snapshot(&on_disk, &NoDependencies, SnapshotTarget::Peer));
        session.apply_context(&mut store, &body, peer()).unwrap();
        assert_eq!(store.get("a").unwrap().color, Color::WHITE);
        assert!(!session.has_outbound());
    }

    #[test]
    fn test_object_named_like_a_tag_is_rejected() {
        let mut store = SceneStore::new();
        let mut session = ReplicationSession::default();
        for name in ["DONE", "CREATE"] {
            let body = format!(
                "SEND_GEOM {{ name {name} class mesh kind geometry networked 1 savable 1 \
                 color {{ 1 1 1 }} xform {{ 1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1 }} payload \"\" }}\n\
                 CREATE {{ name {name} }}\nDONE {{ }}\n"
            );
            let err = session.apply_context(&mut store, &body, Source::File).unwrap_err();
            assert_eq!(err.index, 0);
            assert!(!err.is_protocol());
            assert_eq!(err.kind, ContextErrorKind::Apply(StoreError::ReservedName(name.into())));
            assert!(!store.registry().contains(name));
        }

        // A locally created one stays local, and later contexts still end.
        store.add_object(SceneObject::geometry("DONE")).unwrap();
        session.pump(&mut store);
        assert!(!session.has_outbound());
        let records = session.full_snapshot(&store, &NoDependencies, SnapshotTarget::Peer);
        assert!(!records.iter().any(|r| r.constructs() == Some("DONE")));
        let report = session
            .apply_context(&mut store, "VAR { key k value v }\nDONE { }\n", peer())
            .unwrap();
        assert_eq!(report.records, 1);
    }

    #[test]
    fn test_unknown_tag_aborts_keeping_prefix() {
        let mut store = SceneStore::new();
        let mut session = ReplicationSession::default();
        let body = "VAR { key a value 1 }\nFOOBAR { x 1 }\nVAR { key b value 2 }\nDONE { }\n";

        let err = session.apply_context(&mut store, body, peer()).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.tag, "FOOBAR");
        assert!(err.is_protocol());
        assert_eq!(store.var("a"), Some("1"));
        assert_eq!(store.var("b"), None);
        assert_eq!(session.mode(), SessionMode::Idle);
        assert_eq!(session.stats().contexts_failed, 1);
    }

    #[test]
    fn test_application_error_aborts() {
        let mut store = SceneStore::new();
        let mut session = ReplicationSession::default();
        let err = session
            .apply_context(&mut store, "DESTROY { name ghost }\nDONE { }\n", peer())
            .unwrap_err();
        assert!(!err.is_protocol());
        assert_eq!(
            err.kind,
            ContextErrorKind::Apply(StoreError::UnknownObject("ghost".into()))
        );
    }

    #[test]
    fn test_missing_sentinel() {
        let mut store = SceneStore::new();
        let mut session = ReplicationSession::default();
        let err = session
            .apply_context(&mut store, "VAR { key a value 1 }\n", Source::File)
            .unwrap_err();
        assert_eq!(err.kind, ContextErrorKind::Protocol(ProtocolError::MissingSentinel));
        assert_eq!(store.var("a"), Some("1"));
    }

    #[test]
    fn test_apply_twice_is_idempotent() {
        let mut origin = SceneStore::new();
        origin
            .add_object(SceneObject::geometry("a").with_color(Color::new(0.2, 0.4, 0.6)))
            .unwrap();
        origin.add_object(SceneObject::geometry("b")).unwrap();
        origin.undisplay("b").unwrap();
        let body = encode_context(&ReplicationSession::default().full_snapshot(
            &origin,
            &FixedDependencies::new(["b"]),
            SnapshotTarget::Peer,
        ));

        let mut store = SceneStore::new();
        let mut session = ReplicationSession::default();
        session.apply_context(&mut store, &body, peer()).unwrap();
        let once: Vec<_> = store.registry().iter().cloned().collect();
        let shown_once: Vec<_> = store.display_set().iter().map(String::from).collect();

        session.apply_context(&mut store, &body, peer()).unwrap();
        let twice: Vec<_> = store.registry().iter().cloned().collect();
        let shown_twice: Vec<_> = store.display_set().iter().map(String::from).collect();
        assert_eq!(once, twice);
        assert_eq!(shown_once, shown_twice);
        assert_eq!(shown_once, vec!["a".to_string()]);
    }

    #[test]
    fn test_camera_distribution_toggle() {
        let mut store = SceneStore::new();
        let mut session = ReplicationSession::new(SessionConfig {
            distribute_camera: false,
        });
        store.set_camera(Default::default());
        session.pump(&mut store);
        assert!(!session.has_outbound());

        let body = encode_context(&session.incremental(&store));
        let report = session.apply_context(&mut store, &body, Source::File).unwrap();
        assert!(report.camera_loaded);
    }
}
