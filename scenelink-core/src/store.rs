//! The scene store: every mutation of the scene goes through here.
//!
//! Each successful mutation queues one or more [`SceneEvent`]s. Local edits
//! and records received from peers use the same methods; telling the two
//! apart is the replication layer's job, not the store's.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::display::DisplaySet;
use crate::events::{EventQueue, SceneEvent};
use crate::globals::{Camera, ClipPlane, Color, IoState, ViewState, WindowState};
use crate::object::{ObjectKind, ObjectPatch, SceneObject, Transform};
use crate::registry::ObjectRegistry;

/// Errors raised by store mutations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("no object named '{0}'")]
    UnknownObject(String),

    #[error("an object named '{0}' already exists")]
    DuplicateName(String),

    #[error("object '{name}' is {actual}, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("'{0}' is a record tag and cannot name a replicated object")]
    ReservedName(String),

    #[error("payload for '{name}' rejected: {reason}")]
    Payload { name: String, reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct SceneStore {
    registry: ObjectRegistry,
    display: DisplaySet,
    camera: Camera,
    window: WindowState,
    view: ViewState,
    io: IoState,
    vars: BTreeMap<String, String>,
    grabbed: BTreeSet<String>,
    events: EventQueue,
}

impl SceneStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Queries ────────────────────────────────────────────────

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn display_set(&self) -> &DisplaySet {
        &self.display
    }

    pub fn get(&self, name: &str) -> Option<&SceneObject> {
        self.registry.get(name)
    }

    pub fn is_live(&self, name: &str) -> bool {
        self.registry.is_live(name)
    }

    pub fn is_displayed(&self, name: &str) -> bool {
        self.display.contains(name)
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn window(&self) -> &WindowState {
        &self.window
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn io(&self) -> &IoState {
        &self.io
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn is_grabbed(&self, name: &str) -> bool {
        self.grabbed.contains(name)
    }

    /// Number of events waiting to be drained.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Drain all queued events in the order they were fired.
    pub fn take_events(&mut self) -> Vec<SceneEvent> {
        self.events.drain()
    }

    // ─── Object lifecycle ───────────────────────────────────────

    /// Put an object's full state into the registry without constructing
    /// it. If the name is already registered, that entry's state is
    /// refreshed and its identity kept.
    ///
    /// Refreshing a live object fires one event per attribute that changed.
    /// The payload is left to the caller, which installs it through a codec.
    pub fn stage(&mut self, object: SceneObject) {
        let before = self.registry.get(object.name()).filter(|o| o.exists).cloned();
        let name = object.name().to_string();
        self.registry.stage(object);
        if let (Some(before), Some(after)) = (before, self.registry.get(&name)) {
            let changes = attribute_changes(&before, after);
            for event in changes {
                self.events.push(event);
            }
        }
    }

    /// Construct a staged object and display it.
    ///
    /// Constructing an object that is already live reuses it; only the
    /// display request is repeated.
    pub fn construct(&mut self, name: &str) -> Result<(), StoreError> {
        let object = self
            .registry
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownObject(name.to_string()))?;
        if !object.exists {
            object.exists = true;
            self.events.push(SceneEvent::Created(name.to_string()));
        }
        self.display(name)
    }

    /// Stage and construct a new object in one step.
    pub fn add_object(&mut self, object: SceneObject) -> Result<(), StoreError> {
        if self.registry.is_live(object.name()) {
            return Err(StoreError::DuplicateName(object.name().to_string()));
        }
        let name = object.name().to_string();
        self.stage(object);
        self.construct(&name)
    }

    pub fn destroy(&mut self, name: &str) -> Result<(), StoreError> {
        if !self.registry.is_live(name) {
            return Err(StoreError::UnknownObject(name.to_string()));
        }
        let networked = self
            .registry
            .remove(name)
            .is_some_and(|o| o.networked);
        self.display.forget(name);
        self.grabbed.remove(name);
        self.events.push(SceneEvent::Destroyed {
            name: name.to_string(),
            networked,
        });
        Ok(())
    }

    // ─── Display ────────────────────────────────────────────────

    pub fn display(&mut self, name: &str) -> Result<(), StoreError> {
        self.set_displayed(name, true)
    }

    pub fn undisplay(&mut self, name: &str) -> Result<(), StoreError> {
        self.set_displayed(name, false)
    }

    fn set_displayed(&mut self, name: &str, on: bool) -> Result<(), StoreError> {
        self.live(name)?;
        if self.display.is_buffering() {
            self.display.queue(name, on);
        } else if self.display.set(name, on) {
            self.events.push(display_event(name, on));
        }
        Ok(())
    }

    /// Start queueing display changes (see [`DisplaySet`]).
    pub fn buffer_display(&mut self) {
        self.display.buffer();
    }

    /// Apply queued display changes and fire their events.
    pub fn flush_display(&mut self) {
        for (name, on) in self.display.flush() {
            self.events.push(display_event(&name, on));
        }
    }

    // ─── Object attributes ──────────────────────────────────────

    pub fn set_color(&mut self, name: &str, color: Color) -> Result<(), StoreError> {
        self.geometry_mut(name)?.color = color;
        self.events.push(SceneEvent::Recolored(name.to_string()));
        Ok(())
    }

    pub fn set_xform(&mut self, name: &str, xform: Transform) -> Result<(), StoreError> {
        self.geometry_mut(name)?.xform = xform;
        self.events.push(SceneEvent::Transformed(name.to_string()));
        Ok(())
    }

    pub fn set_transparency(&mut self, name: &str, value: Option<f64>) -> Result<(), StoreError> {
        self.geometry_mut(name)?.transparency = value;
        self.events
            .push(SceneEvent::TransparencyChanged(name.to_string()));
        Ok(())
    }

    pub fn set_texture(&mut self, name: &str, texture: Option<String>) -> Result<(), StoreError> {
        self.geometry_mut(name)?.texture = texture;
        self.events.push(SceneEvent::TextureChanged(name.to_string()));
        Ok(())
    }

    /// Replace an object's payload. Staged objects are accepted so codecs
    /// can install payloads before construction.
    pub fn set_payload(&mut self, name: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        let object = self
            .registry
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownObject(name.to_string()))?;
        object.payload = payload;
        self.events.push(SceneEvent::GeometryChanged(name.to_string()));
        Ok(())
    }

    /// Apply every attribute present in `patch` to a live object.
    pub fn apply_patch(&mut self, name: &str, patch: ObjectPatch) -> Result<(), StoreError> {
        if patch.touches_geometry() {
            self.geometry_mut(name)?;
        } else {
            self.live(name)?;
        }
        if let Some(color) = patch.color {
            self.set_color(name, color)?;
        }
        if let Some(xform) = patch.xform {
            self.set_xform(name, xform)?;
        }
        if let Some(transparency) = patch.transparency {
            self.set_transparency(name, transparency)?;
        }
        if let Some(texture) = patch.texture {
            self.set_texture(name, texture)?;
        }
        if let Some(payload) = patch.payload {
            self.set_payload(name, payload)?;
        }
        Ok(())
    }

    pub fn grab(&mut self, name: &str, grabbed: bool) -> Result<(), StoreError> {
        self.live(name)?;
        if grabbed {
            self.grabbed.insert(name.to_string());
        } else {
            self.grabbed.remove(name);
        }
        self.events.push(SceneEvent::Grabbed {
            name: name.to_string(),
            grabbed,
        });
        Ok(())
    }

    pub fn set_object_var(
        &mut self,
        name: &str,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), StoreError> {
        let key = key.into();
        self.live_mut(name)?.vars.insert(key.clone(), value.into());
        self.events.push(SceneEvent::ObjectVarChanged {
            name: name.to_string(),
            key,
        });
        Ok(())
    }

    // ─── Global state ───────────────────────────────────────────

    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.vars.insert(key.clone(), value.into());
        self.events.push(SceneEvent::VarChanged(key));
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
        self.events.push(SceneEvent::CameraMoved);
    }

    pub fn set_window(&mut self, window: WindowState) {
        self.window = window;
    }

    pub fn set_view(&mut self, view: ViewState) {
        self.view = view;
    }

    pub fn set_io(&mut self, io: IoState) {
        self.io = io;
    }

    pub fn set_render_mode(&mut self, mode: impl Into<String>) {
        self.view.render_mode = mode.into();
        self.events.push(SceneEvent::RenderModeChanged);
    }

    pub fn set_clip(&mut self, clip: ClipPlane) {
        self.view.clip = clip;
        self.events.push(SceneEvent::ClipChanged);
    }

    // ─── Helpers ────────────────────────────────────────────────

    fn live(&self, name: &str) -> Result<&SceneObject, StoreError> {
        self.registry
            .get(name)
            .filter(|o| o.exists)
            .ok_or_else(|| StoreError::UnknownObject(name.to_string()))
    }

    fn live_mut(&mut self, name: &str) -> Result<&mut SceneObject, StoreError> {
        self.registry
            .get_mut(name)
            .filter(|o| o.exists)
            .ok_or_else(|| StoreError::UnknownObject(name.to_string()))
    }

    fn geometry_mut(&mut self, name: &str) -> Result<&mut SceneObject, StoreError> {
        let object = self.live_mut(name)?;
        if object.kind != ObjectKind::Geometry {
            return Err(StoreError::TypeMismatch {
                name: name.to_string(),
                expected: ObjectKind::Geometry.as_str(),
                actual: object.kind.as_str(),
            });
        }
        Ok(object)
    }
}

fn display_event(name: &str, on: bool) -> SceneEvent {
    if on {
        SceneEvent::Displayed(name.to_string())
    } else {
        SceneEvent::Undisplayed(name.to_string())
    }
}

/// Events describing how a live object's state moved from `before` to
/// `after`. Removed per-object variables have no event.
fn attribute_changes(before: &SceneObject, after: &SceneObject) -> Vec<SceneEvent> {
    let name = || after.name().to_string();
    let mut events = Vec::new();
    if before.color != after.color {
        events.push(SceneEvent::Recolored(name()));
    }
    if before.xform != after.xform {
        events.push(SceneEvent::Transformed(name()));
    }
    if before.transparency != after.transparency {
        events.push(SceneEvent::TransparencyChanged(name()));
    }
    if before.texture != after.texture {
        events.push(SceneEvent::TextureChanged(name()));
    }
    for (key, value) in &after.vars {
        if before.vars.get(key) != Some(value) {
            events.push(SceneEvent::ObjectVarChanged {
                name: name(),
                key: key.clone(),
            });
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(names: &[&str]) -> SceneStore {
        let mut store = SceneStore::new();
        for name in names {
            store.add_object(SceneObject::geometry(*name)).unwrap();
        }
        store.take_events();
        store
    }

    #[test]
    fn test_add_object_fires_created_then_displayed() {
        let mut store = SceneStore::new();
        store.add_object(SceneObject::geometry("cube1")).unwrap();

        assert!(store.is_live("cube1"));
        assert!(store.is_displayed("cube1"));
        assert_eq!(
            store.take_events(),
            vec![
                SceneEvent::Created("cube1".into()),
                SceneEvent::Displayed("cube1".into()),
            ]
        );
    }

    #[test]
    fn test_duplicate_live_name_rejected() {
        let mut store = store_with(&["a"]);
        let err = store.add_object(SceneObject::geometry("a")).unwrap_err();
        assert_eq!(err, StoreError::DuplicateName("a".into()));
    }

    #[test]
    fn test_construct_unknown_name() {
        let mut store = SceneStore::new();
        assert_eq!(
            store.construct("ghost"),
            Err(StoreError::UnknownObject("ghost".into()))
        );
    }

    #[test]
    fn test_construct_existing_reuses_identity() {
        let mut store = store_with(&["a"]);
        store.undisplay("a").unwrap();
        store.take_events();

        store.construct("a").unwrap();
        assert_eq!(store.take_events(), vec![SceneEvent::Displayed("a".into())]);
        assert_eq!(store.registry().len(), 1);
    }

    #[test]
    fn test_restaging_live_object_fires_changes() {
        let mut store = store_with(&["a"]);
        store.set_object_var("a", "unchanged", "1").unwrap();
        store.take_events();

        let mut refreshed = SceneObject::geometry("a").with_color(Color::BLACK);
        refreshed.texture = Some("brick.png".into());
        refreshed.vars.insert("unchanged".into(), "1".into());
        refreshed.vars.insert("added".into(), "2".into());
        store.stage(refreshed);

        assert_eq!(
            store.take_events(),
            vec![
                SceneEvent::Recolored("a".into()),
                SceneEvent::TextureChanged("a".into()),
                SceneEvent::ObjectVarChanged {
                    name: "a".into(),
                    key: "added".into()
                },
            ]
        );

        let same = store.get("a").unwrap().clone();
        store.stage(same);
        assert!(store.take_events().is_empty());

        store.stage(SceneObject::geometry("staged").with_color(Color::BLACK));
        store.stage(SceneObject::geometry("staged"));
        assert!(store.take_events().is_empty());
    }

    #[test]
    fn test_staged_object_is_not_live() {
        let mut store = SceneStore::new();
        store.stage(SceneObject::geometry("a"));
        assert!(!store.is_live("a"));
        assert!(store.undisplay("a").is_err());
        assert_eq!(store.pending_events(), 0);
    }

    #[test]
    fn test_destroy_reports_networked_flag() {
        let mut store = SceneStore::new();
        store
            .add_object(SceneObject::geometry("local").with_networked(false))
            .unwrap();
        store.grab("local", true).unwrap();
        store.take_events();

        store.destroy("local").unwrap();
        assert!(!store.is_displayed("local"));
        assert!(!store.is_grabbed("local"));
        assert_eq!(
            store.take_events(),
            vec![SceneEvent::Destroyed {
                name: "local".into(),
                networked: false
            }]
        );
        assert!(store.destroy("local").is_err());
    }

    #[test]
    fn test_display_is_idempotent() {
        let mut store = store_with(&["a"]);
        store.display("a").unwrap();
        assert_eq!(store.pending_events(), 0);
        store.undisplay("a").unwrap();
        store.undisplay("a").unwrap();
        assert_eq!(store.take_events(), vec![SceneEvent::Undisplayed("a".into())]);
    }

    #[test]
    fn test_buffered_display_fires_on_flush() {
        let mut store = SceneStore::new();
        store.buffer_display();
        store.add_object(SceneObject::geometry("a")).unwrap();
        assert!(!store.is_displayed("a"));
        assert_eq!(store.take_events(), vec![SceneEvent::Created("a".into())]);

        store.flush_display();
        assert!(store.is_displayed("a"));
        assert_eq!(store.take_events(), vec![SceneEvent::Displayed("a".into())]);
    }

    #[test]
    fn test_type_mismatch_on_element() {
        let mut store = SceneStore::new();
        store
            .add_object(SceneObject::new("label", "text", ObjectKind::Element))
            .unwrap();
        let err = store.set_color("label", Color::BLACK).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
        assert!(store.set_object_var("label", "k", "v").is_ok());
    }

    #[test]
    fn test_apply_patch() {
        let mut store = store_with(&["a"]);
        let patch = ObjectPatch {
            color: Some(Color::new(0.0, 1.0, 0.0)),
            xform: Some(Transform::scale(2.0)),
            ..ObjectPatch::default()
        };
        store.apply_patch("a", patch).unwrap();

        let obj = store.get("a").unwrap();
        assert_eq!(obj.color, Color::new(0.0, 1.0, 0.0));
        assert_eq!(obj.xform, Transform::scale(2.0));
        assert_eq!(
            store.take_events(),
            vec![
                SceneEvent::Recolored("a".into()),
                SceneEvent::Transformed("a".into()),
            ]
        );
    }

    #[test]
    fn test_empty_patch_requires_live_object() {
        let mut store = store_with(&["a"]);
        assert!(store.apply_patch("a", ObjectPatch::default()).is_ok());
        assert_eq!(store.pending_events(), 0);
        assert!(store.apply_patch("b", ObjectPatch::default()).is_err());
    }

    #[test]
    fn test_globals_fire_events() {
        let mut store = SceneStore::new();
        store.set_var("mode", "edit");
        store.set_camera(Camera::default());
        store.set_render_mode("wireframe");
        store.set_window(WindowState { width: 10, height: 10 });

        assert_eq!(store.var("mode"), Some("edit"));
        assert_eq!(store.view().render_mode, "wireframe");
        assert_eq!(
            store.take_events(),
            vec![
                SceneEvent::VarChanged("mode".into()),
                SceneEvent::CameraMoved,
                SceneEvent::RenderModeChanged,
            ]
        );
    }
}
