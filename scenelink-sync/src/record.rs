//! Command records: the unit of replication inside a context.
//!
//! Each record kind has a tag, a text encoding, a decoder from parsed
//! [`Fields`] and an `apply` against the scene store. Records that name an
//! object resolve it through the store's registry at apply time.

use scenelink_core::{
    Camera, ClipPlane, Color, IoState, ObjectKind, ObjectPatch, PayloadCodec, SceneObject,
    SceneStore, StoreError, Transform, ViewState, WindowState,
};

use crate::protocol::ProtocolError;
use crate::text::{BlockWriter, Fields};

/// Record tags.
pub mod tags {
    pub const CREATE: &str = "CREATE";
    pub const DESTROY: &str = "DESTROY";
    pub const DISPLAY: &str = "DISPLAY";
    pub const COLOR: &str = "COLOR";
    pub const XFORM: &str = "XFORM";
    pub const TRANSP: &str = "TRANSP";
    pub const TEXTURE: &str = "TEXTURE";
    pub const CHNG_CAM: &str = "CHNG_CAM";
    pub const CHNG_WIN: &str = "CHNG_WIN";
    pub const CHNG_VIEW: &str = "CHNG_VIEW";
    pub const CHNG_IO: &str = "CHNG_IO";
    pub const GRAB: &str = "GRAB";
    pub const HASH: &str = "HASH";
    pub const VAR: &str = "VAR";
    pub const UPDATE_GEOM: &str = "UPDATE_GEOM";
    pub const SEND_GEOM: &str = "SEND_GEOM";
    pub const RENDER_MODE: &str = "RENDER_MODE";
    pub const CLIP_INFO: &str = "CLIP_INFO";
    pub const DONE: &str = "DONE";
}

/// Decoder for one record kind.
pub type DecodeFn = fn(&Fields) -> Result<Record, ProtocolError>;

/// Every built-in record kind and its decoder.
pub const STANDARD_KINDS: &[(&str, DecodeFn)] = &[
    (tags::SEND_GEOM, decode_send_geom),
    (tags::CREATE, decode_create),
    (tags::DESTROY, decode_destroy),
    (tags::DISPLAY, decode_display),
    (tags::COLOR, decode_color),
    (tags::XFORM, decode_xform),
    (tags::TRANSP, decode_transp),
    (tags::TEXTURE, decode_texture),
    (tags::UPDATE_GEOM, decode_update_geom),
    (tags::GRAB, decode_grab),
    (tags::HASH, decode_hash),
    (tags::VAR, decode_var),
    (tags::CHNG_CAM, decode_camera),
    (tags::CHNG_WIN, decode_window),
    (tags::CHNG_VIEW, decode_view),
    (tags::CHNG_IO, decode_io),
    (tags::RENDER_MODE, decode_render_mode),
    (tags::CLIP_INFO, decode_clip_info),
    (tags::DONE, decode_done),
];

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Full state of an object, staged ahead of its construction
    SendGeom(Box<SceneObject>),
    /// Construct a staged object by name
    Create { name: String },
    /// A block tagged with a live object's name: reuse that object and
    /// apply whatever state the block carries
    Reuse { name: String, patch: ObjectPatch },
    Destroy { name: String },
    Display { name: String, on: bool },
    Color { name: String, color: Color },
    Xform { name: String, xform: Transform },
    Transp { name: String, value: Option<f64> },
    Texture { name: String, texture: Option<String> },
    UpdateGeom { name: String, patch: ObjectPatch },
    Grab { name: String, grab: bool },
    Hash { name: String, key: String, value: String },
    Var { key: String, value: String },
    Camera(Camera),
    Window(WindowState),
    View(ViewState),
    Io(IoState),
    RenderMode(String),
    ClipInfo(ClipPlane),
    Done,
}

impl Record {
    pub fn tag(&self) -> &str {
        match self {
            Self::SendGeom(_) => tags::SEND_GEOM,
            Self::Create { .. } => tags::CREATE,
            Self::Reuse { name, .. } => name,
            Self::Destroy { .. } => tags::DESTROY,
            Self::Display { .. } => tags::DISPLAY,
            Self::Color { .. } => tags::COLOR,
            Self::Xform { .. } => tags::XFORM,
            Self::Transp { .. } => tags::TRANSP,
            Self::Texture { .. } => tags::TEXTURE,
            Self::UpdateGeom { .. } => tags::UPDATE_GEOM,
            Self::Grab { .. } => tags::GRAB,
            Self::Hash { .. } => tags::HASH,
            Self::Var { .. } => tags::VAR,
            Self::Camera(_) => tags::CHNG_CAM,
            Self::Window(_) => tags::CHNG_WIN,
            Self::View(_) => tags::CHNG_VIEW,
            Self::Io(_) => tags::CHNG_IO,
            Self::RenderMode(_) => tags::RENDER_MODE,
            Self::ClipInfo(_) => tags::CLIP_INFO,
            Self::Done => tags::DONE,
        }
    }

    /// Name of the object this record constructs, if it is a construction
    /// record. Construction may run payload codecs.
    pub fn constructs(&self) -> Option<&str> {
        match self {
            Self::SendGeom(object) => Some(object.name()),
            Self::Create { name } | Self::Reuse { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// One line of tagged-field text.
    pub fn encode(&self) -> String {
        let w = BlockWriter::new(self.tag());
        let w = match self {
            Self::SendGeom(o) => {
                let w = w
                    .atom("name", o.name())
                    .atom("class", &o.class)
                    .atom("kind", o.kind.as_str())
                    .flag("networked", o.networked)
                    .flag("savable", o.savable)
                    .floats("color", &o.color.to_array())
                    .floats("xform", &o.xform.0);
                let w = write_optional(w, "transp", o.transparency.as_ref());
                let w = write_optional(w, "texture", o.texture.as_ref());
                w.pairs("vars", o.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                    .bytes("payload", &o.payload)
            }
            Self::Create { name } | Self::Destroy { name } => w.atom("name", name),
            Self::Reuse { patch, .. } => write_patch(w, patch),
            Self::Display { name, on } => w.atom("name", name).flag("on", *on),
            Self::Color { name, color } => w.atom("name", name).floats("color", &color.to_array()),
            Self::Xform { name, xform } => w.atom("name", name).floats("xform", &xform.0),
            Self::Transp { name, value } => write_optional(w.atom("name", name), "value", value.as_ref()),
            Self::Texture { name, texture } => {
                write_optional(w.atom("name", name), "texture", texture.as_ref())
            }
            Self::UpdateGeom { name, patch } => write_patch(w.atom("name", name), patch),
            Self::Grab { name, grab } => w.atom("name", name).flag("grab", *grab),
            Self::Hash { name, key, value } => {
                w.atom("name", name).atom("key", key).atom("value", value)
            }
            Self::Var { key, value } => w.atom("key", key).atom("value", value),
            Self::Camera(c) => w
                .floats("from", &c.from)
                .floats("at", &c.at)
                .floats("up", &c.up)
                .floats("center", &c.center)
                .atom("focal", c.focal)
                .flag("persp", c.perspective)
                .atom("iod", c.iod),
            Self::Window(win) => w.atom("width", win.width).atom("height", win.height),
            Self::View(v) => w
                .floats("background", &v.background.to_array())
                .atom("render_mode", &v.render_mode)
                .flag("clipping", v.clip.enabled)
                .floats("clip_plane", &v.clip.plane),
            Self::Io(io) => write_optional(w, "basename", io.basename.as_ref()),
            Self::RenderMode(mode) => w.atom("mode", mode),
            Self::ClipInfo(clip) => w.flag("enabled", clip.enabled).floats("plane", &clip.plane),
            Self::Done => w,
        };
        w.finish()
    }

    /// Apply this record to `store`. Payload bytes go through `codec`.
    pub fn apply(self, store: &mut SceneStore, codec: &dyn PayloadCodec) -> Result<(), StoreError> {
        match self {
            Self::SendGeom(object) => {
                let mut object = *object;
                let name = object.name().to_string();
                let payload = std::mem::take(&mut object.payload);
                store.stage(object);
                codec.decode(store, &name, payload)
            }
            Self::Create { name } => store.construct(&name),
            Self::Reuse { name, patch } | Self::UpdateGeom { name, patch } => {
                apply_patch(store, codec, &name, patch)
            }
            Self::Destroy { name } => store.destroy(&name),
            Self::Display { name, on: true } => store.display(&name),
            Self::Display { name, on: false } => store.undisplay(&name),
            Self::Color { name, color } => store.set_color(&name, color),
            Self::Xform { name, xform } => store.set_xform(&name, xform),
            Self::Transp { name, value } => store.set_transparency(&name, value),
            Self::Texture { name, texture } => store.set_texture(&name, texture),
            Self::Grab { name, grab } => store.grab(&name, grab),
            Self::Hash { name, key, value } => store.set_object_var(&name, key, value),
            Self::Var { key, value } => {
                store.set_var(key, value);
                Ok(())
            }
            Self::Camera(camera) => {
                store.set_camera(camera);
                Ok(())
            }
            Self::Window(window) => {
                store.set_window(window);
                Ok(())
            }
            Self::View(view) => {
                store.set_view(view);
                Ok(())
            }
            Self::Io(io) => {
                store.set_io(io);
                Ok(())
            }
            Self::RenderMode(mode) => {
                store.set_render_mode(mode);
                Ok(())
            }
            Self::ClipInfo(clip) => {
                store.set_clip(clip);
                Ok(())
            }
            Self::Done => Ok(()),
        }
    }
}

fn apply_patch(
    store: &mut SceneStore,
    codec: &dyn PayloadCodec,
    name: &str,
    mut patch: ObjectPatch,
) -> Result<(), StoreError> {
    let payload = patch.payload.take();
    store.apply_patch(name, patch)?;
    match payload {
        Some(bytes) => codec.decode(store, name, bytes),
        None => Ok(()),
    }
}

// ─── Field helpers ──────────────────────────────────────────────

fn write_optional<T: std::fmt::Display>(w: BlockWriter, name: &str, value: Option<&T>) -> BlockWriter {
    match value {
        Some(v) => w.atom(name, v),
        None => w.none(name),
    }
}

fn write_patch(w: BlockWriter, patch: &ObjectPatch) -> BlockWriter {
    let mut w = w;
    if let Some(color) = patch.color {
        w = w.floats("color", &color.to_array());
    }
    if let Some(xform) = patch.xform {
        w = w.floats("xform", &xform.0);
    }
    if let Some(transp) = patch.transparency {
        w = write_optional(w, "transp", transp.as_ref());
    }
    if let Some(texture) = &patch.texture {
        w = write_optional(w, "texture", texture.as_ref());
    }
    if let Some(payload) = &patch.payload {
        w = w.bytes("payload", payload);
    }
    w
}

const PATCH_FIELDS: &[&str] = &["name", "color", "xform", "transp", "texture", "payload"];

/// Read the optional state fields shared by object-named blocks and
/// `UPDATE_GEOM`.
pub fn read_patch(f: &Fields) -> Result<ObjectPatch, ProtocolError> {
    f.skip_unknown(PATCH_FIELDS);
    Ok(ObjectPatch {
        color: f.opt_floats::<3>("color")?.map(Color::from_array),
        xform: f.opt_floats::<16>("xform")?.map(Transform),
        transparency: f.optional("transp")?,
        texture: f.optional("texture")?,
        payload: f.opt_bytes("payload")?,
    })
}

fn name(f: &Fields) -> Result<String, ProtocolError> {
    f.atom("name").map(str::to_string)
}

// ─── Decoders ───────────────────────────────────────────────────

fn decode_send_geom(f: &Fields) -> Result<Record, ProtocolError> {
    f.skip_unknown(&[
        "name", "class", "kind", "networked", "savable", "color", "xform", "transp", "texture",
        "vars", "payload",
    ]);
    let kind_name = f.atom("kind")?;
    let kind = ObjectKind::parse(kind_name).ok_or_else(|| ProtocolError::MalformedField {
        tag: tags::SEND_GEOM.to_string(),
        field: "kind".to_string(),
        reason: format!("unknown kind '{kind_name}'"),
    })?;
    let mut object = SceneObject::new(name(f)?, f.atom("class")?, kind)
        .with_networked(f.flag("networked")?)
        .with_savable(f.flag("savable")?)
        .with_color(Color::from_array(f.floats("color")?))
        .with_xform(Transform(f.floats("xform")?))
        .with_payload(f.opt_bytes("payload")?.unwrap_or_default());
    object.transparency = f.optional("transp")?.flatten();
    object.texture = f.optional("texture")?.flatten();
    object.vars = f.pairs("vars")?.into_iter().collect();
    Ok(Record::SendGeom(Box::new(object)))
}

fn decode_create(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::Create { name: name(f)? })
}

fn decode_destroy(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::Destroy { name: name(f)? })
}

fn decode_display(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::Display {
        name: name(f)?,
        on: f.flag("on")?,
    })
}

fn decode_color(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::Color {
        name: name(f)?,
        color: Color::from_array(f.floats("color")?),
    })
}

fn decode_xform(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::Xform {
        name: name(f)?,
        xform: Transform(f.floats("xform")?),
    })
}

fn decode_transp(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::Transp {
        name: name(f)?,
        value: f.optional("value")?.flatten(),
    })
}

fn decode_texture(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::Texture {
        name: name(f)?,
        texture: f.optional("texture")?.flatten(),
    })
}

fn decode_update_geom(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::UpdateGeom {
        name: name(f)?,
        patch: read_patch(f)?,
    })
}

fn decode_grab(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::Grab {
        name: name(f)?,
        grab: f.flag("grab")?,
    })
}

fn decode_hash(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::Hash {
        name: name(f)?,
        key: f.atom("key")?.to_string(),
        value: f.atom("value")?.to_string(),
    })
}

fn decode_var(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::Var {
        key: f.atom("key")?.to_string(),
        value: f.atom("value")?.to_string(),
    })
}

fn decode_camera(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::Camera(Camera {
        from: f.floats("from")?,
        at: f.floats("at")?,
        up: f.floats("up")?,
        center: f.floats("center")?,
        focal: f.parse("focal")?,
        perspective: f.flag("persp")?,
        iod: f.parse("iod")?,
    }))
}

fn decode_window(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::Window(WindowState {
        width: f.parse("width")?,
        height: f.parse("height")?,
    }))
}

fn decode_view(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::View(ViewState {
        background: Color::from_array(f.floats("background")?),
        render_mode: f.atom("render_mode")?.to_string(),
        clip: ClipPlane {
            enabled: f.flag("clipping")?,
            plane: f.floats("clip_plane")?,
        },
    }))
}

fn decode_io(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::Io(IoState {
        basename: f.optional("basename")?.flatten(),
    }))
}

fn decode_render_mode(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::RenderMode(f.atom("mode")?.to_string()))
}

fn decode_clip_info(f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::ClipInfo(ClipPlane {
        enabled: f.flag("enabled")?,
        plane: f.floats("plane")?,
    }))
}

fn decode_done(_f: &Fields) -> Result<Record, ProtocolError> {
    Ok(Record::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::BlockReader;
    use scenelink_core::OpaquePayload;

    fn reparse(record: &Record) -> Record {
        let line = record.encode();
        let block = BlockReader::new(&line).next_block().unwrap().unwrap();
        let decode = STANDARD_KINDS
            .iter()
            .find(|(tag, _)| *tag == block.tag())
            .map(|(_, f)| *f)
            .unwrap();
        decode(&block.fields).unwrap()
    }

    #[test]
    fn test_send_geom_carries_full_state() {
        let mut object = SceneObject::geometry("cube 1")
            .with_color(Color::new(0.1, 0.2, 0.3))
            .with_xform(Transform::translation(1.5, -2.0, 1e-9))
            .with_payload(vec![0, 159, 255]);
        object.transparency = Some(0.25);
        object.texture = None;
        object.vars.insert("owner".into(), "alice".into());

        let record = Record::SendGeom(Box::new(object.clone()));
        assert_eq!(reparse(&record), record);
    }

    #[test]
    fn test_optional_attribute_none_survives() {
        let record = Record::Texture {
            name: "a".into(),
            texture: None,
        };
        assert!(record.encode().contains("texture { }"));
        assert_eq!(reparse(&record), record);
    }

    #[test]
    fn test_camera_encoding() {
        let camera = Camera {
            from: [1.0, 2.0, 3.0],
            focal: 0.035,
            perspective: false,
            ..Camera::default()
        };
        assert_eq!(reparse(&Record::Camera(camera.clone())), Record::Camera(camera));
    }

    #[test]
    fn test_update_geom_partial_patch() {
        let block = BlockReader::new("UPDATE_GEOM { name a color { 0 0 1 } }")
            .next_block()
            .unwrap()
            .unwrap();
        let record = decode_update_geom(&block.fields).unwrap();
        match record {
            Record::UpdateGeom { name, patch } => {
                assert_eq!(name, "a");
                assert_eq!(patch.color, Some(Color::new(0.0, 0.0, 1.0)));
                assert!(patch.xform.is_none());
                assert!(patch.payload.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_fields_skipped() {
        let block = BlockReader::new("DISPLAY { name a legacy_flag 7 on 0 }")
            .next_block()
            .unwrap()
            .unwrap();
        assert_eq!(
            decode_display(&block.fields).unwrap(),
            Record::Display {
                name: "a".into(),
                on: false
            }
        );
    }

    #[test]
    fn test_bad_kind_is_malformed() {
        let block = BlockReader::new(
            "SEND_GEOM { name a class mesh kind blob networked 1 savable 1 color { 1 1 1 } xform { 1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1 } }",
        )
        .next_block()
        .unwrap()
        .unwrap();
        assert!(matches!(
            decode_send_geom(&block.fields),
            Err(ProtocolError::MalformedField { ref field, .. }) if field == "kind"
        ));
    }

    #[test]
    fn test_send_geom_then_create_applies() {
        let mut store = SceneStore::new();
        let object = SceneObject::geometry("cube1")
            .with_color(Color::new(1.0, 0.0, 0.0))
            .with_payload(vec![4, 2]);

        Record::SendGeom(Box::new(object))
            .apply(&mut store, &OpaquePayload)
            .unwrap();
        assert!(!store.is_live("cube1"));
        assert_eq!(store.get("cube1").unwrap().payload, vec![4, 2]);

        Record::Create { name: "cube1".into() }
            .apply(&mut store, &OpaquePayload)
            .unwrap();
        assert!(store.is_live("cube1"));
        assert!(store.is_displayed("cube1"));
        assert_eq!(store.get("cube1").unwrap().color, Color::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_apply_unknown_name_fails() {
        let mut store = SceneStore::new();
        let err = Record::Color {
            name: "ghost".into(),
            color: Color::BLACK,
        }
        .apply(&mut store, &OpaquePayload)
        .unwrap_err();
        assert_eq!(err, StoreError::UnknownObject("ghost".into()));
    }

    #[test]
    fn test_construction_records() {
        assert_eq!(Record::Create { name: "a".into() }.constructs(), Some("a"));
        assert_eq!(
            Record::Reuse {
                name: "b".into(),
                patch: ObjectPatch::default()
            }
            .constructs(),
            Some("b")
        );
        assert_eq!(Record::Destroy { name: "c".into() }.constructs(), None);
        assert_eq!(Record::Done.encode(), "DONE { }");
    }
}
