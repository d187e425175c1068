//! Scene objects and partial updates to them.

use std::collections::BTreeMap;

use crate::globals::Color;

/// Broad object category.
///
/// Only geometry carries color, transform, transparency and texture;
/// setting those on an `Element` is a type mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Geometry,
    Element,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Geometry => "geometry",
            Self::Element => "element",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "geometry" => Some(Self::Geometry),
            "element" => Some(Self::Element),
            _ => None,
        }
    }
}

/// Row-major 4×4 affine transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform(pub [f64; 16]);

impl Transform {
    pub const IDENTITY: Transform = Transform([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn translation(x: f64, y: f64, z: f64) -> Self {
        let mut m = Self::IDENTITY.0;
        m[3] = x;
        m[7] = y;
        m[11] = z;
        Self(m)
    }

    pub fn scale(s: f64) -> Self {
        let mut m = Self::IDENTITY.0;
        m[0] = s;
        m[5] = s;
        m[10] = s;
        Self(m)
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A named scene object.
///
/// The name is fixed at construction. `exists` is managed by the store:
/// an object that has been staged (full state received) but not yet
/// constructed is present in the registry with `exists == false`.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    name: String,
    /// Type name understood by payload codecs, e.g. `"mesh"`
    pub class: String,
    pub kind: ObjectKind,
    pub(crate) exists: bool,
    /// Participates in replication
    pub networked: bool,
    /// Included in full-scene snapshots
    pub savable: bool,
    pub color: Color,
    pub xform: Transform,
    pub transparency: Option<f64>,
    pub texture: Option<String>,
    /// Per-object variables
    pub vars: BTreeMap<String, String>,
    /// Opaque type-specific data, interpreted by a `PayloadCodec`
    pub payload: Vec<u8>,
}

impl SceneObject {
    pub fn new(name: impl Into<String>, class: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            kind,
            exists: false,
            networked: true,
            savable: true,
            color: Color::default(),
            xform: Transform::IDENTITY,
            transparency: None,
            texture: None,
            vars: BTreeMap::new(),
            payload: Vec::new(),
        }
    }

    /// Networked, savable geometry of class `mesh`.
    pub fn geometry(name: impl Into<String>) -> Self {
        Self::new(name, "mesh", ObjectKind::Geometry)
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_xform(mut self, xform: Transform) -> Self {
        self.xform = xform;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_networked(mut self, networked: bool) -> Self {
        self.networked = networked;
        self
    }

    pub fn with_savable(mut self, savable: bool) -> Self {
        self.savable = savable;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn is_geometry(&self) -> bool {
        self.kind == ObjectKind::Geometry
    }

    /// Copy everything except identity and existence from `other`.
    pub(crate) fn refresh_from(&mut self, other: SceneObject) {
        let exists = self.exists;
        let name = std::mem::take(&mut self.name);
        *self = other;
        self.name = name;
        self.exists = exists;
    }
}

/// A partial update to a live object's state.
///
/// `None` means "leave unchanged". For the optional attributes the inner
/// `Option` is the new value, so `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectPatch {
    pub color: Option<Color>,
    pub xform: Option<Transform>,
    pub transparency: Option<Option<f64>>,
    pub texture: Option<Option<String>>,
    pub payload: Option<Vec<u8>>,
}

impl ObjectPatch {
    /// A patch that carries every mutable attribute of `object`. Elements
    /// only carry their payload.
    pub fn from_object(object: &SceneObject) -> Self {
        let payload = Some(object.payload.clone());
        if !object.is_geometry() {
            return Self {
                payload,
                ..Self::default()
            };
        }
        Self {
            color: Some(object.color),
            xform: Some(object.xform),
            transparency: Some(object.transparency),
            texture: Some(object.texture.clone()),
            payload,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.color.is_none()
            && self.xform.is_none()
            && self.transparency.is_none()
            && self.texture.is_none()
            && self.payload.is_none()
    }

    /// Whether applying this patch touches attributes only geometry has.
    pub fn touches_geometry(&self) -> bool {
        self.color.is_some()
            || self.xform.is_some()
            || self.transparency.is_some()
            || self.texture.is_some()
    }
}
