//! Change notifications fired by the store.

use std::collections::VecDeque;

/// One observable change to the scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneEvent {
    Created(String),
    /// The object is already gone when this is observed, so the flag it
    /// carried is included.
    Destroyed { name: String, networked: bool },
    Displayed(String),
    Undisplayed(String),
    Recolored(String),
    Transformed(String),
    TransparencyChanged(String),
    TextureChanged(String),
    GeometryChanged(String),
    Grabbed { name: String, grabbed: bool },
    ObjectVarChanged { name: String, key: String },
    VarChanged(String),
    CameraMoved,
    RenderModeChanged,
    ClipChanged,
}

impl SceneEvent {
    /// The object this event is about, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::Created(n)
            | Self::Displayed(n)
            | Self::Undisplayed(n)
            | Self::Recolored(n)
            | Self::Transformed(n)
            | Self::TransparencyChanged(n)
            | Self::TextureChanged(n)
            | Self::GeometryChanged(n) => Some(n),
            Self::Destroyed { name, .. }
            | Self::Grabbed { name, .. }
            | Self::ObjectVarChanged { name, .. } => Some(name),
            Self::VarChanged(_) | Self::CameraMoved | Self::RenderModeChanged | Self::ClipChanged => {
                None
            }
        }
    }
}

/// FIFO of pending events.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    events: VecDeque<SceneEvent>,
}

impl EventQueue {
    pub fn push(&mut self, event: SceneEvent) {
        log::trace!("scene event {event:?}");
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn drain(&mut self) -> Vec<SceneEvent> {
        self.events.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
