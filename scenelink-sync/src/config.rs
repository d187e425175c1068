//! Node configuration.
//!
//! Defaults suit a standalone node; `from_env` overlays the `SCENELINK_*`
//! variables an operator can set without touching code.

use std::time::Duration;

use crate::framing::DEFAULT_MAX_FRAME;
use crate::session::SessionConfig;

/// Maximum connect attempts (integer)
pub const ENV_MAX_TRY: &str = "SCENELINK_MAX_TRY";
/// Whether camera changes are sent to peers (`0`/`1`, `true`/`false`)
pub const ENV_DISTRIB_CAMERA: &str = "SCENELINK_DISTRIB_CAMERA";
/// Comma-separated broadcast filters this node accepts
pub const ENV_FILTERS: &str = "SCENELINK_FILTERS";

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address the listener binds to. Port 0 picks a free port.
    pub listen_addr: String,
    /// Whether this node answers `Identify` with gossip hints
    pub rendezvous: bool,
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
    /// Filter flags of `Broadcast` messages this node processes
    pub broadcast_filters: Vec<String>,
    pub distribute_camera: bool,
    /// Size of each socket read
    pub read_buffer_size: usize,
    pub max_frame: usize,
    /// Capacity of the `NodeEvent` channel
    pub event_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:0".to_string(),
            rendezvous: false,
            connect_attempts: 200,
            connect_retry_delay: Duration::from_secs(1),
            broadcast_filters: Vec::new(),
            distribute_camera: true,
            read_buffer_size: 16 * 1024,
            max_frame: DEFAULT_MAX_FRAME,
            event_capacity: 256,
        }
    }
}

impl NodeConfig {
    /// Loopback listener, short retries.
    pub fn for_testing() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".to_string(),
            connect_attempts: 20,
            connect_retry_delay: Duration::from_millis(25),
            ..Self::default()
        }
    }

    /// Defaults overlaid with the environment.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values looked up through `lookup`. Unparsable values are
    /// logged and ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_MAX_TRY) {
            match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => self.connect_attempts = n,
                _ => log::warn!("ignoring {ENV_MAX_TRY}={raw:?}"),
            }
        }
        if let Some(raw) = lookup(ENV_DISTRIB_CAMERA) {
            match parse_switch(&raw) {
                Some(on) => self.distribute_camera = on,
                None => log::warn!("ignoring {ENV_DISTRIB_CAMERA}={raw:?}"),
            }
        }
        if let Some(raw) = lookup(ENV_FILTERS) {
            self.broadcast_filters = raw
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
        }
        self
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            distribute_camera: self.distribute_camera,
        }
    }

    /// Whether a `Broadcast` with this filter flag is for us.
    pub fn accepts_filter(&self, filter: &str) -> bool {
        self.broadcast_filters.iter().any(|f| f == filter)
    }
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
