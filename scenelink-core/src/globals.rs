//! Scene-wide state blocks replicated alongside objects.

/// Linear RGB color, each channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Color {
    pub const WHITE: Color = Color { r: 1.0, g: 1.0, b: 1.0 };
    pub const BLACK: Color = Color { r: 0.0, g: 0.0, b: 0.0 };

    pub fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.r, self.g, self.b]
    }

    pub fn from_array(c: [f64; 3]) -> Self {
        Self::new(c[0], c[1], c[2])
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Viewing camera.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Eye position
    pub from: [f64; 3],
    /// Look-at point
    pub at: [f64; 3],
    /// Up vector
    pub up: [f64; 3],
    /// Rotation center used by orbit gestures
    pub center: [f64; 3],
    pub focal: f64,
    pub perspective: bool,
    /// Inter-ocular distance for stereo
    pub iod: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            from: [0.0, 0.0, 5.0],
            at: [0.0, 0.0, 0.0],
            up: [0.0, 1.0, 0.0],
            center: [0.0, 0.0, 0.0],
            focal: 0.1,
            perspective: true,
            iod: 2.5,
        }
    }
}

/// Output window geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowState {
    pub width: u32,
    pub height: u32,
}

impl Default for WindowState {
    fn default() -> Self {
        Self { width: 640, height: 480 }
    }
}

/// User clip plane `a*x + b*y + c*z + d = 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipPlane {
    pub enabled: bool,
    pub plane: [f64; 4],
}

impl Default for ClipPlane {
    fn default() -> Self {
        Self {
            enabled: false,
            plane: [0.0, 0.0, 1.0, 0.0],
        }
    }
}

/// Rendering-related view settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub background: Color,
    pub render_mode: String,
    pub clip: ClipPlane,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            background: Color::new(0.5, 0.5, 0.5),
            render_mode: "smooth".to_string(),
            clip: ClipPlane::default(),
        }
    }
}

/// File-related state. Only written to file channels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IoState {
    /// Base name used when the scene is saved
    pub basename: Option<String>,
}
