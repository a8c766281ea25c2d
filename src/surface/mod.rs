//! Drawing surface abstraction for the editor canvas.
//!
//! The renderer and the export stage only talk to a [`Surface`]: a square
//! drawing target with a canvas-style state stack (transform, filter,
//! composite mode, circular clip). Two backends exist:
//! - [`PixmapSurface`]: rasterizes with tiny-skia
//! - [`RecordingSurface`]: logs draw commands so geometry can be asserted
//!   without pixels

pub mod pixmap;
#[cfg(test)]
pub mod recording;

pub use pixmap::PixmapSurface;
#[cfg(test)]
pub use recording::{DrawCommand, RecordingSurface};

use crate::editor::adjust::FilterChain;
use crate::editor::source::SourceImage;
use thiserror::Error;

/// Surface errors
#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("Invalid surface size: {0}")]
    InvalidSize(u32),

    #[error("Invalid colour '{0}', expected #rrggbb or #rrggbbaa")]
    InvalidColor(String),

    #[error("Encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Non-premultiplied 8-bit RGBA colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::new(255, 255, 255, 255);
    pub const BLACK: Rgba = Rgba::new(0, 0, 0, 255);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parse `#rrggbb` or `#rrggbbaa`
    pub fn from_hex(hex: &str) -> Result<Self, SurfaceError> {
        let invalid = || SurfaceError::InvalidColor(hex.to_string());
        let digits = hex.trim().strip_prefix('#').ok_or_else(invalid)?;
        if !matches!(digits.len(), 6 | 8) || !digits.is_ascii() {
            return Err(invalid());
        }

        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| invalid());
        let a = if digits.len() == 8 { channel(6)? } else { 255 };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?, a))
    }

    /// Same colour with alpha taken from a 0.0..=1.0 opacity
    pub fn with_opacity(self, opacity: f32) -> Self {
        let a = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self { a, ..self }
    }
}

/// Point in surface coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Circle in surface coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub cx: f32,
    pub cy: f32,
    pub radius: f32,
}

impl Circle {
    pub const fn new(cx: f32, cy: f32, radius: f32) -> Self {
        Self { cx, cy, radius }
    }
}

/// 2D affine matrix, canvas convention:
/// `x' = sx*x + kx*y + tx`, `y' = ky*x + sy*y + ty`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub sx: f32,
    pub ky: f32,
    pub kx: f32,
    pub sy: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine {
    pub const IDENTITY: Affine = Affine {
        sx: 1.0,
        ky: 0.0,
        kx: 0.0,
        sy: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// `self * other`: `other` is applied to points first
    pub fn then(self, other: Affine) -> Affine {
        Affine {
            sx: self.sx * other.sx + self.kx * other.ky,
            ky: self.ky * other.sx + self.sy * other.ky,
            kx: self.sx * other.kx + self.kx * other.sy,
            sy: self.ky * other.kx + self.sy * other.sy,
            tx: self.sx * other.tx + self.kx * other.ty + self.tx,
            ty: self.ky * other.tx + self.sy * other.ty + self.ty,
        }
    }

    pub fn translate(self, dx: f32, dy: f32) -> Affine {
        self.then(Affine {
            tx: dx,
            ty: dy,
            ..Affine::IDENTITY
        })
    }

    /// Clockwise on a y-down surface
    pub fn rotate(self, radians: f32) -> Affine {
        let (sin, cos) = radians.sin_cos();
        self.then(Affine {
            sx: cos,
            ky: sin,
            kx: -sin,
            sy: cos,
            tx: 0.0,
            ty: 0.0,
        })
    }

    pub fn scale(self, s: f32) -> Affine {
        self.then(Affine {
            sx: s,
            sy: s,
            ..Affine::IDENTITY
        })
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.sx * p.x + self.kx * p.y + self.tx,
            self.ky * p.x + self.sy * p.y + self.ty,
        )
    }

    /// Length of the transformed unit x vector (exact for similarity transforms)
    pub fn uniform_scale(&self) -> f32 {
        (self.sx * self.sx + self.ky * self.ky).sqrt()
    }

    pub fn to_skia(self) -> tiny_skia::Transform {
        tiny_skia::Transform::from_row(self.sx, self.ky, self.kx, self.sy, self.tx, self.ty)
    }
}

/// How new pixels combine with what is already on the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Composite {
    #[default]
    SourceOver,
    /// Erase: destination alpha is reduced by the source alpha
    DestinationOut,
}

/// Stroke parameters for outlines and guides
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub color: Rgba,
    pub width: f32,
    /// On/off lengths
    pub dash: Option<[f32; 2]>,
}

impl StrokeStyle {
    pub const fn solid(color: Rgba, width: f32) -> Self {
        Self {
            color,
            width,
            dash: None,
        }
    }

    pub const fn dashed(color: Rgba, width: f32, on: f32, off: f32) -> Self {
        Self {
            color,
            width,
            dash: Some([on, off]),
        }
    }
}

/// Saveable drawing state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawState {
    pub transform: Affine,
    pub filter: Option<FilterChain>,
    pub composite: Composite,
    /// Circular clip in surface coordinates. A single circle is tracked;
    /// a nested clip replaces the outer one.
    pub clip: Option<Circle>,
}

/// Canvas-style save/restore stack shared by all backends
#[derive(Debug, Clone, Default)]
pub struct StateStack {
    current: DrawState,
    saved: Vec<DrawState>,
}

impl StateStack {
    pub fn current(&self) -> &DrawState {
        &self.current
    }

    pub fn save(&mut self) {
        self.saved.push(self.current.clone());
    }

    /// Unbalanced restores are ignored, like a 2D canvas context
    pub fn restore(&mut self) {
        if let Some(state) = self.saved.pop() {
            self.current = state;
        }
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        self.saved.len()
    }
}

/// Square drawing target with canvas semantics.
///
/// State-stack methods have default implementations; backends provide the
/// actual drawing operations.
pub trait Surface {
    #[cfg(test)]
    fn state(&self) -> &StateStack;

    fn state_mut(&mut self) -> &mut StateStack;

    /// Replace every pixel, ignoring transform, clip and composite mode
    fn clear(&mut self, color: Rgba);

    /// Fill the whole surface honouring composite mode and clip
    fn fill_all(&mut self, color: Rgba);

    fn fill_circle(&mut self, circle: Circle, color: Rgba);

    fn stroke_circle(&mut self, circle: Circle, style: &StrokeStyle);

    fn stroke_line(&mut self, from: Point, to: Point, style: &StrokeStyle);

    /// Draw a bitmap with its top-left corner at `(x, y)` in the current
    /// transform, passing its pixels through the current filter
    fn draw_image(&mut self, image: &SourceImage, x: f32, y: f32);

    /// Start an offscreen layer; drawing goes there until [`Surface::end_layer`]
    fn begin_layer(&mut self);

    /// Composite the top layer onto the one below with source-over
    fn end_layer(&mut self);

    fn save(&mut self) {
        self.state_mut().save();
    }

    fn restore(&mut self) {
        self.state_mut().restore();
    }

    fn translate(&mut self, dx: f32, dy: f32) {
        let state = &mut self.state_mut().current;
        state.transform = state.transform.translate(dx, dy);
    }

    fn rotate(&mut self, radians: f32) {
        let state = &mut self.state_mut().current;
        state.transform = state.transform.rotate(radians);
    }

    fn scale(&mut self, s: f32) {
        let state = &mut self.state_mut().current;
        state.transform = state.transform.scale(s);
    }

    fn set_filter(&mut self, filter: Option<FilterChain>) {
        self.state_mut().current.filter = filter.filter(|f| !f.is_identity());
    }

    fn set_composite(&mut self, composite: Composite) {
        self.state_mut().current.composite = composite;
    }

    /// Clip to a circle given in current-transform coordinates
    fn clip_circle(&mut self, circle: Circle) {
        let state = &mut self.state_mut().current;
        let center = state.transform.apply(Point::new(circle.cx, circle.cy));
        let radius = circle.radius * state.transform.uniform_scale();
        state.clip = Some(Circle::new(center.x, center.y, radius));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-4 && (a.y - b.y).abs() < 1e-4
    }

    #[test]
    fn hex_colors() {
        assert_eq!(Rgba::from_hex("#f3f4f6").unwrap(), Rgba::new(0xf3, 0xf4, 0xf6, 255));
        assert_eq!(Rgba::from_hex("#00000080").unwrap(), Rgba::new(0, 0, 0, 0x80));
        assert!(Rgba::from_hex("f3f4f6").is_err());
        assert!(Rgba::from_hex("#f3f4").is_err());
        assert!(Rgba::from_hex("#gggggg").is_err());
    }

    #[test]
    fn composition_applies_innermost_first() {
        // translate(200,200) rotate(90deg) scale(2): (10, 0) -> (0, 20) -> (200, 220)
        let m = Affine::IDENTITY
            .translate(200.0, 200.0)
            .rotate(std::f32::consts::FRAC_PI_2)
            .scale(2.0);
        assert!(close(m.apply(Point::new(10.0, 0.0)), Point::new(200.0, 220.0)));
        assert!((m.uniform_scale() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn restore_without_save_is_ignored() {
        let mut stack = StateStack::default();
        stack.restore();
        assert_eq!(stack.depth(), 0);

        stack.save();
        stack.current.composite = Composite::DestinationOut;
        stack.restore();
        assert_eq!(stack.current().composite, Composite::SourceOver);
    }
}
