//! Transform state and the interaction controls that mutate it.
//!
//! Provides auto-fit, drag, zoom, rotation and reset for the editor canvas.

use serde::{Deserialize, Serialize};

/// Smallest scale ever stored
const MIN_SCALE: f32 = 1e-4;

/// Normalize an angle into [0, 360)
pub fn normalize_degrees(degrees: f32) -> f32 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Scale at which the image's larger side spans `fit_ratio` of the canvas
pub fn auto_fit_scale(canvas_size: u32, width: u32, height: u32, fit_ratio: f32) -> f32 {
    let longest = width.max(height).max(1) as f32;
    (canvas_size as f32 * fit_ratio / longest).max(MIN_SCALE)
}

/// How the source bitmap maps onto the canvas: uniform scale, clockwise
/// rotation, and the offset of the image centre from the canvas centre
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    scale: f32,
    rotation_degrees: f32,
    translate_x: f32,
    translate_y: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        scale: 1.0,
        rotation_degrees: 0.0,
        translate_x: 0.0,
        translate_y: 0.0,
    };

    /// Build a transform, enforcing `scale > 0` and rotation in [0, 360)
    pub fn new(scale: f32, rotation_degrees: f32, translate_x: f32, translate_y: f32) -> Self {
        let mut t = Self::IDENTITY;
        t.set_scale(scale);
        t.set_rotation(rotation_degrees);
        t.set_translation(translate_x, translate_y);
        t
    }

    /// Identity rotation and translation at the given scale
    pub fn fitted(scale: f32) -> Self {
        Self::new(scale, 0.0, 0.0, 0.0)
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn rotation_degrees(&self) -> f32 {
        self.rotation_degrees
    }

    pub fn rotation_radians(&self) -> f32 {
        self.rotation_degrees.to_radians()
    }

    pub fn translate_x(&self) -> f32 {
        self.translate_x
    }

    pub fn translate_y(&self) -> f32 {
        self.translate_y
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = if scale.is_finite() { scale.max(MIN_SCALE) } else { 1.0 };
    }

    pub fn set_rotation(&mut self, degrees: f32) {
        self.rotation_degrees = normalize_degrees(degrees);
    }

    pub fn set_translation(&mut self, x: f32, y: f32) {
        if x.is_finite() && y.is_finite() {
            self.translate_x = x;
            self.translate_y = y;
        }
    }

    /// Scale every canvas-space quantity by `factor`: used when the canvas
    /// is resized so the visible crop stays put
    pub fn rescaled(&self, factor: f32) -> Self {
        Self::new(
            self.scale * factor,
            self.rotation_degrees,
            self.translate_x * factor,
            self.translate_y * factor,
        )
    }
}

/// Slider and step bounds for zoom controls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomLimits {
    /// Slider range in percent
    pub percent_min: f32,
    pub percent_max: f32,
    /// Bounds for incremental zoom steps
    pub step_min: f32,
    pub step_max: f32,
    /// Increment used by zoom in/out buttons
    pub step: f32,
}

impl Default for ZoomLimits {
    fn default() -> Self {
        Self {
            percent_min: 10.0,
            percent_max: 300.0,
            step_min: 0.1,
            step_max: 3.0,
            step: 0.1,
        }
    }
}

/// Pointer drag tracking
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DragState {
    /// Pointer position minus translation at drag start
    offset: Option<(f32, f32)>,
}

impl DragState {
    pub fn is_dragging(&self) -> bool {
        self.offset.is_some()
    }
}

/// Interaction controller: pointer drags plus discrete controls.
///
/// Dragging is unbounded: the image may be moved entirely off the canvas.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Controller {
    pub transform: Transform,
    pub drag: DragState,
    pub limits: ZoomLimits,
}

impl Controller {
    pub fn new(transform: Transform, limits: ZoomLimits) -> Self {
        Self {
            transform,
            drag: DragState::default(),
            limits,
        }
    }

    pub fn drag_start(&mut self, x: f32, y: f32) {
        self.drag.offset = Some((
            x - self.transform.translate_x,
            y - self.transform.translate_y,
        ));
    }

    /// Returns true if the transform changed
    pub fn drag_move(&mut self, x: f32, y: f32) -> bool {
        let Some((ox, oy)) = self.drag.offset else {
            return false;
        };
        let before = self.transform;
        self.transform.set_translation(x - ox, y - oy);
        before != self.transform
    }

    pub fn drag_end(&mut self) {
        self.drag.offset = None;
    }

    /// Slider zoom; the percentage is clamped to the slider range
    pub fn set_zoom_percent(&mut self, percent: f32) {
        let percent = if percent.is_finite() {
            percent.clamp(self.limits.percent_min, self.limits.percent_max)
        } else {
            100.0
        };
        self.transform.set_scale(percent / 100.0);
    }

    /// Current scale as a slider percentage
    pub fn zoom_percent(&self) -> f32 {
        self.transform.scale * 100.0
    }

    /// Incremental zoom, result clamped to the step bounds
    pub fn zoom_step(&mut self, delta: f32) {
        let delta = if delta.is_finite() { delta } else { 0.0 };
        let next = (self.transform.scale + delta).clamp(self.limits.step_min, self.limits.step_max);
        self.transform.set_scale(next);
    }

    pub fn zoom_in(&mut self) {
        self.zoom_step(self.limits.step);
    }

    pub fn zoom_out(&mut self) {
        self.zoom_step(-self.limits.step);
    }

    /// Quarter turn clockwise
    pub fn rotate_step(&mut self) {
        self.transform
            .set_rotation(self.transform.rotation_degrees + 90.0);
    }

    pub fn reset(&mut self) {
        self.transform = Transform::IDENTITY;
    }

    /// Auto-fit the loaded image and clear rotation and translation
    pub fn fit(&mut self, canvas_size: u32, width: u32, height: u32, fit_ratio: f32) {
        self.transform = Transform::fitted(auto_fit_scale(canvas_size, width, height, fit_ratio));
    }
}
