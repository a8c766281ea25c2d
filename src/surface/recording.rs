//! Command-log backend for geometry tests.

use super::{Affine, Circle, Composite, Point, Rgba, StateStack, StrokeStyle, Surface};
use crate::editor::adjust::FilterChain;
use crate::editor::source::SourceImage;
use uuid::Uuid;

/// One recorded draw call with the state it was issued under
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Clear(Rgba),
    FillAll {
        color: Rgba,
        composite: Composite,
        clip: Option<Circle>,
    },
    FillCircle {
        circle: Circle,
        color: Rgba,
        composite: Composite,
        transform: Affine,
    },
    StrokeCircle {
        circle: Circle,
        style: StrokeStyle,
        transform: Affine,
    },
    StrokeLine {
        from: Point,
        to: Point,
        style: StrokeStyle,
        transform: Affine,
    },
    DrawImage {
        image: Uuid,
        /// Full image-space to surface-space mapping, including the draw offset
        transform: Affine,
        filter: Option<FilterChain>,
        clip: Option<Circle>,
    },
    BeginLayer,
    EndLayer,
}

/// Surface that records instead of rasterizing
#[derive(Debug, Default)]
pub struct RecordingSurface {
    state: StateStack,
    commands: Vec<DrawCommand>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// First image draw, if any
    pub fn image_draw(&self) -> Option<&DrawCommand> {
        self.commands
            .iter()
            .find(|c| matches!(c, DrawCommand::DrawImage { .. }))
    }
}

impl Surface for RecordingSurface {
    fn state(&self) -> &StateStack {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StateStack {
        &mut self.state
    }

    fn clear(&mut self, color: Rgba) {
        self.commands.push(DrawCommand::Clear(color));
    }

    fn fill_all(&mut self, color: Rgba) {
        let state = self.state.current();
        self.commands.push(DrawCommand::FillAll {
            color,
            composite: state.composite,
            clip: state.clip,
        });
    }

    fn fill_circle(&mut self, circle: Circle, color: Rgba) {
        let state = self.state.current();
        self.commands.push(DrawCommand::FillCircle {
            circle,
            color,
            composite: state.composite,
            transform: state.transform,
        });
    }

    fn stroke_circle(&mut self, circle: Circle, style: &StrokeStyle) {
        let transform = self.state.current().transform;
        self.commands.push(DrawCommand::StrokeCircle {
            circle,
            style: *style,
            transform,
        });
    }

    fn stroke_line(&mut self, from: Point, to: Point, style: &StrokeStyle) {
        let transform = self.state.current().transform;
        self.commands.push(DrawCommand::StrokeLine {
            from,
            to,
            style: *style,
            transform,
        });
    }

    fn draw_image(&mut self, image: &SourceImage, x: f32, y: f32) {
        let state = self.state.current();
        self.commands.push(DrawCommand::DrawImage {
            image: image.id(),
            transform: state.transform.translate(x, y),
            filter: state.filter.clone(),
            clip: state.clip,
        });
    }

    fn begin_layer(&mut self) {
        self.commands.push(DrawCommand::BeginLayer);
    }

    fn end_layer(&mut self) {
        self.commands.push(DrawCommand::EndLayer);
    }
}
