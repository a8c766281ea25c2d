//! Interactive preview rendering.
//!
//! [`render_preview`] is a pure function of the scene: the same transform,
//! image and canvas size always issue the same draw calls.

use super::adjust::FilterChain;
use super::source::SourceImage;
use super::transform::Transform;
use crate::surface::{
    Circle, Composite, PixmapSurface, Point, Rgba, StrokeStyle, Surface, SurfaceError,
};
use bytes::Bytes;

/// Canvas centre and crop circle for one canvas size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropGeometry {
    pub canvas: f32,
    pub center: f32,
    pub radius: f32,
}

impl CropGeometry {
    pub fn new(canvas_size: u32, crop_ratio: f32) -> Self {
        let canvas = canvas_size as f32;
        Self {
            canvas,
            center: canvas / 2.0,
            radius: canvas * crop_ratio,
        }
    }

    pub fn circle(&self) -> Circle {
        Circle::new(self.center, self.center, self.radius)
    }
}

/// Image-space to canvas-space matrix: translate to the offset centre,
/// rotate, scale, then centre the bitmap on the origin.
///
/// `factor` rescales every canvas-space length (1.0 for the preview).
#[cfg(test)]
pub fn image_matrix(
    center: f32,
    transform: &Transform,
    factor: f32,
    width: u32,
    height: u32,
) -> crate::surface::Affine {
    crate::surface::Affine::IDENTITY
        .translate(
            center + transform.translate_x() * factor,
            center + transform.translate_y() * factor,
        )
        .rotate(transform.rotation_radians())
        .scale(transform.scale() * factor)
        .translate(-(width as f32) / 2.0, -(height as f32) / 2.0)
}

/// Draw the source with the editor transform, inside a save/restore pair.
///
/// A preview proxy is stretched back to its natural size, so it lands
/// exactly where the full bitmap would.
pub fn draw_transformed<S: Surface + ?Sized>(
    surface: &mut S,
    source: &SourceImage,
    transform: &Transform,
    center: f32,
    factor: f32,
) {
    let (w, h) = source.pixels().dimensions();
    surface.save();
    surface.translate(
        center + transform.translate_x() * factor,
        center + transform.translate_y() * factor,
    );
    surface.rotate(transform.rotation_radians());
    surface.scale(transform.scale() * factor * source.texel_scale());
    surface.draw_image(source, -(w as f32) / 2.0, -(h as f32) / 2.0);
    surface.restore();
}

/// Colours and strokes of the preview chrome
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewStyle {
    pub background: Rgba,
    pub overlay: Rgba,
    pub border: StrokeStyle,
    pub guides: StrokeStyle,
}

impl Default for PreviewStyle {
    fn default() -> Self {
        Self {
            background: Rgba::new(0xf3, 0xf4, 0xf6, 255),
            overlay: Rgba::BLACK.with_opacity(0.5),
            border: StrokeStyle::solid(Rgba::WHITE, 2.0),
            guides: StrokeStyle::dashed(Rgba::WHITE.with_opacity(0.5), 1.0, 5.0, 5.0),
        }
    }
}

/// Everything the preview depends on
#[derive(Debug, Clone)]
pub struct Scene<'a> {
    pub source: Option<&'a SourceImage>,
    pub transform: Transform,
    pub canvas_size: u32,
    pub crop_ratio: f32,
    /// Filter for the image only; the overlay is never filtered
    pub filter: Option<FilterChain>,
}

/// Owned copy of a [`Scene`] that can be rasterized off the async runtime
#[derive(Debug, Clone)]
pub struct PreviewJob {
    pub source: Option<SourceImage>,
    pub transform: Transform,
    pub canvas_size: u32,
    pub crop_ratio: f32,
    pub filter: Option<FilterChain>,
    pub style: PreviewStyle,
    /// Session revision the job was taken from
    pub revision: u64,
}

impl PreviewJob {
    pub fn scene(&self) -> Scene<'_> {
        Scene {
            source: self.source.as_ref(),
            transform: self.transform,
            canvas_size: self.canvas_size,
            crop_ratio: self.crop_ratio,
            filter: self.filter.clone(),
        }
    }
}

/// Render a preview job to PNG.
///
/// `surface` from the previous frame is reused, together with its converted
/// bitmap, when one is given.
pub fn rasterize_preview(
    job: &PreviewJob,
    surface: Option<PixmapSurface>,
) -> Result<(PixmapSurface, Bytes), SurfaceError> {
    let mut surface = match surface {
        Some(surface) => surface.resized(job.canvas_size)?,
        None => PixmapSurface::new(job.canvas_size)?,
    };
    render_preview(&mut surface, &job.scene(), &job.style);
    let png = surface.to_png()?;
    Ok((surface, png))
}

/// Paint the interactive canvas
pub fn render_preview<S: Surface + ?Sized>(surface: &mut S, scene: &Scene<'_>, style: &PreviewStyle) {
    let geometry = CropGeometry::new(scene.canvas_size, scene.crop_ratio);
    let circle = geometry.circle();

    surface.clear(style.background);

    if let Some(source) = scene.source {
        surface.save();
        surface.set_filter(scene.filter.clone());
        draw_transformed(surface, source, &scene.transform, geometry.center, 1.0);
        surface.restore();
    }

    // Darken everything outside the crop circle
    surface.begin_layer();
    surface.fill_all(style.overlay);
    surface.save();
    surface.set_composite(Composite::DestinationOut);
    surface.fill_circle(circle, Rgba::BLACK);
    surface.restore();
    surface.end_layer();

    surface.stroke_circle(circle, &style.border);

    let (c, r) = (geometry.center, geometry.radius);
    surface.stroke_line(Point::new(c - r, c), Point::new(c + r, c), &style.guides);
    surface.stroke_line(Point::new(c, c - r), Point::new(c, c + r), &style.guides);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::adjust::{Adjustments, NamedFilter};
    use crate::surface::{DrawCommand, RecordingSurface};
    use image::RgbaImage;

    fn checker(w: u32, h: u32) -> SourceImage {
        SourceImage::from_rgba(RgbaImage::from_fn(w, h, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 {
                image::Rgba([220, 40, 40, 255])
            } else {
                image::Rgba([30, 30, 200, 255])
            }
        }))
    }

    fn scene(source: &SourceImage) -> Scene<'_> {
        Scene {
            source: Some(source),
            transform: Transform::new(0.28, 30.0, 12.0, -7.0),
            canvas_size: 400,
            crop_ratio: 0.35,
            filter: None,
        }
    }

    #[test]
    fn rendering_twice_is_bit_identical() {
        let source = checker(1000, 500);
        let scene = scene(&source);

        let mut a = PixmapSurface::new(400).unwrap();
        render_preview(&mut a, &scene, &PreviewStyle::default());
        let mut b = PixmapSurface::new(400).unwrap();
        render_preview(&mut b, &scene, &PreviewStyle::default());
        // Re-rendering onto a used surface gives the same pixels as well
        render_preview(&mut a, &scene, &PreviewStyle::default());

        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn draw_order_and_geometry() {
        let source = checker(100, 50);
        let mut surface = RecordingSurface::new();
        render_preview(&mut surface, &scene(&source), &PreviewStyle::default());

        let circle = Circle::new(200.0, 200.0, 140.0);
        let cmds = surface.commands();
        assert!(matches!(cmds[0], DrawCommand::Clear(_)));
        assert!(matches!(cmds[1], DrawCommand::DrawImage { filter: None, .. }));
        assert_eq!(cmds[2], DrawCommand::BeginLayer);
        assert!(matches!(
            cmds[3],
            DrawCommand::FillAll { composite: Composite::SourceOver, .. }
        ));
        assert!(matches!(
            cmds[4],
            DrawCommand::FillCircle { circle: c, composite: Composite::DestinationOut, .. } if c == circle
        ));
        assert_eq!(cmds[5], DrawCommand::EndLayer);
        assert!(matches!(cmds[6], DrawCommand::StrokeCircle { circle: c, .. } if c == circle));
        assert!(matches!(
            cmds[7],
            DrawCommand::StrokeLine { from, to, .. }
                if from == Point::new(60.0, 200.0) && to == Point::new(340.0, 200.0)
        ));
        assert!(matches!(
            cmds[8],
            DrawCommand::StrokeLine { from, to, .. }
                if from == Point::new(200.0, 60.0) && to == Point::new(200.0, 340.0)
        ));
        assert_eq!(cmds.len(), 9);
        assert_eq!(surface.state().depth(), 0);
    }

    #[test]
    fn image_transform_centres_bitmap_on_offset() {
        let source = checker(100, 50);
        let mut surface = RecordingSurface::new();
        let mut s = scene(&source);
        s.transform = Transform::new(2.0, 0.0, 20.0, -20.0);
        render_preview(&mut surface, &s, &PreviewStyle::default());

        let Some(DrawCommand::DrawImage { transform, .. }) = surface.image_draw() else {
            panic!("image not drawn");
        };
        // Bitmap centre lands at canvas centre + translation
        let centre = transform.apply(Point::new(50.0, 25.0));
        assert!((centre.x - 220.0).abs() < 1e-4);
        assert!((centre.y - 180.0).abs() < 1e-4);
        assert!((transform.uniform_scale() - 2.0).abs() < 1e-5);
        assert_eq!(*transform, image_matrix(200.0, &s.transform, 1.0, 100, 50));
    }

    #[test]
    fn proxy_draws_at_natural_size() {
        let full = checker(1000, 500);
        let proxied = checker(1000, 500).with_preview_proxy(250);
        let s = scene(&full);

        let mut a = RecordingSurface::new();
        render_preview(&mut a, &s, &PreviewStyle::default());
        let mut b = RecordingSurface::new();
        let proxy_scene = Scene {
            source: Some(proxied.preview()),
            ..s.clone()
        };
        render_preview(&mut b, &proxy_scene, &PreviewStyle::default());

        let Some(DrawCommand::DrawImage { transform: ta, .. }) = a.image_draw() else {
            panic!("image not drawn");
        };
        let Some(DrawCommand::DrawImage { transform: tb, .. }) = b.image_draw() else {
            panic!("proxy not drawn");
        };
        // Natural corners of both bitmaps land on the same canvas points
        for (pa, pb) in [
            (Point::new(0.0, 0.0), Point::new(0.0, 0.0)),
            (Point::new(1000.0, 500.0), Point::new(250.0, 125.0)),
        ] {
            let (qa, qb) = (ta.apply(pa), tb.apply(pb));
            assert!((qa.x - qb.x).abs() < 1e-3 && (qa.y - qb.y).abs() < 1e-3);
        }
    }

    #[test]
    fn reused_surface_keeps_converted_bitmap() {
        let source = checker(300, 200);
        let job = PreviewJob {
            source: Some(source),
            transform: Transform::new(0.5, 0.0, 0.0, 0.0),
            canvas_size: 400,
            crop_ratio: 0.35,
            filter: Some(Adjustments::new(120.0, 100.0, NamedFilter::Sepia(1.0)).chain()),
            style: PreviewStyle::default(),
            revision: 1,
        };

        let (surface, first) = rasterize_preview(&job, None).unwrap();
        assert_eq!(surface.conversions(), 1);

        let moved = PreviewJob {
            transform: Transform::new(0.5, 0.0, 15.0, -5.0),
            ..job.clone()
        };
        let (surface, _) = rasterize_preview(&moved, Some(surface)).unwrap();
        let (surface, again) = rasterize_preview(&job, Some(surface)).unwrap();
        assert_eq!(surface.conversions(), 1);
        assert_eq!(first, again);

        // A new filter or canvas size converts once more at most
        let regraded = PreviewJob {
            filter: None,
            canvas_size: 320,
            ..job
        };
        let (surface, png) = rasterize_preview(&regraded, Some(surface)).unwrap();
        assert_eq!(surface.conversions(), 2);
        assert_eq!(image::load_from_memory(&png).unwrap().width(), 320);
    }

    #[test]
    fn filter_reaches_image_only() {
        let source = checker(100, 50);
        let mut s = scene(&source);
        s.filter = Some(Adjustments::new(100.0, 100.0, NamedFilter::Sepia(1.0)).chain());
        let mut surface = RecordingSurface::new();
        render_preview(&mut surface, &s, &PreviewStyle::default());

        assert!(matches!(
            surface.image_draw(),
            Some(DrawCommand::DrawImage { filter: Some(_), .. })
        ));
        assert!(surface.state().current().filter.is_none());
    }

    #[test]
    fn unloaded_scene_still_draws_chrome() {
        let mut surface = RecordingSurface::new();
        let scene = Scene {
            source: None,
            transform: Transform::IDENTITY,
            canvas_size: 300,
            crop_ratio: 0.35,
            filter: None,
        };
        render_preview(&mut surface, &scene, &PreviewStyle::default());
        assert!(surface.image_draw().is_none());
        assert!(surface
            .commands()
            .iter()
            .any(|c| matches!(c, DrawCommand::StrokeCircle { .. })));
    }

    #[test]
    fn crop_circle_shows_image_and_rim_is_darkened() {
        let source = SourceImage::from_rgba(RgbaImage::from_pixel(
            400,
            400,
            image::Rgba([255, 255, 255, 255]),
        ));
        let scene = Scene {
            source: Some(&source),
            transform: Transform::IDENTITY,
            canvas_size: 400,
            crop_ratio: 0.35,
            filter: None,
        };
        let mut surface = PixmapSurface::new(400).unwrap();
        render_preview(&mut surface, &scene, &PreviewStyle::default());

        // Inside the hole but off the guide lines
        assert_eq!(surface.pixel(150, 150).unwrap(), Rgba::WHITE);
        let corner = surface.pixel(5, 5).unwrap();
        assert!(corner.r < 140 && corner.a == 255);
    }
}
