//! tiny-skia raster backend.

use super::{Circle, Composite, Point, Rgba, StateStack, StrokeStyle, Surface, SurfaceError};
use crate::editor::adjust::FilterChain;
use crate::editor::source::SourceImage;
use bytes::Bytes;
use image::{RgbImage, RgbaImage};
use tiny_skia::{
    BlendMode, Color, FillRule, FilterQuality, IntSize, Mask, Paint, PathBuilder, Pixmap,
    PixmapPaint, Rect, Stroke, StrokeDash, Transform,
};
use uuid::Uuid;

/// Source bitmap converted (and filtered) for the last draw
struct CachedImage {
    id: Uuid,
    filter: Option<FilterChain>,
    pixmap: Pixmap,
}

/// Square RGBA raster surface
pub struct PixmapSurface {
    base: Pixmap,
    layers: Vec<Pixmap>,
    state: StateStack,
    size: u32,
    image_cache: Option<CachedImage>,
    /// Source bitmaps converted so far
    conversions: u64,
}

impl PixmapSurface {
    /// Create a transparent surface
    pub fn new(size: u32) -> Result<Self, SurfaceError> {
        let base = Pixmap::new(size, size).ok_or(SurfaceError::InvalidSize(size))?;
        Ok(Self {
            base,
            layers: Vec::new(),
            state: StateStack::default(),
            size,
            image_cache: None,
            conversions: 0,
        })
    }

    /// Reuse this surface at another size, keeping the converted bitmap
    pub fn resized(self, size: u32) -> Result<Self, SurfaceError> {
        if size == self.size {
            return Ok(self);
        }
        Ok(Self {
            image_cache: self.image_cache,
            conversions: self.conversions,
            ..Self::new(size)?
        })
    }

    #[cfg(test)]
    pub fn conversions(&self) -> u64 {
        self.conversions
    }

    /// Premultiplied RGBA bytes of the base layer
    #[cfg(test)]
    pub fn data(&self) -> &[u8] {
        self.base.data()
    }

    /// Read back one pixel (non-premultiplied)
    #[cfg(test)]
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        self.base.pixel(x, y).map(|p| {
            let c = p.demultiply();
            Rgba::new(c.red(), c.green(), c.blue(), c.alpha())
        })
    }

    /// Copy the base layer out as a straight-alpha image
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.size, self.size);
        for (dst, src) in out.pixels_mut().zip(self.base.pixels()) {
            let c = src.demultiply();
            *dst = image::Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
        }
        out
    }

    /// Flatten onto an opaque matte colour (JPEG has no alpha channel)
    pub fn to_rgb_over(&self, matte: Rgba) -> RgbImage {
        let mut out = RgbImage::new(self.size, self.size);
        for (dst, src) in out.pixels_mut().zip(self.base.pixels()) {
            // Premultiplied source-over onto an opaque backdrop
            let inv = 255 - src.alpha() as u16;
            let over = |c: u8, m: u8| (c as u16 + (m as u16 * inv + 127) / 255).min(255) as u8;
            *dst = image::Rgb([
                over(src.red(), matte.r),
                over(src.green(), matte.g),
                over(src.blue(), matte.b),
            ]);
        }
        out
    }

    /// Encode the base layer as PNG
    pub fn to_png(&self) -> Result<Bytes, SurfaceError> {
        let mut buf = std::io::Cursor::new(Vec::new());
        self.to_rgba_image()
            .write_to(&mut buf, image::ImageFormat::Png)?;
        Ok(Bytes::from(buf.into_inner()))
    }

    fn clip_mask(&self) -> Option<Mask> {
        let clip = self.state.current().clip?;
        let path = PathBuilder::from_circle(clip.cx, clip.cy, clip.radius)?;
        let mut mask = Mask::new(self.size, self.size)?;
        mask.fill_path(&path, FillRule::Winding, true, Transform::identity());
        Some(mask)
    }

    fn paint(&self, color: Rgba) -> Paint<'static> {
        let mut paint = Paint::default();
        paint.set_color_rgba8(color.r, color.g, color.b, color.a);
        paint.anti_alias = true;
        paint.blend_mode = blend_mode(self.state.current().composite);
        paint
    }

    fn target(&mut self) -> &mut Pixmap {
        match self.layers.last_mut() {
            Some(layer) => layer,
            None => &mut self.base,
        }
    }

    fn refresh_image_cache(&mut self, image: &SourceImage) {
        let filter = self.state.current().filter.clone();
        let fresh = matches!(
            &self.image_cache,
            Some(cached) if cached.id == image.id() && cached.filter == filter
        );
        if fresh {
            return;
        }

        self.conversions += 1;
        tracing::debug!(
            "Converting {}x{} source (conversion {})",
            image.pixels().width(),
            image.pixels().height(),
            self.conversions
        );
        self.image_cache = to_pixmap(image.pixels(), filter.as_ref()).map(|pixmap| CachedImage {
            id: image.id(),
            filter,
            pixmap,
        });
        if self.image_cache.is_none() {
            tracing::warn!(
                "Cannot rasterize {}x{} source image",
                image.width(),
                image.height()
            );
        }
    }
}

impl Surface for PixmapSurface {
    #[cfg(test)]
    fn state(&self) -> &StateStack {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StateStack {
        &mut self.state
    }

    fn clear(&mut self, color: Rgba) {
        self.target()
            .fill(Color::from_rgba8(color.r, color.g, color.b, color.a));
    }

    fn fill_all(&mut self, color: Rgba) {
        let Some(rect) = Rect::from_xywh(0.0, 0.0, self.size as f32, self.size as f32) else {
            return;
        };
        let paint = self.paint(color);
        let mask = self.clip_mask();
        self.target()
            .fill_rect(rect, &paint, Transform::identity(), mask.as_ref());
    }

    fn fill_circle(&mut self, circle: Circle, color: Rgba) {
        let Some(path) = PathBuilder::from_circle(circle.cx, circle.cy, circle.radius) else {
            return;
        };
        let paint = self.paint(color);
        let mask = self.clip_mask();
        let transform = self.state.current().transform.to_skia();
        self.target()
            .fill_path(&path, &paint, FillRule::Winding, transform, mask.as_ref());
    }

    fn stroke_circle(&mut self, circle: Circle, style: &StrokeStyle) {
        let Some(path) = PathBuilder::from_circle(circle.cx, circle.cy, circle.radius) else {
            return;
        };
        let paint = self.paint(style.color);
        let mask = self.clip_mask();
        let transform = self.state.current().transform.to_skia();
        self.target()
            .stroke_path(&path, &paint, &stroke(style), transform, mask.as_ref());
    }

    fn stroke_line(&mut self, from: Point, to: Point, style: &StrokeStyle) {
        let mut pb = PathBuilder::new();
        pb.move_to(from.x, from.y);
        pb.line_to(to.x, to.y);
        let Some(path) = pb.finish() else {
            return;
        };
        let paint = self.paint(style.color);
        let mask = self.clip_mask();
        let transform = self.state.current().transform.to_skia();
        self.target()
            .stroke_path(&path, &paint, &stroke(style), transform, mask.as_ref());
    }

    fn draw_image(&mut self, image: &SourceImage, x: f32, y: f32) {
        self.refresh_image_cache(image);

        let mask = self.clip_mask();
        let transform = self.state.current().transform.translate(x, y).to_skia();
        let paint = PixmapPaint {
            opacity: 1.0,
            blend_mode: blend_mode(self.state.current().composite),
            quality: FilterQuality::Bilinear,
        };

        let target = match self.layers.last_mut() {
            Some(layer) => layer,
            None => &mut self.base,
        };
        if let Some(cached) = &self.image_cache {
            target.draw_pixmap(0, 0, cached.pixmap.as_ref(), &paint, transform, mask.as_ref());
        }
    }

    fn begin_layer(&mut self) {
        match Pixmap::new(self.size, self.size) {
            Some(layer) => self.layers.push(layer),
            None => tracing::warn!("Cannot allocate {}px layer", self.size),
        }
    }

    fn end_layer(&mut self) {
        let Some(top) = self.layers.pop() else {
            return;
        };
        self.target().draw_pixmap(
            0,
            0,
            top.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
    }
}

fn blend_mode(composite: Composite) -> BlendMode {
    match composite {
        Composite::SourceOver => BlendMode::SourceOver,
        Composite::DestinationOut => BlendMode::DestinationOut,
    }
}

fn stroke(style: &StrokeStyle) -> Stroke {
    let mut stroke = Stroke {
        width: style.width,
        ..Stroke::default()
    };
    if let Some([on, off]) = style.dash {
        stroke.dash = StrokeDash::new(vec![on, off], 0.0);
    }
    stroke
}

/// Premultiply (and optionally filter) a straight-alpha image into a pixmap
fn to_pixmap(image: &RgbaImage, filter: Option<&FilterChain>) -> Option<Pixmap> {
    let filtered;
    let pixels = match filter {
        Some(chain) => {
            filtered = chain.apply(image);
            &filtered
        }
        None => image,
    };

    let premultiply = |c: u8, a: u8| ((c as u16 * a as u16 + 127) / 255) as u8;
    let mut data = Vec::with_capacity(pixels.as_raw().len());
    for p in pixels.pixels() {
        let [r, g, b, a] = p.0;
        data.extend_from_slice(&[
            premultiply(r, a),
            premultiply(g, a),
            premultiply(b, a),
            a,
        ]);
    }

    Pixmap::from_vec(data, IntSize::from_wh(pixels.width(), pixels.height())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_image(w: u32, h: u32, rgba: [u8; 4]) -> SourceImage {
        SourceImage::from_rgba(RgbaImage::from_pixel(w, h, image::Rgba(rgba)))
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(matches!(
            PixmapSurface::new(0),
            Err(SurfaceError::InvalidSize(0))
        ));
    }

    #[test]
    fn clip_limits_fill() {
        let mut surface = PixmapSurface::new(100).unwrap();
        surface.clip_circle(Circle::new(50.0, 50.0, 20.0));
        surface.fill_all(Rgba::new(255, 0, 0, 255));

        assert_eq!(surface.pixel(50, 50).unwrap(), Rgba::new(255, 0, 0, 255));
        assert_eq!(surface.pixel(2, 2).unwrap().a, 0);
    }

    #[test]
    fn layer_erase_does_not_touch_base() {
        let mut surface = PixmapSurface::new(100).unwrap();
        surface.clear(Rgba::WHITE);

        surface.begin_layer();
        surface.fill_all(Rgba::new(0, 0, 0, 128));
        surface.set_composite(Composite::DestinationOut);
        surface.fill_circle(Circle::new(50.0, 50.0, 30.0), Rgba::BLACK);
        surface.set_composite(Composite::SourceOver);
        surface.end_layer();

        // Hole shows the untouched base; the rim is darkened
        assert_eq!(surface.pixel(50, 50).unwrap(), Rgba::WHITE);
        let rim = surface.pixel(2, 2).unwrap();
        assert!(rim.r < 200 && rim.a == 255);
    }

    #[test]
    fn image_draws_through_transform() {
        let mut surface = PixmapSurface::new(100).unwrap();
        let img = solid_image(10, 10, [0, 0, 255, 255]);

        surface.translate(50.0, 50.0);
        surface.scale(2.0);
        surface.draw_image(&img, -5.0, -5.0);

        // 20x20 square centred on (50, 50)
        assert_eq!(surface.pixel(50, 50).unwrap(), Rgba::new(0, 0, 255, 255));
        assert_eq!(surface.pixel(42, 42).unwrap(), Rgba::new(0, 0, 255, 255));
        assert_eq!(surface.pixel(35, 35).unwrap().a, 0);
    }

    #[test]
    fn unchanged_image_is_converted_once() {
        let mut surface = PixmapSurface::new(50).unwrap();
        let img = solid_image(10, 10, [0, 0, 255, 255]);
        surface.draw_image(&img, 0.0, 0.0);
        surface.draw_image(&img, 5.0, 5.0);
        assert_eq!(surface.conversions(), 1);

        let mut surface = surface.resized(80).unwrap();
        assert_eq!(surface.pixel(79, 79).unwrap().a, 0);
        surface.draw_image(&img, 0.0, 0.0);
        assert_eq!(surface.conversions(), 1);

        surface.set_filter(Some(
            crate::editor::Adjustments::new(150.0, 100.0, crate::editor::NamedFilter::None).chain(),
        ));
        surface.draw_image(&img, 0.0, 0.0);
        assert_eq!(surface.conversions(), 2);
    }

    #[test]
    fn matte_fills_transparent_pixels() {
        let surface = PixmapSurface::new(4).unwrap();
        let rgb = surface.to_rgb_over(Rgba::WHITE);
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[test]
    fn png_encodes() {
        let mut surface = PixmapSurface::new(8).unwrap();
        surface.clear(Rgba::BLACK);
        let png = surface.to_png().unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}
