//! Final avatar export.
//!
//! Renders the crop circle at a fixed output resolution, independent of the
//! on-screen canvas size, and encodes it as JPEG.

use super::adjust::FilterChain;
use super::render::draw_transformed;
use super::source::SourceImage;
use super::transform::Transform;
use crate::surface::{Circle, PixmapSurface, Rgba, Surface, SurfaceError};
use bytes::Bytes;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("JPEG encode failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Export worker failed: {0}")]
    Worker(String),
}

/// Mapping from the interactive canvas to the output canvas.
///
/// The crop circle (radius `crop_ratio * canvas`) becomes the circle
/// inscribed in the output, so every canvas-space length is multiplied by
/// `output / (2 * crop_ratio * canvas)`, not `output / canvas`: scaling the
/// whole canvas would export a wider area than the overlay hole shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportGeometry {
    pub output_size: u32,
    pub factor: f32,
}

impl ExportGeometry {
    pub fn new(output_size: u32, canvas_size: u32, crop_ratio: f32) -> Self {
        let crop_diameter = 2.0 * crop_ratio * canvas_size.max(1) as f32;
        Self {
            output_size,
            factor: output_size as f32 / crop_diameter,
        }
    }

    pub fn center(&self) -> f32 {
        self.output_size as f32 / 2.0
    }

    pub fn clip(&self) -> Circle {
        let c = self.center();
        Circle::new(c, c, c)
    }
}

/// Everything needed to produce the output blob; owns its data so it can
/// run off the async thread
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub source: SourceImage,
    pub transform: Transform,
    pub filter: FilterChain,
    pub geometry: ExportGeometry,
    pub matte: Rgba,
    pub quality: u8,
}

/// Draw the clipped, filtered avatar onto an output-sized surface
pub fn draw_export<S: Surface + ?Sized>(
    surface: &mut S,
    source: &SourceImage,
    transform: &Transform,
    filter: &FilterChain,
    geometry: &ExportGeometry,
) {
    surface.save();
    surface.clip_circle(geometry.clip());
    surface.set_filter(Some(filter.clone()));
    draw_transformed(surface, source, transform, geometry.center(), geometry.factor);
    surface.restore();
}

/// Encode RGB pixels as JPEG at the given quality (1..=100)
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Bytes, ExportError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    image.write_with_encoder(encoder)?;
    Ok(Bytes::from(buf))
}

/// Rasterize and encode synchronously
pub fn render_export(job: &ExportJob) -> Result<Bytes, ExportError> {
    tracing::info!(
        "Exporting {}px avatar (factor {:.3}, filter '{}')",
        job.geometry.output_size,
        job.geometry.factor,
        job.filter.css()
    );

    let mut surface = PixmapSurface::new(job.geometry.output_size)?;
    draw_export(
        &mut surface,
        &job.source,
        &job.transform,
        &job.filter,
        &job.geometry,
    );

    let blob = encode_jpeg(&surface.to_rgb_over(job.matte), job.quality)?;
    tracing::info!("Encoded avatar: {} bytes", blob.len());
    Ok(blob)
}

/// Rasterize and encode on the blocking pool
pub async fn export_avatar(job: ExportJob) -> Result<Bytes, ExportError> {
    tokio::task::spawn_blocking(move || render_export(&job))
        .await
        .map_err(|e| ExportError::Worker(e.to_string()))?
}
