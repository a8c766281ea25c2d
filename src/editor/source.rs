//! Image reference resolution and decoding.
//!
//! Handles fetching images from HTTP/HTTPS URLs with retry logic, resolving
//! in-memory object URLs, and reading local files.
//!
//! Uses a shared HTTP client to avoid connection pool leaks; the upload
//! collaborator reuses it.

use super::blob::{BLOB_SCHEME, BlobStore};
use bytes::Bytes;
use image::RgbaImage;
use once_cell::sync::Lazy;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Shared HTTP client for image fetches and uploads
///
/// Configured with:
/// - 30 second timeout
/// - Single idle connection per host
/// - 30 second idle timeout
pub(crate) static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(1)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to create HTTP client")
});

/// Load errors
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("HTTP error: {status}")]
    HttpError { status: u16 },

    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Image decode failed: {0}")]
    DecodeError(#[from] image::ImageError),

    #[error("Unknown or revoked object URL: {0}")]
    UnknownObjectUrl(String),

    #[error("Image {width}x{height} exceeds the {max}px limit")]
    TooLarge { width: u32, height: u32, max: u32 },

    #[error("Empty image reference")]
    EmptyReference,

    #[error("Download timeout")]
    Timeout,

    #[error("Decode worker failed: {0}")]
    Worker(String),
}

/// Where an image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// `http://` or `https://`
    Remote(String),
    /// `blob:<uuid>` created by a [`BlobStore`]
    ObjectUrl(String),
    /// `file://` URL or plain filesystem path
    File(PathBuf),
}

impl ImageRef {
    /// Classify a reference string
    pub fn parse(reference: &str) -> Result<Self, LoadError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(LoadError::EmptyReference);
        }

        let lower = reference.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(ImageRef::Remote(reference.to_string()))
        } else if lower.starts_with(BLOB_SCHEME) {
            Ok(ImageRef::ObjectUrl(reference.to_string()))
        } else if let Some(path) = reference.strip_prefix("file://") {
            Ok(ImageRef::File(PathBuf::from(path)))
        } else {
            Ok(ImageRef::File(PathBuf::from(reference)))
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageRef::Remote(url) | ImageRef::ObjectUrl(url) => f.write_str(url),
            ImageRef::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Decoded bitmap, immutable once loaded; cheap to clone
///
/// A large bitmap can carry a downscaled preview proxy. The proxy keeps the
/// natural size of its original, so geometry never depends on which of the
/// two is drawn.
#[derive(Debug, Clone)]
pub struct SourceImage {
    id: Uuid,
    pixels: Arc<RgbaImage>,
    width: u32,
    height: u32,
    proxy: Option<Arc<SourceImage>>,
}

impl SourceImage {
    pub fn from_rgba(pixels: RgbaImage) -> Self {
        Self {
            id: Uuid::new_v4(),
            width: pixels.width(),
            height: pixels.height(),
            pixels: Arc::new(pixels),
            proxy: None,
        }
    }

    /// Attach a preview proxy whose longer side is at most `max_edge`.
    /// Images already within the limit are left alone.
    pub fn with_preview_proxy(mut self, max_edge: u32) -> Self {
        let longest = self.width.max(self.height);
        if max_edge == 0 || longest <= max_edge {
            return self;
        }

        let ratio = max_edge as f32 / longest as f32;
        let width = ((self.width as f32 * ratio).round() as u32).max(1);
        let height = ((self.height as f32 * ratio).round() as u32).max(1);
        let pixels = image::imageops::resize(
            self.pixels.as_ref(),
            width,
            height,
            image::imageops::FilterType::Triangle,
        );
        tracing::debug!(
            "Preview proxy {}x{} for {}x{} source",
            width,
            height,
            self.width,
            self.height
        );

        self.proxy = Some(Arc::new(SourceImage {
            id: Uuid::new_v4(),
            pixels: Arc::new(pixels),
            width: self.width,
            height: self.height,
            proxy: None,
        }));
        self
    }

    /// Bitmap to draw in the interactive preview
    pub fn preview(&self) -> &SourceImage {
        self.proxy.as_deref().unwrap_or(self)
    }

    /// Identity of these pixels, used to cache converted bitmaps
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Natural width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Natural height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Natural pixels per stored pixel (1.0 unless this is a proxy)
    pub fn texel_scale(&self) -> f32 {
        self.width as f32 / self.pixels.width().max(1) as f32
    }
}

/// Load configuration
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Maximum number of attempts for remote references
    pub max_retries: u32,
    /// Base delay between retries (doubled each attempt)
    pub retry_delay: Duration,
    /// Largest accepted natural dimension
    pub max_dimension: u32,
    /// Longest side of the preview proxy; 0 draws the full bitmap
    pub preview_max_edge: u32,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            max_dimension: 8192,
            preview_max_edge: 1000,
        }
    }
}

/// Resolve and decode an image reference
pub async fn load_source(
    reference: &ImageRef,
    blobs: &BlobStore,
    config: &LoadConfig,
) -> Result<SourceImage, LoadError> {
    tracing::info!("Loading image from: {}", reference);

    let bytes = match reference {
        ImageRef::Remote(url) => fetch_with_retry(&HTTP_CLIENT, url, config).await?,
        ImageRef::ObjectUrl(url) => blobs
            .resolve(url)
            .ok_or_else(|| LoadError::UnknownObjectUrl(url.clone()))?,
        ImageRef::File(path) => Bytes::from(tokio::fs::read(path).await?),
    };

    tracing::debug!("Read {} bytes, decoding image...", bytes.len());
    let (max_dimension, preview_max_edge) = (config.max_dimension, config.preview_max_edge);
    tokio::task::spawn_blocking(move || {
        decode_image(&bytes, max_dimension).map(|img| img.with_preview_proxy(preview_max_edge))
    })
    .await
    .map_err(|e| LoadError::Worker(e.to_string()))?
}

fn reader(bytes: &[u8]) -> Result<image::ImageReader<Cursor<&[u8]>>, LoadError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| LoadError::DecodeError(image::ImageError::IoError(e)))
}

/// Decode encoded image bytes, guessing the format.
///
/// The header is checked against `max_dimension` before any pixel data is
/// decoded.
pub fn decode_image(bytes: &[u8], max_dimension: u32) -> Result<SourceImage, LoadError> {
    let (width, height) = reader(bytes)?.into_dimensions()?;
    if width > max_dimension || height > max_dimension {
        tracing::warn!("Rejecting {}x{} image before decode", width, height);
        return Err(LoadError::TooLarge {
            width,
            height,
            max: max_dimension,
        });
    }

    let img = reader(bytes)?.decode()?;
    tracing::info!("Image decoded: {}x{}", img.width(), img.height());

    Ok(SourceImage::from_rgba(img.into_rgba8()))
}

/// Fetch with retry logic
async fn fetch_with_retry(
    client: &reqwest::Client,
    url: &str,
    config: &LoadConfig,
) -> Result<Bytes, LoadError> {
    let mut last_error = None;

    for attempt in 0..config.max_retries {
        if attempt > 0 {
            let delay = config.retry_delay * 2u32.pow(attempt - 1);
            tracing::debug!(
                "Retry attempt {}/{}, waiting {:?}",
                attempt + 1,
                config.max_retries,
                delay
            );
            tokio::time::sleep(delay).await;
        }

        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    match response.bytes().await {
                        Ok(bytes) => return Ok(bytes),
                        Err(e) => {
                            tracing::warn!("Failed to read response body: {}", e);
                            last_error = Some(LoadError::RequestError(e));
                        }
                    }
                } else if status.is_client_error() {
                    // 4xx will not get better on retry
                    tracing::warn!("HTTP error: {} for {}", status, url);
                    return Err(LoadError::HttpError {
                        status: status.as_u16(),
                    });
                } else {
                    tracing::warn!("HTTP error: {} for {}", status, url);
                    last_error = Some(LoadError::HttpError {
                        status: status.as_u16(),
                    });
                }
            }
            Err(e) => {
                tracing::warn!("Request failed: {} for {}", e, url);
                last_error = Some(LoadError::RequestError(e));
            }
        }
    }

    Err(last_error.unwrap_or(LoadError::Timeout))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// PNG-encoded solid image
    pub(crate) fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Bytes {
        let img = RgbaImage::from_pixel(width, height, image::Rgba(rgba));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        Bytes::from(buf.into_inner())
    }

    #[test]
    fn classifies_references() {
        assert_eq!(
            ImageRef::parse(" https://example.org/a.png ").unwrap(),
            ImageRef::Remote("https://example.org/a.png".into())
        );
        assert_eq!(
            ImageRef::parse("blob:1234").unwrap(),
            ImageRef::ObjectUrl("blob:1234".into())
        );
        assert_eq!(
            ImageRef::parse("file:///tmp/a.png").unwrap(),
            ImageRef::File(PathBuf::from("/tmp/a.png"))
        );
        assert_eq!(
            ImageRef::parse("pics/a.jpg").unwrap(),
            ImageRef::File(PathBuf::from("pics/a.jpg"))
        );
        assert!(matches!(
            ImageRef::parse("   "),
            Err(LoadError::EmptyReference)
        ));
    }

    #[test]
    fn decode_reports_natural_size() {
        let img = decode_image(&png_bytes(30, 20, [1, 2, 3, 255]), 8192).unwrap();
        assert_eq!((img.width(), img.height()), (30, 20));
    }

    #[test]
    fn decode_rejects_oversized_and_garbage() {
        assert!(matches!(
            decode_image(&png_bytes(30, 20, [0, 0, 0, 255]), 25),
            Err(LoadError::TooLarge { width: 30, .. })
        ));
        assert!(matches!(
            decode_image(b"definitely not an image", 8192),
            Err(LoadError::DecodeError(_))
        ));
    }

    fn crc32(bytes: &[u8]) -> u32 {
        let mut crc = 0xffff_ffffu32;
        for &b in bytes {
            crc ^= b as u32;
            for _ in 0..8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xedb8_8320
                } else {
                    crc >> 1
                };
            }
        }
        !crc
    }

    fn push_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        let mut body = kind.to_vec();
        body.extend_from_slice(data);
        out.extend_from_slice(&body);
        out.extend_from_slice(&crc32(&body).to_be_bytes());
    }

    /// Valid PNG header announcing `width`x`height`, followed by pixel data
    /// that cannot be decoded
    fn header_only_png(width: u32, height: u32) -> Vec<u8> {
        let mut png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&width.to_be_bytes());
        ihdr.extend_from_slice(&height.to_be_bytes());
        ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);
        push_chunk(&mut png, b"IHDR", &ihdr);
        push_chunk(&mut png, b"IDAT", &[0x78, 0x9c]);
        push_chunk(&mut png, b"IEND", &[]);
        png
    }

    #[test]
    fn oversized_header_is_rejected_before_decoding() {
        // The body is broken, so reaching the decoder would give DecodeError
        assert!(matches!(
            decode_image(&header_only_png(20, 20), 8192),
            Err(LoadError::DecodeError(_))
        ));
        assert!(matches!(
            decode_image(&header_only_png(9000, 9000), 8192),
            Err(LoadError::TooLarge {
                width: 9000,
                height: 9000,
                max: 8192
            })
        ));
    }

    #[test]
    fn large_sources_get_a_preview_proxy() {
        let img = SourceImage::from_rgba(RgbaImage::new(4000, 3000)).with_preview_proxy(1000);
        let proxy = img.preview();
        assert_ne!(proxy.id(), img.id());
        assert_eq!(proxy.pixels().dimensions(), (1000, 750));
        assert_eq!((proxy.width(), proxy.height()), (4000, 3000));
        assert!((proxy.texel_scale() - 4.0).abs() < 1e-6);
        assert_eq!(img.texel_scale(), 1.0);

        let small = SourceImage::from_rgba(RgbaImage::new(600, 400)).with_preview_proxy(1000);
        assert_eq!(small.preview().id(), small.id());
    }

    #[tokio::test]
    async fn loads_object_url_and_file() {
        let blobs = BlobStore::new();
        let url = blobs.create_object_url(png_bytes(4, 4, [9, 9, 9, 255]));
        let img = load_source(&ImageRef::parse(&url).unwrap(), &blobs, &LoadConfig::default())
            .await
            .unwrap();
        assert_eq!(img.width(), 4);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, png_bytes(6, 3, [0, 0, 0, 255])).unwrap();
        let img = load_source(&ImageRef::File(path), &blobs, &LoadConfig::default())
            .await
            .unwrap();
        assert_eq!((img.width(), img.height()), (6, 3));
    }

    #[tokio::test]
    async fn revoked_object_url_fails() {
        let blobs = BlobStore::new();
        let url = blobs.create_object_url(png_bytes(4, 4, [9, 9, 9, 255]));
        blobs.revoke(&url);
        let err = load_source(&ImageRef::ObjectUrl(url), &blobs, &LoadConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::UnknownObjectUrl(_)));
    }
}
