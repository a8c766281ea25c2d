//! Circular profile-picture editor.
//!
//! One [`EditorSession`] per opened image. The session owns the decoded
//! source, the transform and the adjustment sliders for its whole lifetime
//! and hands exactly one JPEG blob to its save callback.
//!
//! Pipeline:
//! 1. Load: resolve the image reference, decode, auto-fit
//! 2. Interact: drag, zoom, rotate, reset, fit, adjust
//! 3. Render: repaint the preview after every change
//! 4. Export: clip, filter and encode at the output resolution

pub mod adjust;
pub mod blob;
pub mod export;
pub mod render;
pub mod source;
pub mod transform;

pub use adjust::{Adjustments, NamedFilter};
pub use blob::BlobStore;
pub use export::{ExportError, ExportGeometry, ExportJob, export_avatar};
pub use render::{PreviewJob, PreviewStyle, Scene};
pub use source::{ImageRef, LoadConfig, LoadError, SourceImage, load_source};
pub use transform::{Controller, Transform, ZoomLimits};

use crate::surface::Rgba;
use bytes::Bytes;
use thiserror::Error;

/// Editor errors. None of them is fatal: the session stays usable or can be
/// closed and reopened.
#[derive(Error, Debug)]
pub enum EditorError {
    #[error("No image loaded")]
    NotLoaded,

    #[error("Editor is closed")]
    Closed,

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),
}

/// Tunables shared by every session
#[derive(Debug, Clone)]
pub struct EditorSettings {
    /// Share of the canvas the image's larger side fills after auto-fit
    pub fit_ratio: f32,
    /// Crop circle radius as a share of the canvas size
    pub crop_ratio: f32,
    pub zoom: ZoomLimits,
    pub output_size: u32,
    pub jpeg_quality: u8,
    /// Backdrop for pixels outside the exported circle
    pub matte: Rgba,
    pub style: PreviewStyle,
    /// Show brightness/contrast/filter in the preview, not only in the export
    pub live_adjustments: bool,
    pub load: LoadConfig,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            fit_ratio: 0.7,
            crop_ratio: 0.35,
            zoom: ZoomLimits::default(),
            output_size: 400,
            jpeg_quality: 92,
            matte: Rgba::WHITE,
            style: PreviewStyle::default(),
            live_adjustments: true,
            load: LoadConfig::default(),
        }
    }
}

/// Caller hooks; each session invokes at most one of them, at most once
pub struct SaveCallbacks {
    on_save: Box<dyn FnOnce(Bytes) + Send + Sync>,
    on_cancel: Box<dyn FnOnce() + Send + Sync>,
}

impl SaveCallbacks {
    pub fn new(
        on_save: impl FnOnce(Bytes) + Send + Sync + 'static,
        on_cancel: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_save: Box::new(on_save),
            on_cancel: Box::new(on_cancel),
        }
    }
}

impl std::fmt::Debug for SaveCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveCallbacks").finish_non_exhaustive()
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Loading,
    Ready,
    LoadFailed,
    Closed,
}

/// One modal editing session over one image
#[derive(Debug)]
pub struct EditorSession {
    settings: EditorSettings,
    reference: ImageRef,
    blobs: BlobStore,
    /// Revoke `reference` from `blobs` on close
    owns_reference: bool,
    source: Option<SourceImage>,
    controller: Controller,
    adjustments: Adjustments,
    canvas_size: u32,
    /// Transform is still the untouched auto-fit
    auto_fitted: bool,
    status: SessionStatus,
    callbacks: Option<SaveCallbacks>,
    revision: u64,
    last_error: Option<String>,
}

impl EditorSession {
    /// Open a session; call [`EditorSession::load`] (or
    /// [`EditorSession::finish_load`]) to bring in the bitmap
    pub fn open(
        reference: ImageRef,
        owns_reference: bool,
        blobs: BlobStore,
        settings: EditorSettings,
        canvas_size: u32,
        callbacks: SaveCallbacks,
    ) -> Self {
        tracing::info!("Opening editor for {} ({}px canvas)", reference, canvas_size);
        let controller = Controller::new(Transform::IDENTITY, settings.zoom);
        Self {
            settings,
            reference,
            blobs,
            owns_reference,
            source: None,
            controller,
            adjustments: Adjustments::default(),
            canvas_size,
            auto_fitted: false,
            status: SessionStatus::Loading,
            callbacks: Some(callbacks),
            revision: 0,
            last_error: None,
        }
    }

    /// Resolve and decode the reference
    pub async fn load(&mut self) -> Result<(), EditorError> {
        let result = load_source(&self.reference, &self.blobs, &self.settings.load).await;
        self.finish_load(result)
    }

    /// Apply the outcome of a load performed elsewhere
    pub fn finish_load(&mut self, result: Result<SourceImage, LoadError>) -> Result<(), EditorError> {
        if self.status == SessionStatus::Closed {
            return Err(EditorError::Closed);
        }
        match result {
            Ok(source) => {
                self.attach_source(source);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to load {}: {}", self.reference, e);
                self.status = SessionStatus::LoadFailed;
                self.last_error = Some(e.to_string());
                self.touch();
                Err(e.into())
            }
        }
    }

    /// Install a decoded bitmap and auto-fit it
    pub fn attach_source(&mut self, source: SourceImage) {
        if self.status == SessionStatus::Closed {
            return;
        }
        self.controller.fit(
            self.canvas_size,
            source.width(),
            source.height(),
            self.settings.fit_ratio,
        );
        tracing::debug!(
            "Auto-fit {}x{} into {}px: scale {:.4}",
            source.width(),
            source.height(),
            self.canvas_size,
            self.controller.transform.scale()
        );
        self.source = Some(source);
        self.auto_fitted = true;
        self.status = SessionStatus::Ready;
        self.last_error = None;
        self.touch();
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Save is only possible once a bitmap is loaded
    pub fn can_save(&self) -> bool {
        self.status == SessionStatus::Ready && self.source.is_some()
    }

    pub fn reference(&self) -> &ImageRef {
        &self.reference
    }

    pub fn transform(&self) -> Transform {
        self.controller.transform
    }

    pub fn adjustments(&self) -> Adjustments {
        self.adjustments
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    pub fn canvas_size(&self) -> u32 {
        self.canvas_size
    }

    pub fn is_dragging(&self) -> bool {
        self.controller.drag.is_dragging()
    }

    pub fn zoom_percent(&self) -> f32 {
        self.controller.zoom_percent()
    }

    /// Bumped on every visible change
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Last load or export failure, cleared by the next success
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    fn is_open(&self) -> bool {
        self.status != SessionStatus::Closed
    }

    /// Run a user edit; it ends the auto-fit state
    fn edit(&mut self, f: impl FnOnce(&mut Controller)) {
        if !self.is_open() {
            return;
        }
        let before = self.controller.transform;
        f(&mut self.controller);
        if self.controller.transform != before {
            self.auto_fitted = false;
            self.touch();
        }
    }

    /// Canvas resize: an untouched auto-fit is recomputed; a user transform
    /// is rescaled so the visible crop does not jump
    pub fn resize_canvas(&mut self, canvas_size: u32) {
        if canvas_size == 0 || canvas_size == self.canvas_size || !self.is_open() {
            return;
        }
        let old = self.canvas_size;
        self.canvas_size = canvas_size;

        match &self.source {
            Some(source) if self.auto_fitted => {
                self.controller.fit(
                    canvas_size,
                    source.width(),
                    source.height(),
                    self.settings.fit_ratio,
                );
            }
            Some(_) => {
                let factor = canvas_size as f32 / old.max(1) as f32;
                self.controller.transform = self.controller.transform.rescaled(factor);
            }
            None => {}
        }
        tracing::debug!("Canvas resized {}px -> {}px", old, canvas_size);
        self.touch();
    }

    pub fn drag_start(&mut self, x: f32, y: f32) {
        if self.is_open() && self.source.is_some() {
            self.controller.drag_start(x, y);
        }
    }

    pub fn drag_move(&mut self, x: f32, y: f32) {
        self.edit(|c| {
            c.drag_move(x, y);
        });
    }

    pub fn drag_end(&mut self) {
        self.controller.drag_end();
    }

    pub fn set_zoom_percent(&mut self, percent: f32) {
        self.edit(|c| c.set_zoom_percent(percent));
    }

    pub fn zoom_in(&mut self) {
        self.edit(Controller::zoom_in);
    }

    pub fn zoom_out(&mut self) {
        self.edit(Controller::zoom_out);
    }

    pub fn rotate(&mut self) {
        self.edit(Controller::rotate_step);
    }

    pub fn reset(&mut self) {
        self.edit(Controller::reset);
    }

    /// Recompute the auto-fit for the current canvas
    pub fn fit(&mut self) {
        let Some(source) = &self.source else {
            return;
        };
        if !self.is_open() {
            return;
        }
        let (w, h) = (source.width(), source.height());
        self.controller
            .fit(self.canvas_size, w, h, self.settings.fit_ratio);
        self.auto_fitted = true;
        self.touch();
    }

    pub fn set_adjustments(&mut self, adjustments: Adjustments) {
        if self.is_open() && adjustments != self.adjustments {
            self.adjustments = adjustments;
            self.touch();
        }
    }

    /// Inputs of the preview renderer
    pub fn scene(&self) -> Scene<'_> {
        let filter = self
            .settings
            .live_adjustments
            .then(|| self.adjustments.chain());
        Scene {
            source: self.source.as_ref().map(SourceImage::preview),
            transform: self.controller.transform,
            canvas_size: self.canvas_size,
            crop_ratio: self.settings.crop_ratio,
            filter,
        }
    }

    /// Owned snapshot of the scene for rendering off the async thread
    pub fn preview_job(&self) -> PreviewJob {
        let scene = self.scene();
        PreviewJob {
            source: scene.source.cloned(),
            transform: scene.transform,
            canvas_size: scene.canvas_size,
            crop_ratio: scene.crop_ratio,
            filter: scene.filter,
            style: self.settings.style.clone(),
            revision: self.revision,
        }
    }

    /// Snapshot of everything the export needs
    pub fn export_job(&self) -> Result<ExportJob, EditorError> {
        if !self.is_open() {
            return Err(EditorError::Closed);
        }
        let source = self.source.clone().ok_or(EditorError::NotLoaded)?;
        Ok(ExportJob {
            source,
            transform: self.controller.transform,
            filter: self.adjustments.chain(),
            geometry: ExportGeometry::new(
                self.settings.output_size,
                self.canvas_size,
                self.settings.crop_ratio,
            ),
            matte: self.settings.matte,
            quality: self.settings.jpeg_quality,
        })
    }

    /// Export and hand the blob to `on_save`, then close.
    ///
    /// Before a bitmap is loaded this returns [`EditorError::NotLoaded`]
    /// without touching the callbacks. An export failure keeps the session
    /// open so the user can retry.
    pub async fn save(&mut self) -> Result<(), EditorError> {
        let job = self.export_job()?;

        let blob = match export_avatar(job).await {
            Ok(blob) => blob,
            Err(e) => {
                tracing::error!("Export failed: {}", e);
                self.last_error = Some(e.to_string());
                self.touch();
                return Err(e.into());
            }
        };

        if let Some(callbacks) = self.callbacks.take() {
            (callbacks.on_save)(blob);
        }
        self.close();
        Ok(())
    }

    /// Discard the session and notify `on_cancel`
    pub fn cancel(&mut self) {
        if !self.is_open() {
            return;
        }
        tracing::info!("Editor cancelled");
        if let Some(callbacks) = self.callbacks.take() {
            (callbacks.on_cancel)();
        }
        self.close();
    }

    fn close(&mut self) {
        self.status = SessionStatus::Closed;
        self.source = None;
        self.controller = Controller::new(Transform::IDENTITY, self.settings.zoom);
        self.release_reference();
        self.touch();
    }

    fn release_reference(&mut self) {
        if self.owns_reference {
            self.owns_reference = false;
            self.blobs.revoke(&self.reference.to_string());
        }
    }
}

impl Drop for EditorSession {
    fn drop(&mut self) {
        self.release_reference();
    }
}
