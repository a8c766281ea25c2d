//! Frame scheduler for preview re-rendering.
//!
//! Edits only mark the preview dirty. The scheduler waits one frame interval
//! after the first notification, drops any notifications that piled up in the
//! meantime, then renders once. A burst of pointer moves therefore costs one
//! render per frame, not one per event.

use crate::editor::EditorSession;
use crate::editor::render::rasterize_preview;
use crate::observe::{Observable, Subscription, canvas_size_for};
use crate::surface::PixmapSurface;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, mpsc};

/// The single open editor session, if any
pub type SharedSession = Arc<RwLock<Option<EditorSession>>>;

/// Latest rendered preview
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    /// Monotonic frame counter
    pub frame: u64,
    /// Session revision the frame was rendered from
    pub revision: u64,
    pub canvas_size: u32,
    pub png: Bytes,
}

/// Cheap handle for requesting a re-render
#[derive(Debug, Clone)]
pub struct RenderHandle {
    tx: mpsc::Sender<()>,
}

impl RenderHandle {
    /// Ask for a frame; coalesces with a request that is already pending
    pub fn request_frame(&self) {
        if let Err(mpsc::error::TrySendError::Closed(_)) = self.tx.try_send(()) {
            tracing::debug!("Render scheduler stopped, frame request dropped");
        }
    }
}

enum Wake {
    Frame,
    Resize(u32),
    Shutdown,
}

/// Renders the session preview at most once per frame interval
pub struct RenderScheduler {
    session: SharedSession,
    previews: Arc<Observable<Option<Preview>>>,
    container_width: Subscription<u32>,
    canvas_min: u32,
    canvas_max: u32,
    frame_interval: Duration,
    trigger_rx: mpsc::Receiver<()>,
    frames: u64,
    /// Kept between frames so the converted source bitmap is reused
    surface: Option<PixmapSurface>,
}

impl RenderScheduler {
    /// Create a scheduler and the handle used to wake it
    pub fn new(
        session: SharedSession,
        previews: Arc<Observable<Option<Preview>>>,
        container_width: Subscription<u32>,
        canvas_bounds: (u32, u32),
        frame_interval: Duration,
    ) -> (Self, RenderHandle) {
        let (tx, trigger_rx) = mpsc::channel(1);
        let scheduler = Self {
            session,
            previews,
            container_width,
            canvas_min: canvas_bounds.0,
            canvas_max: canvas_bounds.1,
            frame_interval,
            trigger_rx,
            frames: 0,
            surface: None,
        };
        (scheduler, RenderHandle { tx })
    }

    /// Run until shutdown
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Render scheduler started");

        loop {
            let wake = tokio::select! {
                Some(()) = self.trigger_rx.recv() => Wake::Frame,
                Some(width) = self.container_width.changed() => Wake::Resize(width),
                _ = shutdown.recv() => Wake::Shutdown,
                else => Wake::Shutdown,
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Resize(width) => self.apply_container_width(width).await,
                Wake::Frame => {}
            }

            // Let the rest of this frame's events arrive
            tokio::select! {
                _ = tokio::time::sleep(self.frame_interval) => {}
                _ = shutdown.recv() => break,
            }
            while self.trigger_rx.try_recv().is_ok() {}

            self.render_frame().await;
        }

        tracing::info!("Render scheduler shutting down");
    }

    async fn apply_container_width(&self, width: u32) {
        let canvas = canvas_size_for(width, self.canvas_min, self.canvas_max);
        let mut session = self.session.write().await;
        if let Some(session) = session.as_mut() {
            session.resize_canvas(canvas);
        }
    }

    /// Render the current session and publish the PNG.
    ///
    /// Only the scene snapshot is taken under the session lock; rasterizing
    /// and encoding run on the blocking pool.
    async fn render_frame(&mut self) {
        let job = match self.session.read().await.as_ref() {
            Some(session) => session.preview_job(),
            None => {
                self.previews.set(None);
                return;
            }
        };
        let (revision, canvas_size) = (job.revision, job.canvas_size);

        let surface = self.surface.take();
        let result = tokio::task::spawn_blocking(move || rasterize_preview(&job, surface)).await;

        match result {
            Ok(Ok((surface, png))) => {
                self.surface = Some(surface);
                self.frames += 1;
                tracing::debug!("Rendered frame {} ({} bytes)", self.frames, png.len());
                self.previews.set(Some(Preview {
                    frame: self.frames,
                    revision,
                    canvas_size,
                    png,
                }));
            }
            Ok(Err(e)) => tracing::error!("Preview render failed: {}", e),
            Err(e) => tracing::error!("Preview render task failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::{BlobStore, EditorSettings, ImageRef, SaveCallbacks, SourceImage};
    use image::RgbaImage;

    struct Harness {
        session: SharedSession,
        previews: Arc<Observable<Option<Preview>>>,
        width: Observable<u32>,
        handle: RenderHandle,
        shutdown: broadcast::Sender<()>,
        task: tokio::task::JoinHandle<()>,
    }

    fn start() -> Harness {
        let mut session = EditorSession::open(
            ImageRef::File("me.png".into()),
            false,
            BlobStore::new(),
            EditorSettings::default(),
            400,
            SaveCallbacks::new(|_| {}, || {}),
        );
        session.attach_source(SourceImage::from_rgba(RgbaImage::from_pixel(
            50,
            50,
            image::Rgba([0, 0, 0, 255]),
        )));

        let session: SharedSession = Arc::new(RwLock::new(Some(session)));
        let previews = Arc::new(Observable::new(None));
        let width = Observable::new(400u32);
        let (scheduler, handle) = RenderScheduler::new(
            Arc::clone(&session),
            Arc::clone(&previews),
            width.subscribe(),
            (300, 500),
            Duration::from_millis(1),
        );
        let (shutdown, rx) = broadcast::channel(1);
        let task = tokio::spawn(scheduler.run(rx));

        Harness {
            session,
            previews,
            width,
            handle,
            shutdown,
            task,
        }
    }

    async fn next_preview(sub: &mut Subscription<Option<Preview>>) -> Preview {
        tokio::time::timeout(Duration::from_secs(5), sub.changed())
            .await
            .expect("no frame rendered")
            .flatten()
            .expect("preview missing")
    }

    #[tokio::test]
    async fn burst_of_requests_renders_a_frame() {
        let h = start();
        let mut sub = h.previews.subscribe();

        for _ in 0..50 {
            h.handle.request_frame();
        }
        let preview = next_preview(&mut sub).await;
        assert_eq!(preview.canvas_size, 400);
        assert_eq!(&preview.png[1..4], b"PNG");
        // 50 requests collapse into far fewer frames
        assert!(preview.frame <= 2);

        h.shutdown.send(()).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn container_resize_resizes_canvas() {
        let h = start();
        let mut sub = h.previews.subscribe();

        h.width.set(1200);
        let preview = next_preview(&mut sub).await;
        assert_eq!(preview.canvas_size, 500);
        {
            let guard = h.session.read().await;
            let session = guard.as_ref().unwrap();
            assert_eq!(session.canvas_size(), 500);
            assert_eq!(preview.revision, session.revision());
        }

        h.shutdown.send(()).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn closed_session_clears_preview() {
        let h = start();
        let mut sub = h.previews.subscribe();
        h.handle.request_frame();
        next_preview(&mut sub).await;

        *h.session.write().await = None;
        h.handle.request_frame();
        let cleared = tokio::time::timeout(Duration::from_secs(5), sub.changed())
            .await
            .unwrap();
        assert_eq!(cleared, Some(None));

        h.shutdown.send(()).unwrap();
        h.task.await.unwrap();
    }
}
