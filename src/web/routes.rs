//! HTTP route handlers for the editor UI.
//!
//! The page drives one modal [`EditorSession`] at a time. Interaction
//! endpoints return the session state as JSON; the preview itself is fetched
//! separately as a PNG rendered by the frame scheduler.

use super::templates;
use crate::config::Config;
use crate::editor::{
    Adjustments, BlobStore, EditorError, EditorSession, ImageRef, NamedFilter, SaveCallbacks,
    SessionStatus, load_source,
};
use crate::observe::{Observable, canvas_size_for};
use crate::scheduler::{Preview, RenderHandle, SharedSession};
use crate::upload::Uploader;
use axum::{
    Json,
    extract::{Form, Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, oneshot};

/// How long a preview request waits for a frame of the requested revision
const PREVIEW_WAIT: Duration = Duration::from_secs(1);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session: SharedSession,
    pub blobs: BlobStore,
    pub previews: Arc<Observable<Option<Preview>>>,
    pub render: RenderHandle,
    pub container_width: Arc<Observable<u32>>,
    pub uploader: Uploader,
    /// Receives the blob the open session hands to `on_save`
    pub pending_save: Arc<Mutex<Option<oneshot::Receiver<Bytes>>>>,
    /// Most recent export, kept for download
    pub last_export: Arc<RwLock<Option<Bytes>>>,
}

impl AppState {
    pub fn new(
        config: Config,
        session: SharedSession,
        previews: Arc<Observable<Option<Preview>>>,
        render: RenderHandle,
        container_width: Arc<Observable<u32>>,
    ) -> Self {
        let uploader = Uploader::new(
            &config.upload_url,
            &config.upload_field,
            config.upload_token.clone(),
        );
        Self {
            config: Arc::new(config),
            session,
            blobs: BlobStore::new(),
            previews,
            render,
            container_width,
            uploader,
            pending_save: Arc::new(Mutex::new(None)),
            last_export: Arc::new(RwLock::new(None)),
        }
    }

    fn canvas_size(&self) -> u32 {
        canvas_size_for(
            self.container_width.get(),
            self.config.canvas_min,
            self.config.canvas_max,
        )
    }

    fn view(&self, session: Option<&EditorSession>) -> EditorView {
        match session {
            Some(session) => EditorView::of(session),
            None => EditorView::empty(self.canvas_size()),
        }
    }
}

/// Editor state as seen by the page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EditorView {
    pub status: String,
    pub revision: u64,
    pub canvas_size: u32,
    pub zoom_percent: f32,
    pub rotation: f32,
    pub translate_x: f32,
    pub translate_y: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub filter: String,
    pub can_save: bool,
    pub dragging: bool,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl EditorView {
    fn of(session: &EditorSession) -> Self {
        let transform = session.transform();
        let adjustments = session.adjustments();
        Self {
            status: status_name(session.status()).to_string(),
            revision: session.revision(),
            canvas_size: session.canvas_size(),
            zoom_percent: session.zoom_percent(),
            rotation: transform.rotation_degrees(),
            translate_x: transform.translate_x(),
            translate_y: transform.translate_y(),
            brightness: adjustments.brightness(),
            contrast: adjustments.contrast(),
            filter: adjustments.filter().to_string(),
            can_save: session.can_save(),
            dragging: session.is_dragging(),
            error: session.last_error().map(str::to_string),
            message: None,
        }
    }

    fn empty(canvas_size: u32) -> Self {
        let adjustments = Adjustments::default();
        Self {
            status: "empty".to_string(),
            revision: 0,
            canvas_size,
            zoom_percent: 100.0,
            rotation: 0.0,
            translate_x: 0.0,
            translate_y: 0.0,
            brightness: adjustments.brightness(),
            contrast: adjustments.contrast(),
            filter: adjustments.filter().to_string(),
            can_save: false,
            dragging: false,
            error: None,
            message: None,
        }
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

fn status_name(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Loading => "loading",
        SessionStatus::Ready => "ready",
        SessionStatus::LoadFailed => "load_failed",
        SessionStatus::Closed => "closed",
    }
}

/// Pointer position in canvas pixels
#[derive(Debug, Deserialize)]
pub struct PointForm {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Deserialize)]
pub struct ZoomForm {
    pub percent: f32,
}

#[derive(Debug, Deserialize)]
pub struct AdjustForm {
    pub brightness: f32,
    pub contrast: f32,
    #[serde(default)]
    pub filter: String,
}

#[derive(Debug, Deserialize)]
pub struct ResizeForm {
    pub width: u32,
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub revision: Option<u64>,
}

/// GET / - Editor page
pub async fn index(State(state): State<AppState>) -> Html<String> {
    let session = state.session.read().await;
    let view = state.view(session.as_ref());
    Html(templates::render_editor_page(&state.config, &view))
}

/// GET /state - Current editor state
pub async fn editor_state(State(state): State<AppState>) -> Json<EditorView> {
    let session = state.session.read().await;
    Json(state.view(session.as_ref()))
}

/// POST /open - Open the editor on an uploaded file or an image URL
pub async fn open_image(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut reference = String::new();
    let mut upload: Option<Bytes> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return bad_request(&format!("Invalid form data: {}", e)),
        };
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => match field.bytes().await {
                Ok(data) if !data.is_empty() => upload = Some(data),
                Ok(_) => {}
                Err(e) => return bad_request(&format!("Failed to read upload: {}", e)),
            },
            Some("reference") => match field.text().await {
                Ok(text) => reference = text,
                Err(e) => return bad_request(&format!("Invalid image reference: {}", e)),
            },
            _ => {}
        }
    }

    let (image_ref, owns_reference) = match upload {
        Some(data) => {
            tracing::debug!("Received {} byte upload", data.len());
            (ImageRef::ObjectUrl(state.blobs.create_object_url(data)), true)
        }
        None => match ImageRef::parse(&reference) {
            Ok(ImageRef::File(_)) => {
                return bad_request("Local paths can only be opened from the command line");
            }
            Ok(image_ref) => (image_ref, false),
            Err(e) => return bad_request(&e.to_string()),
        },
    };

    open_session(&state, image_ref, owns_reference).await;
    Redirect::to("/").into_response()
}

/// Replace the open session and load its image in the background
async fn open_session(state: &AppState, reference: ImageRef, owns_reference: bool) {
    let (tx, rx) = oneshot::channel();
    let callbacks = SaveCallbacks::new(
        move |blob| {
            let _ = tx.send(blob);
        },
        || tracing::info!("Editing cancelled"),
    );
    let session = EditorSession::open(
        reference.clone(),
        owns_reference,
        state.blobs.clone(),
        state.config.settings(),
        state.canvas_size(),
        callbacks,
    );
    let load = session.settings().load.clone();

    {
        let mut slot = state.session.write().await;
        if let Some(mut previous) = slot.take() {
            previous.cancel();
        }
        *slot = Some(session);
    }
    *state.pending_save.lock().await = Some(rx);
    state.render.request_frame();

    let state = state.clone();
    tokio::spawn(async move {
        let result = load_source(&reference, &state.blobs, &load).await;

        let mut slot = state.session.write().await;
        match slot.as_mut() {
            Some(session)
                if session.reference() == &reference
                    && session.status() == SessionStatus::Loading =>
            {
                // Failures are recorded on the session and shown by the page
                let _ = session.finish_load(result);
            }
            _ => tracing::debug!("Session for {} closed before loading finished", reference),
        }
        drop(slot);
        state.render.request_frame();
    });
}

/// Apply an edit to the open session and schedule a re-render
async fn edit_session(state: &AppState, edit: impl FnOnce(&mut EditorSession)) -> Response {
    let mut slot = state.session.write().await;
    let Some(session) = slot.as_mut() else {
        return (
            StatusCode::CONFLICT,
            Json(EditorView::empty(state.canvas_size()).with_error("No image open")),
        )
            .into_response();
    };

    let before = session.revision();
    edit(session);
    let view = EditorView::of(session);
    drop(slot);

    if view.revision != before {
        state.render.request_frame();
    }
    Json(view).into_response()
}

/// POST /drag/start
pub async fn drag_start(State(state): State<AppState>, Form(p): Form<PointForm>) -> Response {
    edit_session(&state, |s| s.drag_start(p.x, p.y)).await
}

/// POST /drag/move
pub async fn drag_move(State(state): State<AppState>, Form(p): Form<PointForm>) -> Response {
    edit_session(&state, |s| s.drag_move(p.x, p.y)).await
}

/// POST /drag/end
pub async fn drag_end(State(state): State<AppState>) -> Response {
    edit_session(&state, EditorSession::drag_end).await
}

/// GET /action/{action} - Toolbar buttons
pub async fn editor_action(State(state): State<AppState>, Path(action): Path<String>) -> Response {
    let op: fn(&mut EditorSession) = match action.as_str() {
        "zoom-in" => EditorSession::zoom_in,
        "zoom-out" => EditorSession::zoom_out,
        "rotate" => EditorSession::rotate,
        "reset" => EditorSession::reset,
        "fit" => EditorSession::fit,
        _ => {
            return (
                StatusCode::NOT_FOUND,
                Json(
                    EditorView::empty(state.canvas_size())
                        .with_error(format!("Unknown action '{}'", action)),
                ),
            )
                .into_response();
        }
    };
    edit_session(&state, op).await
}

/// POST /zoom - Zoom slider
pub async fn set_zoom(State(state): State<AppState>, Form(form): Form<ZoomForm>) -> Response {
    edit_session(&state, |s| s.set_zoom_percent(form.percent)).await
}

/// POST /adjust - Brightness, contrast and filter
pub async fn adjust(State(state): State<AppState>, Form(form): Form<AdjustForm>) -> Response {
    let filter = match form.filter.trim() {
        "" => NamedFilter::None,
        text => match text.parse::<NamedFilter>() {
            Ok(filter) => filter,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(EditorView::empty(state.canvas_size()).with_error(e.to_string())),
                )
                    .into_response();
            }
        },
    };
    let adjustments = Adjustments::new(form.brightness, form.contrast, filter);
    edit_session(&state, |s| s.set_adjustments(adjustments)).await
}

/// POST /resize - Container width reported by the page
pub async fn resize(State(state): State<AppState>, Form(form): Form<ResizeForm>) -> Response {
    state.container_width.set(form.width);
    let canvas = state.canvas_size();

    if state.session.read().await.is_none() {
        return Json(EditorView::empty(canvas)).into_response();
    }
    edit_session(&state, |s| s.resize_canvas(canvas)).await
}

/// GET /preview.png - Latest rendered preview
///
/// With `?revision=N` the response waits briefly for a frame rendered from
/// revision N or later.
pub async fn preview(State(state): State<AppState>, Query(query): Query<PreviewQuery>) -> Response {
    let mut frames = state.previews.subscribe();
    let mut current = frames.latest();

    if let Some(wanted) = query.revision {
        let deadline = tokio::time::Instant::now() + PREVIEW_WAIT;
        while current.as_ref().is_some_and(|p| p.revision < wanted) {
            match tokio::time::timeout_at(deadline, frames.changed()).await {
                Ok(Some(frame)) => current = frame,
                _ => break,
            }
        }
    }
    frames.unsubscribe();

    match current {
        Some(frame) => (
            [
                (header::CONTENT_TYPE, "image/png"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            frame.png,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "No preview").into_response(),
    }
}

/// POST /save - Export, hand off, and upload if configured
pub async fn save(State(state): State<AppState>) -> Response {
    let mut slot = state.session.write().await;
    let Some(session) = slot.as_mut() else {
        return (
            StatusCode::CONFLICT,
            Json(EditorView::empty(state.canvas_size()).with_error("No image open")),
        )
            .into_response();
    };

    if let Err(e) = session.save().await {
        let status = match e {
            EditorError::NotLoaded | EditorError::Closed => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let view = EditorView::of(session).with_error(e.to_string());
        return (status, Json(view)).into_response();
    }
    *slot = None;
    drop(slot);
    state.render.request_frame();

    let blob = match state.pending_save.lock().await.take() {
        Some(rx) => rx.await.ok(),
        None => None,
    };
    let view = EditorView::empty(state.canvas_size());
    let Some(blob) = blob else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(view.with_error("Export produced no image")),
        )
            .into_response();
    };
    *state.last_export.write().await = Some(blob.clone());

    if !state.uploader.is_configured() {
        let message = format!("Avatar saved ({} bytes)", blob.len());
        return Json(view.with_message(message)).into_response();
    }

    let size = blob.len();
    match state.uploader.upload(blob).await {
        Ok(receipt) => {
            let message = format!("Avatar uploaded ({} bytes, HTTP {})", size, receipt.status);
            Json(view.with_message(message)).into_response()
        }
        Err(e) => {
            tracing::error!("Avatar upload failed: {}", e);
            let error = format!(
                "Upload failed: {}. The picture is still available at /avatar.jpg",
                e
            );
            (StatusCode::BAD_GATEWAY, Json(view.with_error(error))).into_response()
        }
    }
}

/// POST /cancel - Discard the open session
pub async fn cancel(State(state): State<AppState>) -> Json<EditorView> {
    if let Some(mut session) = state.session.write().await.take() {
        session.cancel();
    }
    *state.pending_save.lock().await = None;
    state.render.request_frame();
    Json(EditorView::empty(state.canvas_size()).with_message("Editing cancelled"))
}

/// GET /avatar.jpg - Most recent export
pub async fn avatar(State(state): State<AppState>) -> Response {
    match state.last_export.read().await.clone() {
        Some(blob) => ([(header::CONTENT_TYPE, "image/jpeg")], blob).into_response(),
        None => (StatusCode::NOT_FOUND, "Nothing saved yet").into_response(),
    }
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Html(templates::render_message_page("Cannot open image", message, true)),
    )
        .into_response()
}
