//! Web server module for the editor UI.
//!
//! Provides an HTTP server using Axum that hosts the editor page and the
//! endpoints it drives.

pub mod routes;
pub mod templates;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
pub use routes::AppState;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;

/// Largest accepted image upload
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Web server errors
#[derive(Error, Debug)]
pub enum WebError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),

    #[error("Server error: {0}")]
    ServerError(String),
}

/// Editor web server
pub struct WebServer {
    state: AppState,
}

impl WebServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes
    fn build_router(&self) -> Router {
        Router::new()
            .route("/", get(routes::index))
            .route("/state", get(routes::editor_state))
            .route(
                "/open",
                post(routes::open_image).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
            )
            .route("/preview.png", get(routes::preview))
            .route("/drag/start", post(routes::drag_start))
            .route("/drag/move", post(routes::drag_move))
            .route("/drag/end", post(routes::drag_end))
            .route("/action/{action}", get(routes::editor_action))
            .route("/zoom", post(routes::set_zoom))
            .route("/adjust", post(routes::adjust))
            .route("/resize", post(routes::resize))
            .route("/save", post(routes::save))
            .route("/cancel", post(routes::cancel))
            .route("/avatar.jpg", get(routes::avatar))
            .route("/health", get(routes::health))
            .with_state(self.state.clone())
    }

    /// Run the web server with graceful shutdown
    pub async fn run_with_shutdown(
        &self,
        port: u16,
        shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<(), WebError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Web server listening on http://{}", addr);

        let mut shutdown = shutdown;
        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Web server shutting down gracefully");
            })
            .await
            .map_err(|e| WebError::ServerError(e.to_string()))
    }
}
