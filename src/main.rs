//! Circular profile-picture editor
//!
//! A Rust-based server that:
//! - Loads a picture from a URL, a local file or an upload
//! - Lets the user drag, zoom, rotate and adjust it under a circular crop
//! - Exports the crop as a fixed-size JPEG and optionally uploads it
//! - Serves the editor as a local web page, or runs once from the command line

mod config;
mod editor;
mod observe;
mod scheduler;
mod surface;
mod upload;
mod web;

use anyhow::Context;
use clap::Parser;
use config::{Config, DEFAULT_CONFIG_PATH};
use editor::{Adjustments, BlobStore, EditorSession, ImageRef, NamedFilter, SaveCallbacks};
use observe::{Observable, canvas_size_for};
use scheduler::{RenderScheduler, SharedSession};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast, oneshot};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload::Uploader;
use web::{AppState, WebServer};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "avatar-editor")]
#[command(about = "Circular profile-picture editor")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Web server port (overrides config, default: 8890)
    #[arg(long = "http-port")]
    http_port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Write the effective configuration to the config path and exit
    #[arg(long, conflicts_with = "image")]
    init_config: bool,

    /// Edit this image once and exit (URL or file path)
    #[arg(long)]
    image: Option<String>,

    /// Write the exported JPEG here
    #[arg(long, requires = "image")]
    output: Option<PathBuf>,

    /// Zoom in percent of the natural size (100 = one image pixel per canvas pixel)
    #[arg(long, requires = "image")]
    zoom: Option<f32>,

    /// Number of 90 degree clockwise rotations
    #[arg(long, requires = "image", default_value_t = 0)]
    rotate: u32,

    /// Pan in canvas pixels, e.g. "20,-15"
    #[arg(long, requires = "image", value_parser = parse_offset, allow_hyphen_values = true)]
    offset: Option<(f32, f32)>,

    /// Brightness in percent (0-200)
    #[arg(long, requires = "image", default_value_t = 100.0)]
    brightness: f32,

    /// Contrast in percent (0-200)
    #[arg(long, requires = "image", default_value_t = 100.0)]
    contrast: f32,

    /// Colour filter: none, grayscale, sepia, invert or saturate, e.g. "sepia(50%)"
    #[arg(long, requires = "image", default_value = "none")]
    filter: NamedFilter,

    /// Upload the result to the configured upload URL
    #[arg(long, requires = "image")]
    upload: bool,
}

/// Parse "X,Y"
fn parse_offset(s: &str) -> Result<(f32, f32), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{}'", s))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f32>()
            .map_err(|e| format!("invalid offset '{}': {}", v, e))
    };
    Ok((parse(x)?, parse(y)?))
}

/// Using current_thread runtime: one modal session, no parallel work to spread
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let loaded = Config::load(&args.config);
    let verbose = args.verbose || loaded.as_ref().is_ok_and(|c| c.verbose);
    init_logging(verbose);

    let config = loaded.unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from {}: {}", args.config, e);
        tracing::info!("Using default configuration");
        Config::default()
    });

    if args.init_config {
        config
            .save(&args.config)
            .with_context(|| format!("Cannot write {}", args.config))?;
        println!("Wrote configuration to {}", args.config);
        return Ok(());
    }

    // Handle one-shot edit
    if let Some(image) = &args.image {
        return run_once(&config, &args, image).await;
    }

    tracing::info!("Starting avatar editor");

    // Setup shutdown signal handling
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let session: SharedSession = Arc::new(RwLock::new(None));
    let previews = Arc::new(Observable::new(None));
    let container_width = Arc::new(Observable::new(config.container_width));

    // Create render scheduler
    let (scheduler, render) = RenderScheduler::new(
        Arc::clone(&session),
        Arc::clone(&previews),
        container_width.subscribe(),
        (config.canvas_min, config.canvas_max),
        config.frame_interval(),
    );

    // Create web server
    let port = args.http_port.unwrap_or(config.web_port);
    let web_server = WebServer::new(AppState::new(
        config,
        session,
        previews,
        render,
        container_width,
    ));

    // Spawn scheduler task
    let scheduler_shutdown = shutdown_tx.subscribe();
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    // Spawn web server task
    let web_shutdown = shutdown_tx.subscribe();
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.run_with_shutdown(port, web_shutdown).await {
            tracing::error!("Web server error: {}", e);
        }
    });

    // Wait for shutdown signal
    wait_for_shutdown().await;
    tracing::info!("Shutdown signal received");

    // Send shutdown to all tasks
    let _ = shutdown_tx.send(());

    // Wait for tasks to complete with timeout
    tokio::select! {
        _ = scheduler_handle => {},
        _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {
            tracing::warn!("Scheduler shutdown timeout");
        }
    }

    tokio::select! {
        _ = web_handle => {},
        _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {
            tracing::warn!("Web server shutdown timeout");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Load, apply the command line edits, export, then write and/or upload
async fn run_once(config: &Config, args: &Args, image: &str) -> anyhow::Result<()> {
    if args.output.is_none() && !args.upload {
        anyhow::bail!("--image needs --output and/or --upload");
    }
    if args.upload && !config.has_upload_url() {
        anyhow::bail!("--upload needs upload_url in {}", args.config);
    }

    let reference = ImageRef::parse(image)?;
    let canvas = canvas_size_for(config.container_width, config.canvas_min, config.canvas_max);
    let (tx, rx) = oneshot::channel();
    let mut session = EditorSession::open(
        reference,
        false,
        BlobStore::new(),
        config.settings(),
        canvas,
        SaveCallbacks::new(
            move |blob| {
                let _ = tx.send(blob);
            },
            || {},
        ),
    );

    session
        .load()
        .await
        .with_context(|| format!("Cannot open {}", image))?;

    if let Some(zoom) = args.zoom {
        session.set_zoom_percent(zoom);
    }
    for _ in 0..args.rotate % 4 {
        session.rotate();
    }
    if let Some((dx, dy)) = args.offset {
        session.drag_start(0.0, 0.0);
        session.drag_move(dx, dy);
        session.drag_end();
    }
    session.set_adjustments(Adjustments::new(args.brightness, args.contrast, args.filter));

    session.save().await?;
    let blob = rx.await.context("Export produced no image")?;

    if let Some(path) = &args.output {
        tokio::fs::write(path, &blob)
            .await
            .with_context(|| format!("Cannot write {}", path.display()))?;
        println!("Saved {} byte avatar to {}", blob.len(), path.display());
    }

    if args.upload {
        let uploader = Uploader::new(
            &config.upload_url,
            &config.upload_field,
            config.upload_token.clone(),
        );
        let receipt = uploader.upload(blob).await?;
        println!("Uploaded avatar to {} (HTTP {})", uploader.url(), receipt.status);
    }

    Ok(())
}

/// Initialize tracing/logging
///
/// Default level is "warn"; use --verbose (or `verbose` in the config) for
/// "debug" level.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("avatar_editor={}", level).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
async fn wait_for_shutdown() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_parse_with_signs() {
        assert_eq!(parse_offset("20,-15"), Ok((20.0, -15.0)));
        assert_eq!(parse_offset(" -3.5 , 4 "), Ok((-3.5, 4.0)));
        assert!(parse_offset("20").is_err());
        assert!(parse_offset("a,b").is_err());
    }

    #[test]
    fn one_shot_flags_parse() {
        let args = Args::try_parse_from([
            "avatar-editor",
            "--image",
            "me.png",
            "--output",
            "out.jpg",
            "--rotate",
            "2",
            "--offset",
            "-10,5",
            "--filter",
            "sepia(50%)",
        ])
        .unwrap();
        assert_eq!(args.rotate, 2);
        assert_eq!(args.offset, Some((-10.0, 5.0)));
        assert_eq!(args.filter, NamedFilter::Sepia(0.5));
        assert_eq!(args.brightness, 100.0);
    }

    #[test]
    fn edit_flags_require_an_image() {
        assert!(Args::try_parse_from(["avatar-editor", "--zoom", "150"]).is_err());
        assert!(Args::try_parse_from(["avatar-editor", "--http-port", "9000"]).is_ok());
    }

    #[test]
    fn zoom_is_relative_to_natural_size() {
        use clap::CommandFactory;
        let command = Args::command();
        let zoom = command
            .get_arguments()
            .find(|a| a.get_id() == "zoom")
            .unwrap();
        assert!(zoom.get_help().unwrap().to_string().contains("natural size"));

        let args = Args::try_parse_from(["avatar-editor", "--image", "a.png", "--zoom", "150"]).unwrap();
        let mut controller = editor::Controller::new(
            editor::Transform::fitted(0.1),
            editor::ZoomLimits::default(),
        );
        controller.set_zoom_percent(args.zoom.unwrap());
        assert_eq!(controller.transform.scale(), 1.5);
    }

    #[test]
    fn init_config_excludes_one_shot() {
        let args = Args::try_parse_from(["avatar-editor", "--init-config", "-c", "/tmp/a.json"]).unwrap();
        assert!(args.init_config);
        assert_eq!(args.config, "/tmp/a.json");
        assert!(Args::try_parse_from(["avatar-editor", "--init-config", "--image", "x.png"]).is_err());
    }

    #[tokio::test]
    async fn one_shot_writes_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.jpg");
        let png = editor::source::tests::png_bytes(120, 80, [30, 90, 160, 255]);
        std::fs::write(&input, &png).unwrap();

        let args = Args::try_parse_from([
            "avatar-editor",
            "--image",
            input.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
            "--zoom",
            "150",
            "--filter",
            "grayscale",
        ])
        .unwrap();
        let image = args.image.clone().unwrap();
        run_once(&Config::default(), &args, &image).await.unwrap();

        let decoded = image::open(&output).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (400, 400));
    }

    #[tokio::test]
    async fn one_shot_needs_a_destination() {
        let args = Args::try_parse_from(["avatar-editor", "--image", "me.png"]).unwrap();
        assert!(run_once(&Config::default(), &args, "me.png").await.is_err());
    }
}
