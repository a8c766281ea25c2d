//! Configuration management for the avatar editor.
//!
//! Handles loading, saving, and validating configuration from JSON files.

use crate::editor::{EditorSettings, LoadConfig, PreviewStyle, ZoomLimits};
use crate::surface::Rgba;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/avatar-editor/config.json";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Smallest interactive canvas edge in pixels
    pub canvas_min: u32,

    /// Largest interactive canvas edge in pixels
    pub canvas_max: u32,

    /// Initial container width, before the UI reports its own
    pub container_width: u32,

    /// Edge length of the exported JPEG
    pub output_size: u32,

    /// JPEG quality (1-100)
    pub jpeg_quality: u8,

    /// Share of the canvas the image's larger side fills after auto-fit
    pub fit_ratio: f32,

    /// Crop circle radius as a share of the canvas
    pub crop_ratio: f32,

    /// Zoom slider range in percent
    pub zoom_percent_min: f32,
    pub zoom_percent_max: f32,

    /// Bounds and increment for zoom in/out buttons
    pub zoom_step_min: f32,
    pub zoom_step_max: f32,
    pub zoom_step: f32,

    /// Preview backdrop colour (#rrggbb)
    pub background: String,

    /// Opacity of the dark overlay outside the crop circle
    pub overlay_alpha: f32,

    /// Colour behind transparent pixels in the exported JPEG (#rrggbb)
    pub export_matte: String,

    /// Apply brightness/contrast/filter in the preview too
    pub live_adjustments: bool,

    /// Minimum time between preview renders
    pub frame_interval_ms: u64,

    /// Largest accepted image dimension
    pub max_dimension: u32,

    /// Where saved avatars are posted; empty disables upload
    pub upload_url: String,

    /// Multipart field name for the avatar
    pub upload_field: String,

    /// Optional bearer token for the upload endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_token: Option<String>,

    /// Web server port
    pub web_port: u16,

    /// Enable verbose logging
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            canvas_min: 300,
            canvas_max: 500,
            container_width: 500,
            output_size: 400,
            jpeg_quality: 92,
            fit_ratio: 0.7,
            crop_ratio: 0.35,
            zoom_percent_min: 10.0,
            zoom_percent_max: 300.0,
            zoom_step_min: 0.1,
            zoom_step_max: 3.0,
            zoom_step: 0.1,
            background: "#f3f4f6".to_string(),
            overlay_alpha: 0.5,
            export_matte: "#ffffff".to_string(),
            live_adjustments: true,
            frame_interval_ms: 16,
            max_dimension: 8192,
            upload_url: String::new(),
            upload_field: "profilePicture".to_string(),
            upload_token: None,
            web_port: 8890,
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file atomically
    ///
    /// Writes to a temporary file and renames it over the target, so a crash
    /// mid-write never leaves a truncated config behind.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;

        std::fs::rename(&tmp_path, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            ConfigError::ReadError(e)
        })?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.canvas_min < 100 {
            return Err(ConfigError::ValidationError(
                "canvas_min must be at least 100".to_string(),
            ));
        }

        if self.canvas_max < self.canvas_min {
            return Err(ConfigError::ValidationError(
                "canvas_max must not be smaller than canvas_min".to_string(),
            ));
        }

        if !(64..=4096).contains(&self.output_size) {
            return Err(ConfigError::ValidationError(
                "output_size must be between 64 and 4096".to_string(),
            ));
        }

        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::ValidationError(
                "jpeg_quality must be between 1 and 100".to_string(),
            ));
        }

        for (name, value) in [
            ("fit_ratio", self.fit_ratio),
            ("crop_ratio", self.crop_ratio),
            ("overlay_alpha", self.overlay_alpha),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be in (0, 1]",
                    name
                )));
            }
        }

        if self.crop_ratio > 0.5 {
            return Err(ConfigError::ValidationError(
                "crop_ratio must not exceed 0.5".to_string(),
            ));
        }

        if self.zoom_percent_min <= 0.0 || self.zoom_percent_min >= self.zoom_percent_max {
            return Err(ConfigError::ValidationError(format!(
                "Invalid zoom range {}%..{}%",
                self.zoom_percent_min, self.zoom_percent_max
            )));
        }

        if self.zoom_step_min <= 0.0 || self.zoom_step_min >= self.zoom_step_max {
            return Err(ConfigError::ValidationError(format!(
                "Invalid zoom step range {}..{}",
                self.zoom_step_min, self.zoom_step_max
            )));
        }

        if self.zoom_step <= 0.0 {
            return Err(ConfigError::ValidationError(
                "zoom_step must be greater than 0".to_string(),
            ));
        }

        if self.max_dimension == 0 {
            return Err(ConfigError::ValidationError(
                "max_dimension must be greater than 0".to_string(),
            ));
        }

        if self.web_port == 0 {
            return Err(ConfigError::ValidationError(
                "web_port must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("background", &self.background),
            ("export_matte", &self.export_matte),
        ] {
            Rgba::from_hex(value).map_err(|e| {
                ConfigError::ValidationError(format!("{}: {}", name, e))
            })?;
        }

        Ok(())
    }

    /// Check if an upload URL is configured
    pub fn has_upload_url(&self) -> bool {
        !self.upload_url.trim().is_empty()
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    /// Editor tunables derived from this configuration
    pub fn settings(&self) -> EditorSettings {
        let defaults = PreviewStyle::default();
        let style = PreviewStyle {
            background: Rgba::from_hex(&self.background).unwrap_or(defaults.background),
            overlay: Rgba::BLACK.with_opacity(self.overlay_alpha),
            ..defaults
        };

        EditorSettings {
            fit_ratio: self.fit_ratio,
            crop_ratio: self.crop_ratio,
            zoom: ZoomLimits {
                percent_min: self.zoom_percent_min,
                percent_max: self.zoom_percent_max,
                step_min: self.zoom_step_min,
                step_max: self.zoom_step_max,
                step: self.zoom_step,
            },
            output_size: self.output_size,
            jpeg_quality: self.jpeg_quality,
            matte: Rgba::from_hex(&self.export_matte).unwrap_or(Rgba::WHITE),
            style,
            live_adjustments: self.live_adjustments,
            load: LoadConfig {
                max_dimension: self.max_dimension,
                preview_max_edge: self.canvas_max.saturating_mul(2),
                ..LoadConfig::default()
            },
        }
    }
}
