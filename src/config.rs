use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{FishreelError, FishreelResult};

/// Everything that shapes a composed frame and the encoded output.
///
/// Field defaults reproduce the portrait 1080x1920 @ 30fps layout the quiz
/// clips are tuned for; callers that want a different canvas construct the
/// struct explicitly and run [`RenderConfig::validate`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Canvas width in pixels. Default 1080.
    pub width: u32,
    /// Canvas height in pixels. Default 1920 (9:16 portrait).
    pub height: u32,
    /// Output frame rate. Default 30.
    pub fps: u32,
    /// Solid background fallback color (RGB). Default black.
    pub background_rgb: [u8; 3],
    pub caption: CaptionStyle,
    pub subject: SubjectLayout,
    pub encode: EncodeSettings,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 30,
            background_rgb: [0, 0, 0],
            caption: CaptionStyle::default(),
            subject: SubjectLayout::default(),
            encode: EncodeSettings::default(),
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> FishreelResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(FishreelError::validation(
                "canvas width/height must be non-zero",
            ));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            // yuv420p mp4 output needs even dimensions.
            return Err(FishreelError::validation(
                "canvas width/height must be even (required for yuv420p mp4 output)",
            ));
        }
        if self.fps == 0 {
            return Err(FishreelError::validation("fps must be non-zero"));
        }
        self.caption.validate()?;
        self.subject.validate()?;
        self.encode.validate()?;
        Ok(())
    }
}

/// Caption typography and placement.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptionStyle {
    /// Font file to load. `None` falls back to a scan of common system
    /// font locations.
    pub font_path: Option<PathBuf>,
    /// Glyph size in pixels. Default 70.
    pub font_px: f32,
    /// Fill color (RGB). Default white.
    pub fill_rgb: [u8; 3],
    /// Outline color (RGB). Default black.
    pub stroke_rgb: [u8; 3],
    /// Outline width in pixels. Default 2.
    pub stroke_px: u32,
    /// Fixed upward nudge subtracted from the computed baseline position,
    /// in pixels. Tuned empirically for the default font/size pair; there
    /// is no formula deriving it from font metrics. Default 300.
    pub vertical_nudge: i32,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            font_path: None,
            font_px: 70.0,
            fill_rgb: [255, 255, 255],
            stroke_rgb: [0, 0, 0],
            stroke_px: 2,
            vertical_nudge: 300,
        }
    }
}

impl CaptionStyle {
    pub fn validate(&self) -> FishreelResult<()> {
        if !self.font_px.is_finite() || self.font_px <= 0.0 {
            return Err(FishreelError::validation("caption font_px must be > 0"));
        }
        Ok(())
    }
}

/// How the subject image is fitted into the canvas.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubjectLayout {
    /// Maximum subject width as a fraction of canvas width. Default 0.9.
    pub max_width_frac: f32,
    /// Maximum subject height as a fraction of canvas height. Default 0.8.
    pub max_height_frac: f32,
    /// Top edge of the subject as a fraction of canvas height. Default 0.35.
    pub top_frac: f32,
}

impl Default for SubjectLayout {
    fn default() -> Self {
        Self {
            max_width_frac: 0.9,
            max_height_frac: 0.8,
            top_frac: 0.35,
        }
    }
}

impl SubjectLayout {
    pub fn validate(&self) -> FishreelResult<()> {
        for (name, v) in [
            ("max_width_frac", self.max_width_frac),
            ("max_height_frac", self.max_height_frac),
            ("top_frac", self.top_frac),
        ] {
            if !v.is_finite() || v <= 0.0 || v > 1.0 {
                return Err(FishreelError::validation(format!(
                    "subject {name} must be in (0, 1]"
                )));
            }
        }
        Ok(())
    }
}

/// Knobs forwarded to the external encoder.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodeSettings {
    /// Target video bitrate, ffmpeg syntax. Default "5000k".
    pub bitrate: String,
    /// x264 speed/quality preset. Default "medium".
    pub preset: String,
    /// Encoder worker threads. Default: available CPU count, else 4.
    pub threads: u32,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            bitrate: "5000k".to_string(),
            preset: "medium".to_string(),
            threads: default_threads(),
        }
    }
}

impl EncodeSettings {
    pub fn validate(&self) -> FishreelResult<()> {
        if self.bitrate.is_empty() {
            return Err(FishreelError::validation("encode bitrate must be set"));
        }
        if self.preset.is_empty() {
            return Err(FishreelError::validation("encode preset must be set"));
        }
        if self.threads == 0 {
            return Err(FishreelError::validation("encode threads must be non-zero"));
        }
        Ok(())
    }
}

fn default_threads() -> u32 {
    let n = num_cpus::get();
    if n == 0 { 4 } else { n as u32 }
}
