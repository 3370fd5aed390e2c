use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage};
use tracing::{debug, info, warn};

use crate::{
    assets::{decode, fetch},
    config::RenderConfig,
    error::{FishreelError, FishreelResult},
    text::FontHandle,
};

/// Where a subject image can come from.
#[derive(Clone, Debug)]
pub struct SubjectSource {
    /// Display name, also the cache key after sanitizing.
    pub name: String,
    /// Remote image to fetch when the cache misses.
    pub url: Option<String>,
    /// Explicit local file, tried before the cache.
    pub path: Option<PathBuf>,
}

/// Resolves a subject to a decoded image: explicit path, then cache by
/// sanitized name, then network fetch with write-through to the cache.
pub struct SubjectResolver {
    cache_dir: Option<PathBuf>,
}

impl SubjectResolver {
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        Self { cache_dir }
    }

    pub fn resolve(&self, source: &SubjectSource) -> FishreelResult<RgbaImage> {
        if let Some(path) = source.path.as_deref() {
            return decode::load_image(path);
        }

        let cache_path = self.cache_path(&source.name);
        if let Some(cached) = cache_path.as_deref() {
            if cached.exists() {
                match decode::load_image(cached) {
                    Ok(img) => {
                        debug!(subject = %source.name, path = %cached.display(), "cache hit");
                        return Ok(img);
                    }
                    Err(e) => {
                        warn!(subject = %source.name, %e, "cached image unreadable, refetching");
                    }
                }
            }
        }

        let url = source.url.as_deref().ok_or_else(|| {
            FishreelError::download(format!(
                "subject '{}' has no local path, cache entry, or url",
                source.name
            ))
        })?;

        info!(subject = %source.name, url, "fetching subject image");
        let bytes = fetch::fetch_bytes(url)?;
        let img = decode::decode_image(&bytes)?;

        if let Some(cached) = cache_path.as_deref() {
            if let Err(e) = write_cache(cached, &bytes) {
                warn!(path = %cached.display(), %e, "failed to cache subject image");
            }
        }

        Ok(img)
    }

    fn cache_path(&self, name: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_deref()
            .map(|dir| dir.join(format!("{}.img", sanitize_name(name))))
    }
}

fn write_cache(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
}

/// Reduce a subject name to a filesystem-safe cache key: lowercase
/// alphanumerics, runs of anything else collapsed to single dashes.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Synthesized stand-in when no subject image is obtainable: a flat card
/// with the subject name drawn centered.
pub fn placeholder_image(cfg: &RenderConfig, font: &FontHandle, name: &str) -> RgbaImage {
    let width = (cfg.width as f32 * cfg.subject.max_width_frac) as u32;
    let height = width / 2;
    let mut img = RgbaImage::from_pixel(width.max(2), height.max(2), Rgba([60, 70, 90, 255]));
    crate::text::draw_caption(
        &mut img,
        name,
        font,
        &cfg.caption,
        0.5,
        // The card is small; skip the full-canvas baseline nudge.
        0,
    );
    img
}
