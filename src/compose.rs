use image::{imageops, Rgba, RgbaImage};
use tracing::warn;

use crate::{config::RenderConfig, text, text::FontHandle};

/// Shrink-only, aspect-preserving fit of `(w, h)` into `(max_w, max_h)`.
///
/// Mirrors thumbnail semantics: an image already inside the bounds keeps
/// its size, otherwise the tighter constraint binds and the other axis is
/// scaled to preserve aspect ratio.
pub fn fit_within(w: u32, h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if w == 0 || h == 0 || (w <= max_w && h <= max_h) {
        return (w, h);
    }
    let scale = (max_w as f64 / w as f64).min(max_h as f64 / h as f64);
    let out_w = ((w as f64 * scale).round() as u32).max(1);
    let out_h = ((h as f64 * scale).round() as u32).max(1);
    (out_w.min(max_w), out_h.min(max_h))
}

/// Compose one still frame: background, optional subject, caption.
///
/// Layer order and placement:
/// 1. `background` resized to exact canvas dimensions, or the configured
///    solid color when absent.
/// 2. `subject`, thumbnail-fitted to at most `max_width_frac` x canvas
///    width and `max_height_frac` x canvas height, centered horizontally
///    with its top edge at `top_frac` x canvas height, composited through
///    its alpha channel.
/// 3. The caption, stroke-outlined, placed by the text layout rules.
///
/// The subject is resized into a private copy; callers keep ownership of
/// their buffers. The result is always exactly `cfg.width x cfg.height`.
pub fn compose(
    cfg: &RenderConfig,
    background: Option<&RgbaImage>,
    caption: &str,
    font: &FontHandle,
    vertical_ratio: f32,
    subject: Option<&RgbaImage>,
) -> RgbaImage {
    let mut frame = match background {
        Some(bg) => {
            if bg.dimensions() == (cfg.width, cfg.height) {
                bg.clone()
            } else {
                imageops::resize(bg, cfg.width, cfg.height, imageops::FilterType::CatmullRom)
            }
        }
        None => RgbaImage::from_pixel(
            cfg.width,
            cfg.height,
            Rgba([
                cfg.background_rgb[0],
                cfg.background_rgb[1],
                cfg.background_rgb[2],
                255,
            ]),
        ),
    };

    if let Some(subject) = subject {
        paste_subject(cfg, &mut frame, subject);
    }

    text::draw_caption(
        &mut frame,
        caption,
        font,
        &cfg.caption,
        vertical_ratio,
        cfg.caption.vertical_nudge,
    );

    frame
}

fn paste_subject(cfg: &RenderConfig, frame: &mut RgbaImage, subject: &RgbaImage) {
    let max_w = (cfg.width as f32 * cfg.subject.max_width_frac) as u32;
    let max_h = (cfg.height as f32 * cfg.subject.max_height_frac) as u32;
    let (sw, sh) = subject.dimensions();
    if sw == 0 || sh == 0 {
        warn!("subject image is empty, skipping");
        return;
    }

    let (fit_w, fit_h) = fit_within(sw, sh, max_w, max_h);
    let resized = if (fit_w, fit_h) == (sw, sh) {
        subject.clone()
    } else {
        imageops::resize(subject, fit_w, fit_h, imageops::FilterType::Lanczos3)
    };

    let x = (cfg.width as i64 - fit_w as i64) / 2;
    let y = (cfg.height as f32 * cfg.subject.top_frac) as i64;
    imageops::overlay(frame, &resized, x, y);
}
