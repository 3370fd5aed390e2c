use std::path::Path;

use image::{Rgba, RgbaImage};
use rusttype::{point, Font, Scale};
use tracing::warn;

use crate::{
    config::CaptionStyle,
    error::{FishreelError, FishreelResult},
};

/// Locations scanned when no font path is configured or the configured one
/// fails to load.
const FALLBACK_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// A loaded face plus the pixel size it will be rendered at.
#[derive(Debug)]
pub struct FontHandle {
    font: Font<'static>,
    px: f32,
}

impl FontHandle {
    pub fn px(&self) -> f32 {
        self.px
    }

    fn scale(&self) -> Scale {
        Scale::uniform(self.px)
    }

    /// Vertical advance between the tops of consecutive lines.
    pub fn line_height(&self) -> f32 {
        let vm = self.font.v_metrics(self.scale());
        vm.ascent - vm.descent + vm.line_gap
    }
}

/// Load a font file at the given pixel size.
pub fn load_font(path: &Path, px: f32) -> FishreelResult<FontHandle> {
    let bytes = std::fs::read(path)
        .map_err(|e| FishreelError::font_load(format!("read font '{}': {e}", path.display())))?;
    let font = Font::try_from_vec(bytes)
        .ok_or_else(|| FishreelError::font_load(format!("parse font '{}'", path.display())))?;
    Ok(FontHandle { font, px })
}

/// Load the configured font, or the first loadable fallback face.
///
/// Returns `FontLoad` only when no candidate resolves at all.
pub fn load_font_with_fallback(style: &CaptionStyle) -> FishreelResult<FontHandle> {
    if let Some(path) = style.font_path.as_deref() {
        match load_font(path, style.font_px) {
            Ok(handle) => return Ok(handle),
            Err(e) => warn!(path = %path.display(), %e, "configured font unusable, trying fallbacks"),
        }
    }

    for candidate in FALLBACK_FONT_PATHS {
        let path = Path::new(candidate);
        if !path.exists() {
            continue;
        }
        if let Ok(handle) = load_font(path, style.font_px) {
            return Ok(handle);
        }
    }

    Err(FishreelError::font_load(
        "no usable font: configured path failed and no fallback face was found",
    ))
}

/// Pixel width of a single line under the given font.
pub fn line_width(font: &FontHandle, line: &str) -> u32 {
    if line.is_empty() {
        return 0;
    }
    let vm = font.font.v_metrics(font.scale());
    let mut width = 0f32;
    for glyph in font.font.layout(line, font.scale(), point(0.0, vm.ascent)) {
        if let Some(bb) = glyph.pixel_bounding_box() {
            width = width.max(bb.max.x as f32);
        }
    }
    width.max(0.0) as u32
}

/// Width of the widest line and total block height of a (possibly
/// multi-line) caption.
pub fn measure(font: &FontHandle, text: &str) -> (u32, u32) {
    let mut max_w = 0u32;
    let mut lines = 0u32;
    for line in text.lines() {
        max_w = max_w.max(line_width(font, line));
        lines += 1;
    }
    let block_h = (lines as f32 * font.line_height()).ceil() as u32;
    (max_w, block_h)
}

/// Compute the caption block origin: horizontally centered, vertically at
/// `canvas_height * vertical_ratio` minus the configured nudge.
///
/// A block that would run past the bottom edge is shifted up until it fits
/// (clamped at zero) instead of silently vanishing off-canvas.
pub fn layout(
    font: &FontHandle,
    text: &str,
    canvas_width: u32,
    canvas_height: u32,
    vertical_ratio: f32,
    vertical_nudge: i32,
) -> (i32, i32) {
    let (text_width, block_height) = measure(font, text);
    let x = (canvas_width as i32 - text_width as i32) / 2;
    let mut y = (canvas_height as f32 * vertical_ratio).floor() as i32 - vertical_nudge;

    let overflow = y + block_height as i32 - canvas_height as i32;
    if overflow > 0 {
        y = (y - overflow).max(0);
    }
    (x, y)
}

/// Draw a stroke-outlined caption. Each line is centered independently;
/// the block origin comes from [`layout`].
pub fn draw_caption(
    img: &mut RgbaImage,
    text: &str,
    font: &FontHandle,
    style: &CaptionStyle,
    vertical_ratio: f32,
    vertical_nudge: i32,
) {
    let (width, height) = img.dimensions();
    let (_, block_y) = layout(font, text, width, height, vertical_ratio, vertical_nudge);

    let fill = Rgba([style.fill_rgb[0], style.fill_rgb[1], style.fill_rgb[2], 255]);
    let stroke = Rgba([
        style.stroke_rgb[0],
        style.stroke_rgb[1],
        style.stroke_rgb[2],
        255,
    ]);
    let s = style.stroke_px as i32;

    let mut line_top = block_y;
    for line in text.lines() {
        let line_x = (width as i32 - line_width(font, line) as i32) / 2;

        // Outline first: the glyph repeated at every offset within the
        // stroke radius, then the fill on top.
        for dy in -s..=s {
            for dx in -s..=s {
                if dx == 0 && dy == 0 {
                    continue;
                }
                draw_line(img, line, font, line_x + dx, line_top + dy, stroke);
            }
        }
        draw_line(img, line, font, line_x, line_top, fill);

        line_top += font.line_height().round() as i32;
    }
}

/// Rasterize one line with its top-left corner at (x, y), alpha-blending
/// coverage into the buffer. Pixels outside the buffer are clipped.
fn draw_line(img: &mut RgbaImage, line: &str, font: &FontHandle, x: i32, y: i32, color: Rgba<u8>) {
    let vm = font.font.v_metrics(font.scale());
    let baseline = y as f32 + vm.ascent;

    for glyph in font
        .font
        .layout(line, font.scale(), point(x as f32, baseline))
    {
        let Some(bb) = glyph.pixel_bounding_box() else {
            continue;
        };
        glyph.draw(|gx, gy, v| {
            let px = gx as i32 + bb.min.x;
            let py = gy as i32 + bb.min.y;
            if px < 0 || py < 0 || px >= img.width() as i32 || py >= img.height() as i32 {
                return;
            }
            let a = v.clamp(0.0, 1.0);
            if a <= 0.0 {
                return;
            }
            let dst = img.get_pixel_mut(px as u32, py as u32);
            let inv = 1.0 - a;
            for i in 0..3 {
                dst.0[i] = (color.0[i] as f32 * a + dst.0[i] as f32 * inv).round() as u8;
            }
            dst.0[3] = 255;
        });
    }
}

/// Bundled face used by font-dependent tests across the crate.
#[cfg(test)]
pub(crate) const FIXTURE_FONT: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/fonts/DejaVuSans.ttf");

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::CaptionStyle;

    fn test_font() -> FontHandle {
        load_font(Path::new(FIXTURE_FONT), CaptionStyle::default().font_px).unwrap()
    }

    #[test]
    fn fallback_loader_honors_configured_path() {
        let style = CaptionStyle {
            font_path: Some(PathBuf::from(FIXTURE_FONT)),
            ..CaptionStyle::default()
        };
        let font = load_font_with_fallback(&style).unwrap();
        assert_eq!(font.px(), style.font_px);
    }

    #[test]
    fn layout_centers_horizontally_within_canvas() {
        let font = test_font();
        for caption in ["Pick a fish", "A", "Guess the fish in the Indian Ocean"] {
            let (w, _) = measure(&font, caption);
            if w >= 1080 {
                continue;
            }
            let (x, _) = layout(&font, caption, 1080, 1920, 0.4, 300);
            assert!(x >= 0, "caption {caption:?} starts off-canvas: {x}");
            assert!(x as u32 + w <= 1080, "caption {caption:?} overruns: {x}+{w}");
        }
    }

    #[test]
    fn layout_applies_ratio_and_nudge() {
        let font = test_font();
        let (_, y) = layout(&font, "hi", 1080, 1920, 0.4, 300);
        // floor(1920 * 0.4) - 300
        assert_eq!(y, 768 - 300);
    }

    #[test]
    fn layout_shifts_overflowing_block_up() {
        let font = test_font();
        let text = "one\ntwo\nthree\nfour";
        let (_, block_h) = measure(&font, text);
        let (_, y) = layout(&font, text, 1080, 1920, 1.0, 0);
        assert!(y >= 0);
        assert!(y as u32 + block_h <= 1920);
    }

    #[test]
    fn measure_counts_lines() {
        let font = test_font();
        let (_, one) = measure(&font, "abc");
        let (_, two) = measure(&font, "abc\ndef");
        assert!(two > one);
    }

    #[test]
    fn draw_caption_marks_pixels() {
        let font = test_font();
        let style = CaptionStyle::default();
        let mut img = RgbaImage::from_pixel(400, 200, Rgba([10, 10, 10, 255]));
        draw_caption(&mut img, "Fish", &font, &style, 0.5, 0);
        assert!(img.pixels().any(|p| p.0[0] > 200));
    }

    #[test]
    fn missing_font_file_is_a_font_load_error() {
        let err = load_font(Path::new("no/such/font.ttf"), 70.0).unwrap_err();
        assert!(matches!(err, FishreelError::FontLoad(_)));
    }
}
