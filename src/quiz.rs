use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use image::RgbaImage;
use rand::seq::IteratorRandom;
use tracing::{info, warn};

use crate::{
    assets::{self, subject::placeholder_image, SubjectResolver, SubjectSource},
    clip::{Clip, Frame},
    compose,
    config::RenderConfig,
    encode::{self, EncodeConfig},
    error::{FishreelError, FishreelResult},
    text::{self, FontHandle},
};

/// Caption vertical anchor shared by both quiz segments.
pub const CAPTION_RATIO: f32 = 0.4;
/// How long the "guess" still stays on screen.
pub const GUESS_SEGMENT_SECS: f64 = 5.0;
/// How long the reveal still stays on screen.
pub const LOSE_SEGMENT_SECS: f64 = 4.0;

/// Fish name -> image URL.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(transparent)]
pub struct FishDb {
    entries: BTreeMap<String, String>,
}

impl FishDb {
    pub fn load(path: &Path) -> FishreelResult<Self> {
        use anyhow::Context as _;
        let bytes = std::fs::read(path)
            .with_context(|| format!("read fish database '{}'", path.display()))?;
        let db: Self = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse fish database '{}'", path.display()))?;
        if db.entries.is_empty() {
            return Err(FishreelError::validation(format!(
                "fish database '{}' is empty",
                path.display()
            )));
        }
        Ok(db)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn pick_random(&self) -> FishreelResult<(&str, &str)> {
        let mut rng = rand::thread_rng();
        self.entries
            .iter()
            .choose(&mut rng)
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .ok_or_else(|| FishreelError::validation("fish database is empty"))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which of the two quiz stills.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Guess,
    Lose,
}

/// One full video-generation request.
#[derive(Clone, Debug)]
pub struct QuizJob {
    pub config: RenderConfig,
    /// Prompt shown during the guess segment.
    pub guess_caption: String,
    /// Subject of the reveal segment.
    pub fish_name: String,
    pub fish_url: Option<String>,
    /// Local subject image, tried before cache and network.
    pub fish_path: Option<PathBuf>,
    /// Background photo; solid fallback when missing or unreadable.
    pub background_path: Option<PathBuf>,
    /// Directory for cached subject downloads.
    pub cache_dir: Option<PathBuf>,
    /// Background music; when set the final output gets an audio track.
    pub music_path: Option<PathBuf>,
    pub out_path: PathBuf,
}

impl QuizJob {
    pub fn new(fish_name: impl Into<String>, out_path: impl Into<PathBuf>) -> Self {
        Self {
            config: RenderConfig::default(),
            guess_caption: "Pick a fish in the Indian Ocean".to_string(),
            fish_name: fish_name.into(),
            fish_url: None,
            fish_path: None,
            background_path: None,
            cache_dir: None,
            music_path: None,
            out_path: out_path.into(),
        }
    }

    fn lose_caption(&self) -> String {
        format!("If you picked {}\nyou lose", self.fish_name)
    }
}

/// Load the background photo, degrading to the solid fallback with a log
/// line rather than failing the run.
pub fn load_background(path: Option<&Path>) -> Option<RgbaImage> {
    let path = path?;
    match assets::load_image(path) {
        Ok(img) => Some(img),
        Err(e) => {
            warn!(path = %path.display(), %e, "background unusable, using solid fallback");
            None
        }
    }
}

/// Resolve the subject image, degrading to a synthesized placeholder card.
pub fn resolve_subject(job: &QuizJob, font: &FontHandle) -> RgbaImage {
    let resolver = SubjectResolver::new(job.cache_dir.clone());
    let source = SubjectSource {
        name: job.fish_name.clone(),
        url: job.fish_url.clone(),
        path: job.fish_path.clone(),
    };
    match resolver.resolve(&source) {
        Ok(img) => img,
        Err(e) => {
            warn!(fish = %job.fish_name, %e, "subject image unobtainable, using placeholder");
            placeholder_image(&job.config, font, &job.fish_name)
        }
    }
}

/// Compose a single quiz still. Used by the one-frame PNG path and the
/// full render.
pub fn compose_segment(
    job: &QuizJob,
    kind: SegmentKind,
    font: &FontHandle,
    background: Option<&RgbaImage>,
    subject: Option<&RgbaImage>,
) -> RgbaImage {
    match kind {
        SegmentKind::Guess => compose::compose(
            &job.config,
            background,
            &job.guess_caption,
            font,
            CAPTION_RATIO,
            None,
        ),
        SegmentKind::Lose => compose::compose(
            &job.config,
            background,
            &job.lose_caption(),
            font,
            CAPTION_RATIO,
            subject,
        ),
    }
}

/// Produce the finished quiz video (and the music mux when configured).
///
/// Returns the path of the final file. Aborts without writing anything
/// when no font can be loaded, since neither captions nor the placeholder
/// card can be produced without one.
pub fn generate(job: &QuizJob) -> FishreelResult<PathBuf> {
    job.config.validate()?;

    let font = text::load_font_with_fallback(&job.config.caption)?;
    let background = load_background(job.background_path.as_deref());
    let subject = resolve_subject(job, &font);

    info!(fish = %job.fish_name, "composing quiz segments");
    let guess = compose_segment(job, SegmentKind::Guess, &font, background.as_ref(), None);
    let lose = compose_segment(
        job,
        SegmentKind::Lose,
        &font,
        background.as_ref(),
        Some(&subject),
    );

    let fps = job.config.fps;
    let guess_clip = Clip::assemble(vec![Frame::new(guess, GUESS_SEGMENT_SECS)], fps)?;
    let lose_clip = Clip::assemble(vec![Frame::new(lose, LOSE_SEGMENT_SECS)], fps)?;
    let full = Clip::concat(vec![guess_clip, lose_clip])?;

    encode::encode_clip(
        &full,
        EncodeConfig {
            width: job.config.width,
            height: job.config.height,
            fps,
            settings: job.config.encode.clone(),
            out_path: job.out_path.clone(),
            overwrite: true,
        },
    )?;

    let Some(music) = job.music_path.as_deref() else {
        return Ok(job.out_path.clone());
    };

    let muxed_path = muxed_out_path(&job.out_path);
    encode::mux_audio(&job.out_path, music, &muxed_path, full.duration_secs())?;
    Ok(muxed_path)
}

/// `fish.mp4` -> `fish-with-music.mp4`, next to the silent render.
pub fn muxed_out_path(out_path: &Path) -> PathBuf {
    let stem = out_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let ext = out_path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".to_string());
    out_path.with_file_name(format!("{stem}-with-music.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::FIXTURE_FONT;

    fn test_font() -> FontHandle {
        text::load_font(Path::new(FIXTURE_FONT), 70.0).unwrap()
    }

    #[test]
    fn fish_db_parses_name_to_url_map() {
        let db: FishDb = serde_json::from_str(
            r#"{ "Abalistes Stellatus": "https://example.com/abalistes.jpg" }"#,
        )
        .unwrap();
        assert_eq!(db.len(), 1);
        assert_eq!(
            db.get("Abalistes Stellatus"),
            Some("https://example.com/abalistes.jpg")
        );
    }

    #[test]
    fn pick_random_returns_a_member() {
        let db: FishDb =
            serde_json::from_str(r#"{ "A": "u1", "B": "u2", "C": "u3" }"#).unwrap();
        let (name, url) = db.pick_random().unwrap();
        assert!(db.get(name) == Some(url));
    }

    #[test]
    fn lose_caption_names_the_fish_on_two_lines() {
        let job = QuizJob::new("Abalistes Stellatus", "out.mp4");
        let caption = job.lose_caption();
        assert_eq!(caption, "If you picked Abalistes Stellatus\nyou lose");
        assert_eq!(caption.lines().count(), 2);
    }

    #[test]
    fn muxed_path_keeps_directory_and_extension() {
        assert_eq!(
            muxed_out_path(Path::new("videos/fish.mp4")),
            PathBuf::from("videos/fish-with-music.mp4")
        );
    }

    #[test]
    fn load_background_missing_file_degrades_to_none() {
        assert!(load_background(Some(Path::new("missing.jpg"))).is_none());
        assert!(load_background(None).is_none());
    }

    #[test]
    fn segments_compose_at_canvas_size() {
        let mut job = QuizJob::new("Testfish", "out.mp4");
        job.config.width = 108;
        job.config.height = 192;
        let font = test_font();

        let subject = RgbaImage::from_pixel(10, 10, image::Rgba([5, 5, 5, 255]));
        let guess = compose_segment(&job, SegmentKind::Guess, &font, None, None);
        let lose = compose_segment(&job, SegmentKind::Lose, &font, None, Some(&subject));
        assert_eq!(guess.dimensions(), (108, 192));
        assert_eq!(lose.dimensions(), (108, 192));
    }

    #[test]
    fn unobtainable_subject_degrades_to_placeholder() {
        let mut job = QuizJob::new("Ghostfish", "out.mp4");
        job.config.width = 200;
        job.config.height = 400;
        // No path, no URL, no cache: every resolver tier fails.
        let font = test_font();
        let img = resolve_subject(&job, &font);

        let expected_w = (job.config.width as f32 * job.config.subject.max_width_frac) as u32;
        assert_eq!(img.dimensions(), (expected_w, expected_w / 2));
        assert!(img.pixels().any(|p| p.0 == [60, 70, 90, 255]));
    }
}
