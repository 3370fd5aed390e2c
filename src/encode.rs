use std::{
    io::Read,
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
};

use tracing::info;

use crate::{
    clip::Clip,
    config::EncodeSettings,
    error::{FishreelError, FishreelResult},
};

#[derive(Clone, Debug)]
pub struct EncodeConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub settings: EncodeSettings,
    pub out_path: PathBuf,
    pub overwrite: bool,
}

impl EncodeConfig {
    pub fn validate(&self) -> FishreelResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(FishreelError::validation(
                "encode width/height must be non-zero",
            ));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            // We target yuv420p output for maximum player compatibility.
            return Err(FishreelError::validation(
                "encode width/height must be even (required for yuv420p mp4 output)",
            ));
        }
        if self.fps == 0 {
            return Err(FishreelError::validation("encode fps must be non-zero"));
        }
        self.settings.validate()
    }
}

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn ensure_parent_dir(path: &Path) -> FishreelResult<()> {
    if let Some(parent) = path.parent() {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Sibling scratch path the muxer writes into before the final rename, so
/// a failed encode never leaves a truncated file at the target path.
fn temp_out_path(out_path: &Path) -> PathBuf {
    let mut name = out_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    out_path.with_file_name(name)
}

/// Arguments for the still-video encode, excluding the program name.
/// Split out so the command line itself is testable without ffmpeg.
pub fn video_encode_args(cfg: &EncodeConfig, tmp_out: &Path) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    args.push(if cfg.overwrite { "-y" } else { "-n" }.into());
    for s in [
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgba",
        "-s",
    ] {
        args.push(s.into());
    }
    args.push(format!("{}x{}", cfg.width, cfg.height));
    args.push("-r".into());
    args.push(cfg.fps.to_string());
    for s in [
        "-i", "pipe:0", "-an", "-c:v", "libx264", "-pix_fmt", "yuv420p", "-b:v",
    ] {
        args.push(s.into());
    }
    args.push(cfg.settings.bitrate.clone());
    args.push("-preset".into());
    args.push(cfg.settings.preset.clone());
    args.push("-threads".into());
    args.push(cfg.settings.threads.to_string());
    for s in ["-movflags", "+faststart", "-f", "mp4"] {
        args.push(s.into());
    }
    args.push(tmp_out.display().to_string());
    args
}

/// Arguments for the audio mux pass, excluding the program name.
///
/// `apad` pads a short audio track with trailing silence and `-t` trims the
/// output to the video duration, so audio shorter than the video plays once
/// and audio longer than the video is cut at the video's end.
pub fn mux_audio_args(
    video_path: &Path,
    audio_path: &Path,
    video_duration_secs: f64,
    tmp_out: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-loglevel".into(), "error".into()];
    args.extend(["-i".into(), video_path.display().to_string()]);
    args.extend(["-i".into(), audio_path.display().to_string()]);
    for s in [
        "-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac", "-af", "apad", "-t",
    ] {
        args.push(s.into());
    }
    args.push(format!("{video_duration_secs:.3}"));
    for s in ["-movflags", "+faststart", "-f", "mp4"] {
        args.push(s.into());
    }
    args.push(tmp_out.display().to_string());
    args
}

/// Streams raw RGBA frames into a spawned `ffmpeg` process.
///
/// The system binary is used rather than linked FFmpeg to avoid native dev
/// header/lib requirements.
pub struct FfmpegEncoder {
    cfg: EncodeConfig,
    tmp_out: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,
    scratch: Vec<u8>,
}

impl FfmpegEncoder {
    pub fn new(cfg: EncodeConfig) -> FishreelResult<Self> {
        cfg.validate()?;
        ensure_parent_dir(&cfg.out_path)?;

        if !cfg.overwrite && cfg.out_path.exists() {
            return Err(FishreelError::validation(format!(
                "output file '{}' already exists",
                cfg.out_path.display()
            )));
        }

        if !is_ffmpeg_on_path() {
            return Err(FishreelError::encode(
                "ffmpeg is required for MP4 encoding, but was not found on PATH",
            ));
        }

        let tmp_out = temp_out_path(&cfg.out_path);
        let mut cmd = Command::new("ffmpeg");
        cmd.args(video_encode_args(&cfg, &tmp_out))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            FishreelError::encode(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FishreelError::encode("failed to open ffmpeg stdin (unexpected)"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| FishreelError::encode("failed to open ffmpeg stderr (unexpected)"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        Ok(Self {
            scratch: vec![0u8; (cfg.width * cfg.height * 4) as usize],
            cfg,
            tmp_out,
            child: Some(child),
            stdin: Some(stdin),
            stderr_drain: Some(stderr_drain),
        })
    }

    /// Write one frame's pixels, repeated `repeat` times.
    ///
    /// When the stream breaks mid-write the child is reaped, the temp file
    /// removed, and ffmpeg's own stderr is reported instead of the raw
    /// pipe error.
    pub fn encode_still(&mut self, image: &image::RgbaImage, repeat: u64) -> FishreelResult<()> {
        if image.dimensions() != (self.cfg.width, self.cfg.height) {
            return Err(FishreelError::validation(format!(
                "frame size mismatch: got {:?}, expected {}x{}",
                image.dimensions(),
                self.cfg.width,
                self.cfg.height
            )));
        }

        flatten_to_opaque_rgba8(&mut self.scratch, image.as_raw())?;

        let Some(mut stdin) = self.stdin.take() else {
            return Err(FishreelError::encode("ffmpeg encoder is already finalized"));
        };

        use std::io::Write as _;
        for _ in 0..repeat {
            if let Err(e) = stdin.write_all(&self.scratch) {
                drop(stdin);
                return Err(self.fail_stream(e));
            }
        }
        self.stdin = Some(stdin);
        Ok(())
    }

    /// Reap the child and surface its stderr after a broken write.
    fn fail_stream(&mut self, write_err: std::io::Error) -> FishreelError {
        let (status, stderr) = self.reap();
        std::fs::remove_file(&self.tmp_out).ok();

        match status {
            Some(status) if !status.success() => FishreelError::encode(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )),
            _ => FishreelError::encode(format!(
                "failed to write frame to ffmpeg stdin: {write_err}"
            )),
        }
    }

    fn reap(&mut self) -> (Option<std::process::ExitStatus>, String) {
        drop(self.stdin.take());
        let status = self.child.take().and_then(|mut child| child.wait().ok());
        let stderr_bytes = self
            .stderr_drain
            .take()
            .and_then(|handle| handle.join().ok())
            .and_then(|read| read.ok())
            .unwrap_or_default();
        (status, String::from_utf8_lossy(&stderr_bytes).into_owned())
    }

    pub fn finish(mut self) -> FishreelResult<()> {
        drop(self.stdin.take());

        let Some(mut child) = self.child.take() else {
            return Err(FishreelError::encode("ffmpeg encoder is already finalized"));
        };
        let status = child.wait().map_err(|e| {
            FishreelError::encode(format!("failed to wait for ffmpeg to finish: {e}"))
        })?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| FishreelError::encode("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| FishreelError::encode(format!("ffmpeg stderr read failed: {e}")))?,
            None => Vec::new(),
        };

        if !status.success() {
            std::fs::remove_file(&self.tmp_out).ok();
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(FishreelError::encode(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }

        std::fs::rename(&self.tmp_out, &self.cfg.out_path).map_err(|e| {
            FishreelError::encode(format!(
                "failed to move '{}' into place: {e}",
                self.tmp_out.display()
            ))
        })?;
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    /// Reaps the child and removes the temp file when `finish` was never
    /// reached.
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            child.kill().ok();
            child.wait().ok();
            std::fs::remove_file(&self.tmp_out).ok();
        }
        if let Some(handle) = self.stderr_drain.take() {
            handle.join().ok();
        }
    }
}

/// Encode a whole clip to `cfg.out_path`.
pub fn encode_clip(clip: &Clip, cfg: EncodeConfig) -> FishreelResult<()> {
    let (w, h) = clip.dimensions();
    if (w, h) != (cfg.width, cfg.height) || clip.fps() != cfg.fps {
        return Err(FishreelError::validation(format!(
            "clip {}x{}@{} does not match encode config {}x{}@{}",
            w,
            h,
            clip.fps(),
            cfg.width,
            cfg.height,
            cfg.fps
        )));
    }

    let out_path = cfg.out_path.clone();
    let mut encoder = FfmpegEncoder::new(cfg)?;
    for segment in clip.segments() {
        encoder.encode_still(&segment.image, segment.frame_count)?;
    }
    encoder.finish()?;
    info!(
        frames = clip.total_frames(),
        secs = clip.duration_secs(),
        out = %out_path.display(),
        "encoded clip"
    );
    Ok(())
}

/// Combine an encoded video with an audio track into a new container,
/// trimmed to the video's duration.
pub fn mux_audio(
    video_path: &Path,
    audio_path: &Path,
    out_path: &Path,
    video_duration_secs: f64,
) -> FishreelResult<()> {
    if !video_duration_secs.is_finite() || video_duration_secs <= 0.0 {
        return Err(FishreelError::validation(
            "mux video duration must be positive",
        ));
    }
    ensure_parent_dir(out_path)?;

    if !is_ffmpeg_on_path() {
        return Err(FishreelError::encode(
            "ffmpeg is required for audio muxing, but was not found on PATH",
        ));
    }

    let tmp_out = temp_out_path(out_path);
    let output = Command::new("ffmpeg")
        .args(mux_audio_args(
            video_path,
            audio_path,
            video_duration_secs,
            &tmp_out,
        ))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| FishreelError::encode(format!("failed to run ffmpeg for muxing: {e}")))?;

    if !output.status.success() {
        std::fs::remove_file(&tmp_out).ok();
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FishreelError::encode(format!(
            "ffmpeg mux exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    std::fs::rename(&tmp_out, out_path).map_err(|e| {
        FishreelError::encode(format!(
            "failed to move '{}' into place: {e}",
            tmp_out.display()
        ))
    })?;
    info!(out = %out_path.display(), "muxed audio track");
    Ok(())
}

fn flatten_to_opaque_rgba8(dst: &mut [u8], src: &[u8]) -> FishreelResult<()> {
    if dst.len() != src.len() || dst.len() % 4 != 0 {
        return Err(FishreelError::validation(
            "flatten_to_opaque_rgba8 expects equal-length rgba8 buffers",
        ));
    }

    // Composed frames are opaque already; a translucent pixel slipping
    // through is flattened over black rather than handed to ffmpeg raw.
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = s[3] as u16;
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }
        for i in 0..3 {
            d[i] = ((s[i] as u16 * a + 127) / 255) as u8;
        }
        d[3] = 255;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncodeSettings;

    fn cfg() -> EncodeConfig {
        EncodeConfig {
            width: 1080,
            height: 1920,
            fps: 30,
            settings: EncodeSettings {
                bitrate: "5000k".into(),
                preset: "medium".into(),
                threads: 4,
            },
            out_path: PathBuf::from("out/fish.mp4"),
            overwrite: true,
        }
    }

    #[test]
    fn config_validation_catches_bad_values() {
        let mut c = cfg();
        c.width = 0;
        assert!(c.validate().is_err());

        let mut c = cfg();
        c.height = 11;
        assert!(c.validate().is_err());

        let mut c = cfg();
        c.fps = 0;
        assert!(c.validate().is_err());

        let mut c = cfg();
        c.settings.bitrate.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn video_args_carry_encoder_knobs() {
        let args = video_encode_args(&cfg(), Path::new("out/fish.mp4.part"));
        let joined = args.join(" ");
        assert!(joined.contains("-s 1080x1920"));
        assert!(joined.contains("-r 30"));
        assert!(joined.contains("-b:v 5000k"));
        assert!(joined.contains("-preset medium"));
        assert!(joined.contains("-threads 4"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.ends_with("out/fish.mp4.part"));
    }

    #[test]
    fn mux_args_pad_and_trim_to_video_duration() {
        let args = mux_audio_args(
            Path::new("v.mp4"),
            Path::new("music.mp3"),
            3.0,
            Path::new("final.mp4.part"),
        );
        let joined = args.join(" ");
        // 3s video + any-length audio => exactly 3s output.
        assert!(joined.contains("-af apad"));
        assert!(joined.contains("-t 3.000"));
        assert!(joined.contains("-c:v copy"));
        assert!(joined.contains("-c:a aac"));
    }

    #[test]
    fn temp_path_is_a_sibling_with_part_suffix() {
        assert_eq!(
            temp_out_path(Path::new("a/b/fish.mp4")),
            PathBuf::from("a/b/fish.mp4.part")
        );
    }

    #[test]
    fn flatten_passes_opaque_pixels_through() {
        let src = vec![7u8, 8, 9, 255];
        let mut dst = vec![0u8; 4];
        flatten_to_opaque_rgba8(&mut dst, &src).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn flatten_translucent_over_black() {
        let src = vec![255u8, 0, 0, 128];
        let mut dst = vec![0u8; 4];
        flatten_to_opaque_rgba8(&mut dst, &src).unwrap();
        assert_eq!(dst, vec![128, 0, 0, 255]);
    }

    #[test]
    fn midstream_ffmpeg_failure_surfaces_stderr_and_cleans_temp() {
        if !is_ffmpeg_on_path() {
            return;
        }
        let dir = std::env::temp_dir().join("fishreel-encode-fail");
        std::fs::create_dir_all(&dir).unwrap();
        let out = dir.join("bad.mp4");
        std::fs::remove_file(dir.join("bad.mp4.part")).ok();
        std::fs::remove_file(&out).ok();

        let mut c = cfg();
        c.width = 16;
        c.height = 16;
        c.out_path = out.clone();
        // ffmpeg rejects this option value at startup, so the pipe breaks
        // under the write loop.
        c.settings.bitrate = "not-a-bitrate".into();

        let mut encoder = FfmpegEncoder::new(c).unwrap();
        let frame = image::RgbaImage::from_pixel(16, 16, image::Rgba([0, 0, 0, 255]));

        let mut result = Ok(());
        for _ in 0..10_000 {
            result = encoder.encode_still(&frame, 1);
            if result.is_err() {
                break;
            }
        }
        let err = result.unwrap_err();
        assert!(
            err.to_string().contains("ffmpeg exited"),
            "expected ffmpeg's own failure, got: {err}"
        );
        assert!(!dir.join("bad.mp4.part").exists());
        assert!(!out.exists());
    }

    #[test]
    fn dropping_encoder_midway_reaps_child_and_removes_temp() {
        if !is_ffmpeg_on_path() {
            return;
        }
        let dir = std::env::temp_dir().join("fishreel-encode-drop");
        std::fs::create_dir_all(&dir).unwrap();
        let out = dir.join("abandoned.mp4");
        std::fs::remove_file(dir.join("abandoned.mp4.part")).ok();
        std::fs::remove_file(&out).ok();

        let mut c = cfg();
        c.width = 16;
        c.height = 16;
        c.out_path = out.clone();

        let mut encoder = FfmpegEncoder::new(c).unwrap();
        let frame = image::RgbaImage::from_pixel(16, 16, image::Rgba([0, 0, 0, 255]));
        encoder.encode_still(&frame, 3).unwrap();
        drop(encoder);

        assert!(!dir.join("abandoned.mp4.part").exists());
        assert!(!out.exists());
    }

    #[test]
    fn mux_rejects_nonpositive_duration() {
        let err = mux_audio(
            Path::new("v.mp4"),
            Path::new("a.mp3"),
            Path::new("o.mp4"),
            0.0,
        )
        .unwrap_err();
        assert!(matches!(err, FishreelError::Validation(_)));
    }
}
