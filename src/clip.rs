use image::RgbaImage;

use crate::error::{FishreelError, FishreelResult};

/// One composed still plus how long it stays on screen.
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbaImage,
    pub duration_secs: f64,
}

impl Frame {
    pub fn new(image: RgbaImage, duration_secs: f64) -> Self {
        Self {
            image,
            duration_secs,
        }
    }
}

/// An ordered sequence of stills at a single frame rate. Each still is
/// held for a whole number of output frames; there is no interpolation.
#[derive(Clone, Debug)]
pub struct Clip {
    fps: u32,
    segments: Vec<Segment>,
}

#[derive(Clone, Debug)]
pub struct Segment {
    pub image: RgbaImage,
    pub frame_count: u64,
}

impl Clip {
    /// Turn stills into a clip at `fps`. Durations round to the nearest
    /// whole frame; every still must share the same dimensions.
    pub fn assemble(frames: Vec<Frame>, fps: u32) -> FishreelResult<Self> {
        if fps == 0 {
            return Err(FishreelError::validation("clip fps must be non-zero"));
        }
        if frames.is_empty() {
            return Err(FishreelError::validation(
                "clip must contain at least one frame",
            ));
        }

        let dims = frames[0].image.dimensions();
        let mut segments = Vec::with_capacity(frames.len());
        for frame in frames {
            if frame.image.dimensions() != dims {
                return Err(FishreelError::validation(format!(
                    "frame size mismatch: got {:?}, expected {:?}",
                    frame.image.dimensions(),
                    dims
                )));
            }
            if !frame.duration_secs.is_finite() || frame.duration_secs <= 0.0 {
                return Err(FishreelError::validation(
                    "frame duration must be positive",
                ));
            }
            let frame_count = (frame.duration_secs * f64::from(fps)).round() as u64;
            if frame_count == 0 {
                return Err(FishreelError::validation(format!(
                    "frame duration {}s rounds to zero frames at {fps} fps",
                    frame.duration_secs
                )));
            }
            segments.push(Segment {
                image: frame.image,
                frame_count,
            });
        }

        Ok(Self { fps, segments })
    }

    /// Concatenate clips strictly in input order. All clips must share fps
    /// and dimensions.
    pub fn concat(clips: Vec<Clip>) -> FishreelResult<Self> {
        let mut iter = clips.into_iter();
        let mut first = iter.next().ok_or_else(|| {
            FishreelError::validation("concat needs at least one clip")
        })?;

        let dims = first.dimensions();
        for clip in iter {
            if clip.fps != first.fps {
                return Err(FishreelError::validation(format!(
                    "fps mismatch in concat: {} vs {}",
                    clip.fps, first.fps
                )));
            }
            if clip.dimensions() != dims {
                return Err(FishreelError::validation(format!(
                    "dimension mismatch in concat: {:?} vs {:?}",
                    clip.dimensions(),
                    dims
                )));
            }
            first.segments.extend(clip.segments);
        }
        Ok(first)
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.segments[0].image.dimensions()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn total_frames(&self) -> u64 {
        self.segments.iter().map(|s| s.frame_count).sum()
    }

    pub fn duration_secs(&self) -> f64 {
        self.total_frames() as f64 / f64::from(self.fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn still(v: u8) -> RgbaImage {
        RgbaImage::from_pixel(8, 16, Rgba([v, v, v, 255]))
    }

    #[test]
    fn assemble_rounds_to_whole_frames() {
        let clip = Clip::assemble(vec![Frame::new(still(0), 5.0)], 30).unwrap();
        assert_eq!(clip.total_frames(), 150);
        assert_eq!(clip.duration_secs(), 5.0);
    }

    #[test]
    fn concat_preserves_order_and_sums_durations() {
        let a = Clip::assemble(vec![Frame::new(still(1), 5.0)], 30).unwrap();
        let b = Clip::assemble(vec![Frame::new(still(2), 4.0)], 30).unwrap();
        let joined = Clip::concat(vec![a, b]).unwrap();

        assert_eq!(joined.duration_secs(), 9.0);
        assert_eq!(joined.total_frames(), 270);
        assert_eq!(joined.segments().len(), 2);
        assert_eq!(joined.segments()[0].image.get_pixel(0, 0).0[0], 1);
        assert_eq!(joined.segments()[1].image.get_pixel(0, 0).0[0], 2);
    }

    #[test]
    fn assemble_rejects_mixed_dimensions() {
        let other = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        let err = Clip::assemble(
            vec![Frame::new(still(0), 1.0), Frame::new(other, 1.0)],
            30,
        )
        .unwrap_err();
        assert!(err.to_string().contains("size mismatch"));
    }

    #[test]
    fn assemble_rejects_zero_duration() {
        assert!(Clip::assemble(vec![Frame::new(still(0), 0.0)], 30).is_err());
    }

    #[test]
    fn concat_rejects_fps_mismatch() {
        let a = Clip::assemble(vec![Frame::new(still(0), 1.0)], 30).unwrap();
        let b = Clip::assemble(vec![Frame::new(still(0), 1.0)], 24).unwrap();
        assert!(Clip::concat(vec![a, b]).is_err());
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert!(Clip::assemble(vec![], 30).is_err());
        assert!(Clip::concat(vec![]).is_err());
    }
}
