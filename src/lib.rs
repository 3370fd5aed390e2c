#![forbid(unsafe_code)]

pub mod assets;
pub mod clip;
pub mod compose;
pub mod config;
pub mod encode;
pub mod error;
pub mod quiz;
pub mod text;

pub use clip::{Clip, Frame};
pub use compose::compose;
pub use config::{CaptionStyle, EncodeSettings, RenderConfig, SubjectLayout};
pub use encode::{encode_clip, mux_audio, EncodeConfig};
pub use error::{FishreelError, FishreelResult};
pub use quiz::{FishDb, QuizJob, SegmentKind};
pub use text::{layout, load_font, load_font_with_fallback, FontHandle};
