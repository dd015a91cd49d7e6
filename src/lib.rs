//! avfx
//!
//! Streaming video decode core: a background decode task fills a shared,
//! append-only store of RGB24 frames while a paced reader plays them back,
//! looping once decoding has finished.

pub mod settings;
pub mod telemetry;
pub mod video;

pub use settings::{PlaybackSettings, SettingsError};
pub use video::{
    DecodeError, DecodeState, DecodeSummary, DecoderOptions, Frame, FramePacer, FrameStore, Next,
    PlaybackReader, Session, SessionError, SourceDescriptor,
};
#[cfg(feature = "ffmpeg")]
pub use video::FfmpegBackend;
