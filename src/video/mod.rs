//! Streaming video decode core
//!
//! A background [`DecodeTask`] decodes a source into a shared [`FrameStore`]
//! while a [`PlaybackReader`] consumes it at the stream's frame rate.
//! [`Session`] ties the two together and owns the decode thread.
//! Media libraries plug in through the traits in [`backend`].

pub mod backend;
mod decode_task;
mod error;
#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod frame;
mod reader;
mod session;
mod store;
pub mod synthetic;

pub use backend::{
    DecoderOptions, Demuxer, MediaBackend, PictureDecoder, Rational, SourceDescriptor, StreamInfo,
};
pub use decode_task::{DecodeState, DecodeSummary, DecodeTask, FALLBACK_FRAME_RATE};
pub use error::{DecodeError, StreamError};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegBackend;
pub use frame::{Frame, FrameSizeError, RGB_BYTES_PER_PIXEL};
pub use reader::{FramePacer, Next, PlaybackReader};
pub use session::{Session, SessionError};
pub use store::{FrameStore, StoreStatus, MAX_RESERVED_FRAMES};
pub use synthetic::{SyntheticBackend, SyntheticClip};
