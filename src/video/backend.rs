//! Media library abstraction
//!
//! The decode task drives a media library through three small traits: a
//! [`MediaBackend`] opens a source into a [`Demuxer`], the demuxer reports the
//! video stream, hands out compressed packets and builds a
//! [`PictureDecoder`], and the decoder turns packets into RGB24 [`Frame`]s.
//!
//! The backend value is moved onto the decode thread and the source is opened
//! there, so demuxers and decoders never cross threads.

use std::fmt;
use std::path::{Path, PathBuf};

use super::{DecodeError, Frame, StreamError};

/// Default decoder thread count
pub const DEFAULT_DECODER_THREADS: usize = 6;

/// Default number of frame slots reserved up front
pub const DEFAULT_INITIAL_CAPACITY: usize = 1024;

/// Identifies the media to decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    path: PathBuf,
}

impl SourceDescriptor {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// A rational number as reported by container metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Floating point value, or None when the denominator is zero
    pub fn to_f64(self) -> Option<f64> {
        if self.den == 0 {
            None
        } else {
            Some(self.num as f64 / self.den as f64)
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Metadata of the selected video stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Index of the stream inside the container
    pub index: usize,
    /// Nominal frame rate
    pub frame_rate: Rational,
    /// Time base used by packet and picture timestamps
    pub time_base: Rational,
    pub width: u32,
    pub height: u32,
    pub codec_name: String,
}

impl StreamInfo {
    /// Nominal frame rate in frames per second, if the container reports a usable one
    pub fn fps(&self) -> Option<f64> {
        self.frame_rate.to_f64().filter(|fps| fps.is_finite() && *fps > 0.0)
    }
}

/// Decoder configuration applied during codec setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Number of decoder threads (0 lets the library decide)
    pub thread_count: usize,
    /// Use frame threading instead of slice threading
    pub frame_threading: bool,
    /// Frame slots reserved in the store before decoding starts
    pub initial_capacity: usize,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            thread_count: DEFAULT_DECODER_THREADS,
            frame_threading: true,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }
}

/// Entry point into a media library
pub trait MediaBackend: Send + 'static {
    type Demuxer: Demuxer;

    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Open the source and probe its container
    ///
    /// Fails with [`DecodeError::SourceOpenFailed`].
    fn open(&self, source: &SourceDescriptor) -> Result<Self::Demuxer, DecodeError>;
}

/// An opened container yielding compressed packets
pub trait Demuxer {
    type Packet;
    type Decoder: PictureDecoder<Packet = Self::Packet>;

    /// Locate the first video stream
    ///
    /// Fails with [`DecodeError::StreamNotFound`].
    fn video_stream(&mut self) -> Result<StreamInfo, DecodeError>;

    /// Resolve, configure and open a decoder for `stream`, including its RGB converter
    ///
    /// Fails with [`DecodeError::UnsupportedCodec`], [`DecodeError::CodecOpenFailed`]
    /// or [`DecodeError::AllocationFailed`].
    fn open_decoder(
        &mut self,
        stream: &StreamInfo,
        options: &DecoderOptions,
    ) -> Result<Self::Decoder, DecodeError>;

    /// Next compressed packet with the index of the stream it belongs to,
    /// or None once the input is exhausted
    fn next_packet(&mut self) -> Option<(usize, Self::Packet)>;
}

/// A codec instance turning packets into RGB24 frames
pub trait PictureDecoder {
    type Packet;

    /// Feed one compressed packet
    fn send_packet(&mut self, packet: &Self::Packet) -> Result<(), StreamError>;

    /// Signal end of input so buffered pictures get flushed
    fn send_eof(&mut self) -> Result<(), StreamError>;

    /// Next decoded picture converted to RGB24, or None when the decoder needs
    /// more input (or is fully drained after EOF)
    fn receive_frame(&mut self) -> Result<Option<Frame>, StreamError>;
}
