//! Decode error taxonomy
//!
//! Every failure of the decode task's setup phase maps onto exactly one
//! [`DecodeError`]. All of them are terminal: once recorded, the task stops
//! producing frames. Per-packet problems during decoding are [`StreamError`]s
//! and are skipped rather than recorded.

use thiserror::Error;

/// Terminal decode failure recorded in the frame store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DecodeError {
    /// The source could not be opened (missing file, unreadable container)
    #[error("failed to open video source")]
    SourceOpenFailed,
    /// The container holds no video stream
    #[error("no video stream found in source")]
    StreamNotFound,
    /// No decoder is available for the stream's codec
    #[error("unsupported video codec")]
    UnsupportedCodec,
    /// The decoder was found but could not be opened
    #[error("failed to open video codec")]
    CodecOpenFailed,
    /// A codec context, scratch buffer or converter could not be allocated
    #[error("failed to allocate decode resources")]
    AllocationFailed,
    /// The session cancelled decoding before the input was exhausted
    #[error("decoding was cancelled")]
    Cancelled,
    /// The decode thread panicked; frames appended before it are kept
    #[error("decode task panicked")]
    Panicked,
}

impl DecodeError {
    /// Short upper-case code, stable across releases, for logs and exit reports
    pub fn code(&self) -> &'static str {
        match self {
            DecodeError::SourceOpenFailed => "FILE_ERROR",
            DecodeError::StreamNotFound => "STREAM_NOT_FOUND",
            DecodeError::UnsupportedCodec => "UNSUPPORTED_CODEC",
            DecodeError::CodecOpenFailed => "CODEC_OPEN_ERROR",
            DecodeError::AllocationFailed => "MALLOC_ERROR",
            DecodeError::Cancelled => "CANCELLED",
            DecodeError::Panicked => "DECODE_PANICKED",
        }
    }
}

/// Non-terminal failure while feeding or draining the decoder
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stream error: {0}")]
pub struct StreamError(pub String);

impl StreamError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
