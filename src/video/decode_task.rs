//! Background decode task
//!
//! Drives a [`MediaBackend`] through a linear state machine
//! (`Opening → StreamDiscovery → CodecSetup → Decoding → Finished | Failed`)
//! and appends every decoded picture to a shared [`FrameStore`]. The first
//! setup error is terminal. The store is marked done on every exit path, so a
//! reader waiting on it is never left blocked.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::backend::{DecoderOptions, Demuxer, MediaBackend, PictureDecoder, SourceDescriptor, StreamInfo};
use super::{DecodeError, FrameStore};

/// Frame rate assumed when the container does not report a usable one
pub const FALLBACK_FRAME_RATE: f64 = 30.0;

/// Consecutive picture failures after which a drain gives up
const MAX_CONSECUTIVE_PICTURE_FAILURES: usize = 64;

/// Decode task state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Opening,
    StreamDiscovery,
    CodecSetup,
    Decoding,
    /// Input exhausted, every picture appended
    Finished,
    /// Stopped on a terminal error (including cancellation)
    Failed(DecodeError),
}

impl DecodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DecodeState::Finished | DecodeState::Failed(_))
    }
}

impl fmt::Display for DecodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeState::Opening => write!(f, "opening"),
            DecodeState::StreamDiscovery => write!(f, "stream-discovery"),
            DecodeState::CodecSetup => write!(f, "codec-setup"),
            DecodeState::Decoding => write!(f, "decoding"),
            DecodeState::Finished => write!(f, "finished"),
            DecodeState::Failed(e) => write!(f, "failed ({})", e.code()),
        }
    }
}

/// What a decode run did
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeSummary {
    /// Terminal state
    pub state: DecodeState,
    /// Selected video stream, if discovery got that far
    pub stream: Option<StreamInfo>,
    /// Frames appended to the store
    pub frames: usize,
    /// Packets read from the container, all streams
    pub packets: usize,
    /// Packets of other streams that were discarded
    pub discarded_packets: usize,
    /// Video packets the decoder rejected
    pub rejected_packets: usize,
    /// Decoded pictures that could not be received or converted
    pub failed_pictures: usize,
    pub elapsed: Duration,
}

impl DecodeSummary {
    fn new() -> Self {
        Self {
            state: DecodeState::Opening,
            stream: None,
            frames: 0,
            packets: 0,
            discarded_packets: 0,
            rejected_packets: 0,
            failed_pictures: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn error(&self) -> Option<DecodeError> {
        match self.state {
            DecodeState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Marks the store done when dropped. On unwind it records
/// [`DecodeError::Panicked`] first.
struct DoneGuard<'a>(&'a FrameStore);

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!("Decode task panicked; marking frame store done");
            self.0.set_error(DecodeError::Panicked);
        }
        self.0.mark_done();
    }
}

/// One decode run of a source into a frame store
pub struct DecodeTask<B: MediaBackend> {
    backend: B,
    source: SourceDescriptor,
    options: DecoderOptions,
    store: Arc<FrameStore>,
    cancel: Arc<AtomicBool>,
}

impl<B: MediaBackend> DecodeTask<B> {
    pub fn new(backend: B, source: SourceDescriptor, store: Arc<FrameStore>) -> Self {
        Self {
            backend,
            source,
            options: DecoderOptions::default(),
            store,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_options(mut self, options: DecoderOptions) -> Self {
        self.options = options;
        self
    }

    /// Share a cancellation flag; setting it stops the task at the next packet or frame
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    /// Run to a terminal state on the current thread
    pub fn run(self) -> DecodeSummary {
        let _done = DoneGuard(&self.store);
        let started = Instant::now();
        let mut summary = DecodeSummary::new();

        tracing::debug!("Decoding {} with {} backend", self.source, self.backend.name());

        // All backend resources are dropped inside decode(), before the store is marked done
        summary.state = match self.decode(&mut summary) {
            Ok(()) => DecodeState::Finished,
            Err(e) => {
                self.store.set_error(e);
                DecodeState::Failed(e)
            }
        };
        summary.elapsed = started.elapsed();

        match summary.state {
            DecodeState::Failed(DecodeError::Cancelled) => tracing::info!(
                "Decoding of {} cancelled after {} frames",
                self.source,
                summary.frames
            ),
            DecodeState::Failed(e) => tracing::warn!(
                code = e.code(),
                "Decoding of {} failed: {}",
                self.source,
                e
            ),
            _ => tracing::info!(
                "Decoded {} frames from {} in {:.2}s ({} packets, {} discarded, {} rejected)",
                summary.frames,
                self.source,
                summary.elapsed.as_secs_f64(),
                summary.packets,
                summary.discarded_packets,
                summary.rejected_packets
            ),
        }

        summary
    }

    fn enter(&self, summary: &mut DecodeSummary, state: DecodeState) -> Result<(), DecodeError> {
        self.check_cancelled()?;
        tracing::debug!("Decode task: {} -> {}", summary.state, state);
        summary.state = state;
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), DecodeError> {
        if self.cancel.load(Ordering::Acquire) {
            Err(DecodeError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn decode(&self, summary: &mut DecodeSummary) -> Result<(), DecodeError> {
        self.check_cancelled()?;
        let mut demuxer = self.backend.open(&self.source)?;

        self.enter(summary, DecodeState::StreamDiscovery)?;
        let stream = demuxer.video_stream()?;
        let frame_rate = stream.fps().unwrap_or_else(|| {
            tracing::warn!(
                "Stream reports frame rate {}, assuming {} fps",
                stream.frame_rate,
                FALLBACK_FRAME_RATE
            );
            FALLBACK_FRAME_RATE
        });
        self.store.set_frame_rate(frame_rate);
        tracing::info!(
            "Video stream #{}: {}x{} @ {:.3}fps, codec: {}",
            stream.index,
            stream.width,
            stream.height,
            frame_rate,
            stream.codec_name
        );
        summary.stream = Some(stream.clone());

        self.enter(summary, DecodeState::CodecSetup)?;
        let mut decoder = demuxer.open_decoder(&stream, &self.options)?;

        self.enter(summary, DecodeState::Decoding)?;
        loop {
            self.check_cancelled()?;
            let Some((stream_index, packet)) = demuxer.next_packet() else {
                break;
            };
            summary.packets += 1;

            if stream_index != stream.index {
                summary.discarded_packets += 1;
                continue;
            }

            if let Err(e) = decoder.send_packet(&packet) {
                tracing::warn!("Skipping packet {}: {}", summary.packets, e);
                summary.rejected_packets += 1;
                continue;
            }

            self.drain(&mut decoder, summary)?;
        }

        // Flush pictures the decoder is still holding
        if let Err(e) = decoder.send_eof() {
            tracing::warn!("Failed to flush decoder: {}", e);
        }
        self.drain(&mut decoder, summary)
    }

    fn drain<D>(&self, decoder: &mut D, summary: &mut DecodeSummary) -> Result<(), DecodeError>
    where
        D: PictureDecoder,
    {
        let mut failures = 0;
        loop {
            match decoder.receive_frame() {
                Ok(Some(frame)) => {
                    failures = 0;
                    self.store.append(frame);
                    summary.frames += 1;
                    self.check_cancelled()?;
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    // Only this picture is lost; the decoder may hold more
                    tracing::warn!("Error while receiving frame from decoder: {}", e);
                    summary.failed_pictures += 1;
                    failures += 1;
                    if failures >= MAX_CONSECUTIVE_PICTURE_FAILURES {
                        tracing::warn!("Decoder failed {} pictures in a row, moving on", failures);
                        return Ok(());
                    }
                    self.check_cancelled()?;
                }
            }
        }
    }
}
