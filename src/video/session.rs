//! Caller-owned decode session
//!
//! Starts a [`DecodeTask`] on a named background thread and keeps its
//! `JoinHandle`. The frame store is shared with the thread through an `Arc`,
//! and dropping the session cancels and joins the thread, so nothing touches
//! the store from the decode side once the session is gone.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{
    DecodeError, DecodeSummary, DecodeTask, DecoderOptions, Frame, FrameStore, MediaBackend,
    PlaybackReader, SourceDescriptor, StoreStatus,
};

/// Name given to decode threads
const DECODE_THREAD_NAME: &str = "avfx-decode";

/// Errors from managing the decode thread
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to spawn decode thread: {0}")]
    Spawn(#[from] io::Error),
    #[error("decode thread panicked")]
    DecodePanicked,
}

/// A source being decoded in the background
pub struct Session {
    source: SourceDescriptor,
    store: Arc<FrameStore>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<DecodeSummary>>,
    /// Result of the first join
    outcome: Option<Result<DecodeSummary, ()>>,
}

impl Session {
    /// Start decoding `source` on a background thread
    pub fn start<B: MediaBackend>(
        backend: B,
        source: SourceDescriptor,
        options: DecoderOptions,
    ) -> Result<Self, SessionError> {
        let store = Arc::new(FrameStore::with_capacity(options.initial_capacity));
        let task = DecodeTask::new(backend, source.clone(), Arc::clone(&store)).with_options(options);
        let cancel = task.cancel_flag();

        let handle = thread::Builder::new()
            .name(DECODE_THREAD_NAME.to_string())
            .spawn(move || task.run())?;

        tracing::debug!("Started decode session for {}", source);

        Ok(Self {
            source,
            store,
            cancel,
            handle: Some(handle),
            outcome: None,
        })
    }

    /// Decode `source` to completion on the calling thread
    ///
    /// Returns the filled store, or the error that stopped decoding.
    pub fn decode_blocking<B: MediaBackend>(
        backend: B,
        source: SourceDescriptor,
        options: DecoderOptions,
    ) -> Result<Arc<FrameStore>, DecodeError> {
        let store = Arc::new(FrameStore::with_capacity(options.initial_capacity));
        let summary = DecodeTask::new(backend, source, Arc::clone(&store))
            .with_options(options)
            .run();

        match summary.error() {
            Some(e) => Err(e),
            None => Ok(store),
        }
    }

    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    /// A new playback cursor over this session's frames
    pub fn reader(&self) -> PlaybackReader {
        PlaybackReader::new(Arc::clone(&self.store))
    }

    pub fn frame(&self, index: usize) -> Option<Arc<Frame>> {
        self.store.get(index)
    }

    pub fn frame_count(&self) -> usize {
        self.store.len()
    }

    pub fn frame_rate(&self) -> Option<f64> {
        self.store.frame_rate()
    }

    pub fn is_done(&self) -> bool {
        self.store.is_done()
    }

    pub fn error(&self) -> Option<DecodeError> {
        self.store.error()
    }

    pub fn status(&self) -> StoreStatus {
        self.store.status()
    }

    /// Ask the decode thread to stop at the next packet or frame
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Whether the decode thread is still running
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Wait for the decode thread to finish and return what it did
    ///
    /// Can be called more than once; later calls return the same summary.
    pub fn join(&mut self) -> Result<DecodeSummary, SessionError> {
        if let Some(handle) = self.handle.take() {
            let outcome = handle.join().map_err(|_| {
                tracing::error!("Decode thread for {} panicked", self.source);
            });
            self.outcome = Some(outcome);
        }

        match &self.outcome {
            Some(Ok(summary)) => Ok(summary.clone()),
            _ => Err(SessionError::DecodePanicked),
        }
    }

    /// Log the decode outcome; errors are logged at error level
    pub fn log_status(&self) {
        let status = self.store.status();
        match status.error {
            Some(e) => tracing::error!(
                code = e.code(),
                "Decoding {} failed: {} ({} frames decoded)",
                self.source,
                e,
                status.len
            ),
            None if status.done => tracing::info!(
                "Decoded {} frames from {} @ {:.3}fps",
                status.len,
                self.source,
                status.frame_rate.unwrap_or(0.0)
            ),
            None => tracing::info!(
                "Decoding {}: {} frames so far",
                self.source,
                status.len
            ),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Signal thread to stop
        self.cancel();

        // Wait for thread to finish
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Failed to join decode thread for {}", self.source);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::synthetic::{SyntheticBackend, SyntheticClip};
    use crate::video::DecodeState;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn start(clip: SyntheticClip) -> Session {
        let backend = SyntheticBackend::new().with_clip("clip.mp4", clip);
        Session::start(backend, SourceDescriptor::new("clip.mp4"), DecoderOptions::default())
            .unwrap()
    }

    #[test]
    fn test_ten_frames_at_24_fps() {
        let mut session = start(
            SyntheticClip::new(10, 8, 6, 24).with_packet_latency(Duration::from_millis(5)),
        );

        assert_eq!(session.store().wait_for_frame_rate(WAIT), Some(24.0));
        assert!(session.frame(10).is_none());

        let summary = session.join().unwrap();
        assert_eq!(summary.state, DecodeState::Finished);
        assert!(session.is_done());
        assert_eq!(session.frame_rate(), Some(24.0));
        assert_eq!(session.frame_count(), 10);
        assert_eq!(session.error(), None);

        let last = session.frame(9).unwrap();
        assert_eq!((last.width(), last.height()), (8, 6));
        assert_eq!(last.data().len(), 8 * 6 * 3);
        assert!(session.frame(10).is_none());
    }

    #[test]
    fn test_missing_path() {
        let mut session = Session::start(
            SyntheticBackend::new(),
            SourceDescriptor::new("does/not/exist.mp4"),
            DecoderOptions::default(),
        )
        .unwrap();

        let summary = session.join().unwrap();
        assert_eq!(summary.error(), Some(DecodeError::SourceOpenFailed));
        assert_eq!(session.error(), Some(DecodeError::SourceOpenFailed));
        assert_eq!(session.frame_count(), 0);
        assert!(session.is_done());
        session.log_status();
    }

    #[test]
    fn test_no_video_stream() {
        let session = start(SyntheticClip::audio_only(4));

        assert!(session.store().wait_until_done(WAIT));
        assert_eq!(session.error(), Some(DecodeError::StreamNotFound));
        assert_eq!(session.frame_count(), 0);
    }

    #[test]
    fn test_cancel_mid_decode() {
        let mut session = start(
            SyntheticClip::new(500, 2, 2, 30).with_packet_latency(Duration::from_millis(2)),
        );

        assert!(session.store().wait_for_frame(2, WAIT).is_some());
        session.cancel();

        let summary = session.join().unwrap();
        assert_eq!(summary.error(), Some(DecodeError::Cancelled));
        assert_eq!(session.error(), Some(DecodeError::Cancelled));
        assert!(session.is_done());
        assert!(!session.is_running());

        let count = session.frame_count();
        assert!(count >= 3 && count < 500);
        for (i, frame) in session.store().frames().iter().enumerate() {
            assert_eq!(frame.pts(), i as f64 / 30.0);
        }
    }

    #[test]
    fn test_oversized_capacity_starts() {
        let options = DecoderOptions {
            initial_capacity: usize::MAX,
            ..Default::default()
        };
        let backend = SyntheticBackend::new().with_clip("clip.mp4", SyntheticClip::new(3, 2, 2, 25));
        let mut session = Session::start(backend, SourceDescriptor::new("clip.mp4"), options).unwrap();

        assert_eq!(session.join().unwrap().frames, 3);
        assert_eq!(session.frame_count(), 3);
    }

    #[test]
    fn test_decode_thread_panic() {
        let mut session = start(SyntheticClip::new(10, 2, 2, 25).panicking_at(4));

        assert!(matches!(session.join(), Err(SessionError::DecodePanicked)));
        assert!(matches!(session.join(), Err(SessionError::DecodePanicked)));
        assert!(session.is_done());
        assert!(!session.is_running());
        assert_eq!(session.error(), Some(DecodeError::Panicked));
        assert_eq!(session.frame_count(), 4);
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut session = start(SyntheticClip::new(3, 2, 2, 25));
        let first = session.join().unwrap();
        let second = session.join().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.frames, 3);
    }

    #[test]
    fn test_drop_joins_decode_thread() {
        let session = start(
            SyntheticClip::new(1000, 2, 2, 30).with_packet_latency(Duration::from_millis(1)),
        );
        let store = Arc::clone(session.store());

        drop(session);

        // The thread has exited, so the store is final
        assert!(store.is_done());
        assert_eq!(store.error(), Some(DecodeError::Cancelled));
        let len = store.len();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.len(), len);
        assert_eq!(Arc::strong_count(&store), 1);
    }

    #[test]
    fn test_decode_blocking() {
        let backend = SyntheticBackend::new().with_clip("clip.mp4", SyntheticClip::new(4, 2, 2, 12));
        let store = Session::decode_blocking(
            backend.clone(),
            SourceDescriptor::new("clip.mp4"),
            DecoderOptions::default(),
        )
        .unwrap();
        assert!(store.is_done());
        assert_eq!(store.len(), 4);
        assert_eq!(store.frame_rate(), Some(12.0));

        let err = Session::decode_blocking(
            backend,
            SourceDescriptor::new("other.mp4"),
            DecoderOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, DecodeError::SourceOpenFailed);
    }

    #[test]
    fn test_reader_plays_session() {
        let session = start(SyntheticClip::new(5, 2, 2, 50));
        let mut reader = session.reader();

        let mut seen = Vec::new();
        while seen.len() < 7 {
            if let Some(frame) = reader.next_timeout(WAIT).frame() {
                seen.push((frame.pts() * 50.0).round() as usize);
            }
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 0, 1]);
    }
}
