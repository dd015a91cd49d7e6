//! Append-only frame store shared between the decode thread and readers
//!
//! The store holds every frame decoded so far together with the decode
//! status (completion flag, discovered frame rate, terminal error). All of it
//! lives behind one mutex, so a reader never sees an append half done, and
//! one condition variable wakes blocked readers on every change.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{DecodeError, Frame};

/// Upper bound on the number of frame slots reserved up front
pub const MAX_RESERVED_FRAMES: usize = 65_536;

/// Consistent snapshot of the store's aggregate state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreStatus {
    /// Number of fully appended frames
    pub len: usize,
    /// Whether the decode task reached a terminal state
    pub done: bool,
    /// Frame rate discovered from the video stream
    pub frame_rate: Option<f64>,
    /// Terminal error, if decoding failed
    pub error: Option<DecodeError>,
}

#[derive(Debug, Default)]
struct StoreState {
    frames: Vec<Arc<Frame>>,
    done: bool,
    frame_rate: Option<f64>,
    error: Option<DecodeError>,
}

impl StoreState {
    fn status(&self) -> StoreStatus {
        StoreStatus {
            len: self.frames.len(),
            done: self.done,
            frame_rate: self.frame_rate,
            error: self.error,
        }
    }
}

/// Thread-safe, append-only sequence of decoded frames
#[derive(Debug, Default)]
pub struct FrameStore {
    state: Mutex<StoreState>,
    changed: Condvar,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with room reserved for `capacity` frames
    ///
    /// The reservation is capped at [`MAX_RESERVED_FRAMES`]; the store still
    /// grows past it as frames arrive.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_RESERVED_FRAMES);
        Self {
            state: Mutex::new(StoreState {
                frames: Vec::with_capacity(capacity),
                ..StoreState::default()
            }),
            changed: Condvar::new(),
        }
    }

    // Every mutation is a single push or field write, so a panic while the
    // lock is held can't leave the state torn.
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a frame at the end of the sequence and wake waiting readers
    pub fn append(&self, frame: Frame) {
        let frame = Arc::new(frame);
        {
            let mut state = self.lock();
            state.frames.push(frame);
        }
        self.changed.notify_all();
    }

    /// Frame at `index`, or None if it has not been decoded (yet)
    pub fn get(&self, index: usize) -> Option<Arc<Frame>> {
        self.lock().frames.get(index).cloned()
    }

    /// Number of frames appended so far
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark decoding as finished. Calling it again has no further effect.
    pub fn mark_done(&self) {
        {
            let mut state = self.lock();
            if state.done {
                return;
            }
            state.done = true;
        }
        self.changed.notify_all();
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Record a terminal error. Only the first error is kept.
    ///
    /// Returns true if this call recorded the error.
    pub fn set_error(&self, error: DecodeError) -> bool {
        {
            let mut state = self.lock();
            if state.error.is_some() {
                return false;
            }
            state.error = Some(error);
        }
        self.changed.notify_all();
        true
    }

    pub fn error(&self) -> Option<DecodeError> {
        self.lock().error
    }

    /// Publish the stream's frame rate. Non-finite or non-positive rates are ignored.
    pub fn set_frame_rate(&self, frame_rate: f64) {
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            tracing::warn!(frame_rate, "Ignoring invalid frame rate");
            return;
        }
        {
            let mut state = self.lock();
            state.frame_rate = Some(frame_rate);
        }
        self.changed.notify_all();
    }

    pub fn frame_rate(&self) -> Option<f64> {
        self.lock().frame_rate
    }

    /// Length, completion, frame rate and error read under a single lock
    pub fn status(&self) -> StoreStatus {
        self.lock().status()
    }

    /// Snapshot of every frame decoded so far
    pub fn frames(&self) -> Vec<Arc<Frame>> {
        self.lock().frames.clone()
    }

    /// Block until frame `index` exists, decoding finishes, or `timeout` elapses
    pub fn wait_for_frame(&self, index: usize, timeout: Duration) -> Option<Arc<Frame>> {
        let state = self.wait_while(timeout, |s| index >= s.frames.len() && !s.done);
        state.frames.get(index).cloned()
    }

    /// Block until the frame rate is known, decoding finishes, or `timeout` elapses
    pub fn wait_for_frame_rate(&self, timeout: Duration) -> Option<f64> {
        self.wait_while(timeout, |s| s.frame_rate.is_none() && !s.done)
            .frame_rate
    }

    /// Block until decoding finishes or `timeout` elapses. Returns the done flag.
    pub fn wait_until_done(&self, timeout: Duration) -> bool {
        self.wait_while(timeout, |s| !s.done).done
    }

    /// Block until the store holds more than `seen` frames or is done.
    /// Returns the status observed on wake-up.
    pub fn wait_for_change(&self, seen: usize, timeout: Duration) -> StoreStatus {
        self.wait_while(timeout, |s| s.frames.len() <= seen && !s.done)
            .status()
    }

    fn wait_while<F>(&self, timeout: Duration, mut condition: F) -> MutexGuard<'_, StoreState>
    where
        F: FnMut(&StoreState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while condition(&state) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            state = match self.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn test_frame(tag: u8, width: u32, height: u32) -> Frame {
        let data = vec![tag; Frame::expected_size(width, height)];
        Frame::new(data, width, height, tag as f64).unwrap()
    }

    #[test]
    fn test_oversized_capacity_is_capped() {
        let store = FrameStore::with_capacity(usize::MAX);
        store.append(test_frame(1, 1, 1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = FrameStore::new();
        let status = store.status();
        assert_eq!(status.len, 0);
        assert!(!status.done);
        assert_eq!(status.frame_rate, None);
        assert_eq!(status.error, None);
        assert!(store.get(0).is_none());
    }

    #[test]
    fn test_append_and_get() {
        let store = FrameStore::with_capacity(4);
        store.append(test_frame(1, 2, 2));
        store.append(test_frame(2, 2, 2));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(0).unwrap().data()[0], 1);
        assert_eq!(store.get(1).unwrap().data()[0], 2);
        assert!(store.get(2).is_none());
        assert_eq!(store.frames().len(), 2);
    }

    #[test]
    fn test_mark_done_is_idempotent() {
        let store = FrameStore::new();
        store.mark_done();
        store.mark_done();
        assert!(store.is_done());
    }

    #[test]
    fn test_first_error_wins() {
        let store = FrameStore::new();
        assert!(store.set_error(DecodeError::CodecOpenFailed));
        assert!(!store.set_error(DecodeError::AllocationFailed));
        assert_eq!(store.error(), Some(DecodeError::CodecOpenFailed));
    }

    #[test]
    fn test_invalid_frame_rate_ignored() {
        let store = FrameStore::new();
        store.set_frame_rate(f64::NAN);
        store.set_frame_rate(0.0);
        assert_eq!(store.frame_rate(), None);
        store.set_frame_rate(29.97);
        assert_eq!(store.frame_rate(), Some(29.97));
    }

    #[test]
    fn test_append_order_with_concurrent_reader() {
        const COUNT: usize = 500;
        let store = Arc::new(FrameStore::new());

        let reader_store = Arc::clone(&store);
        let reader = thread::spawn(move || {
            let mut last_len = 0;
            loop {
                let status = reader_store.status();
                assert!(status.len >= last_len, "length went backwards");
                last_len = status.len;
                for i in 0..status.len {
                    let frame = reader_store.get(i).expect("index below len must be present");
                    assert!(frame.is_valid());
                    assert_eq!(frame.pts(), (i % 256) as f64);
                }
                if status.done {
                    return status.len;
                }
            }
        });

        for i in 0..COUNT {
            store.append(test_frame((i % 256) as u8, 4, 3));
        }
        store.mark_done();

        assert_eq!(reader.join().unwrap(), COUNT);
        for i in 0..COUNT {
            assert_eq!(store.get(i).unwrap().data()[0], (i % 256) as u8);
        }
    }

    #[test]
    fn test_wait_for_frame_wakes_on_append() {
        let store = Arc::new(FrameStore::new());
        let producer = Arc::clone(&store);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.append(test_frame(7, 1, 1));
        });

        let frame = store.wait_for_frame(0, Duration::from_secs(5));
        assert_eq!(frame.unwrap().data(), &[7, 7, 7]);
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_for_frame_wakes_on_done() {
        let store = Arc::new(FrameStore::new());
        let producer = Arc::clone(&store);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.set_error(DecodeError::StreamNotFound);
            producer.mark_done();
        });

        let started = Instant::now();
        assert!(store.wait_for_frame(0, Duration::from_secs(5)).is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(store.is_done());
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_times_out() {
        let store = FrameStore::new();
        let started = Instant::now();
        assert!(store.wait_for_frame(0, Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(store.wait_for_frame_rate(Duration::from_millis(1)), None);
        assert!(!store.wait_until_done(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_for_change() {
        let store = FrameStore::new();
        store.append(test_frame(0, 1, 1));
        let status = store.wait_for_change(0, Duration::from_millis(1));
        assert_eq!(status.len, 1);
        store.mark_done();
        let status = store.wait_for_change(1, Duration::from_secs(5));
        assert!(status.done);
    }
}
