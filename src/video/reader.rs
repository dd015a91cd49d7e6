//! Paced playback over a filling frame store
//!
//! A [`PlaybackReader`] walks a [`FrameStore`] with a cursor while the decode
//! task is still appending. It never blocks the producer: if the next frame
//! isn't decoded yet it reports [`Next::NotReady`] (or waits with a timeout in
//! [`PlaybackReader::next_timeout`]). Once decoding is done and every frame
//! has been shown, the cursor wraps back to the first frame.
//!
//! [`FramePacer`] turns the discovered frame rate into presentation deadlines.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Frame, FrameStore, StoreStatus};

/// Result of asking the reader for the next frame
#[derive(Debug, Clone)]
pub enum Next {
    /// Frame to present
    Frame(Arc<Frame>),
    /// The producer has not caught up yet; retry on the next tick
    NotReady,
    /// Decoding is over and there is nothing (more) to present
    Finished,
}

impl Next {
    pub fn frame(self) -> Option<Arc<Frame>> {
        match self {
            Next::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, Next::NotReady)
    }
}

/// Consumer-side cursor over a shared frame store
#[derive(Debug, Clone)]
pub struct PlaybackReader {
    store: Arc<FrameStore>,
    cursor: usize,
    passes: usize,
    looping: bool,
}

impl PlaybackReader {
    pub fn new(store: Arc<FrameStore>) -> Self {
        Self {
            store,
            cursor: 0,
            passes: 0,
            looping: true,
        }
    }

    /// Enable or disable wrapping to the first frame after a full pass
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Index of the frame the next call will return
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of times the cursor wrapped back to the start
    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    /// Rewind to the first frame
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.passes = 0;
    }

    /// Time between frames, once the frame rate is known and the interval
    /// fits a `Duration`
    pub fn frame_interval(&self) -> Option<Duration> {
        self.store.frame_rate().and_then(interval_for)
    }

    /// Next frame without blocking
    pub fn next(&mut self) -> Next {
        let status = self.store.status();
        self.step(&status)
    }

    /// Next frame, waiting up to `timeout` for the producer to catch up
    pub fn next_timeout(&mut self, timeout: Duration) -> Next {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.store.status();
            let next = self.step(&status);
            if !next.is_not_ready() {
                return next;
            }

            let now = Instant::now();
            if now >= deadline {
                return Next::NotReady;
            }
            if status.frame_rate.is_none() {
                self.store.wait_for_frame_rate(deadline - now);
            } else {
                self.store.wait_for_change(self.cursor, deadline - now);
            }
        }
    }

    fn step(&mut self, status: &StoreStatus) -> Next {
        // Pacing is undefined until the stream's rate is known
        if status.frame_rate.is_none() && !status.done {
            return Next::NotReady;
        }

        if self.cursor < status.len {
            return self.take(self.cursor);
        }

        if !status.done {
            return Next::NotReady;
        }

        if status.len == 0 || !self.looping {
            return Next::Finished;
        }

        self.passes += 1;
        tracing::trace!("Playback wrapped after {} frames (pass {})", status.len, self.passes);
        self.take(0)
    }

    fn take(&mut self, index: usize) -> Next {
        match self.store.get(index) {
            Some(frame) => {
                self.cursor = index + 1;
                Next::Frame(frame)
            }
            None => Next::NotReady,
        }
    }
}

fn interval_for(fps: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(1.0 / fps).ok()
}

/// Presentation deadline scheduler
///
/// Deadlines advance by one frame interval per presented frame. If the
/// consumer falls behind, the next deadline resets to now instead of
/// bursting to catch up.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    next_deadline: Instant,
}

impl FramePacer {
    /// Sleep granularity; the remainder is spun
    const SPIN_MARGIN: Duration = Duration::from_micros(500);

    pub fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            next_deadline: start,
        }
    }

    /// Pacer for `fps`, starting now
    ///
    /// None for non-positive or non-finite rates, and for rates so low that
    /// the interval overflows a `Duration`.
    pub fn from_frame_rate(fps: f64) -> Option<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return None;
        }
        interval_for(fps).map(|interval| Self::new(interval, Instant::now()))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_deadline
    }

    /// Time left until the next deadline
    pub fn time_until_due(&self, now: Instant) -> Duration {
        self.next_deadline.saturating_duration_since(now)
    }

    /// Schedule the next deadline after presenting a frame at `now`
    pub fn advance(&mut self, now: Instant) {
        self.next_deadline += self.interval;

        // If we fell behind, reset to now (don't try to catch up)
        if self.next_deadline < now {
            self.next_deadline = now;
        }
    }

    /// Block until the next deadline
    pub fn wait(&self) {
        let now = Instant::now();
        if now >= self.next_deadline {
            return;
        }
        let sleep_time = self.next_deadline - now;
        if sleep_time > Self::SPIN_MARGIN {
            std::thread::sleep(sleep_time - Self::SPIN_MARGIN);
        }
        while Instant::now() < self.next_deadline {
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::DecodeError;
    use std::thread;

    fn frame(tag: u8) -> Frame {
        Frame::new(vec![tag; 3], 1, 1, tag as f64).unwrap()
    }

    fn tag(next: Next) -> u8 {
        next.frame().expect("expected a frame").data()[0]
    }

    #[test]
    fn test_not_ready_before_frame_rate() {
        let store = Arc::new(FrameStore::new());
        store.append(frame(0));
        let mut reader = PlaybackReader::new(Arc::clone(&store));

        assert!(reader.next().is_not_ready());
        assert_eq!(reader.cursor(), 0);
        assert_eq!(reader.frame_interval(), None);

        store.set_frame_rate(25.0);
        assert_eq!(tag(reader.next()), 0);
        assert_eq!(reader.frame_interval(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_completion_gating() {
        let store = Arc::new(FrameStore::new());
        store.set_frame_rate(24.0);
        let mut reader = PlaybackReader::new(Arc::clone(&store));

        // cursor == len, not done
        assert!(reader.next().is_not_ready());

        store.append(frame(1));
        store.append(frame(2));
        assert_eq!(tag(reader.next()), 1);
        assert_eq!(tag(reader.next()), 2);
        assert!(reader.next().is_not_ready());
        assert_eq!(reader.cursor(), 2);

        store.append(frame(3));
        assert_eq!(tag(reader.next()), 3);
    }

    #[test]
    fn test_loops_after_done() {
        let store = Arc::new(FrameStore::new());
        store.set_frame_rate(24.0);
        for i in 0..3 {
            store.append(frame(i));
        }
        store.mark_done();

        let mut reader = PlaybackReader::new(Arc::clone(&store));
        let tags: Vec<u8> = (0..10).map(|_| tag(reader.next())).collect();
        assert_eq!(tags, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(reader.passes(), 3);
    }

    #[test]
    fn test_never_not_ready_after_first_pass() {
        let store = Arc::new(FrameStore::new());
        store.set_frame_rate(30.0);
        let mut reader = PlaybackReader::new(Arc::clone(&store));

        store.append(frame(0));
        assert_eq!(tag(reader.next()), 0);
        assert!(reader.next().is_not_ready());
        store.append(frame(1));
        store.mark_done();

        for _ in 0..100 {
            assert!(!reader.next().is_not_ready());
        }
    }

    #[test]
    fn test_finished_without_frames() {
        let store = Arc::new(FrameStore::new());
        store.set_error(DecodeError::SourceOpenFailed);
        store.mark_done();

        let mut reader = PlaybackReader::new(store);
        assert!(matches!(reader.next(), Next::Finished));
    }

    #[test]
    fn test_no_looping_finishes() {
        let store = Arc::new(FrameStore::new());
        store.set_frame_rate(24.0);
        store.append(frame(5));
        store.mark_done();

        let mut reader = PlaybackReader::new(store).with_looping(false);
        assert_eq!(tag(reader.next()), 5);
        assert!(matches!(reader.next(), Next::Finished));
        assert_eq!(reader.passes(), 0);

        reader.reset();
        assert_eq!(tag(reader.next()), 5);
    }

    #[test]
    fn test_next_timeout_waits_for_producer() {
        let store = Arc::new(FrameStore::new());
        let producer = Arc::clone(&store);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.set_frame_rate(24.0);
            thread::sleep(Duration::from_millis(20));
            producer.append(frame(9));
        });

        let mut reader = PlaybackReader::new(Arc::clone(&store));
        assert_eq!(tag(reader.next_timeout(Duration::from_secs(5))), 9);
        handle.join().unwrap();
    }

    #[test]
    fn test_next_timeout_expires() {
        let store = Arc::new(FrameStore::new());
        store.set_frame_rate(24.0);
        let mut reader = PlaybackReader::new(store);

        let started = Instant::now();
        assert!(reader.next_timeout(Duration::from_millis(20)).is_not_ready());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_pacer_advances_by_interval() {
        let start = Instant::now();
        let mut pacer = FramePacer::new(Duration::from_millis(40), start);
        assert!(pacer.is_due(start));

        pacer.advance(start);
        assert_eq!(pacer.next_deadline(), start + Duration::from_millis(40));
        assert!(!pacer.is_due(start + Duration::from_millis(39)));
        assert_eq!(
            pacer.time_until_due(start + Duration::from_millis(10)),
            Duration::from_millis(30)
        );
    }

    #[test]
    fn test_pacer_resets_when_behind() {
        let start = Instant::now();
        let mut pacer = FramePacer::new(Duration::from_millis(40), start);
        let late = start + Duration::from_millis(500);

        pacer.advance(late);
        assert_eq!(pacer.next_deadline(), late);
    }

    #[test]
    fn test_tiny_frame_rate_has_no_interval() {
        let store = Arc::new(FrameStore::new());
        store.set_frame_rate(1e-30);
        store.append(frame(4));
        let mut reader = PlaybackReader::new(store);

        assert_eq!(reader.frame_interval(), None);
        assert_eq!(tag(reader.next()), 4);
    }

    #[test]
    fn test_pacer_rejects_bad_rate() {
        assert!(FramePacer::from_frame_rate(0.0).is_none());
        assert!(FramePacer::from_frame_rate(f64::INFINITY).is_none());
        assert!(FramePacer::from_frame_rate(1e-30).is_none());
        let pacer = FramePacer::from_frame_rate(50.0).unwrap();
        assert_eq!(pacer.interval(), Duration::from_millis(20));
    }
}
