//! In-memory test pattern source
//!
//! [`SyntheticBackend`] serves generated clips registered under virtual paths.
//! A clip describes its frame count, size and frame rate, and can mimic the
//! awkward parts of real containers: interleaved audio packets, decoders
//! that buffer pictures before emitting them, slow packets, packets or
//! pictures the decoder fails on, and failures at any setup stage. A clip
//! can also make the demuxer panic mid-stream.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::backend::{
    DecoderOptions, Demuxer, MediaBackend, PictureDecoder, Rational, SourceDescriptor, StreamInfo,
};
use super::{DecodeError, Frame, FrameSizeError, StreamError};

/// Stream index of the generated video stream
pub const VIDEO_STREAM_INDEX: usize = 0;
/// Stream index of the interleaved audio packets
pub const AUDIO_STREAM_INDEX: usize = 1;

/// Description of a generated clip
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticClip {
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    /// Whether the container has a video stream at all
    pub has_video: bool,
    /// Emit one audio packet after every N video packets (0 = none)
    pub audio_every: usize,
    /// Pictures the decoder holds back before emitting, flushed at EOF
    pub decoder_delay: usize,
    /// Sleep before handing out each video packet
    pub packet_latency: Duration,
    /// Video packet numbers the decoder rejects
    pub corrupt_packets: HashSet<usize>,
    /// Picture numbers the decoder fails to output
    pub corrupt_pictures: HashSet<usize>,
    /// Video packet number at which the demuxer panics
    pub panic_at_packet: Option<usize>,
    /// Setup failure to report at the stage that produces it
    pub fail_with: Option<DecodeError>,
}

impl SyntheticClip {
    pub fn new(frame_count: usize, width: u32, height: u32, fps: i32) -> Self {
        Self {
            frame_count,
            width,
            height,
            frame_rate: Rational::new(fps, 1),
            has_video: true,
            audio_every: 0,
            decoder_delay: 0,
            packet_latency: Duration::ZERO,
            corrupt_packets: HashSet::new(),
            corrupt_pictures: HashSet::new(),
            panic_at_packet: None,
            fail_with: None,
        }
    }

    /// A container with only an audio stream
    pub fn audio_only(packet_count: usize) -> Self {
        Self {
            has_video: false,
            audio_every: 1,
            ..Self::new(packet_count, 0, 0, 0)
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: Rational) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_audio_every(mut self, every: usize) -> Self {
        self.audio_every = every;
        self
    }

    pub fn with_decoder_delay(mut self, delay: usize) -> Self {
        self.decoder_delay = delay;
        self
    }

    pub fn with_packet_latency(mut self, latency: Duration) -> Self {
        self.packet_latency = latency;
        self
    }

    pub fn with_corrupt_packet(mut self, packet: usize) -> Self {
        self.corrupt_packets.insert(packet);
        self
    }

    pub fn with_corrupt_picture(mut self, picture: usize) -> Self {
        self.corrupt_pictures.insert(picture);
        self
    }

    pub fn panicking_at(mut self, packet: usize) -> Self {
        self.panic_at_packet = Some(packet);
        self
    }

    pub fn failing_with(mut self, error: DecodeError) -> Self {
        self.fail_with = Some(error);
        self
    }

    fn fps(&self) -> f64 {
        self.frame_rate.to_f64().filter(|fps| *fps > 0.0).unwrap_or(1.0)
    }
}

/// Render frame `index` of a moving gradient test pattern
///
/// Red ramps left to right, green top to bottom, blue steps with the frame
/// index so consecutive frames differ.
pub fn test_pattern_frame(
    index: usize,
    width: u32,
    height: u32,
    fps: f64,
) -> Result<Frame, FrameSizeError> {
    let mut data = Vec::with_capacity(Frame::expected_size(width, height));
    let blue = (index.wrapping_mul(8) % 256) as u8;
    for y in 0..height {
        let green = if height > 1 { (y * 255 / (height - 1)) as u8 } else { 0 };
        for x in 0..width {
            let red = if width > 1 { (x * 255 / (width - 1)) as u8 } else { 0 };
            data.extend_from_slice(&[red, green, blue]);
        }
    }
    let pts = if fps > 0.0 { index as f64 / fps } else { 0.0 };
    Frame::new(data, width, height, pts)
}

/// Media backend serving [`SyntheticClip`]s from virtual paths
#[derive(Debug, Clone, Default)]
pub struct SyntheticBackend {
    clips: Arc<HashMap<PathBuf, SyntheticClip>>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `clip` under `path`
    pub fn with_clip<P: AsRef<Path>>(mut self, path: P, clip: SyntheticClip) -> Self {
        Arc::make_mut(&mut self.clips).insert(path.as_ref().to_path_buf(), clip);
        self
    }

    pub fn clip<P: AsRef<Path>>(&self, path: P) -> Option<&SyntheticClip> {
        self.clips.get(path.as_ref())
    }
}

impl MediaBackend for SyntheticBackend {
    type Demuxer = SyntheticDemuxer;

    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&self, source: &SourceDescriptor) -> Result<SyntheticDemuxer, DecodeError> {
        let clip = self
            .clips
            .get(source.path())
            .ok_or(DecodeError::SourceOpenFailed)?;
        if clip.fail_with == Some(DecodeError::SourceOpenFailed) {
            return Err(DecodeError::SourceOpenFailed);
        }
        Ok(SyntheticDemuxer {
            clip: clip.clone(),
            next_video: 0,
            audio_pending: false,
        })
    }
}

/// Compressed packet of a synthetic clip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticPacket {
    /// Number of the video packet this belongs to (or follows, for audio)
    pub sequence: usize,
}

/// Packet source of an opened synthetic clip
#[derive(Debug)]
pub struct SyntheticDemuxer {
    clip: SyntheticClip,
    next_video: usize,
    audio_pending: bool,
}

impl Demuxer for SyntheticDemuxer {
    type Packet = SyntheticPacket;
    type Decoder = SyntheticDecoder;

    fn video_stream(&mut self) -> Result<StreamInfo, DecodeError> {
        if !self.clip.has_video || self.clip.fail_with == Some(DecodeError::StreamNotFound) {
            return Err(DecodeError::StreamNotFound);
        }
        Ok(StreamInfo {
            index: VIDEO_STREAM_INDEX,
            frame_rate: self.clip.frame_rate,
            time_base: Rational::new(self.clip.frame_rate.den, self.clip.frame_rate.num),
            width: self.clip.width,
            height: self.clip.height,
            codec_name: "testsrc".to_string(),
        })
    }

    fn open_decoder(
        &mut self,
        _stream: &StreamInfo,
        _options: &DecoderOptions,
    ) -> Result<SyntheticDecoder, DecodeError> {
        match self.clip.fail_with {
            Some(
                error @ (DecodeError::UnsupportedCodec
                | DecodeError::CodecOpenFailed
                | DecodeError::AllocationFailed),
            ) => Err(error),
            _ => Ok(SyntheticDecoder {
                width: self.clip.width,
                height: self.clip.height,
                fps: self.clip.fps(),
                delay: self.clip.decoder_delay,
                corrupt: self.clip.corrupt_packets.clone(),
                corrupt_pictures: self.clip.corrupt_pictures.clone(),
                buffered: VecDeque::new(),
                eof: false,
            }),
        }
    }

    fn next_packet(&mut self) -> Option<(usize, SyntheticPacket)> {
        if self.audio_pending || (!self.clip.has_video && self.next_video < self.clip.frame_count) {
            self.audio_pending = false;
            let sequence = self.next_video;
            if !self.clip.has_video {
                self.next_video += 1;
            }
            return Some((AUDIO_STREAM_INDEX, SyntheticPacket { sequence }));
        }

        if self.next_video >= self.clip.frame_count {
            return None;
        }

        let sequence = self.next_video;
        self.next_video += 1;

        if self.clip.panic_at_packet == Some(sequence) {
            panic!("synthetic demuxer panicked at packet {}", sequence);
        }

        if !self.clip.packet_latency.is_zero() {
            thread::sleep(self.clip.packet_latency);
        }
        if self.clip.audio_every > 0 && (sequence + 1) % self.clip.audio_every == 0 {
            self.audio_pending = true;
        }

        Some((VIDEO_STREAM_INDEX, SyntheticPacket { sequence }))
    }
}

/// Decoder of synthetic packets into test pattern frames
#[derive(Debug)]
pub struct SyntheticDecoder {
    width: u32,
    height: u32,
    fps: f64,
    delay: usize,
    corrupt: HashSet<usize>,
    corrupt_pictures: HashSet<usize>,
    buffered: VecDeque<usize>,
    eof: bool,
}

impl PictureDecoder for SyntheticDecoder {
    type Packet = SyntheticPacket;

    fn send_packet(&mut self, packet: &SyntheticPacket) -> Result<(), StreamError> {
        if self.eof {
            return Err(StreamError::new("packet sent after end of stream"));
        }
        if self.corrupt.contains(&packet.sequence) {
            return Err(StreamError::new(format!(
                "invalid data in packet {}",
                packet.sequence
            )));
        }
        self.buffered.push_back(packet.sequence);
        Ok(())
    }

    fn send_eof(&mut self) -> Result<(), StreamError> {
        self.eof = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<Frame>, StreamError> {
        if !self.eof && self.buffered.len() <= self.delay {
            return Ok(None);
        }
        let Some(index) = self.buffered.pop_front() else {
            return Ok(None);
        };
        if self.corrupt_pictures.contains(&index) {
            return Err(StreamError::new(format!("failed to convert picture {}", index)));
        }
        test_pattern_frame(index, self.width, self.height, self.fps)
            .map(Some)
            .map_err(|e| StreamError::new(e.to_string()))
    }
}
