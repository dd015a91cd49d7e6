//! FFmpeg media backend
//!
//! Decodes through the `ffmpeg-next` crate: `format::input` for demuxing,
//! a software video decoder built from the stream parameters, and a swscale
//! context converting every picture to packed RGB24.

use ffmpeg_next as ffmpeg;

use super::backend::{
    DecoderOptions, Demuxer, MediaBackend, PictureDecoder, Rational, SourceDescriptor, StreamInfo,
};
use super::{DecodeError, Frame, StreamError};

/// Media backend backed by the system FFmpeg libraries
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for FfmpegBackend {
    type Demuxer = FfmpegDemuxer;

    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn open(&self, source: &SourceDescriptor) -> Result<FfmpegDemuxer, DecodeError> {
        // Initialize FFmpeg (safe to call multiple times)
        ffmpeg::init().map_err(|e| {
            tracing::error!("FFmpeg initialization failed: {}", e);
            DecodeError::SourceOpenFailed
        })?;

        // Opens the container and probes stream info in one step
        let input = ffmpeg::format::input(source.path()).map_err(|e| {
            tracing::warn!("Failed to open {}: {}", source, e);
            DecodeError::SourceOpenFailed
        })?;

        #[cfg(debug_assertions)]
        {
            let url = source.to_string();
            ffmpeg::format::context::input::dump(&input, 0, Some(&url));
        }

        Ok(FfmpegDemuxer { input })
    }
}

/// Opened FFmpeg input context
pub struct FfmpegDemuxer {
    input: ffmpeg::format::context::Input,
}

fn rational(value: ffmpeg::Rational) -> Rational {
    Rational::new(value.numerator(), value.denominator())
}

impl Demuxer for FfmpegDemuxer {
    type Packet = ffmpeg::Packet;
    type Decoder = FfmpegDecoder;

    fn video_stream(&mut self) -> Result<StreamInfo, DecodeError> {
        let stream = self
            .input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or(DecodeError::StreamNotFound)?;

        // Prefer the real base frame rate, fall back to the average
        let mut frame_rate = rational(stream.rate());
        if frame_rate.num <= 0 || frame_rate.den <= 0 {
            frame_rate = rational(stream.avg_frame_rate());
        }

        let parameters = stream.parameters();
        let codec_id = parameters.id();
        let codec_name = ffmpeg::decoder::find(codec_id)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| format!("{:?}", codec_id).to_lowercase());

        let (width, height) = unsafe {
            let params = parameters.as_ptr();
            ((*params).width.max(0) as u32, (*params).height.max(0) as u32)
        };

        Ok(StreamInfo {
            index: stream.index(),
            frame_rate,
            time_base: rational(stream.time_base()),
            width,
            height,
            codec_name,
        })
    }

    fn open_decoder(
        &mut self,
        stream: &StreamInfo,
        options: &DecoderOptions,
    ) -> Result<FfmpegDecoder, DecodeError> {
        let video_stream = self
            .input
            .stream(stream.index)
            .ok_or(DecodeError::StreamNotFound)?;
        let parameters = video_stream.parameters();

        if ffmpeg::decoder::find(parameters.id()).is_none() {
            tracing::warn!("No decoder available for codec {}", stream.codec_name);
            return Err(DecodeError::UnsupportedCodec);
        }

        let mut context = ffmpeg::codec::context::Context::from_parameters(parameters).map_err(|e| {
            tracing::warn!("Failed to create codec context: {}", e);
            DecodeError::AllocationFailed
        })?;

        if options.thread_count != 1 {
            context.set_threading(ffmpeg::codec::threading::Config {
                kind: if options.frame_threading {
                    ffmpeg::codec::threading::Type::Frame
                } else {
                    ffmpeg::codec::threading::Type::Slice
                },
                count: options.thread_count,
                ..Default::default()
            });
        }

        let decoder = context.decoder().video().map_err(|e| match e {
            ffmpeg::Error::DecoderNotFound => DecodeError::UnsupportedCodec,
            e => {
                tracing::warn!("Failed to open {} decoder: {}", stream.codec_name, e);
                DecodeError::CodecOpenFailed
            }
        })?;

        let width = decoder.width();
        let height = decoder.height();

        let scaler = rgb_scaler(decoder.format(), width, height, width, height).map_err(|e| {
            tracing::warn!("Failed to create RGB scaler: {}", e);
            DecodeError::AllocationFailed
        })?;

        tracing::info!(
            "Opened decoder: {}x{} @ {}, codec: {}, threads: {}",
            width,
            height,
            stream.frame_rate,
            stream.codec_name,
            options.thread_count
        );

        Ok(FfmpegDecoder {
            decoder,
            scaler,
            width,
            height,
            time_base: stream.time_base.to_f64().unwrap_or(0.0),
            frame_rate: stream.fps().unwrap_or(0.0),
            frame_index: 0,
        })
    }

    fn next_packet(&mut self) -> Option<(usize, ffmpeg::Packet)> {
        self.input
            .packets()
            .next()
            .map(|(stream, packet)| (stream.index(), packet))
    }
}

fn rgb_scaler(
    format: ffmpeg::format::Pixel,
    src_width: u32,
    src_height: u32,
    width: u32,
    height: u32,
) -> Result<ffmpeg::software::scaling::Context, ffmpeg::Error> {
    ffmpeg::software::scaling::Context::get(
        format,
        src_width,
        src_height,
        ffmpeg::format::Pixel::RGB24,
        width,
        height,
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
}

/// FFmpeg video decoder with its RGB24 converter
pub struct FfmpegDecoder {
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    /// Output width, fixed at codec setup
    width: u32,
    /// Output height, fixed at codec setup
    height: u32,
    /// Seconds per timestamp tick
    time_base: f64,
    frame_rate: f64,
    frame_index: u64,
}

impl FfmpegDecoder {
    fn stream_error(e: ffmpeg::Error) -> StreamError {
        StreamError::new(e.to_string())
    }

    fn pts_seconds(&self, picture: &ffmpeg::frame::Video) -> f64 {
        match picture.timestamp().or_else(|| picture.pts()) {
            Some(ts) if self.time_base > 0.0 => ts as f64 * self.time_base,
            _ if self.frame_rate > 0.0 => self.frame_index as f64 / self.frame_rate,
            _ => 0.0,
        }
    }
}

impl PictureDecoder for FfmpegDecoder {
    type Packet = ffmpeg::Packet;

    fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<(), StreamError> {
        self.decoder.send_packet(packet).map_err(Self::stream_error)
    }

    fn send_eof(&mut self) -> Result<(), StreamError> {
        self.decoder.send_eof().map_err(Self::stream_error)
    }

    fn receive_frame(&mut self) -> Result<Option<Frame>, StreamError> {
        let mut decoded = ffmpeg::frame::Video::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => {}
            Err(ffmpeg::Error::Other {
                errno: ffmpeg::error::EAGAIN,
            })
            | Err(ffmpeg::Error::Eof) => return Ok(None),
            Err(e) => return Err(Self::stream_error(e)),
        }

        // Recreate scaler if the picture format or size changed mid-stream
        let input = self.scaler.input();
        if decoded.format() != input.format
            || decoded.width() != input.width
            || decoded.height() != input.height
        {
            tracing::debug!(
                "Picture changed to {:?} {}x{}, rebuilding scaler",
                decoded.format(),
                decoded.width(),
                decoded.height()
            );
            self.scaler = rgb_scaler(
                decoded.format(),
                decoded.width(),
                decoded.height(),
                self.width,
                self.height,
            )
            .map_err(Self::stream_error)?;
        }

        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb)
            .map_err(Self::stream_error)?;

        let pts = self.pts_seconds(&decoded);

        // Copy out of the scaler's buffer; it gets reused for the next picture
        let frame = Frame::from_strided(rgb.data(0), rgb.stride(0), self.width, self.height, pts)
            .map_err(|e| StreamError::new(e.to_string()))?;
        self.frame_index += 1;

        Ok(Some(frame))
    }
}
