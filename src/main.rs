//! avfx - headless paced playback
//!
//! Decodes a video file in the background and plays it back at its native
//! frame rate without presenting anything, reporting timing and decode
//! status. Useful for checking that a file decodes and for watching how
//! playback keeps up with a slow decoder.
//!
//! Usage: avfx <PATH> [--test-pattern] [--loops N] [--once] [--threads N]

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;

use avfx::settings::PlaybackSettings;
use avfx::telemetry::{init_logging, LogConfig};
use avfx::video::{
    FramePacer, MediaBackend, Next, Session, SourceDescriptor, SyntheticBackend, SyntheticClip,
};

/// Test pattern clip played with --test-pattern
const TEST_PATTERN_FRAMES: usize = 90;
const TEST_PATTERN_WIDTH: u32 = 320;
const TEST_PATTERN_HEIGHT: u32 = 180;
const TEST_PATTERN_FPS: i32 = 30;

/// Decode a video in the background and play it back at its frame rate
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Video file to play (a virtual name with --test-pattern)
    path: PathBuf,

    /// Play a generated test pattern instead of decoding a file
    #[arg(long)]
    test_pattern: bool,

    /// Number of complete passes to play
    #[arg(long, default_value_t = 1)]
    loops: usize,

    /// Play once without looping, even if looping is enabled in the settings
    #[arg(long)]
    once: bool,

    /// Decoder thread count (overrides the settings file)
    #[arg(long)]
    threads: Option<usize>,

    /// Settings file (default: playback.xml in the config directory)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log JSON instead of compact text
    #[arg(long)]
    json_logs: bool,
}

/// What a playback run showed
#[derive(Debug, Default)]
struct PlaybackReport {
    presented: usize,
    passes: usize,
    stalls: usize,
    late_frames: usize,
    elapsed: Duration,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = match &args.settings {
        Some(path) => PlaybackSettings::load_from_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => PlaybackSettings::load(),
    };
    if let Some(threads) = args.threads {
        settings.decoder_threads = threads;
        settings.clamp();
    }
    if args.once {
        settings.loop_playback = false;
    }

    let mut log_config = LogConfig {
        json_format: args.json_logs,
        default_level: settings.log_level.clone(),
        ..Default::default()
    };
    if let Some(path) = &args.log_file {
        log_config = log_config.with_file(path);
    }
    let _log_guard = init_logging(&log_config)
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to initialize logging")?;

    let source = SourceDescriptor::new(&args.path);

    if args.test_pattern {
        let clip = SyntheticClip::new(
            TEST_PATTERN_FRAMES,
            TEST_PATTERN_WIDTH,
            TEST_PATTERN_HEIGHT,
            TEST_PATTERN_FPS,
        );
        let backend = SyntheticBackend::new().with_clip(&args.path, clip);
        return play(backend, source, &args, &settings);
    }

    play_file(source, &args, &settings)
}

#[cfg(feature = "ffmpeg")]
fn play_file(
    source: SourceDescriptor,
    args: &Args,
    settings: &PlaybackSettings,
) -> anyhow::Result<()> {
    if !args.path.exists() {
        tracing::warn!("File not found: {}", args.path.display());
    }
    play(avfx::video::FfmpegBackend::new(), source, args, settings)
}

#[cfg(not(feature = "ffmpeg"))]
fn play_file(
    _source: SourceDescriptor,
    _args: &Args,
    _settings: &PlaybackSettings,
) -> anyhow::Result<()> {
    bail!("built without the ffmpeg feature; only --test-pattern is available")
}

fn play<B: MediaBackend>(
    backend: B,
    source: SourceDescriptor,
    args: &Args,
    settings: &PlaybackSettings,
) -> anyhow::Result<()> {
    println!("Opening: {} ({} backend)", source, backend.name());

    let mut session = Session::start(backend, source, settings.decoder_options())
        .context("failed to start decoding")?;

    let report = run_playback(&session, args.loops.max(1), settings);

    session.cancel();
    let summary = session.join().context("decode thread failed")?;
    session.log_status();

    if let Some(stream) = &summary.stream {
        println!(
            "Stream: #{} {} {}x{} @ {} ({:.3} fps)",
            stream.index,
            stream.codec_name,
            stream.width,
            stream.height,
            stream.frame_rate,
            session.frame_rate().unwrap_or(0.0)
        );
    }
    println!(
        "Decode: {} - {} frames, {} packets ({} discarded, {} rejected) in {:.2}s",
        summary.state,
        summary.frames,
        summary.packets,
        summary.discarded_packets,
        summary.rejected_packets,
        summary.elapsed.as_secs_f64()
    );
    println!(
        "Playback: {} frames over {} passes in {:.2}s, {} stalls, {} late",
        report.presented,
        report.passes,
        report.elapsed.as_secs_f64(),
        report.stalls,
        report.late_frames
    );

    if let Some(e) = session.error() {
        if session.frame_count() == 0 {
            bail!("decoding failed [{}]: {}", e.code(), e);
        }
    }
    Ok(())
}

fn run_playback(session: &Session, loops: usize, settings: &PlaybackSettings) -> PlaybackReport {
    let started = Instant::now();
    let mut report = PlaybackReport::default();
    let timeout = settings.wait_timeout();
    let store = session.store();

    let mut reader = session.reader().with_looping(settings.loop_playback);

    // Pacing starts once the stream's frame rate is known
    let fps = loop {
        if let Some(fps) = store.wait_for_frame_rate(timeout) {
            break fps;
        }
        if store.is_done() {
            report.elapsed = started.elapsed();
            return report;
        }
    };
    let Some(mut pacer) = FramePacer::from_frame_rate(fps) else {
        report.elapsed = started.elapsed();
        return report;
    };

    loop {
        let status = store.status();
        if status.done && reader.cursor() == status.len && reader.passes() + 1 >= loops {
            break;
        }

        pacer.wait();
        match reader.next_timeout(timeout) {
            Next::Frame(frame) => {
                let now = Instant::now();
                if now > pacer.next_deadline() + pacer.interval() {
                    report.late_frames += 1;
                }
                tracing::debug!(
                    "Frame {} (pass {}): {}x{}, pts {:.3}s",
                    reader.cursor() - 1,
                    reader.passes() + 1,
                    frame.width(),
                    frame.height(),
                    frame.pts()
                );
                report.presented += 1;
                pacer.advance(now);
            }
            Next::NotReady => {
                report.stalls += 1;
                tracing::debug!("Decoder behind at frame {}", reader.cursor());
            }
            Next::Finished => break,
        }
    }

    report.passes = if report.presented > 0 { reader.passes() + 1 } else { 0 };
    report.elapsed = started.elapsed();
    report
}
