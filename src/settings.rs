//! Playback settings
//!
//! Handles loading/saving of the XML playback settings file in the user's
//! config directory.

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::video::{DecoderOptions, MAX_RESERVED_FRAMES};

/// Decoder and playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "AvfxPlayback")]
pub struct PlaybackSettings {
    /// Decoder thread count (1-64)
    #[serde(rename = "decoderThreads", default = "default_decoder_threads")]
    pub decoder_threads: usize,

    /// Frame threading when true, slice threading otherwise
    #[serde(rename = "frameThreading", default = "default_true")]
    pub frame_threading: bool,

    /// Frame slots reserved before decoding starts (1-65536)
    #[serde(rename = "initialCapacity", default = "default_initial_capacity")]
    pub initial_capacity: usize,

    /// Wrap to the first frame once every frame was shown
    #[serde(rename = "loopPlayback", default = "default_true")]
    pub loop_playback: bool,

    /// Timeout for blocking frame reads in milliseconds (1-10000)
    #[serde(rename = "waitTimeoutMs", default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Default log filter when no environment override is set
    #[serde(rename = "logLevel", default = "default_log_level")]
    pub log_level: String,
}

fn default_decoder_threads() -> usize {
    crate::video::backend::DEFAULT_DECODER_THREADS
}

fn default_true() -> bool {
    true
}

fn default_initial_capacity() -> usize {
    crate::video::backend::DEFAULT_INITIAL_CAPACITY
}

fn default_wait_timeout_ms() -> u64 {
    250
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            decoder_threads: default_decoder_threads(),
            frame_threading: true,
            initial_capacity: default_initial_capacity(),
            loop_playback: true,
            wait_timeout_ms: default_wait_timeout_ms(),
            log_level: default_log_level(),
        }
    }
}

impl PlaybackSettings {
    /// Clamp numeric fields to their valid ranges
    pub fn clamp(&mut self) {
        self.decoder_threads = self.decoder_threads.clamp(1, 64);
        self.initial_capacity = self.initial_capacity.clamp(1, MAX_RESERVED_FRAMES);
        self.wait_timeout_ms = self.wait_timeout_ms.clamp(1, 10_000);
    }

    /// Timeout for blocking frame reads
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Decoder configuration derived from these settings
    pub fn decoder_options(&self) -> DecoderOptions {
        DecoderOptions {
            thread_count: self.decoder_threads,
            frame_threading: self.frame_threading,
            initial_capacity: self.initial_capacity,
        }
    }

    /// Get the settings file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("avfx");
            p.push("playback.xml");
            p
        })
    }

    /// Load settings from an XML file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(SettingsError::Io)?;
        let mut settings: Self = from_str(&contents).map_err(SettingsError::XmlParse)?;
        settings.clamp();
        Ok(settings)
    }

    /// Save settings to an XML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        let xml = to_string(self).map_err(SettingsError::XmlWrite)?;

        // Add XML declaration
        let formatted = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml);

        fs::write(path, formatted).map_err(SettingsError::Io)?;
        Ok(())
    }

    /// Load settings from the config directory, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::load_from_file(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring unreadable settings {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save settings to the config directory
    pub fn save(&self) -> Result<(), SettingsError> {
        let Some(path) = Self::default_path() else {
            return Err(SettingsError::NoConfigDir);
        };

        // Ensure directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(SettingsError::Io)?;
        }

        self.save_to_file(&path)
    }
}

/// Settings-related errors
#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    XmlParse(quick_xml::DeError),
    XmlWrite(quick_xml::SeError),
    NoConfigDir,
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "IO error: {}", e),
            SettingsError::XmlParse(e) => write!(f, "XML parse error: {}", e),
            SettingsError::XmlWrite(e) => write!(f, "XML write error: {}", e),
            SettingsError::NoConfigDir => write!(f, "Could not find config directory"),
        }
    }
}

impl std::error::Error for SettingsError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("avfx-{}-{}.xml", name, std::process::id()))
    }

    #[test]
    fn test_default_settings() {
        let settings = PlaybackSettings::default();
        assert_eq!(settings.decoder_threads, 6);
        assert!(settings.frame_threading);
        assert_eq!(settings.initial_capacity, 1024);
        assert!(settings.loop_playback);
        assert_eq!(settings.wait_timeout(), Duration::from_millis(250));
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.decoder_options(), DecoderOptions::default());
    }

    #[test]
    fn test_clamping() {
        let mut settings = PlaybackSettings {
            decoder_threads: 0,
            initial_capacity: usize::MAX,
            wait_timeout_ms: 60_000,
            ..Default::default()
        };
        settings.clamp();
        assert_eq!(settings.decoder_threads, 1);
        assert_eq!(settings.initial_capacity, 65_536);
        assert_eq!(settings.wait_timeout_ms, 10_000);

        settings.decoder_threads = 512;
        settings.initial_capacity = 0;
        settings.wait_timeout_ms = 0;
        settings.clamp();
        assert_eq!(settings.decoder_threads, 64);
        assert_eq!(settings.initial_capacity, 1);
        assert_eq!(settings.wait_timeout_ms, 1);
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip");
        let settings = PlaybackSettings {
            decoder_threads: 2,
            frame_threading: false,
            loop_playback: false,
            log_level: "debug".to_string(),
            ..Default::default()
        };

        settings.save_to_file(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("<AvfxPlayback>"));
        assert!(contents.contains("<decoderThreads>2</decoderThreads>"));

        let loaded = PlaybackSettings::load_from_file(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.decoder_options().thread_count, 2);
        assert!(!loaded.decoder_options().frame_threading);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let path = temp_path("partial");
        fs::write(
            &path,
            "<AvfxPlayback><decoderThreads>200</decoderThreads></AvfxPlayback>",
        )
        .unwrap();

        let loaded = PlaybackSettings::load_from_file(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(loaded.decoder_threads, 64);
        assert_eq!(loaded.initial_capacity, 1024);
        assert!(loaded.loop_playback);
    }

    #[test]
    fn test_huge_capacity_is_clamped_on_load() {
        let path = temp_path("capacity");
        fs::write(
            &path,
            "<AvfxPlayback><initialCapacity>18446744073709551615</initialCapacity></AvfxPlayback>",
        )
        .unwrap();

        let loaded = PlaybackSettings::load_from_file(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(loaded.decoder_options().initial_capacity, 65_536);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = PlaybackSettings::load_from_file(&temp_path("missing")).unwrap_err();
        assert!(matches!(err, SettingsError::Io(_)));
        assert!(err.to_string().starts_with("IO error"));
    }
}
