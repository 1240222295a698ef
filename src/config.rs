//! Recorder configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Segment rotation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Rotation threshold in microseconds of presentation time. The active
    /// segment closes at the first keyframe at or past this age.
    pub rotation_threshold_us: i64,

    /// Directory segment files are written into (consumed by the default
    /// repository; remote repositories assign their own locations)
    pub output_dir: PathBuf,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            rotation_threshold_us: 10_000_000, // 10 seconds
            output_dir: PathBuf::from("recordings"),
        }
    }
}

/// Event clip window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipConfig {
    /// History included before the event timestamp, in milliseconds
    pub window_before_ms: i64,

    /// Future included after the event timestamp, in milliseconds
    pub window_after_ms: i64,

    /// Directory assembled clips are written into
    pub output_dir: PathBuf,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            window_before_ms: 30_000,
            window_after_ms: 10_000,
            output_dir: PathBuf::from("clips"),
        }
    }
}

/// Queue and buffer sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Bound of the handoff queue between the encoder callback and the
    /// recorder task. A full queue drops the unit rather than blocking.
    pub command_queue: usize,

    /// Bound of the event feed; lagging subscribers lose the oldest events
    pub event_buffer: usize,

    /// Number of payload buffers in the source pool
    pub pool_buffers: usize,

    /// Initial byte capacity of each pooled buffer
    pub pool_buffer_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_queue: 64,
            event_buffer: 32,
            pool_buffers: 16,
            pool_buffer_bytes: 256 * 1024,
        }
    }
}

/// Recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Segment rotation configuration
    pub segment: SegmentConfig,

    /// Event clip configuration
    pub clip: ClipConfig,

    /// Queue and buffer sizing
    pub channels: ChannelConfig,

    /// Upper bound on waiting for in-flight repository writes during
    /// teardown, in milliseconds. A timeout is logged, not retried.
    pub teardown_drain_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            segment: SegmentConfig::default(),
            clip: ClipConfig::default(),
            channels: ChannelConfig::default(),
            teardown_drain_ms: 5_000,
        }
    }
}

impl RecorderConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: RecorderConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
