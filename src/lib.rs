//! Segmented video recording core.
//!
//! Consumes encoded access units from a hardware encoder, records them as a
//! rolling sequence of independently playable MP4 segments (rotated at
//! keyframe boundaries), and assembles on-demand event clips spanning several
//! segments around an event timestamp.

pub(crate) mod api;
pub(crate) mod clip;
pub(crate) mod config;
pub(crate) mod error;
pub(crate) mod events;
pub(crate) mod muxer;
pub(crate) mod pool;
pub(crate) mod repo;
pub(crate) mod session;
pub(crate) mod teardown;
pub(crate) mod types;

#[cfg(test)]
pub(crate) mod tests;

pub use api::{AccessUnitSink, SegmentedRecorder};
pub use clip::ClipAssembler;
pub use config::{ChannelConfig, ClipConfig, RecorderConfig, SegmentConfig};
pub use error::{ErrorKind, RecorderError, Result};
pub use muxer::{Mp4MuxerFactory, Mp4SegmentMuxer, MuxerFactory, SegmentMuxer};
pub use pool::{BufferPool, PooledBuffer};
pub use repo::{MemorySegmentRepository, SegmentRepository};
pub use teardown::{CaptureSource, EncoderControl};
pub use types::{AccessUnit, RecorderEvent, Segment, VideoFormat};
