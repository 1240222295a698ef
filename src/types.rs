use crate::error::ErrorKind;
use crate::pool::PooledBuffer;
use serde::Serialize;
use std::path::PathBuf;

/// One encoded frame delivered by the hardware encoder.
///
/// Transient: the payload buffer is leased from the source pool and the lease
/// ends when the unit is dropped, whether or not it was written successfully.
#[derive(Debug)]
pub struct AccessUnit {
    /// Presentation timestamp in microseconds, monotonic within a session.
    pub pts_us: i64,
    /// Decodable without reference to prior frames. Segments may only rotate
    /// on these so every segment plays back independently.
    pub is_keyframe: bool,
    /// Final unit of the stream; closes the session after it is written.
    pub is_end_of_stream: bool,
    pub payload: PooledBuffer,
}

/// Encoder output format, unknown until the encoder's first format callback.
#[derive(Debug, Clone)]
pub struct VideoFormat {
    pub width: u16,
    pub height: u16,
    pub frame_rate: u32,
    /// H.264 sequence parameter set, without NAL start code.
    pub sequence_parameter_set: Vec<u8>,
    /// H.264 picture parameter set, without NAL start code.
    pub picture_parameter_set: Vec<u8>,
}

/// A recorded media segment as known to the segment repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// Repository-assigned id; `None` while the row is still pending.
    pub id: Option<i64>,
    /// File name, unique within the repository.
    pub name: String,
    /// Storage location of the container file.
    pub location: PathBuf,
    /// Wall-clock start in milliseconds. Fixed at creation, never mutated.
    pub start_ms: i64,
    /// Milliseconds; 0 until the segment container is closed.
    pub duration_ms: i64,
}

impl Segment {
    pub fn end_ms(&self) -> i64 {
        self.start_ms + self.duration_ms
    }

    /// Whether this segment's time range intersects `[from_ms, to_ms]`.
    pub fn overlaps(&self, from_ms: i64, to_ms: i64) -> bool {
        self.start_ms <= to_ms && self.end_ms() >= from_ms
    }
}

/// Recorder lifecycle notifications, published on the event feed.
#[derive(Debug, Clone, Serialize)]
pub enum RecorderEvent {
    /// Recorder constructed and ready to start.
    Ready,
    /// A recording session started.
    Started,
    /// A new segment was opened and its repository row created.
    SegmentCreated(Segment),
    /// The session closed and teardown completed.
    Stopped,
    /// A caught internal failure. The feed is the channel of truth for
    /// failures that have no synchronous caller to return to.
    Error { kind: ErrorKind, message: String },
}
