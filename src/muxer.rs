//! Segment container writing.
//!
//! The container format is a configuration seam, not a core concern: the
//! rotation engine only sees [`SegmentMuxer`]/[`MuxerFactory`]. The default
//! implementation writes plain MP4 files with the `mp4` crate.

use crate::error::{RecorderError, Result};
use crate::types::{AccessUnit, VideoFormat};
use bytes::Bytes;
use mp4::{AvcConfig, MediaConfig, Mp4Config, Mp4Sample, Mp4Writer, TrackConfig, TrackType};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Track timescale in ticks per second. Microseconds keep sample times
/// lossless against encoder presentation timestamps.
const TRACK_TIMESCALE: u32 = 1_000_000;

/// Fallback duration for the final sample when the frame rate is unknown
/// (one frame at ~30 fps).
const FALLBACK_SAMPLE_TICKS: u32 = 33_333;

/// Container writer for one segment. Implementations own the file handle and
/// must leave an independently playable file behind on `finalize`.
pub trait SegmentMuxer: Send {
    /// Add the single video track. Called once, before the first sample.
    fn add_video_track(&mut self, format: &VideoFormat) -> Result<u32>;

    /// Append one access unit. `unit.pts_us` is absolute; the muxer rebases
    /// it onto the segment-local timeline.
    fn write_sample(&mut self, track_id: u32, unit: &AccessUnit) -> Result<()>;

    /// Flush buffered samples and close the container.
    fn finalize(self: Box<Self>) -> Result<()>;
}

/// Opens a fresh container writer at a segment's storage location.
pub trait MuxerFactory: Send + Sync {
    fn open(&self, location: &Path) -> Result<Box<dyn SegmentMuxer>>;
}

pub(crate) fn mp4_file_config() -> Result<Mp4Config> {
    let brand = |s: &str| {
        str::parse(s).map_err(|_| RecorderError::Initialization(format!("bad brand {s:?}")))
    };
    Ok(Mp4Config {
        major_brand: brand("isom")?,
        minor_version: 512,
        compatible_brands: vec![brand("isom")?, brand("iso2")?, brand("avc1")?, brand("mp41")?],
        timescale: 1000,
    })
}

/// MP4 segment writer on the pure-Rust `mp4` crate.
///
/// Sample durations are derived from pts deltas, so each write holds the
/// previous sample until the next one fixes its span; the final sample gets
/// the nominal frame duration.
pub struct Mp4SegmentMuxer {
    writer: Mp4Writer<BufWriter<File>>,
    nominal_sample_ticks: u32,
    first_pts_us: Option<i64>,
    pending: Option<(u32, Mp4Sample)>,
}

impl Mp4SegmentMuxer {
    pub fn create(location: &Path) -> Result<Self> {
        if let Some(parent) = location.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(location)?;
        let writer = Mp4Writer::write_start(BufWriter::new(file), &mp4_file_config()?)?;
        Ok(Self {
            writer,
            nominal_sample_ticks: FALLBACK_SAMPLE_TICKS,
            first_pts_us: None,
            pending: None,
        })
    }

    fn flush_pending(&mut self, next_start: Option<u64>) -> Result<()> {
        if let Some((track_id, mut sample)) = self.pending.take() {
            sample.duration = match next_start {
                Some(next) => next.saturating_sub(sample.start_time) as u32,
                None => self.nominal_sample_ticks,
            };
            self.writer.write_sample(track_id, &sample)?;
        }
        Ok(())
    }
}

impl SegmentMuxer for Mp4SegmentMuxer {
    fn add_video_track(&mut self, format: &VideoFormat) -> Result<u32> {
        let track = TrackConfig {
            track_type: TrackType::Video,
            timescale: TRACK_TIMESCALE,
            language: "und".to_string(),
            media_conf: MediaConfig::AvcConfig(AvcConfig {
                width: format.width,
                height: format.height,
                seq_param_set: format.sequence_parameter_set.clone(),
                pic_param_set: format.picture_parameter_set.clone(),
            }),
        };
        self.writer.add_track(&track)?;
        if format.frame_rate > 0 {
            self.nominal_sample_ticks = TRACK_TIMESCALE / format.frame_rate;
        }
        // mp4 track ids start at 1; one video track per segment.
        Ok(1)
    }

    fn write_sample(&mut self, track_id: u32, unit: &AccessUnit) -> Result<()> {
        let first = *self.first_pts_us.get_or_insert(unit.pts_us);
        let start_time = (unit.pts_us - first).max(0) as u64;
        self.flush_pending(Some(start_time))?;
        self.pending = Some((
            track_id,
            Mp4Sample {
                start_time,
                duration: 0, // patched when the next sample fixes the span
                rendering_offset: 0,
                is_sync: unit.is_keyframe,
                bytes: Bytes::copy_from_slice(&unit.payload),
            },
        ));
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<()> {
        self.flush_pending(None)?;
        self.writer.write_end()?;
        let mut inner = self.writer.into_writer();
        inner.flush()?;
        Ok(())
    }
}

/// Factory for the default MP4 segment writer.
#[derive(Debug, Default, Clone)]
pub struct Mp4MuxerFactory;

impl MuxerFactory for Mp4MuxerFactory {
    fn open(&self, location: &Path) -> Result<Box<dyn SegmentMuxer>> {
        Ok(Box::new(Mp4SegmentMuxer::create(location)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPool;
    use std::io::BufReader;

    fn test_format() -> VideoFormat {
        VideoFormat {
            width: 1280,
            height: 720,
            frame_rate: 30,
            sequence_parameter_set: vec![
                0x67, 0x64, 0x00, 0x1f, 0xac, 0xd9, 0x40, 0x50, 0x05, 0xbb, 0x01, 0x6a, 0x02,
                0x02, 0x02, 0x80,
            ],
            picture_parameter_set: vec![0x68, 0xeb, 0xe3, 0xcb, 0x22, 0xc0],
        }
    }

    fn unit(pool: &BufferPool, pts_us: i64, key: bool) -> AccessUnit {
        let mut payload = pool.acquire();
        payload.fill(&pts_us.to_le_bytes());
        AccessUnit {
            pts_us,
            is_keyframe: key,
            is_end_of_stream: false,
            payload,
        }
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.mp4");
        let pool = BufferPool::new(4, 64);

        let mut muxer: Box<dyn SegmentMuxer> = Box::new(Mp4SegmentMuxer::create(&path).unwrap());
        let track = muxer.add_video_track(&test_format()).unwrap();
        // Absolute pts: the muxer must rebase onto a zero-based timeline.
        muxer.write_sample(track, &unit(&pool, 5_000_000, true)).unwrap();
        muxer.write_sample(track, &unit(&pool, 5_033_000, false)).unwrap();
        muxer.write_sample(track, &unit(&pool, 5_066_000, false)).unwrap();
        muxer.finalize().unwrap();

        let file = File::open(&path).unwrap();
        let size = file.metadata().unwrap().len();
        let mut reader = mp4::Mp4Reader::read_header(BufReader::new(file), size).unwrap();

        let track_ids: Vec<u32> = reader.tracks().keys().copied().collect();
        assert_eq!(track_ids, vec![1]);
        assert_eq!(reader.sample_count(1).unwrap(), 3);

        let s1 = reader.read_sample(1, 1).unwrap().unwrap();
        assert_eq!(s1.start_time, 0);
        assert!(s1.is_sync);
        assert_eq!(s1.duration, 33_000);
        assert_eq!(&s1.bytes[..], &5_000_000i64.to_le_bytes());

        let s3 = reader.read_sample(1, 3).unwrap().unwrap();
        assert_eq!(s3.start_time, 66_000);
        assert!(!s3.is_sync);
        // Last sample falls back to the nominal frame duration.
        assert_eq!(s3.duration, TRACK_TIMESCALE / 30);
    }
}
