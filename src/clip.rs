//! Event clip assembly.
//!
//! Given an event timestamp, resolves the recorded segments overlapping a
//! configured window around it, concatenates their elementary tracks by
//! media kind, and multiplexes the result into one output container. The
//! output only becomes visible after the write completes fully.

use crate::config::ClipConfig;
use crate::error::{RecorderError, Result};
use crate::muxer::mp4_file_config;
use crate::repo::SegmentRepository;
use crate::types::Segment;
use mp4::{
    AacConfig, AvcConfig, MediaConfig, MediaType, Mp4Reader, Mp4Sample, Mp4Track, Mp4Writer,
    TrackConfig, TrackType,
};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

type SegmentReader = Mp4Reader<BufReader<File>>;
type ClipWriter = Mp4Writer<BufWriter<File>>;

pub struct ClipAssembler {
    repo: Arc<dyn SegmentRepository>,
    config: ClipConfig,
}

impl ClipAssembler {
    pub fn new(repo: Arc<dyn SegmentRepository>, config: ClipConfig) -> Self {
        Self { repo, config }
    }

    /// Assemble a clip for the window around `event_time_ms` and return its
    /// output name, or `Ok(None)` when no finalized segment overlaps the
    /// window. Container I/O runs on the blocking pool, never on the
    /// recorder task.
    pub async fn assemble(&self, event_time_ms: i64) -> Result<Option<String>> {
        let repo = Arc::clone(&self.repo);
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || assemble_blocking(&*repo, &config, event_time_ms))
            .await
            .map_err(|e| RecorderError::ClipAssembly(format!("clip worker: {e}")))?
    }
}

fn assemble_blocking(
    repo: &dyn SegmentRepository,
    config: &ClipConfig,
    event_time_ms: i64,
) -> Result<Option<String>> {
    let from_ms = event_time_ms - config.window_before_ms;
    let to_ms = event_time_ms + config.window_after_ms;

    let segments = repo
        .query_segments(from_ms, to_ms)
        .map_err(|e| RecorderError::Storage(e.to_string()))?;
    tracing::debug!(from_ms, to_ms, count = segments.len(), "clip window query");
    if segments.is_empty() {
        return Ok(None);
    }

    let clip_name = format!("{}_event.mp4", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
    std::fs::create_dir_all(&config.output_dir)?;
    let final_path = config.output_dir.join(&clip_name);
    // Written under a temporary name; only a fully written clip is renamed
    // into visibility.
    let pending_path = config
        .output_dir
        .join(format!(".{}.pending", Uuid::new_v4()));

    match write_clip(&segments, &pending_path) {
        Ok(()) => {
            std::fs::rename(&pending_path, &final_path)?;
            tracing::info!(name = %clip_name, segments = segments.len(), "event clip assembled");
            Ok(Some(clip_name))
        }
        Err(e) => {
            if let Err(rm) = std::fs::remove_file(&pending_path) {
                tracing::debug!(error = %rm, "pending clip cleanup failed");
            }
            Err(RecorderError::ClipAssembly(e.to_string()))
        }
    }
}

fn write_clip(segments: &[Segment], out_path: &Path) -> Result<()> {
    let mut readers = Vec::with_capacity(segments.len());
    for segment in segments {
        let file = File::open(&segment.location)?;
        let size = file.metadata()?.len();
        readers.push(Mp4Reader::read_header(BufReader::new(file), size)?);
    }

    // Bucket every input track by media kind, in segment order. Tracks whose
    // kind cannot be resolved are skipped, not fatal.
    let mut video: Vec<(usize, u32)> = Vec::new();
    let mut audio: Vec<(usize, u32)> = Vec::new();
    for (i, reader) in readers.iter().enumerate() {
        let mut tracks: Vec<&Mp4Track> = reader.tracks().values().collect();
        tracks.sort_by_key(|t| t.track_id());
        for track in tracks {
            match track.track_type() {
                Ok(TrackType::Video) => video.push((i, track.track_id())),
                Ok(TrackType::Audio) => audio.push((i, track.track_id())),
                Ok(other) => {
                    tracing::warn!(kind = ?other, segment = %segments[i].name, "skipping unsupported track kind");
                }
                Err(e) => {
                    tracing::warn!(error = %e, segment = %segments[i].name, "skipping track with unresolvable kind");
                }
            }
        }
    }
    if video.is_empty() && audio.is_empty() {
        return Err(RecorderError::ClipAssembly(
            "no usable tracks in window segments".to_string(),
        ));
    }

    let file = File::create(out_path)?;
    let mut writer = Mp4Writer::write_start(BufWriter::new(file), &mp4_file_config()?)?;

    let mut next_track_id = 1u32;
    let video_out = match video.first() {
        Some(&(reader_idx, track_id)) => {
            writer.add_track(&track_config(find_track(&readers, reader_idx, track_id)?)?)?;
            let id = next_track_id;
            next_track_id += 1;
            Some(id)
        }
        None => None,
    };
    let audio_out = match audio.first() {
        Some(&(reader_idx, track_id)) => {
            writer.add_track(&track_config(find_track(&readers, reader_idx, track_id)?)?)?;
            let id = next_track_id;
            Some(id)
        }
        None => None,
    };

    if let Some(out_id) = video_out {
        append_tracks(&mut writer, &mut readers, &video, out_id)?;
    }
    if let Some(out_id) = audio_out {
        append_tracks(&mut writer, &mut readers, &audio, out_id)?;
    }

    writer.write_end()?;
    let mut inner = writer.into_writer();
    inner.flush()?;
    Ok(())
}

fn find_track(readers: &[SegmentReader], reader_idx: usize, track_id: u32) -> Result<&Mp4Track> {
    readers[reader_idx].tracks().get(&track_id).ok_or_else(|| {
        RecorderError::ClipAssembly(format!("track {track_id} vanished from source"))
    })
}

/// Output track configuration copied from a source track.
fn track_config(track: &Mp4Track) -> Result<TrackConfig> {
    let media_conf = match track.media_type()? {
        MediaType::H264 => MediaConfig::AvcConfig(AvcConfig {
            width: track.width(),
            height: track.height(),
            seq_param_set: track.sequence_parameter_set()?.to_vec(),
            pic_param_set: track.picture_parameter_set()?.to_vec(),
        }),
        MediaType::AAC => MediaConfig::AacConfig(AacConfig {
            bitrate: track.bitrate(),
            profile: track.audio_profile()?,
            freq_index: track.sample_freq_index()?,
            chan_conf: track.channel_config()?,
        }),
        other => {
            return Err(RecorderError::ClipAssembly(format!(
                "unsupported codec {other:?} in source segment"
            )))
        }
    };
    Ok(TrackConfig {
        track_type: track.track_type()?,
        timescale: track.timescale(),
        language: track.language().to_string(),
        media_conf,
    })
}

/// Concatenate the source tracks, in segment order, into one output track.
///
/// The output timescale is the first source's; later segments rescale onto
/// it. Contiguity across segment boundaries is assumed, not enforced: the
/// result is best-effort contiguous by contract.
fn append_tracks(
    writer: &mut ClipWriter,
    readers: &mut [SegmentReader],
    sources: &[(usize, u32)],
    out_track_id: u32,
) -> Result<()> {
    let out_timescale = timescale_of(readers, sources[0].0, sources[0].1)?;

    let mut offset: u64 = 0;
    for &(reader_idx, track_id) in sources {
        let in_timescale = timescale_of(readers, reader_idx, track_id)?;
        let sample_count = readers[reader_idx].sample_count(track_id)?;
        let mut span: u64 = 0;
        for sample_id in 1..=sample_count {
            let Some(sample) = readers[reader_idx].read_sample(track_id, sample_id)? else {
                continue;
            };
            let start_time = rescale(sample.start_time, in_timescale, out_timescale);
            let duration = rescale(sample.duration as u64, in_timescale, out_timescale) as u32;
            span = span.max(start_time + duration as u64);
            writer.write_sample(
                out_track_id,
                &Mp4Sample {
                    start_time: offset + start_time,
                    duration,
                    rendering_offset: sample.rendering_offset,
                    is_sync: sample.is_sync,
                    bytes: sample.bytes,
                },
            )?;
        }
        offset += span;
    }
    Ok(())
}

fn timescale_of(readers: &[SegmentReader], reader_idx: usize, track_id: u32) -> Result<u32> {
    Ok(find_track(readers, reader_idx, track_id)?.timescale())
}

fn rescale(value: u64, from: u32, to: u32) -> u64 {
    if from == to || from == 0 {
        return value;
    }
    (value as u128 * to as u128 / from as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale() {
        assert_eq!(rescale(1_000_000, 1_000_000, 1_000_000), 1_000_000);
        assert_eq!(rescale(1_000_000, 1_000_000, 90_000), 90_000);
        assert_eq!(rescale(48_000, 48_000, 1_000_000), 1_000_000);
        assert_eq!(rescale(7, 0, 90_000), 7);
    }
}
