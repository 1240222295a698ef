//! Rotation engine.
//!
//! Converts the unbounded access-unit stream into a bounded sequence of
//! closed segments. One recorder task exclusively owns the active muxer,
//! track id, and segment-start-pts; every other context reaches it through
//! the command queue, so none of that state needs a lock.

use crate::config::RecorderConfig;
use crate::error::{ErrorKind, RecorderError, Result};
use crate::events::EventEmitter;
use crate::muxer::{MuxerFactory, SegmentMuxer};
use crate::repo::SegmentRepository;
use crate::teardown::TeardownSequencer;
use crate::types::{AccessUnit, RecorderEvent, Segment, VideoFormat};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Inbound message for the recorder context. The encoder callback thread
/// only enqueues; the single recorder task does all the processing.
pub(crate) enum Command {
    FormatEstablished(VideoFormat),
    AccessUnit(AccessUnit),
    /// Immediate shutdown without waiting for an end-of-stream unit.
    Shutdown,
}

/// Session phases. `AwaitingFormat` exists because the encoder's output
/// format is unknown until its first format callback; nothing is durable
/// before that transition. The task spawn itself is the `Idle -> start`
/// edge, and task exit is the return to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    AwaitingFormat,
    Active,
    Closing,
}

struct ActiveSegment {
    segment: Segment,
    muxer: Box<dyn SegmentMuxer>,
    track_id: u32,
    /// Pts of the first unit written since the last rotation.
    start_pts_us: Option<i64>,
    last_pts_us: Option<i64>,
}

pub(crate) struct RecorderTask {
    config: RecorderConfig,
    repo: Arc<dyn SegmentRepository>,
    muxers: Arc<dyn MuxerFactory>,
    events: EventEmitter,
    teardown: TeardownSequencer,
    state: SessionState,
    last_format: Option<VideoFormat>,
    active: Option<ActiveSegment>,
    /// In-flight repository writes (duration updates). Drained with a
    /// bounded timeout at teardown.
    background: JoinSet<()>,
}

impl RecorderTask {
    pub fn new(
        config: RecorderConfig,
        repo: Arc<dyn SegmentRepository>,
        muxers: Arc<dyn MuxerFactory>,
        events: EventEmitter,
        teardown: TeardownSequencer,
    ) -> Self {
        Self {
            config,
            repo,
            muxers,
            events,
            teardown,
            state: SessionState::AwaitingFormat,
            last_format: None,
            active: None,
            background: JoinSet::new(),
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        tracing::debug!("recorder context started");
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::FormatEstablished(format) => self.on_format_established(format).await,
                Command::AccessUnit(unit) => {
                    if self.on_access_unit(unit).await.is_break() {
                        break;
                    }
                }
                Command::Shutdown => break,
            }
        }
        // Covers the explicit Shutdown command and a dropped sender alike;
        // a session already closed by end-of-stream makes this a no-op.
        self.shutdown(None).await;
        tracing::debug!("recorder context finished");
    }

    /// Called when the encoder finalizes its output format. Opens a segment
    /// if none is open; on failure the session is left with no active
    /// segment and the next access unit retries.
    async fn on_format_established(&mut self, format: VideoFormat) {
        self.last_format = Some(format.clone());
        if self.active.is_some() || self.state == SessionState::Closing {
            return;
        }
        if let Err(e) = self.open_segment(&format).await {
            tracing::error!(error = %e, "failed to open segment on format change");
            self.publish_error(&e);
        }
    }

    /// Process one access unit. The payload lease ends when the unit is
    /// dropped at the bottom, on the error path too, so the source pool
    /// never starves. Returns `Break` after end-of-stream.
    async fn on_access_unit(&mut self, unit: AccessUnit) -> ControlFlow<()> {
        let pts_us = unit.pts_us;
        let eos = unit.is_end_of_stream;

        if let Err(e) = self.process_unit(&unit).await {
            tracing::warn!(error = %e, pts_us, "access unit not recorded");
            self.publish_error(&e);
        }
        drop(unit);

        if eos {
            self.shutdown(Some(pts_us)).await;
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    async fn process_unit(&mut self, unit: &AccessUnit) -> Result<()> {
        // Flush-only units (e.g. a bare end-of-stream marker) carry no data.
        if unit.payload.is_empty() {
            return Ok(());
        }

        if self.active.is_none() {
            let format = self.last_format.clone().ok_or_else(|| {
                RecorderError::Initialization("no encoder format established yet".to_string())
            })?;
            self.open_segment(&format).await?;
        }

        let rotation_due = match self.active.as_ref() {
            Some(active) => {
                unit.is_keyframe
                    && matches!(active.start_pts_us, Some(start)
                        if unit.pts_us - start >= self.config.segment.rotation_threshold_us)
            }
            None => false,
        };
        if rotation_due {
            // Rotate on the keyframe, before writing it, so the closed
            // segment and the new one each decode independently from their
            // first frame.
            self.close_segment(unit.pts_us);
            let format = self.last_format.clone().ok_or_else(|| {
                RecorderError::Initialization("encoder format lost across rotation".to_string())
            })?;
            self.open_segment(&format).await?;
        }

        let Some(active) = self.active.as_mut() else {
            return Err(RecorderError::Write(
                "no active segment to write into".to_string(),
            ));
        };
        if active.start_pts_us.is_none() {
            active.start_pts_us = Some(unit.pts_us);
        }
        active
            .muxer
            .write_sample(active.track_id, unit)
            .map_err(|e| RecorderError::Write(e.to_string()))?;
        active.last_pts_us = Some(unit.pts_us);
        Ok(())
    }

    /// Create the segment row, open a container writer at its location, and
    /// add the video track. Idempotent: a no-op while a segment is open.
    /// Every failure maps to the initialization class; the caller decides
    /// whether to surface it (nothing is left half-open either way).
    async fn open_segment(&mut self, format: &VideoFormat) -> Result<()> {
        if self.active.is_some() {
            return Ok(());
        }

        let start_ms = chrono::Utc::now().timestamp_millis();
        let name = format!(
            "{}_{:03}_seg.mp4",
            chrono::Utc::now().format("%Y%m%d_%H%M%S"),
            start_ms.rem_euclid(1000)
        );

        // Repository calls may block; keep them off the recorder context.
        let repo = Arc::clone(&self.repo);
        let insert_name = name.clone();
        let segment = tokio::task::spawn_blocking(move || repo.insert_segment(&insert_name, start_ms))
            .await
            .map_err(|e| RecorderError::Initialization(format!("repository worker: {e}")))?
            .map_err(|e| RecorderError::Initialization(format!("segment row: {e}")))?;

        let mut muxer = self
            .muxers
            .open(&segment.location)
            .map_err(|e| RecorderError::Initialization(format!("container writer: {e}")))?;
        let track_id = muxer
            .add_video_track(format)
            .map_err(|e| RecorderError::Initialization(format!("video track: {e}")))?;

        tracing::info!(name = %segment.name, start_ms, "segment opened");
        self.events
            .publish(RecorderEvent::SegmentCreated(segment.clone()));
        self.active = Some(ActiveSegment {
            segment,
            muxer,
            track_id,
            start_pts_us: None,
            last_pts_us: None,
        });
        self.state = SessionState::Active;
        Ok(())
    }

    /// Stop and release the muxer, then schedule the duration update on the
    /// background context. Rotation never waits on storage latency.
    fn close_segment(&mut self, end_pts_us: i64) {
        // Detach first so a concurrent rotate cannot race on the handle.
        let Some(active) = self.active.take() else {
            return;
        };
        let start_pts_us = active.start_pts_us.unwrap_or(end_pts_us);

        if let Err(e) = active.muxer.finalize() {
            tracing::error!(error = %e, name = %active.segment.name, "segment finalize failed");
            self.publish_error(&RecorderError::Write(format!("finalize: {e}")));
        }

        let duration_ms = (end_pts_us - start_pts_us) / 1000;
        let repo = Arc::clone(&self.repo);
        let segment = active.segment;
        tracing::info!(name = %segment.name, duration_ms, "segment closed");
        self.background.spawn_blocking(move || {
            if let Err(e) = repo.update_duration(&segment, duration_ms) {
                tracing::warn!(error = %e, name = %segment.name, "duration update failed");
            }
        });
        // Reap already-finished updates so the set stays small.
        while self.background.try_join_next().is_some() {}
    }

    /// Close the open segment, run the teardown sequence, and emit exactly
    /// one terminal event. Safe to call more than once.
    async fn shutdown(&mut self, end_pts_us: Option<i64>) {
        if self.teardown.is_done() {
            return;
        }
        self.state = SessionState::Closing;

        let end = end_pts_us
            .or_else(|| {
                self.active
                    .as_ref()
                    .and_then(|a| a.last_pts_us.or(a.start_pts_us))
            })
            .unwrap_or(0);
        self.close_segment(end);

        let failures = self.teardown.run(&mut self.background).await;
        if failures.is_empty() {
            self.events.publish(RecorderEvent::Stopped);
        } else {
            self.events.publish(RecorderEvent::Error {
                kind: ErrorKind::Teardown,
                message: failures.join("; "),
            });
        }
    }

    fn publish_error(&self, error: &RecorderError) {
        self.events.publish(RecorderEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }
}
