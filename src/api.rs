//! Public recorder surface.

use crate::clip::ClipAssembler;
use crate::config::RecorderConfig;
use crate::error::Result;
use crate::events::EventEmitter;
use crate::muxer::{Mp4MuxerFactory, MuxerFactory};
use crate::pool::{BufferPool, PooledBuffer};
use crate::repo::SegmentRepository;
use crate::session::{Command, RecorderTask};
use crate::teardown::{CaptureSource, EncoderControl, TeardownSequencer};
use crate::types::{AccessUnit, RecorderEvent, VideoFormat};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Handle used by the encoder callback thread.
///
/// Every call is non-blocking: work is enqueued to the recorder task, and a
/// full queue drops the unit with a warning (its buffer lease returns to the
/// pool on drop). The callback is treated as an interrupt source and must
/// never be stalled by the recorder.
#[derive(Clone)]
pub struct AccessUnitSink {
    tx: mpsc::Sender<Command>,
    pool: BufferPool,
}

impl AccessUnitSink {
    /// Lease a payload buffer for the next access unit.
    pub fn acquire_buffer(&self) -> PooledBuffer {
        self.pool.acquire()
    }

    /// Notify that the encoder finalized its output format. Called once per
    /// active segment, before (or alongside) the first access unit.
    pub fn format_established(&self, format: VideoFormat) {
        if self.tx.try_send(Command::FormatEstablished(format)).is_err() {
            tracing::warn!("recorder queue rejected format notification");
        }
    }

    /// Hand one encoded access unit to the recorder.
    pub fn submit(&self, unit: AccessUnit) {
        if let Err(e) = self.tx.try_send(Command::AccessUnit(unit)) {
            tracing::warn!("access unit dropped: {e}");
        }
    }
}

struct RunningSession {
    tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Continuous segmented recorder with on-demand event clip assembly.
///
/// Must be used within a tokio runtime: `start` spawns the recorder task and
/// repository/container I/O runs on the blocking pool.
pub struct SegmentedRecorder {
    config: RecorderConfig,
    repo: Arc<dyn SegmentRepository>,
    muxers: Arc<dyn MuxerFactory>,
    encoder: Arc<dyn EncoderControl>,
    capture: Arc<dyn CaptureSource>,
    events: EventEmitter,
    clips: ClipAssembler,
    pool: BufferPool,
    running: Mutex<Option<RunningSession>>,
    stop_requested: AtomicBool,
}

impl SegmentedRecorder {
    pub fn new(
        config: RecorderConfig,
        repo: Arc<dyn SegmentRepository>,
        encoder: Arc<dyn EncoderControl>,
        capture: Arc<dyn CaptureSource>,
    ) -> Self {
        Self::with_muxer_factory(config, repo, encoder, capture, Arc::new(Mp4MuxerFactory))
    }

    /// Construct with a custom container factory (the container format is a
    /// configuration seam, not a core concern).
    pub fn with_muxer_factory(
        config: RecorderConfig,
        repo: Arc<dyn SegmentRepository>,
        encoder: Arc<dyn EncoderControl>,
        capture: Arc<dyn CaptureSource>,
        muxers: Arc<dyn MuxerFactory>,
    ) -> Self {
        let events = EventEmitter::new(config.channels.event_buffer);
        let clips = ClipAssembler::new(Arc::clone(&repo), config.clip.clone());
        let pool = BufferPool::new(
            config.channels.pool_buffers,
            config.channels.pool_buffer_bytes,
        );
        events.publish(RecorderEvent::Ready);
        Self {
            config,
            repo,
            muxers,
            encoder,
            capture,
            events,
            clips,
            pool,
            running: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Start a recording session and return the sink the encoder callback
    /// feeds. Idempotent while a session is running: returns a sink to the
    /// existing session.
    pub fn start(&self) -> Result<AccessUnitSink> {
        let mut running = self.running.lock();
        if let Some(session) = running.as_ref() {
            if !session.task.is_finished() {
                return Ok(AccessUnitSink {
                    tx: session.tx.clone(),
                    pool: self.pool.clone(),
                });
            }
        }

        let (tx, rx) = mpsc::channel(self.config.channels.command_queue);
        let task = RecorderTask::new(
            self.config.clone(),
            Arc::clone(&self.repo),
            Arc::clone(&self.muxers),
            self.events.clone(),
            TeardownSequencer::new(
                Arc::clone(&self.encoder),
                Arc::clone(&self.capture),
                Duration::from_millis(self.config.teardown_drain_ms),
            ),
        );
        let handle = tokio::spawn(task.run(rx));
        self.stop_requested.store(false, Ordering::SeqCst);
        *running = Some(RunningSession {
            tx: tx.clone(),
            task: handle,
        });
        self.events.publish(RecorderEvent::Started);
        Ok(AccessUnitSink {
            tx,
            pool: self.pool.clone(),
        })
    }

    /// Request a graceful stop. One-shot: repeat calls are no-ops. The
    /// encoder answers with an end-of-stream access unit, which closes the
    /// last segment and runs teardown; `Stopped` on the event feed marks
    /// completion.
    pub fn stop(&self) {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("recording stop requested");
        self.encoder.signal_end_of_stream();
    }

    /// Tear down immediately without waiting for an end-of-stream unit, and
    /// wait for the recorder task to finish. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let session = { self.running.lock().take() };
        if let Some(session) = session {
            let _ = session.tx.send(Command::Shutdown).await;
            if let Err(e) = session.task.await {
                tracing::warn!(error = %e, "recorder task ended abnormally");
            }
        }
    }

    /// Subscribe to the recorder event feed. Best-effort, at-most-once, no
    /// replay for late subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }

    /// Build a clip around `event_time_ms`. Returns the output name, or
    /// `Ok(None)` when no recorded segment overlaps the window.
    pub async fn request_event_clip(&self, event_time_ms: i64) -> Result<Option<String>> {
        self.clips.assemble(event_time_ms).await
    }
}
