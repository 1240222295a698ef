//! Release/teardown sequencing.
//!
//! Ordered shutdown of the encoder, the capture source, and the background
//! repository writers. Every step is best-effort and caught independently so
//! one failure never blocks the rest, and the whole sequence is idempotent.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::error::Result;

/// Control surface of the external hardware encoder.
///
/// The recorder never owns the encoder's callback thread; it only signals it.
pub trait EncoderControl: Send + Sync {
    /// Ask the encoder to finish the stream. It answers with a final access
    /// unit flagged end-of-stream on its callback thread.
    fn signal_end_of_stream(&self);

    /// Stop the codec. May fail if the codec is already dead.
    fn stop(&self) -> Result<()>;

    /// Free codec resources. Must tolerate repeated calls.
    fn release(&self);
}

/// The live frame source feeding the encoder's input surface.
pub trait CaptureSource: Send + Sync {
    /// Free capture resources. Must tolerate repeated calls.
    fn release(&self);
}

pub(crate) struct TeardownSequencer {
    encoder: Arc<dyn EncoderControl>,
    capture: Arc<dyn CaptureSource>,
    drain_timeout: Duration,
    done: bool,
}

impl TeardownSequencer {
    pub fn new(
        encoder: Arc<dyn EncoderControl>,
        capture: Arc<dyn CaptureSource>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            encoder,
            capture,
            drain_timeout,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Run the shutdown steps. The caller closes the active segment before
    /// invoking this and emits the terminal event from the returned failure
    /// list. A second run is a no-op reporting no failures.
    pub async fn run(&mut self, background: &mut JoinSet<()>) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        let mut failures = Vec::new();

        self.encoder.signal_end_of_stream();
        if let Err(e) = self.encoder.stop() {
            tracing::warn!(error = %e, "encoder stop failed");
            failures.push(format!("encoder stop: {e}"));
        }
        self.encoder.release();
        self.capture.release();

        // Duration updates for already-closed segments may still be in
        // flight; wait for them, bounded.
        let drain = async {
            while let Some(joined) = background.join_next().await {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "background repository task panicked");
                }
            }
        };
        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            tracing::warn!(
                timeout_ms = self.drain_timeout.as_millis() as u64,
                "background repository writes did not drain in time"
            );
            failures.push("background repository writes timed out".to_string());
            background.abort_all();
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{FakeCapture, FakeEncoder};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_teardown_runs_every_step() {
        let encoder = Arc::new(FakeEncoder::default());
        let capture = Arc::new(FakeCapture::default());
        let mut seq = TeardownSequencer::new(
            Arc::clone(&encoder) as Arc<dyn EncoderControl>,
            Arc::clone(&capture) as Arc<dyn CaptureSource>,
            Duration::from_secs(1),
        );
        let mut background = JoinSet::new();
        background.spawn_blocking(|| {});

        let failures = seq.run(&mut background).await;
        assert!(failures.is_empty());
        assert_eq!(encoder.stops.load(Ordering::SeqCst), 1);
        assert_eq!(encoder.releases.load(Ordering::SeqCst), 1);
        assert_eq!(capture.releases.load(Ordering::SeqCst), 1);
        assert!(seq.is_done());
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let encoder = Arc::new(FakeEncoder::default());
        let capture = Arc::new(FakeCapture::default());
        let mut seq = TeardownSequencer::new(
            Arc::clone(&encoder) as Arc<dyn EncoderControl>,
            Arc::clone(&capture) as Arc<dyn CaptureSource>,
            Duration::from_secs(1),
        );
        let mut background = JoinSet::new();

        let first = seq.run(&mut background).await;
        let second = seq.run(&mut background).await;
        assert!(first.is_empty());
        assert!(second.is_empty());
        // No double-release of any resource.
        assert_eq!(encoder.stops.load(Ordering::SeqCst), 1);
        assert_eq!(encoder.releases.load(Ordering::SeqCst), 1);
        assert_eq!(capture.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_step_does_not_block_the_rest() {
        let encoder = Arc::new(FakeEncoder::failing_stop());
        let capture = Arc::new(FakeCapture::default());
        let mut seq = TeardownSequencer::new(
            Arc::clone(&encoder) as Arc<dyn EncoderControl>,
            Arc::clone(&capture) as Arc<dyn CaptureSource>,
            Duration::from_secs(1),
        );
        let mut background = JoinSet::new();

        let failures = seq.run(&mut background).await;
        assert_eq!(failures.len(), 1);
        // Later steps still ran.
        assert_eq!(encoder.releases.load(Ordering::SeqCst), 1);
        assert_eq!(capture.releases.load(Ordering::SeqCst), 1);
    }
}
