//! Segment repository.
//!
//! Durable metadata store keyed by segment identity. The trait is the
//! external-collaborator boundary: implementations may block and are always
//! invoked from the background I/O context, never from the encoder callback
//! or directly on the recorder task.

use crate::error::{RecorderError, Result};
use crate::types::Segment;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};

pub trait SegmentRepository: Send + Sync {
    /// Allocate a row and a storage location for a new segment. The returned
    /// segment has duration 0 and a fixed start time.
    fn insert_segment(&self, name: &str, start_ms: i64) -> Result<Segment>;

    /// Record the final duration of a closed segment. Written exactly once,
    /// after the container is closed. Fire-and-forget from the recorder's
    /// perspective: failures are logged by the caller, not retried.
    fn update_duration(&self, segment: &Segment, duration_ms: i64) -> Result<()>;

    /// Finalized segments whose time range intersects `[from_ms, to_ms]`,
    /// ascending by start time. The result count is bounded by the
    /// implementation (the newest matches win).
    fn query_segments(&self, from_ms: i64, to_ms: i64) -> Result<Vec<Segment>>;
}

/// In-process repository backed by a concurrent map. The default store for
/// tests and single-process deployments.
pub struct MemorySegmentRepository {
    base_dir: PathBuf,
    rows: DashMap<i64, Segment>,
    next_id: AtomicI64,
    max_results: usize,
}

impl MemorySegmentRepository {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self::with_limit(base_dir, 8)
    }

    pub fn with_limit(base_dir: impl Into<PathBuf>, max_results: usize) -> Self {
        Self {
            base_dir: base_dir.into(),
            rows: DashMap::new(),
            next_id: AtomicI64::new(1),
            max_results,
        }
    }
}

impl SegmentRepository for MemorySegmentRepository {
    fn insert_segment(&self, name: &str, start_ms: i64) -> Result<Segment> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let segment = Segment {
            id: Some(id),
            name: name.to_string(),
            location: self.base_dir.join(name),
            start_ms,
            duration_ms: 0,
        };
        self.rows.insert(id, segment.clone());
        Ok(segment)
    }

    fn update_duration(&self, segment: &Segment, duration_ms: i64) -> Result<()> {
        let id = segment
            .id
            .ok_or_else(|| RecorderError::Storage("segment has no durable id".to_string()))?;
        match self.rows.get_mut(&id) {
            Some(mut row) => {
                row.duration_ms = duration_ms;
                Ok(())
            }
            None => Err(RecorderError::Storage(format!("unknown segment id {id}"))),
        }
    }

    fn query_segments(&self, from_ms: i64, to_ms: i64) -> Result<Vec<Segment>> {
        let mut hits: Vec<Segment> = self
            .rows
            .iter()
            .map(|row| row.value().clone())
            // Finalized rows only: a just-closed segment whose duration
            // update is still in flight stays invisible until it lands.
            .filter(|seg| seg.duration_ms > 0 && seg.overlaps(from_ms, to_ms))
            .collect();
        hits.sort_by_key(|seg| seg.start_ms);
        if hits.len() > self.max_results {
            hits.drain(..hits.len() - self.max_results);
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_assigns_ids_and_zero_duration() {
        let repo = MemorySegmentRepository::new("/tmp/segs");
        let a = repo.insert_segment("a.mp4", 1_000).unwrap();
        let b = repo.insert_segment("b.mp4", 2_000).unwrap();
        assert!(a.id.is_some());
        assert_ne!(a.id, b.id);
        assert_eq!(a.duration_ms, 0);
        assert_eq!(a.location, PathBuf::from("/tmp/segs/a.mp4"));
    }

    #[test]
    fn test_query_returns_finalized_ascending() {
        let repo = MemorySegmentRepository::new("/tmp/segs");
        let a = repo.insert_segment("a.mp4", 0).unwrap();
        let b = repo.insert_segment("b.mp4", 10_000).unwrap();
        let c = repo.insert_segment("c.mp4", 20_000).unwrap();
        repo.update_duration(&a, 10_000).unwrap();
        repo.update_duration(&c, 10_000).unwrap();
        // b never finalized: invisible to window queries.
        let _ = b;

        let hits = repo.query_segments(0, 30_000).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].name, "a.mp4");
        assert_eq!(hits[1].name, "c.mp4");
    }

    #[test]
    fn test_query_bounds_result_count_keeping_newest() {
        let repo = MemorySegmentRepository::with_limit("/tmp/segs", 2);
        for i in 0..5 {
            let seg = repo
                .insert_segment(&format!("{i}.mp4"), i * 10_000)
                .unwrap();
            repo.update_duration(&seg, 10_000).unwrap();
        }
        let hits = repo.query_segments(0, 100_000).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].start_ms, 30_000);
        assert_eq!(hits[1].start_ms, 40_000);
    }

    #[test]
    fn test_update_unknown_segment_fails() {
        let repo = MemorySegmentRepository::new("/tmp/segs");
        let ghost = Segment {
            id: Some(42),
            name: "ghost.mp4".into(),
            location: PathBuf::from("/tmp/segs/ghost.mp4"),
            start_ms: 0,
            duration_ms: 0,
        };
        assert!(repo.update_duration(&ghost, 1_000).is_err());
    }
}
