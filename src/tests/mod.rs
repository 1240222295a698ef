//! Integration testing module
//!
//! End-to-end tests for the segmented recorder:
//! - Keyframe-aligned segment rotation
//! - End-of-stream and teardown sequencing
//! - Buffer-pool lease return on error paths
//! - Event clip assembly across segment boundaries
