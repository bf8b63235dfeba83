//! stream-stitch: session reconciliation for a multi-platform streaming daemon.
//!
//! Determines when the broadcaster's local recorder is actually live and
//! stitches the metadata streams independently reported by external video
//! platforms into canonical sessions.
//!
//! ## Core Types
//!
//! - [`Stream`] - Canonical session: one local recording interval
//! - [`PlatformStreamRecord`] - One platform's reported view of a session
//! - [`StreamService`] - Persistence boundary, implemented by the daemon's store
//! - [`InMemoryStreamService`] - Map-backed reference store
//!
//! ## Detection
//!
//! - [`LifecycleDetector`] - Session state machine driven by recorder
//!   state-change events; creates and finalizes [`Stream`] records
//! - [`LifecycleEvent`] - Notifications broadcast on transitions
//!
//! ## Matching
//!
//! - [`StreamMatcher`] - Overlap-threshold grouping of per-platform
//!   stream reports: batch matching, incremental attachment, splits
//! - [`TimeRange`] - The overlap metric itself

pub mod detector;
pub mod error;
pub mod matcher;
pub mod memory;
pub mod model;
pub mod platform;
pub mod service;

pub use detector::{LifecycleDetector, LifecycleEvent, StreamState};
pub use error::{Error, Result, ServiceError};
pub use matcher::{
    DEFAULT_OVERLAP_THRESHOLD, MatchedGroup, MatcherConfig, NewMatchOutcome, StreamMatcher,
};
pub use memory::InMemoryStreamService;
pub use model::{
    PlatformStreamData, PlatformStreamRecord, Stream, StreamWithPlatforms, TimeRange,
};
pub use platform::Platform;
pub use service::StreamService;
