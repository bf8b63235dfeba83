//! Stream persistence boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ServiceError;
use crate::model::{PlatformStreamData, PlatformStreamRecord, Stream, StreamWithPlatforms};
use crate::platform::Platform;

/// Persistence boundary for the session aggregate.
///
/// Implemented by the surrounding daemon's store; the detector and matcher
/// act on sessions only through this trait and never call each other.
/// Implementations must be safe for concurrent invocation; writes to the
/// same commonId are serialized by the implementation, while writes to
/// different commonIds are independent.
#[async_trait]
pub trait StreamService: Send + Sync {
    /// Create a session. Fails if the commonId already exists.
    async fn create_stream(
        &self,
        common_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<Stream, ServiceError>;

    async fn get_stream(&self, common_id: &str) -> Result<Option<Stream>, ServiceError>;

    /// Fetch the session, creating it with `start_time` if absent.
    async fn get_or_create_stream(
        &self,
        common_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<Stream, ServiceError>;

    async fn update_stream_end(
        &self,
        common_id: &str,
        end_time: DateTime<Utc>,
    ) -> Result<(), ServiceError>;

    /// Delete the session and any platform records it still owns.
    async fn delete_stream(&self, common_id: &str) -> Result<(), ServiceError>;

    /// Attach a platform snapshot to a session. Fails if the session
    /// already holds a record for that platform.
    async fn create_platform_stream(
        &self,
        common_id: &str,
        data: PlatformStreamData,
    ) -> Result<PlatformStreamRecord, ServiceError>;

    async fn get_platform_streams(
        &self,
        common_id: &str,
    ) -> Result<Vec<PlatformStreamRecord>, ServiceError>;

    /// Detach a platform's record from a session.
    async fn remove_platform_from_stream(
        &self,
        common_id: &str,
        platform: Platform,
    ) -> Result<(), ServiceError>;

    async fn get_stream_with_platforms(
        &self,
        common_id: &str,
    ) -> Result<StreamWithPlatforms, ServiceError>;
}
