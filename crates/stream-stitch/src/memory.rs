//! In-memory stream store.
//!
//! Reference implementation of [`StreamService`], used as the test double
//! and for daemons that do not need durable session history. Enforces the
//! aggregate invariants: unique commonId, at most one record per platform
//! per session, records moved between sessions only by remove + create.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::ServiceError;
use crate::model::{PlatformStreamData, PlatformStreamRecord, Stream, StreamWithPlatforms};
use crate::platform::Platform;
use crate::service::StreamService;

#[derive(Default)]
struct StoreInner {
    streams: HashMap<String, Stream>,
    records: HashMap<String, Vec<PlatformStreamRecord>>,
}

/// Map-backed [`StreamService`].
#[derive(Default)]
pub struct InMemoryStreamService {
    inner: Mutex<StoreInner>,
}

impl InMemoryStreamService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every stored session, platform records included.
    pub fn all_streams(&self) -> Vec<StreamWithPlatforms> {
        let inner = self.inner.lock();
        inner
            .streams
            .values()
            .map(|stream| StreamWithPlatforms {
                stream: stream.clone(),
                platforms: inner
                    .records
                    .get(&stream.common_id)
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect()
    }
}

#[async_trait]
impl StreamService for InMemoryStreamService {
    async fn create_stream(
        &self,
        common_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<Stream, ServiceError> {
        let mut inner = self.inner.lock();
        if inner.streams.contains_key(common_id) {
            return Err(ServiceError::conflict(format!(
                "stream {common_id} already exists"
            )));
        }
        let stream = Stream::new(common_id, start_time);
        inner.streams.insert(common_id.to_string(), stream.clone());
        Ok(stream)
    }

    async fn get_stream(&self, common_id: &str) -> Result<Option<Stream>, ServiceError> {
        Ok(self.inner.lock().streams.get(common_id).cloned())
    }

    async fn get_or_create_stream(
        &self,
        common_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<Stream, ServiceError> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.streams.get(common_id) {
            return Ok(existing.clone());
        }
        let stream = Stream::new(common_id, start_time);
        inner.streams.insert(common_id.to_string(), stream.clone());
        Ok(stream)
    }

    async fn update_stream_end(
        &self,
        common_id: &str,
        end_time: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock();
        let stream = inner
            .streams
            .get_mut(common_id)
            .ok_or_else(|| ServiceError::not_found(common_id))?;
        stream.obs_end_time = Some(end_time);
        Ok(())
    }

    async fn delete_stream(&self, common_id: &str) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock();
        inner
            .streams
            .remove(common_id)
            .ok_or_else(|| ServiceError::not_found(common_id))?;
        inner.records.remove(common_id);
        Ok(())
    }

    async fn create_platform_stream(
        &self,
        common_id: &str,
        data: PlatformStreamData,
    ) -> Result<PlatformStreamRecord, ServiceError> {
        let mut inner = self.inner.lock();
        if !inner.streams.contains_key(common_id) {
            return Err(ServiceError::not_found(common_id));
        }
        let records = inner.records.entry(common_id.to_string()).or_default();
        if records.iter().any(|r| r.platform == data.platform) {
            return Err(ServiceError::conflict(format!(
                "stream {common_id} already has a {} record",
                data.platform
            )));
        }
        let record = PlatformStreamRecord::new(common_id, data);
        records.push(record.clone());
        Ok(record)
    }

    async fn get_platform_streams(
        &self,
        common_id: &str,
    ) -> Result<Vec<PlatformStreamRecord>, ServiceError> {
        let inner = self.inner.lock();
        if !inner.streams.contains_key(common_id) {
            return Err(ServiceError::not_found(common_id));
        }
        Ok(inner.records.get(common_id).cloned().unwrap_or_default())
    }

    async fn remove_platform_from_stream(
        &self,
        common_id: &str,
        platform: Platform,
    ) -> Result<(), ServiceError> {
        let mut inner = self.inner.lock();
        let records = inner
            .records
            .get_mut(common_id)
            .ok_or_else(|| ServiceError::not_found(common_id))?;
        let before = records.len();
        records.retain(|r| r.platform != platform);
        if records.len() == before {
            return Err(ServiceError::conflict(format!(
                "stream {common_id} has no {platform} record"
            )));
        }
        Ok(())
    }

    async fn get_stream_with_platforms(
        &self,
        common_id: &str,
    ) -> Result<StreamWithPlatforms, ServiceError> {
        let inner = self.inner.lock();
        let stream = inner
            .streams
            .get(common_id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(common_id))?;
        let platforms = inner.records.get(common_id).cloned().unwrap_or_default();
        Ok(StreamWithPlatforms { stream, platforms })
    }
}
