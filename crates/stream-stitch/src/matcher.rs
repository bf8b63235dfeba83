//! Cross-platform stream matching.
//!
//! Reconciles asynchronous, independently-timestamped per-platform stream
//! reports into session groups by interval overlap. All passes are greedy
//! left-to-right scans, not globally optimal clustering; that keeps the
//! outcome deterministic and cheap, at the cost of needing repeated calls
//! to converge on heavily misaligned inputs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{Error, Result, ServiceError};
use crate::model::{PlatformStreamData, PlatformStreamRecord, Stream, StreamWithPlatforms, TimeRange};
use crate::platform::Platform;
use crate::service::StreamService;

/// Default minimum overlap fraction for two intervals to count as the same
/// session.
pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.85;

/// Matcher construction settings.
#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    /// Overlap threshold θ, in (0, 1].
    pub threshold: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_OVERLAP_THRESHOLD,
        }
    }
}

/// A session produced or extended by a matching pass.
#[derive(Debug, Clone)]
pub struct MatchedGroup {
    pub stream: Stream,
    pub records: Vec<PlatformStreamRecord>,
}

/// Outcome of [`StreamMatcher::match_new_platform_streams`].
///
/// Kept as two maps so the caller can distinguish "added to a live
/// session" from "new session detected".
#[derive(Debug, Default)]
pub struct NewMatchOutcome {
    /// Records attached to already-existing sessions, keyed by commonId.
    pub attached: HashMap<String, Vec<PlatformStreamRecord>>,
    /// Sessions created for records that matched nothing, keyed by commonId.
    pub created: HashMap<String, MatchedGroup>,
}

/// Groups per-platform stream reports into canonical sessions.
pub struct StreamMatcher<S> {
    service: Arc<S>,
    threshold: f64,
}

impl<S: StreamService> StreamMatcher<S> {
    /// Create a matcher. Fails if the threshold is outside (0, 1].
    pub fn new(service: Arc<S>, config: MatcherConfig) -> Result<Self> {
        if !(config.threshold > 0.0 && config.threshold <= 1.0) {
            return Err(Error::configuration(format!(
                "overlap threshold must be in (0, 1], got {}",
                config.threshold
            )));
        }
        Ok(Self {
            service,
            threshold: config.threshold,
        })
    }

    /// Group a full snapshot of per-platform stream lists into sessions.
    ///
    /// Records are flattened, sorted by start time and greedily assigned to
    /// the first group whose current span overlaps them at or above the
    /// threshold. One session is created per group, starting at the
    /// earliest member start; the end is set only once every member has a
    /// concrete end. Groups already committed stay committed if a later
    /// persistence call fails.
    pub async fn match_all_platform_streams(
        &self,
        per_platform: Vec<Vec<PlatformStreamData>>,
    ) -> Result<Vec<MatchedGroup>> {
        let now = Utc::now();
        let mut records: Vec<PlatformStreamData> = per_platform.into_iter().flatten().collect();
        records.sort_by_key(|r| r.start_time);

        let mut groups: Vec<PendingGroup> = Vec::new();
        for record in records {
            let range = record.range();
            let target = groups.iter_mut().find(|g| {
                !g.platforms.contains(&record.platform)
                    && g.span.overlap_ratio(&range, now) >= self.threshold
            });
            match target {
                Some(group) => group.push(record),
                None => groups.push(PendingGroup::seed(record)),
            }
        }
        debug!("Matched {} record group(s)", groups.len());

        let mut matched = Vec::with_capacity(groups.len());
        for group in groups {
            let common_id = uuid::Uuid::new_v4().to_string();
            let mut stream = self.service.create_stream(&common_id, group.span.start).await?;
            let mut stored = Vec::with_capacity(group.members.len());
            for member in group.members {
                stored.push(self.service.create_platform_stream(&common_id, member).await?);
            }
            if let Some(end) = group.span.end {
                self.service.update_stream_end(&common_id, end).await?;
                stream.obs_end_time = Some(end);
            }
            matched.push(MatchedGroup {
                stream,
                records: stored,
            });
        }
        Ok(matched)
    }

    /// Reconcile newly observed platform records against existing sessions.
    ///
    /// Each record is scanned against `existing` in the supplied order and
    /// attached to the first session whose span overlaps at or above the
    /// threshold; sessions already holding a record for that platform are
    /// skipped. Unmatched records become independent single-platform
    /// sessions, created concurrently and all awaited before returning.
    pub async fn match_new_platform_streams(
        &self,
        existing: &[StreamWithPlatforms],
        records: Vec<PlatformStreamData>,
    ) -> Result<NewMatchOutcome> {
        let now = Utc::now();
        let mut occupied: HashMap<String, HashSet<Platform>> = existing
            .iter()
            .map(|sw| {
                (
                    sw.stream.common_id.clone(),
                    sw.platforms.iter().map(|r| r.platform).collect(),
                )
            })
            .collect();

        let mut attached: HashMap<String, Vec<PlatformStreamRecord>> = HashMap::new();
        let mut unmatched = Vec::new();
        for record in records {
            let range = record.range();
            let platform = record.platform;
            let target = existing
                .iter()
                .find(|sw| {
                    let slot_free = occupied
                        .get(&sw.stream.common_id)
                        .is_none_or(|taken| !taken.contains(&platform));
                    slot_free && sw.stream.span().overlap_ratio(&range, now) >= self.threshold
                })
                .map(|sw| sw.stream.common_id.clone());

            match target {
                Some(common_id) => {
                    let stored = self.service.create_platform_stream(&common_id, record).await?;
                    if let Some(taken) = occupied.get_mut(&common_id) {
                        taken.insert(platform);
                    }
                    info!("Attached {platform} record to live session {common_id}");
                    attached.entry(common_id).or_default().push(stored);
                }
                None => unmatched.push(record),
            }
        }

        let creations = unmatched.into_iter().map(|record| {
            let service = Arc::clone(&self.service);
            async move {
                let common_id = uuid::Uuid::new_v4().to_string();
                let mut stream = service.create_stream(&common_id, record.start_time).await?;
                let end = record.end_time;
                let stored = service.create_platform_stream(&common_id, record).await?;
                if let Some(end) = end {
                    service.update_stream_end(&common_id, end).await?;
                    stream.obs_end_time = Some(end);
                }
                Ok::<_, ServiceError>(MatchedGroup {
                    stream,
                    records: vec![stored],
                })
            }
        });
        let created = futures::future::try_join_all(creations)
            .await?
            .into_iter()
            .map(|group| (group.stream.common_id.clone(), group))
            .collect();

        Ok(NewMatchOutcome { attached, created })
    }

    /// Detach the first attached record that no longer fits the session.
    ///
    /// Recomputes each record's overlap against the session's own span; the
    /// first one below the threshold is moved onto a brand-new session. One
    /// record per call; heavily misaligned sessions need repeated calls.
    /// Returns the surviving original (when any record remains) plus the
    /// new session.
    pub async fn split_stream(&self, common_id: &str) -> Result<Vec<Stream>> {
        let now = Utc::now();
        let StreamWithPlatforms { stream, platforms } =
            self.service.get_stream_with_platforms(common_id).await?;
        let span = stream.span();

        let Some(outlier_idx) = platforms
            .iter()
            .position(|r| r.data.range().overlap_ratio(&span, now) < self.threshold)
        else {
            return Ok(vec![stream]);
        };
        let outlier = platforms[outlier_idx].clone();

        self.service
            .remove_platform_from_stream(common_id, outlier.platform)
            .await?;

        let new_id = uuid::Uuid::new_v4().to_string();
        let mut new_stream = self
            .service
            .create_stream(&new_id, outlier.data.start_time)
            .await?;
        let outlier_end = outlier.data.end_time;
        self.service
            .create_platform_stream(&new_id, outlier.data)
            .await?;
        if let Some(end) = outlier_end {
            self.service.update_stream_end(&new_id, end).await?;
            new_stream.obs_end_time = Some(end);
        }
        info!("Split {} record off session {common_id} into {new_id}", outlier.platform);

        let survivors: Vec<&PlatformStreamRecord> = platforms
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != outlier_idx)
            .map(|(_, r)| r)
            .collect();

        if survivors.is_empty() {
            self.service.delete_stream(common_id).await?;
            return Ok(vec![new_stream]);
        }

        let mut original = stream;
        // Recompute the end from the survivors, but only when every one of
        // them has a concrete end; an open survivor keeps the session open.
        let max_end = survivors
            .iter()
            .map(|r| r.data.end_time)
            .collect::<Option<Vec<_>>>()
            .and_then(|ends| ends.into_iter().max());
        if let Some(end) = max_end {
            self.service.update_stream_end(common_id, end).await?;
            original.obs_end_time = Some(end);
        }
        Ok(vec![original, new_stream])
    }
}

/// Accumulating group state during a batch match.
struct PendingGroup {
    span: TimeRange,
    members: Vec<PlatformStreamData>,
    platforms: HashSet<Platform>,
}

impl PendingGroup {
    fn seed(record: PlatformStreamData) -> Self {
        let span = record.range();
        let mut platforms = HashSet::new();
        platforms.insert(record.platform);
        Self {
            span,
            members: vec![record],
            platforms,
        }
    }

    fn push(&mut self, record: PlatformStreamData) {
        self.span.start = self.span.start.min(record.start_time);
        // The span end stays open unless every member has finished.
        self.span.end = match (self.span.end, record.end_time) {
            (Some(current), Some(end)) => Some(current.max(end)),
            _ => None,
        };
        self.platforms.insert(record.platform);
        self.members.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStreamService;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::Value;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        // Fixed past date so open-ended ranges (resolved against the real
        // clock) behave predictably.
        Utc.with_ymd_and_hms(2024, 3, 9, hour, minute, 0).unwrap()
    }

    fn data(
        platform: Platform,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> PlatformStreamData {
        PlatformStreamData {
            platform,
            stream_id: format!("{platform}-{}", start.timestamp()),
            title: None,
            start_time: start,
            end_time: end,
            extra: Value::Null,
        }
    }

    fn matcher(store: &Arc<InMemoryStreamService>) -> StreamMatcher<InMemoryStreamService> {
        StreamMatcher::new(store.clone(), MatcherConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_threshold_must_be_in_unit_interval() {
        let store = Arc::new(InMemoryStreamService::new());
        for bad in [0.0, -0.5, 1.2] {
            let result = StreamMatcher::new(store.clone(), MatcherConfig { threshold: bad });
            assert!(matches!(result, Err(Error::Configuration(_))), "{bad}");
        }
        assert!(StreamMatcher::new(store, MatcherConfig { threshold: 1.0 }).is_ok());
    }

    #[tokio::test]
    async fn test_match_all_disjoint_records_make_independent_sessions() {
        let store = Arc::new(InMemoryStreamService::new());
        let matcher = matcher(&store);

        let groups = matcher
            .match_all_platform_streams(vec![
                vec![data(Platform::Twitch, at(10, 0), Some(at(11, 0)))],
                vec![data(Platform::YouTube, at(12, 0), Some(at(13, 0)))],
                vec![data(Platform::Kick, at(14, 0), Some(at(15, 0)))],
            ])
            .await
            .unwrap();

        assert_eq!(groups.len(), 3);
        for group in &groups {
            assert_eq!(group.records.len(), 1);
        }
        assert_eq!(store.all_streams().len(), 3);
    }

    #[tokio::test]
    async fn test_match_all_groups_overlapping_records_into_one_session() {
        let store = Arc::new(InMemoryStreamService::new());
        let matcher = matcher(&store);

        let groups = matcher
            .match_all_platform_streams(vec![
                vec![data(Platform::Twitch, at(14, 0), Some(at(16, 0)))],
                vec![data(Platform::YouTube, at(14, 3), Some(at(16, 1)))],
                vec![data(Platform::Kick, at(14, 6), Some(at(15, 54)))],
            ])
            .await
            .unwrap();

        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.records.len(), 3);
        // Earliest member start, latest member end.
        assert_eq!(group.stream.obs_start_time, at(14, 0));
        assert_eq!(group.stream.obs_end_time, Some(at(16, 1)));
    }

    #[tokio::test]
    async fn test_match_all_keeps_session_open_while_a_member_is_live() {
        let store = Arc::new(InMemoryStreamService::new());
        let matcher = matcher(&store);

        let groups = matcher
            .match_all_platform_streams(vec![
                vec![data(Platform::Twitch, at(14, 0), Some(at(16, 0)))],
                vec![data(Platform::YouTube, at(14, 0), None)],
            ])
            .await
            .unwrap();

        // The closed record sits fully inside the still-open one, so they
        // group; a member without a concrete end keeps the session open.
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].records.len(), 2);
        assert!(groups[0].stream.obs_end_time.is_none());
    }

    #[tokio::test]
    async fn test_match_new_attaches_and_creates() {
        let store = Arc::new(InMemoryStreamService::new());
        let matcher = matcher(&store);

        store.create_stream("existing", at(14, 0)).await.unwrap();
        store
            .update_stream_end("existing", at(16, 0))
            .await
            .unwrap();
        store
            .create_platform_stream("existing", data(Platform::Twitch, at(14, 0), Some(at(16, 0))))
            .await
            .unwrap();
        let existing = vec![store.get_stream_with_platforms("existing").await.unwrap()];

        let outcome = matcher
            .match_new_platform_streams(
                &existing,
                vec![
                    data(Platform::YouTube, at(14, 5), Some(at(15, 55))),
                    data(Platform::Kick, at(20, 0), Some(at(21, 0))),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.attached.len(), 1);
        let attached = &outcome.attached["existing"];
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].platform, Platform::YouTube);

        assert_eq!(outcome.created.len(), 1);
        let new_session = outcome.created.values().next().unwrap();
        assert_eq!(new_session.records[0].platform, Platform::Kick);
        assert_eq!(new_session.stream.obs_start_time, at(20, 0));
        assert_eq!(new_session.stream.obs_end_time, Some(at(21, 0)));

        // Store agrees: the existing session gained one record, one new
        // session exists.
        assert_eq!(
            store
                .get_platform_streams("existing")
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(store.all_streams().len(), 2);
    }

    #[tokio::test]
    async fn test_match_new_never_doubles_up_a_platform() {
        let store = Arc::new(InMemoryStreamService::new());
        let matcher = matcher(&store);

        store.create_stream("existing", at(14, 0)).await.unwrap();
        store
            .update_stream_end("existing", at(16, 0))
            .await
            .unwrap();
        store
            .create_platform_stream("existing", data(Platform::Twitch, at(14, 0), Some(at(16, 0))))
            .await
            .unwrap();
        let existing = vec![store.get_stream_with_platforms("existing").await.unwrap()];

        // Same platform, perfect overlap: must still become its own session.
        let outcome = matcher
            .match_new_platform_streams(
                &existing,
                vec![data(Platform::Twitch, at(14, 5), Some(at(15, 55)))],
            )
            .await
            .unwrap();

        assert!(outcome.attached.is_empty());
        assert_eq!(outcome.created.len(), 1);
    }

    #[tokio::test]
    async fn test_match_new_fills_a_platform_slot_at_most_once_per_call() {
        let store = Arc::new(InMemoryStreamService::new());
        let matcher = matcher(&store);

        store.create_stream("existing", at(14, 0)).await.unwrap();
        store
            .update_stream_end("existing", at(16, 0))
            .await
            .unwrap();
        store
            .create_platform_stream("existing", data(Platform::Twitch, at(14, 0), Some(at(16, 0))))
            .await
            .unwrap();
        let existing = vec![store.get_stream_with_platforms("existing").await.unwrap()];

        let outcome = matcher
            .match_new_platform_streams(
                &existing,
                vec![
                    data(Platform::YouTube, at(14, 2), Some(at(15, 58))),
                    data(Platform::YouTube, at(14, 4), Some(at(15, 56))),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.attached["existing"].len(), 1);
        assert_eq!(outcome.created.len(), 1);
    }

    #[tokio::test]
    async fn test_split_is_noop_when_all_records_fit() {
        let store = Arc::new(InMemoryStreamService::new());
        let matcher = matcher(&store);

        store.create_stream("s1", at(14, 0)).await.unwrap();
        store.update_stream_end("s1", at(16, 0)).await.unwrap();
        store
            .create_platform_stream("s1", data(Platform::Twitch, at(14, 6), Some(at(15, 54))))
            .await
            .unwrap();

        let result = matcher.split_stream("s1").await.unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].common_id, "s1");
        assert_eq!(store.get_platform_streams("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_split_detaches_first_misfit_into_new_session() {
        let store = Arc::new(InMemoryStreamService::new());
        let matcher = matcher(&store);

        store.create_stream("s1", at(14, 0)).await.unwrap();
        store.update_stream_end("s1", at(16, 0)).await.unwrap();
        store
            .create_platform_stream("s1", data(Platform::Twitch, at(14, 0), Some(at(16, 0))))
            .await
            .unwrap();
        store
            .create_platform_stream("s1", data(Platform::YouTube, at(18, 0), Some(at(19, 0))))
            .await
            .unwrap();

        let result = matcher.split_stream("s1").await.unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].common_id, "s1");
        assert_eq!(result[0].obs_end_time, Some(at(16, 0)));
        assert_eq!(result[1].obs_start_time, at(18, 0));
        assert_eq!(result[1].obs_end_time, Some(at(19, 0)));

        let survivors = store.get_platform_streams("s1").await.unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].platform, Platform::Twitch);

        let moved = store
            .get_platform_streams(&result[1].common_id)
            .await
            .unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].platform, Platform::YouTube);
    }

    #[tokio::test]
    async fn test_split_of_sole_misfit_deletes_original() {
        let store = Arc::new(InMemoryStreamService::new());
        let matcher = matcher(&store);

        store.create_stream("s1", at(14, 0)).await.unwrap();
        store.update_stream_end("s1", at(16, 0)).await.unwrap();
        store
            .create_platform_stream("s1", data(Platform::YouTube, at(18, 0), Some(at(19, 0))))
            .await
            .unwrap();

        let result = matcher.split_stream("s1").await.unwrap();

        assert_eq!(result.len(), 1);
        assert_ne!(result[0].common_id, "s1");
        assert!(store.get_stream("s1").await.unwrap().is_none());
        assert_eq!(store.all_streams().len(), 1);
    }

    #[tokio::test]
    async fn test_split_detaches_only_one_record_per_call() {
        let store = Arc::new(InMemoryStreamService::new());
        let matcher = matcher(&store);

        store.create_stream("s1", at(14, 0)).await.unwrap();
        store.update_stream_end("s1", at(16, 0)).await.unwrap();
        store
            .create_platform_stream("s1", data(Platform::Twitch, at(14, 0), Some(at(16, 0))))
            .await
            .unwrap();
        store
            .create_platform_stream("s1", data(Platform::YouTube, at(18, 0), Some(at(19, 0))))
            .await
            .unwrap();
        // Still open on the platform's side, so the survivor end is not
        // recomputed while it remains attached.
        store
            .create_platform_stream("s1", data(Platform::Kick, at(20, 0), None))
            .await
            .unwrap();

        matcher.split_stream("s1").await.unwrap();
        // One misfit was moved out; the other stays until the next call.
        assert_eq!(store.get_platform_streams("s1").await.unwrap().len(), 2);
        assert_eq!(
            store.get_stream("s1").await.unwrap().unwrap().obs_end_time,
            Some(at(16, 0))
        );

        matcher.split_stream("s1").await.unwrap();
        assert_eq!(store.get_platform_streams("s1").await.unwrap().len(), 1);
        assert_eq!(store.all_streams().len(), 3);
    }
}
