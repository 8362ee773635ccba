// Coherence engine - orchestrates reads and writes across store and cache
//
// Read path defenses, in order: the existence filter rejects ids that never
// existed (penetration), the per-id miss lock collapses concurrent store
// fills (breakdown), and the jittered value TTL spreads expiry (avalanche).
//
// Write path: writers to one id serialize on its distributed lock, the
// cache entry is invalidated before the store write, and a detached task
// invalidates again after a short delay to absorb readers that refilled the
// cache with a pre-write snapshot in between.

use crate::cache::{with_lock, LockKey, TopicCache};
use crate::error::ServiceError;
use crate::events::{EventKind, EventSink};
use crate::model::{TopicDetail, TopicInfo, TopicStatistic};
use crate::stats::{StatsProvider, STATS_DEADLINE};
use crate::store::{ListQuery, Store};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

/// How long a loser of the miss lock waits before re-reading the cache.
const FILL_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Delay before the write path's second invalidation.
const SECOND_INVALIDATE_DELAY: Duration = Duration::from_millis(200);

/// Total wall-clock budget for second-invalidation retries.
const SECOND_INVALIDATE_BUDGET: Duration = Duration::from_secs(60);

pub struct Engine {
    store: Store,
    cache: Arc<dyn TopicCache>,
    stats: Arc<dyn StatsProvider>,
    events: Arc<dyn EventSink>,
}

impl Engine {
    pub fn new(
        store: Store,
        cache: Arc<dyn TopicCache>,
        stats: Arc<dyn StatsProvider>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            cache,
            stats,
            events,
        }
    }

    /// Read-through lookup.
    ///
    /// The existence filter screens the ids first; surviving ids read from
    /// the cache, and misses fall through to the store under the per-id
    /// miss lock. When `with_stats` is set the statistics fetch runs
    /// alongside the cache path and is joined before returning.
    ///
    /// Behavior enrichment is not supported here: the cache key carries no
    /// user identity. Callers needing it use `lookup_by_ids_no_cache`.
    pub async fn lookup_by_ids(
        &self,
        ids: &[i64],
        with_stats: bool,
        with_behavior: bool,
        _user_id: &str,
    ) -> Result<(HashMap<i64, TopicInfo>, HashMap<i64, TopicStatistic>), ServiceError> {
        if with_behavior {
            return Err(ServiceError::InvalidArgument(
                "behavior enrichment requires the uncached lookup".into(),
            ));
        }

        let candidates = self.cache.get_bits(ids).await?;
        if candidates.is_empty() {
            return Err(ServiceError::NotFound);
        }

        let stats_task = with_stats.then(|| {
            let provider = self.stats.clone();
            let stat_ids = candidates.clone();
            tokio::spawn(async move {
                timeout(STATS_DEADLINE, provider.topic_statistics(&stat_ids)).await
            })
        });

        let mut found = self.cache.get_topics(&candidates).await?;
        let missing: Vec<i64> = candidates
            .iter()
            .copied()
            .filter(|id| !found.contains_key(id))
            .collect();

        let mut owned = Vec::new();
        let mut deferred = Vec::new();
        for id in missing {
            match self.cache.try_lock(LockKey::TopicFill(id)).await {
                Ok(true) => owned.push(id),
                Ok(false) => deferred.push(id),
                // a failed acquisition defers like a contended one
                Err(err) => {
                    tracing::warn!("miss lock for {id}: {err}");
                    deferred.push(id);
                }
            }
        }

        let outcome = self
            .fill_missing(&mut found, &mut owned, deferred)
            .await;

        // release every miss lock we touched; foreign-held ones survive the
        // compare-and-delete
        for id in &owned {
            if let Err(err) = self.cache.unlock(LockKey::TopicFill(*id)).await {
                tracing::warn!("release miss lock for {id}: {err}");
            }
        }
        outcome?;

        let statistics = match stats_task {
            Some(handle) => match handle.await {
                Ok(Ok(Ok(map))) => map,
                Ok(Ok(Err(err))) => return Err(err),
                Ok(Err(_)) => {
                    return Err(ServiceError::Unavailable(
                        "analytics deadline exceeded".into(),
                    ))
                }
                Err(err) => return Err(ServiceError::internal(err)),
            },
            None => HashMap::new(),
        };

        Ok((found, statistics))
    }

    /// Deferred re-read plus store fallthrough for the final owner set.
    async fn fill_missing(
        &self,
        found: &mut HashMap<i64, TopicInfo>,
        owned: &mut Vec<i64>,
        deferred: Vec<i64>,
    ) -> Result<(), ServiceError> {
        if !deferred.is_empty() {
            // give the lock holder's fill a beat to land
            sleep(FILL_RETRY_DELAY).await;

            let refilled = self.cache.get_topics(&deferred).await?;
            for id in deferred {
                match refilled.get(&id) {
                    Some(info) => {
                        found.insert(id, info.clone());
                    }
                    // the holder's fill never landed; take the id over
                    None => owned.push(id),
                }
            }
        }

        if owned.is_empty() {
            return Ok(());
        }

        match self.store.get_by_ids(owned.as_slice(), false, "").await {
            Ok(infos) => {
                let fresh: Vec<TopicInfo> = infos.into_values().collect();
                self.cache.set_topics(&fresh).await?;
                for info in fresh {
                    found.insert(info.topic_detail.id, info);
                }
            }
            // filter false positives fall out of the result here
            Err(ServiceError::NotFound) => {}
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Store-and-statistics lookup that skips the cache entirely; the only
    /// path that can join per-user behavior rows.
    pub async fn lookup_by_ids_no_cache(
        &self,
        ids: &[i64],
        with_stats: bool,
        with_behavior: bool,
        user_id: &str,
    ) -> Result<(HashMap<i64, TopicInfo>, HashMap<i64, TopicStatistic>), ServiceError> {
        let infos_fut = self.store.get_by_ids(ids, with_behavior, user_id);

        if with_stats {
            let stats_fut = timeout(STATS_DEADLINE, self.stats.topic_statistics(ids));
            let (infos, statistics) = tokio::join!(infos_fut, stats_fut);
            let statistics = statistics
                .map_err(|_| ServiceError::Unavailable("analytics deadline exceeded".into()))??;
            Ok((infos?, statistics))
        } else {
            Ok((infos_fut.await?, HashMap::new()))
        }
    }

    /// Insert, register with the existence filter, announce. The filter bit
    /// is set under the topic's write lock; if that write fails the fresh
    /// row is rolled back so store and filter never durably disagree.
    pub async fn create_topic(&self, detail: TopicDetail) -> Result<i64, ServiceError> {
        let id = self.store.create_topic(detail).await?;

        with_lock(&self.cache, LockKey::Topic(id), || async {
            if let Err(filter_err) = self.cache.set_bits(&[id]).await {
                tracing::error!("existence filter for new topic {id}: {filter_err}");

                // compensate: the filter never learned this id
                let removed = self.store.delete_topics(&[id], false).await?;
                if removed != 1 {
                    return Err(ServiceError::internal(format!(
                        "create rollback removed {removed} rows for topic {id}"
                    )));
                }
                return Err(filter_err);
            }

            self.events.emit(EventKind::New, id);
            Ok(())
        })
        .await?;

        Ok(id)
    }

    /// Update under the per-id write lock.
    pub async fn update_topic(&self, detail: TopicDetail) -> Result<usize, ServiceError> {
        let id = detail.id;
        with_lock(&self.cache, LockKey::Topic(id), || async {
            self.apply_update(&detail).await
        })
        .await
    }

    /// Update body without taking the per-id lock; the caller holds it
    /// (the status reconciler reads and writes inside one acquisition).
    pub async fn update_topic_unlocked(&self, detail: &TopicDetail) -> Result<usize, ServiceError> {
        self.apply_update(detail).await
    }

    async fn apply_update(&self, detail: &TopicDetail) -> Result<usize, ServiceError> {
        self.cache.delete_topics(&[detail.id]).await?;

        let rows = self.store.update_topic(detail.clone()).await?;
        if rows != 1 {
            tracing::info!("update of topic {} affected {rows} rows", detail.id);
            return Ok(rows);
        }

        // the search index treats upserts as "new"
        self.events.emit(EventKind::New, detail.id);
        self.schedule_second_invalidate(detail.id);
        Ok(rows)
    }

    /// Cascading soft delete under the per-id write lock. The cache
    /// pre-delete is not strictly required (the store write is
    /// authoritative) but shrinks the stale window and mirrors the update
    /// shape.
    pub async fn delete_topic(&self, id: i64) -> Result<usize, ServiceError> {
        with_lock(&self.cache, LockKey::Topic(id), || async {
            self.cache.delete_topics(&[id]).await?;

            let rows = self.store.delete_topics(&[id], true).await?;
            if rows != 1 {
                return Err(ServiceError::internal(format!(
                    "delete of topic {id} affected {rows} rows"
                )));
            }

            self.events.emit(EventKind::Delete, id);
            self.schedule_second_invalidate(id);
            Ok(rows)
        })
        .await
    }

    /// Per-id deletion loop: two topics never share one critical section,
    /// and one failed id does not block the rest.
    pub async fn delete_topics(&self, ids: &[i64]) -> Result<usize, ServiceError> {
        let mut total = 0;
        for id in ids {
            match self.delete_topic(*id).await {
                Ok(rows) => total += rows,
                Err(err) => {
                    tracing::error!("delete topic {id}: {err}");
                    continue;
                }
            }
        }
        Ok(total)
    }

    /// Listing bypasses the cache; query variability makes caching
    /// uneconomical.
    pub async fn list(
        &self,
        query: ListQuery,
        with_stats: bool,
    ) -> Result<(Vec<TopicInfo>, i64, HashMap<i64, TopicStatistic>), ServiceError> {
        let (infos, total) = self.store.list(query).await?;

        let mut statistics = HashMap::new();
        if with_stats && !infos.is_empty() {
            let ids: Vec<i64> = infos.iter().map(|i| i.topic_detail.id).collect();
            statistics = timeout(STATS_DEADLINE, self.stats.topic_statistics(&ids))
                .await
                .map_err(|_| ServiceError::Unavailable("analytics deadline exceeded".into()))??;
        }

        Ok((infos, total, statistics))
    }

    pub async fn must_manual_audit(&self, titles: &[String]) -> Result<Vec<String>, ServiceError> {
        self.store.must_manual_audit(titles).await
    }

    pub async fn set_follow(
        &self,
        topic_id: i64,
        user_id: &str,
        follow: bool,
    ) -> Result<(), ServiceError> {
        if follow {
            self.store.create_following(topic_id, user_id).await
        } else {
            self.store.delete_following(topic_id, user_id).await
        }
    }

    /// Second invalidation, detached from the request: after 200 ms delete
    /// the key again, retrying with exponential backoff inside a 60 s
    /// budget. Absorbs a concurrent reader's pre-write cache refill.
    fn schedule_second_invalidate(&self, id: i64) {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            sleep(SECOND_INVALIDATE_DELAY).await;

            let deadline = Instant::now() + SECOND_INVALIDATE_BUDGET;
            let mut backoff = Duration::from_secs(1);
            loop {
                match cache.delete_topics(&[id]).await {
                    Ok(()) => return,
                    Err(err) => {
                        tracing::error!("second invalidation of topic {id}: {err}");
                    }
                }
                if Instant::now() >= deadline {
                    tracing::error!("second invalidation of topic {id} exhausted its budget");
                    return;
                }
                sleep(backoff).await;
                backoff *= 2;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCache;
    use crate::events::recording::RecordingEvents;
    use crate::stats::fixed::FixedStats;
    use crate::store::testutil::seed_fixtures;
    use std::sync::atomic::Ordering;

    struct Harness {
        engine: Engine,
        store: Store,
        cache: Arc<MemoryCache>,
        events: Arc<RecordingEvents>,
    }

    async fn harness() -> Harness {
        harness_with_stats(FixedStats::with(&[(1, 1, 2, 3)])).await
    }

    async fn harness_with_stats(stats: Arc<FixedStats>) -> Harness {
        let store = Store::open_in_memory().unwrap();
        seed_fixtures(&store).await;

        let cache = MemoryCache::new();
        let events = RecordingEvents::new();
        let engine = Engine::new(
            store.clone(),
            cache.clone(),
            stats,
            events.clone(),
        );
        // the fixtures exist before this cache did; register them
        cache.set_bits(&[1, 2, 3, 4, 5, 6]).await.unwrap();

        Harness {
            engine,
            store,
            cache,
            events,
        }
    }

    #[tokio::test]
    async fn lookup_unknown_id_is_not_found_before_the_store() {
        let h = harness().await;

        let err = h
            .engine
            .lookup_by_ids(&[14], false, false, "")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound));
    }

    #[tokio::test]
    async fn lookup_rejects_behavior_enrichment() {
        let h = harness().await;

        let err = h
            .engine
            .lookup_by_ids(&[1], false, true, "1")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_fills_cache_and_releases_miss_locks() {
        let h = harness().await;

        let (found, _) = h
            .engine
            .lookup_by_ids(&[1, 2, 3, 4, 5, 6], false, false, "")
            .await
            .unwrap();
        assert_eq!(found.len(), 6);
        assert_eq!(found[&1].topic_detail.title, "test_title_001");

        for id in 1..=6 {
            assert!(h.cache.contains(id));
            assert!(!h.cache.is_locked(LockKey::TopicFill(id)));
        }
    }

    #[tokio::test]
    async fn lookup_prefers_cached_entries() {
        let h = harness().await;

        let mut cached = TopicInfo::new(h.store.get_detail(1).await.unwrap());
        cached.topic_detail.desc = "from-the-cache".into();
        h.cache.plant(&cached);

        let (found, _) = h.engine.lookup_by_ids(&[1], false, false, "").await.unwrap();
        assert_eq!(found[&1].topic_detail.desc, "from-the-cache");
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_tolerates_filter_false_positives() {
        let h = harness().await;

        // bit set but no row behind it
        h.cache.set_bits(&[9]).await.unwrap();
        let (found, _) = h
            .engine
            .lookup_by_ids(&[1, 9], false, false, "")
            .await
            .unwrap();
        assert!(found.contains_key(&1));
        assert!(!found.contains_key(&9));
    }

    #[tokio::test(start_paused = true)]
    async fn contended_miss_waits_for_the_winners_fill() {
        let h = harness().await;

        // another instance holds the miss lock for 3 and fills shortly
        h.cache.seize_lock(LockKey::TopicFill(3));
        let cache = h.cache.clone();
        let winner_fill = TopicInfo::new(h.store.get_detail(3).await.unwrap());
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            cache.plant(&winner_fill);
        });

        let (found, _) = h.engine.lookup_by_ids(&[3], false, false, "").await.unwrap();
        assert_eq!(found[&3].topic_detail.id, 3);
        // we never owned the lock, so we never released the holder's
        assert!(h.cache.is_locked(LockKey::TopicFill(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn contended_miss_promotes_when_fill_never_lands() {
        let h = harness().await;

        h.cache.seize_lock(LockKey::TopicFill(3));

        let (found, _) = h.engine.lookup_by_ids(&[3], false, false, "").await.unwrap();
        assert_eq!(found[&3].topic_detail.id, 3);
        // promoted to owner: read the store and filled the cache itself
        assert!(h.cache.contains(3));
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_joins_statistics() {
        let h = harness().await;

        let (found, stats) = h
            .engine
            .lookup_by_ids(&[1, 2], true, false, "")
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(stats[&1].content_num, 1);
        assert_eq!(stats[&1].mp_num, 2);
        assert_eq!(stats[&1].content_exposure_num, 3);
        assert!(!stats.contains_key(&2));
    }

    #[tokio::test]
    async fn create_registers_with_filter_and_announces() {
        let h = harness().await;

        let id = h
            .engine
            .create_topic(crate::store::testutil::detail(
                "test_title_0013",
                3,
                crate::store::testutil::day(2021, 1, 1),
                crate::store::testutil::day(2021, 1, 3),
                false,
            ))
            .await
            .unwrap();
        assert!(id > 0);

        assert_eq!(h.cache.get_bits(&[id]).await.unwrap(), vec![id]);
        assert_eq!(h.events.emitted(), vec![(EventKind::New, id)]);
        assert!(!h.cache.is_locked(LockKey::Topic(id)));
    }

    #[tokio::test]
    async fn create_rolls_back_when_filter_write_fails() {
        let h = harness().await;
        h.cache.fail_set_bits.store(true, Ordering::SeqCst);

        let err = h
            .engine
            .create_topic(crate::store::testutil::detail(
                "test_title_0013",
                3,
                crate::store::testutil::day(2021, 1, 1),
                crate::store::testutil::day(2021, 1, 3),
                false,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable(_)));

        // the compensating delete hid the fresh row again
        let err = h.store.get_detail(7).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound));
        assert!(h.events.emitted().is_empty());
        assert!(!h.cache.is_locked(LockKey::Topic(7)));
    }

    #[tokio::test]
    async fn create_duplicate_title_propagates() {
        let h = harness().await;

        let err = h
            .engine
            .create_topic(crate::store::testutil::detail(
                "test_title_001",
                1,
                crate::store::testutil::day(2021, 1, 1),
                crate::store::testutil::day(2021, 1, 3),
                false,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NameDup));
        assert!(h.events.emitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn update_invalidates_twice_and_announces() {
        let h = harness().await;

        let mut topic = h.store.get_detail(1).await.unwrap();
        let pre_update = TopicInfo::new(topic.clone());
        topic.desc = "rewritten".into();

        assert_eq!(h.engine.update_topic(topic).await.unwrap(), 1);
        assert_eq!(h.events.emitted(), vec![(EventKind::New, 1)]);
        assert!(!h.cache.is_locked(LockKey::Topic(1)));

        // a concurrent reader refills with the pre-update snapshot...
        h.cache.plant(&pre_update);

        // ...and the delayed second invalidation clears it
        sleep(Duration::from_millis(300)).await;
        assert!(!h.cache.contains(1));
    }

    #[tokio::test]
    async fn update_of_missing_topic_affects_nothing() {
        let h = harness().await;

        let mut topic = h.store.get_detail(1).await.unwrap();
        topic.id = 42;
        assert_eq!(h.engine.update_topic(topic).await.unwrap(), 0);
        assert!(h.events.emitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_announces_and_clears() {
        let h = harness().await;

        assert_eq!(h.engine.delete_topic(1).await.unwrap(), 1);
        assert_eq!(h.events.emitted(), vec![(EventKind::Delete, 1)]);
        assert!(matches!(
            h.store.get_detail(1).await.unwrap_err(),
            ServiceError::NotFound
        ));
        assert!(!h.cache.is_locked(LockKey::Topic(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_delete_continues_past_failures() {
        let h = harness().await;

        let total = h.engine.delete_topics(&[1, 42, 2]).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(
            h.events.emitted(),
            vec![(EventKind::Delete, 1), (EventKind::Delete, 2)]
        );
    }

    #[tokio::test]
    async fn list_with_statistics() {
        let h = harness().await;

        let (infos, total, stats) = h
            .engine
            .list(
                ListQuery {
                    sort_by: crate::store::SortBy::SortNum,
                    order: crate::store::SortOrder::Asc,
                    limit: -1,
                    ..ListQuery::default()
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(total, 6);
        assert_eq!(infos.len(), 6);
        assert_eq!(stats[&1].content_num, 1);
    }

    #[tokio::test]
    async fn no_cache_lookup_joins_behavior() {
        let h = harness().await;

        let (found, _) = h
            .engine
            .lookup_by_ids_no_cache(&[1, 2], false, true, "1")
            .await
            .unwrap();
        assert!(found[&1].topic_user_behavior.is_some());
        assert!(found[&2].topic_user_behavior.is_none());
        // nothing landed in the cache on this path
        assert!(!h.cache.contains(1));
    }
}
