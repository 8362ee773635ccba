// Status reconciler and maintenance sweeps
//
// The stored status is a materialization of the status function; it drifts
// whenever a topic's window boundary passes between writes. The reconciler
// re-derives it from the wall clock: an incremental tick at midnight covers
// rows whose stored status disagrees, and a full sweep at startup covers
// everything. Each run holds the fleet-wide job lock so one instance works
// per tick, and each row transition holds that topic's write lock.

use crate::cache::{with_lock, LockKey, TopicCache, JOB_UPDATE_STATISTIC, JOB_UPDATE_STATUS};
use crate::engine::Engine;
use crate::error::ServiceError;
use crate::events::{EventKind, EventSink};
use crate::model::{TopicDetail, TopicStatus};
use crate::store::{ListQuery, SortOrder, Store};
use chrono::Utc;
use std::sync::Arc;

/// Page size for the warm-up and refresh sweeps.
const SWEEP_BATCH: i64 = 500;

pub struct Reconciler {
    store: Store,
    cache: Arc<dyn TopicCache>,
    events: Arc<dyn EventSink>,
    engine: Arc<Engine>,
}

impl Reconciler {
    pub fn new(
        store: Store,
        cache: Arc<dyn TopicCache>,
        events: Arc<dyn EventSink>,
        engine: Arc<Engine>,
    ) -> Self {
        Self {
            store,
            cache,
            events,
            engine,
        }
    }

    /// Incremental tick: transition only the rows whose stored status
    /// disagrees with the clock.
    pub async fn reconcile_status(&self) -> Result<(), ServiceError> {
        with_lock(&self.cache, LockKey::Job(JOB_UPDATE_STATUS), || async {
            let pending = self.store.list_pending_status_change().await?;
            tracing::info!("status reconciler: {} rows pending", pending.len());
            self.transition(pending).await;
            Ok(())
        })
        .await
    }

    /// Startup sweep: re-derive every live row.
    pub async fn reconcile_status_full(&self) -> Result<(), ServiceError> {
        with_lock(&self.cache, LockKey::Job(JOB_UPDATE_STATUS), || async {
            let all = self.store.list_all().await?;
            tracing::info!("full status sweep over {} rows", all.len());
            self.transition(all).await;
            Ok(())
        })
        .await
    }

    /// Per-row transition. The row is re-read inside its write lock so the
    /// recomputation sees the freshest window. One failed row never stops
    /// the sweep.
    async fn transition(&self, topics: Vec<TopicDetail>) {
        for topic in topics {
            let id = topic.id;
            let result = with_lock(&self.cache, LockKey::Topic(id), || async {
                let mut fresh = self.store.get_detail(id).await?;
                fresh.status = TopicStatus::derive(Utc::now(), fresh.start_at, fresh.end_at);
                self.engine.update_topic_unlocked(&fresh).await?;
                Ok(())
            })
            .await;

            if let Err(err) = result {
                tracing::error!("status transition for topic {id}: {err}");
                continue;
            }
        }
    }

    /// Existence-filter warm-up: page through the live topics and set every
    /// id's bit. Runs at startup to cover rows that predate the filter.
    pub async fn warm_existence_filter(&self) -> Result<(), ServiceError> {
        let mut offset = 0;
        loop {
            let (infos, total) = self
                .store
                .list(ListQuery {
                    order: SortOrder::Asc,
                    offset,
                    limit: SWEEP_BATCH,
                    exclude_today: true,
                    ..ListQuery::default()
                })
                .await?;
            if infos.is_empty() {
                break;
            }

            let ids: Vec<i64> = infos.iter().map(|i| i.topic_detail.id).collect();
            self.cache.set_bits(&ids).await?;
            tracing::info!(
                "existence filter warm-up: offset {offset}, batch {}, total {total}",
                ids.len()
            );

            offset += SWEEP_BATCH;
            if offset >= total {
                break;
            }
        }
        Ok(())
    }

    /// Daily sweep announcing every live topic so downstream
    /// statistics-dependent indexes refresh.
    pub async fn refresh_search_index(&self) -> Result<(), ServiceError> {
        with_lock(&self.cache, LockKey::Job(JOB_UPDATE_STATISTIC), || async {
            let mut offset = 0;
            loop {
                let (infos, total) = self
                    .store
                    .list(ListQuery {
                        order: SortOrder::Asc,
                        offset,
                        limit: SWEEP_BATCH,
                        exclude_today: true,
                        ..ListQuery::default()
                    })
                    .await?;
                if infos.is_empty() {
                    break;
                }

                for info in &infos {
                    self.events.emit(EventKind::New, info.topic_detail.id);
                }
                tracing::info!(
                    "search index refresh: offset {offset}, batch {}, total {total}",
                    infos.len()
                );

                offset += SWEEP_BATCH;
                if offset >= total {
                    break;
                }
            }
            Ok(())
        })
        .await
    }
}
