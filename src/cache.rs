// Cache adapter - pipelined value cache, distributed lock, existence filter
//
// Three cooperating facilities on one clustered key-value store:
//   values   <prefix>:topic:<id>              JSON TopicInfo, jittered TTL
//   locks    <prefix>:lock:topic:<id>         per-id writer lock
//            <prefix>:lockGetsByTiDB:topic:<id>   per-id cache-miss lock
//            <prefix>:lock:<job>              fleet-wide job singleflight
//   filter   <prefix>:bitMap:topic:<part>     append-only existence bitmap
//
// The existence filter only ever gains bits. A false positive costs one
// store miss; clearing a bit could hide real data.

use crate::error::ServiceError;
use crate::model::TopicInfo;
use async_trait::async_trait;
use rand::Rng;
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Fleet-wide singleflight lock names for the scheduled jobs.
pub const JOB_UPDATE_STATUS: &str = "updateTopicStatus";
pub const JOB_UPDATE_STATISTIC: &str = "updateTopicStatistic";

/// A key in the lock keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKey {
    /// Per-id writer lock (serializes the write path).
    Topic(i64),
    /// Per-id cache-miss lock (collapses concurrent store fills).
    TopicFill(i64),
    /// Named job lock (one reconciler run per fleet per tick).
    Job(&'static str),
}

/// Cache key construction under the configured prefix.
#[derive(Debug, Clone)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn topic(&self, id: i64) -> String {
        format!("{}:topic:{}", self.prefix, id)
    }

    pub fn lock(&self, key: LockKey) -> String {
        match key {
            LockKey::Topic(id) => format!("{}:lock:topic:{}", self.prefix, id),
            LockKey::TopicFill(id) => format!("{}:lockGetsByTiDB:topic:{}", self.prefix, id),
            LockKey::Job(name) => format!("{}:lock:{}", self.prefix, name),
        }
    }

    pub fn bitmap(&self, part: i64) -> String {
        format!("{}:bitMap:topic:{}", self.prefix, part)
    }
}

/// Shard an id into its bitmap key part and bit offset.
///
/// Offsets are `id mod 10^8`, so each shard stays within 10^8 bits
/// (12.5 MB). Ids below 10^8 all land in the sentinel shard 100, which no
/// `(id mod 10^10) div 10^8` value can produce for larger ids.
pub fn bitmap_location(id: i64) -> (i64, u64) {
    let sub = id % 10_000_000_000;
    let part = if sub >= 100_000_000 {
        sub / 100_000_000
    } else {
        100
    };
    (part, (id % 100_000_000) as u64)
}

/// Per-entry TTL drawn uniformly from [10h, 30h) so a bulk fill cannot
/// expire in one synchronized wave.
pub fn jittered_ttl() -> Duration {
    let hours: u64 = rand::rng().random_range(10..30);
    Duration::from_secs(hours * 3600)
}

/// The cache operations the coherence engine is written against.
#[async_trait]
pub trait TopicCache: Send + Sync {
    /// Pipelined read; ids without a cache entry are simply absent from the
    /// result.
    async fn get_topics(&self, ids: &[i64]) -> Result<HashMap<i64, TopicInfo>, ServiceError>;

    /// Pipelined fill with per-entry TTL jitter.
    async fn set_topics(&self, infos: &[TopicInfo]) -> Result<(), ServiceError>;

    /// Pipelined invalidation of value entries.
    async fn delete_topics(&self, ids: &[i64]) -> Result<(), ServiceError>;

    /// Set-if-absent with the configured TTL. Ok(false) means another
    /// holder owns the lock.
    async fn try_lock(&self, key: LockKey) -> Result<bool, ServiceError>;

    /// Compare-and-delete against this process's owner token. Failing to
    /// release is not fatal; the TTL reclaims stale locks.
    async fn unlock(&self, key: LockKey) -> Result<(), ServiceError>;

    /// Mark ids as existing. Bits are never cleared.
    async fn set_bits(&self, ids: &[i64]) -> Result<(), ServiceError>;

    /// The subset of ids whose existence bit is set.
    async fn get_bits(&self, ids: &[i64]) -> Result<Vec<i64>, ServiceError>;
}

/// Scoped lock acquisition: `f` runs only if the lock is taken, and release
/// is attempted on every exit path. A panic inside `f` releases from the
/// guard; the TTL is the final safety net.
pub async fn with_lock<T, F, Fut>(
    cache: &Arc<dyn TopicCache>,
    key: LockKey,
    f: F,
) -> Result<T, ServiceError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, ServiceError>>,
{
    if !cache.try_lock(key).await? {
        return Err(ServiceError::internal(format!(
            "lock contended: {key:?}"
        )));
    }

    let mut guard = LockGuard {
        cache: cache.clone(),
        key,
        armed: true,
    };
    let out = f().await;
    guard.armed = false;

    if let Err(err) = cache.unlock(key).await {
        tracing::warn!("unlock {key:?} failed: {err}");
    }
    out
}

struct LockGuard {
    cache: Arc<dyn TopicCache>,
    key: LockKey,
    armed: bool,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.armed {
            let cache = self.cache.clone();
            let key = self.key;
            tokio::spawn(async move {
                if let Err(err) = cache.unlock(key).await {
                    tracing::warn!("unlock {key:?} after unwind failed: {err}");
                }
            });
        }
    }
}

const UNLOCK_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1]
then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

/// Production cache over a clustered key-value store.
pub struct RedisCache {
    conn: ClusterConnection,
    keys: Keys,
    lock_ttl_secs: u64,
    /// Owner token for compare-and-delete unlock, generated once per process.
    owner: String,
}

impl RedisCache {
    pub async fn connect(
        nodes: &[String],
        password: &str,
        prefix: &str,
        lock_ttl_secs: u64,
    ) -> anyhow::Result<Self> {
        let mut builder = ClusterClientBuilder::new(nodes.iter().cloned());
        if !password.is_empty() {
            builder = builder.password(password.to_string());
        }
        let client = builder.build()?;
        let conn = client.get_async_connection().await?;

        let owner = uuid::Uuid::new_v4().to_string();
        tracing::info!("cache lock owner token: {owner}");

        Ok(Self {
            conn,
            keys: Keys::new(prefix),
            lock_ttl_secs,
            owner,
        })
    }
}

#[async_trait]
impl TopicCache for RedisCache {
    async fn get_topics(&self, ids: &[i64]) -> Result<HashMap<i64, TopicInfo>, ServiceError> {
        let mut found = HashMap::new();
        if ids.is_empty() {
            return Ok(found);
        }

        let mut pipe = redis::pipe();
        for id in ids {
            pipe.get(self.keys.topic(*id));
        }
        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = pipe
            .query_async(&mut conn)
            .await
            .map_err(ServiceError::internal)?;

        for entry in raw.into_iter().flatten() {
            match serde_json::from_str::<TopicInfo>(&entry) {
                Ok(info) => {
                    found.insert(info.topic_detail.id, info);
                }
                Err(err) => {
                    tracing::error!("undecodable cache entry dropped: {err}");
                }
            }
        }
        Ok(found)
    }

    async fn set_topics(&self, infos: &[TopicInfo]) -> Result<(), ServiceError> {
        if infos.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for info in infos {
            let payload = serde_json::to_string(info).map_err(ServiceError::internal)?;
            pipe.set_ex(
                self.keys.topic(info.topic_detail.id),
                payload,
                jittered_ttl().as_secs(),
            )
            .ignore();
        }
        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(ServiceError::internal)
    }

    async fn delete_topics(&self, ids: &[i64]) -> Result<(), ServiceError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for id in ids {
            pipe.del(self.keys.topic(*id)).ignore();
        }
        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(ServiceError::internal)
    }

    async fn try_lock(&self, key: LockKey) -> Result<bool, ServiceError> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(self.keys.lock(key))
            .arg(&self.owner)
            .arg("NX")
            .arg("EX")
            .arg(self.lock_ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(ServiceError::internal)?;
        Ok(acquired.is_some())
    }

    async fn unlock(&self, key: LockKey) -> Result<(), ServiceError> {
        let mut conn = self.conn.clone();
        let released: i64 = redis::Script::new(UNLOCK_SCRIPT)
            .key(self.keys.lock(key))
            .arg(&self.owner)
            .invoke_async(&mut conn)
            .await
            .map_err(ServiceError::internal)?;
        if released == 0 {
            // expired or foreign-owned; the TTL already did the work
            tracing::info!("unlock {key:?}: nothing to release");
        }
        Ok(())
    }

    async fn set_bits(&self, ids: &[i64]) -> Result<(), ServiceError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for id in ids {
            if *id == 0 {
                return Err(ServiceError::InvalidArgument("zero id in bitmap".into()));
            }
            let (part, offset) = bitmap_location(*id);
            pipe.setbit(self.keys.bitmap(part), offset as usize, true)
                .ignore();
        }
        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(ServiceError::internal)
    }

    async fn get_bits(&self, ids: &[i64]) -> Result<Vec<i64>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in ids {
            if *id == 0 {
                return Err(ServiceError::InvalidArgument("zero id in bitmap".into()));
            }
            let (part, offset) = bitmap_location(*id);
            pipe.getbit(self.keys.bitmap(part), offset as usize);
        }
        let mut conn = self.conn.clone();
        let bits: Vec<i64> = pipe
            .query_async(&mut conn)
            .await
            .map_err(ServiceError::internal)?;

        Ok(ids
            .iter()
            .zip(bits)
            .filter(|(_, bit)| *bit == 1)
            .map(|(id, _)| *id)
            .collect())
    }
}
