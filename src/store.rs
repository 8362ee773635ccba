// Store adapter - typed operations on the authoritative relational store
//
// Soft deletes never remove rows: a delete stamps `deleted_at` and folds the
// deletion unix time into the `uniq` column, so the UNIQUE index keeps
// enforcing at-most-one *live* row per title without reserving the titles of
// dead rows. Every read filters on `deleted_at IS NULL`.
//
// All SQLite work runs on the blocking pool; the async methods are thin
// spawn_blocking bridges over a shared r2d2 pool.

use crate::error::ServiceError;
use crate::model::{self, TopicDetail, TopicInfo, TopicStatus, TopicUserBehavior};
use chrono::{DateTime, TimeZone, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction};
use std::collections::HashMap;
use std::path::Path;

/// Page size applied when a zero limit is requested.
const DEFAULT_PAGE_SIZE: i64 = 20;

const DETAIL_COLUMNS: &str = "id, created_at, updated_at, deleted_at, title, bg_pic, avatar, \
     sort, \"desc\", catalogue, start_at, end_at, manual_audit, status";

const BEHAVIOR_COLUMNS: &str = "id, created_at, updated_at, deleted_at, topic_id, user_id";

/// Secondary sort key for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    /// `sort` column, with `created_at DESC` as tiebreaker.
    SortNum,
    /// Schedule start instant.
    #[default]
    StartAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filter on whether the topic window covers the current instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EffectStatus {
    #[default]
    Any,
    Effective,
    Ineffective,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManualAuditFilter {
    #[default]
    Any,
    True,
    False,
}

/// Predicates, ordering and paging for `Store::list`.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Substring match on title.
    pub keyword: Option<String>,
    /// Exact-in set on title.
    pub keywords_exact: Vec<String>,
    pub sort_by: SortBy,
    pub order: SortOrder,
    pub offset: i64,
    /// 0 = default page size, -1 = unlimited.
    pub limit: i64,
    /// Windows intersecting [a, b]: starts inside it, or spans its left edge.
    pub range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub effect_status: EffectStatus,
    /// Only rows created before today's local midnight.
    pub exclude_today: bool,
    pub manual_audit: ManualAuditFilter,
    /// Prepend `status ASC` as the primary sort.
    pub status_sort: bool,
    pub with_behavior: bool,
    pub user_id: String,
}

/// Connection pool snapshot for the periodic utilization log.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub connections: u32,
    pub idle: u32,
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path, pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
        });
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;
        Ok(Self { pool })
    }

    /// In-memory store for tests. A single pooled connection keeps every
    /// caller on the same database.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())?;
        Ok(Self { pool })
    }

    /// Create the schema. Only the `migrate` entrypoint runs this; `serve`
    /// expects the tables to exist.
    pub async fn migrate(&self) -> Result<(), ServiceError> {
        self.call(|conn| {
            conn.execute_batch(SCHEMA).map_err(ServiceError::internal)?;
            Ok(())
        })
        .await
    }

    pub fn pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections: state.connections,
            idle: state.idle_connections,
        }
    }

    /// Run a closure against a pooled connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&mut Connection) -> Result<T, ServiceError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(ServiceError::internal)?;
            f(&mut conn)
        })
        .await
        .map_err(ServiceError::internal)?
    }

    /// Insert a new topic; `uniq` starts as the live title. A `uniq`
    /// collision means another live topic already owns the title.
    pub async fn create_topic(&self, detail: TopicDetail) -> Result<i64, ServiceError> {
        if detail.title.len() > 255 {
            return Err(ServiceError::InvalidArgument("title too long".into()));
        }

        self.call(move |conn| {
            let now = Utc::now().timestamp();
            conn.execute(
                "INSERT INTO topic_details \
                     (created_at, updated_at, title, bg_pic, avatar, sort, \"desc\", \
                      catalogue, start_at, end_at, manual_audit, status, uniq) \
                 VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?2)",
                params![
                    now,
                    detail.title,
                    detail.bg_pic,
                    detail.avatar,
                    detail.sort,
                    detail.desc,
                    detail.catalogue,
                    detail.start_at.timestamp(),
                    detail.end_at.timestamp(),
                    detail.manual_audit,
                    detail.status.as_i64(),
                ],
            )
            .map_err(classify_dup)?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Transactional update: the title leg renames (cascading a soft delete
    /// of the topic's follow rows when the title actually changed), the core
    /// leg rewrites the content columns. Returns rows affected.
    pub async fn update_topic(&self, detail: TopicDetail) -> Result<usize, ServiceError> {
        if detail.id == 0 {
            return Err(ServiceError::InvalidArgument(
                "primary key unspecified".into(),
            ));
        }
        if detail.title.len() > 255 {
            return Err(ServiceError::InvalidArgument("title too long".into()));
        }

        self.call(move |conn| {
            let tx = conn.transaction().map_err(ServiceError::internal)?;
            let now = Utc::now().timestamp();

            let title_rows = update_title_and_cascade(&tx, &detail, now)?;
            let core_rows = update_core(&tx, &detail, now)?;

            tx.commit().map_err(ServiceError::internal)?;
            Ok(if title_rows != 0 { title_rows } else { core_rows })
        })
        .await
    }

    /// Soft-delete topics by id; with `cascade`, their live follow rows are
    /// tombstoned in the same transaction. Returns rows affected.
    pub async fn delete_topics(&self, ids: &[i64], cascade: bool) -> Result<usize, ServiceError> {
        if ids.is_empty() {
            return Ok(0);
        }
        if ids.contains(&0) {
            return Err(ServiceError::InvalidArgument(
                "primary key unspecified in id list".into(),
            ));
        }

        let ids = ids.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction().map_err(ServiceError::internal)?;
            let now = Utc::now().timestamp();

            let rows = tx
                .execute(
                    &format!(
                        "UPDATE topic_details \
                         SET deleted_at = ?, updated_at = ?, uniq = title || '-' || ? \
                         WHERE id IN ({}) AND deleted_at IS NULL",
                        repeat_vars(ids.len())
                    ),
                    params_from_iter(
                        std::iter::repeat(Value::from(now))
                            .take(3)
                            .chain(ids.iter().map(|id| Value::from(*id))),
                    ),
                )
                .map_err(ServiceError::internal)?;

            if cascade && rows != 0 {
                tx.execute(
                    &format!(
                        "UPDATE topic_user_behaviors \
                         SET deleted_at = ?, updated_at = ?, \
                             uniq = topic_id || '-' || user_id || '-' || ? \
                         WHERE topic_id IN ({}) AND deleted_at IS NULL",
                        repeat_vars(ids.len())
                    ),
                    params_from_iter(
                        std::iter::repeat(Value::from(now))
                            .take(3)
                            .chain(ids.iter().map(|id| Value::from(*id))),
                    ),
                )
                .map_err(ServiceError::internal)?;
            }

            tx.commit().map_err(ServiceError::internal)?;
            Ok(rows)
        })
        .await
    }

    /// Fetch live topics by id, optionally joining the caller's follow rows.
    /// An entirely empty result is `NotFound`.
    pub async fn get_by_ids(
        &self,
        ids: &[i64],
        with_behavior: bool,
        user_id: &str,
    ) -> Result<HashMap<i64, TopicInfo>, ServiceError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        if ids.contains(&0) {
            return Err(ServiceError::InvalidArgument(
                "primary key unspecified in id list".into(),
            ));
        }
        if with_behavior && user_id.is_empty() {
            return Err(ServiceError::InvalidArgument("user id unspecified".into()));
        }

        let ids = ids.to_vec();
        let user_id = user_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {DETAIL_COLUMNS} FROM topic_details \
                     WHERE id IN ({}) AND deleted_at IS NULL",
                    repeat_vars(ids.len())
                ))
                .map_err(ServiceError::internal)?;
            let details = stmt
                .query_map(
                    params_from_iter(ids.iter().map(|id| Value::from(*id))),
                    row_to_detail,
                )
                .map_err(ServiceError::internal)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(ServiceError::internal)?;

            if details.is_empty() {
                return Err(ServiceError::NotFound);
            }

            let mut infos: HashMap<i64, TopicInfo> = details
                .into_iter()
                .map(|d| (d.id, TopicInfo::new(d)))
                .collect();

            if with_behavior {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {BEHAVIOR_COLUMNS} FROM topic_user_behaviors \
                         WHERE topic_id IN ({}) AND user_id = ? AND deleted_at IS NULL",
                        repeat_vars(ids.len())
                    ))
                    .map_err(ServiceError::internal)?;
                let behaviors = stmt
                    .query_map(
                        params_from_iter(
                            ids.iter()
                                .map(|id| Value::from(*id))
                                .chain(std::iter::once(Value::from(user_id.clone()))),
                        ),
                        row_to_behavior,
                    )
                    .map_err(ServiceError::internal)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(ServiceError::internal)?;
                for behavior in behaviors {
                    if let Some(info) = infos.get_mut(&behavior.topic_id) {
                        info.topic_user_behavior = Some(behavior);
                    }
                }
            }

            Ok(infos)
        })
        .await
    }

    /// Fetch one live topic. `NotFound` when missing or deleted.
    pub async fn get_detail(&self, id: i64) -> Result<TopicDetail, ServiceError> {
        if id == 0 {
            return Err(ServiceError::InvalidArgument(
                "primary key unspecified".into(),
            ));
        }

        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {DETAIL_COLUMNS} FROM topic_details \
                     WHERE id = ?1 AND deleted_at IS NULL"
                ),
                params![id],
                row_to_detail,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => ServiceError::NotFound,
                other => ServiceError::internal(other),
            })
        })
        .await
    }

    /// Filtered, ordered, paged listing. Returns the page plus the total
    /// count of rows matching the predicates.
    pub async fn list(&self, query: ListQuery) -> Result<(Vec<TopicInfo>, i64), ServiceError> {
        if query.with_behavior && query.user_id.is_empty() {
            return Err(ServiceError::InvalidArgument("user id unspecified".into()));
        }

        self.call(move |conn| {
            let mut clauses = vec!["deleted_at IS NULL".to_string()];
            let mut args: Vec<Value> = Vec::new();

            if let Some(keyword) = query.keyword.as_deref().map(str::trim) {
                if !keyword.is_empty() {
                    clauses.push("(title LIKE ?)".into());
                    args.push(Value::from(format!("%{keyword}%")));
                }
            }

            if !query.keywords_exact.is_empty() {
                clauses.push(format!(
                    "title IN ({})",
                    repeat_vars(query.keywords_exact.len())
                ));
                args.extend(query.keywords_exact.iter().cloned().map(Value::from));
            }

            let now = Utc::now();
            match query.effect_status {
                EffectStatus::Effective => {
                    clauses.push("(end_at >= ? AND start_at <= ?)".into());
                    args.push(Value::from(now.timestamp()));
                    args.push(Value::from(now.timestamp()));
                }
                EffectStatus::Ineffective => {
                    clauses.push("(end_at < ?)".into());
                    args.push(Value::from(now.timestamp()));
                }
                EffectStatus::Any => {}
            }

            if query.exclude_today {
                clauses.push("(created_at < ?)".into());
                args.push(Value::from(model::start_of_day(now).timestamp()));
            }

            match query.manual_audit {
                ManualAuditFilter::True => clauses.push("(manual_audit = 1)".into()),
                ManualAuditFilter::False => clauses.push("(manual_audit = 0)".into()),
                ManualAuditFilter::Any => {}
            }

            if let Some((range_start, range_end)) = query.range {
                clauses.push(
                    "((start_at >= ? AND start_at <= ?) OR (start_at <= ? AND end_at >= ?))"
                        .into(),
                );
                args.push(Value::from(range_start.timestamp()));
                args.push(Value::from(range_end.timestamp()));
                args.push(Value::from(range_start.timestamp()));
                args.push(Value::from(range_start.timestamp()));
            }

            let where_sql = clauses.join(" AND ");
            let order_sql = order_clause(&query);

            let total: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM topic_details WHERE {where_sql}"),
                    params_from_iter(args.iter().cloned()),
                    |row| row.get(0),
                )
                .map_err(ServiceError::internal)?;

            let mut select_sql = format!(
                "SELECT {DETAIL_COLUMNS} FROM topic_details \
                 WHERE {where_sql} ORDER BY {order_sql}"
            );
            if query.limit != -1 {
                let limit = if query.limit == 0 {
                    DEFAULT_PAGE_SIZE
                } else {
                    query.limit
                };
                select_sql.push_str(" LIMIT ?");
                args.push(Value::from(limit));
                if query.offset != 0 {
                    select_sql.push_str(" OFFSET ?");
                    args.push(Value::from(query.offset));
                }
            }

            let mut stmt = conn.prepare(&select_sql).map_err(ServiceError::internal)?;
            let details = stmt
                .query_map(params_from_iter(args.iter().cloned()), row_to_detail)
                .map_err(ServiceError::internal)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(ServiceError::internal)?;

            let mut infos: Vec<TopicInfo> = details.into_iter().map(TopicInfo::new).collect();

            if query.with_behavior && !infos.is_empty() {
                let page_ids: Vec<i64> = infos.iter().map(|i| i.topic_detail.id).collect();
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {BEHAVIOR_COLUMNS} FROM topic_user_behaviors \
                         WHERE topic_id IN ({}) AND user_id = ? AND deleted_at IS NULL",
                        repeat_vars(page_ids.len())
                    ))
                    .map_err(ServiceError::internal)?;
                let behaviors = stmt
                    .query_map(
                        params_from_iter(
                            page_ids
                                .iter()
                                .map(|id| Value::from(*id))
                                .chain(std::iter::once(Value::from(query.user_id.clone()))),
                        ),
                        row_to_behavior,
                    )
                    .map_err(ServiceError::internal)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(ServiceError::internal)?;
                let mut by_topic: HashMap<i64, TopicUserBehavior> = behaviors
                    .into_iter()
                    .map(|b| (b.topic_id, b))
                    .collect();
                for info in &mut infos {
                    info.topic_user_behavior = by_topic.remove(&info.topic_detail.id);
                }
            }

            Ok((infos, total))
        })
        .await
    }

    /// Live rows whose stored status disagrees with the status function of
    /// the current clock.
    pub async fn list_pending_status_change(&self) -> Result<Vec<TopicDetail>, ServiceError> {
        self.call(|conn| {
            let now = Utc::now().timestamp();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {DETAIL_COLUMNS} FROM topic_details \
                     WHERE deleted_at IS NULL AND ( \
                        (end_at < ?1 AND status != ?2) \
                        OR (start_at > ?1 AND status != ?3) \
                        OR (start_at <= ?1 AND end_at >= ?1 AND status != ?4))",
                ))
                .map_err(ServiceError::internal)?;
            let details = stmt
                .query_map(
                    params![
                        now,
                        TopicStatus::Ended.as_i64(),
                        TopicStatus::NotStarted.as_i64(),
                        TopicStatus::InProcess.as_i64(),
                    ],
                    row_to_detail,
                )
                .map_err(ServiceError::internal)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(ServiceError::internal)?;
            Ok(details)
        })
        .await
    }

    /// Every live row, for the startup full sweep.
    pub async fn list_all(&self) -> Result<Vec<TopicDetail>, ServiceError> {
        self.call(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {DETAIL_COLUMNS} FROM topic_details WHERE deleted_at IS NULL"
                ))
                .map_err(ServiceError::internal)?;
            let details = stmt
                .query_map([], row_to_detail)
                .map_err(ServiceError::internal)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(ServiceError::internal)?;
            Ok(details)
        })
        .await
    }

    /// Of the given titles, the live ones flagged for manual review.
    pub async fn must_manual_audit(&self, titles: &[String]) -> Result<Vec<String>, ServiceError> {
        if titles.is_empty() {
            return Ok(Vec::new());
        }

        let titles = titles.to_vec();
        self.call(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT title FROM topic_details \
                     WHERE title IN ({}) AND manual_audit = 1 AND deleted_at IS NULL",
                    repeat_vars(titles.len())
                ))
                .map_err(ServiceError::internal)?;
            let found = stmt
                .query_map(
                    params_from_iter(titles.iter().cloned().map(Value::from)),
                    |row| row.get::<_, String>(0),
                )
                .map_err(ServiceError::internal)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(ServiceError::internal)?;
            Ok(found)
        })
        .await
    }

    /// Record a follow. A `uniq` collision means the user already follows.
    pub async fn create_following(&self, topic_id: i64, user_id: &str) -> Result<(), ServiceError> {
        if topic_id == 0 || user_id.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "primary key unspecified".into(),
            ));
        }

        let user_id = user_id.to_string();
        self.call(move |conn| {
            let now = Utc::now().timestamp();
            conn.execute(
                "INSERT INTO topic_user_behaviors \
                     (created_at, updated_at, topic_id, user_id, uniq) \
                 VALUES (?1, ?1, ?2, ?3, ?2 || '-' || ?3)",
                params![now, topic_id, user_id],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ServiceError::StatusConflict("already following".into())
                } else {
                    ServiceError::internal(e)
                }
            })?;
            Ok(())
        })
        .await
    }

    /// Soft-delete a follow. Nothing to delete means the user never followed.
    pub async fn delete_following(&self, topic_id: i64, user_id: &str) -> Result<(), ServiceError> {
        if topic_id == 0 || user_id.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "primary key unspecified".into(),
            ));
        }

        let user_id = user_id.to_string();
        self.call(move |conn| {
            let now = Utc::now().timestamp();
            let rows = conn
                .execute(
                    "UPDATE topic_user_behaviors \
                     SET deleted_at = ?1, updated_at = ?1, \
                         uniq = topic_id || '-' || user_id || '-' || ?1 \
                     WHERE topic_id = ?2 AND user_id = ?3 AND deleted_at IS NULL",
                    params![now, topic_id, user_id],
                )
                .map_err(ServiceError::internal)?;
            if rows == 0 {
                return Err(ServiceError::StatusConflict("not following".into()));
            }
            Ok(())
        })
        .await
    }
}

/// Title leg of the transactional update. The `title <>` guard keeps a
/// same-title update from tombstoning the topic's follow rows.
fn update_title_and_cascade(
    tx: &Transaction<'_>,
    detail: &TopicDetail,
    now: i64,
) -> Result<usize, ServiceError> {
    let rows = tx
        .execute(
            "UPDATE topic_details SET title = ?1, uniq = ?1, updated_at = ?2 \
             WHERE id = ?3 AND deleted_at IS NULL AND title <> ?1",
            params![detail.title, now, detail.id],
        )
        .map_err(classify_dup)?;

    if rows != 0 {
        tx.execute(
            "UPDATE topic_user_behaviors \
             SET deleted_at = ?1, updated_at = ?1, \
                 uniq = topic_id || '-' || user_id || '-' || ?1 \
             WHERE topic_id = ?2 AND deleted_at IS NULL",
            params![now, detail.id],
        )
        .map_err(ServiceError::internal)?;
    }

    Ok(rows)
}

/// Content leg of the transactional update.
fn update_core(
    tx: &Transaction<'_>,
    detail: &TopicDetail,
    now: i64,
) -> Result<usize, ServiceError> {
    tx.execute(
        "UPDATE topic_details \
         SET bg_pic = ?1, avatar = ?2, sort = ?3, \"desc\" = ?4, catalogue = ?5, \
             start_at = ?6, end_at = ?7, manual_audit = ?8, status = ?9, updated_at = ?10 \
         WHERE id = ?11 AND deleted_at IS NULL",
        params![
            detail.bg_pic,
            detail.avatar,
            detail.sort,
            detail.desc,
            detail.catalogue,
            detail.start_at.timestamp(),
            detail.end_at.timestamp(),
            detail.manual_audit,
            detail.status.as_i64(),
            now,
            detail.id,
        ],
    )
    .map_err(ServiceError::internal)
}

fn order_clause(query: &ListQuery) -> String {
    let mut order = String::new();
    if query.status_sort {
        order.push_str("status ASC, ");
    }
    let direction = match query.order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    match query.sort_by {
        SortBy::SortNum => {
            order.push_str(&format!("sort {direction}, created_at DESC"));
        }
        SortBy::StartAt => {
            order.push_str(&format!("start_at {direction}"));
        }
    }
    order
}

fn repeat_vars(count: usize) -> String {
    let mut vars = "?,".repeat(count);
    vars.pop();
    vars
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
}

fn classify_dup(err: rusqlite::Error) -> ServiceError {
    if is_unique_violation(&err) {
        ServiceError::NameDup
    } else {
        ServiceError::internal(err)
    }
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn row_to_detail(row: &Row<'_>) -> rusqlite::Result<TopicDetail> {
    Ok(TopicDetail {
        id: row.get(0)?,
        created_at: from_ts(row.get(1)?),
        updated_at: from_ts(row.get(2)?),
        deleted_at: row.get::<_, Option<i64>>(3)?.map(from_ts),
        title: row.get(4)?,
        bg_pic: row.get(5)?,
        avatar: row.get(6)?,
        sort: row.get(7)?,
        desc: row.get(8)?,
        catalogue: row.get(9)?,
        start_at: from_ts(row.get(10)?),
        end_at: from_ts(row.get(11)?),
        manual_audit: row.get(12)?,
        status: TopicStatus::from_i64(row.get(13)?),
    })
}

fn row_to_behavior(row: &Row<'_>) -> rusqlite::Result<TopicUserBehavior> {
    Ok(TopicUserBehavior {
        id: row.get(0)?,
        created_at: from_ts(row.get(1)?),
        updated_at: from_ts(row.get(2)?),
        deleted_at: row.get::<_, Option<i64>>(3)?.map(from_ts),
        topic_id: row.get(4)?,
        user_id: row.get(5)?,
    })
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS topic_details (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER,
    title TEXT NOT NULL,
    bg_pic TEXT NOT NULL DEFAULT '',
    avatar TEXT NOT NULL DEFAULT '',
    sort INTEGER NOT NULL DEFAULT 0,
    \"desc\" TEXT NOT NULL DEFAULT '',
    catalogue TEXT NOT NULL DEFAULT '',
    start_at INTEGER NOT NULL DEFAULT 0,
    end_at INTEGER NOT NULL DEFAULT 0,
    manual_audit INTEGER NOT NULL DEFAULT 0,
    status INTEGER NOT NULL DEFAULT 0,
    uniq TEXT NOT NULL UNIQUE
);
CREATE INDEX IF NOT EXISTS idx_topic_details_title ON topic_details (title);
CREATE INDEX IF NOT EXISTS idx_topic_details_created_at ON topic_details (created_at);
CREATE INDEX IF NOT EXISTS idx_topic_details_sort ON topic_details (sort);

CREATE TABLE IF NOT EXISTS topic_user_behaviors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER,
    topic_id INTEGER NOT NULL,
    user_id TEXT NOT NULL,
    uniq TEXT NOT NULL UNIQUE
);
CREATE INDEX IF NOT EXISTS idx_topic_user_behaviors_topic_user
    ON topic_user_behaviors (topic_id, user_id);
CREATE INDEX IF NOT EXISTS idx_topic_user_behaviors_user
    ON topic_user_behaviors (user_id);

CREATE TABLE IF NOT EXISTS topic_statistics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER,
    topic_id INTEGER NOT NULL,
    content_num INTEGER NOT NULL DEFAULT 0,
    mp_num INTEGER NOT NULL DEFAULT 0,
    content_exposure_num INTEGER NOT NULL DEFAULT 0,
    uniq TEXT NOT NULL UNIQUE
);
CREATE INDEX IF NOT EXISTS idx_topic_statistics_topic ON topic_statistics (topic_id);
";

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use chrono::TimeZone;

    /// A detail ready for insertion; id and row timestamps are assigned by
    /// the store.
    pub(crate) fn detail(
        title: &str,
        sort: i32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        manual_audit: bool,
    ) -> TopicDetail {
        TopicDetail {
            id: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
            title: title.to_string(),
            bg_pic: String::new(),
            avatar: String::new(),
            sort,
            desc: String::new(),
            catalogue: String::new(),
            start_at: start,
            end_at: end,
            manual_audit,
            status: TopicStatus::derive(Utc::now(), start, end),
        }
    }

    pub(crate) fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    /// The shared fixture set: topics 1..6 (`test_title_001`.. with sort =
    /// id), topic 1 audit-flagged and followed by users 1..3. Windows are
    /// chosen so the range [2020-11-15 00:00:01, 2020-11-20 00:00:01]
    /// matches exactly ids 3, 4, 5, 6.
    pub(crate) async fn seed_fixtures(store: &Store) {
        store.migrate().await.unwrap();

        let windows = [
            (day(2020, 10, 1), day(2020, 10, 5)),
            (day(2020, 12, 1), day(2020, 12, 5)),
            (day(2020, 11, 16), day(2020, 11, 18)),
            (day(2020, 11, 17), day(2020, 11, 19)),
            (day(2020, 11, 10), day(2020, 11, 16)),
            (day(2020, 11, 18), day(2020, 11, 21)),
        ];
        for (i, (start, end)) in windows.iter().enumerate() {
            let n = i as i32 + 1;
            let id = store
                .create_topic(detail(
                    &format!("test_title_{n:03}"),
                    n,
                    *start,
                    *end,
                    n == 1,
                ))
                .await
                .unwrap();
            assert_eq!(id, i64::from(n));
        }

        for user in ["1", "2", "3"] {
            store.create_following(1, user).await.unwrap();
        }

        // fixture rows predate any test run
        store
            .pool
            .get()
            .unwrap()
            .execute(
                "UPDATE topic_details SET created_at = ?1",
                params![day(2020, 9, 1).timestamp()],
            )
            .unwrap();
    }
}
