// RPC surface - unary JSON endpoints over the coherence engine
//
// Handlers do no business logic beyond admission normalization (schedule
// instants snapped to day boundaries, status derived from the raw request
// instants) and translating engine errors into in-band err_code/err_msg
// pairs. Transport-level failures are left to the framework for the truly
// unexpected.

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{ErrCode, ServiceError};
use crate::model::{self, CatalogueItem, TopicDetail, TopicInfo, TopicStatistic, TopicStatus};
use crate::store::{
    EffectStatus, ListQuery, ManualAuditFilter, SortBy, SortOrder,
};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Titles per MustManualAudit request.
const MANUAL_AUDIT_MAX_TITLES: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Whether the follow surface is switched on; off by default, the
    /// store paths underneath stay live.
    pub follow_enabled: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/topic/create", post(create_topic))
        .route("/api/topic/update", post(update_topic))
        .route("/api/topic/delete", post(delete_topics))
        .route("/api/topic/get", post(get_topics_by_ids))
        .route("/api/topic/list", post(list_topics))
        .route("/api/topic/hit-by-tag", post(hit_topic_by_tag))
        .route("/api/topic/must-manual-audit", post(must_manual_audit))
        .route("/api/topic/follow", post(topic_following))
        .with_state(state)
}

/// Bind and serve until the shutdown signal resolves.
pub async fn serve(
    config: &Config,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("rpc surface listening on {}", config.bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("rpc surface shut down");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TopicPayload {
    pub id: i64,
    pub title: String,
    pub bg_pic: String,
    pub avatar: String,
    pub sort: i32,
    pub desc: String,
    pub catalogue: Vec<CatalogueItem>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub manual_audit: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CreateTopicReq {
    pub data: TopicPayload,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateTopicResp {
    pub id: i64,
    pub err_code: ErrCode,
    pub err_msg: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct UpdateTopicReq {
    pub data: TopicPayload,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusResp {
    pub err_code: ErrCode,
    pub err_msg: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DelTopicByIdsReq {
    pub ids: Vec<i64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GetTopicByIdsReq {
    pub ids: Vec<i64>,
    pub with_statistics: bool,
    pub with_user_behavior: bool,
    pub user_id: String,
    pub without_cache: bool,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GetTopicByIdsResp {
    pub data: HashMap<i64, TopicInfoDto>,
    pub err_code: ErrCode,
    pub err_msg: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum SortByReq {
    #[serde(rename = "SORT_NUM")]
    SortNum,
    #[serde(rename = "CREATED_AT")]
    CreatedAt,
    #[default]
    #[serde(rename = "NONE_SORT_TYPE", alias = "NONE")]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum OrderByReq {
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
    #[default]
    #[serde(rename = "NONE_ORDER_TYPE", alias = "NONE")]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum EffectStatusReq {
    #[serde(rename = "EFFECT")]
    Effect,
    #[serde(rename = "INEFFECT")]
    Ineffect,
    #[default]
    #[serde(rename = "NONE")]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum ManualAuditReq {
    #[serde(rename = "TRUE")]
    True,
    #[serde(rename = "FALSE")]
    False,
    #[default]
    #[serde(rename = "NONE", alias = "ANY")]
    Any,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TopicListReq {
    pub keyword: String,
    pub sort_by: SortByReq,
    pub order_by: OrderByReq,
    pub offset: i64,
    pub limit: i64,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub effect_status: EffectStatusReq,
    pub with_statistics: bool,
    pub with_user_behavior: bool,
    pub user_id: String,
    pub manual_audit: ManualAuditReq,
    pub status_sort: bool,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TopicListResp {
    pub data: Vec<TopicInfoDto>,
    pub total: i64,
    pub err_code: ErrCode,
    pub err_msg: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct HitTopicByTagReq {
    pub tags: Vec<String>,
    pub with_statistics: bool,
    pub with_user_behavior: bool,
    pub user_id: String,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HitTopicByTagResp {
    pub topics: Vec<TopicInfoDto>,
    pub err_code: ErrCode,
    pub err_msg: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct MustManualAuditReq {
    pub topics: Vec<String>,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MustManualAuditResp {
    pub topics: Vec<String>,
    pub err_code: ErrCode,
    pub err_msg: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TopicFollowingReq {
    pub topic_id: i64,
    pub user_id: String,
    pub action: bool,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TopicDetailDto {
    pub id: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub title: String,
    pub bg_pic: String,
    pub manual_audit: bool,
    pub avatar: String,
    pub sort: i32,
    pub desc: String,
    pub catalogue: Vec<CatalogueItem>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub status: TopicStatus,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TopicStatisticDto {
    pub content_num: i64,
    pub mp_num: i64,
    pub content_exposure_num: i64,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserBehaviorDto {
    pub is_following: bool,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TopicInfoDto {
    pub detail: TopicDetailDto,
    pub statistic: TopicStatisticDto,
    pub user_behavior: UserBehaviorDto,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn create_topic(
    State(state): State<AppState>,
    Json(req): Json<CreateTopicReq>,
) -> Json<CreateTopicResp> {
    let detail = admit(&req.data);
    match state.engine.create_topic(detail).await {
        Ok(id) => Json(CreateTopicResp {
            id,
            ..CreateTopicResp::default()
        }),
        Err(err) => Json(CreateTopicResp {
            id: 0,
            err_code: err.code(),
            err_msg: err.to_string(),
        }),
    }
}

async fn update_topic(
    State(state): State<AppState>,
    Json(req): Json<UpdateTopicReq>,
) -> Json<StatusResp> {
    let detail = admit(&req.data);
    match state.engine.update_topic(detail).await {
        Ok(_) => Json(StatusResp::default()),
        Err(err) => Json(StatusResp {
            err_code: err.code(),
            err_msg: err.to_string(),
        }),
    }
}

async fn delete_topics(
    State(state): State<AppState>,
    Json(req): Json<DelTopicByIdsReq>,
) -> Json<StatusResp> {
    match state.engine.delete_topics(&req.ids).await {
        Ok(_) => Json(StatusResp::default()),
        Err(err) => Json(StatusResp {
            err_code: err.code(),
            err_msg: err.to_string(),
        }),
    }
}

async fn get_topics_by_ids(
    State(state): State<AppState>,
    Json(req): Json<GetTopicByIdsReq>,
) -> Json<GetTopicByIdsResp> {
    if req.ids.is_empty() {
        return Json(GetTopicByIdsResp::default());
    }

    let looked_up = if req.without_cache {
        state
            .engine
            .lookup_by_ids_no_cache(
                &req.ids,
                req.with_statistics,
                req.with_user_behavior,
                &req.user_id,
            )
            .await
    } else {
        state
            .engine
            .lookup_by_ids(
                &req.ids,
                req.with_statistics,
                req.with_user_behavior,
                &req.user_id,
            )
            .await
    };

    match looked_up {
        Ok((infos, statistics)) => Json(GetTopicByIdsResp {
            data: infos
                .into_iter()
                .map(|(id, info)| (id, info_dto(&info, &statistics)))
                .collect(),
            ..GetTopicByIdsResp::default()
        }),
        Err(err) => Json(GetTopicByIdsResp {
            err_code: err.code(),
            err_msg: err.to_string(),
            ..GetTopicByIdsResp::default()
        }),
    }
}

async fn list_topics(
    State(state): State<AppState>,
    Json(req): Json<TopicListReq>,
) -> Json<TopicListResp> {
    let query = ListQuery {
        keyword: Some(req.keyword.clone()),
        keywords_exact: Vec::new(),
        sort_by: sort_by(req.sort_by),
        order: sort_order(req.order_by),
        offset: req.offset,
        limit: req.limit,
        range: req.start_at.zip(req.end_at),
        effect_status: effect_status(req.effect_status),
        exclude_today: false,
        manual_audit: manual_audit(req.manual_audit),
        status_sort: req.status_sort,
        with_behavior: req.with_user_behavior,
        user_id: req.user_id.clone(),
    };

    match state.engine.list(query, req.with_statistics).await {
        Ok((infos, total, statistics)) => Json(TopicListResp {
            data: infos.iter().map(|i| info_dto(i, &statistics)).collect(),
            total,
            ..TopicListResp::default()
        }),
        Err(err) => Json(TopicListResp {
            err_code: err.code(),
            err_msg: err.to_string(),
            ..TopicListResp::default()
        }),
    }
}

/// A list with the exact-title set populated; tag hits are title hits.
async fn hit_topic_by_tag(
    State(state): State<AppState>,
    Json(req): Json<HitTopicByTagReq>,
) -> Json<HitTopicByTagResp> {
    let query = ListQuery {
        keywords_exact: req.tags.clone(),
        limit: -1,
        with_behavior: req.with_user_behavior,
        user_id: req.user_id.clone(),
        ..ListQuery::default()
    };

    match state.engine.list(query, req.with_statistics).await {
        Ok((infos, _, statistics)) => Json(HitTopicByTagResp {
            topics: infos.iter().map(|i| info_dto(i, &statistics)).collect(),
            ..HitTopicByTagResp::default()
        }),
        Err(err) => Json(HitTopicByTagResp {
            err_code: err.code(),
            err_msg: err.to_string(),
            ..HitTopicByTagResp::default()
        }),
    }
}

async fn must_manual_audit(
    State(state): State<AppState>,
    Json(req): Json<MustManualAuditReq>,
) -> Json<MustManualAuditResp> {
    if req.topics.len() > MANUAL_AUDIT_MAX_TITLES {
        let err = ServiceError::InvalidArgument(format!(
            "more than {MANUAL_AUDIT_MAX_TITLES} titles"
        ));
        return Json(MustManualAuditResp {
            err_code: err.code(),
            err_msg: err.to_string(),
            ..MustManualAuditResp::default()
        });
    }

    match state.engine.must_manual_audit(&req.topics).await {
        Ok(topics) => Json(MustManualAuditResp {
            topics,
            ..MustManualAuditResp::default()
        }),
        Err(err) => Json(MustManualAuditResp {
            err_code: err.code(),
            err_msg: err.to_string(),
            ..MustManualAuditResp::default()
        }),
    }
}

async fn topic_following(
    State(state): State<AppState>,
    Json(req): Json<TopicFollowingReq>,
) -> Json<StatusResp> {
    if !state.follow_enabled {
        let err = ServiceError::StatusConflict("follow temporarily disabled".into());
        return Json(StatusResp {
            err_code: err.code(),
            err_msg: err.to_string(),
        });
    }

    match state
        .engine
        .set_follow(req.topic_id, &req.user_id, req.action)
        .await
    {
        Ok(()) => Json(StatusResp::default()),
        Err(err) => Json(StatusResp {
            err_code: err.code(),
            err_msg: err.to_string(),
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Admission and projection
// ─────────────────────────────────────────────────────────────────────────────

/// Build the canonical record from a request payload: schedule instants are
/// snapped to day boundaries, while the admission status derives from the
/// raw instants (the reconciler corrects any drift later).
fn admit(payload: &TopicPayload) -> TopicDetail {
    let raw_start = payload.start_at.unwrap_or(DateTime::UNIX_EPOCH);
    let raw_end = payload.end_at.unwrap_or(DateTime::UNIX_EPOCH);
    let now = Utc::now();

    TopicDetail {
        id: payload.id,
        created_at: now,
        updated_at: now,
        deleted_at: None,
        title: payload.title.clone(),
        bg_pic: payload.bg_pic.clone(),
        avatar: payload.avatar.clone(),
        sort: payload.sort,
        desc: payload.desc.clone(),
        catalogue: serde_json::to_string(&payload.catalogue).unwrap_or_default(),
        start_at: model::start_of_day(raw_start),
        end_at: model::end_of_day(raw_end),
        manual_audit: payload.manual_audit,
        status: TopicStatus::derive(now, raw_start, raw_end),
    }
}

fn detail_dto(detail: &TopicDetail) -> TopicDetailDto {
    let catalogue = if detail.catalogue.is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&detail.catalogue).unwrap_or_else(|err| {
            tracing::error!(
                "stored catalogue for topic {} undecodable: {err}",
                detail.id
            );
            Vec::new()
        })
    };

    TopicDetailDto {
        id: detail.id,
        created_at: Some(detail.created_at),
        updated_at: Some(detail.updated_at),
        title: detail.title.clone(),
        bg_pic: detail.bg_pic.clone(),
        manual_audit: detail.manual_audit,
        avatar: detail.avatar.clone(),
        sort: detail.sort,
        desc: detail.desc.clone(),
        catalogue,
        start_at: Some(detail.start_at),
        end_at: Some(detail.end_at),
        status: detail.status,
    }
}

fn info_dto(info: &TopicInfo, statistics: &HashMap<i64, TopicStatistic>) -> TopicInfoDto {
    TopicInfoDto {
        detail: detail_dto(&info.topic_detail),
        statistic: statistics
            .get(&info.topic_detail.id)
            .map(|s| TopicStatisticDto {
                content_num: s.content_num,
                mp_num: s.mp_num,
                content_exposure_num: s.content_exposure_num,
            })
            .unwrap_or_default(),
        user_behavior: UserBehaviorDto {
            is_following: info.topic_user_behavior.is_some(),
        },
    }
}

fn sort_by(req: SortByReq) -> SortBy {
    match req {
        SortByReq::SortNum => SortBy::SortNum,
        // historical: the "created at" ordering actually follows start_at
        SortByReq::CreatedAt | SortByReq::None => SortBy::StartAt,
    }
}

fn sort_order(req: OrderByReq) -> SortOrder {
    match req {
        OrderByReq::Asc => SortOrder::Asc,
        OrderByReq::Desc | OrderByReq::None => SortOrder::Desc,
    }
}

fn effect_status(req: EffectStatusReq) -> EffectStatus {
    match req {
        EffectStatusReq::Effect => EffectStatus::Effective,
        EffectStatusReq::Ineffect => EffectStatus::Ineffective,
        EffectStatusReq::None => EffectStatus::Any,
    }
}

fn manual_audit(req: ManualAuditReq) -> ManualAuditFilter {
    match req {
        ManualAuditReq::True => ManualAuditFilter::True,
        ManualAuditReq::False => ManualAuditFilter::False,
        ManualAuditReq::Any => ManualAuditFilter::Any,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCache;
    use crate::cache::TopicCache;
    use crate::events::recording::RecordingEvents;
    use crate::stats::fixed::FixedStats;
    use crate::store::testutil::seed_fixtures;
    use crate::store::Store;
    use chrono::TimeZone;

    async fn state() -> AppState {
        let store = Store::open_in_memory().unwrap();
        seed_fixtures(&store).await;

        let cache = MemoryCache::new();
        cache.set_bits(&[1, 2, 3, 4, 5, 6]).await.unwrap();

        let engine = Arc::new(Engine::new(
            store,
            cache,
            FixedStats::with(&[(1, 1, 2, 3)]),
            RecordingEvents::new(),
        ));
        AppState {
            engine,
            follow_enabled: false,
        }
    }

    fn catalogue() -> Vec<CatalogueItem> {
        vec![
            CatalogueItem {
                key: "k1".into(),
                value: "v1".into(),
            },
            CatalogueItem {
                key: "k2".into(),
                value: "v2".into(),
            },
        ]
    }

    #[tokio::test]
    async fn create_with_duplicate_title() {
        let state = state().await;

        let resp = create_topic(
            State(state),
            Json(CreateTopicReq {
                data: TopicPayload {
                    title: "test_title_001".into(),
                    bg_pic: "test_BgPic_002".into(),
                    sort: 2,
                    catalogue: catalogue(),
                    ..TopicPayload::default()
                },
            }),
        )
        .await
        .0;

        assert_eq!(resp.err_code, ErrCode::NameDup);
    }

    #[tokio::test]
    async fn create_fresh_title() {
        let state = state().await;

        let resp = create_topic(
            State(state),
            Json(CreateTopicReq {
                data: TopicPayload {
                    title: "test_title_0013".into(),
                    bg_pic: "test_BgPic_003".into(),
                    sort: 3,
                    desc: "test".into(),
                    catalogue: catalogue(),
                    ..TopicPayload::default()
                },
            }),
        )
        .await
        .0;

        assert_eq!(resp.err_code, ErrCode::None);
        assert!(resp.id > 0);
    }

    #[tokio::test]
    async fn update_onto_existing_title() {
        let state = state().await;

        let resp = update_topic(
            State(state),
            Json(UpdateTopicReq {
                data: TopicPayload {
                    id: 1,
                    title: "test_title_002".into(),
                    bg_pic: "test_BgPic_002".into(),
                    sort: 2,
                    catalogue: catalogue(),
                    ..TopicPayload::default()
                },
            }),
        )
        .await
        .0;

        assert_eq!(resp.err_code, ErrCode::NameDup);
    }

    #[tokio::test(start_paused = true)]
    async fn update_ok_normalizes_schedule() {
        let state = state().await;

        let resp = update_topic(
            State(state.clone()),
            Json(UpdateTopicReq {
                data: TopicPayload {
                    id: 1,
                    title: "test_title_0013".into(),
                    sort: 3,
                    desc: "test01".into(),
                    start_at: Some(Utc.with_ymd_and_hms(2021, 3, 8, 10, 30, 0).unwrap()),
                    end_at: Some(Utc.with_ymd_and_hms(2021, 3, 9, 10, 30, 0).unwrap()),
                    catalogue: catalogue(),
                    ..TopicPayload::default()
                },
            }),
        )
        .await
        .0;
        assert_eq!(resp.err_code, ErrCode::None);

        let get = get_topics_by_ids(
            State(state),
            Json(GetTopicByIdsReq {
                ids: vec![1],
                without_cache: true,
                ..GetTopicByIdsReq::default()
            }),
        )
        .await
        .0;
        let detail = &get.data[&1].detail;
        assert_eq!(detail.title, "test_title_0013");
        // snapped to local midnight / end of day
        let start = detail.start_at.unwrap();
        let end = detail.end_at.unwrap();
        assert_eq!(model::start_of_day(start), start);
        assert_eq!(model::end_of_day(end), end);
    }

    #[tokio::test]
    async fn list_by_time_range() {
        let state = state().await;

        let resp = list_topics(
            State(state),
            Json(TopicListReq {
                sort_by: SortByReq::SortNum,
                order_by: OrderByReq::Asc,
                offset: 0,
                limit: 100,
                start_at: Some(Utc.with_ymd_and_hms(2020, 11, 15, 0, 0, 1).unwrap()),
                end_at: Some(Utc.with_ymd_and_hms(2020, 11, 20, 0, 0, 1).unwrap()),
                ..TopicListReq::default()
            }),
        )
        .await
        .0;

        assert_eq!(resp.err_code, ErrCode::None);
        let ids: Vec<i64> = resp.data.iter().map(|t| t.detail.id).collect();
        assert_eq!(ids, vec![3, 4, 5, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn get_unknown_id_is_filtered_out() {
        let state = state().await;

        let resp = get_topics_by_ids(
            State(state),
            Json(GetTopicByIdsReq {
                ids: vec![14],
                with_statistics: true,
                user_id: "1".into(),
                ..GetTopicByIdsReq::default()
            }),
        )
        .await
        .0;

        assert_eq!(resp.err_code, ErrCode::NotFound);
        assert!(resp.data.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn get_known_ids_with_statistics() {
        let state = state().await;

        let resp = get_topics_by_ids(
            State(state),
            Json(GetTopicByIdsReq {
                ids: vec![1, 2, 3, 4, 5, 6],
                with_statistics: true,
                ..GetTopicByIdsReq::default()
            }),
        )
        .await
        .0;

        assert_eq!(resp.err_code, ErrCode::None);
        assert_eq!(resp.data.len(), 6);
        assert_eq!(resp.data[&1].statistic.content_num, 1);
        assert_eq!(resp.data[&1].statistic.mp_num, 2);
        assert_eq!(resp.data[&1].statistic.content_exposure_num, 3);
        // counters the collaborator did not report stay zeroed
        assert_eq!(resp.data[&2].statistic.content_num, 0);
    }

    #[tokio::test]
    async fn get_without_cache_joins_behavior() {
        let state = state().await;

        let resp = get_topics_by_ids(
            State(state),
            Json(GetTopicByIdsReq {
                ids: vec![1, 2],
                with_user_behavior: true,
                user_id: "1".into(),
                without_cache: true,
                ..GetTopicByIdsReq::default()
            }),
        )
        .await
        .0;

        assert_eq!(resp.err_code, ErrCode::None);
        assert!(resp.data[&1].user_behavior.is_following);
        assert!(!resp.data[&2].user_behavior.is_following);
    }

    #[tokio::test]
    async fn get_with_empty_ids_short_circuits() {
        let state = state().await;

        let resp = get_topics_by_ids(State(state), Json(GetTopicByIdsReq::default()))
            .await
            .0;
        assert_eq!(resp.err_code, ErrCode::None);
        assert!(resp.data.is_empty());
    }

    #[tokio::test]
    async fn hit_by_tag_matches_exact_titles_only() {
        let state = state().await;

        let resp = hit_topic_by_tag(
            State(state.clone()),
            Json(HitTopicByTagReq {
                tags: vec!["test_title_001".into(), "test_title_002".into()],
                ..HitTopicByTagReq::default()
            }),
        )
        .await
        .0;
        assert_eq!(resp.err_code, ErrCode::None);
        assert_eq!(resp.topics.len(), 2);

        let resp = hit_topic_by_tag(
            State(state),
            Json(HitTopicByTagReq {
                tags: vec!["test_title".into()],
                ..HitTopicByTagReq::default()
            }),
        )
        .await
        .0;
        assert_eq!(resp.err_code, ErrCode::None);
        assert!(resp.topics.is_empty());
    }

    #[tokio::test]
    async fn manual_audit_screen() {
        let state = state().await;

        let resp = must_manual_audit(
            State(state.clone()),
            Json(MustManualAuditReq {
                topics: vec!["test_title_001".into(), "test_title_001111".into()],
            }),
        )
        .await
        .0;
        assert_eq!(resp.err_code, ErrCode::None);
        assert_eq!(resp.topics, vec!["test_title_001".to_string()]);

        let resp = must_manual_audit(
            State(state),
            Json(MustManualAuditReq {
                topics: vec!["t".into(); MANUAL_AUDIT_MAX_TITLES + 1],
            }),
        )
        .await
        .0;
        assert_eq!(resp.err_code, ErrCode::InvalidArgument);
    }

    #[tokio::test]
    async fn catalogue_round_trips_through_storage() {
        let state = state().await;

        let created = create_topic(
            State(state.clone()),
            Json(CreateTopicReq {
                data: TopicPayload {
                    title: "with_catalogue".into(),
                    catalogue: catalogue(),
                    ..TopicPayload::default()
                },
            }),
        )
        .await
        .0;
        assert_eq!(created.err_code, ErrCode::None);

        let resp = get_topics_by_ids(
            State(state),
            Json(GetTopicByIdsReq {
                ids: vec![created.id],
                without_cache: true,
                ..GetTopicByIdsReq::default()
            }),
        )
        .await
        .0;
        assert_eq!(resp.data[&created.id].detail.catalogue, catalogue());
    }

    #[tokio::test]
    async fn follow_surface_is_off_by_default() {
        let state = state().await;

        let resp = topic_following(
            State(state),
            Json(TopicFollowingReq {
                topic_id: 1,
                user_id: "4".into(),
                action: true,
            }),
        )
        .await
        .0;
        assert_eq!(resp.err_code, ErrCode::StatusConflict);
    }

    #[tokio::test]
    async fn follow_round_trip_when_enabled() {
        let mut state = state().await;
        state.follow_enabled = true;

        let follow = |state: AppState, user: &str, action: bool| {
            let req = TopicFollowingReq {
                topic_id: 1,
                user_id: user.to_string(),
                action,
            };
            async move { topic_following(State(state), Json(req)).await.0 }
        };

        // fresh user may follow once
        let resp = follow(state.clone(), "4", true).await;
        assert_eq!(resp.err_code, ErrCode::None);
        let resp = follow(state.clone(), "4", true).await;
        assert_eq!(resp.err_code, ErrCode::StatusConflict);

        // and unfollow once
        let resp = follow(state.clone(), "4", false).await;
        assert_eq!(resp.err_code, ErrCode::None);
        let resp = follow(state, "4", false).await;
        assert_eq!(resp.err_code, ErrCode::StatusConflict);
    }
}
