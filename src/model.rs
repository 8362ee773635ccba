// Domain model - the canonical topic records and their derived values
//
// TopicDetail is the authoritative record; TopicInfo is the shape that
// travels through the cache (JSON-encoded) and out of the RPC surface.
// Status is always derivable from the clock and the topic's window; the
// stored status is a materialization that the reconciler keeps converged.

use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a topic relative to its schedule window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    #[default]
    NotStarted,
    InProcess,
    Ended,
}

impl TopicStatus {
    /// Derive the status for a window at a given instant:
    /// before the window -> NotStarted, past it -> Ended, inside -> InProcess.
    pub fn derive(now: DateTime<Utc>, start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> Self {
        if now.timestamp() < start_at.timestamp() {
            TopicStatus::NotStarted
        } else if now.timestamp() > end_at.timestamp() {
            TopicStatus::Ended
        } else {
            TopicStatus::InProcess
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            TopicStatus::NotStarted => 0,
            TopicStatus::InProcess => 1,
            TopicStatus::Ended => 2,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => TopicStatus::InProcess,
            2 => TopicStatus::Ended,
            _ => TopicStatus::NotStarted,
        }
    }
}

/// The canonical topic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicDetail {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Non-null marks logical deletion.
    pub deleted_at: Option<DateTime<Utc>>,

    pub title: String,
    pub bg_pic: String,
    pub avatar: String,
    /// Secondary ordering key.
    pub sort: i32,
    pub desc: String,
    /// Opaque serialized catalogue (JSON array of key/value items).
    pub catalogue: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    /// Whether publications under this topic require manual review.
    pub manual_audit: bool,
    pub status: TopicStatus,
}

/// One catalogue entry as carried on the wire; stored serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CatalogueItem {
    pub key: String,
    pub value: String,
}

/// The follow relation between a user and a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicUserBehavior {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,

    pub topic_id: i64,
    pub user_id: String,
}

/// Per-topic counters sourced live from the analytics collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TopicStatistic {
    pub topic_id: i64,
    pub content_num: i64,
    pub mp_num: i64,
    pub content_exposure_num: i64,
}

/// The unit that flows through the cache and out of lookups.
///
/// User behavior is only populated on the cache-bypassing paths: the cache
/// key carries no user identity, so cached entries never hold it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicInfo {
    pub topic_detail: TopicDetail,
    pub topic_user_behavior: Option<TopicUserBehavior>,
}

impl TopicInfo {
    pub fn new(detail: TopicDetail) -> Self {
        Self {
            topic_detail: detail,
            topic_user_behavior: None,
        }
    }
}

/// Normalize an instant to local midnight of its calendar day.
pub fn start_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    let day = t.with_timezone(&Local).date_naive();
    // earliest() handles DST folds; a gap at midnight leaves t unchanged
    Local
        .from_local_datetime(&day.and_hms_opt(0, 0, 0).unwrap_or_default())
        .earliest()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(t)
}

/// Normalize an instant to local 23:59:59 of its calendar day.
pub fn end_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(t) + Duration::days(1) - Duration::seconds(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn status_follows_window() {
        let start = Utc.with_ymd_and_hms(2020, 11, 16, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 11, 18, 23, 59, 59).unwrap();

        let before = start - Duration::seconds(1);
        let inside = start + Duration::hours(5);
        let after = end + Duration::seconds(1);

        assert_eq!(TopicStatus::derive(before, start, end), TopicStatus::NotStarted);
        assert_eq!(TopicStatus::derive(start, start, end), TopicStatus::InProcess);
        assert_eq!(TopicStatus::derive(inside, start, end), TopicStatus::InProcess);
        assert_eq!(TopicStatus::derive(end, start, end), TopicStatus::InProcess);
        assert_eq!(TopicStatus::derive(after, start, end), TopicStatus::Ended);
    }

    #[test]
    fn status_numeric_roundtrip() {
        for s in [TopicStatus::NotStarted, TopicStatus::InProcess, TopicStatus::Ended] {
            assert_eq!(TopicStatus::from_i64(s.as_i64()), s);
        }
    }

    #[test]
    fn day_boundaries() {
        let t = Utc.with_ymd_and_hms(2020, 11, 16, 10, 30, 45).unwrap();
        let start = start_of_day(t).with_timezone(&Local);
        let end = end_of_day(t).with_timezone(&Local);

        assert_eq!((start.hour(), start.minute(), start.second()), (0, 0, 0));
        assert_eq!((end.hour(), end.minute(), end.second()), (23, 59, 59));
        assert_eq!(end - start, Duration::days(1) - Duration::seconds(1));
    }

    #[test]
    fn topic_info_json_shape() {
        let detail = TopicDetail {
            id: 7,
            created_at: Utc.with_ymd_and_hms(2020, 11, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2020, 11, 1, 0, 0, 0).unwrap(),
            deleted_at: None,
            title: "t".into(),
            bg_pic: String::new(),
            avatar: String::new(),
            sort: 1,
            desc: String::new(),
            catalogue: String::new(),
            start_at: Utc.with_ymd_and_hms(2020, 11, 16, 0, 0, 0).unwrap(),
            end_at: Utc.with_ymd_and_hms(2020, 11, 18, 23, 59, 59).unwrap(),
            manual_audit: false,
            status: TopicStatus::InProcess,
        };
        let info = TopicInfo::new(detail);

        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"topicDetail\""));
        assert!(json.contains("\"manualAudit\""));

        let back: TopicInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
