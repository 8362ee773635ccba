// Statistics collaborator client
//
// Per-topic counters are never persisted here; they are fetched live from
// the analytics service's chart endpoint. The wire format carries every
// number as a decimal string.

use crate::error::ServiceError;
use crate::model::TopicStatistic;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

/// Deadline callers apply to any statistics fetch.
pub const STATS_DEADLINE: std::time::Duration = std::time::Duration::from_secs(3);

#[async_trait]
pub trait StatsProvider: Send + Sync {
    /// Counters for the given topics; topics the collaborator knows nothing
    /// about are simply absent.
    async fn topic_statistics(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, TopicStatistic>, ServiceError>;
}

pub struct HttpStatsClient {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartResponse {
    #[serde(default)]
    err_code: i64,
    #[serde(default)]
    err_msg: String,
    #[serde(default)]
    chart_data: ChartData,
}

#[derive(Debug, Deserialize, Default)]
struct ChartData {
    #[serde(default)]
    data: Vec<ChartRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartRow {
    topic_id: String,
    #[serde(default)]
    content_num: String,
    #[serde(default)]
    fusion_num: String,
    #[serde(default)]
    tap_num: String,
}

impl HttpStatsClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(STATS_DEADLINE)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/chart/console", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl StatsProvider for HttpStatsClient {
    async fn topic_statistics(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, TopicStatistic>, ServiceError> {
        let mut stats = HashMap::new();
        if ids.is_empty() {
            return Ok(stats);
        }

        let id_strings: Vec<String> = ids.iter().map(i64::to_string).collect();
        let body = json!({
            "chartModuleType": "outer",
            "chartModuleId": "interface6",
            "query": { "content": { "contentTopicIds": id_strings } },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Unavailable(format!("analytics request: {e}")))?;
        let chart: ChartResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Unavailable(format!("analytics response: {e}")))?;

        if chart.err_code != 0 {
            return Err(ServiceError::Unavailable(format!(
                "analytics err_code {}: {}",
                chart.err_code, chart.err_msg
            )));
        }

        for row in chart.chart_data.data {
            let topic_id = row.topic_id.parse::<i64>().unwrap_or(0);
            if topic_id == 0 {
                tracing::error!("analytics row with bad topic id: {:?}", row.topic_id);
                continue;
            }
            stats.insert(
                topic_id,
                TopicStatistic {
                    topic_id,
                    content_num: row.content_num.parse().unwrap_or(0),
                    mp_num: row.fusion_num.parse().unwrap_or(0),
                    content_exposure_num: row.tap_num.parse().unwrap_or(0),
                },
            );
        }
        Ok(stats)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_rows_parse_string_numbers() {
        let raw = r#"{
            "errCode": 0,
            "errMsg": "",
            "chartData": {
                "data": [
                    {"topicId": "1", "contentNum": "1", "fusionNum": "2", "tapNum": "3"},
                    {"topicId": "oops", "contentNum": "9", "fusionNum": "9", "tapNum": "9"}
                ]
            }
        }"#;
        let chart: ChartResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(chart.err_code, 0);
        assert_eq!(chart.chart_data.data.len(), 2);
        assert_eq!(chart.chart_data.data[0].topic_id, "1");
        assert_eq!(chart.chart_data.data[0].fusion_num, "2");
    }

    #[test]
    fn missing_counters_default_to_empty() {
        let raw = r#"{"errCode": 0, "chartData": {"data": [{"topicId": "4"}]}}"#;
        let chart: ChartResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(chart.chart_data.data[0].content_num, "");
    }
}
