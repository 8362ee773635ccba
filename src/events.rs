// External event emitter - "topic changed" records for the search indexer
//
// Emission is fire-and-forget: a failed publish is logged and reported, but
// never blocks the caller or reverts store state. The downstream consumer
// owns idempotency.

use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use std::time::Duration;

/// What happened to the topic. The search index treats upserts as `New`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    New,
    Delete,
}

#[derive(Debug, Serialize)]
struct TopicEvent {
    event: EventKind,
    topic_id: i64,
}

pub trait EventSink: Send + Sync {
    /// Queue a change record. Returns immediately; delivery is detached.
    fn emit(&self, kind: EventKind, topic_id: i64);
}

pub struct KafkaEvents {
    producer: FutureProducer,
    topic: String,
}

impl KafkaEvents {
    pub fn new(brokers: &[String], topic: &str) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("message.timeout.ms", "5000")
            .create()?;
        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

impl EventSink for KafkaEvents {
    fn emit(&self, kind: EventKind, topic_id: i64) {
        let payload = match serde_json::to_string(&TopicEvent { event: kind, topic_id }) {
            Ok(p) => p,
            Err(err) => {
                tracing::error!("encode topic event {kind:?}/{topic_id}: {err}");
                return;
            }
        };

        let producer = self.producer.clone();
        let topic = self.topic.clone();
        let key = topic_id.to_string();
        tokio::spawn(async move {
            let record = FutureRecord::to(&topic).key(&key).payload(&payload);
            match producer.send(record, Duration::from_secs(5)).await {
                Ok(_) => tracing::debug!("published topic event {kind:?} for {topic_id}"),
                Err((err, _)) => {
                    tracing::error!("publish topic event {kind:?} for {topic_id}: {err}");
                }
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::sync::Mutex;

    /// Test double collecting emitted events in order.
    #[derive(Default)]
    pub(crate) struct RecordingEvents {
        emitted: Mutex<Vec<(EventKind, i64)>>,
    }

    impl RecordingEvents {
        pub(crate) fn new() -> std::sync::Arc<Self> {
            std::sync::Arc::new(Self::default())
        }

        pub(crate) fn emitted(&self) -> Vec<(EventKind, i64)> {
            self.emitted.lock().unwrap().clone()
        }
    }

    impl EventSink for RecordingEvents {
        fn emit(&self, kind: EventKind, topic_id: i64) {
            self.emitted.lock().unwrap().push((kind, topic_id));
        }
    }
}
