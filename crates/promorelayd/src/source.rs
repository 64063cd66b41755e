//! Change event source
//!
//! [`ChangeSource`] is the seam the fan-out loop polls;
//! [`KafkaChangeSource`] implements it over rskafka, one partition
//! client per configured topic. Connection establishment is retried a
//! bounded number of times with a fixed delay; exhausting the budget at
//! startup is fatal, while the same budget applied during `reconnect`
//! is absorbed by the loop's backoff-and-retry cycle.

use crate::config::{BrokerConfig, RelayConfig, StartOffset};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use promorelay_core::ChangeEvent;
use rskafka::client::partition::{OffsetAt, PartitionClient, UnknownTopicHandling};
use rskafka::client::ClientBuilder;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on bytes fetched per topic per poll.
const MAX_FETCH_BYTES: i32 = 1024 * 1024;

/// Source of decoded change events, polled by the fan-out loop.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Fetch the next batch of events. Bounded by the poll timeout;
    /// returns an empty batch when nothing arrived in time.
    async fn poll(&mut self) -> Result<Vec<ChangeEvent>>;

    /// Re-establish the broker connection after a poll failure.
    async fn reconnect(&mut self) -> Result<()>;

    /// Release the connection.
    async fn close(self: Box<Self>) {}
}

struct TopicCursor {
    topic: String,
    /// Table this topic carries, per configuration
    table: String,
    client: PartitionClient,
    /// Next offset to fetch
    next_offset: i64,
}

/// Kafka-backed change source.
pub struct KafkaChangeSource {
    broker: BrokerConfig,
    /// Topic name → table carried on it
    topics: Vec<(String, String)>,
    poll_timeout: Duration,
    cursors: Vec<TopicCursor>,
}

impl KafkaChangeSource {
    /// Connect to the broker and resolve a partition client per topic.
    ///
    /// Retries up to `connect_max_retries` times with a fixed delay;
    /// exhausting the budget is a fatal [`RelayError::Startup`].
    pub async fn connect(config: &RelayConfig) -> Result<Self> {
        let topics: Vec<(String, String)> = config
            .topics
            .iter()
            .map(|(topic, table)| (topic.clone(), table.clone()))
            .collect();
        let cursors = Self::establish(&config.broker, &topics, &HashMap::new()).await?;

        info!(
            group = %config.broker.consumer_group,
            topics = ?topics.iter().map(|(t, _)| t).collect::<Vec<_>>(),
            "Change source connected"
        );

        Ok(Self {
            broker: config.broker.clone(),
            topics,
            poll_timeout: config.relay.poll_timeout(),
            cursors,
        })
    }

    /// Bounded-retry connect: dial the cluster and open every topic
    /// cursor, starting from `prior` offsets where available.
    async fn establish(
        broker: &BrokerConfig,
        topics: &[(String, String)],
        prior: &HashMap<String, i64>,
    ) -> Result<Vec<TopicCursor>> {
        let max_retries = broker.connect_max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(attempt, max_retries, "Connecting to broker");
            match Self::try_establish(broker, topics, prior).await {
                Ok(cursors) => {
                    info!(attempt, brokers = ?broker.brokers, "Broker connection established");
                    return Ok(cursors);
                }
                Err(e) if attempt < max_retries => {
                    warn!(attempt, max_retries, error = %e, "Broker connection failed, retrying");
                    tokio::time::sleep(broker.connect_retry_delay()).await;
                }
                Err(e) => {
                    return Err(RelayError::startup(format!(
                        "broker unreachable after {attempt} attempts: {e}"
                    )))
                }
            }
        }
    }

    async fn try_establish(
        broker: &BrokerConfig,
        topics: &[(String, String)],
        prior: &HashMap<String, i64>,
    ) -> Result<Vec<TopicCursor>> {
        let client = tokio::time::timeout(
            broker.connect_timeout(),
            ClientBuilder::new(broker.brokers.clone()).build(),
        )
        .await
        .map_err(|_| {
            RelayError::broker(format!(
                "connection timeout after {}ms to brokers {:?}",
                broker.connect_timeout_ms, broker.brokers
            ))
        })?
        .map_err(|e| {
            RelayError::broker(format!(
                "failed to connect to brokers {:?}: {e}",
                broker.brokers
            ))
        })?;

        let mut cursors = Vec::with_capacity(topics.len());
        for (topic, table) in topics {
            let partition = client
                .partition_client(topic.clone(), 0, UnknownTopicHandling::Error)
                .await
                .map_err(|e| RelayError::broker(format!("topic {topic} unavailable: {e}")))?;

            let next_offset = match prior.get(topic) {
                Some(&offset) => offset,
                None => {
                    let at = match broker.start_offset {
                        StartOffset::Earliest => OffsetAt::Earliest,
                        StartOffset::Latest => OffsetAt::Latest,
                    };
                    partition.get_offset(at).await.map_err(|e| {
                        RelayError::broker(format!("offset lookup for {topic} failed: {e}"))
                    })?
                }
            };

            cursors.push(TopicCursor {
                topic: topic.clone(),
                table: table.clone(),
                client: partition,
                next_offset,
            });
        }
        Ok(cursors)
    }
}

#[async_trait]
impl ChangeSource for KafkaChangeSource {
    async fn poll(&mut self) -> Result<Vec<ChangeEvent>> {
        let mut events = Vec::new();

        // Split the poll budget across topics so one quiet topic cannot
        // stretch the iteration past the timeout.
        let per_topic_wait_ms =
            (self.poll_timeout.as_millis() as i32 / self.cursors.len().max(1) as i32).max(1);

        for cursor in &mut self.cursors {
            let (records, _high_watermark) = cursor
                .client
                .fetch_records(cursor.next_offset, 1..MAX_FETCH_BYTES, per_topic_wait_ms)
                .await
                .map_err(|e| {
                    RelayError::broker(format!("fetch from {} failed: {e}", cursor.topic))
                })?;

            if !records.is_empty() {
                debug!(topic = %cursor.topic, count = records.len(), "Fetched change records");
            }

            for record_and_offset in records {
                cursor.next_offset = cursor.next_offset.max(record_and_offset.offset + 1);
                let Some(value) = record_and_offset.record.value else {
                    continue;
                };
                match ChangeEvent::from_json_bytes(&value) {
                    Ok(event) => {
                        if event.table != cursor.table {
                            // The tailer published a table this topic is not
                            // mapped to; relay it anyway, the event is
                            // self-describing.
                            debug!(
                                topic = %cursor.topic,
                                expected = %cursor.table,
                                actual = %event.table,
                                "Record table differs from topic mapping"
                            );
                        }
                        events.push(event);
                    }
                    Err(e) => warn!(
                        topic = %cursor.topic,
                        offset = record_and_offset.offset,
                        error = %e,
                        "Skipping undecodable change record"
                    ),
                }
            }
        }

        Ok(events)
    }

    async fn reconnect(&mut self) -> Result<()> {
        // Resume each topic from where the old connection left off;
        // records published while the broker was unreachable and already
        // compacted away are lost, which is the accepted outage gap.
        let prior: HashMap<String, i64> = self
            .cursors
            .iter()
            .map(|c| (c.topic.clone(), c.next_offset))
            .collect();

        let cursors = Self::establish(&self.broker, &self.topics, &prior)
            .await
            .map_err(|e| RelayError::broker(format!("reconnect failed: {e}")))?;
        self.cursors = cursors;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        info!("Change source closed");
    }
}
