use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::db::models::OutboxEvent;
use shared::db::repo;
use shared::db::schema::outbox_events;
use shared::db::DbPool;
use shared::events::RetryPolicy;
use shared::OutboxStatus;
use tokio::time;
use tracing::{error, info, warn};

/// Kafka topic an aggregate's events go to.
pub fn topic_for(aggregate_type: &str) -> String {
    format!("{}-events", aggregate_type)
}

/// Message key, so every event of one aggregate lands on the same partition.
pub fn channel_key(event: &OutboxEvent) -> String {
    format!("{}:{}", event.aggregate_type, event.aggregate_id)
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()>;
}

pub struct KafkaPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(producer: FutureProducer) -> Self {
        Self {
            producer,
            timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()> {
        let record = FutureRecord::to(topic).payload(payload).key(key);
        self.producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub interval: Duration,
    pub batch_size: i64,
    pub retry: RetryPolicy,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            batch_size: 50,
            retry: RetryPolicy::default(),
        }
    }
}

/// Polls undelivered outbox rows and publishes them.
pub struct OutboxRelay {
    pool: DbPool,
    publisher: Arc<dyn EventPublisher>,
    settings: RelaySettings,
}

impl OutboxRelay {
    pub fn new(pool: DbPool, publisher: Arc<dyn EventPublisher>, settings: RelaySettings) -> Self {
        Self {
            pool,
            publisher,
            settings,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.settings.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.relay_batch(Utc::now()).await {
                error!("Error relaying outbox events: {}", e);
            }
        }
    }

    /// Publishes one batch of due events. Returns how many were delivered.
    pub async fn relay_batch(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = repo::connection(&self.pool).await?;

        let due = outbox_events::table
            .filter(
                outbox_events::status.eq(OutboxStatus::Pending.as_str()).or(outbox_events::status
                    .eq(OutboxStatus::Failed.as_str())
                    .and(outbox_events::attempts.lt(outbox_events::max_attempts))),
            )
            .filter(outbox_events::next_attempt_at.le(now))
            .order(outbox_events::created_at.asc())
            .limit(self.settings.batch_size)
            .select(OutboxEvent::as_select())
            .load(&mut conn)
            .await?;

        let mut delivered = 0;
        for event in due {
            match self.publish_event(&event).await {
                Ok(()) => {
                    if let Err(e) = mark_processed(&mut conn, &event).await {
                        error!("Published event {} but could not mark it processed: {}", event.id, e);
                        continue;
                    }
                    delivered += 1;
                    info!("Published outbox event {} ({})", event.id, event.event_type);
                }
                Err(e) => {
                    let attempts = event.attempts + 1;
                    let retry = self.settings.retry;
                    error!("Failed to publish event {} (attempt {}): {}", event.id, attempts, e);
                    if retry.exhausted(attempts) {
                        warn!("Outbox event {} gave up after {} attempts", event.id, attempts);
                    }
                    if let Err(e) = mark_failed(&mut conn, &event, attempts, retry, &e.to_string(), now).await {
                        error!("Could not record the failure of event {}: {}", event.id, e);
                    }
                }
            }
        }

        Ok(delivered)
    }

    async fn publish_event(&self, event: &OutboxEvent) -> Result<()> {
        let payload = serde_json::to_string(&event.payload)?;
        self.publisher
            .publish(&topic_for(&event.aggregate_type), &channel_key(event), &payload)
            .await
    }
}

async fn mark_processed(conn: &mut AsyncPgConnection, event: &OutboxEvent) -> QueryResult<()> {
    diesel::update(outbox_events::table.filter(outbox_events::id.eq(event.id)))
        .set((
            outbox_events::status.eq(OutboxStatus::Processed.as_str()),
            outbox_events::processed_at.eq(Some(Utc::now())),
            outbox_events::last_error.eq(None::<String>),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

async fn mark_failed(
    conn: &mut AsyncPgConnection,
    event: &OutboxEvent,
    attempts: i32,
    retry: RetryPolicy,
    message: &str,
    now: DateTime<Utc>,
) -> QueryResult<()> {
    diesel::update(outbox_events::table.filter(outbox_events::id.eq(event.id)))
        .set((
            outbox_events::status.eq(OutboxStatus::Failed.as_str()),
            outbox_events::attempts.eq(attempts),
            outbox_events::max_attempts.eq(retry.max_attempts),
            outbox_events::last_error.eq(Some(message)),
            outbox_events::next_attempt_at.eq(retry.next_attempt_at(attempts, now)),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn events_are_keyed_by_aggregate() {
        let id = Uuid::new_v4();
        let event = OutboxEvent {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            aggregate_type: "order".to_string(),
            aggregate_id: id,
            event_type: "order.created".to_string(),
            payload: serde_json::json!({}),
            status: "PENDING".to_string(),
            attempts: 0,
            max_attempts: 5,
            last_error: None,
            next_attempt_at: Utc::now(),
            processed_at: None,
            created_at: Utc::now(),
        };

        assert_eq!(topic_for(&event.aggregate_type), "order-events");
        assert_eq!(channel_key(&event), format!("order:{}", id));
    }
}
