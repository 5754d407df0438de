mod common;

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{item, order_request, setup};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use order_service::outbox::{EventPublisher, OutboxRelay, RelaySettings};
use shared::db::models::OutboxEvent;
use shared::db::schema::outbox_events;
use shared::PaymentMethod;
use uuid::Uuid;

#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, key: &str, _payload: &str) -> Result<()> {
        self.sent.lock().unwrap().push((topic.to_string(), key.to_string()));
        Ok(())
    }
}

struct BrokenPublisher;

#[async_trait]
impl EventPublisher for BrokenPublisher {
    async fn publish(&self, _topic: &str, _key: &str, _payload: &str) -> Result<()> {
        anyhow::bail!("broker unavailable")
    }
}

/// Fails the events of one order with an error Postgres refuses to store.
struct UnstorableErrorPublisher {
    key: String,
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl EventPublisher for UnstorableErrorPublisher {
    async fn publish(&self, _topic: &str, key: &str, _payload: &str) -> Result<()> {
        if key == self.key {
            anyhow::bail!("broker said \0 and hung up")
        }
        self.sent.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

// Relays pick up every due row, so tests that run one must not overlap.
static RELAY: Mutex<()> = Mutex::new(());

fn exclusive_relay() -> MutexGuard<'static, ()> {
    RELAY.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn event_for(ctx: &common::TestContext, order_id: Uuid) -> OutboxEvent {
    let mut conn = ctx.pool.get().await.unwrap();
    outbox_events::table
        .filter(outbox_events::aggregate_id.eq(order_id))
        .select(OutboxEvent::as_select())
        .first(&mut conn)
        .await
        .unwrap()
}

fn settings() -> RelaySettings {
    RelaySettings {
        batch_size: 10_000,
        ..RelaySettings::default()
    }
}

#[tokio::test]
async fn failed_deliveries_back_off_then_succeed() {
    let Some(ctx) = setup().await else { return };
    let _relay = exclusive_relay();
    let (r1, p1) = (Uuid::new_v4(), Uuid::new_v4());
    ctx.seed_stock(p1, r1, 5).await;

    let order = ctx
        .coordinator
        .create_order(
            ctx.tenant_id,
            order_request(Uuid::new_v4(), vec![item(p1, r1, 1, "100")], PaymentMethod::Cod),
        )
        .await
        .unwrap()
        .order;

    let now = Utc::now();
    let broken = OutboxRelay::new(ctx.pool.clone(), Arc::new(BrokenPublisher), settings());
    broken.relay_batch(now).await.unwrap();

    let mut conn = ctx.pool.get().await.unwrap();
    let event = outbox_events::table
        .filter(outbox_events::aggregate_id.eq(order.id))
        .select(OutboxEvent::as_select())
        .first(&mut conn)
        .await
        .unwrap();
    assert_eq!(event.event_type, "order.created");
    assert_eq!(event.status, "FAILED");
    assert_eq!(event.attempts, 1);
    assert!(event.next_attempt_at > now);
    assert!(event.last_error.unwrap().contains("broker unavailable"));
    drop(conn);

    let publisher = Arc::new(RecordingPublisher::default());
    let relay = OutboxRelay::new(ctx.pool.clone(), publisher.clone(), settings());
    relay.relay_batch(now + Duration::hours(1)).await.unwrap();

    let expected = ("order-events".to_string(), format!("order:{}", order.id));
    assert!(publisher.sent.lock().unwrap().contains(&expected));

    let mut conn = ctx.pool.get().await.unwrap();
    let event = outbox_events::table
        .filter(outbox_events::aggregate_id.eq(order.id))
        .select(OutboxEvent::as_select())
        .first(&mut conn)
        .await
        .unwrap();
    assert_eq!(event.status, "PROCESSED");
    assert!(event.processed_at.is_some());
}

#[tokio::test]
async fn one_unwritable_status_does_not_stop_the_batch() {
    let Some(ctx) = setup().await else { return };
    let _relay = exclusive_relay();
    let (r1, p1) = (Uuid::new_v4(), Uuid::new_v4());
    ctx.seed_stock(p1, r1, 5).await;

    let mut orders = Vec::new();
    for _ in 0..2 {
        let order = ctx
            .coordinator
            .create_order(
                ctx.tenant_id,
                order_request(Uuid::new_v4(), vec![item(p1, r1, 1, "100")], PaymentMethod::Cod),
            )
            .await
            .unwrap()
            .order;
        orders.push(order);
    }

    let publisher = Arc::new(UnstorableErrorPublisher {
        key: format!("order:{}", orders[0].id),
        sent: Mutex::new(Vec::new()),
    });
    let relay = OutboxRelay::new(ctx.pool.clone(), publisher.clone(), settings());
    let delivered = relay.relay_batch(Utc::now()).await.unwrap();
    assert!(delivered >= 1);

    let stuck = event_for(&ctx, orders[0].id).await;
    assert_eq!(stuck.status, "PENDING");
    assert_eq!(stuck.attempts, 0);

    let published = event_for(&ctx, orders[1].id).await;
    assert_eq!(published.status, "PROCESSED");
    assert!(publisher.sent.lock().unwrap().contains(&format!("order:{}", orders[1].id)));
}
