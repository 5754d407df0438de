//! Row-level primitives shared by the order and payment services.
//!
//! Everything here takes the caller's connection so it runs inside whatever
//! transaction the caller has opened.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use uuid::Uuid;

use super::models::*;
use super::schema::*;
use super::DbPool;
use crate::error::{AppError, AppResult};
use crate::events::{self, OrderStatusChangedEvent, RetryPolicy};
use crate::state_machine::validate_transition;
use crate::status::{ActorType, OrderStatus, OutboxStatus, PaymentStatus};

pub type PooledConn<'a> = bb8::PooledConnection<'a, AsyncDieselConnectionManager<AsyncPgConnection>>;

pub async fn connection(pool: &DbPool) -> AppResult<PooledConn<'_>> {
    pool.get()
        .await
        .map_err(|e| AppError::internal("acquire database connection", e))
}

/// Who performed an action, as recorded on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Option<Uuid>,
    pub kind: ActorType,
}

impl Actor {
    pub fn new(id: Uuid, kind: ActorType) -> Self {
        Self { id: Some(id), kind }
    }

    pub fn system() -> Self {
        Self {
            id: None,
            kind: ActorType::System,
        }
    }

    /// Builds the caller identity from the raw `x-actor-id` / `x-actor-type`
    /// header values. A missing type falls back to `default_kind`.
    pub fn from_headers(id: Option<&str>, kind: Option<&str>, default_kind: ActorType) -> AppResult<Self> {
        let id = match id.map(str::trim).filter(|v| !v.is_empty()) {
            Some(raw) => Some(
                Uuid::parse_str(raw).map_err(|_| AppError::bad_request(format!("invalid actor id: {}", raw)))?,
            ),
            None => None,
        };
        let kind = match kind.map(str::trim).filter(|v| !v.is_empty()) {
            Some(raw) => raw
                .to_ascii_uppercase()
                .parse::<ActorType>()
                .map_err(|_| AppError::bad_request(format!("unknown actor type: {}", raw)))?,
            None => default_kind,
        };
        Ok(Self { id, kind })
    }
}

pub async fn find_order(conn: &mut AsyncPgConnection, tenant_id: Uuid, order_id: Uuid) -> AppResult<Order> {
    orders::table
        .filter(orders::id.eq(order_id))
        .filter(orders::tenant_id.eq(tenant_id))
        .filter(orders::deleted_at.is_null())
        .select(Order::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("order"))
}

/// Loads the order with an exclusive row lock held until the surrounding transaction ends.
pub async fn lock_order(conn: &mut AsyncPgConnection, tenant_id: Uuid, order_id: Uuid) -> AppResult<Order> {
    orders::table
        .filter(orders::id.eq(order_id))
        .filter(orders::tenant_id.eq(tenant_id))
        .filter(orders::deleted_at.is_null())
        .select(Order::as_select())
        .for_update()
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("order"))
}

/// Like [`lock_order`], but also finds soft-deleted orders. Payment settlement
/// and refunds use it so money arriving after a payment timeout is still recorded.
pub async fn lock_order_row(conn: &mut AsyncPgConnection, tenant_id: Uuid, order_id: Uuid) -> AppResult<Order> {
    orders::table
        .filter(orders::id.eq(order_id))
        .filter(orders::tenant_id.eq(tenant_id))
        .select(Order::as_select())
        .for_update()
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("order"))
}

pub async fn set_order_status(conn: &mut AsyncPgConnection, order_id: Uuid, status: OrderStatus) -> AppResult<()> {
    diesel::update(orders::table.filter(orders::id.eq(order_id)))
        .set((
            orders::status.eq(status.as_str()),
            orders::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_payment_status(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    status: PaymentStatus,
) -> AppResult<()> {
    diesel::update(orders::table.filter(orders::id.eq(order_id)))
        .set((
            orders::payment_status.eq(status.as_str()),
            orders::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// A timeline row about to be written.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: String,
    pub previous_status: Option<OrderStatus>,
    pub new_status: Option<OrderStatus>,
    pub description: String,
    pub actor: Actor,
    pub metadata: serde_json::Value,
}

impl TimelineEntry {
    pub fn new(order: &Order, event_type: &str, description: impl Into<String>, actor: Actor) -> Self {
        Self {
            order_id: order.id,
            tenant_id: order.tenant_id,
            event_type: event_type.to_string(),
            previous_status: None,
            new_status: None,
            description: description.into(),
            actor,
            metadata: serde_json::json!({}),
        }
    }

    pub fn statuses(mut self, previous: OrderStatus, new: OrderStatus) -> Self {
        self.previous_status = Some(previous);
        self.new_status = Some(new);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

pub async fn append_timeline(conn: &mut AsyncPgConnection, entry: TimelineEntry) -> AppResult<TimelineEvent> {
    let row = NewTimelineEvent {
        id: Uuid::new_v4(),
        order_id: entry.order_id,
        tenant_id: entry.tenant_id,
        event_type: entry.event_type,
        previous_status: entry.previous_status.map(|s| s.as_str().to_string()),
        new_status: entry.new_status.map(|s| s.as_str().to_string()),
        description: entry.description,
        actor_id: entry.actor.id,
        actor_type: entry.actor.kind.as_str().to_string(),
        metadata: entry.metadata,
        created_at: Utc::now(),
    };

    let event = diesel::insert_into(order_timeline_events::table)
        .values(&row)
        .returning(TimelineEvent::as_returning())
        .get_result(conn)
        .await?;
    Ok(event)
}

pub async fn enqueue_outbox<T: Serialize>(
    conn: &mut AsyncPgConnection,
    tenant_id: Uuid,
    aggregate_type: &str,
    aggregate_id: Uuid,
    event_type: &str,
    payload: &T,
) -> AppResult<()> {
    let payload = serde_json::to_value(payload)
        .map_err(|e| AppError::internal("serialize outbox payload", e))?;

    let event = NewOutboxEvent {
        id: Uuid::new_v4(),
        tenant_id,
        aggregate_type: aggregate_type.to_string(),
        aggregate_id,
        event_type: event_type.to_string(),
        payload,
        status: OutboxStatus::Pending.as_str().to_string(),
        max_attempts: RetryPolicy::default().max_attempts,
    };

    diesel::insert_into(outbox_events::table)
        .values(&event)
        .execute(conn)
        .await?;
    Ok(())
}

/// Validates and applies one order status change, recording it on the
/// timeline and in the outbox. The order row must already be locked; its
/// in-memory status is updated to `to`.
pub async fn transition_order(
    conn: &mut AsyncPgConnection,
    order: &mut Order,
    to: OrderStatus,
    actor: Actor,
    event_type: &str,
    description: impl Into<String>,
) -> AppResult<()> {
    let from = order.order_status()?;
    validate_transition(from, to)?;
    set_order_status(conn, order.id, to).await?;

    append_timeline(
        conn,
        TimelineEntry::new(order, event_type, description, actor).statuses(from, to),
    )
    .await?;
    order.status = to.as_str().to_string();

    enqueue_outbox(
        conn,
        order.tenant_id,
        events::AGGREGATE_ORDER,
        order.id,
        events::ORDER_STATUS_CHANGED,
        &OrderStatusChangedEvent {
            order_id: order.id,
            tenant_id: order.tenant_id,
            previous_status: from,
            new_status: to,
            actor_type: actor.kind,
        },
    )
    .await
}

pub async fn list_timeline(conn: &mut AsyncPgConnection, order_id: Uuid) -> AppResult<Vec<TimelineEvent>> {
    let events = order_timeline_events::table
        .filter(order_timeline_events::order_id.eq(order_id))
        .order(order_timeline_events::created_at.asc())
        .select(TimelineEvent::as_select())
        .load(conn)
        .await?;
    Ok(events)
}
