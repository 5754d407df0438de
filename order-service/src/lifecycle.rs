//! Order lifecycle after creation: restaurant actions on pickups, cancellation,
//! the failed-payment path and auto-confirmation.
//!
//! Every operation runs in one transaction that starts by locking the order row,
//! so concurrent actions on the same order are applied one at a time.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde_json::json;
use shared::db::models::{Order, OrderPickup};
use shared::db::repo::{self, Actor, TimelineEntry};
use shared::db::schema::{order_items, order_pickups, orders};
use shared::db::DbPool;
use shared::events::{self, OrderCancelledEvent};
use shared::state_machine::{
    advancement_path, aggregate, ensure_kitchen_action, validate_pickup_transition, validate_transition, Aggregate,
};
use shared::{ActorType, AppError, AppResult, OrderStatus, PickupStatus};
use tracing::info;
use uuid::Uuid;

use crate::coordinator::{load_detail, OrderDetail};
use crate::inventory::{StockLine, StockReservationPort};

pub const PAYMENT_TIMEOUT_REASON: &str = "payment timeout";

async fn pickup_for_restaurant(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    restaurant_id: Uuid,
) -> AppResult<OrderPickup> {
    order_pickups::table
        .filter(order_pickups::order_id.eq(order_id))
        .filter(order_pickups::restaurant_id.eq(restaurant_id))
        .select(OrderPickup::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("pickup"))
}

async fn pickups_of(conn: &mut AsyncPgConnection, order_id: Uuid) -> AppResult<Vec<OrderPickup>> {
    let pickups = order_pickups::table
        .filter(order_pickups::order_id.eq(order_id))
        .select(OrderPickup::as_select())
        .load(conn)
        .await?;
    Ok(pickups)
}

/// Item quantities of the order belonging to the given restaurants.
async fn stock_lines_for(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    restaurant_ids: &[Uuid],
) -> AppResult<Vec<StockLine>> {
    if restaurant_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = order_items::table
        .filter(order_items::order_id.eq(order_id))
        .filter(order_items::restaurant_id.eq_any(restaurant_ids))
        .select((order_items::product_id, order_items::restaurant_id, order_items::quantity))
        .load::<(Uuid, Uuid, i32)>(conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(product_id, restaurant_id, quantity)| StockLine {
            product_id,
            restaurant_id,
            quantity,
        })
        .collect())
}

/// Restaurants whose items are still reserved: their pickup was neither
/// picked (stock consumed) nor rejected (stock already released).
pub fn still_reserved(pickups: &[(Uuid, PickupStatus)]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    pickups
        .iter()
        .filter(|(_, status)| !matches!(status, PickupStatus::Picked | PickupStatus::Rejected))
        .filter(|(restaurant_id, _)| seen.insert(*restaurant_id))
        .map(|(restaurant_id, _)| *restaurant_id)
        .collect()
}

async fn release_reserved(
    conn: &mut AsyncPgConnection,
    stock: &dyn StockReservationPort,
    order: &Order,
) -> AppResult<()> {
    let pickups = pickups_of(conn, order.id).await?;
    let mut states = Vec::with_capacity(pickups.len());
    for pickup in &pickups {
        states.push((pickup.restaurant_id, pickup.pickup_status()?));
    }
    let restaurants = still_reserved(&states);
    let lines = stock_lines_for(conn, order.id, &restaurants).await?;
    stock.release(conn, order.tenant_id, &lines).await
}

/// Releases still-reserved stock and moves the locked order to CANCELLED.
async fn cancel_locked(
    conn: &mut AsyncPgConnection,
    stock: &dyn StockReservationPort,
    order: &mut Order,
    actor: Actor,
    reason: &str,
    event_type: &str,
    description: String,
) -> AppResult<()> {
    let previous = order.order_status()?;
    validate_transition(previous, OrderStatus::Cancelled)?;

    release_reserved(conn, stock, order).await?;

    diesel::update(orders::table.filter(orders::id.eq(order.id)))
        .set((
            orders::cancellation_reason.eq(reason),
            orders::cancelled_by.eq(actor.kind.as_str()),
        ))
        .execute(conn)
        .await?;

    repo::transition_order(conn, order, OrderStatus::Cancelled, actor, event_type, description).await?;

    repo::enqueue_outbox(
        conn,
        order.tenant_id,
        events::AGGREGATE_ORDER,
        order.id,
        events::ORDER_CANCELLED,
        &OrderCancelledEvent {
            order_id: order.id,
            tenant_id: order.tenant_id,
            previous_status: previous,
            reason: reason.to_string(),
            actor_type: actor.kind,
        },
    )
    .await
}

/// A restaurant-side action on one pickup.
#[derive(Debug, Clone)]
pub struct PickupAction {
    pub restaurant_id: Uuid,
    pub actor: Actor,
    pub reason: Option<String>,
}

impl PickupAction {
    pub fn new(restaurant_id: Uuid, actor: Actor) -> Self {
        Self {
            restaurant_id,
            actor,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

pub struct OrderLifecycle {
    pool: DbPool,
    stock: Arc<dyn StockReservationPort>,
}

impl OrderLifecycle {
    pub fn new(pool: DbPool, stock: Arc<dyn StockReservationPort>) -> Self {
        Self { pool, stock }
    }

    pub async fn confirm(&self, tenant_id: Uuid, order_id: Uuid, action: PickupAction) -> AppResult<OrderDetail> {
        self.apply_pickup_action(tenant_id, order_id, PickupStatus::Confirmed, action).await
    }

    pub async fn mark_preparing(&self, tenant_id: Uuid, order_id: Uuid, action: PickupAction) -> AppResult<OrderDetail> {
        self.apply_pickup_action(tenant_id, order_id, PickupStatus::Preparing, action).await
    }

    pub async fn mark_ready(&self, tenant_id: Uuid, order_id: Uuid, action: PickupAction) -> AppResult<OrderDetail> {
        self.apply_pickup_action(tenant_id, order_id, PickupStatus::Ready, action).await
    }

    pub async fn mark_picked(&self, tenant_id: Uuid, order_id: Uuid, action: PickupAction) -> AppResult<OrderDetail> {
        self.apply_pickup_action(tenant_id, order_id, PickupStatus::Picked, action).await
    }

    pub async fn reject(&self, tenant_id: Uuid, order_id: Uuid, action: PickupAction) -> AppResult<OrderDetail> {
        let has_reason = action.reason.as_deref().is_some_and(|r| !r.trim().is_empty());
        if !has_reason {
            return Err(AppError::bad_request("rejection reason is required"));
        }
        self.apply_pickup_action(tenant_id, order_id, PickupStatus::Rejected, action).await
    }

    async fn apply_pickup_action(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
        target: PickupStatus,
        action: PickupAction,
    ) -> AppResult<OrderDetail> {
        let restaurant_id = action.restaurant_id;
        let mut conn = repo::connection(&self.pool).await?;
        let stock = self.stock.clone();

        conn.transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let mut order = repo::lock_order(conn, tenant_id, order_id).await?;
                let current = order.order_status()?;
                ensure_kitchen_action(current, target)?;

                let pickup = pickup_for_restaurant(conn, order.id, action.restaurant_id).await?;
                let from = pickup.pickup_status()?;
                validate_pickup_transition(from, target)?;

                let reason = action.reason.as_deref().map(str::trim).filter(|r| !r.is_empty());
                diesel::update(order_pickups::table.filter(order_pickups::id.eq(pickup.id)))
                    .set((
                        order_pickups::status.eq(target.as_str()),
                        order_pickups::rejection_reason.eq(reason.filter(|_| target == PickupStatus::Rejected)),
                        order_pickups::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)
                    .await?;

                repo::append_timeline(
                    conn,
                    TimelineEntry::new(
                        &order,
                        "pickup_status_changed",
                        format!("Pickup {} moved from {} to {}", pickup.pickup_number, from, target),
                        action.actor,
                    )
                    .metadata(json!({
                        "pickup_id": pickup.id,
                        "restaurant_id": pickup.restaurant_id,
                        "previous_status": from,
                        "new_status": target,
                        "reason": reason,
                    })),
                )
                .await?;

                match target {
                    PickupStatus::Picked => {
                        let lines = stock_lines_for(conn, order.id, &[pickup.restaurant_id]).await?;
                        stock.consume(conn, tenant_id, &lines).await?;
                    }
                    PickupStatus::Rejected => {
                        let lines = stock_lines_for(conn, order.id, &[pickup.restaurant_id]).await?;
                        stock.release(conn, tenant_id, &lines).await?;
                    }
                    _ => {}
                }

                let mut statuses = Vec::new();
                for p in pickups_of(conn, order.id).await? {
                    statuses.push(p.pickup_status()?);
                }

                match aggregate(current, &statuses) {
                    Aggregate::Unchanged => {}
                    Aggregate::Reject => {
                        let reason = reason.unwrap_or("rejected by restaurant");
                        diesel::update(orders::table.filter(orders::id.eq(order.id)))
                            .set((
                                orders::rejection_reason.eq(reason),
                                orders::rejected_by.eq(action.actor.kind.as_str()),
                            ))
                            .execute(conn)
                            .await?;
                        repo::transition_order(
                            conn,
                            &mut order,
                            OrderStatus::Rejected,
                            action.actor,
                            "order_rejected",
                            format!("Order rejected: {}", reason),
                        )
                        .await?;
                    }
                    Aggregate::Advance(to) => {
                        for step in advancement_path(current, to)? {
                            repo::transition_order(
                                conn,
                                &mut order,
                                step,
                                action.actor,
                                "status_changed",
                                format!("Order moved to {}", step),
                            )
                            .await?;
                        }
                    }
                }

                Ok(())
            })
        })
        .await?;

        info!("Applied {} to order {} for restaurant {}", target, order_id, restaurant_id);
        load_detail(&mut conn, tenant_id, order_id).await
    }

    /// Customer cancellation, allowed only before the kitchen confirms.
    pub async fn cancel(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
        customer_id: Uuid,
        reason: Option<String>,
    ) -> AppResult<OrderDetail> {
        let mut conn = repo::connection(&self.pool).await?;
        let stock = self.stock.clone();

        conn.transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let mut order = repo::lock_order(conn, tenant_id, order_id).await?;
                if order.customer_id != customer_id {
                    return Err(AppError::forbidden("order belongs to another customer"));
                }
                let current = order.order_status()?;
                if !matches!(current, OrderStatus::Pending | OrderStatus::Created) {
                    return Err(AppError::unprocessable(format!(
                        "order in status {} can no longer be cancelled by the customer",
                        current
                    )));
                }

                let reason = reason
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "cancelled by customer".to_string());
                cancel_locked(
                    conn,
                    stock.as_ref(),
                    &mut order,
                    Actor::new(customer_id, ActorType::Customer),
                    &reason,
                    "order_cancelled",
                    format!("Order cancelled by customer: {}", reason),
                )
                .await
            })
        })
        .await?;

        info!("Customer {} cancelled order {}", customer_id, order_id);
        load_detail(&mut conn, tenant_id, order_id).await
    }

    /// Administrative cancellation from any status that may still be cancelled.
    pub async fn force_cancel(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
        actor: Actor,
        reason: &str,
    ) -> AppResult<OrderDetail> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(AppError::bad_request("cancellation reason is required"));
        }

        let mut conn = repo::connection(&self.pool).await?;
        let stock = self.stock.clone();

        conn.transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let mut order = repo::lock_order(conn, tenant_id, order_id).await?;
                cancel_locked(
                    conn,
                    stock.as_ref(),
                    &mut order,
                    actor,
                    &reason,
                    "order_force_cancelled",
                    format!("Order force-cancelled: {}", reason),
                )
                .await
            })
        })
        .await?;

        info!("Order {} force-cancelled", order_id);
        load_detail(&mut conn, tenant_id, order_id).await
    }

    /// Cancels and soft-deletes an order whose payment never completed.
    /// Returns false when the order has already left PENDING.
    pub async fn fail_payment(&self, tenant_id: Uuid, order_id: Uuid) -> AppResult<bool> {
        let mut conn = repo::connection(&self.pool).await?;
        let stock = self.stock.clone();

        let failed = conn
            .transaction::<_, AppError, _>(|conn| {
                Box::pin(async move {
                    let mut order = repo::lock_order(conn, tenant_id, order_id).await?;
                    if order.order_status()? != OrderStatus::Pending {
                        return Ok(false);
                    }

                    cancel_locked(
                        conn,
                        stock.as_ref(),
                        &mut order,
                        Actor::system(),
                        PAYMENT_TIMEOUT_REASON,
                        "payment_timeout",
                        "Order cancelled: payment was not completed in time".to_string(),
                    )
                    .await?;

                    diesel::update(orders::table.filter(orders::id.eq(order.id)))
                        .set(orders::deleted_at.eq(Some(Utc::now())))
                        .execute(conn)
                        .await?;
                    Ok(true)
                })
            })
            .await?;

        if failed {
            info!("Order {} cancelled after payment timeout", order_id);
        }
        Ok(failed)
    }

    /// Confirms a CREATED order whose restaurants did not act before its
    /// deadline. Returns false when there was nothing to do.
    pub async fn auto_confirm(&self, tenant_id: Uuid, order_id: Uuid, now: DateTime<Utc>) -> AppResult<bool> {
        let mut conn = repo::connection(&self.pool).await?;

        conn.transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let mut order = repo::lock_order(conn, tenant_id, order_id).await?;
                let due = order.auto_confirm_at.is_some_and(|at| at <= now);
                if order.order_status()? != OrderStatus::Created || !due {
                    return Ok(false);
                }

                diesel::update(
                    order_pickups::table
                        .filter(order_pickups::order_id.eq(order.id))
                        .filter(order_pickups::status.eq(PickupStatus::New.as_str())),
                )
                .set((
                    order_pickups::status.eq(PickupStatus::Confirmed.as_str()),
                    order_pickups::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .await?;

                repo::transition_order(
                    conn,
                    &mut order,
                    OrderStatus::Confirmed,
                    Actor::system(),
                    "status_changed",
                    "Order auto-confirmed by system",
                )
                .await?;
                Ok(true)
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picked_and_rejected_pickups_hold_no_reservation() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let d = Uuid::new_v4();
        let pickups = vec![
            (a, PickupStatus::New),
            (b, PickupStatus::Picked),
            (c, PickupStatus::Rejected),
            (d, PickupStatus::Ready),
        ];

        assert_eq!(still_reserved(&pickups), vec![a, d]);
    }

    #[test]
    fn reasons_are_attached_to_actions() {
        let restaurant = Uuid::new_v4();
        let action = PickupAction::new(restaurant, Actor::new(restaurant, ActorType::Restaurant))
            .with_reason("out of chicken");
        assert_eq!(action.reason.as_deref(), Some("out of chicken"));
        assert_eq!(action.actor.kind, ActorType::Restaurant);
    }
}
