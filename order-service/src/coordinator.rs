use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use shared::db::models::*;
use shared::db::repo::{self, Actor, TimelineEntry};
use shared::db::schema::{order_items, order_pickups, order_sequences, orders};
use shared::db::DbPool;
use shared::events::{self, OrderCreatedEvent};
use shared::pricing::{self, CartItem, DeliveryPricing, ItemPricing, OrderTotals};
use shared::promo::PromoValidation;
use shared::{ActorType, AppError, AppResult, OrderStatus, PaymentMethod, PaymentStatus, PickupStatus};
use tracing::info;
use uuid::Uuid;

use crate::inventory::{StockLine, StockReservationPort};
use crate::promo;

const DEFAULT_AUTO_CONFIRM_MINUTES: i64 = 5;

#[derive(Debug, Clone)]
pub struct OrderSettings {
    pub order_number_prefix: String,
    pub service_fee: BigDecimal,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            order_number_prefix: "MUN".to_string(),
            service_fee: BigDecimal::zero(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryInfo {
    #[serde(default)]
    pub address: Option<serde_json::Value>,
    pub recipient_name: Option<String>,
    pub recipient_phone: Option<String>,
    pub area: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub promo_code: Option<String>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub delivery: DeliveryInfo,
    #[serde(default)]
    pub customer_note: Option<String>,
    #[serde(default)]
    pub auto_confirm_minutes: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargesRequest {
    pub customer_id: Uuid,
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub promo_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemBreakdown {
    pub product_id: Uuid,
    pub restaurant_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub modifier_price: BigDecimal,
    pub item_subtotal: BigDecimal,
    pub item_discount: BigDecimal,
    pub item_vat: BigDecimal,
    pub promo_discount: BigDecimal,
    pub item_total: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChargeBreakdown {
    #[serde(flatten)]
    pub totals: OrderTotals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promo_result: Option<PromoValidation>,
    pub items: Vec<ItemBreakdown>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub pickups: Vec<OrderPickup>,
    pub timeline: Vec<TimelineEvent>,
}

pub fn format_order_number(prefix: &str, date: NaiveDate, seq: i64) -> String {
    format!("{}-{}-{:06}", prefix, date.format("%y%m%d"), seq)
}

pub fn pickup_number(order_number: &str, position: usize) -> String {
    format!("{}-P{}", order_number, position)
}

pub fn auto_confirm_deadline(now: DateTime<Utc>, minutes: Option<i64>) -> DateTime<Utc> {
    let minutes = minutes.filter(|m| *m > 0).unwrap_or(DEFAULT_AUTO_CONFIRM_MINUTES);
    now + Duration::minutes(minutes)
}

/// Bumps the tenant's counter for `now`'s date and formats the next order number.
pub async fn next_order_number(
    conn: &mut AsyncPgConnection,
    tenant_id: Uuid,
    prefix: &str,
    now: DateTime<Utc>,
) -> AppResult<String> {
    let today = now.date_naive();
    let seq = diesel::insert_into(order_sequences::table)
        .values((
            order_sequences::tenant_id.eq(tenant_id),
            order_sequences::seq_date.eq(today),
            order_sequences::last_value.eq(1i64),
        ))
        .on_conflict((order_sequences::tenant_id, order_sequences::seq_date))
        .do_update()
        .set(order_sequences::last_value.eq(order_sequences::last_value + 1i64))
        .returning(order_sequences::last_value)
        .get_result::<i64>(conn)
        .await?;
    Ok(format_order_number(prefix, today, seq))
}

pub async fn load_detail(conn: &mut AsyncPgConnection, tenant_id: Uuid, order_id: Uuid) -> AppResult<OrderDetail> {
    let order = repo::find_order(conn, tenant_id, order_id).await?;
    let items = order_items::table
        .filter(order_items::order_id.eq(order.id))
        .order(order_items::created_at.asc())
        .select(OrderItem::as_select())
        .load(conn)
        .await?;
    let pickups = order_pickups::table
        .filter(order_pickups::order_id.eq(order.id))
        .order(order_pickups::pickup_number.asc())
        .select(OrderPickup::as_select())
        .load(conn)
        .await?;
    let timeline = repo::list_timeline(conn, order.id).await?;
    Ok(OrderDetail {
        order,
        items,
        pickups,
        timeline,
    })
}

fn stock_lines(items: &[CartItem]) -> Vec<StockLine> {
    items
        .iter()
        .map(|item| StockLine {
            product_id: item.product_id,
            restaurant_id: item.restaurant_id,
            quantity: item.quantity,
        })
        .collect()
}

fn breakdown(items: &[CartItem], priced: &[ItemPricing]) -> Vec<ItemBreakdown> {
    items
        .iter()
        .zip(priced)
        .map(|(item, p)| ItemBreakdown {
            product_id: item.product_id,
            restaurant_id: item.restaurant_id,
            quantity: item.quantity,
            unit_price: item.unit_price.clone(),
            modifier_price: item.modifier_price.clone(),
            item_subtotal: p.subtotal.clone(),
            item_discount: p.discount.clone(),
            item_vat: p.vat.clone(),
            promo_discount: p.promo_share.clone(),
            item_total: p.total.clone(),
        })
        .collect()
}

/// Owns the atomic order creation workflow.
pub struct OrderCoordinator {
    pool: DbPool,
    stock: Arc<dyn StockReservationPort>,
    delivery: Arc<dyn DeliveryPricing>,
    settings: OrderSettings,
}

impl OrderCoordinator {
    pub fn new(
        pool: DbPool,
        stock: Arc<dyn StockReservationPort>,
        delivery: Arc<dyn DeliveryPricing>,
        settings: OrderSettings,
    ) -> Self {
        Self {
            pool,
            stock,
            delivery,
            settings,
        }
    }

    /// Prices a cart the way `create_order` would, without reserving or writing anything.
    pub async fn calculate_charges(&self, tenant_id: Uuid, request: ChargesRequest) -> AppResult<ChargeBreakdown> {
        pricing::validate_cart(&request.items)?;
        let mut conn = repo::connection(&self.pool).await?;

        let mut cart = pricing::price_cart(&request.items);
        let mut promo_discount = BigDecimal::zero();
        let mut promo_result = None;

        if let Some(code) = request.promo_code.as_deref().filter(|c| !c.is_empty()) {
            let (_, result) = promo::validate(
                &mut conn,
                tenant_id,
                request.customer_id,
                code,
                &request.items,
                &cart.subtotal,
                Utc::now(),
            )
            .await?;
            if result.valid {
                promo_discount = result.discount_amount.clone();
            }
            promo_result = Some(result);
        }

        pricing::allocate_promo(&mut cart.items, &promo_discount);
        let delivery = self.delivery.delivery_charge(&request.items, &cart.subtotal);
        let totals = OrderTotals::compute(&cart, promo_discount, delivery, self.settings.service_fee.clone());

        Ok(ChargeBreakdown {
            totals,
            promo_result,
            items: breakdown(&request.items, &cart.items),
        })
    }

    pub async fn create_order(&self, tenant_id: Uuid, request: CreateOrderRequest) -> AppResult<OrderDetail> {
        pricing::validate_cart(&request.items)?;
        let mut conn = repo::connection(&self.pool).await?;

        let stock = self.stock.clone();
        let delivery = self.delivery.clone();
        let settings = self.settings.clone();

        let order_id = conn
            .transaction::<_, AppError, _>(|conn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let order_number =
                        next_order_number(conn, tenant_id, &settings.order_number_prefix, now).await?;

                    let mut cart = pricing::price_cart(&request.items);

                    stock.reserve(conn, tenant_id, &stock_lines(&request.items)).await?;

                    let mut promo_applied = None;
                    if let Some(code) = request.promo_code.as_deref().filter(|c| !c.is_empty()) {
                        let (rule, result) = promo::validate(
                            conn,
                            tenant_id,
                            request.customer_id,
                            code,
                            &request.items,
                            &cart.subtotal,
                            now,
                        )
                        .await?;
                        match rule {
                            Some(rule) if result.valid => promo_applied = Some((rule, result)),
                            _ => {
                                return Err(AppError::bad_request(format!(
                                    "promo code invalid: {}",
                                    result.reason()
                                )))
                            }
                        }
                    }

                    let promo_discount = promo_applied
                        .as_ref()
                        .map(|(_, result)| result.discount_amount.clone())
                        .unwrap_or_else(BigDecimal::zero);
                    pricing::allocate_promo(&mut cart.items, &promo_discount);

                    let delivery_charge = delivery.delivery_charge(&request.items, &cart.subtotal);
                    let totals = OrderTotals::compute(
                        &cart,
                        promo_discount,
                        delivery_charge,
                        settings.service_fee.clone(),
                    );

                    let status = OrderStatus::initial_for(request.payment_method);
                    let promo_snapshot = match &promo_applied {
                        Some((_, result)) => Some(
                            serde_json::to_value(result)
                                .map_err(|e| AppError::internal("serialize promo snapshot", e))?,
                        ),
                        None => None,
                    };

                    let new_order = NewOrder {
                        id: Uuid::new_v4(),
                        tenant_id,
                        order_number: order_number.clone(),
                        customer_id: request.customer_id,
                        status: status.as_str().to_string(),
                        payment_status: PaymentStatus::Unpaid.as_str().to_string(),
                        payment_method: request.payment_method.as_str().to_string(),
                        subtotal: totals.subtotal.clone(),
                        item_discount_total: totals.item_discount_total.clone(),
                        promo_discount_total: totals.promo_discount_total.clone(),
                        vat_total: totals.vat_total.clone(),
                        delivery_charge: totals.delivery_charge.clone(),
                        service_fee: totals.service_fee.clone(),
                        total_amount: totals.total_amount.clone(),
                        promo_id: promo_applied.as_ref().map(|(rule, _)| rule.id),
                        promo_code: promo_applied.as_ref().map(|(rule, _)| rule.code.clone()),
                        promo_snapshot,
                        delivery_address: request
                            .delivery
                            .address
                            .clone()
                            .unwrap_or_else(|| serde_json::json!({})),
                        delivery_recipient_name: request.delivery.recipient_name.clone(),
                        delivery_recipient_phone: request.delivery.recipient_phone.clone(),
                        delivery_area: request.delivery.area.clone(),
                        customer_note: request.customer_note.clone().filter(|n| !n.is_empty()),
                        auto_confirm_at: Some(auto_confirm_deadline(now, request.auto_confirm_minutes)),
                    };

                    let order = diesel::insert_into(orders::table)
                        .values(&new_order)
                        .returning(Order::as_returning())
                        .get_result(conn)
                        .await?;

                    let item_rows: Vec<NewOrderItem> = request
                        .items
                        .iter()
                        .zip(&cart.items)
                        .map(|(item, priced)| NewOrderItem {
                            id: Uuid::new_v4(),
                            order_id: order.id,
                            tenant_id,
                            restaurant_id: item.restaurant_id,
                            product_id: item.product_id,
                            category_id: item.category_id,
                            product_name: item.product_name.clone(),
                            product_snapshot: item
                                .product_snapshot
                                .clone()
                                .unwrap_or_else(|| serde_json::json!({})),
                            selected_modifiers: item
                                .selected_modifiers
                                .clone()
                                .unwrap_or_else(|| serde_json::json!([])),
                            special_instructions: item.special_instructions.clone(),
                            quantity: item.quantity,
                            unit_price: item.unit_price.clone(),
                            modifier_price: item.modifier_price.clone(),
                            item_subtotal: priced.subtotal.clone(),
                            item_discount: priced.discount.clone(),
                            item_vat: priced.vat.clone(),
                            promo_discount: priced.promo_share.clone(),
                            item_total: priced.total.clone(),
                        })
                        .collect();
                    diesel::insert_into(order_items::table)
                        .values(&item_rows)
                        .execute(conn)
                        .await?;

                    let groups = pricing::group_by_restaurant(&request.items, &cart.items);
                    let pickup_rows: Vec<NewOrderPickup> = groups
                        .iter()
                        .enumerate()
                        .map(|(idx, group)| NewOrderPickup {
                            id: Uuid::new_v4(),
                            order_id: order.id,
                            tenant_id,
                            restaurant_id: group.restaurant_id,
                            pickup_number: pickup_number(&order_number, idx + 1),
                            status: PickupStatus::New.as_str().to_string(),
                            items_subtotal: group.subtotal.clone(),
                            items_discount: group.discount.clone(),
                            items_vat: group.vat.clone(),
                            items_total: group.total.clone(),
                        })
                        .collect();
                    diesel::insert_into(order_pickups::table)
                        .values(&pickup_rows)
                        .execute(conn)
                        .await?;

                    let mut created = TimelineEntry::new(
                        &order,
                        "order_created",
                        "Order created",
                        Actor::new(request.customer_id, ActorType::Customer),
                    );
                    created.new_status = Some(status);
                    repo::append_timeline(conn, created).await?;

                    if let Some((rule, result)) = &promo_applied {
                        promo::redeem(conn, tenant_id, request.customer_id, order.id, rule, result).await?;
                    }

                    repo::enqueue_outbox(
                        conn,
                        tenant_id,
                        events::AGGREGATE_ORDER,
                        order.id,
                        events::ORDER_CREATED,
                        &OrderCreatedEvent {
                            order_id: order.id,
                            tenant_id,
                            order_number: order.order_number.clone(),
                            customer_id: order.customer_id,
                            status,
                            payment_method: request.payment_method,
                            total_amount: order.total_amount.clone(),
                            restaurant_ids: groups.iter().map(|g| g.restaurant_id).collect(),
                        },
                    )
                    .await?;

                    Ok(order.id)
                })
            })
            .await?;

        info!("Created order {} for tenant {}", order_id, tenant_id);
        load_detail(&mut conn, tenant_id, order_id).await
    }

    pub async fn get_order(&self, tenant_id: Uuid, order_id: Uuid) -> AppResult<OrderDetail> {
        let mut conn = repo::connection(&self.pool).await?;
        load_detail(&mut conn, tenant_id, order_id).await
    }
}
