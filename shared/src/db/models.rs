use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schema::*;
use crate::error::AppResult;
use crate::status::{OrderStatus, PaymentMethod, PaymentStatus, PickupStatus, TxnStatus};

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Order {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: String,
    pub payment_status: String,
    pub payment_method: String,
    pub subtotal: BigDecimal,
    pub item_discount_total: BigDecimal,
    pub promo_discount_total: BigDecimal,
    pub vat_total: BigDecimal,
    pub delivery_charge: BigDecimal,
    pub service_fee: BigDecimal,
    pub total_amount: BigDecimal,
    pub promo_id: Option<Uuid>,
    pub promo_code: Option<String>,
    pub promo_snapshot: Option<serde_json::Value>,
    pub delivery_address: serde_json::Value,
    pub delivery_recipient_name: Option<String>,
    pub delivery_recipient_phone: Option<String>,
    pub delivery_area: Option<String>,
    pub customer_note: Option<String>,
    pub auto_confirm_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub rejected_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn order_status(&self) -> AppResult<OrderStatus> {
        self.status.parse()
    }

    pub fn payment_state(&self) -> AppResult<PaymentStatus> {
        self.payment_status.parse()
    }

    pub fn method(&self) -> AppResult<PaymentMethod> {
        self.payment_method.parse()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = orders)]
pub struct NewOrder {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: String,
    pub payment_status: String,
    pub payment_method: String,
    pub subtotal: BigDecimal,
    pub item_discount_total: BigDecimal,
    pub promo_discount_total: BigDecimal,
    pub vat_total: BigDecimal,
    pub delivery_charge: BigDecimal,
    pub service_fee: BigDecimal,
    pub total_amount: BigDecimal,
    pub promo_id: Option<Uuid>,
    pub promo_code: Option<String>,
    pub promo_snapshot: Option<serde_json::Value>,
    pub delivery_address: serde_json::Value,
    pub delivery_recipient_name: Option<String>,
    pub delivery_recipient_phone: Option<String>,
    pub delivery_area: Option<String>,
    pub customer_note: Option<String>,
    pub auto_confirm_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub restaurant_id: Uuid,
    pub product_id: Uuid,
    pub category_id: Option<Uuid>,
    pub product_name: String,
    pub product_snapshot: serde_json::Value,
    pub selected_modifiers: serde_json::Value,
    pub special_instructions: Option<String>,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub modifier_price: BigDecimal,
    pub item_subtotal: BigDecimal,
    pub item_discount: BigDecimal,
    pub item_vat: BigDecimal,
    pub promo_discount: BigDecimal,
    pub item_total: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = order_items)]
pub struct NewOrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub restaurant_id: Uuid,
    pub product_id: Uuid,
    pub category_id: Option<Uuid>,
    pub product_name: String,
    pub product_snapshot: serde_json::Value,
    pub selected_modifiers: serde_json::Value,
    pub special_instructions: Option<String>,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub modifier_price: BigDecimal,
    pub item_subtotal: BigDecimal,
    pub item_discount: BigDecimal,
    pub item_vat: BigDecimal,
    pub promo_discount: BigDecimal,
    pub item_total: BigDecimal,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = order_pickups)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderPickup {
    pub id: Uuid,
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub restaurant_id: Uuid,
    pub pickup_number: String,
    pub status: String,
    pub items_subtotal: BigDecimal,
    pub items_discount: BigDecimal,
    pub items_vat: BigDecimal,
    pub items_total: BigDecimal,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderPickup {
    pub fn pickup_status(&self) -> AppResult<PickupStatus> {
        self.status.parse()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = order_pickups)]
pub struct NewOrderPickup {
    pub id: Uuid,
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub restaurant_id: Uuid,
    pub pickup_number: String,
    pub status: String,
    pub items_subtotal: BigDecimal,
    pub items_discount: BigDecimal,
    pub items_vat: BigDecimal,
    pub items_total: BigDecimal,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = order_timeline_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TimelineEvent {
    pub id: Uuid,
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: String,
    pub previous_status: Option<String>,
    pub new_status: Option<String>,
    pub description: String,
    pub actor_id: Option<Uuid>,
    pub actor_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = order_timeline_events)]
pub struct NewTimelineEvent {
    pub id: Uuid,
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: String,
    pub previous_status: Option<String>,
    pub new_status: Option<String>,
    pub description: String,
    pub actor_id: Option<Uuid>,
    pub actor_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = payment_transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub payment_method: String,
    pub status: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub gateway_payment_id: Option<String>,
    pub gateway_txn_id: Option<String>,
    pub gateway_ref_id: Option<String>,
    pub gateway_fee: Option<BigDecimal>,
    pub gateway_response: serde_json::Value,
    pub callback_received_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentTransaction {
    pub fn txn_status(&self) -> AppResult<TxnStatus> {
        self.status.parse()
    }

    pub fn method(&self) -> AppResult<PaymentMethod> {
        self.payment_method.parse()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = payment_transactions)]
pub struct NewPaymentTransaction {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub payment_method: String,
    pub status: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub gateway_payment_id: Option<String>,
    pub gateway_response: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = refunds)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Refund {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub transaction_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub reason: String,
    pub status: String,
    pub gateway_refund_id: Option<String>,
    pub gateway_response: serde_json::Value,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = refunds)]
pub struct NewRefund {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub transaction_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub reason: String,
    pub status: String,
    pub gateway_refund_id: Option<String>,
    pub gateway_response: serde_json::Value,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub wallet_balance: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = wallet_transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct WalletTransaction {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub direction: String,
    pub source: String,
    pub amount: BigDecimal,
    pub balance_after: BigDecimal,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = wallet_transactions)]
pub struct NewWalletTransaction {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub direction: String,
    pub source: String,
    pub amount: BigDecimal,
    pub balance_after: BigDecimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = outbox_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OutboxEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub max_attempts: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = inventory_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct InventoryItem {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub restaurant_id: Uuid,
    pub stock_qty: i32,
    pub reserved_qty: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = inventory_items)]
pub struct NewInventoryItem {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub restaurant_id: Uuid,
    pub stock_qty: i32,
    pub reserved_qty: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = promos)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Promo {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub code: String,
    pub promo_type: String,
    pub discount_amount: BigDecimal,
    pub max_discount_cap: Option<BigDecimal>,
    pub min_order_amount: Option<BigDecimal>,
    pub cashback_amount: BigDecimal,
    pub max_total_uses: Option<i32>,
    pub total_uses: i32,
    pub total_discount_given: BigDecimal,
    pub max_uses_per_user: i32,
    pub applies_to: String,
    pub is_active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = promos)]
pub struct NewPromo {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub code: String,
    pub promo_type: String,
    pub discount_amount: BigDecimal,
    pub max_discount_cap: Option<BigDecimal>,
    pub min_order_amount: Option<BigDecimal>,
    pub cashback_amount: BigDecimal,
    pub max_total_uses: Option<i32>,
    pub max_uses_per_user: i32,
    pub applies_to: String,
    pub is_active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = promo_usages)]
pub struct NewPromoUsage {
    pub id: Uuid,
    pub promo_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub discount_amount: BigDecimal,
    pub cashback_amount: BigDecimal,
}
