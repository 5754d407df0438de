#![allow(dead_code)]

use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use bigdecimal::BigDecimal;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use order_service::coordinator::{CreateOrderRequest, DeliveryInfo, OrderCoordinator, OrderSettings};
use order_service::inventory::PgStockReservation;
use order_service::lifecycle::OrderLifecycle;
use shared::db::models::{InventoryItem, NewInventoryItem};
use shared::db::schema::inventory_items;
use shared::db::{create_pool, run_migrations, DbPool};
use shared::pricing::{CartItem, FlatDeliveryCharge};
use shared::PaymentMethod;
use uuid::Uuid;

static MIGRATED: OnceLock<()> = OnceLock::new();

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

pub struct TestContext {
    pub pool: DbPool,
    pub tenant_id: Uuid,
    pub coordinator: OrderCoordinator,
    pub lifecycle: Arc<OrderLifecycle>,
}

/// Connects to `TEST_DATABASE_URL`, or returns `None` so the test can skip.
pub async fn setup() -> Option<TestContext> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    MIGRATED.get_or_init(|| run_migrations(&url).expect("migrations"));
    let pool = create_pool(&url).await.expect("pool");

    let stock = Arc::new(PgStockReservation::new());
    let coordinator = OrderCoordinator::new(
        pool.clone(),
        stock.clone(),
        Arc::new(FlatDeliveryCharge::default()),
        OrderSettings::default(),
    );
    let lifecycle = Arc::new(OrderLifecycle::new(pool.clone(), stock));

    Some(TestContext {
        pool,
        tenant_id: Uuid::new_v4(),
        coordinator,
        lifecycle,
    })
}

impl TestContext {
    pub async fn seed_stock(&self, product_id: Uuid, restaurant_id: Uuid, stock_qty: i32) {
        let mut conn = self.pool.get().await.unwrap();
        diesel::insert_into(inventory_items::table)
            .values(&NewInventoryItem {
                id: Uuid::new_v4(),
                tenant_id: self.tenant_id,
                product_id,
                restaurant_id,
                stock_qty,
                reserved_qty: 0,
            })
            .execute(&mut conn)
            .await
            .unwrap();
    }

    pub async fn stock(&self, product_id: Uuid, restaurant_id: Uuid) -> InventoryItem {
        let mut conn = self.pool.get().await.unwrap();
        inventory_items::table
            .filter(inventory_items::tenant_id.eq(self.tenant_id))
            .filter(inventory_items::product_id.eq(product_id))
            .filter(inventory_items::restaurant_id.eq(restaurant_id))
            .select(InventoryItem::as_select())
            .first(&mut conn)
            .await
            .unwrap()
    }
}

pub fn item(product_id: Uuid, restaurant_id: Uuid, quantity: i32, unit_price: &str) -> CartItem {
    CartItem {
        product_id,
        restaurant_id,
        category_id: None,
        product_name: format!("product {}", product_id),
        quantity,
        unit_price: dec(unit_price),
        modifier_price: dec("0"),
        item_discount: dec("0"),
        item_vat: dec("0"),
        product_snapshot: None,
        selected_modifiers: None,
        special_instructions: None,
    }
}

pub fn order_request(customer_id: Uuid, items: Vec<CartItem>, method: PaymentMethod) -> CreateOrderRequest {
    CreateOrderRequest {
        customer_id,
        items,
        promo_code: None,
        payment_method: method,
        delivery: DeliveryInfo {
            address: Some(serde_json::json!({"line1": "House 12, Road 5"})),
            recipient_name: Some("Test Customer".to_string()),
            recipient_phone: Some("01700000000".to_string()),
            area: Some("Dhanmondi".to_string()),
        },
        customer_note: None,
        auto_confirm_minutes: None,
    }
}
