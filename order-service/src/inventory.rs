use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use shared::db::schema::inventory_items;
use shared::{AppError, AppResult};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: Uuid,
    pub restaurant_id: Uuid,
    pub quantity: i32,
}

/// Inventory operations the order engine needs. Every call runs on the
/// caller's connection so it commits or rolls back with the caller's transaction.
#[async_trait]
pub trait StockReservationPort: Send + Sync {
    /// Fails with `BadRequest` when any line cannot be covered by available stock.
    async fn reserve(&self, conn: &mut AsyncPgConnection, tenant_id: Uuid, lines: &[StockLine]) -> AppResult<()>;

    async fn release(&self, conn: &mut AsyncPgConnection, tenant_id: Uuid, lines: &[StockLine]) -> AppResult<()>;

    async fn consume(&self, conn: &mut AsyncPgConnection, tenant_id: Uuid, lines: &[StockLine]) -> AppResult<()>;
}

/// Stock kept in `inventory_items`, adjusted with conditional updates.
#[derive(Debug, Clone, Default)]
pub struct PgStockReservation;

impl PgStockReservation {
    pub fn new() -> Self {
        Self
    }
}

/// Same product and restaurant lines merged, sorted so concurrent orders touch rows in one order.
fn normalize(lines: &[StockLine]) -> Vec<StockLine> {
    let mut merged: Vec<StockLine> = Vec::with_capacity(lines.len());
    for line in lines {
        match merged
            .iter_mut()
            .find(|m| m.product_id == line.product_id && m.restaurant_id == line.restaurant_id)
        {
            Some(existing) => existing.quantity += line.quantity,
            None => merged.push(line.clone()),
        }
    }
    merged.sort_by_key(|l| (l.restaurant_id, l.product_id));
    merged
}

#[async_trait]
impl StockReservationPort for PgStockReservation {
    async fn reserve(&self, conn: &mut AsyncPgConnection, tenant_id: Uuid, lines: &[StockLine]) -> AppResult<()> {
        for line in normalize(lines) {
            let updated = diesel::update(
                inventory_items::table
                    .filter(inventory_items::tenant_id.eq(tenant_id))
                    .filter(inventory_items::product_id.eq(line.product_id))
                    .filter(inventory_items::restaurant_id.eq(line.restaurant_id))
                    .filter((inventory_items::stock_qty - inventory_items::reserved_qty).ge(line.quantity)),
            )
            .set((
                inventory_items::reserved_qty.eq(inventory_items::reserved_qty + line.quantity),
                inventory_items::updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .await?;

            if updated == 0 {
                return Err(AppError::bad_request(format!(
                    "insufficient stock for product {}",
                    line.product_id
                )));
            }
        }
        Ok(())
    }

    async fn release(&self, conn: &mut AsyncPgConnection, tenant_id: Uuid, lines: &[StockLine]) -> AppResult<()> {
        for line in normalize(lines) {
            let updated = diesel::update(
                inventory_items::table
                    .filter(inventory_items::tenant_id.eq(tenant_id))
                    .filter(inventory_items::product_id.eq(line.product_id))
                    .filter(inventory_items::restaurant_id.eq(line.restaurant_id))
                    .filter(inventory_items::reserved_qty.ge(line.quantity)),
            )
            .set((
                inventory_items::reserved_qty.eq(inventory_items::reserved_qty - line.quantity),
                inventory_items::updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .await?;

            if updated == 0 {
                warn!(
                    "Nothing to release for product {} at restaurant {}",
                    line.product_id, line.restaurant_id
                );
            }
        }
        Ok(())
    }

    async fn consume(&self, conn: &mut AsyncPgConnection, tenant_id: Uuid, lines: &[StockLine]) -> AppResult<()> {
        for line in normalize(lines) {
            let updated = diesel::update(
                inventory_items::table
                    .filter(inventory_items::tenant_id.eq(tenant_id))
                    .filter(inventory_items::product_id.eq(line.product_id))
                    .filter(inventory_items::restaurant_id.eq(line.restaurant_id))
                    .filter(inventory_items::reserved_qty.ge(line.quantity)),
            )
            .set((
                inventory_items::stock_qty.eq(inventory_items::stock_qty - line.quantity),
                inventory_items::reserved_qty.eq(inventory_items::reserved_qty - line.quantity),
                inventory_items::updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .await?;

            if updated == 0 {
                warn!(
                    "Reserved stock missing while consuming product {} at restaurant {}",
                    line.product_id, line.restaurant_id
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_lines_are_merged() {
        let restaurant = Uuid::new_v4();
        let product = Uuid::new_v4();
        let other = Uuid::new_v4();
        let lines = vec![
            StockLine { product_id: product, restaurant_id: restaurant, quantity: 2 },
            StockLine { product_id: other, restaurant_id: restaurant, quantity: 1 },
            StockLine { product_id: product, restaurant_id: restaurant, quantity: 3 },
        ];

        let merged = normalize(&lines);
        assert_eq!(merged.len(), 2);
        let line = merged.iter().find(|l| l.product_id == product).unwrap();
        assert_eq!(line.quantity, 5);
    }
}
