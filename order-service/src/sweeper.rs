use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use shared::db::repo;
use shared::db::schema::orders;
use shared::db::DbPool;
use shared::OrderStatus;
use tokio::time;
use tracing::{error, info};
use uuid::Uuid;

use crate::lifecycle::OrderLifecycle;

const SWEEP_BATCH: i64 = 100;

#[derive(Debug, Clone, Copy)]
pub struct SweepSettings {
    pub auto_confirm_interval: Duration,
    pub payment_timeout_interval: Duration,
    pub payment_timeout: chrono::Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            auto_confirm_interval: Duration::from_secs(60),
            payment_timeout_interval: Duration::from_secs(300),
            payment_timeout: chrono::Duration::minutes(30),
        }
    }
}

/// Time-driven fallbacks for orders nobody acted on.
pub struct OrderSweeper {
    pool: DbPool,
    lifecycle: Arc<OrderLifecycle>,
    settings: SweepSettings,
}

impl OrderSweeper {
    pub fn new(pool: DbPool, lifecycle: Arc<OrderLifecycle>, settings: SweepSettings) -> Self {
        Self {
            pool,
            lifecycle,
            settings,
        }
    }

    pub async fn run_auto_confirm(&self) {
        let mut interval = time::interval(self.settings.auto_confirm_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.auto_confirm_due(Utc::now()).await {
                error!("Auto-confirm sweep failed: {}", e);
            }
        }
    }

    pub async fn run_payment_timeouts(&self) {
        let mut interval = time::interval(self.settings.payment_timeout_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.expire_unpaid(Utc::now()).await {
                error!("Payment timeout sweep failed: {}", e);
            }
        }
    }

    pub async fn auto_confirm_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let candidates = {
            let mut conn = repo::connection(&self.pool).await?;
            orders::table
                .filter(orders::status.eq(OrderStatus::Created.as_str()))
                .filter(orders::auto_confirm_at.le(now))
                .filter(orders::deleted_at.is_null())
                .order(orders::auto_confirm_at.asc())
                .limit(SWEEP_BATCH)
                .select((orders::tenant_id, orders::id))
                .load::<(Uuid, Uuid)>(&mut conn)
                .await?
        };

        let mut confirmed = 0;
        for (tenant_id, order_id) in candidates {
            match self.lifecycle.auto_confirm(tenant_id, order_id, now).await {
                Ok(true) => confirmed += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to auto-confirm order {}: {}", order_id, e),
            }
        }
        if confirmed > 0 {
            info!("Auto-confirmed {} orders", confirmed);
        }
        Ok(confirmed)
    }

    pub async fn expire_unpaid(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.settings.payment_timeout;
        let candidates = {
            let mut conn = repo::connection(&self.pool).await?;
            orders::table
                .filter(orders::status.eq(OrderStatus::Pending.as_str()))
                .filter(orders::created_at.lt(cutoff))
                .filter(orders::deleted_at.is_null())
                .order(orders::created_at.asc())
                .limit(SWEEP_BATCH)
                .select((orders::tenant_id, orders::id))
                .load::<(Uuid, Uuid)>(&mut conn)
                .await?
        };

        let mut expired = 0;
        for (tenant_id, order_id) in candidates {
            match self.lifecycle.fail_payment(tenant_id, order_id).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to expire unpaid order {}: {}", order_id, e),
            }
        }
        if expired > 0 {
            info!("Cancelled {} orders after payment timeout", expired);
        }
        Ok(expired)
    }
}
