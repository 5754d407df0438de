use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use shared::db::models::PaymentTransaction;
use shared::db::repo;
use shared::db::schema::payment_transactions;
use shared::db::DbPool;
use shared::{AppResult, TxnStatus};
use tokio::time;
use tracing::{debug, error, info};

use crate::gateway::GatewayRegistry;
use crate::settlement::{self, Settlement, SettlementSource};

#[derive(Debug, Clone, Copy)]
pub struct ReconciliationSettings {
    pub interval: Duration,
    pub cutoff: chrono::Duration,
    pub batch_size: i64,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            cutoff: chrono::Duration::minutes(15),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub checked: usize,
    pub settled: usize,
    pub still_pending: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Asks the gateways about payments whose callback never arrived.
pub struct ReconciliationJob {
    pool: DbPool,
    gateways: GatewayRegistry,
    settings: ReconciliationSettings,
}

impl ReconciliationJob {
    pub fn new(pool: DbPool, gateways: GatewayRegistry, settings: ReconciliationSettings) -> Self {
        Self {
            pool,
            gateways,
            settings,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.settings.interval);

        loop {
            interval.tick().await;

            match self.run_once(Utc::now()).await {
                Ok(report) if report.checked > 0 => info!("Reconciliation cycle: {:?}", report),
                Ok(_) => {}
                Err(e) => error!("Reconciliation cycle failed: {}", e),
            }
        }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> AppResult<ReconciliationReport> {
        let cutoff = now - self.settings.cutoff;
        let stale = {
            let mut conn = repo::connection(&self.pool).await?;
            payment_transactions::table
                .filter(payment_transactions::status.eq(TxnStatus::Pending.as_str()))
                .filter(payment_transactions::created_at.lt(cutoff))
                .order(payment_transactions::created_at.asc())
                .limit(self.settings.batch_size)
                .select(PaymentTransaction::as_select())
                .load(&mut conn)
                .await?
        };

        let mut report = ReconciliationReport::default();
        for txn in stale {
            report.checked += 1;
            match self.reconcile(&txn).await {
                Ok(Outcome::Settled) => report.settled += 1,
                Ok(Outcome::StillPending) => report.still_pending += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.errors += 1;
                    error!("Failed to reconcile transaction {}: {}", txn.id, e);
                }
            }
        }
        Ok(report)
    }

    async fn reconcile(&self, txn: &PaymentTransaction) -> AppResult<Outcome> {
        let gateway = match self.gateways.get(txn.method()?) {
            Some(gateway) => gateway,
            None => {
                debug!("No gateway configured for {} transaction {}", txn.payment_method, txn.id);
                return Ok(Outcome::Skipped);
            }
        };
        let payment_id = match &txn.gateway_payment_id {
            Some(id) => id,
            None => return Ok(Outcome::Skipped),
        };

        let reply = match gateway.query_status(payment_id).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(
                    "ALERT: {} unreachable while reconciling transaction {}: {}",
                    gateway.name(),
                    txn.id,
                    e
                );
                return Ok(Outcome::StillPending);
            }
        };

        let settlement = match Settlement::from_status(reply) {
            Some(settlement) => settlement,
            None => return Ok(Outcome::StillPending),
        };

        let mut conn = repo::connection(&self.pool).await?;
        let outcome = settlement::settle(&mut conn, txn.id, settlement, SettlementSource::Reconciliation).await?;
        if outcome.applied {
            Ok(Outcome::Settled)
        } else {
            Ok(Outcome::Skipped)
        }
    }
}

enum Outcome {
    Settled,
    StillPending,
    Skipped,
}
