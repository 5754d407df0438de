use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use num_traits::Zero;
use serde::Serialize;
use shared::db::models::{NewWalletTransaction, WalletTransaction};
use shared::db::repo;
use shared::db::schema::{users, wallet_transactions};
use shared::db::DbPool;
use shared::{AppError, AppResult, WalletDirection, WalletSource};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct WalletBalance {
    pub user_id: Uuid,
    pub balance: BigDecimal,
}

/// Customer wallet bookkeeping. Every balance change writes a ledger row
/// carrying the balance it produced.
#[derive(Clone)]
pub struct WalletService {
    pool: DbPool,
}

impl WalletService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn credit(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        order_id: Option<Uuid>,
        source: WalletSource,
        amount: BigDecimal,
        description: impl Into<String>,
    ) -> AppResult<WalletTransaction> {
        if amount <= BigDecimal::zero() {
            return Err(AppError::bad_request("credit amount must be positive"));
        }
        let description = description.into();
        let mut conn = repo::connection(&self.pool).await?;

        let entry = conn
            .transaction::<_, AppError, _>(|conn| {
                Box::pin(async move {
                    let balance_after: BigDecimal = diesel::update(
                        users::table
                            .filter(users::id.eq(user_id))
                            .filter(users::tenant_id.eq(tenant_id)),
                    )
                    .set((
                        users::wallet_balance.eq(users::wallet_balance + &amount),
                        users::updated_at.eq(Utc::now()),
                    ))
                    .returning(users::wallet_balance)
                    .get_result(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::not_found("user"))?;

                    let entry = diesel::insert_into(wallet_transactions::table)
                        .values(&NewWalletTransaction {
                            id: Uuid::new_v4(),
                            tenant_id,
                            user_id,
                            order_id,
                            direction: WalletDirection::Credit.as_str().to_string(),
                            source: source.as_str().to_string(),
                            amount,
                            balance_after,
                            description: Some(description),
                        })
                        .returning(WalletTransaction::as_returning())
                        .get_result(conn)
                        .await?;
                    Ok(entry)
                })
            })
            .await?;

        info!(
            "Credited {} to wallet of user {} ({}), balance {}",
            entry.amount, user_id, source, entry.balance_after
        );
        Ok(entry)
    }

    pub async fn balance(&self, tenant_id: Uuid, user_id: Uuid) -> AppResult<WalletBalance> {
        let mut conn = repo::connection(&self.pool).await?;
        let balance = users::table
            .filter(users::id.eq(user_id))
            .filter(users::tenant_id.eq(tenant_id))
            .select(users::wallet_balance)
            .first::<BigDecimal>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AppError::not_found("user"))?;
        Ok(WalletBalance { user_id, balance })
    }
}
