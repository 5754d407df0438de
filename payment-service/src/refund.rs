//! Refunds against paid orders.
//!
//! A refund row is committed before any money moves. Gateway refunds are then
//! sent outside the database transaction and the row is settled with the
//! provider's answer. Wallet credits and the timeline entry follow the commit
//! and only log when they fail.

use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use num_traits::Zero;
use serde::Deserialize;
use serde_json::json;
use shared::db::models::{NewRefund, Order, PaymentTransaction, Refund};
use shared::db::repo::{self, Actor, TimelineEntry};
use shared::db::schema::{payment_transactions, refunds};
use shared::db::DbPool;
use shared::{AppError, AppResult, PaymentMethod, PaymentStatus, RefundStatus, TxnStatus, WalletSource};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gateway::{GatewayRegistry, PaymentGateway, RefundRequest, RefundResponse};
use crate::wallet::WalletService;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRefundRequest {
    pub amount: BigDecimal,
    pub reason: String,
}

/// Refunded amount that still counts against the order total.
pub async fn refunded_so_far(conn: &mut AsyncPgConnection, order_id: Uuid) -> AppResult<BigDecimal> {
    let total = refunds::table
        .filter(refunds::order_id.eq(order_id))
        .filter(refunds::status.ne(RefundStatus::Rejected.as_str()))
        .select(diesel::dsl::sum(refunds::amount))
        .first::<Option<BigDecimal>>(conn)
        .await?;
    Ok(total.unwrap_or_else(BigDecimal::zero))
}

/// Payment status after `cumulative` of `total` has been refunded.
pub fn payment_status_after(cumulative: &BigDecimal, total: &BigDecimal) -> PaymentStatus {
    if cumulative.is_zero() {
        PaymentStatus::Paid
    } else if cumulative >= total {
        PaymentStatus::Refunded
    } else {
        PaymentStatus::PartiallyRefunded
    }
}

/// Refund status for a provider's reply.
pub fn gateway_refund_status(status: TxnStatus) -> RefundStatus {
    match status {
        TxnStatus::Success | TxnStatus::Refunded => RefundStatus::Processed,
        TxnStatus::Pending => RefundStatus::Pending,
        TxnStatus::Failed | TxnStatus::Cancelled => RefundStatus::Rejected,
    }
}

/// A committed refund row and what is needed to finish it.
struct Recorded {
    refund: Refund,
    order: Order,
    method: PaymentMethod,
    /// Provider reference to refund against; set for gateway methods only.
    gateway_txn_id: Option<String>,
}

pub struct RefundProcessor {
    pool: DbPool,
    gateways: GatewayRegistry,
    wallet: WalletService,
}

impl RefundProcessor {
    pub fn new(pool: DbPool, gateways: GatewayRegistry, wallet: WalletService) -> Self {
        Self { pool, gateways, wallet }
    }

    pub async fn process(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
        request: CreateRefundRequest,
        actor: Actor,
    ) -> AppResult<Refund> {
        let amount = request.amount;
        let reason = request.reason.trim().to_string();
        if amount <= BigDecimal::zero() {
            return Err(AppError::bad_request("refund amount must be positive"));
        }
        if reason.is_empty() {
            return Err(AppError::bad_request("refund reason is required"));
        }

        let gateways = self.gateways.clone();
        let mut conn = repo::connection(&self.pool).await?;

        let recorded = {
            let amount = amount.clone();
            let reason = reason.clone();
            conn.transaction::<_, AppError, _>(|conn| {
                Box::pin(async move {
                    let order = repo::lock_order_row(conn, tenant_id, order_id).await?;
                    let payment_status = order.payment_state()?;
                    if !matches!(payment_status, PaymentStatus::Paid | PaymentStatus::PartiallyRefunded) {
                        return Err(AppError::bad_request(format!(
                            "order payment status is {}, nothing to refund",
                            payment_status
                        )));
                    }

                    let already = refunded_so_far(conn, order.id).await?;
                    let refundable = &order.total_amount - &already;
                    if amount > refundable {
                        return Err(AppError::bad_request(format!(
                            "refund amount {} exceeds refundable balance {}",
                            amount, refundable
                        )));
                    }

                    let method = order.method()?;
                    let txn = settled_transaction(conn, &order).await?;
                    let (status, gateway_txn_id) = match method {
                        PaymentMethod::Cod => (RefundStatus::Approved, None),
                        PaymentMethod::Wallet => (RefundStatus::Processed, None),
                        _ => {
                            let txn = txn.as_ref().ok_or_else(|| AppError::not_found("payment transaction"))?;
                            gateways.require(method)?;
                            (RefundStatus::Pending, Some(gateway_reference(txn)?))
                        }
                    };

                    let now = Utc::now();
                    let refund = diesel::insert_into(refunds::table)
                        .values(&NewRefund {
                            id: Uuid::new_v4(),
                            tenant_id,
                            order_id: order.id,
                            transaction_id: txn.as_ref().map(|t| t.id),
                            amount: amount.clone(),
                            reason,
                            status: status.as_str().to_string(),
                            gateway_refund_id: None,
                            gateway_response: json!({}),
                            approved_by: actor.id,
                            approved_at: Some(now),
                            processed_at: (status == RefundStatus::Processed).then_some(now),
                        })
                        .returning(Refund::as_returning())
                        .get_result(conn)
                        .await?;

                    if gateway_txn_id.is_none() {
                        apply_to_payment(conn, &order, txn.as_ref()).await?;
                    }

                    Ok(Recorded {
                        refund,
                        order,
                        method,
                        gateway_txn_id,
                    })
                })
            })
            .await?
        };

        let Recorded {
            mut refund,
            order,
            method,
            gateway_txn_id,
        } = recorded;
        info!(
            "Refund {} of {} for order {} recorded as {}",
            refund.id, refund.amount, order.id, refund.status
        );

        if let Some(gateway_txn_id) = gateway_txn_id {
            let gateway = self.gateways.require(method)?;
            let request = RefundRequest {
                gateway_txn_id,
                amount: amount.clone(),
                reason: reason.clone(),
                refund_id: refund.id,
            };
            let reply = match PaymentGateway::refund(gateway.as_ref(), &request).await {
                Ok(reply) => reply,
                Err(e) => {
                    // The provider may have moved the money; the row stays PENDING
                    // and keeps counting against the refundable balance.
                    error!("{} refund {} failed: {}", gateway.name(), refund.id, e);
                    if let Err(e) = record_gateway_error(&mut conn, refund.id, &e.to_string()).await {
                        error!("Could not record the error on refund {}: {}", refund.id, e);
                    }
                    return Err(AppError::internal(format!("{} refund", gateway.name()), e));
                }
            };

            refund = settle_gateway_refund(&mut conn, &order, refund.id, reply).await?;
            info!("Refund {} settled by {} as {}", refund.id, gateway.name(), refund.status);
            if refund.status == RefundStatus::Rejected.as_str() {
                let entry = TimelineEntry::new(
                    &order,
                    "refund_rejected",
                    format!("Refund of {} BDT declined by {}", amount, gateway.name()),
                    actor,
                )
                .metadata(json!({"refund_id": refund.id}));
                if let Err(e) = repo::append_timeline(&mut conn, entry).await {
                    warn!("Failed to record refund {} on the timeline: {}", refund.id, e);
                }
                return Err(AppError::unprocessable(format!(
                    "{} declined refund {}",
                    gateway.name(),
                    refund.id
                )));
            }
        }

        if method == PaymentMethod::Wallet {
            let credited = self
                .wallet
                .credit(
                    tenant_id,
                    order.customer_id,
                    Some(order.id),
                    WalletSource::Refund,
                    amount.clone(),
                    format!("Refund for order {}", order.order_number),
                )
                .await;
            if let Err(e) = credited {
                error!("Wallet credit for refund {} failed: {}", refund.id, e);
                match mark_pending(&mut conn, refund.id).await {
                    Ok(updated) => refund = updated,
                    Err(e) => error!("Could not mark refund {} pending: {}", refund.id, e),
                }
            }
        }

        let entry = TimelineEntry::new(
            &order,
            "refund_processed",
            format!("Refund of {} BDT processed: {}", amount, reason),
            actor,
        )
        .metadata(json!({"refund_id": refund.id, "status": refund.status}));
        if let Err(e) = repo::append_timeline(&mut conn, entry).await {
            warn!("Failed to record refund {} on the timeline: {}", refund.id, e);
        }

        Ok(refund)
    }
}

/// Marks the source transaction REFUNDED and recomputes the order payment status
/// from every refund that is not rejected.
async fn apply_to_payment(
    conn: &mut AsyncPgConnection,
    order: &Order,
    txn: Option<&PaymentTransaction>,
) -> AppResult<()> {
    if let Some(txn) = txn {
        diesel::update(payment_transactions::table.filter(payment_transactions::id.eq(txn.id)))
            .set((
                payment_transactions::status.eq(TxnStatus::Refunded.as_str()),
                payment_transactions::updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .await?;
    }
    let cumulative = refunded_so_far(conn, order.id).await?;
    repo::set_payment_status(conn, order.id, payment_status_after(&cumulative, &order.total_amount)).await
}

async fn settle_gateway_refund(
    conn: &mut AsyncPgConnection,
    order: &Order,
    refund_id: Uuid,
    reply: RefundResponse,
) -> AppResult<Refund> {
    let status = gateway_refund_status(reply.status);
    let tenant_id = order.tenant_id;
    let order_id = order.id;
    conn.transaction::<_, AppError, _>(|conn| {
        Box::pin(async move {
            let order = repo::lock_order_row(conn, tenant_id, order_id).await?;
            let now = Utc::now();
            let refund = diesel::update(refunds::table.filter(refunds::id.eq(refund_id)))
                .set((
                    refunds::status.eq(status.as_str()),
                    refunds::gateway_refund_id.eq(reply.gateway_refund_id),
                    refunds::gateway_response.eq(reply.raw),
                    refunds::processed_at.eq((status == RefundStatus::Processed).then_some(now)),
                    refunds::updated_at.eq(now),
                ))
                .returning(Refund::as_returning())
                .get_result(conn)
                .await?;

            if status == RefundStatus::Rejected {
                let cumulative = refunded_so_far(conn, order.id).await?;
                repo::set_payment_status(conn, order.id, payment_status_after(&cumulative, &order.total_amount))
                    .await?;
            } else {
                let txn = settled_transaction(conn, &order).await?;
                apply_to_payment(conn, &order, txn.as_ref()).await?;
            }
            Ok(refund)
        })
    })
    .await
}

async fn record_gateway_error(conn: &mut AsyncPgConnection, refund_id: Uuid, message: &str) -> AppResult<()> {
    diesel::update(refunds::table.filter(refunds::id.eq(refund_id)))
        .set((
            refunds::gateway_response.eq(json!({"error": message})),
            refunds::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

async fn settled_transaction(conn: &mut AsyncPgConnection, order: &Order) -> AppResult<Option<PaymentTransaction>> {
    let txn = payment_transactions::table
        .filter(payment_transactions::tenant_id.eq(order.tenant_id))
        .filter(payment_transactions::order_id.eq(order.id))
        .filter(payment_transactions::status.eq_any([TxnStatus::Success.as_str(), TxnStatus::Refunded.as_str()]))
        .order(payment_transactions::created_at.desc())
        .select(PaymentTransaction::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(txn)
}

fn gateway_reference(txn: &PaymentTransaction) -> AppResult<String> {
    txn.gateway_txn_id
        .clone()
        .or_else(|| txn.gateway_payment_id.clone())
        .ok_or_else(|| AppError::bad_request("payment transaction has no gateway reference"))
}

async fn mark_pending(conn: &mut AsyncPgConnection, refund_id: Uuid) -> AppResult<Refund> {
    let refund = diesel::update(refunds::table.filter(refunds::id.eq(refund_id)))
        .set((
            refunds::status.eq(RefundStatus::Pending.as_str()),
            refunds::processed_at.eq(None::<chrono::DateTime<Utc>>),
            refunds::updated_at.eq(Utc::now()),
        ))
        .returning(Refund::as_returning())
        .get_result(conn)
        .await?;
    Ok(refund)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    #[test]
    fn full_refund_marks_the_order_refunded() {
        assert_eq!(payment_status_after(&dec("550"), &dec("550.00")), PaymentStatus::Refunded);
        assert_eq!(
            payment_status_after(&dec("200"), &dec("550")),
            PaymentStatus::PartiallyRefunded
        );
        assert_eq!(payment_status_after(&dec("0.00"), &dec("550")), PaymentStatus::Paid);
    }

    #[test]
    fn declined_gateway_refunds_are_rejected() {
        assert_eq!(gateway_refund_status(TxnStatus::Success), RefundStatus::Processed);
        assert_eq!(gateway_refund_status(TxnStatus::Pending), RefundStatus::Pending);
        assert_eq!(gateway_refund_status(TxnStatus::Failed), RefundStatus::Rejected);
        assert_eq!(gateway_refund_status(TxnStatus::Cancelled), RefundStatus::Rejected);
    }
}
