//! Moves a PENDING payment transaction to its final status.
//!
//! Callbacks and the reconciliation job both end up here. The transaction row
//! is locked before its status is read, so a second writer observes the
//! settled row and changes nothing.

use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde_json::json;
use shared::db::models::PaymentTransaction;
use shared::db::repo::{self, Actor, TimelineEntry};
use shared::db::schema::payment_transactions;
use shared::events::{self, OrderPaidEvent};
use shared::{AppError, AppResult, OrderStatus, PaymentStatus, TxnStatus};
use tracing::{info, warn};
use uuid::Uuid;

use crate::gateway::{ExecuteResponse, StatusResponse};

/// Which path observed the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementSource {
    Callback,
    Reconciliation,
}

impl SettlementSource {
    fn success_event(&self) -> &'static str {
        match self {
            SettlementSource::Callback => "payment_received",
            SettlementSource::Reconciliation => "payment_reconciled",
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            SettlementSource::Callback => "received",
            SettlementSource::Reconciliation => "reconciled",
        }
    }
}

/// Final state reported by a gateway.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub status: TxnStatus,
    pub gateway_txn_id: Option<String>,
    pub gateway_ref_id: Option<String>,
    pub gateway_fee: Option<BigDecimal>,
    pub raw: serde_json::Value,
}

impl Settlement {
    pub fn failed(raw: serde_json::Value) -> Self {
        Self::unsuccessful(TxnStatus::Failed, raw)
    }

    fn unsuccessful(status: TxnStatus, raw: serde_json::Value) -> Self {
        Self {
            status,
            gateway_txn_id: None,
            gateway_ref_id: None,
            gateway_fee: None,
            raw,
        }
    }

    /// Anything other than SUCCESS from execute counts as a failed payment.
    pub fn from_execute(reply: ExecuteResponse) -> Self {
        if reply.status != TxnStatus::Success {
            return Self::failed(reply.raw);
        }
        Self {
            status: TxnStatus::Success,
            gateway_txn_id: reply.gateway_txn_id,
            gateway_ref_id: reply.gateway_ref_id,
            gateway_fee: reply.fee,
            raw: reply.raw,
        }
    }

    /// None while the gateway still reports the payment as pending. A status
    /// query keeps the CANCELLED the provider reports.
    pub fn from_status(reply: StatusResponse) -> Option<Self> {
        match reply.status {
            TxnStatus::Success => Some(Self {
                status: TxnStatus::Success,
                gateway_txn_id: reply.gateway_txn_id,
                gateway_ref_id: None,
                gateway_fee: None,
                raw: reply.raw,
            }),
            TxnStatus::Failed | TxnStatus::Cancelled => Some(Self::unsuccessful(reply.status, reply.raw)),
            TxnStatus::Pending | TxnStatus::Refunded => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettleOutcome {
    pub transaction: PaymentTransaction,
    /// False when another writer had already settled the transaction.
    pub applied: bool,
}

pub async fn settle(
    conn: &mut AsyncPgConnection,
    transaction_id: Uuid,
    settlement: Settlement,
    source: SettlementSource,
) -> AppResult<SettleOutcome> {
    let outcome = conn
        .transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let txn = payment_transactions::table
                    .filter(payment_transactions::id.eq(transaction_id))
                    .select(PaymentTransaction::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::not_found("transaction"))?;

                if txn.txn_status()?.is_settled() {
                    return Ok(SettleOutcome {
                        transaction: txn,
                        applied: false,
                    });
                }

                let now = Utc::now();
                let callback_at = match source {
                    SettlementSource::Callback => Some(now),
                    SettlementSource::Reconciliation => txn.callback_received_at,
                };
                let updated = diesel::update(payment_transactions::table.filter(payment_transactions::id.eq(txn.id)))
                    .set((
                        payment_transactions::status.eq(settlement.status.as_str()),
                        payment_transactions::gateway_txn_id
                            .eq(settlement.gateway_txn_id.clone().or(txn.gateway_txn_id.clone())),
                        payment_transactions::gateway_ref_id
                            .eq(settlement.gateway_ref_id.clone().or(txn.gateway_ref_id.clone())),
                        payment_transactions::gateway_fee.eq(settlement.gateway_fee.clone().or(txn.gateway_fee.clone())),
                        payment_transactions::gateway_response.eq(settlement.raw.clone()),
                        payment_transactions::callback_received_at.eq(callback_at),
                        payment_transactions::updated_at.eq(now),
                    ))
                    .returning(PaymentTransaction::as_returning())
                    .get_result(conn)
                    .await?;

                if settlement.status == TxnStatus::Success {
                    record_success(conn, &updated, source).await?;
                } else {
                    record_failure(conn, &updated, source).await?;
                }

                Ok(SettleOutcome {
                    transaction: updated,
                    applied: true,
                })
            })
        })
        .await?;

    if outcome.applied {
        info!(
            "Transaction {} settled as {} via {:?}",
            outcome.transaction.id, outcome.transaction.status, source
        );
    }
    Ok(outcome)
}

async fn record_success(
    conn: &mut AsyncPgConnection,
    txn: &PaymentTransaction,
    source: SettlementSource,
) -> AppResult<()> {
    let mut order = repo::lock_order_row(conn, txn.tenant_id, txn.order_id).await?;
    repo::set_payment_status(conn, order.id, PaymentStatus::Paid).await?;

    let status = order.order_status()?;
    if status == OrderStatus::Pending && order.deleted_at.is_none() {
        repo::transition_order(
            conn,
            &mut order,
            OrderStatus::Created,
            Actor::system(),
            source.success_event(),
            format!("Payment {} via {}", source.verb(), txn.payment_method),
        )
        .await?;
    } else {
        warn!(
            "Payment {} for order {} arrived while the order was {}",
            txn.id, order.id, status
        );
        repo::append_timeline(
            conn,
            TimelineEntry::new(
                &order,
                source.success_event(),
                format!(
                    "Payment {} via {} after the order was {}; refund required",
                    source.verb(),
                    txn.payment_method,
                    status
                ),
                Actor::system(),
            )
            .metadata(json!({"transaction_id": txn.id, "late": true})),
        )
        .await?;
    }

    repo::enqueue_outbox(
        conn,
        order.tenant_id,
        events::AGGREGATE_ORDER,
        order.id,
        events::ORDER_PAID,
        &OrderPaidEvent {
            order_id: order.id,
            tenant_id: order.tenant_id,
            transaction_id: txn.id,
            payment_method: txn.method()?,
            amount: txn.amount.clone(),
        },
    )
    .await
}

async fn record_failure(
    conn: &mut AsyncPgConnection,
    txn: &PaymentTransaction,
    source: SettlementSource,
) -> AppResult<()> {
    let order = repo::lock_order_row(conn, txn.tenant_id, txn.order_id).await?;
    let description = match source {
        SettlementSource::Callback => format!("Payment via {} {}", txn.payment_method, txn.status.to_lowercase()),
        SettlementSource::Reconciliation => format!(
            "Payment via {} {} according to gateway reconciliation",
            txn.payment_method,
            txn.status.to_lowercase()
        ),
    };
    repo::append_timeline(
        conn,
        TimelineEntry::new(&order, "payment_failed", description, Actor::system())
            .metadata(json!({"transaction_id": txn.id, "status": txn.status})),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_success_from_execute_settles_as_paid() {
        let success = Settlement::from_execute(ExecuteResponse {
            gateway_txn_id: Some("TRX1".to_string()),
            gateway_ref_id: Some("PAY1".to_string()),
            status: TxnStatus::Success,
            amount: None,
            fee: None,
            raw: json!({}),
        });
        assert_eq!(success.status, TxnStatus::Success);
        assert_eq!(success.gateway_txn_id.as_deref(), Some("TRX1"));

        let pending = Settlement::from_execute(ExecuteResponse {
            gateway_txn_id: None,
            gateway_ref_id: None,
            status: TxnStatus::Pending,
            amount: None,
            fee: None,
            raw: json!({}),
        });
        assert_eq!(pending.status, TxnStatus::Failed);
    }

    #[test]
    fn cancelled_execution_settles_as_failed() {
        let cancelled = Settlement::from_execute(ExecuteResponse {
            gateway_txn_id: Some("TRX9".to_string()),
            gateway_ref_id: None,
            status: TxnStatus::Cancelled,
            amount: None,
            fee: None,
            raw: json!({"statusCode": "2056"}),
        });
        assert_eq!(cancelled.status, TxnStatus::Failed);
        assert_eq!(cancelled.gateway_txn_id, None);
        assert_eq!(cancelled.raw["statusCode"], "2056");
    }

    #[test]
    fn pending_status_replies_leave_the_transaction_alone() {
        let reply = StatusResponse {
            gateway_txn_id: None,
            status: TxnStatus::Pending,
            amount: None,
            raw: json!({}),
        };
        assert!(Settlement::from_status(reply).is_none());

        let cancelled = Settlement::from_status(StatusResponse {
            gateway_txn_id: None,
            status: TxnStatus::Cancelled,
            amount: None,
            raw: json!({}),
        })
        .unwrap();
        assert_eq!(cancelled.status, TxnStatus::Cancelled);
    }
}
