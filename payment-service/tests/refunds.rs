mod common;

use common::{dec, setup, txn_status};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use payment_service::refund::CreateRefundRequest;
use shared::db::models::{Refund, WalletTransaction};
use shared::db::repo::Actor;
use shared::db::schema::{refunds, wallet_transactions};
use shared::{ActorType, AppError, OrderStatus, PaymentMethod, PaymentStatus, RefundStatus, TxnStatus};
use uuid::Uuid;

fn admin() -> Actor {
    Actor::new(Uuid::new_v4(), ActorType::PlatformAdmin)
}

fn refund_of(amount: &str, reason: &str) -> CreateRefundRequest {
    CreateRefundRequest {
        amount: dec(amount),
        reason: reason.to_string(),
    }
}

async fn refunds_for(ctx: &common::TestContext, order_id: Uuid) -> Vec<Refund> {
    let mut conn = ctx.pool.get().await.unwrap();
    refunds::table
        .filter(refunds::order_id.eq(order_id))
        .select(Refund::as_select())
        .load(&mut conn)
        .await
        .unwrap()
}

#[tokio::test]
async fn full_gateway_refund_marks_everything_refunded() {
    let Some(ctx) = setup().await else { return };
    let (order, txn) = ctx.paid_online_order("550").await;

    let refund = ctx
        .refunds
        .process(ctx.tenant_id, order.id, refund_of("550", "restaurant closed"), admin())
        .await
        .unwrap();

    assert_eq!(refund.status, RefundStatus::Processed.as_str());
    assert_eq!(refund.transaction_id, Some(txn.id));
    assert!(refund.gateway_refund_id.is_some());
    assert!(refund.processed_at.is_some());
    assert_eq!(ctx.gateway.refunds_sent(), 1);

    assert_eq!(txn_status(&ctx.transaction(txn.id).await), TxnStatus::Refunded);
    assert_eq!(ctx.order(order.id).await.payment_status, "REFUNDED");
    assert_eq!(ctx.events_of(order.id, "refund_processed").await, 1);
}

#[tokio::test]
async fn partial_refunds_are_capped_by_what_remains() {
    let Some(ctx) = setup().await else { return };
    let (order, _) = ctx.paid_online_order("550").await;

    ctx.refunds
        .process(ctx.tenant_id, order.id, refund_of("200", "missing drink"), admin())
        .await
        .unwrap();
    assert_eq!(ctx.order(order.id).await.payment_status, "PARTIALLY_REFUNDED");

    let err = ctx
        .refunds
        .process(ctx.tenant_id, order.id, refund_of("400", "late delivery"), admin())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(refunds_for(&ctx, order.id).await.len(), 1);
    assert_eq!(ctx.gateway.refunds_sent(), 1);

    ctx.refunds
        .process(ctx.tenant_id, order.id, refund_of("350", "late delivery"), admin())
        .await
        .unwrap();
    assert_eq!(ctx.order(order.id).await.payment_status, "REFUNDED");
}

#[tokio::test]
async fn refunds_over_the_total_are_rejected_before_any_write() {
    let Some(ctx) = setup().await else { return };
    let (order, txn) = ctx.paid_online_order("300").await;

    let err = ctx
        .refunds
        .process(ctx.tenant_id, order.id, refund_of("300.01", "duplicate"), admin())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    assert!(refunds_for(&ctx, order.id).await.is_empty());
    assert_eq!(txn_status(&ctx.transaction(txn.id).await), TxnStatus::Success);
    assert_eq!(ctx.order(order.id).await.payment_status, "PAID");
    assert_eq!(ctx.gateway.refunds_sent(), 0);
}

#[tokio::test]
async fn invalid_refund_requests_are_rejected() {
    let Some(ctx) = setup().await else { return };
    let unpaid = ctx
        .insert_order(Uuid::new_v4(), PaymentMethod::Cod, OrderStatus::Created, PaymentStatus::Unpaid, "300")
        .await;

    let err = ctx
        .refunds
        .process(ctx.tenant_id, unpaid.id, refund_of("100", "changed mind"), admin())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = ctx
        .refunds
        .process(ctx.tenant_id, unpaid.id, refund_of("0", "nothing"), admin())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn pending_gateway_refund_is_kept_pending() {
    let Some(ctx) = setup().await else { return };
    *ctx.gateway.refund_status.lock().unwrap() = TxnStatus::Pending;
    let (order, _) = ctx.paid_online_order("300").await;

    let refund = ctx
        .refunds
        .process(ctx.tenant_id, order.id, refund_of("300", "cold food"), admin())
        .await
        .unwrap();
    assert_eq!(refund.status, "PENDING");
    assert!(refund.processed_at.is_none());
}

#[tokio::test]
async fn declined_gateway_refund_is_kept_as_rejected() {
    let Some(ctx) = setup().await else { return };
    *ctx.gateway.refund_status.lock().unwrap() = TxnStatus::Failed;
    let (order, txn) = ctx.paid_online_order("300").await;

    let err = ctx
        .refunds
        .process(ctx.tenant_id, order.id, refund_of("300", "cold food"), admin())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UnprocessableEntity(_)));

    let rows = refunds_for(&ctx, order.id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "REJECTED");
    assert!(rows[0].gateway_refund_id.is_some());
    assert!(rows[0].processed_at.is_none());
    assert_eq!(txn_status(&ctx.transaction(txn.id).await), TxnStatus::Success);
    assert_eq!(ctx.order(order.id).await.payment_status, "PAID");
    assert_eq!(ctx.events_of(order.id, "refund_rejected").await, 1);

    // A rejected refund does not use up the refundable balance.
    *ctx.gateway.refund_status.lock().unwrap() = TxnStatus::Success;
    let refund = ctx
        .refunds
        .process(ctx.tenant_id, order.id, refund_of("300", "cold food"), admin())
        .await
        .unwrap();
    assert_eq!(refund.status, "PROCESSED");
    assert_eq!(ctx.order(order.id).await.payment_status, "REFUNDED");
}

#[tokio::test]
async fn unreachable_gateway_leaves_a_pending_refund_on_record() {
    let Some(ctx) = setup().await else { return };
    let (order, txn) = ctx.paid_online_order("300").await;
    *ctx.gateway.fail_refund.lock().unwrap() = true;

    let err = ctx
        .refunds
        .process(ctx.tenant_id, order.id, refund_of("200", "missing item"), admin())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Internal { .. }));
    assert_eq!(ctx.gateway.refunds_sent(), 1);

    let rows = refunds_for(&ctx, order.id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "PENDING");
    assert_eq!(rows[0].transaction_id, Some(txn.id));
    assert!(rows[0].gateway_response["error"].is_string());
    assert_eq!(ctx.order(order.id).await.payment_status, "PAID");

    // The unsettled refund still counts against what can be refunded.
    *ctx.gateway.fail_refund.lock().unwrap() = false;
    let err = ctx
        .refunds
        .process(ctx.tenant_id, order.id, refund_of("150", "missing item"), admin())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(ctx.gateway.refunds_sent(), 1);
}

#[tokio::test]
async fn cash_orders_are_only_approved() {
    let Some(ctx) = setup().await else { return };
    let order = ctx
        .insert_order(Uuid::new_v4(), PaymentMethod::Cod, OrderStatus::Picked, PaymentStatus::Paid, "300")
        .await;

    let refund = ctx
        .refunds
        .process(ctx.tenant_id, order.id, refund_of("120", "wrong item"), admin())
        .await
        .unwrap();

    assert_eq!(refund.status, "APPROVED");
    assert_eq!(refund.transaction_id, None);
    assert!(refund.approved_at.is_some());
    assert_eq!(ctx.gateway.refunds_sent(), 0);
    assert_eq!(ctx.order(order.id).await.payment_status, "PARTIALLY_REFUNDED");
}

#[tokio::test]
async fn wallet_refunds_credit_the_customer() {
    let Some(ctx) = setup().await else { return };
    let customer = ctx.insert_user("25").await;
    let order = ctx
        .insert_order(customer, PaymentMethod::Wallet, OrderStatus::Cancelled, PaymentStatus::Paid, "300")
        .await;

    let refund = ctx
        .refunds
        .process(ctx.tenant_id, order.id, refund_of("300", "order cancelled"), admin())
        .await
        .unwrap();
    assert_eq!(refund.status, "PROCESSED");
    assert_eq!(ctx.order(order.id).await.payment_status, "REFUNDED");

    let balance = ctx.wallet.balance(ctx.tenant_id, customer).await.unwrap();
    assert_eq!(balance.balance, dec("325"));

    let mut conn = ctx.pool.get().await.unwrap();
    let entries: Vec<WalletTransaction> = wallet_transactions::table
        .filter(wallet_transactions::user_id.eq(customer))
        .select(WalletTransaction::as_select())
        .load(&mut conn)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].direction, "CREDIT");
    assert_eq!(entries[0].source, "REFUND");
    assert_eq!(entries[0].order_id, Some(order.id));
    assert_eq!(entries[0].balance_after, dec("325"));
}

#[tokio::test]
async fn failed_wallet_credit_leaves_the_refund_pending() {
    let Some(ctx) = setup().await else { return };
    // No users row, so the credit cannot be applied.
    let order = ctx
        .insert_order(Uuid::new_v4(), PaymentMethod::Wallet, OrderStatus::Cancelled, PaymentStatus::Paid, "300")
        .await;

    let refund = ctx
        .refunds
        .process(ctx.tenant_id, order.id, refund_of("300", "order cancelled"), admin())
        .await
        .unwrap();
    assert_eq!(refund.status, "PENDING");
    assert_eq!(ctx.order(order.id).await.payment_status, "REFUNDED");
    assert_eq!(refunds_for(&ctx, order.id).await.len(), 1);
}

#[tokio::test]
async fn wallet_credits_must_be_positive() {
    let Some(ctx) = setup().await else { return };
    let customer = ctx.insert_user("0").await;

    let err = ctx
        .wallet
        .credit(
            ctx.tenant_id,
            customer,
            None,
            shared::WalletSource::Topup,
            dec("-5"),
            "bad topup",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let entry = ctx
        .wallet
        .credit(ctx.tenant_id, customer, None, shared::WalletSource::PromoCashback, dec("40"), "cashback")
        .await
        .unwrap();
    assert_eq!(entry.balance_after, dec("40"));
}
