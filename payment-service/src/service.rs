use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::db::models::{NewPaymentTransaction, PaymentTransaction};
use shared::db::repo;
use shared::db::schema::payment_transactions;
use shared::db::DbPool;
use shared::{AppError, AppResult, OrderStatus, PaymentMethod, PaymentStatus, TxnStatus};
use tracing::{error, info};
use uuid::Uuid;

use crate::gateway::{GatewayRegistry, InitiateRequest, PaymentGateway};
use crate::settlement::{self, Settlement, SettlementSource};

pub const CURRENCY: &str = "BDT";

#[derive(Debug, Clone, Deserialize)]
pub struct InitiatePaymentRequest {
    pub order_id: Uuid,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiatePaymentResponse {
    pub transaction_id: Uuid,
    pub gateway_payment_id: String,
    pub redirect_url: String,
    pub status: String,
}

/// What a provider sent when it redirected the customer back. The outcome is
/// always confirmed through `execute`, whatever status the redirect carries.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    pub gateway_payment_id: String,
    pub raw: Value,
}

const PAYMENT_ID_KEYS: [&str; 4] = ["gateway_payment_id", "paymentID", "payment_id", "mer_txnid"];

impl CallbackRequest {
    /// Reads a callback body from any of the providers' field spellings.
    pub fn from_payload(raw: Value) -> AppResult<Self> {
        let gateway_payment_id = PAYMENT_ID_KEYS
            .iter()
            .filter_map(|key| raw.get(*key))
            .filter_map(|value| value.as_str())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .ok_or_else(|| AppError::bad_request("callback is missing the payment id"))?;
        Ok(Self { gateway_payment_id, raw })
    }
}

pub fn callback_url(base: &str, method: PaymentMethod) -> String {
    format!(
        "{}/payments/{}/callback",
        base.trim_end_matches('/'),
        method.as_str().to_ascii_lowercase()
    )
}

pub struct PaymentService {
    pool: DbPool,
    gateways: GatewayRegistry,
    callback_base_url: String,
}

impl PaymentService {
    pub fn new(pool: DbPool, gateways: GatewayRegistry, callback_base_url: impl Into<String>) -> Self {
        Self {
            pool,
            gateways,
            callback_base_url: callback_base_url.into(),
        }
    }

    pub async fn initiate(
        &self,
        tenant_id: Uuid,
        method: PaymentMethod,
        request: InitiatePaymentRequest,
    ) -> AppResult<InitiatePaymentResponse> {
        let gateway = self.gateways.require(method)?;
        let mut conn = repo::connection(&self.pool).await?;

        let order = repo::find_order(&mut conn, tenant_id, request.order_id).await?;
        if order.payment_state()? == PaymentStatus::Paid {
            return Err(AppError::conflict("order already paid"));
        }
        if order.order_status()? != OrderStatus::Pending {
            return Err(AppError::bad_request("order is not in pending state"));
        }

        let txn = diesel::insert_into(payment_transactions::table)
            .values(&NewPaymentTransaction {
                id: Uuid::new_v4(),
                tenant_id,
                order_id: order.id,
                user_id: order.customer_id,
                payment_method: method.as_str().to_string(),
                status: TxnStatus::Pending.as_str().to_string(),
                amount: order.total_amount.clone(),
                currency: CURRENCY.to_string(),
                gateway_payment_id: None,
                gateway_response: json!({}),
            })
            .returning(PaymentTransaction::as_returning())
            .get_result(&mut conn)
            .await?;

        let gateway_request = InitiateRequest {
            order_id: order.id,
            amount: order.total_amount.clone(),
            currency: CURRENCY.to_string(),
            callback_url: callback_url(&self.callback_base_url, method),
            customer_name: request.customer_name.or(order.delivery_recipient_name).unwrap_or_default(),
            customer_phone: request.customer_phone.or(order.delivery_recipient_phone).unwrap_or_default(),
        };

        let reply = match gateway.initiate(&gateway_request).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("{} initiation failed for order {}: {}", gateway.name(), order.id, e);
                diesel::update(payment_transactions::table.filter(payment_transactions::id.eq(txn.id)))
                    .set((
                        payment_transactions::status.eq(TxnStatus::Failed.as_str()),
                        payment_transactions::gateway_response.eq(json!({"error": e.to_string()})),
                        payment_transactions::updated_at.eq(Utc::now()),
                    ))
                    .execute(&mut conn)
                    .await?;
                return Err(AppError::internal("initiate payment", e));
            }
        };

        diesel::update(payment_transactions::table.filter(payment_transactions::id.eq(txn.id)))
            .set((
                payment_transactions::gateway_payment_id.eq(Some(&reply.gateway_payment_id)),
                payment_transactions::gateway_response
                    .eq(json!({"redirect_url": reply.redirect_url, "status": reply.status})),
                payment_transactions::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;

        info!(
            "Initiated {} payment {} for order {}",
            gateway.name(),
            reply.gateway_payment_id,
            order.id
        );

        Ok(InitiatePaymentResponse {
            transaction_id: txn.id,
            gateway_payment_id: reply.gateway_payment_id,
            redirect_url: reply.redirect_url,
            status: reply.status,
        })
    }

    /// Settles the transaction a provider callback refers to. A transaction
    /// that is no longer PENDING is returned as stored without calling the gateway.
    pub async fn process_callback(
        &self,
        tenant_id: Uuid,
        method: PaymentMethod,
        callback: CallbackRequest,
    ) -> AppResult<PaymentTransaction> {
        let gateway = self.gateways.require(method)?;

        let txn = {
            let mut conn = repo::connection(&self.pool).await?;
            payment_transactions::table
                .filter(payment_transactions::tenant_id.eq(tenant_id))
                .filter(payment_transactions::payment_method.eq(method.as_str()))
                .filter(payment_transactions::gateway_payment_id.eq(&callback.gateway_payment_id))
                .order(payment_transactions::created_at.desc())
                .select(PaymentTransaction::as_select())
                .first(&mut conn)
                .await
                .optional()?
                .ok_or_else(|| AppError::not_found("payment transaction"))?
        };

        if txn.txn_status()?.is_settled() {
            info!("Callback for settled transaction {} ignored", txn.id);
            return Ok(txn);
        }

        let settlement = match PaymentGateway::execute(gateway.as_ref(), &callback.gateway_payment_id).await {
            Ok(reply) => Settlement::from_execute(reply),
            Err(e) => {
                error!(
                    "{} execute failed for payment {}: {}",
                    gateway.name(),
                    callback.gateway_payment_id,
                    e
                );
                Settlement::failed(json!({"error": e.to_string(), "callback": callback.raw}))
            }
        };

        let mut conn = repo::connection(&self.pool).await?;
        let outcome = settlement::settle(&mut conn, txn.id, settlement, SettlementSource::Callback).await?;
        Ok(outcome.transaction)
    }

    /// Latest transaction that actually moved money for the order.
    pub async fn transaction_for_order(&self, tenant_id: Uuid, order_id: Uuid) -> AppResult<PaymentTransaction> {
        let mut conn = repo::connection(&self.pool).await?;
        payment_transactions::table
            .filter(payment_transactions::tenant_id.eq(tenant_id))
            .filter(payment_transactions::order_id.eq(order_id))
            .filter(payment_transactions::status.eq_any([TxnStatus::Success.as_str(), TxnStatus::Refunded.as_str()]))
            .order(payment_transactions::created_at.desc())
            .select(PaymentTransaction::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AppError::not_found("payment transaction"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_bodies_from_each_provider_are_understood() {
        let bkash = CallbackRequest::from_payload(json!({"paymentID": "TR0011", "status": "success"})).unwrap();
        assert_eq!(bkash.gateway_payment_id, "TR0011");

        let aamarpay =
            CallbackRequest::from_payload(json!({"mer_txnid": "b0c1", "pay_status": "Cancelled"})).unwrap();
        assert_eq!(aamarpay.gateway_payment_id, "b0c1");
        assert_eq!(aamarpay.raw["pay_status"], "Cancelled");

        let blank = CallbackRequest::from_payload(json!({"paymentID": "  ", "payment_id": "x"})).unwrap();
        assert_eq!(blank.gateway_payment_id, "x");
    }

    #[test]
    fn callback_without_payment_id_is_rejected() {
        let err = CallbackRequest::from_payload(json!({"status": "success"})).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn callback_urls_use_the_lowercase_method() {
        assert_eq!(
            callback_url("https://api.example.com/", PaymentMethod::Bkash),
            "https://api.example.com/payments/bkash/callback"
        );
    }
}
