//! bKash tokenized checkout.

use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared::TxnStatus;
use tokio::sync::Mutex;

use super::{
    http_client, non_empty, parse_amount, ExecuteResponse, InitiateRequest, InitiateResponse, PaymentGateway,
    RefundRequest, RefundResponse, StatusResponse,
};

/// API root without the `/tokenized/checkout` prefix; request paths add it.
pub const SANDBOX_BASE_URL: &str = "https://tokenized.sandbox.bka.sh/v1.2.0-beta";

const TOKEN_REFRESH_MARGIN_SECS: u64 = 60;
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct BkashConfig {
    pub app_key: String,
    pub app_secret: String,
    pub username: String,
    pub password: String,
    pub base_url: String,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct BkashGateway {
    config: BkashConfig,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Serialize)]
struct GrantTokenBody<'a> {
    app_key: &'a str,
    app_secret: &'a str,
}

#[derive(Deserialize)]
struct GrantTokenReply {
    #[serde(default)]
    id_token: String,
    #[serde(default)]
    expires_in: u64,
    #[serde(default, rename = "statusMessage")]
    status_message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentBody {
    mode: &'static str,
    payer_reference: String,
    #[serde(rename = "callbackURL")]
    callback_url: String,
    amount: String,
    currency: String,
    intent: &'static str,
    merchant_invoice_number: String,
}

#[derive(Deserialize)]
struct CreatePaymentReply {
    #[serde(default, rename = "paymentID")]
    payment_id: String,
    #[serde(default, rename = "bkashURL")]
    bkash_url: String,
    #[serde(default, rename = "statusCode")]
    status_code: String,
    #[serde(default, rename = "statusMessage")]
    status_message: String,
}

#[derive(Serialize)]
struct PaymentIdBody<'a> {
    #[serde(rename = "paymentID")]
    payment_id: &'a str,
}

#[derive(Deserialize)]
struct TransactionReply {
    #[serde(default, rename = "paymentID")]
    payment_id: String,
    #[serde(default, rename = "trxID")]
    trx_id: String,
    #[serde(default, rename = "transactionStatus")]
    transaction_status: String,
    #[serde(default)]
    amount: String,
    #[serde(default)]
    charge: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefundBody {
    #[serde(rename = "paymentID")]
    payment_id: String,
    amount: String,
    #[serde(rename = "trxID")]
    trx_id: String,
    sku: String,
    reason: String,
}

#[derive(Deserialize)]
struct RefundReply {
    #[serde(default, rename = "refundTrxID")]
    refund_trx_id: String,
    #[serde(default, rename = "transactionStatus")]
    transaction_status: String,
}

pub fn map_status(status: &str) -> TxnStatus {
    match status {
        "Completed" => TxnStatus::Success,
        "Initiated" | "Pending" | "Authorized" => TxnStatus::Pending,
        "Cancelled" => TxnStatus::Cancelled,
        _ => TxnStatus::Failed,
    }
}

fn refresh_after(expires_in: u64) -> Duration {
    let lifetime = if expires_in == 0 {
        DEFAULT_TOKEN_LIFETIME_SECS
    } else {
        expires_in
    };
    Duration::from_secs(lifetime.saturating_sub(TOKEN_REFRESH_MARGIN_SECS))
}

impl BkashGateway {
    pub fn new(config: BkashConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            config,
            client: http_client(timeout)?,
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Returns the cached grant token, requesting a new one when it is close to expiry.
    async fn grant_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .post(self.endpoint("/tokenized/checkout/token/grant"))
            .header("username", &self.config.username)
            .header("password", &self.config.password)
            .json(&GrantTokenBody {
                app_key: &self.config.app_key,
                app_secret: &self.config.app_secret,
            })
            .send()
            .await
            .context("bkash: token request")?;

        let status = response.status();
        let body = response.text().await.context("bkash: read token response")?;
        if !status.is_success() {
            bail!("bkash: token grant failed: status {}, body: {}", status.as_u16(), body);
        }

        let reply: GrantTokenReply = serde_json::from_str(&body).context("bkash: parse token response")?;
        if reply.id_token.is_empty() {
            bail!("bkash: token grant failed: {}", reply.status_message);
        }

        *cached = Some(CachedToken {
            value: reply.id_token.clone(),
            refresh_at: Instant::now() + refresh_after(reply.expires_in),
        });
        Ok(reply.id_token)
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<(R, serde_json::Value)> {
        let token = self.grant_token().await?;
        let response = self
            .client
            .post(self.endpoint(path))
            .header("Authorization", token)
            .header("X-App-Key", &self.config.app_key)
            .json(body)
            .send()
            .await
            .context("bkash: request failed")?;

        let status = response.status();
        let text = response.text().await.context("bkash: read response body")?;
        if status.as_u16() >= 400 {
            bail!("bkash: upstream error: status {}, body: {}", status.as_u16(), text);
        }

        let raw: serde_json::Value = serde_json::from_str(&text).context("bkash: parse response")?;
        let reply = serde_json::from_value(raw.clone()).context("bkash: unexpected response shape")?;
        Ok((reply, raw))
    }
}

#[async_trait]
impl PaymentGateway for BkashGateway {
    fn name(&self) -> &'static str {
        "bkash"
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateResponse> {
        let body = CreatePaymentBody {
            mode: "0011",
            payer_reference: request.order_id.to_string(),
            callback_url: request.callback_url.clone(),
            amount: request.amount.with_scale(2).to_string(),
            currency: request.currency.clone(),
            intent: "sale",
            merchant_invoice_number: request.order_id.to_string(),
        };
        let (reply, _): (CreatePaymentReply, _) = self.post("/tokenized/checkout/create", &body).await?;
        if reply.payment_id.is_empty() {
            return Err(anyhow!("bkash: initiate failed: {}", reply.status_message));
        }

        Ok(InitiateResponse {
            gateway_payment_id: reply.payment_id,
            redirect_url: reply.bkash_url,
            status: reply.status_code,
        })
    }

    async fn execute(&self, payment_id: &str) -> Result<ExecuteResponse> {
        let (reply, raw): (TransactionReply, _) = self
            .post("/tokenized/checkout/execute", &PaymentIdBody { payment_id })
            .await?;

        Ok(ExecuteResponse {
            status: map_status(&reply.transaction_status),
            gateway_txn_id: non_empty(reply.trx_id),
            gateway_ref_id: non_empty(reply.payment_id),
            amount: parse_amount(&reply.amount),
            fee: parse_amount(&reply.charge),
            raw,
        })
    }

    async fn query_status(&self, payment_id: &str) -> Result<StatusResponse> {
        let (reply, raw): (TransactionReply, _) = self
            .post("/tokenized/checkout/payment/status", &PaymentIdBody { payment_id })
            .await?;

        Ok(StatusResponse {
            status: map_status(&reply.transaction_status),
            gateway_txn_id: non_empty(reply.trx_id),
            amount: parse_amount(&reply.amount),
            raw,
        })
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundResponse> {
        let body = RefundBody {
            payment_id: request.gateway_txn_id.clone(),
            amount: request.amount.with_scale(2).to_string(),
            trx_id: request.gateway_txn_id.clone(),
            sku: request.refund_id.to_string(),
            reason: request.reason.clone(),
        };
        let (reply, raw): (RefundReply, _) = self.post("/tokenized/checkout/payment/refund", &body).await?;

        Ok(RefundResponse {
            gateway_refund_id: non_empty(reply.refund_trx_id),
            status: map_status(&reply.transaction_status),
            raw,
        })
    }
}
