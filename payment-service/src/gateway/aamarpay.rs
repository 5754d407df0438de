//! AamarPay hosted checkout. There is no execute step: the provider redirects
//! back to the callback URL once the customer has paid.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::TxnStatus;

use super::{
    http_client, non_empty, parse_amount, ExecuteResponse, InitiateRequest, InitiateResponse, PaymentGateway,
    RefundRequest, RefundResponse, StatusResponse,
};

#[derive(Debug, Clone)]
pub struct AamarpayConfig {
    pub store_id: String,
    pub signature_key: String,
    pub base_url: String,
}

pub struct AamarpayGateway {
    config: AamarpayConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct InitiateBody<'a> {
    store_id: &'a str,
    signature_key: &'a str,
    tran_id: String,
    amount: String,
    currency: &'a str,
    desc: String,
    cus_name: &'a str,
    cus_email: &'a str,
    cus_phone: &'a str,
    success_url: String,
    fail_url: String,
    cancel_url: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct InitiateReply {
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    payment_url: String,
    #[serde(default)]
    error_msg: String,
}

#[derive(Deserialize)]
struct StatusReply {
    #[serde(default)]
    pg_txnid: String,
    #[serde(default)]
    pay_status: String,
    #[serde(default)]
    amount: String,
}

pub fn map_status(status: &str) -> TxnStatus {
    match status {
        "Successful" => TxnStatus::Success,
        "Pending" => TxnStatus::Pending,
        "Cancelled" => TxnStatus::Cancelled,
        _ => TxnStatus::Failed,
    }
}

impl AamarpayGateway {
    pub fn new(config: AamarpayConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            config,
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl PaymentGateway for AamarpayGateway {
    fn name(&self) -> &'static str {
        "aamarpay"
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateResponse> {
        let tran_id = request.order_id.to_string();
        let body = InitiateBody {
            store_id: &self.config.store_id,
            signature_key: &self.config.signature_key,
            tran_id: tran_id.clone(),
            amount: request.amount.with_scale(2).to_string(),
            currency: &request.currency,
            desc: format!("Order payment {}", tran_id),
            cus_name: &request.customer_name,
            cus_email: "customer@munchies.app",
            cus_phone: &request.customer_phone,
            success_url: format!("{}/success", request.callback_url),
            fail_url: format!("{}/fail", request.callback_url),
            cancel_url: format!("{}/cancel", request.callback_url),
            kind: "json",
        };

        let response = self
            .client
            .post(format!("{}/jsonpost.php", self.config.base_url))
            .json(&body)
            .send()
            .await
            .context("aamarpay: request failed")?;
        let status = response.status();
        let text = response.text().await.context("aamarpay: read response")?;
        if status.as_u16() >= 400 {
            bail!("aamarpay: upstream error: status {}, body: {}", status.as_u16(), text);
        }

        let reply: InitiateReply = serde_json::from_str(&text).context("aamarpay: parse response")?;
        let accepted = matches!(&reply.result, serde_json::Value::Bool(true))
            || reply.result.as_str() == Some("true");
        if !accepted && reply.payment_url.is_empty() {
            bail!("aamarpay: initiate failed: {}", reply.error_msg);
        }

        Ok(InitiateResponse {
            gateway_payment_id: tran_id,
            redirect_url: reply.payment_url,
            status: "initiated".to_string(),
        })
    }

    async fn execute(&self, payment_id: &str) -> Result<ExecuteResponse> {
        Ok(ExecuteResponse {
            gateway_txn_id: Some(payment_id.to_string()),
            gateway_ref_id: Some(payment_id.to_string()),
            status: TxnStatus::Success,
            amount: None,
            fee: None,
            raw: json!({"note": "aamarpay uses callback verification"}),
        })
    }

    async fn query_status(&self, payment_id: &str) -> Result<StatusResponse> {
        let response = self
            .client
            .get(format!("{}/api/v1/trxcheck/request.php", self.config.base_url))
            .query(&[
                ("request_id", payment_id),
                ("store_id", self.config.store_id.as_str()),
                ("signature_key", self.config.signature_key.as_str()),
                ("type", "json"),
            ])
            .send()
            .await
            .context("aamarpay: status request")?;
        let status = response.status();
        if status.as_u16() >= 400 {
            bail!("aamarpay: status check error: status {}", status.as_u16());
        }

        let raw: serde_json::Value = response.json().await.context("aamarpay: read status response")?;
        let reply: StatusReply = serde_json::from_value(raw.clone()).context("aamarpay: parse status response")?;

        Ok(StatusResponse {
            gateway_txn_id: non_empty(reply.pg_txnid),
            status: map_status(&reply.pay_status),
            amount: parse_amount(&reply.amount),
            raw,
        })
    }

    /// Refunds are settled manually with the provider, so they stay pending.
    async fn refund(&self, _request: &RefundRequest) -> Result<RefundResponse> {
        Ok(RefundResponse {
            gateway_refund_id: None,
            status: TxnStatus::Pending,
            raw: json!({"note": "aamarpay refunds are processed manually"}),
        })
    }
}
