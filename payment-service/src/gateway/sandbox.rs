//! In-process gateway for development and tests.

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use shared::TxnStatus;

use super::{
    ExecuteResponse, InitiateRequest, InitiateResponse, PaymentGateway, RefundRequest, RefundResponse,
    StatusResponse,
};

pub struct SandboxGateway {
    success_rate: f64,
    checkout_base_url: String,
}

impl SandboxGateway {
    /// `success_rate` is clamped into `0.0..=1.0`.
    pub fn new(success_rate: f64, checkout_base_url: impl Into<String>) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
            checkout_base_url: checkout_base_url.into(),
        }
    }

    fn outcome(&self) -> TxnStatus {
        if rand::thread_rng().gen_bool(self.success_rate) {
            TxnStatus::Success
        } else {
            TxnStatus::Failed
        }
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateResponse> {
        let payment_id = format!("SBX-PAY-{}", request.order_id.simple());
        Ok(InitiateResponse {
            redirect_url: format!("{}/checkout/{}", self.checkout_base_url, payment_id),
            gateway_payment_id: payment_id,
            status: "initiated".to_string(),
        })
    }

    async fn execute(&self, payment_id: &str) -> Result<ExecuteResponse> {
        let status = self.outcome();
        Ok(ExecuteResponse {
            gateway_txn_id: Some(format!("SBX-TXN-{}", payment_id)),
            gateway_ref_id: Some(payment_id.to_string()),
            status,
            amount: None,
            fee: None,
            raw: json!({"gateway": "sandbox", "payment_id": payment_id, "status": status}),
        })
    }

    async fn query_status(&self, payment_id: &str) -> Result<StatusResponse> {
        let status = self.outcome();
        Ok(StatusResponse {
            gateway_txn_id: Some(format!("SBX-TXN-{}", payment_id)),
            status,
            amount: None,
            raw: json!({"gateway": "sandbox", "payment_id": payment_id, "status": status}),
        })
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundResponse> {
        Ok(RefundResponse {
            gateway_refund_id: Some(format!("SBX-RFD-{}", request.refund_id.simple())),
            status: TxnStatus::Success,
            raw: json!({"gateway": "sandbox", "refunded": request.amount.to_string()}),
        })
    }
}
