//! Uniform interface over the payment providers.

pub mod aamarpay;
pub mod bkash;
pub mod sandbox;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use shared::{AppError, AppResult, PaymentMethod, TxnStatus};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub order_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub callback_url: String,
    pub customer_name: String,
    pub customer_phone: String,
}

#[derive(Debug, Clone)]
pub struct InitiateResponse {
    pub gateway_payment_id: String,
    pub redirect_url: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct ExecuteResponse {
    pub gateway_txn_id: Option<String>,
    pub gateway_ref_id: Option<String>,
    pub status: TxnStatus,
    pub amount: Option<BigDecimal>,
    pub fee: Option<BigDecimal>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct StatusResponse {
    pub gateway_txn_id: Option<String>,
    pub status: TxnStatus,
    pub amount: Option<BigDecimal>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub gateway_txn_id: String,
    pub amount: BigDecimal,
    pub reason: String,
    pub refund_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct RefundResponse {
    pub gateway_refund_id: Option<String>,
    pub status: TxnStatus,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateResponse>;

    /// Confirms a payment the customer approved at the provider.
    async fn execute(&self, payment_id: &str) -> Result<ExecuteResponse>;

    async fn query_status(&self, payment_id: &str) -> Result<StatusResponse>;

    async fn refund(&self, request: &RefundRequest) -> Result<RefundResponse>;
}

/// Gateways by payment method. Only configured providers are registered.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: PaymentMethod, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(method, gateway);
    }

    pub fn with(mut self, method: PaymentMethod, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(method, gateway);
        self
    }

    pub fn get(&self, method: PaymentMethod) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(&method).cloned()
    }

    pub fn require(&self, method: PaymentMethod) -> AppResult<Arc<dyn PaymentGateway>> {
        self.get(method)
            .ok_or_else(|| AppError::bad_request(format!("unsupported payment method: {}", method)))
    }

    pub fn methods(&self) -> Vec<PaymentMethod> {
        self.gateways.keys().copied().collect()
    }
}

/// Parses a provider amount string. Empty or malformed values are treated as absent.
pub(crate) fn parse_amount(value: &str) -> Option<BigDecimal> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    BigDecimal::from_str(value).ok()
}

pub(crate) fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

pub(crate) fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}
