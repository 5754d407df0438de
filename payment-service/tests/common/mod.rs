#![allow(dead_code)]

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use payment_service::gateway::{
    ExecuteResponse, GatewayRegistry, InitiateRequest, InitiateResponse, PaymentGateway, RefundRequest,
    RefundResponse, StatusResponse,
};
use payment_service::reconciliation::{ReconciliationJob, ReconciliationSettings};
use payment_service::refund::RefundProcessor;
use payment_service::service::PaymentService;
use payment_service::wallet::WalletService;
use serde_json::json;
use shared::db::models::{NewOrder, Order, PaymentTransaction, TimelineEvent, User};
use shared::db::schema::{orders, payment_transactions, users};
use shared::db::{create_pool, repo, run_migrations, DbPool};
use shared::{OrderStatus, PaymentMethod, PaymentStatus, TxnStatus};
use uuid::Uuid;

static MIGRATED: OnceLock<()> = OnceLock::new();

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

/// Gateway whose answers are set by the test. Status queries for payments it
/// did not initiate report PENDING, so tests sharing a database stay apart.
pub struct ScriptedGateway {
    pub issued: Mutex<HashSet<String>>,
    pub execute_status: Mutex<TxnStatus>,
    pub query_status: Mutex<Option<TxnStatus>>,
    pub refund_status: Mutex<TxnStatus>,
    pub fail_initiate: Mutex<bool>,
    pub fail_refund: Mutex<bool>,
    pub execute_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self {
            issued: Mutex::new(HashSet::new()),
            execute_status: Mutex::new(TxnStatus::Success),
            query_status: Mutex::new(Some(TxnStatus::Pending)),
            refund_status: Mutex::new(TxnStatus::Success),
            fail_initiate: Mutex::new(false),
            fail_refund: Mutex::new(false),
            execute_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedGateway {
    pub fn executions(&self) -> usize {
        AtomicUsize::load(&self.execute_calls, Ordering::SeqCst)
    }

    pub fn refunds_sent(&self) -> usize {
        AtomicUsize::load(&self.refund_calls, Ordering::SeqCst)
    }

    /// `None` makes status queries fail as if the provider were down.
    pub fn answer_queries_with(&self, status: Option<TxnStatus>) {
        *self.query_status.lock().unwrap() = status;
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateResponse> {
        if *self.fail_initiate.lock().unwrap() {
            return Err(anyhow!("connection refused"));
        }
        let payment_id = format!("PAY-{}", request.order_id.simple());
        self.issued.lock().unwrap().insert(payment_id.clone());
        Ok(InitiateResponse {
            redirect_url: format!("https://pay.test/{}", payment_id),
            gateway_payment_id: payment_id,
            status: "Initiated".to_string(),
        })
    }

    async fn execute(&self, payment_id: &str) -> Result<ExecuteResponse> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        let status = *self.execute_status.lock().unwrap();
        Ok(ExecuteResponse {
            gateway_txn_id: Some(format!("TRX-{}", payment_id)),
            gateway_ref_id: Some(payment_id.to_string()),
            status,
            amount: None,
            fee: Some(dec("5.50")),
            raw: json!({"paymentID": payment_id, "status": status}),
        })
    }

    async fn query_status(&self, payment_id: &str) -> Result<StatusResponse> {
        let mut status = (*self.query_status.lock().unwrap()).ok_or_else(|| anyhow!("gateway timeout"))?;
        if !self.issued.lock().unwrap().contains(payment_id) {
            status = TxnStatus::Pending;
        }
        Ok(StatusResponse {
            gateway_txn_id: Some(format!("TRX-{}", payment_id)),
            status,
            amount: None,
            raw: json!({"paymentID": payment_id, "status": status}),
        })
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundResponse> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_refund.lock().unwrap() {
            return Err(anyhow!("read timed out"));
        }
        Ok(RefundResponse {
            gateway_refund_id: Some(format!("RFD-{}", request.refund_id.simple())),
            status: *self.refund_status.lock().unwrap(),
            raw: json!({"refunded": request.amount.to_string(), "trxID": request.gateway_txn_id}),
        })
    }
}

pub struct TestContext {
    pub pool: DbPool,
    pub tenant_id: Uuid,
    pub gateway: Arc<ScriptedGateway>,
    pub payments: PaymentService,
    pub refunds: RefundProcessor,
    pub wallet: WalletService,
    pub reconciliation: ReconciliationJob,
}

/// Connects to `TEST_DATABASE_URL`, or returns `None` so the test can skip.
pub async fn setup() -> Option<TestContext> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    MIGRATED.get_or_init(|| run_migrations(&url).expect("migrations"));
    let pool = create_pool(&url).await.expect("pool");

    let gateway = Arc::new(ScriptedGateway::default());
    let gateways = GatewayRegistry::new().with(PaymentMethod::Bkash, gateway.clone());
    let wallet = WalletService::new(pool.clone());

    Some(TestContext {
        payments: PaymentService::new(pool.clone(), gateways.clone(), "http://localhost:3002"),
        refunds: RefundProcessor::new(pool.clone(), gateways.clone(), wallet.clone()),
        reconciliation: ReconciliationJob::new(pool.clone(), gateways, ReconciliationSettings::default()),
        wallet,
        gateway,
        tenant_id: Uuid::new_v4(),
        pool,
    })
}

impl TestContext {
    pub async fn insert_order(
        &self,
        customer_id: Uuid,
        method: PaymentMethod,
        status: OrderStatus,
        payment_status: PaymentStatus,
        total: &str,
    ) -> Order {
        let mut conn = self.pool.get().await.unwrap();
        let total = dec(total);
        diesel::insert_into(orders::table)
            .values(&NewOrder {
                id: Uuid::new_v4(),
                tenant_id: self.tenant_id,
                order_number: format!("TST-{}", Uuid::new_v4().simple()),
                customer_id,
                status: status.as_str().to_string(),
                payment_status: payment_status.as_str().to_string(),
                payment_method: method.as_str().to_string(),
                subtotal: &total - dec("60"),
                item_discount_total: dec("0"),
                promo_discount_total: dec("0"),
                vat_total: dec("0"),
                delivery_charge: dec("60"),
                service_fee: dec("0"),
                total_amount: total,
                promo_id: None,
                promo_code: None,
                promo_snapshot: None,
                delivery_address: json!({"line1": "House 12, Road 5"}),
                delivery_recipient_name: Some("Test Customer".to_string()),
                delivery_recipient_phone: Some("01700000000".to_string()),
                delivery_area: Some("Dhanmondi".to_string()),
                customer_note: None,
                auto_confirm_at: None,
            })
            .returning(Order::as_returning())
            .get_result(&mut conn)
            .await
            .unwrap()
    }

    pub async fn insert_user(&self, balance: &str) -> Uuid {
        let mut conn = self.pool.get().await.unwrap();
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            name: "Wallet Customer".to_string(),
            phone: None,
            wallet_balance: dec(balance),
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(users::table)
            .values(&user)
            .execute(&mut conn)
            .await
            .unwrap();
        user.id
    }

    /// Initiates and confirms a bKash payment so the order ends up PAID.
    pub async fn paid_online_order(&self, total: &str) -> (Order, PaymentTransaction) {
        let order = self
            .insert_order(Uuid::new_v4(), PaymentMethod::Bkash, OrderStatus::Pending, PaymentStatus::Unpaid, total)
            .await;
        let initiated = self
            .payments
            .initiate(
                self.tenant_id,
                PaymentMethod::Bkash,
                payment_service::service::InitiatePaymentRequest {
                    order_id: order.id,
                    customer_name: None,
                    customer_phone: None,
                },
            )
            .await
            .unwrap();
        let callback = payment_service::service::CallbackRequest::from_payload(
            json!({"paymentID": initiated.gateway_payment_id, "status": "success"}),
        )
        .unwrap();
        let txn = self
            .payments
            .process_callback(self.tenant_id, PaymentMethod::Bkash, callback)
            .await
            .unwrap();
        (self.order(order.id).await, txn)
    }

    pub async fn order(&self, order_id: Uuid) -> Order {
        let mut conn = self.pool.get().await.unwrap();
        orders::table
            .filter(orders::id.eq(order_id))
            .select(Order::as_select())
            .first(&mut conn)
            .await
            .unwrap()
    }

    pub async fn transaction(&self, transaction_id: Uuid) -> PaymentTransaction {
        let mut conn = self.pool.get().await.unwrap();
        payment_transactions::table
            .filter(payment_transactions::id.eq(transaction_id))
            .select(PaymentTransaction::as_select())
            .first(&mut conn)
            .await
            .unwrap()
    }

    pub async fn timeline(&self, order_id: Uuid) -> Vec<TimelineEvent> {
        let mut conn = self.pool.get().await.unwrap();
        repo::list_timeline(&mut conn, order_id).await.unwrap()
    }

    pub async fn events_of(&self, order_id: Uuid, event_type: &str) -> usize {
        self.timeline(order_id)
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

pub fn txn_status(txn: &PaymentTransaction) -> TxnStatus {
    txn.txn_status().unwrap()
}
