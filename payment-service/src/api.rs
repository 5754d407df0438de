use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use shared::db::models::{PaymentTransaction, Refund};
use shared::db::repo::Actor;
use shared::{ActorType, AppError, ErrorResponse, PaymentMethod};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::refund::{CreateRefundRequest, RefundProcessor};
use crate::service::{CallbackRequest, InitiatePaymentRequest, InitiatePaymentResponse, PaymentService};
use crate::wallet::{WalletBalance, WalletService};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_TYPE_HEADER: &str = "x-actor-type";

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentService>,
    pub refunds: Arc<RefundProcessor>,
    pub wallet: WalletService,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn api_error(err: AppError) -> ApiError {
    if matches!(err, AppError::Internal { .. }) {
        tracing::error!("{}", err);
    }
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.to_response()))
}

pub fn tenant_from(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get(TENANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
        .ok_or_else(|| api_error(AppError::Unauthorized("missing or invalid x-tenant-id header".to_string())))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Refunds are issued by platform staff unless the headers say otherwise.
pub fn actor_from(headers: &HeaderMap) -> Result<Actor, ApiError> {
    Actor::from_headers(
        header_value(headers, ACTOR_ID_HEADER),
        header_value(headers, ACTOR_TYPE_HEADER),
        ActorType::PlatformAdmin,
    )
    .map_err(api_error)
}

fn method_from(segment: &str) -> Result<PaymentMethod, ApiError> {
    PaymentMethod::from_path(segment)
        .ok_or_else(|| api_error(AppError::bad_request(format!("unsupported payment method: {}", segment))))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/payments/:method/initiate", post(initiate_payment))
        .route("/payments/:method/callback", post(payment_callback))
        .route("/orders/:id/refunds", post(create_refund))
        .route("/wallets/:user_id", get(wallet_balance))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(method): Path<String>,
    Json(request): Json<InitiatePaymentRequest>,
) -> ApiResult<InitiatePaymentResponse> {
    let tenant_id = tenant_from(&headers)?;
    let method = method_from(&method)?;
    state
        .payments
        .initiate(tenant_id, method, request)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn payment_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(method): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<PaymentTransaction> {
    let tenant_id = tenant_from(&headers)?;
    let method = method_from(&method)?;
    let callback = CallbackRequest::from_payload(payload).map_err(api_error)?;
    state
        .payments
        .process_callback(tenant_id, method, callback)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn create_refund(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(request): Json<CreateRefundRequest>,
) -> Result<(StatusCode, Json<Refund>), ApiError> {
    let tenant_id = tenant_from(&headers)?;
    let actor = actor_from(&headers)?;
    let refund = state
        .refunds
        .process(tenant_id, order_id, request, actor)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(refund)))
}

pub async fn wallet_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> ApiResult<WalletBalance> {
    let tenant_id = tenant_from(&headers)?;
    state.wallet.balance(tenant_id, user_id).await.map(Json).map_err(api_error)
}

pub async fn health_check() -> &'static str {
    "OK"
}
