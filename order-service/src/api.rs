use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use shared::db::repo::Actor;
use shared::{ActorType, AppError, ErrorResponse};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::coordinator::{ChargeBreakdown, ChargesRequest, CreateOrderRequest, OrderCoordinator, OrderDetail};
use crate::lifecycle::{OrderLifecycle, PickupAction};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_TYPE_HEADER: &str = "x-actor-type";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<OrderCoordinator>,
    pub lifecycle: Arc<OrderLifecycle>,
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

pub fn actor_from(headers: &HeaderMap, default_kind: ActorType) -> Result<Actor, ApiError> {
    Actor::from_headers(
        header_value(headers, ACTOR_ID_HEADER),
        header_value(headers, ACTOR_TYPE_HEADER),
        default_kind,
    )
    .map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct PickupActionRequest {
    pub restaurant_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

impl PickupActionRequest {
    /// Restaurant staff act on their own pickup unless the headers name someone else.
    fn into_action(self, headers: &HeaderMap) -> Result<PickupAction, ApiError> {
        let mut actor = actor_from(headers, ActorType::Restaurant)?;
        if actor.id.is_none() && actor.kind == ActorType::Restaurant {
            actor.id = Some(self.restaurant_id);
        }
        Ok(PickupAction {
            restaurant_id: self.restaurant_id,
            actor,
            reason: self.reason,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub customer_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForceCancelRequest {
    pub reason: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/charges", post(calculate_charges))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/confirm", post(confirm))
        .route("/orders/:id/reject", post(reject))
        .route("/orders/:id/preparing", post(preparing))
        .route("/orders/:id/ready", post(ready))
        .route("/orders/:id/picked", post(picked))
        .route("/orders/:id/cancel", post(cancel))
        .route("/orders/:id/force-cancel", post(force_cancel))
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

pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderDetail>), ApiError> {
    let tenant_id = tenant_from(&headers)?;
    let detail = state
        .coordinator
        .create_order(tenant_id, request)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn calculate_charges(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChargesRequest>,
) -> ApiResult<ChargeBreakdown> {
    let tenant_id = tenant_from(&headers)?;
    state
        .coordinator
        .calculate_charges(tenant_id, request)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderDetail> {
    let tenant_id = tenant_from(&headers)?;
    state
        .coordinator
        .get_order(tenant_id, order_id)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn confirm(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(request): Json<PickupActionRequest>,
) -> ApiResult<OrderDetail> {
    let tenant_id = tenant_from(&headers)?;
    let action = request.into_action(&headers)?;
    state
        .lifecycle
        .confirm(tenant_id, order_id, action)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn reject(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(request): Json<PickupActionRequest>,
) -> ApiResult<OrderDetail> {
    let tenant_id = tenant_from(&headers)?;
    let action = request.into_action(&headers)?;
    state
        .lifecycle
        .reject(tenant_id, order_id, action)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn preparing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(request): Json<PickupActionRequest>,
) -> ApiResult<OrderDetail> {
    let tenant_id = tenant_from(&headers)?;
    let action = request.into_action(&headers)?;
    state
        .lifecycle
        .mark_preparing(tenant_id, order_id, action)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn ready(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(request): Json<PickupActionRequest>,
) -> ApiResult<OrderDetail> {
    let tenant_id = tenant_from(&headers)?;
    let action = request.into_action(&headers)?;
    state
        .lifecycle
        .mark_ready(tenant_id, order_id, action)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn picked(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(request): Json<PickupActionRequest>,
) -> ApiResult<OrderDetail> {
    let tenant_id = tenant_from(&headers)?;
    let action = request.into_action(&headers)?;
    state
        .lifecycle
        .mark_picked(tenant_id, order_id, action)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> ApiResult<OrderDetail> {
    let tenant_id = tenant_from(&headers)?;
    state
        .lifecycle
        .cancel(tenant_id, order_id, request.customer_id, request.reason)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn force_cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(request): Json<ForceCancelRequest>,
) -> ApiResult<OrderDetail> {
    let tenant_id = tenant_from(&headers)?;
    let actor = actor_from(&headers, ActorType::PlatformAdmin)?;
    if actor.kind != ActorType::PlatformAdmin {
        return Err(api_error(AppError::forbidden("only platform admins can force-cancel orders")));
    }
    state
        .lifecycle
        .force_cancel(tenant_id, order_id, actor, &request.reason)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn health_check() -> &'static str {
    "OK"
}
