use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::entities::{order, sub_order, OrderStatus, SubOrderStatus};
use crate::services::orders::{CreateOrderOptions, CreateOrderRequest, OrderDetails};
use crate::{errors::ServiceError, ApiResponse, ApiResult, AppState};

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub sub_order_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubOrderStatusRequest {
    pub status: SubOrderStatus,
}

/// POST /api/v1/orders
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreateOrderResponse>>), ServiceError> {
    let options = CreateOrderOptions {
        clear_cart: request.clear_cart,
        ..Default::default()
    };
    let result = state.services.orders.create_order(request, options).await?;

    info!(order_id = %result.order.id, order_number = %result.order_number, "order placed via API");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(CreateOrderResponse {
            order_id: result.order.id,
            order_number: result.order_number,
            sub_order_ids: result.sub_order_ids,
        })),
    ))
}

/// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderDetails> {
    let details = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(details)))
}

/// GET /api/v1/orders/by-number/:order_number
pub async fn get_order_by_number(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> ApiResult<OrderDetails> {
    let details = state
        .services
        .orders
        .get_order_by_number(order_number.trim())
        .await?;
    Ok(Json(ApiResponse::success(details)))
}

/// PUT /api/v1/orders/:id/status
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> ApiResult<order::Model> {
    let updated = state
        .services
        .orders
        .update_order_status(id, request.status)
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}

/// POST /api/v1/orders/:id/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<order::Model> {
    let cancelled = state.services.orders.cancel_order(id).await?;
    Ok(Json(ApiResponse::success(cancelled)))
}

/// PUT /api/v1/sub-orders/:id/status
pub async fn update_sub_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSubOrderStatusRequest>,
) -> ApiResult<sub_order::Model> {
    let updated = state
        .services
        .orders
        .update_sub_order_status(id, request.status)
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}
