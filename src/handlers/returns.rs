use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::entities::return_request;
use crate::services::returns::{ReturnRequestInput, UpdateReturnStatusInput};
use crate::{errors::ServiceError, ApiResponse, ApiResult, AppState};

/// POST /api/v1/returns
pub async fn create_return(
    State(state): State<AppState>,
    Json(request): Json<ReturnRequestInput>,
) -> Result<(StatusCode, Json<ApiResponse<return_request::Model>>), ServiceError> {
    let created = state.services.returns.request_return(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// GET /api/v1/returns/:id
pub async fn get_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<return_request::Model> {
    let found = state.services.returns.get_return(id).await?;
    Ok(Json(ApiResponse::success(found)))
}

/// GET /api/v1/orders/:id/returns
pub async fn list_order_returns(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Vec<return_request::Model>> {
    let returns = state
        .services
        .returns
        .list_returns_for_order(order_id)
        .await?;
    Ok(Json(ApiResponse::success(returns)))
}

/// PUT /api/v1/returns/:id/status
pub async fn update_return_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateReturnStatusInput>,
) -> ApiResult<return_request::Model> {
    let updated = state
        .services
        .returns
        .update_return_status(id, request)
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}
