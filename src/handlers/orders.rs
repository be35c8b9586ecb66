use crate::handlers::common::{map_service_error, validate_input};
use crate::{
    entities::{OrderStatus, PaymentStatus},
    errors::ApiError,
    repositories::{OrderOwner, OrderRef, OrderSnapshot},
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::put,
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for administrative order endpoints
pub fn admin_order_routes() -> Router<AppState> {
    Router::new().route("/:kind/:id/status", put(update_order_status))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    #[validate(length(min = 1, max = 100))]
    pub tracking_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderStatusResponse {
    pub order_reference: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub tracking_code: Option<String>,
    pub order_date: DateTime<Utc>,
}

impl From<OrderSnapshot> for OrderStatusResponse {
    fn from(order: OrderSnapshot) -> Self {
        Self {
            order_reference: order.order.merchant_reference(),
            order_number: order.order_number,
            status: order.status,
            payment_status: order.payment_status,
            total_amount: order.total_amount,
            tracking_code: order.tracking_code,
            order_date: order.order_date,
        }
    }
}

/// Administrative status override; `kind` is `user` or `guest`
async fn update_order_status(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, Uuid)>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderStatusResponse>>, ApiError> {
    validate_input(&payload)?;
    let owner = OrderOwner::from_str(&kind)
        .map_err(|_| ApiError::BadRequest(format!("unknown order kind '{}'", kind)))?;

    let updated = state
        .services
        .order_status
        .update_status(OrderRef { owner, id }, payload.status, payload.tracking_code)
        .await
        .map_err(map_service_error)?;

    Ok(Json(ApiResponse::success(updated.into())))
}
