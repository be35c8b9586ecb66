use crate::{
    services::payment_gateway::CallbackParams,
    services::payment_reconciler::{CallbackOutcome, IpnResponse},
    ApiResponse, AppState,
};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Creates the router for gateway callbacks
pub fn payment_callback_routes() -> Router<AppState> {
    Router::new()
        .route("/vnpay/return", get(payment_return))
        .route("/vnpay/ipn", get(payment_ipn))
}

/// What the buyer's browser sees after the gateway redirects back.
#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentReturnSummary {
    pub paid: bool,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_reference: Option<String>,
    pub message: String,
}

fn buyer_message(outcome: CallbackOutcome) -> &'static str {
    match outcome {
        CallbackOutcome::Confirmed => "Payment successful",
        CallbackOutcome::AlreadyProcessed => "Payment already recorded",
        CallbackOutcome::Cancelled => "Payment was not completed, the order has been cancelled",
        CallbackOutcome::AlreadyCancelled => "This order was already cancelled",
        CallbackOutcome::InvalidSignature => "Invalid payment signature",
        CallbackOutcome::OrderNotFound => "Order not found",
        CallbackOutcome::InvalidAmount => "Paid amount does not match the order",
        CallbackOutcome::UnknownError => "Payment could not be processed, please contact support",
    }
}

/// Synchronous return from the hosted payment page
async fn payment_return(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<ApiResponse<PaymentReturnSummary>> {
    let params = CallbackParams::from_query(query);
    let result = state.services.reconciler.reconcile(&params).await;

    Json(ApiResponse::success(PaymentReturnSummary {
        paid: result.paid,
        outcome: result.outcome.as_str().to_string(),
        order_reference: result.order.map(|order| order.merchant_reference()),
        message: buyer_message(result.outcome).to_string(),
    }))
}

/// Server-to-server notification. Always HTTP 200; the body carries the verdict.
async fn payment_ipn(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<IpnResponse> {
    let params = CallbackParams::from_query(query);
    let result = state.services.reconciler.reconcile(&params).await;
    Json(result.outcome.ipn_response())
}
