use crate::handlers::common::{
    client_ip, created_response, map_service_error, validate_input, validate_non_negative,
    BuyerIdentity,
};
use crate::{
    entities::PaymentMethod,
    errors::{ApiError, ServiceError},
    repositories::OrderOwner,
    services::{
        order_builder::{Buyer, GuestContact},
        order_placement::{CheckoutLine, PlaceOrderCommand},
    },
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(place_order))
        .route("/coupons/preview", post(preview_coupon))
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutItemRequest {
    pub variant_id: Uuid,
    #[validate(range(min = 1, max = 1000, message = "Quantity must be between 1 and 1000"))]
    pub quantity: i32,
    #[validate(custom = "validate_non_negative")]
    pub unit_price: Decimal,
}

impl From<&CheckoutItemRequest> for CheckoutLine {
    fn from(item: &CheckoutItemRequest) -> Self {
        CheckoutLine {
            variant_id: item.variant_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GuestCheckoutRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 500))]
    pub address: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PlaceOrderRequest {
    #[validate]
    pub items: Vec<CheckoutItemRequest>,
    #[validate(length(min = 1, max = 500))]
    pub shipping_address: Option<String>,
    #[validate]
    pub guest: Option<GuestCheckoutRequest>,
    pub shipping_provider_id: Uuid,
    pub payment_method: PaymentMethod,
    #[validate(length(max = 50))]
    pub coupon_code: Option<String>,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub shipping_fee: Decimal,
    pub cart_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaceOrderResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_order_id: Option<Uuid>,
    pub order_number: String,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CouponPreviewRequest {
    #[validate(length(min = 1, max = 50))]
    pub coupon_code: String,
    #[validate]
    pub items: Vec<CheckoutItemRequest>,
    /// Lets guests see their per-email redemption limit.
    #[validate(email)]
    pub guest_email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CouponPreviewResponse {
    pub eligible: bool,
    pub discount: Decimal,
    pub eligible_subtotal: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
}

/// Works out who is buying from the header and body.
fn resolve_buyer(
    identity: BuyerIdentity,
    request: &PlaceOrderRequest,
) -> Result<(Buyer, String), ServiceError> {
    match (identity.user_id, &request.guest) {
        (Some(user_id), _) => {
            let address = request
                .shipping_address
                .clone()
                .or_else(|| request.guest.as_ref().map(|g| g.address.clone()))
                .ok_or_else(|| {
                    ServiceError::ValidationError("shipping_address is required".to_string())
                })?;
            Ok((Buyer::Registered { user_id }, address))
        }
        (None, Some(guest)) => Ok((
            Buyer::Guest(GuestContact {
                name: guest.name.trim().to_string(),
                email: guest.email.trim().to_string(),
                phone: guest.phone.trim().to_string(),
            }),
            guest.address.clone(),
        )),
        (None, None) => Err(ServiceError::ValidationError(
            "guest contact details are required without a signed-in user".to_string(),
        )),
    }
}

/// Place an order from the submitted lines
async fn place_order(
    State(state): State<AppState>,
    identity: BuyerIdentity,
    headers: HeaderMap,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let (buyer, shipping_address) = resolve_buyer(identity, &payload).map_err(map_service_error)?;

    let command = PlaceOrderCommand {
        buyer,
        lines: payload.items.iter().map(CheckoutLine::from).collect(),
        coupon_code: payload.coupon_code.clone(),
        payment_method: payload.payment_method,
        shipping_provider_id: payload.shipping_provider_id,
        shipping_address,
        shipping_fee: payload.shipping_fee,
        cart_id: payload.cart_id,
        client_ip: client_ip(&headers),
    };

    let placed = state
        .services
        .placement
        .place(command)
        .await
        .map_err(map_service_error)?;

    let (order_id, guest_order_id) = match placed.order.owner {
        OrderOwner::User => (Some(placed.order.id), None),
        OrderOwner::Guest => (None, Some(placed.order.id)),
    };

    Ok(created_response(PlaceOrderResponse {
        success: true,
        order_id,
        guest_order_id,
        order_number: placed.order_number,
        subtotal: placed.totals.subtotal,
        shipping_fee: placed.totals.shipping_fee,
        discount_amount: placed.totals.discount,
        total_amount: placed.totals.total,
        payment_url: placed.payment_url,
    }))
}

/// Evaluate a coupon against the lines without placing anything
async fn preview_coupon(
    State(state): State<AppState>,
    identity: BuyerIdentity,
    Json(payload): Json<CouponPreviewRequest>,
) -> Result<Json<ApiResponse<CouponPreviewResponse>>, ApiError> {
    validate_input(&payload)?;

    let buyer = match (identity.user_id, &payload.guest_email) {
        (Some(user_id), _) => Buyer::Registered { user_id },
        (None, email) => Buyer::Guest(GuestContact {
            name: String::new(),
            email: email.clone().unwrap_or_default(),
            phone: String::new(),
        }),
    };
    let lines: Vec<CheckoutLine> = payload.items.iter().map(CheckoutLine::from).collect();

    let evaluation = state
        .services
        .placement
        .preview_coupon(&payload.coupon_code, &buyer, &lines)
        .await
        .map_err(map_service_error)?;

    Ok(Json(ApiResponse::success(CouponPreviewResponse {
        eligible: evaluation.eligible,
        discount: evaluation.discount,
        eligible_subtotal: evaluation.eligible_subtotal,
        reason_code: evaluation.reason.as_ref().map(|r| r.code().to_string()),
        reason: evaluation.reason.map(|r| r.to_string()),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn request(guest: Option<GuestCheckoutRequest>, address: Option<&str>) -> PlaceOrderRequest {
        PlaceOrderRequest {
            items: vec![CheckoutItemRequest {
                variant_id: Uuid::new_v4(),
                quantity: 1,
                unit_price: dec!(250000),
            }],
            shipping_address: address.map(str::to_string),
            guest,
            shipping_provider_id: Uuid::new_v4(),
            payment_method: PaymentMethod::Cod,
            coupon_code: None,
            shipping_fee: dec!(30000),
            cart_id: None,
        }
    }

    fn guest() -> GuestCheckoutRequest {
        GuestCheckoutRequest {
            name: "Lan".into(),
            email: "lan@example.com".into(),
            phone: "0900000000".into(),
            address: "1 Le Loi".into(),
        }
    }

    #[test]
    fn signed_in_user_buys_as_registered() {
        let user_id = Uuid::new_v4();
        let (buyer, address) = resolve_buyer(
            BuyerIdentity {
                user_id: Some(user_id),
            },
            &request(None, Some("2 Hai Ba Trung")),
        )
        .unwrap();
        assert_eq!(buyer, Buyer::Registered { user_id });
        assert_eq!(address, "2 Hai Ba Trung");
    }

    #[test]
    fn anonymous_checkout_needs_guest_details() {
        let err = resolve_buyer(BuyerIdentity { user_id: None }, &request(None, None)).unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));

        let (buyer, address) =
            resolve_buyer(BuyerIdentity { user_id: None }, &request(Some(guest()), None)).unwrap();
        assert_matches!(buyer, Buyer::Guest(_));
        assert_eq!(address, "1 Le Loi");
    }

    #[test]
    fn invalid_quantities_and_emails_fail_validation() {
        let mut bad = request(Some(guest()), None);
        bad.items[0].quantity = 0;
        assert!(bad.validate().is_err());

        let mut bad = request(
            Some(GuestCheckoutRequest {
                email: "not-an-email".into(),
                ..guest()
            }),
            None,
        );
        assert!(bad.validate().is_err());
        bad.guest = Some(guest());
        assert!(bad.validate().is_ok());
    }
}
