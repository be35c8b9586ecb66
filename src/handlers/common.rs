use crate::errors::{ApiError, ServiceError};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Header carrying the authenticated user's id, set by the upstream gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ValidationError(format!("Validation failed: {}", e)))
}

/// Map service errors to API errors
pub fn map_service_error(err: ServiceError) -> ApiError {
    ApiError::ServiceError(err)
}

pub fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::new("must_not_be_negative"));
    }
    Ok(())
}

/// The signed-in user, if any. Absence means a guest checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyerIdentity {
    pub user_id: Option<Uuid>,
}

#[async_trait]
impl<S> FromRequestParts<S> for BuyerIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(USER_ID_HEADER) else {
            return Ok(Self { user_id: None });
        };
        let user_id = raw
            .to_str()
            .ok()
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or_else(|| ApiError::BadRequest(format!("{} must be a UUID", USER_ID_HEADER)))?;
        Ok(Self {
            user_id: Some(user_id),
        })
    }
}

/// First `x-forwarded-for` hop, falling back to loopback.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("127.0.0.1")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};
    use rust_decimal_macros::dec;

    async fn identity(header: Option<&str>) -> Result<BuyerIdentity, ApiError> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(USER_ID_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        BuyerIdentity::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn missing_header_means_guest() {
        assert_eq!(identity(None).await.unwrap().user_id, None);
    }

    #[tokio::test]
    async fn user_header_must_be_a_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(identity(Some(&id.to_string())).await.unwrap().user_id, Some(id));
        assert!(identity(Some("admin")).await.is_err());
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "127.0.0.1");
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), "203.0.113.9");
    }

    #[test]
    fn negative_amounts_fail_validation() {
        assert!(validate_non_negative(&dec!(0)).is_ok());
        assert!(validate_non_negative(&dec!(30000)).is_ok());
        assert!(validate_non_negative(&dec!(-1)).is_err());
    }
}
