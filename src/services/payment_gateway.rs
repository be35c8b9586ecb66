//! Hosted payment page protocol (VNPay 2.1.0 style).
//!
//! Outbound: a redirect URL whose query string is the sorted, form-encoded
//! `vnp_*` parameters plus `vnp_SecureHash`, an HMAC-SHA512 of that query
//! string under the merchant secret. Inbound callbacks carry the same kind of
//! signature and are checked with [`verify`].

use chrono::{DateTime, Duration, FixedOffset, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sha2::Sha512;
use std::collections::{BTreeMap, HashMap};

use crate::config::PaymentGatewayConfig;
use crate::errors::ServiceError;
use crate::repositories::OrderRef;

type HmacSha512 = Hmac<Sha512>;

pub const SECURE_HASH: &str = "vnp_SecureHash";
pub const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";
const PARAM_PREFIX: &str = "vnp_";

/// Sorted, form-encoded `key=value&...` string the signature covers.
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        if !value.is_empty() {
            serializer.append_pair(key, value);
        }
    }
    serializer.finish()
}

/// Hex HMAC-SHA512 of the canonical query string.
pub fn sign(secret: &str, params: &BTreeMap<String, String>) -> Result<String, ServiceError> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid gateway secret: {}", e)))?;
    mac.update(canonical_query(params).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of `signature` against `params`. Hex case is ignored.
pub fn verify(secret: &str, params: &BTreeMap<String, String>, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(canonical_query(params).as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Amount in the gateway's unit (currency amount × 100).
pub fn amount_in_minor_units(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED).round().to_i64()
}

/// Query parameters of a gateway callback, split into signed fields and signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub fields: BTreeMap<String, String>,
    pub signature: Option<String>,
}

impl CallbackParams {
    /// Keeps only `vnp_*` keys; the hash and hash type are never signed.
    pub fn from_query(query: HashMap<String, String>) -> Self {
        let mut params = CallbackParams::default();
        for (key, value) in query {
            if key == SECURE_HASH {
                params.signature = Some(value);
            } else if key == SECURE_HASH_TYPE {
                continue;
            } else if key.starts_with(PARAM_PREFIX) {
                params.fields.insert(key, value);
            }
        }
        params
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn txn_ref(&self) -> Option<&str> {
        self.get("vnp_TxnRef")
    }

    pub fn response_code(&self) -> Option<&str> {
        self.get("vnp_ResponseCode")
    }

    pub fn transaction_status(&self) -> Option<&str> {
        self.get("vnp_TransactionStatus")
    }

    pub fn transaction_no(&self) -> Option<&str> {
        self.get("vnp_TransactionNo").filter(|v| !v.is_empty())
    }

    pub fn amount(&self) -> Option<i64> {
        self.get("vnp_Amount").and_then(|v| v.parse().ok())
    }

    /// `vnp_ResponseCode == "00"` and, when sent, `vnp_TransactionStatus == "00"`.
    pub fn is_success(&self) -> bool {
        self.response_code() == Some("00")
            && self.transaction_status().map_or(true, |status| status == "00")
    }
}

/// What the buyer is being asked to pay.
#[derive(Debug, Clone)]
pub struct PaymentRequest<'a> {
    pub order: &'a OrderRef,
    pub order_number: &'a str,
    pub amount: Decimal,
    pub client_ip: &'a str,
}

#[derive(Debug, Clone)]
pub struct PaymentGateway {
    config: PaymentGatewayConfig,
}

impl PaymentGateway {
    pub fn new(config: PaymentGatewayConfig) -> Self {
        Self { config }
    }

    fn local_time(&self, at: DateTime<Utc>) -> Result<String, ServiceError> {
        let offset = FixedOffset::east_opt(self.config.utc_offset_hours * 3600).ok_or_else(|| {
            ServiceError::InternalError(format!(
                "invalid gateway utc offset {}",
                self.config.utc_offset_hours
            ))
        })?;
        Ok(at.with_timezone(&offset).format("%Y%m%d%H%M%S").to_string())
    }

    /// Signed redirect URL for the hosted payment page.
    pub fn payment_url(
        &self,
        request: &PaymentRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let amount = amount_in_minor_units(request.amount).ok_or_else(|| {
            ServiceError::ValidationError(format!("amount {} out of range", request.amount))
        })?;
        let expires_at = now + Duration::minutes(self.config.expire_minutes);

        let mut params = BTreeMap::new();
        params.insert("vnp_Version".to_string(), self.config.version.clone());
        params.insert("vnp_Command".to_string(), self.config.command.clone());
        params.insert("vnp_TmnCode".to_string(), self.config.tmn_code.clone());
        params.insert("vnp_Amount".to_string(), amount.to_string());
        params.insert("vnp_CurrCode".to_string(), self.config.currency.clone());
        params.insert(
            "vnp_TxnRef".to_string(),
            request.order.merchant_reference(),
        );
        params.insert(
            "vnp_OrderInfo".to_string(),
            format!("Thanh toan don hang {}", request.order_number),
        );
        params.insert("vnp_OrderType".to_string(), self.config.order_type.clone());
        params.insert("vnp_Locale".to_string(), self.config.locale.clone());
        params.insert("vnp_ReturnUrl".to_string(), self.config.return_url.clone());
        params.insert("vnp_IpAddr".to_string(), request.client_ip.to_string());
        params.insert("vnp_CreateDate".to_string(), self.local_time(now)?);
        params.insert("vnp_ExpireDate".to_string(), self.local_time(expires_at)?);

        let signature = sign(&self.config.hash_secret, &params)?;
        Ok(format!(
            "{}?{}&{}={}",
            self.config.payment_url,
            canonical_query(&params),
            SECURE_HASH,
            signature
        ))
    }

    pub fn verify(&self, params: &CallbackParams) -> bool {
        match params.signature.as_deref() {
            Some(signature) => verify(&self.config.hash_secret, &params.fields, signature),
            None => false,
        }
    }

    /// Signs callback fields the way the gateway does. Used to simulate callbacks.
    pub fn sign_fields(&self, fields: &BTreeMap<String, String>) -> Result<String, ServiceError> {
        sign(&self.config.hash_secret, fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    const SECRET: &str = "TESTSECRETKEY123";

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn canonical_query_is_sorted_and_form_encoded() {
        let params = fields(&[
            ("vnp_OrderInfo", "Thanh toan don hang ORD-1"),
            ("vnp_Amount", "1000000"),
            ("vnp_ReturnUrl", "http://localhost/return?x=1"),
        ]);
        assert_eq!(
            canonical_query(&params),
            "vnp_Amount=1000000&vnp_OrderInfo=Thanh+toan+don+hang+ORD-1&vnp_ReturnUrl=http%3A%2F%2Flocalhost%2Freturn%3Fx%3D1"
        );
    }

    #[test]
    fn signature_verifies_and_detects_tampering() {
        let params = fields(&[
            ("vnp_Amount", "43000000"),
            ("vnp_ResponseCode", "00"),
            ("vnp_TxnRef", "USER_8f14e45f-ceea-467f-a0e6-1c1b2a3d4e5f"),
        ]);
        let signature = sign(SECRET, &params).unwrap();
        assert_eq!(signature.len(), 128);
        assert!(verify(SECRET, &params, &signature));
        assert!(verify(SECRET, &params, &signature.to_uppercase()));

        let mut tampered = params.clone();
        tampered.insert("vnp_Amount".into(), "100".into());
        assert!(!verify(SECRET, &tampered, &signature));

        assert!(!verify("another-secret", &params, &signature));
        assert!(!verify(SECRET, &params, "not-hex"));
    }

    #[test]
    fn callback_params_drop_hash_fields_and_foreign_keys() {
        let mut query = HashMap::new();
        query.insert("vnp_TxnRef".to_string(), "GUEST_x".to_string());
        query.insert(SECURE_HASH.to_string(), "abc".to_string());
        query.insert(SECURE_HASH_TYPE.to_string(), "HmacSHA512".to_string());
        query.insert("utm_source".to_string(), "mail".to_string());

        let params = CallbackParams::from_query(query);
        assert_eq!(params.signature.as_deref(), Some("abc"));
        assert_eq!(params.fields.len(), 1);
        assert_eq!(params.txn_ref(), Some("GUEST_x"));
    }

    #[test]
    fn success_requires_both_codes_when_present() {
        let mut params = CallbackParams {
            fields: fields(&[("vnp_ResponseCode", "00")]),
            signature: None,
        };
        assert!(params.is_success());

        params
            .fields
            .insert("vnp_TransactionStatus".into(), "02".into());
        assert!(!params.is_success());

        params.fields.insert("vnp_ResponseCode".into(), "24".into());
        params
            .fields
            .insert("vnp_TransactionStatus".into(), "00".into());
        assert!(!params.is_success());
    }

    #[test]
    fn payment_url_is_signed_and_uses_gateway_local_time() {
        let gateway = PaymentGateway::new(PaymentGatewayConfig::default());
        let order = OrderRef::user(Uuid::new_v4());
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 17, 30, 0).unwrap();

        let url = gateway
            .payment_url(
                &PaymentRequest {
                    order: &order,
                    order_number: "ORD-20240601-AAAA0000",
                    amount: dec!(430000),
                    client_ip: "10.0.0.1",
                },
                now,
            )
            .unwrap();

        let parsed = url::Url::parse(&url).unwrap();
        let query: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
        assert_eq!(query["vnp_Amount"], "43000000");
        assert_eq!(query["vnp_TxnRef"], order.merchant_reference());
        // 17:30 UTC is 00:30 the next day at UTC+7
        assert_eq!(query["vnp_CreateDate"], "20240602003000");
        assert_eq!(query["vnp_ExpireDate"], "20240602004500");

        let params = CallbackParams::from_query(query);
        assert!(gateway.verify(&params));
    }

    #[test]
    fn amounts_are_scaled_by_one_hundred() {
        assert_eq!(amount_in_minor_units(dec!(430000)), Some(43_000_000));
        assert_eq!(amount_in_minor_units(dec!(0)), Some(0));
    }
}
