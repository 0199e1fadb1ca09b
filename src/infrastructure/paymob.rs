use crate::config::PaymobConfig;
use crate::domain::ports::{BillingData, CallbackKind, PaymentGateway, TokenPayment};
use crate::error::{MarketplaceError, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Payment keys stay valid for one hour.
const PAYMENT_KEY_EXPIRATION_SECS: u64 = 3600;

/// Field order Paymob concatenates before signing a transaction callback.
const HMAC_FIELDS: [&str; 20] = [
    "amount_cents",
    "created_at",
    "currency",
    "error_occured",
    "has_parent_transaction",
    "id",
    "integration_id",
    "is_3d_secure",
    "is_auth",
    "is_capture",
    "is_refunded",
    "is_standalone_payment",
    "is_voided",
    "order",
    "owner",
    "pending",
    "source_data.pan",
    "source_data.sub_type",
    "source_data.type",
    "success",
];

/// Field order of a card-token callback.
const TOKEN_HMAC_FIELDS: [&str; 8] = [
    "card_subtype",
    "created_at",
    "email",
    "id",
    "masked_pan",
    "merchant_id",
    "order_id",
    "token",
];

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

#[derive(Deserialize)]
struct OrderResponse {
    id: Option<Value>,
}

#[derive(Deserialize)]
struct PayResponse {
    success: Option<Value>,
    pending: Option<Value>,
    redirect_url: Option<String>,
}

impl From<PayResponse> for TokenPayment {
    fn from(response: PayResponse) -> Self {
        Self {
            success: is_true(response.success.as_ref()),
            pending: is_true(response.pending.as_ref()),
            redirect_url: response.redirect_url.filter(|url| !url.is_empty()),
        }
    }
}

/// HTTP client for Paymob Accept.
#[derive(Clone)]
pub struct PaymobClient {
    http: reqwest::Client,
    config: PaymobConfig,
}

impl PaymobClient {
    pub fn new(config: PaymobConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn setting<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| MarketplaceError::GatewayError(format!("{name} is not set.")))
    }

    async fn post(&self, path: &str, body: Value) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.config.api_base.trim_end_matches('/'), path);
        tracing::debug!(%url, "paymob request");
        let response = self.http.post(url).json(&body).send().await?;
        Ok(response.error_for_status()?)
    }
}

/// Fills the billing fields Paymob insists on with `NA` placeholders.
fn billing_payload(billing: &BillingData) -> Value {
    let or_na = |value: &str| {
        if value.is_empty() {
            "NA".to_string()
        } else {
            value.to_string()
        }
    };
    let email = if billing.email.is_empty() {
        "na@example.com".to_string()
    } else {
        billing.email.clone()
    };
    json!({
        "first_name": or_na(&billing.first_name),
        "last_name": or_na(&billing.last_name),
        "email": email,
        "phone_number": or_na(&billing.phone_number),
        "apartment": "NA",
        "floor": "NA",
        "street": "NA",
        "building": "NA",
        "shipping_method": "NA",
        "postal_code": "NA",
        "city": "NA",
        "country": "NA",
        "state": "NA",
    })
}

/// Paymob sends flags as JSON booleans or as `"true"`/`"false"` strings.
pub fn is_true(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(flag)) => flag.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Concatenates the signed fields of a callback in Paymob's order.
///
/// Missing fields are skipped. `order` may be a bare id or an object with an
/// `id`; `source_data.*` may be nested or flattened.
pub fn hmac_message(kind: CallbackKind, params: &Map<String, Value>) -> String {
    let fields: &[&str] = match kind {
        CallbackKind::Transaction => &HMAC_FIELDS,
        CallbackKind::Token => &TOKEN_HMAC_FIELDS,
    };
    let mut message = String::new();
    for &field in fields {
        let value = if let Some(sub) = field.strip_prefix("source_data.") {
            match params.get("source_data") {
                Some(Value::Object(source)) => source.get(sub),
                _ => params.get(field),
            }
        } else if field == "order" {
            match params.get(field) {
                Some(Value::Object(order)) => order.get("id"),
                other => other,
            }
        } else {
            params.get(field)
        };
        if let Some(text) = value.and_then(field_text) {
            message.push_str(&text);
        }
    }
    message
}

/// Hex-encoded HMAC-SHA512 of the callback fields.
pub fn webhook_hmac(
    kind: CallbackKind,
    params: &Map<String, Value>,
    secret: &str,
) -> Option<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(hmac_message(kind, params).as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl PaymentGateway for PaymobClient {
    async fn authenticate(&self) -> Result<String> {
        let api_key = Self::setting(&self.config.api_key, "PAYMOB_API_KEY")?;
        let response: TokenResponse = self
            .post("auth/tokens", json!({ "api_key": api_key }))
            .await?
            .json()
            .await?;
        response
            .token
            .ok_or_else(|| MarketplaceError::GatewayError("No auth token in response.".to_string()))
    }

    async fn register_order(
        &self,
        auth_token: &str,
        amount_cents: i64,
        merchant_order_id: u64,
        currency: &str,
    ) -> Result<String> {
        let body = json!({
            "auth_token": auth_token,
            "delivery_needed": "false",
            "amount_cents": amount_cents.to_string(),
            "currency": currency,
            "merchant_order_id": merchant_order_id.to_string(),
            "items": [],
        });
        let response: OrderResponse = self.post("ecommerce/orders", body).await?.json().await?;
        response
            .id
            .as_ref()
            .and_then(field_text)
            .ok_or_else(|| MarketplaceError::GatewayError("No order id in response.".to_string()))
    }

    async fn payment_key(
        &self,
        auth_token: &str,
        gateway_order_id: &str,
        billing: &BillingData,
        amount_cents: i64,
        currency: &str,
    ) -> Result<String> {
        let integration_id = Self::setting(&self.config.integration_id, "PAYMOB_INTEGRATION_ID")?;
        let body = json!({
            "auth_token": auth_token,
            "amount_cents": amount_cents.to_string(),
            "expiration": PAYMENT_KEY_EXPIRATION_SECS,
            "order_id": gateway_order_id,
            "billing_data": billing_payload(billing),
            "currency": currency,
            "integration_id": integration_id,
            "lock_order_when_paid": "false",
            "tokenization": "true",
        });
        let response: TokenResponse = self
            .post("acceptance/payment_keys", body)
            .await?
            .json()
            .await?;
        response
            .token
            .ok_or_else(|| MarketplaceError::GatewayError("No payment key in response.".to_string()))
    }

    async fn pay_with_token(&self, card_token: &str, payment_key: &str) -> Result<TokenPayment> {
        let body = json!({
            "source": { "identifier": card_token, "subtype": "TOKEN" },
            "payment_token": payment_key,
        });
        let response: PayResponse = self
            .post("acceptance/payments/pay", body)
            .await?
            .json()
            .await?;
        Ok(response.into())
    }

    fn checkout_url(&self, payment_key: &str) -> String {
        format!(
            "{}/acceptance/iframes/{}?payment_token={}",
            self.config.api_base.trim_end_matches('/'),
            self.config.iframe_id.as_deref().unwrap_or_default(),
            payment_key
        )
    }

    fn verify_webhook(&self, kind: CallbackKind, params: &Map<String, Value>) -> bool {
        let Some(secret) = self.config.hmac_secret.as_deref().filter(|s| !s.is_empty()) else {
            tracing::warn!("PAYMOB_HMAC_SECRET is not set; rejecting webhook");
            return false;
        };
        let Some(Value::String(received)) = params.get("hmac") else {
            return false;
        };
        let Ok(received) = hex::decode(received) else {
            return false;
        };
        let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(hmac_message(kind, params).as_bytes());
        mac.verify_slice(&received).is_ok()
    }
}
