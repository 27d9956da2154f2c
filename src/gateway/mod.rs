use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::GatewayConfig;
use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Payment intent created at the gateway. `id` goes into
/// `payment.gateway_order_id` and is echoed back by the client SDK.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub status: String,
}

/// Seam to the external payment provider. The HTTP implementation talks to
/// a Razorpay-style REST API; tests substitute a scripted double.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent for the given amount.
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, ServiceError>;

    /// Issue a refund against a captured payment.
    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        amount: Decimal,
        reason: Option<&str>,
    ) -> Result<GatewayRefund, ServiceError>;
}

/// Convert a major-unit decimal amount to the gateway's integer minor units.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("amount out of range: {amount}")))
}

/// Hex HMAC-SHA256 over `"{gateway_order_id}|{gateway_payment_id}"`, the
/// client-side checkout signature scheme.
pub fn payment_signature(secret: &str, gateway_order_id: &str, gateway_payment_id: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{gateway_order_id}|{gateway_payment_id}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a checkout signature.
pub fn verify_payment_signature(
    secret: &str,
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
) -> bool {
    let Ok(sig_bytes) = hex::decode(signature) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{gateway_order_id}|{gateway_payment_id}").as_bytes());
    mac.verify_slice(&sig_bytes).is_ok()
}

/// Constant-time verification of a webhook signature over the raw body.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(sig_bytes) = hex::decode(signature) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.verify_slice(&sig_bytes).is_ok()
}

#[derive(Serialize)]
struct CreateOrderRequest<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Serialize)]
struct CreateRefundRequest<'a> {
    amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<RefundNotes<'a>>,
}

#[derive(Serialize)]
struct RefundNotes<'a> {
    reason: &'a str,
}

/// REST client for the payment provider. All calls carry the key-pair as
/// basic auth and are bounded by the configured timeout.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client init failed: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
        })
    }

    async fn handle<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::UpstreamError(format!(
                "gateway returned {status}: {body}"
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::UpstreamError(format!("malformed gateway response: {e}")))
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    #[instrument(skip(self), fields(currency))]
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        let request = CreateOrderRequest {
            amount: to_minor_units(amount)?,
            currency,
            receipt,
        };
        debug!(receipt, "creating gateway order");
        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::UpstreamError(format!("gateway unreachable: {e}")))?;
        Self::handle(response).await
    }

    #[instrument(skip(self, reason))]
    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        amount: Decimal,
        reason: Option<&str>,
    ) -> Result<GatewayRefund, ServiceError> {
        let request = CreateRefundRequest {
            amount: to_minor_units(amount)?,
            notes: reason.map(|reason| RefundNotes { reason }),
        };
        let response = self
            .client
            .post(format!(
                "{}/payments/{}/refund",
                self.base_url, gateway_payment_id
            ))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::UpstreamError(format!("gateway unreachable: {e}")))?;
        Self::handle(response).await
    }
}
