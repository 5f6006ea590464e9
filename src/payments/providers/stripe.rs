//! Stripe gateway adapter.
//!
//! Hosted payment links are created as Checkout Sessions; the session id is
//! the external payment reference. Webhooks are authenticated with the
//! `Stripe-Signature` scheme: `t=<unix-seconds>,v1=<hex-hmac>` where the
//! signature is HMAC-SHA256 over `"<t>.<raw body>"`.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::payments::traits::PaymentGateway;
use crate::payments::types::{
    CanonicalStatus, GatewayId, PaymentRequest, PaymentResponse, WebhookEvent,
};

type HmacSha256 = Hmac<sha2::Sha256>;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// API secret key (`sk_...`).
    pub secret_key: String,
    /// Webhook endpoint secret (`whsec_...`).
    pub webhook_secret: String,
    pub base_url: String,
    /// Where Stripe redirects the payer after checkout.
    pub success_url: String,
    pub cancel_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: String::new(),
            base_url: "https://api.stripe.com".to_string(),
            success_url: "https://example.com/success".to_string(),
            cancel_url: "https://example.com/cancel".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

pub struct StripeGateway {
    config: StripeConfig,
    client: Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to create HTTP client");
        Self { config, client }
    }

    /// Authenticated form-encoded request with bounded retry on rate limits
    /// and server errors.
    async fn request<T>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        form: Option<&[(String, String)]>,
    ) -> AppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.config.base_url, endpoint);

        for attempt in 0..=self.config.max_retries {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&self.config.secret_key);
            if let Some(form) = form {
                request = request.form(form);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    if attempt < self.config.max_retries {
                        let backoff = 2_u64.pow(attempt);
                        warn!("stripe request error, retrying in {backoff}s: {e}");
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        continue;
                    }
                    return Err(AppError::gateway(GatewayId::Stripe, e.to_string(), true));
                }
            };

            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.is_success() {
                return serde_json::from_str(&body).map_err(|e| {
                    AppError::gateway(
                        GatewayId::Stripe,
                        format!("invalid response format: {e}"),
                        false,
                    )
                });
            }

            let transient = status.as_u16() == 429 || status.is_server_error();
            if transient && attempt < self.config.max_retries {
                let backoff = 2_u64.pow(attempt);
                warn!("stripe returned {status}, retrying in {backoff}s");
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                continue;
            }

            let message = serde_json::from_str::<StripeErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            return Err(AppError::gateway(GatewayId::Stripe, message, transient));
        }

        Err(AppError::gateway(
            GatewayId::Stripe,
            format!("request failed after {} retries", self.config.max_retries),
            true,
        ))
    }

    fn verify_signature(&self, header: &str, raw_body: &[u8]) -> bool {
        let Some((timestamp, provided)) = parse_signature_header(header) else {
            return false;
        };

        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(raw_body);
        let computed = hex::encode(mac.finalize().into_bytes());

        constant_time_eq(computed.as_bytes(), provided.as_bytes())
    }
}

/// Split `t=...,v1=...`; both fields required.
fn parse_signature_header(header: &str) -> Option<(&str, &str)> {
    let mut timestamp = None;
    let mut v1 = None;
    for element in header.split(',') {
        match element.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => v1 = Some(value),
            _ => {}
        }
    }
    Some((timestamp?, v1?))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Convert a major-unit amount to Stripe's integer minor units.
fn minor_units(amount: Decimal) -> AppResult<i64> {
    let scaled = amount * Decimal::ONE_HUNDRED;
    if scaled.normalize().scale() > 0 {
        return Err(AppError::gateway(
            GatewayId::Stripe,
            format!("amount {amount} has sub-minor-unit precision"),
            false,
        ));
    }
    scaled.to_i64().ok_or_else(|| {
        AppError::gateway(GatewayId::Stripe, format!("amount {amount} out of range"), false)
    })
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn id(&self) -> GatewayId {
        GatewayId::Stripe
    }

    async fn create_payment_request(
        &self,
        request: &PaymentRequest,
    ) -> AppResult<PaymentResponse> {
        info!(
            invoice_id = %request.invoice_id,
            "creating stripe checkout session: {} {}",
            request.amount,
            request.currency
        );

        let product_name = request
            .description
            .clone()
            .unwrap_or_else(|| format!("Invoice {}", request.invoice_id));

        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), self.config.success_url.clone()),
            ("cancel_url".into(), self.config.cancel_url.clone()),
            ("client_reference_id".into(), request.invoice_id.to_string()),
            ("line_items[0][quantity]".into(), "1".into()),
            (
                "line_items[0][price_data][currency]".into(),
                request.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                minor_units(request.amount)?.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                product_name,
            ),
        ];
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }

        let session: CheckoutSession = self
            .request(reqwest::Method::POST, "/v1/checkout/sessions", Some(&form))
            .await?;

        info!(session_id = %session.id, "stripe checkout session created");

        Ok(PaymentResponse {
            external_payment_id: session.id,
            payment_url: session.url,
        })
    }

    async fn refund(&self, external_payment_id: &str, amount: Decimal) -> AppResult<String> {
        info!("processing stripe refund for session {external_payment_id}, amount {amount}");

        // The refund targets the session's payment intent.
        let session: CheckoutSession = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/checkout/sessions/{external_payment_id}"),
                None,
            )
            .await?;

        let payment_intent = session.payment_intent.ok_or_else(|| {
            AppError::gateway(
                GatewayId::Stripe,
                format!("session {external_payment_id} has no payment intent to refund"),
                false,
            )
        })?;

        let form = vec![
            ("payment_intent".to_string(), payment_intent),
            ("amount".to_string(), minor_units(amount)?.to_string()),
        ];
        let refund: RefundObject = self
            .request(reqwest::Method::POST, "/v1/refunds", Some(&form))
            .await?;

        info!(refund_id = %refund.id, "stripe refund processed");
        Ok(refund.id)
    }

    async fn query_status(&self, external_payment_id: &str) -> AppResult<CanonicalStatus> {
        let session: CheckoutSession = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/checkout/sessions/{external_payment_id}"),
                None,
            )
            .await?;

        let status = match (
            session.payment_status.as_deref(),
            session.status.as_deref(),
        ) {
            (Some("paid"), _) => CanonicalStatus::Succeeded,
            (_, Some("expired")) => CanonicalStatus::Expired,
            _ => CanonicalStatus::Pending,
        };
        Ok(status)
    }

    async fn authenticate(&self, headers: &HeaderMap, raw_body: &[u8]) -> bool {
        let Some(header) = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
        else {
            warn!("missing stripe signature header");
            return false;
        };
        self.verify_signature(header, raw_body)
    }

    fn interpret(&self, raw_body: &[u8]) -> Option<WebhookEvent> {
        let event: StripeEvent = match serde_json::from_slice(raw_body) {
            Ok(event) => event,
            Err(e) => {
                warn!("unparseable stripe webhook payload: {e}");
                return None;
            }
        };

        let object = &event.data.object;
        // Session-family events key by the session id; charge/intent events
        // key by the payment intent. An unmatched key resolves to an
        // unknown-reference outcome downstream, never a wrong invoice.
        let (status, reference) = match event.event_type.as_str() {
            "checkout.session.completed" => (CanonicalStatus::Succeeded, object.id.clone()),
            "checkout.session.expired" => (CanonicalStatus::Expired, object.id.clone()),
            "checkout.session.async_payment_failed" => {
                (CanonicalStatus::Failed, object.id.clone())
            }
            "payment_intent.succeeded" => (CanonicalStatus::Succeeded, object.id.clone()),
            "payment_intent.payment_failed" => (CanonicalStatus::Failed, object.id.clone()),
            "charge.refunded" => (
                CanonicalStatus::Refunded,
                object.payment_intent.clone().unwrap_or_else(|| object.id.clone()),
            ),
            "charge.dispute.created" => (
                CanonicalStatus::Disputed,
                object.payment_intent.clone().unwrap_or_else(|| object.id.clone()),
            ),
            other => {
                tracing::debug!("ignoring stripe event type {other}");
                return None;
            }
        };

        Some(WebhookEvent {
            gateway: GatewayId::Stripe,
            external_payment_id: reference,
            status,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: StripeEventObject,
}

#[derive(Debug, Deserialize)]
struct StripeEventObject {
    id: String,
    #[serde(default)]
    payment_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> StripeGateway {
        StripeGateway::new(StripeConfig {
            secret_key: "sk_test_key".to_string(),
            webhook_secret: "whsec_test_secret".to_string(),
            ..Default::default()
        })
    }

    fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[tokio::test]
    async fn authenticate_accepts_valid_signature() {
        let gw = gateway();
        let body = br#"{"type":"checkout.session.completed"}"#;
        let sig = sign("whsec_test_secret", "1700000000", body);

        let mut headers = HeaderMap::new();
        headers.insert(
            "stripe-signature",
            format!("t=1700000000,v1={sig}").parse().unwrap(),
        );
        assert!(gw.authenticate(&headers, body).await);
    }

    #[tokio::test]
    async fn authenticate_rejects_tampered_body() {
        let gw = gateway();
        let sig = sign("whsec_test_secret", "1700000000", b"original body");

        let mut headers = HeaderMap::new();
        headers.insert(
            "stripe-signature",
            format!("t=1700000000,v1={sig}").parse().unwrap(),
        );
        assert!(!gw.authenticate(&headers, b"tampered body").await);
    }

    #[tokio::test]
    async fn authenticate_rejects_missing_or_malformed_header() {
        let gw = gateway();
        let body = b"{}";

        assert!(!gw.authenticate(&HeaderMap::new(), body).await);

        let mut headers = HeaderMap::new();
        headers.insert("stripe-signature", "v1=deadbeef".parse().unwrap());
        assert!(!gw.authenticate(&headers, body).await);

        let mut headers = HeaderMap::new();
        headers.insert("stripe-signature", "t=1700000000".parse().unwrap());
        assert!(!gw.authenticate(&headers, body).await);
    }

    #[test]
    fn interpret_maps_session_completed_to_succeeded() {
        let gw = gateway();
        let body = br#"{"type":"checkout.session.completed","data":{"object":{"id":"cs_123"}}}"#;
        let event = gw.interpret(body).unwrap();
        assert_eq!(event.status, CanonicalStatus::Succeeded);
        assert_eq!(event.external_payment_id, "cs_123");
        assert_eq!(event.gateway, GatewayId::Stripe);
    }

    #[test]
    fn interpret_keys_refunds_by_payment_intent() {
        let gw = gateway();
        let body = br#"{"type":"charge.refunded","data":{"object":{"id":"ch_1","payment_intent":"pi_9"}}}"#;
        let event = gw.interpret(body).unwrap();
        assert_eq!(event.status, CanonicalStatus::Refunded);
        assert_eq!(event.external_payment_id, "pi_9");
    }

    #[test]
    fn interpret_ignores_unrelated_event_types() {
        let gw = gateway();
        let body = br#"{"type":"customer.created","data":{"object":{"id":"cus_1"}}}"#;
        assert!(gw.interpret(body).is_none());
    }

    #[test]
    fn interpret_fails_closed_on_garbage() {
        let gw = gateway();
        assert!(gw.interpret(b"not json at all").is_none());
        assert!(gw.interpret(br#"{"unexpected":"shape"}"#).is_none());
    }

    #[test]
    fn minor_units_converts_exact_cent_amounts() {
        assert_eq!(minor_units("25.00".parse().unwrap()).unwrap(), 2500);
        assert_eq!(minor_units("0.01".parse().unwrap()).unwrap(), 1);
        assert!(minor_units("1.005".parse().unwrap()).is_err());
    }

    #[test]
    fn signature_header_parsing() {
        assert_eq!(
            parse_signature_header("t=123,v1=abc"),
            Some(("123", "abc"))
        );
        assert_eq!(
            parse_signature_header("v1=abc, t=123"),
            Some(("123", "abc"))
        );
        assert_eq!(parse_signature_header("t=123"), None);
        assert_eq!(parse_signature_header(""), None);
    }
}
