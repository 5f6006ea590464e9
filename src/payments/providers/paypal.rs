//! PayPal gateway adapter.
//!
//! Uses the REST payments API with an OAuth2 client-credentials token that
//! is cached until shortly before expiry. Webhook authenticity is checked
//! with PayPal's verify-webhook-signature endpoint: every transmission
//! header must be present and the provider must answer `SUCCESS`, otherwise
//! the webhook is rejected.

use async_trait::async_trait;
use http::HeaderMap;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::payments::traits::PaymentGateway;
use crate::payments::types::{
    CanonicalStatus, GatewayId, PaymentRequest, PaymentResponse, WebhookEvent,
};

const TRANSMISSION_HEADERS: [&str; 5] = [
    "paypal-transmission-id",
    "paypal-transmission-time",
    "paypal-transmission-sig",
    "paypal-cert-url",
    "paypal-auth-algo",
];

#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Webhook id assigned by PayPal when the endpoint was registered;
    /// required for signature verification.
    pub webhook_id: String,
    /// "sandbox" or "live"; selects the API host.
    pub mode: String,
    pub return_url: String,
    pub cancel_url: String,
    pub timeout_secs: u64,
}

impl Default for PaypalConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            webhook_id: String::new(),
            mode: "sandbox".to_string(),
            return_url: "https://example.com/success".to_string(),
            cancel_url: "https://example.com/cancel".to_string(),
            timeout_secs: 30,
        }
    }
}

impl PaypalConfig {
    pub fn base_url(&self) -> &'static str {
        if self.mode == "live" {
            "https://api.paypal.com"
        } else {
            "https://api.sandbox.paypal.com"
        }
    }
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct PaypalGateway {
    config: PaypalConfig,
    client: Client,
    token: RwLock<Option<CachedToken>>,
}

impl PaypalGateway {
    pub fn new(config: PaypalConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to create HTTP client");
        Self {
            config,
            client,
            token: RwLock::new(None),
        }
    }

    async fn access_token(&self) -> AppResult<String> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.token.clone());
            }
        }

        let url = format!("{}/v1/oauth2/token", self.config.base_url());
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| AppError::gateway(GatewayId::Paypal, e.to_string(), true))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::gateway(
                GatewayId::Paypal,
                format!("token request failed: HTTP {status}"),
                status.is_server_error(),
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::gateway(GatewayId::Paypal, e.to_string(), false))?;

        // Refresh a minute early so in-flight calls never race expiry.
        let expires_at =
            Instant::now() + Duration::from_secs(token.expires_in.saturating_sub(60));
        *self.token.write().await = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at,
        });

        Ok(token.access_token)
    }

    async fn request<T>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<&serde_json::Value>,
    ) -> AppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.config.base_url(), endpoint);

        let mut request = self.client.request(method, &url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::gateway(GatewayId::Paypal, e.to_string(), true))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let message = serde_json::from_str::<PaypalErrorBody>(&text)
                .map(|e| e.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            return Err(AppError::gateway(
                GatewayId::Paypal,
                message,
                status.as_u16() == 429 || status.is_server_error(),
            ));
        }

        serde_json::from_str(&text).map_err(|e| {
            AppError::gateway(
                GatewayId::Paypal,
                format!("invalid response format: {e}"),
                false,
            )
        })
    }

    fn format_total(amount: Decimal) -> String {
        format!("{:.2}", amount.round_dp(2))
    }
}

#[async_trait]
impl PaymentGateway for PaypalGateway {
    fn id(&self) -> GatewayId {
        GatewayId::Paypal
    }

    async fn create_payment_request(
        &self,
        request: &PaymentRequest,
    ) -> AppResult<PaymentResponse> {
        info!(
            invoice_id = %request.invoice_id,
            "creating paypal payment: {} {}",
            request.amount,
            request.currency
        );

        let body = serde_json::json!({
            "intent": "sale",
            "payer": { "payment_method": "paypal" },
            "transactions": [{
                "amount": {
                    "total": Self::format_total(request.amount),
                    "currency": request.currency,
                },
                "description": request.description.clone().unwrap_or_else(|| "Invoice payment".to_string()),
                "custom": request.invoice_id.to_string(),
            }],
            "redirect_urls": {
                "return_url": self.config.return_url,
                "cancel_url": self.config.cancel_url,
            },
        });

        let payment: PaypalPayment = self
            .request(reqwest::Method::POST, "/v1/payments/payment", Some(&body))
            .await?;

        let approval_url = payment
            .links
            .iter()
            .find(|link| link.rel == "approval_url")
            .map(|link| link.href.clone());

        info!(payment_id = %payment.id, "paypal payment created");

        Ok(PaymentResponse {
            external_payment_id: payment.id,
            payment_url: approval_url,
        })
    }

    async fn refund(&self, external_payment_id: &str, amount: Decimal) -> AppResult<String> {
        info!("processing paypal refund for payment {external_payment_id}, amount {amount}");

        // The refund is issued against the sale transaction inside the
        // payment, so look that up first.
        let payment: PaypalPayment = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/payments/payment/{external_payment_id}"),
                None,
            )
            .await?;

        let sale = payment
            .transactions
            .iter()
            .flat_map(|t| t.related_resources.iter())
            .find_map(|r| r.sale.as_ref());

        let Some(sale) = sale else {
            return Err(AppError::gateway(
                GatewayId::Paypal,
                format!("no sale transaction found for payment {external_payment_id}"),
                false,
            ));
        };

        let currency = payment
            .transactions
            .first()
            .map(|t| t.amount.currency.clone())
            .unwrap_or_else(|| "USD".to_string());

        let body = serde_json::json!({
            "amount": {
                "total": Self::format_total(amount),
                "currency": currency,
            },
        });
        let refund: PaypalRefund = self
            .request(
                reqwest::Method::POST,
                &format!("/v1/payments/sale/{}/refund", sale.id),
                Some(&body),
            )
            .await?;

        info!(refund_id = %refund.id, "paypal refund processed");
        Ok(refund.id)
    }

    async fn query_status(&self, external_payment_id: &str) -> AppResult<CanonicalStatus> {
        let payment: PaypalPayment = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/payments/payment/{external_payment_id}"),
                None,
            )
            .await?;

        let status = match payment.state.as_deref() {
            Some("approved") => CanonicalStatus::Succeeded,
            Some("failed") => CanonicalStatus::Failed,
            Some("canceled") => CanonicalStatus::Failed,
            Some("expired") => CanonicalStatus::Expired,
            _ => CanonicalStatus::Pending,
        };
        Ok(status)
    }

    async fn authenticate(&self, headers: &HeaderMap, raw_body: &[u8]) -> bool {
        let mut values = Vec::with_capacity(TRANSMISSION_HEADERS.len());
        for name in TRANSMISSION_HEADERS {
            match headers.get(name).and_then(|v| v.to_str().ok()) {
                Some(value) => values.push(value),
                None => {
                    debug!("missing paypal webhook header {name}");
                    return false;
                }
            }
        }

        let event: serde_json::Value = match serde_json::from_slice(raw_body) {
            Ok(event) => event,
            Err(_) => return false,
        };

        let body = serde_json::json!({
            "transmission_id": values[0],
            "transmission_time": values[1],
            "transmission_sig": values[2],
            "cert_url": values[3],
            "auth_algo": values[4],
            "webhook_id": self.config.webhook_id,
            "webhook_event": event,
        });

        match self
            .request::<VerificationResponse>(
                reqwest::Method::POST,
                "/v1/notifications/verify-webhook-signature",
                Some(&body),
            )
            .await
        {
            Ok(result) => result.verification_status == "SUCCESS",
            Err(e) => {
                warn!("paypal webhook verification call failed: {e}");
                false
            }
        }
    }

    fn interpret(&self, raw_body: &[u8]) -> Option<WebhookEvent> {
        let event: PaypalEvent = match serde_json::from_slice(raw_body) {
            Ok(event) => event,
            Err(e) => {
                warn!("unparseable paypal webhook payload: {e}");
                return None;
            }
        };

        let resource = event.resource?;
        // Sale events carry the originating payment in parent_payment.
        let by_parent = |r: &PaypalResource| r.parent_payment.clone().or_else(|| r.id.clone());
        let (status, reference) = match event.event_type.as_str() {
            "PAYMENT.SALE.COMPLETED" => (CanonicalStatus::Succeeded, by_parent(&resource)),
            "CHECKOUT.ORDER.APPROVED" => (CanonicalStatus::Succeeded, resource.id.clone()),
            "PAYMENT.SALE.REFUNDED" => (CanonicalStatus::Refunded, by_parent(&resource)),
            "PAYMENT.SALE.DENIED" => (CanonicalStatus::Failed, by_parent(&resource)),
            other => {
                debug!("ignoring paypal event type {other}");
                return None;
            }
        };

        Some(WebhookEvent {
            gateway: GatewayId::Paypal,
            external_payment_id: reference?,
            status,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct PaypalPayment {
    id: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    links: Vec<PaypalLink>,
    #[serde(default)]
    transactions: Vec<PaypalTransaction>,
}

#[derive(Debug, Deserialize)]
struct PaypalLink {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct PaypalTransaction {
    amount: PaypalAmount,
    #[serde(default)]
    related_resources: Vec<PaypalRelatedResource>,
}

#[derive(Debug, Deserialize)]
struct PaypalAmount {
    currency: String,
}

#[derive(Debug, Deserialize)]
struct PaypalRelatedResource {
    #[serde(default)]
    sale: Option<PaypalSale>,
}

#[derive(Debug, Deserialize)]
struct PaypalSale {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PaypalRefund {
    id: String,
}

#[derive(Debug, Deserialize)]
struct VerificationResponse {
    verification_status: String,
}

#[derive(Debug, Deserialize)]
struct PaypalErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PaypalEvent {
    event_type: String,
    #[serde(default)]
    resource: Option<PaypalResource>,
}

#[derive(Debug, Deserialize)]
struct PaypalResource {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    parent_payment: Option<String>,
}
