//! Gateway adapter trait.
//!
//! One implementation per enumerated gateway, resolved through the
//! [`registry`](crate::payments::registry). Adapters wrap the provider's
//! remote API and its webhook payload format; they never touch the invoice
//! store; the orchestrator owns all state.

use async_trait::async_trait;
use http::HeaderMap;
use rust_decimal::Decimal;

use crate::error::AppResult;
use crate::payments::types::{
    CanonicalStatus, GatewayId, PaymentRequest, PaymentResponse, WebhookEvent,
};

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn id(&self) -> GatewayId;

    /// Initiate a charge or hosted payment link at the provider.
    ///
    /// Safe to call at most once per invoice+gateway selection; the
    /// orchestrator enforces this by gating on the invoice having no
    /// external payment reference yet.
    async fn create_payment_request(&self, request: &PaymentRequest)
        -> AppResult<PaymentResponse>;

    /// Issue a partial or full refund for a completed payment. Returns the
    /// provider's refund reference. The orchestrator verifies the payment
    /// is refundable before calling; the adapter does not re-check.
    async fn refund(&self, external_payment_id: &str, amount: Decimal) -> AppResult<String>;

    /// Poll the provider for the payment's current state. Used by manual
    /// refresh requests.
    async fn query_status(&self, external_payment_id: &str) -> AppResult<CanonicalStatus>;

    /// Verify a webhook's origin using the provider's signature scheme.
    ///
    /// Returns false, never errors, on any missing or malformed credential.
    async fn authenticate(&self, headers: &HeaderMap, raw_body: &[u8]) -> bool;

    /// Parse an authenticated payload into a normalized event.
    ///
    /// Fails closed: `None` for event types the core does not act on and
    /// for anything unparseable, which the ingress acknowledges with 200.
    fn interpret(&self, raw_body: &[u8]) -> Option<WebhookEvent>;
}
