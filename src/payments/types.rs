//! Payment gateway types shared across all provider implementations.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Closed set of supported payment gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayId {
    Stripe,
    Paypal,
}

impl GatewayId {
    pub const ALL: [GatewayId; 2] = [GatewayId::Stripe, GatewayId::Paypal];

    /// Stable identifier used in routes and persisted records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Paypal => "paypal",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Stripe => "Stripe",
            Self::Paypal => "PayPal",
        }
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(Self::Stripe),
            "paypal" => Ok(Self::Paypal),
            _ => Err(()),
        }
    }
}

/// Provider-agnostic view of a payment's state, as reported by a gateway
/// either through a webhook or a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
    Disputed,
    Expired,
}

/// Request to create a charge or hosted payment link at a provider.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub invoice_id: Uuid,
    /// Amount in major units; adapters convert to minor units as needed.
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl PaymentRequest {
    pub fn new(invoice_id: Uuid, amount: Decimal, currency: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("invoice_id".to_string(), invoice_id.to_string());
        Self {
            invoice_id,
            amount,
            currency: currency.to_uppercase(),
            description: None,
            metadata,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }
}

/// Result of a successful payment request creation.
#[derive(Debug, Clone)]
pub struct PaymentResponse {
    /// The gateway's reference for the charge. Stored on the invoice and
    /// used as the reconciliation key.
    pub external_payment_id: String,
    /// Hosted-checkout URL shown to the payer, when the provider has one.
    pub payment_url: Option<String>,
}

/// Normalized webhook event produced by an adapter from a raw provider
/// payload. Ephemeral: consumed synchronously, never persisted or queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub gateway: GatewayId,
    pub external_payment_id: String,
    pub status: CanonicalStatus,
}
