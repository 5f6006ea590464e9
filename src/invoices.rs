//! Invoice model and status state machine.
//!
//! The invoice record is the single durable truth about a payment. Only the
//! orchestrator mutates `status`, and every mutation goes through
//! [`InvoiceStatus::can_transition_to`] so terminal states stay terminal.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::payments::types::GatewayId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    Processing,
    Paid,
    Failed,
    Cancelled,
    Refunded,
    Expired,
}

impl InvoiceStatus {
    /// Terminal states admit no further automatic transition, with the
    /// single exception Paid -> Refunded.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Paid | Self::Failed | Self::Cancelled | Self::Refunded | Self::Expired
        )
    }

    /// Legality of a status change under the reconciliation rules.
    ///
    /// Operator-only transitions (cancel, recreate) are also expressed here
    /// so webhook and operator paths share one table.
    pub fn can_transition_to(self, target: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        match (self, target) {
            (Pending, Processing) => true,
            (Pending | Processing, Paid | Failed | Expired) => true,
            // dispute/charge-back or operator cancel
            (Pending | Processing, Cancelled) => true,
            // the one way out of a terminal state
            (Paid, Refunded) => true,
            // operator recreate
            (Failed | Cancelled, Pending) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "PAID" => Some(Self::Paid),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            "REFUNDED" => Some(Self::Refunded),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request for payment of a fixed amount from a specific payer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    /// Opaque external identity of the payer (chat-platform user id).
    pub payer_ref: String,
    pub description: Option<String>,
    /// Amount in major units, fixed-point.
    pub amount: Decimal,
    /// ISO 4217-like currency code, upper case.
    pub currency: String,
    pub status: InvoiceStatus,
    pub selected_gateway: Option<GatewayId>,
    /// The gateway's reference for the active charge. Reconciliation key;
    /// present iff a payment request has been created for the selection.
    pub external_payment_id: Option<String>,
    pub payment_url: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn new(
        payer_ref: impl Into<String>,
        description: Option<String>,
        amount: Decimal,
        currency: impl Into<String>,
        due_date: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payer_ref: payer_ref.into(),
            description,
            amount,
            currency: currency.into().to_uppercase(),
            status: InvoiceStatus::Pending,
            selected_gateway: None,
            external_payment_id: None,
            payment_url: None,
            due_date,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: InvoiceStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Attach the gateway selection and the payment request it produced.
    pub fn attach_payment(
        &mut self,
        gateway: GatewayId,
        external_payment_id: String,
        payment_url: Option<String>,
    ) {
        self.selected_gateway = Some(gateway);
        self.external_payment_id = Some(external_payment_id);
        self.payment_url = payment_url;
        self.set_status(InvoiceStatus::Processing);
    }

    /// Reset for recreation after cancellation/failure: gateway, url and
    /// external reference are cleared together.
    pub fn clear_payment(&mut self) {
        self.selected_gateway = None;
        self.external_payment_id = None;
        self.payment_url = None;
        self.set_status(InvoiceStatus::Pending);
    }

    pub fn is_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid
    }

    pub fn formatted_amount(&self) -> String {
        format!("{:.2} {}", self.amount, self.currency)
    }
}
