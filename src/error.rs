//! Application error taxonomy.
//!
//! Creation and refund errors surface synchronously to the operator. Webhook
//! path conditions the provider cannot fix by retrying (unknown reference,
//! inconsistent transition) are reconcile outcomes, not errors, and never
//! reach this type.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::invoices::InvoiceStatus;
use crate::payments::types::GatewayId;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invoice not found: {0}")]
    InvoiceNotFound(Uuid),

    #[error("payment gateway not available: {0}")]
    GatewayUnavailable(GatewayId),

    #[error("payment already initiated for invoice {0}")]
    AlreadyInitiated(Uuid),

    #[error("invalid amount {amount}: {message}")]
    InvalidAmount { amount: Decimal, message: String },

    #[error("invoice {id} is not refundable in status {status}")]
    NotRefundable { id: Uuid, status: InvoiceStatus },

    #[error("invoice {id}: illegal transition {from} -> {to}")]
    IllegalTransition {
        id: Uuid,
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    #[error("webhook authentication failed for {0}")]
    AuthenticationFailed(GatewayId),

    #[error("{provider} error: {message}")]
    Gateway {
        provider: GatewayId,
        message: String,
        retryable: bool,
    },

    #[error("notification delivery failed: {message}")]
    Notification { message: String },

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl AppError {
    pub fn gateway(provider: GatewayId, message: impl Into<String>, retryable: bool) -> Self {
        Self::Gateway {
            provider,
            message: message.into(),
            retryable,
        }
    }

    /// Whether the caller may retry the operation as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway { retryable, .. } => *retryable,
            Self::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }
}
