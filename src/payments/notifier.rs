//! User-facing notification boundary.
//!
//! The chat platform (bot process, DMs, channel embeds) sits behind this
//! trait. Notifications are fire-and-forget from the orchestrator's point
//! of view: failures are logged by the caller and never affect the
//! reconciliation result.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::invoices::{Invoice, InvoiceStatus};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, invoice: &Invoice, new_status: InvoiceStatus) -> AppResult<()>;
}

/// Logs status changes; the default when no callback URL is configured.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, invoice: &Invoice, new_status: InvoiceStatus) -> AppResult<()> {
        info!(
            invoice_id = %invoice.id,
            payer_ref = %invoice.payer_ref,
            status = %new_status,
            "invoice status changed"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StatusChangePayload<'a> {
    invoice_id: uuid::Uuid,
    payer_ref: &'a str,
    status: InvoiceStatus,
    amount: String,
    currency: &'a str,
    payment_url: Option<&'a str>,
}

/// Posts status changes as JSON to a configured callback URL, where the
/// chat bot picks them up and renders messages/DMs.
pub struct HttpNotifier {
    client: Client,
    callback_url: String,
}

impl HttpNotifier {
    pub fn new(callback_url: String, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to create HTTP client");
        Self {
            client,
            callback_url,
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, invoice: &Invoice, new_status: InvoiceStatus) -> AppResult<()> {
        let payload = StatusChangePayload {
            invoice_id: invoice.id,
            payer_ref: &invoice.payer_ref,
            status: new_status,
            amount: invoice.amount.to_string(),
            currency: &invoice.currency,
            payment_url: invoice.payment_url.as_deref(),
        };

        let response = self
            .client
            .post(&self.callback_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Notification {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(AppError::Notification {
                message: format!("callback returned HTTP {}", response.status()),
            });
        }
        Ok(())
    }
}
