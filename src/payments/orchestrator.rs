//! Payment orchestrator: the invoice state-machine driver.
//!
//! All durable payment state lives in the invoice record; the orchestrator
//! is the only writer of `status`. Mutations of a given invoice serialize
//! on a per-invoice async lock, while outbound gateway calls run with the
//! lock released and the guard re-validated before commit, so a slow
//! provider never stalls unrelated invoices.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::invoice_store::InvoiceStore;
use crate::error::{AppError, AppResult};
use crate::invoices::{Invoice, InvoiceStatus};
use crate::payments::notifier::Notifier;
use crate::payments::registry::GatewayRegistry;
use crate::payments::types::{CanonicalStatus, GatewayId, PaymentRequest, WebhookEvent};

/// Result of feeding one webhook event through reconciliation. Only
/// `Applied` mutates the invoice; the other outcomes are logged no-ops the
/// ingress acknowledges with 200 so providers do not retry them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },
    /// Target state equals the current state: duplicate delivery.
    Duplicate,
    /// No invoice carries the referenced external payment id.
    UnknownReference,
    /// The event would move the invoice backward out of a terminal state.
    Inconsistent {
        current: InvoiceStatus,
        attempted: InvoiceStatus,
    },
}

/// Per-invoice lock map. Entries are created on first touch and retained;
/// the map is bounded by the number of distinct invoices a process sees.
#[derive(Default)]
struct InvoiceLocks {
    inner: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl InvoiceLocks {
    async fn lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let handle = {
            let mut map = self.inner.lock().expect("lock map poisoned");
            map.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        handle.lock_owned().await
    }
}

pub struct PaymentOrchestrator {
    store: Arc<dyn InvoiceStore>,
    registry: Arc<GatewayRegistry>,
    notifier: Arc<dyn Notifier>,
    locks: InvoiceLocks,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        registry: Arc<GatewayRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            locks: InvoiceLocks::default(),
        }
    }

    pub fn registry(&self) -> &GatewayRegistry {
        &self.registry
    }

    pub async fn create_invoice(
        &self,
        payer_ref: String,
        description: Option<String>,
        amount: Decimal,
        currency: String,
        due_date: Option<DateTime<Utc>>,
    ) -> AppResult<Invoice> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidAmount {
                amount,
                message: "amount must be greater than zero".to_string(),
            });
        }
        let invoice = Invoice::new(payer_ref, description, amount, currency, due_date);
        self.store.create(&invoice).await?;
        info!(invoice_id = %invoice.id, amount = %invoice.formatted_amount(), "invoice created");
        Ok(invoice)
    }

    pub async fn get_invoice(&self, id: Uuid) -> AppResult<Invoice> {
        self.store
            .get(id)
            .await?
            .ok_or(AppError::InvoiceNotFound(id))
    }

    pub async fn delete_invoice(&self, id: Uuid) -> AppResult<()> {
        let _guard = self.locks.lock(id).await;
        if !self.store.delete(id).await? {
            return Err(AppError::InvoiceNotFound(id));
        }
        info!(invoice_id = %id, "invoice deleted");
        Ok(())
    }

    /// Create a charge/hosted link at the selected gateway and persist the
    /// reference on the invoice, transitioning PENDING -> PROCESSING.
    ///
    /// The guard (`external_payment_id == None`, status PENDING) is checked
    /// under the invoice lock, the lock is released for the provider call,
    /// and the guard re-validated before commit. A failed provider call
    /// leaves the invoice exactly as it was.
    pub async fn create_payment_link(
        &self,
        invoice_id: Uuid,
        gateway: GatewayId,
    ) -> AppResult<Invoice> {
        let adapter = self
            .registry
            .resolve(gateway)
            .ok_or(AppError::GatewayUnavailable(gateway))?;

        let request = {
            let _guard = self.locks.lock(invoice_id).await;
            let invoice = self.get_invoice(invoice_id).await?;
            if invoice.external_payment_id.is_some() {
                return Err(AppError::AlreadyInitiated(invoice_id));
            }
            if invoice.status != InvoiceStatus::Pending {
                return Err(AppError::IllegalTransition {
                    id: invoice_id,
                    from: invoice.status,
                    to: InvoiceStatus::Processing,
                });
            }

            let mut request =
                PaymentRequest::new(invoice.id, invoice.amount, &invoice.currency)
                    .with_description(invoice.description.clone());
            request
                .metadata
                .insert("payer_ref".to_string(), invoice.payer_ref.clone());
            request
        };

        info!(invoice_id = %invoice_id, gateway = %gateway, "creating payment link");
        let response = adapter.create_payment_request(&request).await?;

        let _guard = self.locks.lock(invoice_id).await;
        let mut invoice = self.get_invoice(invoice_id).await?;
        // Re-validate: a concurrent call may have attached a payment or an
        // operator may have cancelled while we were on the wire.
        if invoice.external_payment_id.is_some() {
            warn!(
                invoice_id = %invoice_id,
                orphaned_reference = %response.external_payment_id,
                "payment request raced a concurrent initiation"
            );
            return Err(AppError::AlreadyInitiated(invoice_id));
        }
        if invoice.status != InvoiceStatus::Pending {
            warn!(
                invoice_id = %invoice_id,
                status = %invoice.status,
                orphaned_reference = %response.external_payment_id,
                "invoice left PENDING during payment request creation"
            );
            return Err(AppError::IllegalTransition {
                id: invoice_id,
                from: invoice.status,
                to: InvoiceStatus::Processing,
            });
        }

        invoice.attach_payment(gateway, response.external_payment_id, response.payment_url);
        self.store.update(&invoice).await?;
        info!(
            invoice_id = %invoice_id,
            external_payment_id = ?invoice.external_payment_id,
            "payment link created, invoice now PROCESSING"
        );
        Ok(invoice)
    }

    /// Apply a normalized webhook event to the invoice it references.
    ///
    /// Idempotence contract: the same event applied twice changes status at
    /// most once, and the notifier fires only on the application that
    /// actually transitions. Terminal states are never left except
    /// PAID -> REFUNDED.
    pub async fn reconcile(&self, event: &WebhookEvent) -> AppResult<ReconcileOutcome> {
        let Some(target) = target_status(event.status) else {
            debug!(reference = %event.external_payment_id, "event carries no transition");
            return Ok(ReconcileOutcome::Duplicate);
        };

        let Some(found) = self
            .store
            .get_by_external_payment_id(event.gateway, &event.external_payment_id)
            .await?
        else {
            warn!(
                gateway = %event.gateway,
                reference = %event.external_payment_id,
                "webhook references unknown external payment id"
            );
            return Ok(ReconcileOutcome::UnknownReference);
        };

        let _guard = self.locks.lock(found.id).await;
        // Reload under the lock; the record may have moved since lookup.
        let Some(mut invoice) = self.store.get(found.id).await? else {
            return Ok(ReconcileOutcome::UnknownReference);
        };
        if invoice.external_payment_id.as_deref() != Some(event.external_payment_id.as_str()) {
            // Recreated while we waited; the reference no longer belongs
            // to this invoice.
            return Ok(ReconcileOutcome::UnknownReference);
        }

        if invoice.status == target {
            debug!(invoice_id = %invoice.id, status = %target, "duplicate webhook delivery");
            return Ok(ReconcileOutcome::Duplicate);
        }
        if !invoice.status.can_transition_to(target) {
            warn!(
                invoice_id = %invoice.id,
                current = %invoice.status,
                attempted = %target,
                "webhook attempted an inconsistent transition"
            );
            return Ok(ReconcileOutcome::Inconsistent {
                current: invoice.status,
                attempted: target,
            });
        }

        let from = invoice.status;
        invoice.set_status(target);
        self.store.update(&invoice).await?;
        drop(_guard);

        info!(invoice_id = %invoice.id, from = %from, to = %target, "invoice reconciled");
        self.send_notification(&invoice, target).await;
        Ok(ReconcileOutcome::Applied { from, to: target })
    }

    /// Refund a paid invoice, fully or partially. The provider call runs
    /// outside the invoice lock; a failed refund leaves status untouched.
    pub async fn refund(&self, invoice_id: Uuid, amount: Option<Decimal>) -> AppResult<String> {
        let (adapter, external_payment_id, amount) = {
            let _guard = self.locks.lock(invoice_id).await;
            let invoice = self.get_invoice(invoice_id).await?;
            if invoice.status != InvoiceStatus::Paid {
                return Err(AppError::NotRefundable {
                    id: invoice_id,
                    status: invoice.status,
                });
            }
            let (Some(gateway), Some(external)) =
                (invoice.selected_gateway, invoice.external_payment_id.clone())
            else {
                return Err(AppError::NotRefundable {
                    id: invoice_id,
                    status: invoice.status,
                });
            };
            let adapter = self
                .registry
                .resolve(gateway)
                .ok_or(AppError::GatewayUnavailable(gateway))?;
            let amount = amount.unwrap_or(invoice.amount);
            if amount <= Decimal::ZERO || amount > invoice.amount {
                return Err(AppError::InvalidAmount {
                    amount,
                    message: format!(
                        "refund must be greater than zero and at most {}",
                        invoice.amount
                    ),
                });
            }
            (adapter, external, amount)
        };

        info!(invoice_id = %invoice_id, amount = %amount, "processing refund");
        let refund_reference = adapter.refund(&external_payment_id, amount).await?;

        let _guard = self.locks.lock(invoice_id).await;
        let mut invoice = self.get_invoice(invoice_id).await?;
        match invoice.status {
            InvoiceStatus::Paid => {
                invoice.set_status(InvoiceStatus::Refunded);
                self.store.update(&invoice).await?;
                drop(_guard);
                info!(invoice_id = %invoice_id, refund_reference = %refund_reference, "invoice refunded");
                self.send_notification(&invoice, InvoiceStatus::Refunded).await;
            }
            InvoiceStatus::Refunded => {
                debug!(invoice_id = %invoice_id, "refund webhook landed first");
            }
            other => {
                warn!(
                    invoice_id = %invoice_id,
                    status = %other,
                    "refund issued but invoice no longer PAID"
                );
            }
        }
        Ok(refund_reference)
    }

    /// Live status refresh. Adapter failures degrade to the last persisted
    /// status; a reported state change goes through the same guarded
    /// transition path as a webhook, so a refresh racing a webhook is safe.
    pub async fn check_status(&self, invoice_id: Uuid) -> AppResult<InvoiceStatus> {
        let invoice = self.get_invoice(invoice_id).await?;
        let (Some(gateway), Some(external)) =
            (invoice.selected_gateway, invoice.external_payment_id.clone())
        else {
            return Ok(invoice.status);
        };
        let Some(adapter) = self.registry.resolve(gateway) else {
            return Ok(invoice.status);
        };

        match adapter.query_status(&external).await {
            Err(e) => {
                warn!(invoice_id = %invoice_id, "status query failed, serving last known status: {e}");
                Ok(invoice.status)
            }
            Ok(canonical) => {
                self.reconcile(&WebhookEvent {
                    gateway,
                    external_payment_id: external,
                    status: canonical,
                })
                .await?;
                Ok(self.get_invoice(invoice_id).await?.status)
            }
        }
    }

    /// Operator cancellation: legal from any non-terminal state.
    pub async fn cancel(&self, invoice_id: Uuid) -> AppResult<Invoice> {
        let invoice = self
            .apply_operator_transition(invoice_id, InvoiceStatus::Cancelled)
            .await?;
        self.send_notification(&invoice, InvoiceStatus::Cancelled).await;
        Ok(invoice)
    }

    /// Time-based expiry, driven by an external scheduler.
    pub async fn expire(&self, invoice_id: Uuid) -> AppResult<Invoice> {
        let invoice = self
            .apply_operator_transition(invoice_id, InvoiceStatus::Expired)
            .await?;
        self.send_notification(&invoice, InvoiceStatus::Expired).await;
        Ok(invoice)
    }

    /// Reopen a failed or cancelled invoice: back to PENDING with gateway,
    /// payment URL and external reference cleared together.
    pub async fn recreate(&self, invoice_id: Uuid) -> AppResult<Invoice> {
        let _guard = self.locks.lock(invoice_id).await;
        let mut invoice = self.get_invoice(invoice_id).await?;
        if !matches!(
            invoice.status,
            InvoiceStatus::Failed | InvoiceStatus::Cancelled
        ) {
            return Err(AppError::IllegalTransition {
                id: invoice_id,
                from: invoice.status,
                to: InvoiceStatus::Pending,
            });
        }
        invoice.clear_payment();
        self.store.update(&invoice).await?;
        info!(invoice_id = %invoice_id, "invoice recreated");
        Ok(invoice)
    }

    async fn apply_operator_transition(
        &self,
        invoice_id: Uuid,
        target: InvoiceStatus,
    ) -> AppResult<Invoice> {
        let _guard = self.locks.lock(invoice_id).await;
        let mut invoice = self.get_invoice(invoice_id).await?;
        if !invoice.status.can_transition_to(target) {
            return Err(AppError::IllegalTransition {
                id: invoice_id,
                from: invoice.status,
                to: target,
            });
        }
        let from = invoice.status;
        invoice.set_status(target);
        self.store.update(&invoice).await?;
        info!(invoice_id = %invoice_id, from = %from, to = %target, "operator transition applied");
        Ok(invoice)
    }

    async fn send_notification(&self, invoice: &Invoice, status: InvoiceStatus) {
        if let Err(e) = self.notifier.notify(invoice, status).await {
            warn!(invoice_id = %invoice.id, "notification failed: {e}");
        }
    }
}

/// Invoice status a canonical gateway state maps onto. `Pending` reports
/// carry no transition.
fn target_status(status: CanonicalStatus) -> Option<InvoiceStatus> {
    match status {
        CanonicalStatus::Pending => None,
        CanonicalStatus::Succeeded => Some(InvoiceStatus::Paid),
        CanonicalStatus::Failed => Some(InvoiceStatus::Failed),
        CanonicalStatus::Refunded => Some(InvoiceStatus::Refunded),
        CanonicalStatus::Disputed => Some(InvoiceStatus::Cancelled),
        CanonicalStatus::Expired => Some(InvoiceStatus::Expired),
    }
}
