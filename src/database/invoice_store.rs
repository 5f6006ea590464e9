//! Invoice store contract and its implementations.
//!
//! The store exclusively owns persisted invoice records. The orchestrator
//! talks to it through the narrow [`InvoiceStore`] trait: a Postgres
//! implementation for deployments and an in-memory one for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::error::{DatabaseError, DbResult};
use crate::invoices::{Invoice, InvoiceStatus};
use crate::payments::types::GatewayId;

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn create(&self, invoice: &Invoice) -> DbResult<()>;

    async fn get(&self, id: Uuid) -> DbResult<Option<Invoice>>;

    /// Lookup by the gateway's reference for the active charge. Exact
    /// match; this is the reconciliation key for incoming webhooks.
    async fn get_by_external_payment_id(
        &self,
        gateway: GatewayId,
        external_payment_id: &str,
    ) -> DbResult<Option<Invoice>>;

    /// Full-record replace, last-writer-wins. Callers serialize competing
    /// status mutations per invoice before calling.
    async fn update(&self, invoice: &Invoice) -> DbResult<()>;

    async fn delete(&self, id: Uuid) -> DbResult<bool>;
}

const INVOICE_COLUMNS: &str = "id, payer_ref, description, amount, currency, status, \
     selected_gateway, external_payment_id, payment_url, due_date, created_at, updated_at";

#[derive(Debug, FromRow)]
struct InvoiceRow {
    id: Uuid,
    payer_ref: String,
    description: Option<String>,
    amount: Decimal,
    currency: String,
    status: String,
    selected_gateway: Option<String>,
    external_payment_id: Option<String>,
    payment_url: Option<String>,
    due_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = DatabaseError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        let status = InvoiceStatus::parse(&row.status).ok_or_else(|| DatabaseError::Unknown {
            message: format!("invoice {} has unknown status '{}'", row.id, row.status),
        })?;
        let selected_gateway = match row.selected_gateway.as_deref() {
            None => None,
            Some(s) => Some(s.parse::<GatewayId>().map_err(|_| DatabaseError::Unknown {
                message: format!("invoice {} has unknown gateway '{s}'", row.id),
            })?),
        };
        Ok(Invoice {
            id: row.id,
            payer_ref: row.payer_ref,
            description: row.description,
            amount: row.amount,
            currency: row.currency,
            status,
            selected_gateway,
            external_payment_id: row.external_payment_id,
            payment_url: row.payment_url,
            due_date: row.due_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres-backed invoice store.
pub struct PgInvoiceStore {
    pool: PgPool,
}

impl PgInvoiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceStore for PgInvoiceStore {
    async fn create(&self, invoice: &Invoice) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO invoices (id, payer_ref, description, amount, currency, status, \
             selected_gateway, external_payment_id, payment_url, due_date, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(invoice.id)
        .bind(&invoice.payer_ref)
        .bind(&invoice.description)
        .bind(invoice.amount)
        .bind(&invoice.currency)
        .bind(invoice.status.as_str())
        .bind(invoice.selected_gateway.map(GatewayId::as_str))
        .bind(&invoice.external_payment_id)
        .bind(&invoice.payment_url)
        .bind(invoice.due_date)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<Invoice>> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1");
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.map(Invoice::try_from).transpose()
    }

    async fn get_by_external_payment_id(
        &self,
        gateway: GatewayId,
        external_payment_id: &str,
    ) -> DbResult<Option<Invoice>> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE selected_gateway = $1 AND external_payment_id = $2"
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(gateway.as_str())
            .bind(external_payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.map(Invoice::try_from).transpose()
    }

    async fn update(&self, invoice: &Invoice) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE invoices SET payer_ref = $2, description = $3, amount = $4, currency = $5, \
             status = $6, selected_gateway = $7, external_payment_id = $8, payment_url = $9, \
             due_date = $10, updated_at = $11 WHERE id = $1",
        )
        .bind(invoice.id)
        .bind(&invoice.payer_ref)
        .bind(&invoice.description)
        .bind(invoice.amount)
        .bind(&invoice.currency)
        .bind(invoice.status.as_str())
        .bind(invoice.selected_gateway.map(GatewayId::as_str))
        .bind(&invoice.external_payment_id)
        .bind(&invoice.payment_url)
        .bind(invoice.due_date)
        .bind(invoice.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("invoice", invoice.id));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }
}

/// In-memory invoice store. Backs the test suite and is a faithful model of
/// the Postgres store's contract.
#[derive(Default)]
pub struct MemoryInvoiceStore {
    invoices: RwLock<HashMap<Uuid, Invoice>>,
}

impl MemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for MemoryInvoiceStore {
    async fn create(&self, invoice: &Invoice) -> DbResult<()> {
        let mut invoices = self.invoices.write().await;
        if invoices.contains_key(&invoice.id) {
            return Err(DatabaseError::UniqueViolation {
                column: "id".to_string(),
                value: invoice.id.to_string(),
            });
        }
        invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<Invoice>> {
        Ok(self.invoices.read().await.get(&id).cloned())
    }

    async fn get_by_external_payment_id(
        &self,
        gateway: GatewayId,
        external_payment_id: &str,
    ) -> DbResult<Option<Invoice>> {
        Ok(self
            .invoices
            .read()
            .await
            .values()
            .find(|inv| {
                inv.selected_gateway == Some(gateway)
                    && inv.external_payment_id.as_deref() == Some(external_payment_id)
            })
            .cloned())
    }

    async fn update(&self, invoice: &Invoice) -> DbResult<()> {
        let mut invoices = self.invoices.write().await;
        match invoices.get_mut(&invoice.id) {
            Some(existing) => {
                *existing = invoice.clone();
                Ok(())
            }
            None => Err(DatabaseError::not_found("invoice", invoice.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> DbResult<bool> {
        Ok(self.invoices.write().await.remove(&id).is_some())
    }
}
