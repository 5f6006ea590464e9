//! Operator-facing invoice endpoints. These back the chat bot's slash
//! commands; errors surface synchronously as JSON with a matching status.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::error::AppResult;
use crate::invoices::{Invoice, InvoiceStatus};
use crate::payments::types::GatewayId;

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    pub payer_ref: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub due_date: Option<DateTime<Utc>>,
}

pub async fn create_invoice(
    State(state): State<AppState>,
    Json(body): Json<CreateInvoiceRequest>,
) -> AppResult<(StatusCode, Json<Invoice>)> {
    let invoice = state
        .orchestrator
        .create_invoice(
            body.payer_ref,
            body.description,
            body.amount,
            body.currency,
            body.due_date,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Invoice>> {
    Ok(Json(state.orchestrator.get_invoice(id).await?))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.orchestrator.delete_invoice(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PaymentLinkRequest {
    pub gateway: GatewayId,
}

pub async fn create_payment_link(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<PaymentLinkRequest>,
) -> AppResult<Json<Invoice>> {
    let invoice = state
        .orchestrator
        .create_payment_link(id, body.gateway)
        .await?;
    Ok(Json(invoice))
}

#[derive(Debug, Deserialize, Default)]
pub struct RefundRequest {
    /// Omitted means a full refund.
    pub amount: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub refund_reference: String,
}

pub async fn refund_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<RefundRequest>>,
) -> AppResult<Json<RefundResponse>> {
    let amount = body.map(|Json(b)| b.amount).unwrap_or(None);
    let refund_reference = state.orchestrator.refund(id, amount).await?;
    Ok(Json(RefundResponse { refund_reference }))
}

pub async fn cancel_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Invoice>> {
    Ok(Json(state.orchestrator.cancel(id).await?))
}

pub async fn recreate_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Invoice>> {
    Ok(Json(state.orchestrator.recreate(id).await?))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: InvoiceStatus,
}

pub async fn check_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<StatusResponse>> {
    let status = state.orchestrator.check_status(id).await?;
    Ok(Json(StatusResponse { status }))
}
