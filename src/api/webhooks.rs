//! Webhook ingress. One route per gateway; the adapter authenticates the
//! raw request and normalizes the payload before reconciliation.
//!
//! Providers retry non-2xx deliveries, so every condition the provider
//! cannot fix by retrying is acknowledged with 200: events we ignore,
//! unknown references, and inconsistent transitions. Only unknown routes
//! (404), authentication failures (401) and internal faults (500) say
//! otherwise.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{debug, warn};

use super::AppState;
use crate::error::AppError;
use crate::payments::orchestrator::ReconcileOutcome;
use crate::payments::types::GatewayId;

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub outcome: &'static str,
}

fn ack(outcome: &'static str) -> Response {
    (StatusCode::OK, Json(WebhookResponse { outcome })).into_response()
}

fn gateway_not_found(gateway: &str) -> Response {
    warn!(gateway = %gateway, "webhook for unknown or disabled gateway");
    (
        StatusCode::NOT_FOUND,
        Json(WebhookResponse {
            outcome: "no_such_gateway",
        }),
    )
        .into_response()
}

pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let Ok(gateway_id) = gateway.parse::<GatewayId>() else {
        return Ok(gateway_not_found(&gateway));
    };

    let Some(adapter) = state.orchestrator.registry().resolve(gateway_id) else {
        return Ok(gateway_not_found(gateway_id.as_str()));
    };

    if !adapter.authenticate(&headers, &body).await {
        warn!(gateway = %gateway_id, "webhook failed authentication");
        return Err(AppError::AuthenticationFailed(gateway_id));
    }

    let Some(event) = adapter.interpret(&body) else {
        debug!(gateway = %gateway_id, "webhook event not applicable");
        return Ok(ack("ignored"));
    };

    let outcome = state.orchestrator.reconcile(&event).await?;
    Ok(match outcome {
        ReconcileOutcome::Applied { .. } => ack("applied"),
        ReconcileOutcome::Duplicate => ack("duplicate"),
        ReconcileOutcome::UnknownReference => ack("unknown_reference"),
        ReconcileOutcome::Inconsistent { .. } => ack("inconsistent"),
    })
}
