//! HTTP surface: invoice management for operators, webhook ingress for
//! payment providers.

pub mod health;
pub mod invoices;
pub mod webhooks;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::payments::orchestrator::PaymentOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub environment: String,
    pub orchestrator: Arc<PaymentOrchestrator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/invoices", post(invoices::create_invoice))
        .route(
            "/invoices/:id",
            get(invoices::get_invoice).delete(invoices::delete_invoice),
        )
        .route("/invoices/:id/payment-link", post(invoices::create_payment_link))
        .route("/invoices/:id/refund", post(invoices::refund_invoice))
        .route("/invoices/:id/cancel", post(invoices::cancel_invoice))
        .route("/invoices/:id/recreate", post(invoices::recreate_invoice))
        .route("/invoices/:id/status", get(invoices::check_status))
        .route("/webhook/:gateway", post(webhooks::handle_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvoiceNotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyInitiated(_)
            | AppError::NotRefundable { .. }
            | AppError::IllegalTransition { .. } => StatusCode::CONFLICT,
            AppError::InvalidAmount { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            AppError::Gateway { .. } => StatusCode::BAD_GATEWAY,
            AppError::Notification { .. } | AppError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::DatabaseError;
    use crate::payments::types::GatewayId;
    use uuid::Uuid;

    #[test]
    fn errors_map_to_expected_status_codes() {
        let cases: Vec<(AppError, StatusCode)> = vec![
            (
                AppError::InvoiceNotFound(Uuid::new_v4()),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::AlreadyInitiated(Uuid::new_v4()),
                StatusCode::CONFLICT,
            ),
            (
                AppError::InvalidAmount {
                    amount: rust_decimal::Decimal::ZERO,
                    message: "amount must be greater than zero".to_string(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                AppError::GatewayUnavailable(GatewayId::Paypal),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AppError::AuthenticationFailed(GatewayId::Stripe),
                StatusCode::UNAUTHORIZED,
            ),
            (
                AppError::gateway(GatewayId::Stripe, "boom", false),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AppError::Storage(DatabaseError::PoolExhausted),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
