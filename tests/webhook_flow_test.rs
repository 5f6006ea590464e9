//! End-to-end webhook flow tests against the real router, with an
//! in-memory store and a fake gateway that authenticates via a shared
//! test header.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

use invoicer::api::{router, AppState};
use invoicer::database::invoice_store::MemoryInvoiceStore;
use invoicer::error::AppResult;
use invoicer::invoices::{Invoice, InvoiceStatus};
use invoicer::payments::notifier::Notifier;
use invoicer::payments::orchestrator::PaymentOrchestrator;
use invoicer::payments::registry::GatewayRegistry;
use invoicer::payments::traits::PaymentGateway;
use invoicer::payments::types::{
    CanonicalStatus, GatewayId, PaymentRequest, PaymentResponse, WebhookEvent,
};

const TEST_SIGNATURE: &str = "test-signature-ok";

/// Authenticates via an `x-test-signature` header and interprets bodies of
/// the form `{"reference": "...", "status": "succeeded"}`.
struct FakeGateway;

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn id(&self) -> GatewayId {
        GatewayId::Stripe
    }

    async fn create_payment_request(
        &self,
        request: &PaymentRequest,
    ) -> AppResult<PaymentResponse> {
        Ok(PaymentResponse {
            external_payment_id: "pi_test_1".to_string(),
            payment_url: Some(format!("https://pay.test/{}", request.invoice_id)),
        })
    }

    async fn refund(&self, _external_payment_id: &str, _amount: Decimal) -> AppResult<String> {
        Ok("re_test_1".to_string())
    }

    async fn query_status(&self, _external_payment_id: &str) -> AppResult<CanonicalStatus> {
        Ok(CanonicalStatus::Pending)
    }

    async fn authenticate(&self, headers: &HeaderMap, _raw_body: &[u8]) -> bool {
        headers
            .get("x-test-signature")
            .and_then(|v| v.to_str().ok())
            == Some(TEST_SIGNATURE)
    }

    fn interpret(&self, raw_body: &[u8]) -> Option<WebhookEvent> {
        let value: Value = serde_json::from_slice(raw_body).ok()?;
        let reference = value.get("reference")?.as_str()?;
        let status = match value.get("status")?.as_str()? {
            "succeeded" => CanonicalStatus::Succeeded,
            "failed" => CanonicalStatus::Failed,
            "refunded" => CanonicalStatus::Refunded,
            _ => return None,
        };
        Some(WebhookEvent {
            gateway: GatewayId::Stripe,
            external_payment_id: reference.to_string(),
            status,
        })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<(Uuid, InvoiceStatus)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, invoice: &Invoice, new_status: InvoiceStatus) -> AppResult<()> {
        self.calls.lock().unwrap().push((invoice.id, new_status));
        Ok(())
    }
}

struct TestApp {
    app: Router,
    notifier: Arc<RecordingNotifier>,
}

fn test_app() -> TestApp {
    let store = Arc::new(MemoryInvoiceStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut registry = GatewayRegistry::new();
    registry.register(Arc::new(FakeGateway));
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        store,
        Arc::new(registry),
        notifier.clone(),
    ));
    let app = router(AppState {
        environment: "development".to_string(),
        orchestrator,
    });
    TestApp { app, notifier }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn webhook_request(body: Value, signature: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/webhook/stripe")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-test-signature", signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Create an invoice and attach a payment link; returns the invoice id.
async fn linked_invoice(app: &Router) -> Uuid {
    let (status, body) = send(
        app,
        json_request(
            Method::POST,
            "/invoices",
            json!({
                "payer_ref": "user-42",
                "description": "Logo design",
                "amount": "25.00",
                "currency": "USD",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();

    let (status, body) = send(
        app,
        json_request(
            Method::POST,
            &format!("/invoices/{id}/payment-link"),
            json!({ "gateway": "stripe" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PROCESSING");
    assert_eq!(body["external_payment_id"], "pi_test_1");
    id
}

#[tokio::test]
async fn succeeded_webhook_marks_invoice_paid() {
    let t = test_app();
    let id = linked_invoice(&t.app).await;

    let (status, body) = send(
        &t.app,
        webhook_request(
            json!({ "reference": "pi_test_1", "status": "succeeded" }),
            TEST_SIGNATURE,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "applied");

    let (status, body) = send(
        &t.app,
        Request::builder()
            .uri(format!("/invoices/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PAID");
    assert_eq!(
        *t.notifier.calls.lock().unwrap(),
        vec![(id, InvoiceStatus::Paid)]
    );
}

#[tokio::test]
async fn duplicate_webhook_acknowledged_without_second_notification() {
    let t = test_app();
    let id = linked_invoice(&t.app).await;
    let event = json!({ "reference": "pi_test_1", "status": "succeeded" });

    let (_, body) = send(&t.app, webhook_request(event.clone(), TEST_SIGNATURE)).await;
    assert_eq!(body["outcome"], "applied");

    let (status, body) = send(&t.app, webhook_request(event, TEST_SIGNATURE)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "duplicate");
    assert_eq!(
        *t.notifier.calls.lock().unwrap(),
        vec![(id, InvoiceStatus::Paid)]
    );
}

#[tokio::test]
async fn tampered_webhook_is_rejected_with_no_effect() {
    let t = test_app();
    let id = linked_invoice(&t.app).await;

    let (status, _) = send(
        &t.app,
        webhook_request(
            json!({ "reference": "pi_test_1", "status": "succeeded" }),
            "wrong-signature",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body) = send(
        &t.app,
        Request::builder()
            .uri(format!("/invoices/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(body["status"], "PROCESSING");
    assert!(t.notifier.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_reference_is_acknowledged() {
    let t = test_app();
    linked_invoice(&t.app).await;

    let (status, body) = send(
        &t.app,
        webhook_request(
            json!({ "reference": "pi_other", "status": "succeeded" }),
            TEST_SIGNATURE,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "unknown_reference");
}

#[tokio::test]
async fn inapplicable_event_is_acknowledged() {
    let t = test_app();

    let (status, body) = send(
        &t.app,
        webhook_request(json!({ "type": "account.updated" }), TEST_SIGNATURE),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "ignored");
}

#[tokio::test]
async fn unknown_gateway_route_is_not_found() {
    let t = test_app();

    // Not an enumerated gateway at all.
    let (status, _) = send(
        &t.app,
        Request::builder()
            .method(Method::POST)
            .uri("/webhook/venmo")
            .body(Body::from("{}"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Enumerated but not registered.
    let (status, _) = send(
        &t.app,
        Request::builder()
            .method(Method::POST)
            .uri("/webhook/paypal")
            .body(Body::from("{}"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_route_only_accepts_post() {
    let t = test_app();
    let (status, _) = send(
        &t.app,
        Request::builder()
            .method(Method::GET)
            .uri("/webhook/stripe")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn refund_endpoint_requires_paid_invoice() {
    let t = test_app();
    let id = linked_invoice(&t.app).await;

    let (status, _) = send(
        &t.app,
        json_request(Method::POST, &format!("/invoices/{id}/refund"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    send(
        &t.app,
        webhook_request(
            json!({ "reference": "pi_test_1", "status": "succeeded" }),
            TEST_SIGNATURE,
        ),
    )
    .await;

    let (status, body) = send(
        &t.app,
        json_request(Method::POST, &format!("/invoices/{id}/refund"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["refund_reference"], "re_test_1");
}

#[tokio::test]
async fn second_payment_link_conflicts() {
    let t = test_app();
    let id = linked_invoice(&t.app).await;

    let (status, _) = send(
        &t.app,
        json_request(
            Method::POST,
            &format!("/invoices/{id}/payment-link"),
            json!({ "gateway": "stripe" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn negative_amount_invoice_is_rejected() {
    let t = test_app();
    let (status, body) = send(
        &t.app,
        json_request(
            Method::POST,
            "/invoices",
            json!({
                "payer_ref": "user-42",
                "amount": "-25.00",
                "currency": "USD",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("invalid amount"));
}

#[tokio::test]
async fn missing_invoice_is_not_found() {
    let t = test_app();
    let (status, _) = send(
        &t.app,
        Request::builder()
            .uri(format!("/invoices/{}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_registered_gateways() {
    let t = test_app();
    let (status, body) = send(
        &t.app,
        Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["gateways"], json!(["stripe"]));
}
