//! Gateway registry: the set of enabled adapters, keyed by gateway id.
//!
//! Populated once at startup from configuration and never mutated after,
//! so concurrent lookup needs no locking.

use std::collections::HashMap;
use std::sync::Arc;

use crate::payments::traits::PaymentGateway;
use crate::payments::types::GatewayId;

#[derive(Default)]
pub struct GatewayRegistry {
    gateways: HashMap<GatewayId, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an adapter. Called once per enabled gateway at startup;
    /// registering the same id twice replaces the earlier adapter.
    pub fn register(&mut self, adapter: Arc<dyn PaymentGateway>) {
        self.gateways.insert(adapter.id(), adapter);
    }

    pub fn resolve(&self, id: GatewayId) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(&id).cloned()
    }

    pub fn is_available(&self, id: GatewayId) -> bool {
        self.gateways.contains_key(&id)
    }

    pub fn enabled(&self) -> Vec<GatewayId> {
        self.gateways.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppResult;
    use crate::payments::types::{
        CanonicalStatus, PaymentRequest, PaymentResponse, WebhookEvent,
    };
    use async_trait::async_trait;
    use http::HeaderMap;
    use rust_decimal::Decimal;

    struct StubGateway(GatewayId);

    #[async_trait]
    impl PaymentGateway for StubGateway {
        fn id(&self) -> GatewayId {
            self.0
        }

        async fn create_payment_request(
            &self,
            _request: &PaymentRequest,
        ) -> AppResult<PaymentResponse> {
            unimplemented!()
        }

        async fn refund(&self, _external_payment_id: &str, _amount: Decimal) -> AppResult<String> {
            unimplemented!()
        }

        async fn query_status(&self, _external_payment_id: &str) -> AppResult<CanonicalStatus> {
            unimplemented!()
        }

        async fn authenticate(&self, _headers: &HeaderMap, _raw_body: &[u8]) -> bool {
            true
        }

        fn interpret(&self, _raw_body: &[u8]) -> Option<WebhookEvent> {
            None
        }
    }

    #[test]
    fn resolves_registered_gateways_only() {
        let mut registry = GatewayRegistry::new();
        registry.register(std::sync::Arc::new(StubGateway(GatewayId::Stripe)));

        assert!(registry.resolve(GatewayId::Stripe).is_some());
        assert!(registry.resolve(GatewayId::Paypal).is_none());
        assert!(registry.is_available(GatewayId::Stripe));
        assert!(!registry.is_available(GatewayId::Paypal));
        assert_eq!(registry.enabled(), vec![GatewayId::Stripe]);
    }

    #[test]
    fn empty_registry_reports_empty() {
        let registry = GatewayRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.enabled().is_empty());
    }
}
