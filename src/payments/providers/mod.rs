//! Concrete gateway adapters, one per enumerated gateway.

pub mod paypal;
pub mod stripe;

pub use paypal::{PaypalConfig, PaypalGateway};
pub use stripe::{StripeConfig, StripeGateway};
