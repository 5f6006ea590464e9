//! Payment reconciliation core for a chat-driven invoicing service.
//!
//! Invoices are created and managed over HTTP, charged through pluggable
//! payment gateways, and settled by reconciling provider webhooks against
//! the stored gateway references.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod invoices;
pub mod payments;
