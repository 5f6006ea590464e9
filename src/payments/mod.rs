//! Payment core: gateway abstraction, registry, orchestrator, notifier.

pub mod notifier;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod traits;
pub mod types;
