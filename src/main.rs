use std::net::SocketAddr;
use std::sync::Arc;

use invoicer::api::{self, AppState};
use invoicer::config::Config;
use invoicer::database::invoice_store::PgInvoiceStore;
use invoicer::database::{self, PoolConfig};
use invoicer::payments::notifier::{HttpNotifier, LoggingNotifier, Notifier};
use invoicer::payments::orchestrator::PaymentOrchestrator;
use invoicer::payments::providers::{PaypalGateway, StripeGateway};
use invoicer::payments::registry::GatewayRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;

    tracing::info!("Starting invoicer");
    tracing::info!("Environment: {}", config.server.environment);

    let pool = database::init_pool(
        &config.database.url,
        Some(PoolConfig {
            max_connections: config.database.max_connections,
            ..PoolConfig::default()
        }),
    )
    .await?;
    let store = Arc::new(PgInvoiceStore::new(pool));

    let mut registry = GatewayRegistry::new();
    if config.stripe.enabled {
        registry.register(Arc::new(StripeGateway::new(config.stripe.settings.clone())));
        tracing::info!("Stripe gateway enabled");
    }
    if config.paypal.enabled {
        registry.register(Arc::new(PaypalGateway::new(config.paypal.settings.clone())));
        tracing::info!("PayPal gateway ({}) enabled", config.paypal.settings.mode);
    }

    let notifier: Arc<dyn Notifier> = match &config.notifier.callback_url {
        Some(url) => {
            tracing::info!("Posting status changes to {url}");
            Arc::new(HttpNotifier::new(url.clone(), config.notifier.timeout_secs))
        }
        None => Arc::new(LoggingNotifier),
    };

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        store,
        Arc::new(registry),
        notifier,
    ));

    let app = api::router(AppState {
        environment: config.server.environment.clone(),
        orchestrator,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
