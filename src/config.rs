use anyhow::{anyhow, Context, Result};
use std::env;

use crate::payments::providers::{PaypalConfig, StripeConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub stripe: GatewaySection<StripeConfig>,
    pub paypal: GatewaySection<PaypalConfig>,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// A gateway section with its enable switch. Disabled gateways are never
/// constructed and never registered.
#[derive(Debug, Clone)]
pub struct GatewaySection<T> {
    pub enabled: bool,
    pub settings: T,
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// When set, status changes are POSTed here; otherwise they are only
    /// logged.
    pub callback_url: Option<String>,
    pub timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL not set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
        };

        let stripe_enabled = flag("STRIPE_ENABLED")?;
        let stripe_defaults = StripeConfig::default();
        let stripe = GatewaySection {
            enabled: stripe_enabled,
            settings: StripeConfig {
                secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
                webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
                base_url: env::var("STRIPE_BASE_URL")
                    .unwrap_or(stripe_defaults.base_url),
                success_url: env::var("STRIPE_SUCCESS_URL")
                    .unwrap_or(stripe_defaults.success_url),
                cancel_url: env::var("STRIPE_CANCEL_URL")
                    .unwrap_or(stripe_defaults.cancel_url),
                timeout_secs: stripe_defaults.timeout_secs,
                max_retries: stripe_defaults.max_retries,
            },
        };

        let paypal_enabled = flag("PAYPAL_ENABLED")?;
        let paypal_defaults = PaypalConfig::default();
        let paypal = GatewaySection {
            enabled: paypal_enabled,
            settings: PaypalConfig {
                client_id: env::var("PAYPAL_CLIENT_ID").unwrap_or_default(),
                client_secret: env::var("PAYPAL_CLIENT_SECRET").unwrap_or_default(),
                webhook_id: env::var("PAYPAL_WEBHOOK_ID").unwrap_or_default(),
                mode: env::var("PAYPAL_MODE").unwrap_or_else(|_| "sandbox".to_string()),
                return_url: env::var("PAYPAL_RETURN_URL")
                    .unwrap_or(paypal_defaults.return_url),
                cancel_url: env::var("PAYPAL_CANCEL_URL")
                    .unwrap_or(paypal_defaults.cancel_url),
                timeout_secs: paypal_defaults.timeout_secs,
            },
        };

        let notifier = NotifierConfig {
            callback_url: env::var("NOTIFY_CALLBACK_URL").ok().filter(|s| !s.is_empty()),
            timeout_secs: env::var("NOTIFY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("NOTIFY_TIMEOUT_SECS must be a valid number")?,
        };

        let config = Config {
            server,
            database,
            stripe,
            paypal,
            notifier,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(anyhow!("DATABASE_URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.stripe.enabled {
            if self.stripe.settings.secret_key.trim().is_empty() {
                return Err(anyhow!("STRIPE_SECRET_KEY cannot be empty when Stripe is enabled"));
            }
            if self.stripe.settings.webhook_secret.trim().is_empty() {
                return Err(anyhow!(
                    "STRIPE_WEBHOOK_SECRET cannot be empty when Stripe is enabled"
                ));
            }
        }

        if self.paypal.enabled {
            if self.paypal.settings.client_id.trim().is_empty() {
                return Err(anyhow!("PAYPAL_CLIENT_ID cannot be empty when PayPal is enabled"));
            }
            if self.paypal.settings.client_secret.trim().is_empty() {
                return Err(anyhow!(
                    "PAYPAL_CLIENT_SECRET cannot be empty when PayPal is enabled"
                ));
            }
            if self.paypal.settings.webhook_id.trim().is_empty() {
                return Err(anyhow!("PAYPAL_WEBHOOK_ID cannot be empty when PayPal is enabled"));
            }
            let valid_modes = ["sandbox", "live"];
            if !valid_modes.contains(&self.paypal.settings.mode.as_str()) {
                return Err(anyhow!(
                    "PAYPAL_MODE must be 'sandbox' or 'live', got {}",
                    self.paypal.settings.mode
                ));
            }
        }

        if !self.stripe.enabled && !self.paypal.enabled {
            return Err(anyhow!("at least one payment gateway must be enabled"));
        }

        Ok(())
    }
}

fn flag(name: &str) -> Result<bool> {
    match env::var(name) {
        Err(_) => Ok(false),
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" | "" => Ok(false),
            other => Err(anyhow!("{name} must be a boolean, got {other}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                environment: "development".to_string(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/invoicer".to_string(),
                max_connections: 20,
            },
            stripe: GatewaySection {
                enabled: true,
                settings: StripeConfig {
                    secret_key: "sk_test_123".to_string(),
                    webhook_secret: "whsec_123".to_string(),
                    ..StripeConfig::default()
                },
            },
            paypal: GatewaySection {
                enabled: false,
                settings: PaypalConfig::default(),
            },
            notifier: NotifierConfig {
                callback_url: None,
                timeout_secs: 10,
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn privileged_port_is_rejected() {
        let mut config = base_config();
        config.server.port = 80;
        assert!(config.validate().is_err());
    }

    #[test]
    fn enabled_stripe_requires_secrets() {
        let mut config = base_config();
        config.stripe.settings.webhook_secret.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn at_least_one_gateway_must_be_enabled() {
        let mut config = base_config();
        config.stripe.enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn enabled_paypal_requires_webhook_id() {
        let mut config = base_config();
        config.paypal.enabled = true;
        config.paypal.settings.client_id = "client".to_string();
        config.paypal.settings.client_secret = "secret".to_string();
        assert!(config.validate().is_err());
    }
}
