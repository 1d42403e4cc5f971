use anyhow::{Result, bail};
use stripe::Client;

/// Stripe connection settings, read once at startup. The server runs
/// without this when the keys are absent; checkout and webhook routes
/// then answer 503 while the rest of the API stays up.
#[derive(Clone)]
pub struct StripeConfig {
    pub client: Client,
    pub webhook_secret: String,
}

impl StripeConfig {
    pub fn from_env() -> Result<Self> {
        let secret_key = require_env("STRIPE_SECRET_KEY")?;
        if !secret_key.starts_with("sk_") && !secret_key.starts_with("rk_") {
            bail!("STRIPE_SECRET_KEY does not look like a Stripe secret key");
        }
        let webhook_secret = require_env("STRIPE_WEBHOOK_SECRET")?;

        Ok(Self {
            client: Client::new(secret_key),
            webhook_secret,
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("{name} must be set"),
    }
}

// Keys must never reach logs, so Debug hides every field.
impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("client", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .finish()
    }
}
