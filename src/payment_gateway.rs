use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionPaymentStatus, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData, Currency,
};
use tracing::error;

use crate::errors::DomainError;
use crate::stripe_client::StripeConfig;

/// Request to open a hosted checkout for one order.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub name: String,
    pub description: Option<String>,
    pub unit_amount_cents: i32,
    pub quantity: u32,
    pub success_url: String,
    pub cancel_url: String,
    /// Carried through to the processor and echoed back on webhook events.
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutSessionInfo {
    pub session_id: String,
    pub url: String,
}

/// Processor-side view of a session, as reported at verification time.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub paid: bool,
    /// The processor's own payment status string, e.g. "unpaid".
    pub status: String,
    pub payment_intent_id: Option<String>,
    pub amount_total_cents: Option<i64>,
}

/// Boundary to the payment processor. Everything past this trait talks to
/// the network; everything before it can be driven by a test double.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSessionInfo, DomainError>;

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionStatus, DomainError>;
}

/// Live implementation backed by the Stripe API.
pub struct StripeGateway {
    config: StripeConfig,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSessionInfo, DomainError> {
        let mut params = CreateCheckoutSession::new();
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.mode = Some(stripe::CheckoutSessionMode::Payment);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: Currency::EUR,
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: request.name.clone(),
                    description: request.description.clone(),
                    ..Default::default()
                }),
                unit_amount: Some(request.unit_amount_cents as i64),
                ..Default::default()
            }),
            quantity: Some(request.quantity as u64),
            ..Default::default()
        }]);
        params.metadata = Some(request.metadata.clone());

        let session = CheckoutSession::create(&self.config.client, params)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to create checkout session");
                metrics::counter!("stripe.api.errors").increment(1);
                DomainError::Retryable(format!("checkout session creation failed: {e}"))
            })?;

        let url = session
            .url
            .ok_or_else(|| DomainError::Retryable("checkout session has no URL".to_string()))?;

        Ok(CheckoutSessionInfo {
            session_id: session.id.to_string(),
            url,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionStatus, DomainError> {
        let id = CheckoutSessionId::from_str(session_id)
            .map_err(|_| DomainError::NotFound("checkout session"))?;

        let session = CheckoutSession::retrieve(&self.config.client, &id, &[])
            .await
            .map_err(|e| {
                error!(error = %e, session_id, "Failed to retrieve checkout session");
                metrics::counter!("stripe.api.errors").increment(1);
                DomainError::Retryable(format!("checkout session lookup failed: {e}"))
            })?;

        let paid = matches!(
            session.payment_status,
            CheckoutSessionPaymentStatus::Paid | CheckoutSessionPaymentStatus::NoPaymentRequired
        );

        Ok(SessionStatus {
            paid,
            status: session.payment_status.as_str().to_string(),
            payment_intent_id: session.payment_intent.as_ref().map(|pi| pi.id().to_string()),
            amount_total_cents: session.amount_total,
        })
    }
}
