use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::DateTime;
use stripe::{Event, EventObject, Webhook};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::memberships::MembershipStatus;
use crate::memberships_repo::MembershipsRepository;
use crate::reconciler::ReconcileTrigger;
use crate::stripe_webhooks::NewStripeWebhookEvent;
use crate::stripe_webhooks_repo::StripeWebhookEventsRepository;
use crate::web::AppState;

/// POST /stripe/webhooks
///
/// Signed events from the payment processor. A processing failure answers
/// 500 on purpose: Stripe redelivers on non-2xx, and the replay check makes
/// the retry harmless once the event finally goes through.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let stripe_config = match &state.stripe_config {
        Some(config) => config.clone(),
        None => {
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    metrics::counter!("stripe.webhook.received").increment(1);
    let start = std::time::Instant::now();

    let signature = match headers.get("Stripe-Signature").and_then(|s| s.to_str().ok()) {
        Some(s) => s.to_string(),
        None => {
            metrics::counter!("stripe.webhook.signature_invalid").increment(1);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let payload = match std::str::from_utf8(&body) {
        Ok(s) => s,
        Err(_) => {
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let event = match Webhook::construct_event(payload, &signature, &stripe_config.webhook_secret) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Invalid webhook signature");
            metrics::counter!("stripe.webhook.signature_invalid").increment(1);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let webhook_repo = StripeWebhookEventsRepository::new(state.pool.clone());

    let event_id = event.id.to_string();
    match webhook_repo.is_processed(&event_id).await {
        Ok(true) => {
            metrics::counter!("stripe.webhook.replayed").increment(1);
            return StatusCode::OK.into_response();
        }
        Err(e) => {
            error!(error = %e, "Failed to check webhook idempotency");
        }
        _ => {}
    }

    let event_type = event.type_.to_string();
    let new_event = NewStripeWebhookEvent {
        stripe_event_id: event_id.clone(),
        event_type: event_type.clone(),
        payload: serde_json::to_value(&event).unwrap_or_default(),
    };

    if let Err(e) = webhook_repo.create(new_event).await {
        warn!(error = %e, event_id = %event_id, "Failed to journal webhook event");
    }

    let process_result = process_webhook_event(&state, &event_type, &event).await;

    let duration_ms = start.elapsed().as_millis() as f64;
    metrics::histogram!("stripe.webhook.processing_ms").record(duration_ms);

    match process_result {
        Ok(()) => {
            if let Err(e) = webhook_repo.mark_processed(&event_id).await {
                error!(error = %e, "Failed to mark webhook as processed");
            }
            StatusCode::OK.into_response()
        }
        Err(e) => {
            error!(event_type = %event_type, error = %e, "Failed to process webhook event");
            metrics::counter!("stripe.webhook.failed").increment(1);
            if let Err(e2) = webhook_repo.mark_failed(&event_id, &e.to_string()).await {
                error!(error = %e2, "Failed to mark webhook as failed");
            }
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn process_webhook_event(
    state: &AppState,
    event_type: &str,
    event: &Event,
) -> anyhow::Result<()> {
    match event_type {
        "checkout.session.completed" => {
            if let EventObject::CheckoutSession(session) = &event.data.object {
                let order_id = session
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("order_id"))
                    .and_then(|v| Uuid::parse_str(v).ok());

                let Some(order_id) = order_id else {
                    // Not one of ours (or malformed); nothing to reconcile.
                    warn!(session_id = %session.id, "Checkout session without order metadata");
                    return Ok(());
                };

                let payment_intent_id =
                    session.payment_intent.as_ref().map(|pi| pi.id().to_string());

                let outcome = state
                    .reconciler()
                    .reconcile(
                        order_id,
                        ReconcileTrigger::WebhookEvent { payment_intent_id },
                    )
                    .await?;

                info!(
                    order_id = %order_id,
                    newly_confirmed = outcome.newly_confirmed,
                    "Reconciled checkout session"
                );
            }
        }
        "customer.subscription.updated" | "customer.subscription.deleted" => {
            if let EventObject::Subscription(subscription) = &event.data.object {
                sync_subscription(state, event_type, subscription).await?;
            }
        }
        _ => {
            info!(event_type = %event_type, "Unhandled webhook event type");
        }
    }

    Ok(())
}

/// Mirror the processor's view of a subscription onto the local
/// membership row, matched by Stripe customer id.
async fn sync_subscription(
    state: &AppState,
    event_type: &str,
    subscription: &stripe::Subscription,
) -> anyhow::Result<()> {
    let memberships_repo = MembershipsRepository::new(state.pool.clone());

    let customer_id = subscription.customer.id().to_string();
    let membership = match memberships_repo
        .get_by_stripe_customer_id(&customer_id)
        .await?
    {
        Some(membership) => membership,
        None => {
            warn!(customer_id = %customer_id, "Subscription event for unknown customer");
            return Ok(());
        }
    };

    let status = if event_type == "customer.subscription.deleted" {
        MembershipStatus::Canceled
    } else {
        match subscription.status {
            stripe::SubscriptionStatus::Active | stripe::SubscriptionStatus::Trialing => {
                MembershipStatus::Active
            }
            stripe::SubscriptionStatus::PastDue | stripe::SubscriptionStatus::Unpaid => {
                MembershipStatus::PastDue
            }
            _ => MembershipStatus::Canceled,
        }
    };

    let period_end = DateTime::from_timestamp(subscription.current_period_end, 0);
    let subscription_id = subscription.id.to_string();

    memberships_repo
        .update_subscription_state(
            membership.id,
            status,
            Some(&subscription_id),
            period_end,
        )
        .await?;

    info!(
        membership_id = %membership.id,
        ?status,
        "Synced membership from subscription event"
    );
    metrics::counter!("stripe.subscription.synced").increment(1);

    Ok(())
}
