//! Payment confirmation reconciler.
//!
//! Both confirmation paths land here: signed webhook deliveries and the
//! client's post-redirect verify call. Whichever arrives first wins; the
//! other becomes a no-op replay. All state changes for one confirmation
//! happen in a single transaction that first locks the order row, so two
//! concurrent confirmations of the same order serialize at the database.

use diesel::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entitlements::{self, EntitlementSummary};
use crate::errors::DomainError;
use crate::orders::{Order, OrderKind, OrderModel, OrderStatus};
use crate::orders_repo::{self, OrdersRepository};
use crate::payment_gateway::PaymentGateway;
use crate::payments::{NewPayment, PaymentKind};
use crate::payments_repo;
use crate::products::ProductCategory;
use crate::web::PgPool;

/// What prompted this reconciliation attempt.
#[derive(Debug, Clone)]
pub enum ReconcileTrigger {
    /// A signed processor event. The signature already vouches for the
    /// payment, so no gateway round trip is needed.
    WebhookEvent { payment_intent_id: Option<String> },
    /// The buyer's browser came back from checkout. Untrusted; the
    /// processor is asked directly before anything is mutated.
    ClientVerify,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub order: Order,
    /// True when this call moved the order to paid; false on a replay or
    /// when the processor has not confirmed the payment yet.
    pub newly_confirmed: bool,
    pub entitlements: EntitlementSummary,
    /// The processor's own payment status, reported when a client verify
    /// found the session unpaid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor_status: Option<String>,
}

#[derive(Clone)]
pub struct Reconciler {
    pool: PgPool,
    gateway: Option<Arc<dyn PaymentGateway>>,
}

impl Reconciler {
    pub fn new(pool: PgPool, gateway: Option<Arc<dyn PaymentGateway>>) -> Self {
        Self { pool, gateway }
    }

    fn gateway(&self) -> Result<&dyn PaymentGateway, DomainError> {
        self.gateway
            .as_deref()
            .ok_or_else(|| DomainError::Retryable("payment processor not configured".to_string()))
    }

    pub async fn reconcile(
        &self,
        order_id: Uuid,
        trigger: ReconcileTrigger,
    ) -> Result<ReconcileOutcome, DomainError> {
        match trigger {
            ReconcileTrigger::WebhookEvent { payment_intent_id } => {
                self.finalize(order_id, payment_intent_id).await
            }
            ReconcileTrigger::ClientVerify => self.verify_then_finalize(order_id).await,
        }
    }

    /// Confirm a zero-amount order without touching the processor. Free
    /// orders go through the same finalize path so they pick up the same
    /// entitlements and audit record as paid ones.
    pub async fn confirm_free(&self, order_id: Uuid) -> Result<ReconcileOutcome, DomainError> {
        let orders_repo = OrdersRepository::new(self.pool.clone());
        let order = orders_repo
            .get_by_id(order_id)
            .await?
            .ok_or(DomainError::NotFound("order"))?;

        if order.amount_cents != 0 {
            return Err(DomainError::Conflict(
                "order is not free of charge".to_string(),
            ));
        }

        self.finalize(order_id, None).await
    }

    async fn verify_then_finalize(&self, order_id: Uuid) -> Result<ReconcileOutcome, DomainError> {
        let orders_repo = OrdersRepository::new(self.pool.clone());
        let order = orders_repo
            .get_by_id(order_id)
            .await?
            .ok_or(DomainError::NotFound("order"))?;

        // A replay after the webhook already won needs no gateway call.
        if order.status == OrderStatus::Paid {
            return self.finalize(order_id, order.stripe_payment_intent_id).await;
        }

        let session_id = order
            .stripe_session_id
            .clone()
            .ok_or(DomainError::Conflict("order has no checkout session".to_string()))?;

        let status = self.gateway()?.retrieve_session(&session_id).await?;

        if !status.paid {
            info!(
                order_id = %order_id,
                processor_status = %status.status,
                "Verify: processor reports payment not completed"
            );
            metrics::counter!("reconcile.verify.unpaid").increment(1);
            return Ok(ReconcileOutcome {
                order,
                newly_confirmed: false,
                entitlements: EntitlementSummary::default(),
                processor_status: Some(status.status),
            });
        }

        self.finalize(order_id, status.payment_intent_id).await
    }

    /// The single write path for a confirmed payment. Locks the order,
    /// flips it to paid, issues entitlements, and appends the audit row.
    /// Safe to call any number of times for the same order.
    async fn finalize(
        &self,
        order_id: Uuid,
        payment_intent_id: Option<String>,
    ) -> Result<ReconcileOutcome, DomainError> {
        let pool = self.pool.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(DomainError::from)?;

            conn.transaction::<ReconcileOutcome, DomainError, _>(|conn| {
                let order: OrderModel =
                    orders_repo::mark_paid_on_conn(conn, order_id, payment_intent_id.as_deref())?;

                let kind = payment_kind_for(conn, &order)?;
                let payment = payments_repo::record_on_conn(
                    conn,
                    &NewPayment {
                        user_id: order.user_id,
                        order_id: Some(order.id),
                        kind,
                        amount_cents: order.amount_cents,
                        currency: "eur".to_string(),
                        status: "succeeded".to_string(),
                        stripe_payment_intent_id: order.stripe_payment_intent_id.clone(),
                        metadata: serde_json::json!({
                            "order_kind": order.kind,
                            "quantity": order.quantity,
                        }),
                    },
                )?;

                // The payment row doubles as the first-confirmation marker:
                // entitlements are granted only by the call that inserted it.
                // A replay reads back what the winning call granted.
                let entitlements = if payment.is_some() {
                    entitlements::issue_for_order(conn, &order)?
                } else {
                    entitlements::existing_for_order(conn, &order)?
                };

                Ok(ReconcileOutcome {
                    order: Order::from(order),
                    newly_confirmed: payment.is_some(),
                    entitlements,
                    processor_status: None,
                })
            })
        })
        .await??;

        if outcome.newly_confirmed {
            info!(order_id = %order_id, "Order confirmed and entitlements issued");
            metrics::counter!("reconcile.confirmed").increment(1);
        } else {
            warn!(order_id = %order_id, "Replayed confirmation for already-paid order");
            metrics::counter!("reconcile.replayed").increment(1);
        }

        Ok(outcome)
    }
}

fn payment_kind_for(
    conn: &mut PgConnection,
    order: &OrderModel,
) -> Result<PaymentKind, DomainError> {
    use crate::schema::products::dsl;

    match order.kind {
        OrderKind::Event => Ok(PaymentKind::Event),
        OrderKind::Product => {
            let product_id = order.product_id.ok_or(DomainError::NotFound("product"))?;
            let category: ProductCategory = dsl::products
                .filter(dsl::id.eq(product_id))
                .select(dsl::category)
                .first(conn)?;
            match category {
                ProductCategory::Subscription => Ok(PaymentKind::Subscription),
                _ => Ok(PaymentKind::Product),
            }
        }
    }
}
