mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::TestDatabase;
use serial_test::serial;
use uuid::Uuid;

use artpero::errors::DomainError;
use artpero::events::{EventStatus, NewEvent};
use artpero::events_repo::EventsRepository;
use artpero::memberships::MembershipStatus;
use artpero::memberships_repo::MembershipsRepository;
use artpero::orders::{Order, OrderStatus};
use artpero::orders_repo::OrdersRepository;
use artpero::payment_gateway::{
    CheckoutRequest, CheckoutSessionInfo, PaymentGateway, SessionStatus,
};
use artpero::payments_repo::PaymentsRepository;
use artpero::products::{NewProduct, Product, ProductCategory};
use artpero::products_repo::ProductsRepository;
use artpero::reconciler::{ReconcileTrigger, Reconciler};
use artpero::tickets_repo::TicketsRepository;
use artpero::users::User;
use artpero::users_repo::UsersRepository;
use artpero::web::PgPool;

/// Gateway double: answers with a configurable payment status and counts
/// how often the processor is actually asked.
struct MockGateway {
    paid: AtomicBool,
    retrieve_calls: AtomicUsize,
}

impl MockGateway {
    fn new(paid: bool) -> Arc<Self> {
        Arc::new(Self {
            paid: AtomicBool::new(paid),
            retrieve_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_checkout_session(
        &self,
        _request: CheckoutRequest,
    ) -> Result<CheckoutSessionInfo, DomainError> {
        Ok(CheckoutSessionInfo {
            session_id: format!("cs_test_{}", Uuid::new_v4().simple()),
            url: "https://checkout.test/session".to_string(),
        })
    }

    async fn retrieve_session(&self, _session_id: &str) -> Result<SessionStatus, DomainError> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        let paid = self.paid.load(Ordering::SeqCst);
        Ok(SessionStatus {
            paid,
            status: if paid { "paid" } else { "unpaid" }.to_string(),
            payment_intent_id: Some("pi_test_1".to_string()),
            amount_total_cents: None,
        })
    }
}

async fn setup_test_db() -> TestDatabase {
    TestDatabase::new()
        .await
        .expect("Failed to create test database")
}

async fn create_user(pool: &PgPool, email: &str) -> User {
    UsersRepository::new(pool.clone())
        .create(email, "hunter2hunter2", "Test", "User")
        .await
        .expect("Failed to create user")
}

async fn create_event(
    pool: &PgPool,
    slug: &str,
    price_cents: i32,
    capacity: Option<i32>,
) -> artpero::events::Event {
    EventsRepository::new(pool.clone())
        .create(NewEvent {
            title: format!("Event {}", slug),
            slug: slug.to_string(),
            description: None,
            location: Some("Main hall".to_string()),
            starts_at: Utc::now() + Duration::days(14),
            ends_at: None,
            capacity,
            members_only: false,
            price_cents,
            status: EventStatus::Published,
            image_url: None,
        })
        .await
        .expect("Failed to create event")
}

async fn create_product(
    pool: &PgPool,
    slug: &str,
    category: ProductCategory,
    price_cents: i32,
    duration_months: Option<i32>,
    validity_months: Option<i32>,
) -> Product {
    ProductsRepository::new(pool.clone())
        .create(NewProduct {
            name: format!("Product {}", slug),
            slug: slug.to_string(),
            description: None,
            category,
            price_cents,
            duration_months,
            events_included: None,
            validity_months,
            is_active: true,
        })
        .await
        .expect("Failed to create product")
}

async fn pending_event_order(pool: &PgPool, user: &User, event_id: Uuid, quantity: i32) -> Order {
    let orders_repo = OrdersRepository::new(pool.clone());
    let order = orders_repo
        .create_event_order(user.id, event_id, quantity)
        .await
        .expect("Failed to create order");
    orders_repo
        .attach_stripe_session(order.id, &format!("cs_test_{}", Uuid::new_v4().simple()))
        .await
        .expect("Failed to attach session")
}

#[tokio::test]
#[serial]
async fn test_webhook_confirms_order_and_issues_tickets_once() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();

    let user = create_user(&pool, "alice@example.com").await;
    let event = create_event(&pool, "vernissage", 2000, Some(50)).await;
    let order = pending_event_order(&pool, &user, event.id, 2).await;

    let gateway = MockGateway::new(true);
    let reconciler = Reconciler::new(pool.clone(), Some(gateway.clone()));

    let outcome = reconciler
        .reconcile(
            order.id,
            ReconcileTrigger::WebhookEvent {
                payment_intent_id: Some("pi_test_1".to_string()),
            },
        )
        .await
        .expect("Reconcile failed");

    assert!(outcome.newly_confirmed);
    assert_eq!(outcome.order.status, OrderStatus::Paid);
    assert_eq!(outcome.entitlements.tickets.len(), 2);

    let tickets = TicketsRepository::new(pool.clone())
        .list_by_order(order.id)
        .await
        .unwrap();
    assert_eq!(tickets.len(), 2);
    for ticket in &tickets {
        assert_eq!(ticket.ticket_code.len(), 8);
        assert!(!ticket.used);
    }

    let payment = PaymentsRepository::new(pool.clone())
        .get_by_order_id(order.id)
        .await
        .unwrap()
        .expect("Payment record missing");
    assert_eq!(payment.amount_cents, 4000);

    // Redelivered webhook: same event again must be a no-op replay
    let replay = reconciler
        .reconcile(
            order.id,
            ReconcileTrigger::WebhookEvent {
                payment_intent_id: Some("pi_test_1".to_string()),
            },
        )
        .await
        .expect("Replay reconcile failed");

    assert!(!replay.newly_confirmed);
    assert_eq!(replay.order.status, OrderStatus::Paid);

    let tickets_after = TicketsRepository::new(pool.clone())
        .list_by_order(order.id)
        .await
        .unwrap();
    assert_eq!(tickets_after.len(), 2);
    let codes: Vec<_> = tickets.iter().map(|t| &t.ticket_code).collect();
    let codes_after: Vec<_> = tickets_after.iter().map(|t| &t.ticket_code).collect();
    assert_eq!(codes, codes_after);
}

#[tokio::test]
#[serial]
async fn test_client_verify_unpaid_session_leaves_order_untouched() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();

    let user = create_user(&pool, "bob@example.com").await;
    let event = create_event(&pool, "workshop", 1500, None).await;
    let order = pending_event_order(&pool, &user, event.id, 1).await;

    let gateway = MockGateway::new(false);
    let reconciler = Reconciler::new(pool.clone(), Some(gateway.clone()));

    let outcome = reconciler
        .reconcile(order.id, ReconcileTrigger::ClientVerify)
        .await
        .expect("Verify failed");

    assert!(!outcome.newly_confirmed);
    assert_eq!(outcome.order.status, OrderStatus::Pending);
    assert_eq!(outcome.processor_status.as_deref(), Some("unpaid"));
    assert_eq!(gateway.retrieve_calls.load(Ordering::SeqCst), 1);

    // No entitlements before the processor vouches for the money
    let tickets = TicketsRepository::new(pool.clone())
        .list_by_order(order.id)
        .await
        .unwrap();
    assert!(tickets.is_empty());
    let payment = PaymentsRepository::new(pool.clone())
        .get_by_order_id(order.id)
        .await
        .unwrap();
    assert!(payment.is_none());
}

#[tokio::test]
#[serial]
async fn test_client_verify_after_webhook_skips_gateway() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();

    let user = create_user(&pool, "carol@example.com").await;
    let event = create_event(&pool, "concert", 3000, None).await;
    let order = pending_event_order(&pool, &user, event.id, 1).await;

    let gateway = MockGateway::new(true);
    let reconciler = Reconciler::new(pool.clone(), Some(gateway.clone()));

    reconciler
        .reconcile(
            order.id,
            ReconcileTrigger::WebhookEvent {
                payment_intent_id: Some("pi_test_2".to_string()),
            },
        )
        .await
        .expect("Webhook reconcile failed");

    let outcome = reconciler
        .reconcile(order.id, ReconcileTrigger::ClientVerify)
        .await
        .expect("Verify failed");

    assert!(!outcome.newly_confirmed);
    assert_eq!(outcome.order.status, OrderStatus::Paid);
    // Already paid locally, no processor round trip needed
    assert_eq!(gateway.retrieve_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[serial]
async fn test_racing_confirmations_issue_entitlements_once() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();

    let user = create_user(&pool, "dave@example.com").await;
    let event = create_event(&pool, "opening-night", 2500, None).await;
    let order = pending_event_order(&pool, &user, event.id, 3).await;

    let gateway = MockGateway::new(true);
    let reconciler = Reconciler::new(pool.clone(), Some(gateway.clone()));

    // Webhook delivery and client verify land at the same time
    let webhook = reconciler.reconcile(
        order.id,
        ReconcileTrigger::WebhookEvent {
            payment_intent_id: Some("pi_test_3".to_string()),
        },
    );
    let verify = reconciler.reconcile(order.id, ReconcileTrigger::ClientVerify);

    let (webhook_outcome, verify_outcome) = tokio::join!(webhook, verify);
    let webhook_outcome = webhook_outcome.expect("Webhook reconcile failed");
    let verify_outcome = verify_outcome.expect("Verify reconcile failed");

    assert!(
        webhook_outcome.newly_confirmed != verify_outcome.newly_confirmed,
        "exactly one path must win the confirmation"
    );

    let tickets = TicketsRepository::new(pool.clone())
        .list_by_order(order.id)
        .await
        .unwrap();
    assert_eq!(tickets.len(), 3);

    let payment = PaymentsRepository::new(pool.clone())
        .get_by_order_id(order.id)
        .await
        .unwrap();
    assert!(payment.is_some());
}

#[tokio::test]
#[serial]
async fn test_free_event_confirms_without_gateway() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();

    let user = create_user(&pool, "erin@example.com").await;
    let event = create_event(&pool, "open-studio", 0, Some(30)).await;

    let order = OrdersRepository::new(pool.clone())
        .create_event_order(user.id, event.id, 1)
        .await
        .expect("Failed to create order");

    // No gateway configured at all
    let reconciler = Reconciler::new(pool.clone(), None);
    let outcome = reconciler
        .confirm_free(order.id)
        .await
        .expect("Free confirmation failed");

    assert!(outcome.newly_confirmed);
    assert_eq!(outcome.order.status, OrderStatus::Paid);
    assert_eq!(outcome.entitlements.tickets.len(), 1);

    let payment = PaymentsRepository::new(pool.clone())
        .get_by_order_id(order.id)
        .await
        .unwrap()
        .expect("Payment record missing");
    assert_eq!(payment.amount_cents, 0);
}

#[tokio::test]
#[serial]
async fn test_confirm_free_rejects_priced_order() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();

    let user = create_user(&pool, "frank@example.com").await;
    let event = create_event(&pool, "gala", 5000, None).await;
    let order = pending_event_order(&pool, &user, event.id, 1).await;

    let reconciler = Reconciler::new(pool.clone(), None);
    let result = reconciler.confirm_free(order.id).await;

    assert!(matches!(result, Err(DomainError::Conflict(_))));
}

#[tokio::test]
#[serial]
async fn test_gift_card_code_minted_once_and_stable() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();

    let user = create_user(&pool, "grace@example.com").await;
    let product = create_product(&pool, "gift-50", ProductCategory::GiftCard, 5000, None, Some(6))
        .await;

    let orders_repo = OrdersRepository::new(pool.clone());
    let order = orders_repo
        .create_product_order(
            user.id,
            product.id,
            1,
            Some("Heidi".to_string()),
            Some("heidi@example.com".to_string()),
        )
        .await
        .expect("Failed to create order");
    orders_repo
        .attach_stripe_session(order.id, "cs_test_gift")
        .await
        .expect("Failed to attach session");

    let gateway = MockGateway::new(true);
    let reconciler = Reconciler::new(pool.clone(), Some(gateway));

    let outcome = reconciler
        .reconcile(
            order.id,
            ReconcileTrigger::WebhookEvent {
                payment_intent_id: Some("pi_test_gift".to_string()),
            },
        )
        .await
        .expect("Reconcile failed");

    let code = outcome.entitlements.gift_code.expect("No gift code minted");
    assert!(code.starts_with("ART-"));
    assert_eq!(code.len(), 12);
    let suffix = &code[4..];
    assert!(suffix
        .bytes()
        .all(|b| b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789".contains(&b)));

    let stored = orders_repo.get_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.gift_code.as_deref(), Some(code.as_str()));
    assert!(stored.gift_expires_at.is_some());

    // Replay keeps the already-minted code
    let replay = reconciler
        .reconcile(
            order.id,
            ReconcileTrigger::WebhookEvent {
                payment_intent_id: Some("pi_test_gift".to_string()),
            },
        )
        .await
        .expect("Replay failed");
    assert_eq!(replay.entitlements.gift_code.as_deref(), Some(code.as_str()));
}

#[tokio::test]
#[serial]
async fn test_membership_activation_and_renewal_resets_period() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();

    let user = create_user(&pool, "ivan@example.com").await;
    let product = create_product(
        &pool,
        "quarterly",
        ProductCategory::Subscription,
        4500,
        Some(3),
        None,
    )
    .await;

    let orders_repo = OrdersRepository::new(pool.clone());
    let memberships_repo = MembershipsRepository::new(pool.clone());
    let gateway = MockGateway::new(true);
    let reconciler = Reconciler::new(pool.clone(), Some(gateway));

    let first = orders_repo
        .create_product_order(user.id, product.id, 1, None, None)
        .await
        .unwrap();
    reconciler
        .reconcile(
            first.id,
            ReconcileTrigger::WebhookEvent {
                payment_intent_id: Some("pi_sub_1".to_string()),
            },
        )
        .await
        .expect("First reconcile failed");

    let membership = memberships_repo
        .get_by_user_id(user.id)
        .await
        .unwrap()
        .expect("Membership missing");
    assert_eq!(membership.status, MembershipStatus::Active);
    assert_eq!(membership.plan.as_deref(), Some("quarterly"));
    let first_period_end = membership.current_period_end.expect("No period end");
    assert!(first_period_end > Utc::now() + Duration::days(85));

    // Renewal: a second paid order restarts the period from now
    let second = orders_repo
        .create_product_order(user.id, product.id, 1, None, None)
        .await
        .unwrap();
    reconciler
        .reconcile(
            second.id,
            ReconcileTrigger::WebhookEvent {
                payment_intent_id: Some("pi_sub_2".to_string()),
            },
        )
        .await
        .expect("Second reconcile failed");

    let renewed = memberships_repo
        .get_by_user_id(user.id)
        .await
        .unwrap()
        .expect("Membership missing after renewal");
    assert_eq!(renewed.id, membership.id, "renewal must reuse the row");
    assert!(renewed.current_period_end.expect("No period end") >= first_period_end);
}

#[tokio::test]
#[serial]
async fn test_replayed_subscription_confirmation_keeps_period_end() {
    let test_db = setup_test_db().await;
    let pool = test_db.pool();

    let user = create_user(&pool, "judy@example.com").await;
    let product = create_product(
        &pool,
        "yearly",
        ProductCategory::Subscription,
        12000,
        Some(12),
        None,
    )
    .await;

    let orders_repo = OrdersRepository::new(pool.clone());
    let memberships_repo = MembershipsRepository::new(pool.clone());
    let gateway = MockGateway::new(true);
    let reconciler = Reconciler::new(pool.clone(), Some(gateway));

    let order = orders_repo
        .create_product_order(user.id, product.id, 1, None, None)
        .await
        .unwrap();
    let confirmed = reconciler
        .reconcile(
            order.id,
            ReconcileTrigger::WebhookEvent {
                payment_intent_id: Some("pi_sub_replay".to_string()),
            },
        )
        .await
        .expect("First reconcile failed");
    assert!(confirmed.newly_confirmed);

    let period_end = memberships_repo
        .get_by_user_id(user.id)
        .await
        .unwrap()
        .expect("Membership missing")
        .current_period_end
        .expect("No period end");

    // A redelivered webhook later must not restart the period clock
    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;

    let replayed = reconciler
        .reconcile(
            order.id,
            ReconcileTrigger::WebhookEvent {
                payment_intent_id: Some("pi_sub_replay".to_string()),
            },
        )
        .await
        .expect("Replay reconcile failed");
    assert!(!replayed.newly_confirmed);
    assert_eq!(replayed.entitlements.membership_period_end, Some(period_end));

    let after_replay = memberships_repo
        .get_by_user_id(user.id)
        .await
        .unwrap()
        .expect("Membership missing after replay")
        .current_period_end
        .expect("No period end after replay");
    assert_eq!(after_replay, period_end);
}
