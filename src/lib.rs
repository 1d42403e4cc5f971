//! Membership and event-ticketing backend for an art space.
//!
//! Orders are the ledger: every purchase (event seat, subscription, gift
//! card) becomes an order that checkout moves from pending to paid, and the
//! reconciler turns paid orders into entitlements exactly once.

pub mod actions;
pub mod auth;
pub mod commands;
pub mod entitlements;
pub mod errors;
pub mod events;
pub mod events_repo;
pub mod memberships;
pub mod memberships_repo;
pub mod messages;
pub mod messages_repo;
pub mod metrics;
pub mod orders;
pub mod orders_repo;
pub mod payment_gateway;
pub mod payments;
pub mod payments_repo;
pub mod products;
pub mod products_repo;
pub mod reconciler;
pub mod schema;
pub mod stripe_client;
pub mod stripe_webhooks;
pub mod stripe_webhooks_repo;
pub mod tickets;
pub mod tickets_repo;
pub mod users;
pub mod users_repo;
pub mod web;
