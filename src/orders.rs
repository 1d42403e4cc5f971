use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::OrderKind")]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    #[db_enum(rename = "event")]
    Event,
    #[db_enum(rename = "product")]
    Product,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::OrderStatus")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[db_enum(rename = "pending")]
    Pending,
    #[db_enum(rename = "paid")]
    Paid,
    #[db_enum(rename = "failed")]
    Failed,
    #[db_enum(rename = "canceled")]
    Canceled,
}

impl OrderStatus {
    /// Status only ever moves forward: `Pending` may become any terminal
    /// status, terminal statuses never change again.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        match self {
            OrderStatus::Pending => true,
            // Re-applying the same terminal status is a no-op, not a
            // transition; anything else is a regression.
            _ => self == next,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// API model for orders (event registrations and product purchases share
/// one lifecycle)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: OrderKind,
    pub event_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub quantity: i32,
    pub amount_cents: i32,
    pub status: OrderStatus,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub gift_code: Option<String>,
    pub gift_code_used: bool,
    pub gift_expires_at: Option<DateTime<Utc>>,
    pub recipient_name: Option<String>,
    pub recipient_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Diesel model for the orders table
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderModel {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: OrderKind,
    pub event_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub quantity: i32,
    pub amount_cents: i32,
    pub status: OrderStatus,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub gift_code: Option<String>,
    pub gift_code_used: bool,
    pub gift_expires_at: Option<DateTime<Utc>>,
    pub recipient_name: Option<String>,
    pub recipient_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert model for new orders
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewOrder {
    pub user_id: Uuid,
    pub kind: OrderKind,
    pub event_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub quantity: i32,
    pub amount_cents: i32,
    pub status: OrderStatus,
    pub recipient_name: Option<String>,
    pub recipient_email: Option<String>,
}

impl From<OrderModel> for Order {
    fn from(model: OrderModel) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            kind: model.kind,
            event_id: model.event_id,
            product_id: model.product_id,
            quantity: model.quantity,
            amount_cents: model.amount_cents,
            status: model.status,
            stripe_session_id: model.stripe_session_id,
            stripe_payment_intent_id: model.stripe_payment_intent_id,
            gift_code: model.gift_code,
            gift_code_used: model.gift_code_used,
            gift_expires_at: model.gift_expires_at,
            recipient_name: model.recipient_name,
            recipient_email: model.recipient_email,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_can_reach_any_status() {
        for next in [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Failed,
            OrderStatus::Canceled,
        ] {
            assert!(OrderStatus::Pending.can_transition_to(next));
        }
    }

    #[test]
    fn test_terminal_statuses_never_regress() {
        for terminal in [OrderStatus::Paid, OrderStatus::Failed, OrderStatus::Canceled] {
            assert!(terminal.is_terminal());
            assert!(terminal.can_transition_to(terminal));
            assert!(!terminal.can_transition_to(OrderStatus::Pending));
        }
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Failed));
        assert!(!OrderStatus::Failed.can_transition_to(OrderStatus::Paid));
    }
}
