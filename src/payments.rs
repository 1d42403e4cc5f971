use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::PaymentKind")]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    #[db_enum(rename = "subscription")]
    Subscription,
    #[db_enum(rename = "event")]
    Event,
    #[db_enum(rename = "product")]
    Product,
}

/// API model for the payment audit ledger. Rows are append-only and never
/// updated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub kind: PaymentKind,
    pub amount_cents: i32,
    pub currency: String,
    pub status: String,
    pub stripe_payment_intent_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Diesel model for the payments table
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PaymentModel {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub kind: PaymentKind,
    pub amount_cents: i32,
    pub currency: String,
    pub status: String,
    pub stripe_payment_intent_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Insert model for new payments
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewPayment {
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub kind: PaymentKind,
    pub amount_cents: i32,
    pub currency: String,
    pub status: String,
    pub stripe_payment_intent_id: Option<String>,
    pub metadata: serde_json::Value,
}

impl From<PaymentModel> for Payment {
    fn from(model: PaymentModel) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            order_id: model.order_id,
            kind: model.kind,
            amount_cents: model.amount_cents,
            currency: model.currency,
            status: model.status,
            stripe_payment_intent_id: model.stripe_payment_intent_id,
            metadata: model.metadata,
            created_at: model.created_at,
        }
    }
}
