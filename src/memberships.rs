use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::MembershipStatus")]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    #[db_enum(rename = "none")]
    None,
    #[db_enum(rename = "active")]
    Active,
    #[db_enum(rename = "canceled")]
    Canceled,
    #[db_enum(rename = "past_due")]
    PastDue,
}

/// API model for memberships. One row per user; re-subscribing updates
/// the row instead of inserting a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: MembershipStatus,
    pub plan: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Diesel model for the memberships table
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::memberships)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MembershipModel {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: MembershipStatus,
    pub plan: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert model for new memberships
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::memberships)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewMembership {
    pub user_id: Uuid,
    pub status: MembershipStatus,
    pub plan: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
}

impl From<MembershipModel> for Membership {
    fn from(model: MembershipModel) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            status: model.status,
            plan: model.plan,
            stripe_customer_id: model.stripe_customer_id,
            stripe_subscription_id: model.stripe_subscription_id,
            current_period_end: model.current_period_end,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}
