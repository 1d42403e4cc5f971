use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::memberships::{Membership, MembershipModel, MembershipStatus};
use crate::web::PgPool;

#[derive(Clone)]
pub struct MembershipsRepository {
    pool: PgPool,
}

impl MembershipsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a user's membership
    pub async fn get_by_user_id(&self, user_id: Uuid) -> Result<Option<Membership>> {
        use crate::schema::memberships::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let membership: Option<MembershipModel> = dsl::memberships
                .filter(dsl::user_id.eq(user_id))
                .first::<MembershipModel>(&mut conn)
                .optional()?;

            Ok::<Option<MembershipModel>, anyhow::Error>(membership)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Find a membership by Stripe customer id (subscription webhooks key
    /// on the customer, not our user id)
    pub async fn get_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<Membership>> {
        use crate::schema::memberships::dsl;

        let pool = self.pool.clone();
        let stripe_customer_id = stripe_customer_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let membership: Option<MembershipModel> = dsl::memberships
                .filter(dsl::stripe_customer_id.eq(&stripe_customer_id))
                .first::<MembershipModel>(&mut conn)
                .optional()?;

            Ok::<Option<MembershipModel>, anyhow::Error>(membership)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Update subscription state reported by Stripe
    pub async fn update_subscription_state(
        &self,
        membership_id: Uuid,
        status: MembershipStatus,
        stripe_subscription_id: Option<&str>,
        current_period_end: Option<DateTime<Utc>>,
    ) -> Result<Membership> {
        use crate::schema::memberships::dsl;

        let pool = self.pool.clone();
        let stripe_subscription_id = stripe_subscription_id.map(|s| s.to_string());
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: MembershipModel =
                diesel::update(dsl::memberships.filter(dsl::id.eq(membership_id)))
                    .set((
                        dsl::status.eq(status),
                        dsl::stripe_subscription_id.eq(stripe_subscription_id),
                        dsl::current_period_end.eq(current_period_end),
                    ))
                    .get_result(&mut conn)?;

            Ok::<MembershipModel, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.into())
    }

    /// Count active memberships
    pub async fn count_active(&self) -> Result<i64> {
        use crate::schema::memberships::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let count: i64 = dsl::memberships
                .filter(dsl::status.eq(MembershipStatus::Active))
                .count()
                .get_result(&mut conn)?;

            Ok::<i64, anyhow::Error>(count)
        })
        .await??;

        Ok(result)
    }
}

/// Connection-level activation upsert used by the entitlement issuance
/// transaction. One row per user: a renewal replaces plan and period end
/// rather than inserting a second row.
pub fn activate_on_conn(
    conn: &mut PgConnection,
    user_id: Uuid,
    plan: &str,
    current_period_end: DateTime<Utc>,
) -> Result<MembershipModel, diesel::result::Error> {
    use crate::schema::memberships::dsl;

    diesel::insert_into(dsl::memberships)
        .values((
            dsl::user_id.eq(user_id),
            dsl::status.eq(MembershipStatus::Active),
            dsl::plan.eq(plan),
            dsl::current_period_end.eq(current_period_end),
        ))
        .on_conflict(dsl::user_id)
        .do_update()
        .set((
            dsl::status.eq(MembershipStatus::Active),
            dsl::plan.eq(plan),
            dsl::current_period_end.eq(current_period_end),
        ))
        .get_result(conn)
}
