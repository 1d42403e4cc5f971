use anyhow::Result;
use diesel::prelude::*;
use uuid::Uuid;

use crate::payments::{NewPayment, Payment, PaymentModel};
use crate::web::PgPool;

#[derive(Clone)]
pub struct PaymentsRepository {
    pool: PgPool,
}

impl PaymentsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a payment by ID
    pub async fn get_by_id(&self, payment_id: Uuid) -> Result<Option<Payment>> {
        use crate::schema::payments::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let payment: Option<PaymentModel> = dsl::payments
                .filter(dsl::id.eq(payment_id))
                .first::<PaymentModel>(&mut conn)
                .optional()?;

            Ok::<Option<PaymentModel>, anyhow::Error>(payment)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Get payments for a specific user, newest first
    pub async fn get_by_user_id(&self, user_id: Uuid) -> Result<Vec<Payment>> {
        use crate::schema::payments::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let payments: Vec<PaymentModel> = dsl::payments
                .filter(dsl::user_id.eq(user_id))
                .order_by(dsl::created_at.desc())
                .load::<PaymentModel>(&mut conn)?;

            Ok::<Vec<PaymentModel>, anyhow::Error>(payments)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// Get the audit row for an order, if recorded
    pub async fn get_by_order_id(&self, order_id: Uuid) -> Result<Option<Payment>> {
        use crate::schema::payments::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let payment: Option<PaymentModel> = dsl::payments
                .filter(dsl::order_id.eq(order_id))
                .first::<PaymentModel>(&mut conn)
                .optional()?;

            Ok::<Option<PaymentModel>, anyhow::Error>(payment)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// List all payments, newest first (admin)
    pub async fn list(&self, limit: i64) -> Result<Vec<Payment>> {
        use crate::schema::payments::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let payments: Vec<PaymentModel> = dsl::payments
                .order_by(dsl::created_at.desc())
                .limit(limit)
                .load::<PaymentModel>(&mut conn)?;

            Ok::<Vec<PaymentModel>, anyhow::Error>(payments)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// Total confirmed revenue in cents
    pub async fn total_amount_cents(&self) -> Result<i64> {
        use crate::schema::payments::dsl;
        use diesel::dsl::sum;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let total: Option<i64> = dsl::payments
                .select(sum(dsl::amount_cents))
                .get_result::<Option<i64>>(&mut conn)?;

            Ok::<i64, anyhow::Error>(total.unwrap_or(0))
        })
        .await??;

        Ok(result)
    }
}

/// Connection-level insert used by the entitlement issuance transaction.
/// The unique constraint on order_id makes replays insert nothing.
pub fn record_on_conn(
    conn: &mut PgConnection,
    new_payment: &NewPayment,
) -> Result<Option<PaymentModel>, diesel::result::Error> {
    use crate::schema::payments::dsl;

    diesel::insert_into(dsl::payments)
        .values(new_payment)
        .on_conflict(dsl::order_id)
        .do_nothing()
        .get_result(conn)
        .optional()
}
