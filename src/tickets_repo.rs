use anyhow::Result;
use diesel::prelude::*;
use uuid::Uuid;

use crate::tickets::{Ticket, TicketModel};
use crate::web::PgPool;

#[derive(Clone)]
pub struct TicketsRepository {
    pool: PgPool,
}

impl TicketsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List a user's tickets, newest first
    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Ticket>> {
        use crate::schema::tickets::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let tickets: Vec<TicketModel> = dsl::tickets
                .filter(dsl::user_id.eq(user_id))
                .order_by(dsl::created_at.desc())
                .load::<TicketModel>(&mut conn)?;

            Ok::<Vec<TicketModel>, anyhow::Error>(tickets)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// List tickets issued for an order
    pub async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<Ticket>> {
        use crate::schema::tickets::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let tickets: Vec<TicketModel> = dsl::tickets
                .filter(dsl::order_id.eq(order_id))
                .order_by(dsl::created_at.asc())
                .load::<TicketModel>(&mut conn)?;

            Ok::<Vec<TicketModel>, anyhow::Error>(tickets)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// Count tickets issued for an order
    pub async fn count_by_order(&self, order_id: Uuid) -> Result<i64> {
        use crate::schema::tickets::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let count: i64 = dsl::tickets
                .filter(dsl::order_id.eq(order_id))
                .count()
                .get_result(&mut conn)?;

            Ok::<i64, anyhow::Error>(count)
        })
        .await??;

        Ok(result)
    }

    /// Mark a ticket as used at the door. Returns false if the ticket was
    /// already used or does not exist.
    pub async fn mark_used(&self, ticket_code: &str) -> Result<bool> {
        use crate::schema::tickets::dsl;

        let pool = self.pool.clone();
        let ticket_code = ticket_code.trim().to_uppercase();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated = diesel::update(
                dsl::tickets
                    .filter(dsl::ticket_code.eq(&ticket_code))
                    .filter(dsl::used.eq(false)),
            )
            .set(dsl::used.eq(true))
            .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(updated)
        })
        .await??;

        Ok(result > 0)
    }
}
