use anyhow::Result;
use diesel::prelude::*;
use uuid::Uuid;

use crate::events::{Event, EventChanges, EventModel, EventStatus, NewEvent};
use crate::orders::OrderStatus;
use crate::web::PgPool;

#[derive(Clone)]
pub struct EventsRepository {
    pool: PgPool,
}

impl EventsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get an event by ID
    pub async fn get_by_id(&self, event_id: Uuid) -> Result<Option<Event>> {
        use crate::schema::events::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let event: Option<EventModel> = dsl::events
                .filter(dsl::id.eq(event_id))
                .first::<EventModel>(&mut conn)
                .optional()?;

            Ok::<Option<EventModel>, anyhow::Error>(event)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Get an event by slug
    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Event>> {
        use crate::schema::events::dsl;

        let pool = self.pool.clone();
        let slug = slug.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let event: Option<EventModel> = dsl::events
                .filter(dsl::slug.eq(&slug))
                .first::<EventModel>(&mut conn)
                .optional()?;

            Ok::<Option<EventModel>, anyhow::Error>(event)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// List events ordered by start date. Non-admin callers only see
    /// published events.
    pub async fn list(&self, include_unpublished: bool) -> Result<Vec<Event>> {
        use crate::schema::events::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let query = dsl::events.order_by(dsl::starts_at.asc()).into_boxed();
            let query = if include_unpublished {
                query
            } else {
                query.filter(dsl::status.eq(EventStatus::Published))
            };

            let events: Vec<EventModel> = query.load::<EventModel>(&mut conn)?;

            Ok::<Vec<EventModel>, anyhow::Error>(events)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// Count paid registration seats for an event (sum of order quantities)
    pub async fn paid_seat_count(&self, event_id: Uuid) -> Result<i64> {
        use crate::schema::orders::dsl;
        use diesel::dsl::sum;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let total: Option<i64> = dsl::orders
                .filter(dsl::event_id.eq(event_id))
                .filter(dsl::status.eq(OrderStatus::Paid))
                .select(sum(dsl::quantity))
                .get_result::<Option<i64>>(&mut conn)?;

            Ok::<i64, anyhow::Error>(total.unwrap_or(0))
        })
        .await??;

        Ok(result)
    }

    /// Create a new event
    pub async fn create(&self, new_event: NewEvent) -> Result<Event> {
        use crate::schema::events::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let inserted: EventModel = diesel::insert_into(dsl::events)
                .values(&new_event)
                .get_result(&mut conn)?;

            Ok::<EventModel, anyhow::Error>(inserted)
        })
        .await??;

        Ok(result.into())
    }

    /// Apply partial changes to an event
    pub async fn update(&self, event_id: Uuid, changes: EventChanges) -> Result<Option<Event>> {
        use crate::schema::events::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<EventModel> = diesel::update(dsl::events.filter(dsl::id.eq(event_id)))
                .set(&changes)
                .get_result(&mut conn)
                .optional()?;

            Ok::<Option<EventModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Delete an event. Fails if orders or tickets reference it.
    pub async fn delete(&self, event_id: Uuid) -> Result<bool> {
        use crate::schema::events::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let deleted = diesel::delete(dsl::events.filter(dsl::id.eq(event_id)))
                .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(deleted)
        })
        .await??;

        Ok(result > 0)
    }
}
