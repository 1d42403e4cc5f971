use anyhow::Result;
use diesel::prelude::*;
use uuid::Uuid;

use crate::messages::{ContactMessage, ContactMessageModel, NewContactMessage};
use crate::web::PgPool;

#[derive(Clone)]
pub struct MessagesRepository {
    pool: PgPool,
}

impl MessagesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new_message: NewContactMessage) -> Result<ContactMessage> {
        use crate::schema::contact_messages::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let model: ContactMessageModel = diesel::insert_into(dsl::contact_messages)
                .values(&new_message)
                .get_result(&mut conn)?;

            Ok::<ContactMessage, anyhow::Error>(model.into())
        })
        .await??;

        Ok(result)
    }

    pub async fn list(&self, unread_only: bool) -> Result<Vec<ContactMessage>> {
        use crate::schema::contact_messages::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let mut query = dsl::contact_messages.into_boxed();
            if unread_only {
                query = query.filter(dsl::read.eq(false));
            }

            let models: Vec<ContactMessageModel> =
                query.order(dsl::created_at.desc()).load(&mut conn)?;

            Ok::<Vec<ContactMessage>, anyhow::Error>(
                models.into_iter().map(ContactMessage::from).collect(),
            )
        })
        .await??;

        Ok(result)
    }

    pub async fn mark_read(&self, message_id: Uuid) -> Result<bool> {
        use crate::schema::contact_messages::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated = diesel::update(dsl::contact_messages.filter(dsl::id.eq(message_id)))
                .set(dsl::read.eq(true))
                .execute(&mut conn)?;

            Ok::<bool, anyhow::Error>(updated > 0)
        })
        .await??;

        Ok(result)
    }

    pub async fn count_unread(&self) -> Result<i64> {
        use crate::schema::contact_messages::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let count: i64 = dsl::contact_messages
                .filter(dsl::read.eq(false))
                .count()
                .get_result(&mut conn)?;

            Ok::<i64, anyhow::Error>(count)
        })
        .await??;

        Ok(result)
    }
}
