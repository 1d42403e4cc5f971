use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// API model for event tickets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub ticket_code: String,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

/// Diesel model for the tickets table
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::tickets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TicketModel {
    pub id: Uuid,
    pub order_id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub ticket_code: String,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert model for new tickets
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::tickets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewTicket {
    pub order_id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub ticket_code: String,
}

impl From<TicketModel> for Ticket {
    fn from(model: TicketModel) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            event_id: model.event_id,
            user_id: model.user_id,
            ticket_code: model.ticket_code,
            used: model.used,
            created_at: model.created_at,
        }
    }
}
