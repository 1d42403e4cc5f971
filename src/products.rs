use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::ProductCategory")]
#[serde(rename_all = "snake_case")]
pub enum ProductCategory {
    #[db_enum(rename = "subscription")]
    Subscription,
    #[db_enum(rename = "entry")]
    Entry,
    #[db_enum(rename = "gift_card")]
    GiftCard,
}

/// API model for shop products
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub category: ProductCategory,
    pub price_cents: i32,
    pub duration_months: Option<i32>,
    pub events_included: Option<i32>,
    pub validity_months: Option<i32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Diesel model for the products table
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProductModel {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub category: ProductCategory,
    pub price_cents: i32,
    pub duration_months: Option<i32>,
    pub events_included: Option<i32>,
    pub validity_months: Option<i32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert model for new products
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewProduct {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub category: ProductCategory,
    pub price_cents: i32,
    pub duration_months: Option<i32>,
    pub events_included: Option<i32>,
    pub validity_months: Option<i32>,
    pub is_active: bool,
}

/// Update model for products; `None` fields are left untouched
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = crate::schema::products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProductChanges {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<Option<String>>,
    pub price_cents: Option<i32>,
    pub duration_months: Option<Option<i32>>,
    pub events_included: Option<Option<i32>>,
    pub validity_months: Option<Option<i32>>,
    pub is_active: Option<bool>,
}

impl From<ProductModel> for Product {
    fn from(model: ProductModel) -> Self {
        Self {
            id: model.id,
            name: model.name,
            slug: model.slug,
            description: model.description,
            category: model.category,
            price_cents: model.price_cents,
            duration_months: model.duration_months,
            events_included: model.events_included,
            validity_months: model.validity_months,
            is_active: model.is_active,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}
