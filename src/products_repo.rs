use anyhow::Result;
use diesel::prelude::*;
use uuid::Uuid;

use crate::products::{NewProduct, Product, ProductChanges, ProductModel};
use crate::web::PgPool;

#[derive(Clone)]
pub struct ProductsRepository {
    pool: PgPool,
}

impl ProductsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a product by ID
    pub async fn get_by_id(&self, product_id: Uuid) -> Result<Option<Product>> {
        use crate::schema::products::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let product: Option<ProductModel> = dsl::products
                .filter(dsl::id.eq(product_id))
                .first::<ProductModel>(&mut conn)
                .optional()?;

            Ok::<Option<ProductModel>, anyhow::Error>(product)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Get a product by slug
    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Product>> {
        use crate::schema::products::dsl;

        let pool = self.pool.clone();
        let slug = slug.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let product: Option<ProductModel> = dsl::products
                .filter(dsl::slug.eq(&slug))
                .first::<ProductModel>(&mut conn)
                .optional()?;

            Ok::<Option<ProductModel>, anyhow::Error>(product)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// List products, ordered by category then price. Non-admin callers
    /// only see active products.
    pub async fn list(&self, include_inactive: bool) -> Result<Vec<Product>> {
        use crate::schema::products::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let query = dsl::products
                .order_by((dsl::category.asc(), dsl::price_cents.asc()))
                .into_boxed();
            let query = if include_inactive {
                query
            } else {
                query.filter(dsl::is_active.eq(true))
            };

            let products: Vec<ProductModel> = query.load::<ProductModel>(&mut conn)?;

            Ok::<Vec<ProductModel>, anyhow::Error>(products)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// Create a new product
    pub async fn create(&self, new_product: NewProduct) -> Result<Product> {
        use crate::schema::products::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let inserted: ProductModel = diesel::insert_into(dsl::products)
                .values(&new_product)
                .get_result(&mut conn)?;

            Ok::<ProductModel, anyhow::Error>(inserted)
        })
        .await??;

        Ok(result.into())
    }

    /// Apply partial changes to a product
    pub async fn update(
        &self,
        product_id: Uuid,
        changes: ProductChanges,
    ) -> Result<Option<Product>> {
        use crate::schema::products::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated: Option<ProductModel> =
                diesel::update(dsl::products.filter(dsl::id.eq(product_id)))
                    .set(&changes)
                    .get_result(&mut conn)
                    .optional()?;

            Ok::<Option<ProductModel>, anyhow::Error>(updated)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Deactivate a product (soft delete; orders keep referencing it)
    pub async fn deactivate(&self, product_id: Uuid) -> Result<bool> {
        use crate::schema::products::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let updated = diesel::update(dsl::products.filter(dsl::id.eq(product_id)))
                .set(dsl::is_active.eq(false))
                .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(updated)
        })
        .await??;

        Ok(result > 0)
    }
}
