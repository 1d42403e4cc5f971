use anyhow::Result;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use uuid::Uuid;

use crate::errors::DomainError;
use crate::events::EventStatus;
use crate::events::EventModel;
use crate::orders::{NewOrder, Order, OrderKind, OrderModel, OrderStatus};
use crate::products::ProductModel;
use crate::web::PgPool;

/// The order ledger: owns the orders table and enforces its transition
/// rules. Orders are financial records and are never deleted.
#[derive(Clone)]
pub struct OrdersRepository {
    pool: PgPool,
}

/// Total in cents, computed in i64 so a large client-supplied quantity
/// cannot wrap the i32 column.
fn order_amount(price_cents: i32, quantity: i32) -> Result<i32, DomainError> {
    let total = i64::from(price_cents) * i64::from(quantity);
    i32::try_from(total)
        .map_err(|_| DomainError::Conflict("order total exceeds the supported amount".into()))
}

impl OrdersRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get an order by ID
    pub async fn get_by_id(&self, order_id: Uuid) -> Result<Option<Order>> {
        use crate::schema::orders::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let order: Option<OrderModel> = dsl::orders
                .filter(dsl::id.eq(order_id))
                .first::<OrderModel>(&mut conn)
                .optional()?;

            Ok::<Option<OrderModel>, anyhow::Error>(order)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Get an order, enforcing ownership. Admins may read any order.
    pub async fn get_for_user(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        is_admin: bool,
    ) -> Result<Order, DomainError> {
        let order = self
            .get_by_id(order_id)
            .await?
            .ok_or(DomainError::NotFound("order"))?;

        if order.user_id != user_id && !is_admin {
            return Err(DomainError::Forbidden("order"));
        }

        Ok(order)
    }

    /// List a user's orders, newest first
    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        use crate::schema::orders::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let orders: Vec<OrderModel> = dsl::orders
                .filter(dsl::user_id.eq(user_id))
                .order_by(dsl::created_at.desc())
                .load::<OrderModel>(&mut conn)?;

            Ok::<Vec<OrderModel>, anyhow::Error>(orders)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// List registrations for an event, newest first
    pub async fn list_by_event(&self, event_id: Uuid) -> Result<Vec<Order>> {
        use crate::schema::orders::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let orders: Vec<OrderModel> = dsl::orders
                .filter(dsl::event_id.eq(event_id))
                .order_by(dsl::created_at.desc())
                .load::<OrderModel>(&mut conn)?;

            Ok::<Vec<OrderModel>, anyhow::Error>(orders)
        })
        .await??;

        Ok(result.into_iter().map(|model| model.into()).collect())
    }

    /// Create a pending event registration order.
    ///
    /// Capacity and duplicate-registration checks run inside one
    /// transaction; a partial unique index on live registrations backs the
    /// duplicate check against concurrent inserts.
    pub async fn create_event_order(
        &self,
        user_id: Uuid,
        event_id: Uuid,
        quantity: i32,
    ) -> Result<Order, DomainError> {
        use crate::schema::events;
        use crate::schema::orders::dsl;
        use diesel::dsl::sum;

        if quantity <= 0 {
            return Err(DomainError::Conflict("quantity must be positive".into()));
        }

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            conn.transaction::<OrderModel, DomainError, _>(|conn| {
                let event: EventModel = events::dsl::events
                    .filter(events::dsl::id.eq(event_id))
                    .filter(events::dsl::status.eq(EventStatus::Published))
                    .first::<EventModel>(conn)
                    .optional()?
                    .ok_or(DomainError::NotFound("event"))?;

                if let Some(capacity) = event.capacity {
                    let paid_seats: Option<i64> = dsl::orders
                        .filter(dsl::event_id.eq(event_id))
                        .filter(dsl::status.eq(OrderStatus::Paid))
                        .select(sum(dsl::quantity))
                        .get_result::<Option<i64>>(conn)?;

                    if paid_seats.unwrap_or(0) + quantity as i64 > capacity as i64 {
                        return Err(DomainError::CapacityExceeded);
                    }
                }

                let already_registered: bool = diesel::select(diesel::dsl::exists(
                    dsl::orders
                        .filter(dsl::event_id.eq(event_id))
                        .filter(dsl::user_id.eq(user_id))
                        .filter(dsl::status.ne(OrderStatus::Canceled)),
                ))
                .get_result(conn)?;

                if already_registered {
                    return Err(DomainError::DuplicateRegistration);
                }

                let new_order = NewOrder {
                    user_id,
                    kind: OrderKind::Event,
                    event_id: Some(event_id),
                    product_id: None,
                    quantity,
                    amount_cents: order_amount(event.price_cents, quantity)?,
                    status: OrderStatus::Pending,
                    recipient_name: None,
                    recipient_email: None,
                };

                let inserted: OrderModel = diesel::insert_into(dsl::orders)
                    .values(&new_order)
                    .get_result(conn)
                    .map_err(|e| match e {
                        diesel::result::Error::DatabaseError(
                            DatabaseErrorKind::UniqueViolation,
                            _,
                        ) => DomainError::DuplicateRegistration,
                        other => other.into(),
                    })?;

                Ok(inserted)
            })
        })
        .await??;

        Ok(result.into())
    }

    /// Create a pending product order
    pub async fn create_product_order(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        recipient_name: Option<String>,
        recipient_email: Option<String>,
    ) -> Result<Order, DomainError> {
        use crate::schema::orders::dsl;
        use crate::schema::products;

        if quantity <= 0 {
            return Err(DomainError::Conflict("quantity must be positive".into()));
        }

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            conn.transaction::<OrderModel, DomainError, _>(|conn| {
                let product: ProductModel = products::dsl::products
                    .filter(products::dsl::id.eq(product_id))
                    .filter(products::dsl::is_active.eq(true))
                    .first::<ProductModel>(conn)
                    .optional()?
                    .ok_or(DomainError::NotFound("product"))?;

                let new_order = NewOrder {
                    user_id,
                    kind: OrderKind::Product,
                    event_id: None,
                    product_id: Some(product_id),
                    quantity,
                    amount_cents: order_amount(product.price_cents, quantity)?,
                    status: OrderStatus::Pending,
                    recipient_name,
                    recipient_email,
                };

                let inserted: OrderModel = diesel::insert_into(dsl::orders)
                    .values(&new_order)
                    .get_result(conn)?;

                Ok(inserted)
            })
        })
        .await??;

        Ok(result.into())
    }

    /// Attach the Stripe checkout session to an order. The session id is
    /// immutable once set: a second checkout attempt must not clobber it.
    pub async fn attach_stripe_session(
        &self,
        order_id: Uuid,
        session_id: &str,
    ) -> Result<Order, DomainError> {
        use crate::schema::orders::dsl;

        let pool = self.pool.clone();
        let session_id = session_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            conn.transaction::<OrderModel, DomainError, _>(|conn| {
                let order: OrderModel = dsl::orders
                    .filter(dsl::id.eq(order_id))
                    .for_update()
                    .first::<OrderModel>(conn)
                    .optional()?
                    .ok_or(DomainError::NotFound("order"))?;

                match order.stripe_session_id.as_deref() {
                    Some(existing) if existing == session_id => Ok(order),
                    Some(_) => Err(DomainError::Conflict(
                        "order already has a different checkout session".into(),
                    )),
                    None => {
                        let updated: OrderModel = diesel::update(dsl::orders.filter(dsl::id.eq(order_id)))
                            .set(dsl::stripe_session_id.eq(&session_id))
                            .get_result(conn)?;
                        Ok(updated)
                    }
                }
            })
        })
        .await??;

        Ok(result.into())
    }

    /// Transition a pending order to paid. Idempotent: an order already
    /// paid with the same payment reference is returned as-is.
    pub async fn mark_paid(
        &self,
        order_id: Uuid,
        payment_intent_id: Option<&str>,
    ) -> Result<Order, DomainError> {
        let pool = self.pool.clone();
        let payment_intent_id = payment_intent_id.map(|s| s.to_string());
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            conn.transaction::<OrderModel, DomainError, _>(|conn| {
                mark_paid_on_conn(conn, order_id, payment_intent_id.as_deref())
            })
        })
        .await??;

        Ok(result.into())
    }

    /// Cancel a pending order (before payment)
    pub async fn cancel(&self, order_id: Uuid) -> Result<Order, DomainError> {
        use crate::schema::orders::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            conn.transaction::<OrderModel, DomainError, _>(|conn| {
                let order: OrderModel = dsl::orders
                    .filter(dsl::id.eq(order_id))
                    .for_update()
                    .first::<OrderModel>(conn)
                    .optional()?
                    .ok_or(DomainError::NotFound("order"))?;

                if order.status == OrderStatus::Canceled {
                    return Ok(order);
                }
                if !order.status.can_transition_to(OrderStatus::Canceled) {
                    return Err(DomainError::InvalidTransition {
                        from: order.status,
                        to: OrderStatus::Canceled,
                    });
                }

                let updated: OrderModel = diesel::update(dsl::orders.filter(dsl::id.eq(order_id)))
                    .set(dsl::status.eq(OrderStatus::Canceled))
                    .get_result(conn)?;

                Ok(updated)
            })
        })
        .await??;

        Ok(result.into())
    }

    /// Redeem a gift code: mark it used exactly once. The row lock makes
    /// two concurrent redemptions of the same code serialize; the loser
    /// sees `gift_code_used = true` and fails.
    pub async fn redeem_gift_code(&self, code: &str) -> Result<Order, DomainError> {
        use crate::schema::orders::dsl;

        let pool = self.pool.clone();
        let code = code.trim().to_uppercase();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            conn.transaction::<OrderModel, DomainError, _>(|conn| {
                let order: OrderModel = dsl::orders
                    .filter(dsl::gift_code.eq(&code))
                    .filter(dsl::status.eq(OrderStatus::Paid))
                    .for_update()
                    .first::<OrderModel>(conn)
                    .optional()?
                    .ok_or(DomainError::NotFound("gift code"))?;

                if order.gift_code_used {
                    return Err(DomainError::Conflict("gift code already used".into()));
                }
                if let Some(expires_at) = order.gift_expires_at
                    && chrono::Utc::now() > expires_at
                {
                    return Err(DomainError::Conflict("gift code has expired".into()));
                }

                let updated: OrderModel = diesel::update(dsl::orders.filter(dsl::id.eq(order.id)))
                    .set(dsl::gift_code_used.eq(true))
                    .get_result(conn)?;

                Ok(updated)
            })
        })
        .await??;

        Ok(result.into())
    }

    /// Count all paid orders
    pub async fn count_paid(&self) -> Result<i64> {
        use crate::schema::orders::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let count: i64 = dsl::orders
                .filter(dsl::status.eq(OrderStatus::Paid))
                .count()
                .get_result(&mut conn)?;

            Ok::<i64, anyhow::Error>(count)
        })
        .await??;

        Ok(result)
    }
}

/// Connection-level paid transition, shared between `mark_paid` and the
/// reconciler's single-transaction finalize path. Expects to run inside a
/// transaction; takes the row lock itself.
pub fn mark_paid_on_conn(
    conn: &mut PgConnection,
    order_id: Uuid,
    payment_intent_id: Option<&str>,
) -> Result<OrderModel, DomainError> {
    use crate::schema::orders::dsl;

    let order: OrderModel = dsl::orders
        .filter(dsl::id.eq(order_id))
        .for_update()
        .first::<OrderModel>(conn)
        .optional()?
        .ok_or(DomainError::NotFound("order"))?;

    match order.status {
        OrderStatus::Paid => Ok(order),
        OrderStatus::Pending => {
            let updated: OrderModel = diesel::update(dsl::orders.filter(dsl::id.eq(order_id)))
                .set((
                    dsl::status.eq(OrderStatus::Paid),
                    dsl::stripe_payment_intent_id.eq(payment_intent_id),
                ))
                .get_result(conn)?;
            Ok(updated)
        }
        from => Err(DomainError::InvalidTransition {
            from,
            to: OrderStatus::Paid,
        }),
    }
}
