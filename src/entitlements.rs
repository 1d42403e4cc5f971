//! Entitlement issuance. Everything here runs on an open connection inside
//! the reconciler's transaction, after the order row has been locked, so the
//! existence checks cannot race a concurrent confirmation of the same order.

use chrono::{DateTime, Months, Utc};
use diesel::prelude::*;
use rand::Rng;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::errors::DomainError;
use crate::memberships::MembershipModel;
use crate::memberships_repo;
use crate::orders::{OrderKind, OrderModel};
use crate::products::{ProductCategory, ProductModel};
use crate::tickets::{NewTicket, TicketModel};

const TICKET_CODE_LEN: usize = 8;
const TICKET_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Gift codes drop ambiguous glyphs (I, O, 0, 1) since people read them
/// aloud and type them by hand.
const GIFT_CODE_PREFIX: &str = "ART-";
const GIFT_CODE_LEN: usize = 8;
const GIFT_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const DEFAULT_GIFT_VALIDITY_MONTHS: u32 = 6;

/// What a confirmed order produced.
#[derive(Debug, Clone, Serialize, Default)]
pub struct EntitlementSummary {
    pub tickets: Vec<String>,
    pub membership_period_end: Option<DateTime<Utc>>,
    pub gift_code: Option<String>,
}

pub fn generate_ticket_code() -> String {
    random_code(TICKET_CODE_ALPHABET, TICKET_CODE_LEN)
}

pub fn generate_gift_code() -> String {
    let mut code = String::with_capacity(GIFT_CODE_PREFIX.len() + GIFT_CODE_LEN);
    code.push_str(GIFT_CODE_PREFIX);
    code.push_str(&random_code(GIFT_CODE_ALPHABET, GIFT_CODE_LEN));
    code
}

fn random_code(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// Issue whatever a paid order entitles its buyer to. Idempotent: if the
/// grant already exists (a previous confirmation got there first), the
/// existing grant is returned untouched.
pub fn issue_for_order(
    conn: &mut PgConnection,
    order: &OrderModel,
) -> Result<EntitlementSummary, DomainError> {
    match order.kind {
        OrderKind::Event => issue_tickets(conn, order),
        OrderKind::Product => {
            let product = load_product(conn, order)?;
            match product.category {
                ProductCategory::Subscription => issue_membership(conn, order, &product),
                ProductCategory::GiftCard => issue_gift_code(conn, order, &product),
                ProductCategory::Entry => issue_tickets_for_product(conn, order, &product),
            }
        }
    }
}

/// Summarize the grants a previous confirmation already made, without
/// issuing anything. Used on replays so a redelivered confirmation gets
/// the same answer as the one that won.
pub fn existing_for_order(
    conn: &mut PgConnection,
    order: &OrderModel,
) -> Result<EntitlementSummary, DomainError> {
    match order.kind {
        OrderKind::Event => {
            use crate::schema::tickets::dsl;

            let codes: Vec<String> = dsl::tickets
                .filter(dsl::order_id.eq(order.id))
                .order(dsl::created_at.asc())
                .select(dsl::ticket_code)
                .load(conn)?;
            Ok(EntitlementSummary {
                tickets: codes,
                ..Default::default()
            })
        }
        OrderKind::Product => {
            let product = load_product(conn, order)?;
            match product.category {
                ProductCategory::Subscription => {
                    use crate::schema::memberships::dsl;

                    let period_end: Option<Option<DateTime<Utc>>> = dsl::memberships
                        .filter(dsl::user_id.eq(order.user_id))
                        .select(dsl::current_period_end)
                        .first(conn)
                        .optional()?;
                    Ok(EntitlementSummary {
                        membership_period_end: period_end.flatten(),
                        ..Default::default()
                    })
                }
                ProductCategory::GiftCard => Ok(EntitlementSummary {
                    gift_code: order.gift_code.clone(),
                    ..Default::default()
                }),
                ProductCategory::Entry => Ok(EntitlementSummary::default()),
            }
        }
    }
}

fn load_product(conn: &mut PgConnection, order: &OrderModel) -> Result<ProductModel, DomainError> {
    use crate::schema::products::dsl;

    let product_id = order
        .product_id
        .ok_or(DomainError::NotFound("product"))?;

    dsl::products
        .filter(dsl::id.eq(product_id))
        .first::<ProductModel>(conn)
        .optional()?
        .ok_or(DomainError::NotFound("product"))
}

fn issue_tickets(
    conn: &mut PgConnection,
    order: &OrderModel,
) -> Result<EntitlementSummary, DomainError> {
    let event_id = order.event_id.ok_or(DomainError::NotFound("event"))?;
    let tickets = insert_tickets(conn, order, event_id, order.quantity)?;

    Ok(EntitlementSummary {
        tickets: tickets.into_iter().map(|t| t.ticket_code).collect(),
        ..Default::default()
    })
}

fn issue_tickets_for_product(
    conn: &mut PgConnection,
    order: &OrderModel,
    product: &ProductModel,
) -> Result<EntitlementSummary, DomainError> {
    // Entry passes are not bound to an event up front; the pass itself is
    // the order row plus its payment record. Nothing extra to mint.
    info!(order_id = %order.id, product = %product.slug, "Entry pass confirmed");
    Ok(EntitlementSummary::default())
}

fn insert_tickets(
    conn: &mut PgConnection,
    order: &OrderModel,
    event_id: Uuid,
    count: i32,
) -> Result<Vec<TicketModel>, DomainError> {
    use crate::schema::tickets::dsl;

    let existing: Vec<TicketModel> = dsl::tickets
        .filter(dsl::order_id.eq(order.id))
        .order(dsl::created_at.asc())
        .load(conn)?;
    if !existing.is_empty() {
        return Ok(existing);
    }

    // Codes are deduplicated within the batch; a collision against an
    // earlier order's code rolls back to a savepoint and the whole batch
    // is minted again.
    for _ in 0..5 {
        let new_tickets: Vec<NewTicket> =
            unique_codes(TICKET_CODE_ALPHABET, TICKET_CODE_LEN, count as usize)
                .into_iter()
                .map(|ticket_code| NewTicket {
                    order_id: order.id,
                    event_id,
                    user_id: order.user_id,
                    ticket_code,
                })
                .collect();

        let result = conn.transaction::<Vec<TicketModel>, diesel::result::Error, _>(|conn| {
            diesel::insert_into(dsl::tickets)
                .values(&new_tickets)
                .get_results::<TicketModel>(conn)
        });

        match result {
            Ok(inserted) => {
                info!(order_id = %order.id, count = inserted.len(), "Issued tickets");
                metrics::counter!("entitlements.tickets.issued").increment(inserted.len() as u64);
                return Ok(inserted);
            }
            Err(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            )) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(DomainError::Internal(anyhow::anyhow!(
        "could not mint unique ticket codes for order {}",
        order.id
    )))
}

/// Mint `count` distinct codes, re-rolling any duplicate drawn within
/// the batch.
fn unique_codes(alphabet: &[u8], len: usize, count: usize) -> Vec<String> {
    let mut codes = std::collections::HashSet::with_capacity(count);
    while codes.len() < count {
        codes.insert(random_code(alphabet, len));
    }
    codes.into_iter().collect()
}

fn issue_membership(
    conn: &mut PgConnection,
    order: &OrderModel,
    product: &ProductModel,
) -> Result<EntitlementSummary, DomainError> {
    let months = product.duration_months.unwrap_or(1).max(1) as u32;
    // Renewal restarts the clock rather than extending the old period.
    let period_end = Utc::now() + Months::new(months);

    let membership: MembershipModel =
        memberships_repo::activate_on_conn(conn, order.user_id, &product.slug, period_end)?;

    info!(
        order_id = %order.id,
        user_id = %order.user_id,
        plan = %product.slug,
        period_end = %period_end,
        "Membership activated"
    );
    metrics::counter!("entitlements.memberships.activated").increment(1);

    Ok(EntitlementSummary {
        membership_period_end: membership.current_period_end,
        ..Default::default()
    })
}

fn issue_gift_code(
    conn: &mut PgConnection,
    order: &OrderModel,
    product: &ProductModel,
) -> Result<EntitlementSummary, DomainError> {
    use crate::schema::orders::dsl;

    // Already minted by an earlier confirmation of this order.
    if let Some(ref code) = order.gift_code {
        return Ok(EntitlementSummary {
            gift_code: Some(code.clone()),
            ..Default::default()
        });
    }

    let months = product
        .validity_months
        .map(|m| m.max(1) as u32)
        .unwrap_or(DEFAULT_GIFT_VALIDITY_MONTHS);
    let expires_at = Utc::now() + Months::new(months);

    // Codes are unique across all orders. On the rare collision, mint again.
    for _ in 0..5 {
        let code = generate_gift_code();
        let result = diesel::update(dsl::orders.filter(dsl::id.eq(order.id)))
            .set((
                dsl::gift_code.eq(&code),
                dsl::gift_expires_at.eq(expires_at),
            ))
            .execute(conn);

        match result {
            Ok(_) => {
                info!(order_id = %order.id, "Gift code issued");
                metrics::counter!("entitlements.gift_codes.issued").increment(1);
                return Ok(EntitlementSummary {
                    gift_code: Some(code),
                    ..Default::default()
                });
            }
            Err(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            )) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(DomainError::Internal(anyhow::anyhow!(
        "could not mint a unique gift code for order {}",
        order.id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_code_shape() {
        for _ in 0..100 {
            let code = generate_ticket_code();
            assert_eq!(code.len(), TICKET_CODE_LEN);
            assert!(code
                .bytes()
                .all(|b| TICKET_CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_gift_code_shape() {
        for _ in 0..100 {
            let code = generate_gift_code();
            assert!(code.starts_with(GIFT_CODE_PREFIX));
            let suffix = &code[GIFT_CODE_PREFIX.len()..];
            assert_eq!(suffix.len(), GIFT_CODE_LEN);
            assert!(suffix.bytes().all(|b| GIFT_CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_gift_code_avoids_ambiguous_glyphs() {
        for banned in [b'I', b'O', b'0', b'1'] {
            assert!(!GIFT_CODE_ALPHABET.contains(&banned));
        }
    }

    #[test]
    fn test_batch_codes_are_distinct() {
        // A two-glyph alphabet forces in-batch collisions; the batch must
        // still come out with every code distinct.
        let codes = unique_codes(b"AB", 1, 2);
        let mut sorted = codes.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["A".to_string(), "B".to_string()]);

        let codes = unique_codes(TICKET_CODE_ALPHABET, TICKET_CODE_LEN, 500);
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), 500);
    }

    #[test]
    fn test_codes_vary() {
        let a = generate_ticket_code();
        let b = generate_ticket_code();
        let c = generate_ticket_code();
        assert!(a != b || b != c);
    }
}
