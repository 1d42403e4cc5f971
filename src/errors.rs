//! Typed errors for the order/payment core.
//!
//! Handlers translate these into JSON error responses; repositories for
//! plain reads keep returning `anyhow::Result` and are mapped ad hoc.

use axum::http::StatusCode;

use crate::orders::OrderStatus;

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("not authorized to access this {0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("invalid order status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("event is full")]
    CapacityExceeded,

    #[error("already registered for this event")]
    DuplicateRegistration,

    #[error("webhook signature verification failed")]
    Signature,

    /// Transient failure talking to Stripe or the database; no state was
    /// mutated, the caller may retry.
    #[error("temporary failure, please retry: {0}")]
    Retryable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl DomainError {
    pub fn status(&self) -> StatusCode {
        match self {
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Forbidden(_) => StatusCode::FORBIDDEN,
            DomainError::Conflict(_) => StatusCode::CONFLICT,
            DomainError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            DomainError::CapacityExceeded => StatusCode::CONFLICT,
            DomainError::DuplicateRegistration => StatusCode::CONFLICT,
            DomainError::Signature => StatusCode::BAD_REQUEST,
            DomainError::Retryable(_) => StatusCode::BAD_GATEWAY,
            DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tokio::task::JoinError> for DomainError {
    fn from(e: tokio::task::JoinError) -> Self {
        DomainError::Internal(e.into())
    }
}

impl From<diesel::result::Error> for DomainError {
    fn from(e: diesel::result::Error) -> Self {
        DomainError::Internal(e.into())
    }
}

impl From<r2d2::Error> for DomainError {
    fn from(e: r2d2::Error) -> Self {
        DomainError::Internal(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(DomainError::NotFound("order").status(), StatusCode::NOT_FOUND);
        assert_eq!(DomainError::Forbidden("order").status(), StatusCode::FORBIDDEN);
        assert_eq!(DomainError::CapacityExceeded.status(), StatusCode::CONFLICT);
        assert_eq!(
            DomainError::DuplicateRegistration.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            DomainError::Retryable("stripe timeout".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
