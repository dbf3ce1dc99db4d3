//! Error types for event lifecycle and subscription operations.

use crate::types::{EventId, OrderId, UserId};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for event operations.
pub type Result<T> = std::result::Result<T, EventError>;

/// Ownership check failure kept as the cause of [`EventError::Forbidden`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("user {caller} does not own event {event_id}")]
pub struct OwnershipMismatch {
    /// Event the caller tried to act on
    pub event_id: EventId,
    /// Identity of the caller
    pub caller: UserId,
}

/// Broad classification of an [`EventError`].
///
/// Callers branch on this instead of matching every variant. `Conflict`
/// errors are expected business outcomes, not failures of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Entity missing, or hidden from the caller
    NotFound,
    /// Caller is not allowed to perform the operation
    Forbidden,
    /// Business rule rejected the operation (full event, owner subscribing)
    Conflict,
    /// Input rejected before reaching storage
    Invalid,
    /// Store failure or deadline expiry
    Storage,
}

/// Error taxonomy for the event engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EventError {
    // ═══════════════════════════════════════════════════════════
    // Lookup Errors
    // ═══════════════════════════════════════════════════════════

    /// Event does not exist.
    #[error("Event {0} not found")]
    EventNotFound(EventId),

    /// Scoped lookup missed: the event is missing or not owned by the caller.
    ///
    /// The two cases are deliberately indistinguishable.
    #[error("Event {0} not found")]
    NotFoundOrForbidden(EventId),

    /// Premium order does not exist.
    #[error("Premium order {0} not found")]
    OrderNotFound(OrderId),

    // ═══════════════════════════════════════════════════════════
    // Authorization Errors
    // ═══════════════════════════════════════════════════════════

    /// Caller failed the ownership check.
    #[error("Forbidden: {cause}")]
    Forbidden {
        /// Underlying ownership failure
        #[source]
        cause: OwnershipMismatch,
    },

    // ═══════════════════════════════════════════════════════════
    // Business Rules
    // ═══════════════════════════════════════════════════════════

    /// Event reached its capacity.
    #[error("Event {0} is full")]
    EventFull(EventId),

    /// Owners cannot subscribe to their own event.
    #[error("User is the owner of event {0}")]
    OwnerCannotSubscribe(EventId),

    /// Private event requested without a matching invitation token.
    #[error("Invalid invitation token for event {0}")]
    InviteTokenMismatch(EventId),

    // ═══════════════════════════════════════════════════════════
    // Validation Errors
    // ═══════════════════════════════════════════════════════════

    /// Capacity must be zero (unlimited) or positive.
    #[error("Invalid capacity: {0}")]
    InvalidCapacity(i64),

    /// Latitude or longitude out of range.
    #[error("Invalid coordinates: {reason}")]
    InvalidCoordinates {
        /// What was out of range
        reason: String,
    },

    /// Event date is not in the future.
    #[error("Event date must be in the future")]
    EventDateInPast,

    /// Unknown date range filter.
    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    /// Unknown premium order status read from storage.
    #[error("Invalid premium order status: {0}")]
    InvalidOrderStatus(String),

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Store operation failed (transaction aborted, constraint violated).
    #[error("Database error: {0}")]
    Storage(String),

    /// Operation exceeded the request deadline and was abandoned.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl EventError {
    /// Classify this error.
    ///
    /// # Examples
    ///
    /// ```
    /// # use treffly_core::{ErrorKind, EventError};
    /// # use treffly_core::types::EventId;
    /// assert_eq!(EventError::EventFull(EventId::new(1)).kind(), ErrorKind::Conflict);
    /// assert_eq!(EventError::Storage("boom".into()).kind(), ErrorKind::Storage);
    /// ```
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EventNotFound(_) | Self::NotFoundOrForbidden(_) | Self::OrderNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::EventFull(_) | Self::OwnerCannotSubscribe(_) | Self::InviteTokenMismatch(_) => {
                ErrorKind::Conflict
            }
            Self::InvalidCapacity(_)
            | Self::InvalidCoordinates { .. }
            | Self::EventDateInPast
            | Self::InvalidDateRange(_)
            | Self::InvalidOrderStatus(_) => ErrorKind::Invalid,
            Self::Storage(_) | Self::Timeout(_) => ErrorKind::Storage,
        }
    }

    /// Returns `true` for expected business outcomes the caller must handle.
    #[must_use]
    pub const fn is_business_rule(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict)
    }

    /// Build a `Forbidden` error for a failed ownership check.
    #[must_use]
    pub const fn forbidden(event_id: EventId, caller: UserId) -> Self {
        Self::Forbidden {
            cause: OwnershipMismatch { event_id, caller },
        }
    }
}
