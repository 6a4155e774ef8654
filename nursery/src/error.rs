//! Error types for the booking core.
//!
//! Every operation recovers its failures at the boundary and returns one of
//! these. Errors are `Clone` because they travel back to callers inside
//! reply actions.

use crate::types::{BookingId, BookingStatus, PlantId};
use thiserror::Error;

/// Result type for booking-core operations
pub type BookingResult<T> = Result<T, BookingError>;

/// Errors raised by the catalog, ledger, pricing, payment and booking components
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Plant, booking or center missing
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity ("plant", "booking", "center")
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Bad price, quantity or advance input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unit price is not a positive amount
    #[error("Invalid plant price: unit price must be greater than zero")]
    InvalidPlantPrice,

    /// Center already carries two distinct active varieties
    #[error("Center already has {limit} distinct varieties ({existing}); cannot add {requested}")]
    VarietyLimitExceeded {
        /// Maximum distinct varieties per center
        limit: usize,
        /// Varieties already present, comma-separated
        existing: String,
        /// Variety that was refused
        requested: String,
    },

    /// Variety name does not match any catalog entry
    #[error("Unknown variety: {0}")]
    UnknownVariety(String),

    /// Variety exists but is not one of the center's assigned varieties
    #[error("Variety {variety} is not assigned to this center (allowed: {allowed})")]
    VarietyNotAssignedToCenter {
        /// Refused variety id
        variety: String,
        /// Assigned variety ids, comma-separated
        allowed: String,
    },

    /// Not enough stock to satisfy the quantity
    #[error("Insufficient stock for plant {plant_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Plant whose stock was short
        plant_id: PlantId,
        /// Units requested
        requested: u32,
        /// Units available when the check ran
        available: u32,
    },

    /// Approval attempted before the advance was verified
    #[error("Advance payment not verified for booking {0}")]
    AdvanceNotPaid(BookingId),

    /// Balance recorded after the reservation window closed
    #[error("Reservation for booking {0} has expired")]
    ReservationExpired(BookingId),

    /// Payment credentials are absent
    #[error("Payment gateway not configured")]
    GatewayNotConfigured,

    /// Callback signature does not match the expected HMAC
    #[error("Payment signature mismatch")]
    SignatureMismatch,

    /// Caller lacks the capability for the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Operation not permitted from the booking's current status
    #[error("Cannot {operation} booking in status {status}")]
    InvalidStateTransition {
        /// Current status
        status: BookingStatus,
        /// Attempted operation
        operation: &'static str,
    },

    /// Gateway call failed
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// Persistence layer failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The booking store did not answer (shutdown or timeout)
    #[error("Booking store unavailable: {0}")]
    Unavailable(String),
}

impl BookingError {
    /// Shorthand for a missing plant
    #[must_use]
    pub fn plant_not_found(id: PlantId) -> Self {
        Self::NotFound {
            entity: "plant",
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing booking
    #[must_use]
    pub fn booking_not_found(id: BookingId) -> Self {
        Self::NotFound {
            entity: "booking",
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing center
    #[must_use]
    pub fn center_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "center",
            id: id.to_string(),
        }
    }

    /// Whether a caller may safely retry the same request unchanged
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Unavailable(_) | Self::Gateway(_))
    }
}

/// Configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed
    #[error("Invalid value for {key}: {value}")]
    InvalidValue {
        /// Environment variable name
        key: &'static str,
        /// Offending value
        value: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}
