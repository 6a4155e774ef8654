//! Domain types for the nursery booking core.
//!
//! Value objects, entities and the caller identity used across the catalog,
//! the inventory ledger and the booking state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a farmer placing bookings
    FarmerId
);
uuid_id!(
    /// Unique identifier for a nursery center
    CenterId
);
uuid_id!(
    /// Unique identifier for a plant inventory unit
    PlantId
);
uuid_id!(
    /// Unique identifier for a booking
    BookingId
);
uuid_id!(
    /// Correlates a command sent to the booking store with its reply
    RequestId
);

impl CenterId {
    /// Stable identifier derived from a center's name
    ///
    /// Centers are configured by name, so the same name always yields the same id
    /// across restarts.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.trim().to_lowercase().as_bytes()))
    }
}

// ============================================================================
// Money Value Object (whole currency units)
// ============================================================================

/// An amount in whole currency units
///
/// Booking amounts are never fractional in this domain. The payment gateway
/// expects minor units, see [`Money::to_minor_units`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from whole units
    #[must_use]
    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    /// Returns the amount in whole units
    #[must_use]
    pub const fn units(&self) -> u64 {
        self.0
    }

    /// Converts to the gateway's minor-unit convention (1 unit = 100 minor units)
    ///
    /// Returns `None` on overflow.
    #[must_use]
    pub const fn to_minor_units(&self) -> Option<u64> {
        self.0.checked_mul(100)
    }

    /// Returns `true` if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked multiplication by a quantity
    #[must_use]
    pub const fn checked_mul(&self, quantity: u64) -> Option<Self> {
        match self.0.checked_mul(quantity) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Checked subtraction
    #[must_use]
    pub const fn checked_sub(&self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Centers
// ============================================================================

/// A physical nursery location
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Center {
    /// Center identifier
    pub id: CenterId,
    /// Display name
    pub name: String,
}

impl Center {
    /// Creates a center whose id is derived from its name
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: CenterId::from_name(&name),
            name,
        }
    }
}

// ============================================================================
// Plants (inventory units)
// ============================================================================

/// A plant inventory unit held by a center
///
/// `stock_available` is only ever changed through the inventory ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plant {
    /// Plant identifier
    pub id: PlantId,
    /// Owning center
    pub center_id: CenterId,
    /// Display name of the listing
    pub name: String,
    /// Catalog variety id, if the listing names one
    pub variety: Option<String>,
    /// Price per plant
    pub unit_price: Money,
    /// Units available for new reservations
    pub stock_available: u32,
    /// Smallest quantity a booking may request
    pub min_order_qty: u32,
    /// Soft-delete flag
    pub active: bool,
    /// When the plant was created
    pub created_at: DateTime<Utc>,
    /// When the plant was last modified
    pub updated_at: DateTime<Utc>,
}

impl Plant {
    /// Snapshot of the fields a booking needs
    #[must_use]
    pub fn snapshot(&self) -> PlantSnapshot {
        PlantSnapshot {
            plant_id: self.id,
            center_id: self.center_id,
            variety: self.variety.clone(),
            unit_price: self.unit_price,
            min_order_qty: self.min_order_qty,
            stock_available: self.stock_available,
            active: self.active,
        }
    }
}

/// Attributes supplied by an administrator when creating a plant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPlant {
    /// Display name of the listing
    pub name: String,
    /// Variety name (catalog id or display name, case-insensitive); blank means none
    pub variety: Option<String>,
    /// Price per plant
    pub unit_price: Money,
    /// Initial stock
    pub stock_available: u32,
    /// Smallest quantity a booking may request
    pub min_order_qty: u32,
}

/// Plant fields captured at booking time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlantSnapshot {
    /// Plant identifier
    pub plant_id: PlantId,
    /// Owning center
    pub center_id: CenterId,
    /// Catalog variety id
    pub variety: Option<String>,
    /// Price per plant at the time of the request
    pub unit_price: Money,
    /// Smallest quantity a booking may request
    pub min_order_qty: u32,
    /// Stock visible when the request was made (advisory only)
    pub stock_available: u32,
    /// Whether the plant was active
    pub active: bool,
}

// ============================================================================
// Bookings
// ============================================================================

/// Booking lifecycle
///
/// ```text
/// Pending ──approve──▶ Approved ──balance paid──▶ Completed
///    │                    │
///  reject            cancel / expire
///    ▼                    ▼
/// Rejected            Cancelled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Awaiting advance payment and an administrative decision
    Pending,
    /// Stock reserved until the reservation window closes
    Approved,
    /// Refused by an administrator (terminal)
    Rejected,
    /// Released after approval (terminal)
    Cancelled,
    /// Balance paid and fulfilled (terminal)
    Completed,
}

impl BookingStatus {
    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled | Self::Completed)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Payment proof attached to a booking
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Set only by a verified advance-payment callback
    pub advance_paid: bool,
    /// Gateway intent (order) id for the advance
    pub advance_intent_id: Option<String>,
    /// Gateway payment id proven by the signature
    pub advance_transaction_id: Option<String>,
    /// Signature that proved the advance payment
    pub advance_signature: Option<String>,
    /// Whether the balance has been settled
    pub balance_paid: bool,
    /// Gateway transaction id for the balance
    pub balance_transaction_id: Option<String>,
}

/// A farmer's booking against one plant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking identifier
    pub id: BookingId,
    /// Farmer who placed the booking
    pub farmer_id: FarmerId,
    /// Center the plant belongs to
    pub center_id: CenterId,
    /// Booked plant
    pub plant_id: PlantId,
    /// Units booked (>= the plant's minimum order quantity)
    pub quantity: u32,
    /// Unit price captured when the booking was made
    pub unit_price: Money,
    /// `unit_price × quantity`
    pub amount_total: Money,
    /// Advance due before approval
    pub amount_advance: Money,
    /// `amount_total − amount_advance`
    pub amount_balance: Money,
    /// Advance percentage applied
    pub advance_percent: u8,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Payment proof
    pub payment: PaymentRecord,
    /// Units held for this booking; non-zero only while approved
    pub reserved_stock: u32,
    /// End of the reservation window; set on approval
    pub reservation_expires_at: Option<DateTime<Utc>>,
    /// Notes recorded with the approval or rejection
    pub decision_notes: Option<String>,
    /// Reason recorded on cancellation
    pub cancellation_reason: Option<String>,
    /// When the booking was requested
    pub created_at: DateTime<Utc>,
    /// When the booking last changed
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Whether the reservation window has closed at `now` without the balance being paid
    #[must_use]
    pub fn reservation_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == BookingStatus::Approved
            && !self.payment.balance_paid
            && self.reservation_expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

// ============================================================================
// Callers
// ============================================================================

/// Capability of an authenticated caller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Books plants for themselves
    Farmer,
    /// Designated staff allowed to decide bookings
    Staff,
    /// Full administrative capability
    Admin,
}

/// An authenticated caller, as established by the authentication layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Caller's user id
    pub user_id: Uuid,
    /// Caller's capability
    pub role: Role,
}

impl Actor {
    /// A farmer acting for themselves
    #[must_use]
    pub const fn farmer(farmer_id: FarmerId) -> Self {
        Self {
            user_id: *farmer_id.as_uuid(),
            role: Role::Farmer,
        }
    }

    /// An administrator
    #[must_use]
    pub fn admin() -> Self {
        Self {
            user_id: Uuid::new_v4(),
            role: Role::Admin,
        }
    }

    /// A staff member
    #[must_use]
    pub fn staff() -> Self {
        Self {
            user_id: Uuid::new_v4(),
            role: Role::Staff,
        }
    }

    /// May approve or reject bookings
    #[must_use]
    pub const fn can_decide_bookings(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Staff)
    }

    /// May create and edit plants
    #[must_use]
    pub const fn can_manage_inventory(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    /// Whether this caller is the given farmer
    #[must_use]
    pub fn is_farmer(&self, farmer_id: FarmerId) -> bool {
        self.role == Role::Farmer && self.user_id == *farmer_id.as_uuid()
    }
}
