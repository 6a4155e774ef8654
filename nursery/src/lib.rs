//! # Nursery Booking
//!
//! Booking core for a rubber-plant nursery network: farmers book saplings
//! held at distribution centers, pay an advance through a payment gateway,
//! and an administrator approves the booking, which reserves stock.
//!
//! ## Layout
//!
//! - [`catalog`]: the variety pool and its deterministic split across centers
//! - [`pricing`]: quantity defaults and the advance/balance split
//! - [`inventory`]: plants, the per-center variety cap and atomic stock moves
//! - [`payment`]: gateway intents and local HMAC verification of callbacks
//! - [`booking`]: the booking lifecycle as a reducer
//! - [`service`]: the caller-facing operations wired onto a store
//!
//! ## Lifecycle
//!
//! ```text
//! pending ──approve (advance paid, stock reserved)──▶ approved ──balance──▶ completed
//!    │                                                  │
//!    └──reject──▶ rejected                cancel/expiry └──▶ cancelled (stock returned)
//! ```
//!
//! Stock leaves the ledger only on approval and comes back only when an
//! approved booking is cancelled or its reservation lapses.

pub mod booking;
pub mod catalog;
pub mod config;
pub mod error;
pub mod inventory;
pub mod payment;
pub mod pricing;
pub mod service;
pub mod types;

pub use booking::{BookingAction, BookingEnvironment, BookingPolicy, BookingReducer, BookingState};
pub use catalog::{CenterAssignment, CenterDirectory, VarietyCatalog, VarietyDescriptor};
pub use config::Config;
pub use error::{BookingError, BookingResult, ConfigError};
pub use inventory::{InMemoryPlantRepository, InventoryLedger, PlantRepository, VarietyPolicy};
pub use payment::{
    sign_payment, verify_payment_signature, GatewayCredentials, MockPaymentGateway, PaymentGateway,
    PaymentIntent,
};
pub use pricing::{compute_booking, BookingQuote};
pub use service::{AdvanceCheckout, Decision, NurseryService};
pub use types::{
    Actor, Booking, BookingId, BookingStatus, Center, CenterId, FarmerId, Money, NewPlant, Plant,
    PlantId, Role,
};
