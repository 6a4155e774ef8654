//! Booking state machine.
//!
//! ```text
//! Pending ──approve (advance paid, stock taken)──▶ Approved ──balance──▶ Completed
//!    │                                                │
//!  reject                                   cancel / reservation lapsed
//!    ▼                                                ▼
//! Rejected                                       Cancelled (stock returned)
//! ```
//!
//! Every command carries a [`RequestId`] and is answered with exactly one
//! [`BookingAction::Resolved`], emitted as an effect so callers waiting on
//! the store's action broadcast receive it. Commands that need the ledger or
//! the gateway finish in a follow-up event (`StockReserved`, `ApprovalFailed`,
//! `AdvanceIntentCreated`, ...) which produces the reply.
//!
//! # Atomicity
//!
//! Approval marks the booking as in flight and asks the ledger for an atomic
//! conditional decrement. The booking only becomes approved once the
//! decrement succeeded; on failure nothing changes. Stock goes back to the
//! ledger on the single `Approved → Cancelled` transition, so cancelling,
//! expiring and sweeping the same booking release its stock at most once.

use crate::error::BookingError;
use crate::inventory::InventoryLedger;
use crate::payment::{
    advance_in_minor_units, verify_payment_signature, GatewayCredentials, PaymentGateway,
    PaymentIntent,
};
use crate::pricing::compute_booking;
use crate::types::{
    Booking, BookingId, BookingStatus, FarmerId, PaymentRecord, PlantId, PlantSnapshot, RequestId,
};
use chrono::{DateTime, Duration, Utc};
use nursery_core::{
    async_effect, delay, effect::Effect, emit, environment::Clock, reducer::Reducer, smallvec,
    SmallVec,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Actions for the booking reducer
#[derive(Clone, Debug)]
pub enum BookingAction {
    // Commands
    /// A farmer asks to book a plant
    RequestBooking {
        /// Correlation id for the reply
        request_id: RequestId,
        /// Id for the new booking
        booking_id: BookingId,
        /// Farmer placing the booking
        farmer_id: FarmerId,
        /// Plant as loaded from the ledger
        plant: PlantSnapshot,
        /// Requested quantity (raised to the minimum order quantity)
        quantity: Option<i64>,
        /// Requested advance percentage (raised to the floor)
        advance_percent: Option<i64>,
    },

    /// Create a gateway intent for the booking's advance
    CreateAdvanceIntent {
        /// Correlation id for the reply
        request_id: RequestId,
        /// Booking to collect the advance for
        booking_id: BookingId,
    },

    /// Gateway callback proving the advance was paid
    VerifyAdvancePayment {
        /// Correlation id for the reply
        request_id: RequestId,
        /// Booking the payment is for
        booking_id: BookingId,
        /// Gateway order (intent) id
        order_id: String,
        /// Gateway payment id
        payment_id: String,
        /// Hex HMAC-SHA256 supplied by the gateway
        signature: String,
    },

    /// Approve a pending booking and reserve its stock
    ApproveBooking {
        /// Correlation id for the reply
        request_id: RequestId,
        /// Booking to approve
        booking_id: BookingId,
        /// Notes recorded with the decision
        notes: Option<String>,
    },

    /// Reject a pending booking
    RejectBooking {
        /// Correlation id for the reply
        request_id: RequestId,
        /// Booking to reject
        booking_id: BookingId,
        /// Notes recorded with the decision
        notes: Option<String>,
    },

    /// Record the balance payment and fulfil an approved booking
    CompleteBooking {
        /// Correlation id for the reply
        request_id: RequestId,
        /// Booking to complete
        booking_id: BookingId,
        /// Gateway transaction id for the balance
        balance_transaction_id: Option<String>,
    },

    /// Cancel an approved booking and release its stock
    CancelBooking {
        /// Correlation id for the reply
        request_id: RequestId,
        /// Booking to cancel
        booking_id: BookingId,
        /// Reason recorded on the booking
        reason: Option<String>,
    },

    /// Reservation timer fired for one booking
    ExpireReservation {
        /// Booking whose window may have closed
        booking_id: BookingId,
    },

    /// Release every approved booking whose window has closed
    SweepExpiredReservations,

    // Events
    /// Gateway created the advance intent
    AdvanceIntentCreated {
        /// Correlation id for the reply
        request_id: RequestId,
        /// Booking the intent is for
        booking_id: BookingId,
        /// Intent returned by the gateway
        intent: PaymentIntent,
    },

    /// Gateway refused to create the intent
    AdvanceIntentFailed {
        /// Correlation id for the reply
        request_id: RequestId,
        /// Booking the intent was for
        booking_id: BookingId,
        /// Failure
        error: BookingError,
    },

    /// Ledger took the booking's quantity from stock
    StockReserved {
        /// Correlation id for the reply
        request_id: RequestId,
        /// Booking being approved
        booking_id: BookingId,
        /// Notes recorded with the decision
        notes: Option<String>,
        /// Plant stock after the decrement
        remaining: u32,
    },

    /// Ledger refused the decrement (or failed)
    ApprovalFailed {
        /// Correlation id for the reply
        request_id: RequestId,
        /// Booking that stays pending
        booking_id: BookingId,
        /// Failure
        error: BookingError,
    },

    /// Reserved stock was returned to the plant
    StockReleased {
        /// Booking whose reservation was released
        booking_id: BookingId,
        /// Plant stock after the release
        stock: u32,
    },

    /// Returning reserved stock failed
    StockReleaseFailed {
        /// Booking whose reservation could not be released
        booking_id: BookingId,
        /// Failure
        error: BookingError,
    },

    // Replies
    /// Outcome of a command, correlated by request id
    Resolved {
        /// Id of the command this answers
        request_id: RequestId,
        /// Booking after the command, or why it was refused
        result: Result<Booking, BookingError>,
    },
}

impl BookingAction {
    /// Whether this action is the reply to `request_id`
    #[must_use]
    pub fn is_reply_to(&self, request_id: RequestId) -> bool {
        matches!(self, Self::Resolved { request_id: id, .. } if *id == request_id)
    }

    /// The reply payload, if this is a reply
    #[must_use]
    pub fn into_result(self) -> Option<Result<Booking, BookingError>> {
        match self {
            Self::Resolved { result, .. } => Some(result),
            _ => None,
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// All bookings and the approvals waiting on the ledger
#[derive(Clone, Debug, Default)]
pub struct BookingState {
    /// Bookings by id
    pub bookings: HashMap<BookingId, Booking>,
    /// Bookings whose stock decrement is in progress
    pub approvals_in_flight: HashSet<BookingId>,
    /// Most recent failure observed by the reducer
    pub last_error: Option<BookingError>,
}

impl BookingState {
    /// Creates empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a booking
    #[must_use]
    pub fn get(&self, booking_id: BookingId) -> Option<&Booking> {
        self.bookings.get(&booking_id)
    }

    /// A farmer's bookings, newest first
    #[must_use]
    pub fn for_farmer(&self, farmer_id: FarmerId) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = self
            .bookings
            .values()
            .filter(|booking| booking.farmer_id == farmer_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bookings
    }

    /// Approved bookings whose reservation window has closed at `now`
    #[must_use]
    pub fn lapsed_reservations(&self, now: DateTime<Utc>) -> Vec<BookingId> {
        let mut lapsed: Vec<BookingId> = self
            .bookings
            .values()
            .filter(|booking| booking.reservation_lapsed(now))
            .map(|booking| booking.id)
            .collect();
        lapsed.sort();
        lapsed
    }

    /// Number of bookings
    #[must_use]
    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    /// Whether there are no bookings
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Booking rules applied by the reducer
#[derive(Clone, Debug)]
pub struct BookingPolicy {
    /// Minimum advance percentage
    pub advance_floor_percent: u8,
    /// How long approved stock is held
    pub reservation_window: Duration,
    /// Currency for advance intents
    pub currency: String,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            advance_floor_percent: 10,
            reservation_window: Duration::hours(72),
            currency: "INR".to_string(),
        }
    }
}

/// Dependencies injected into the booking reducer
#[derive(Clone)]
pub struct BookingEnvironment {
    /// Time source for reservation windows
    pub clock: Arc<dyn Clock>,
    /// Stock ledger
    pub ledger: Arc<InventoryLedger>,
    /// Payment gateway
    pub gateway: Arc<dyn PaymentGateway>,
    /// Gateway credentials; `None` means the gateway is not configured
    pub credentials: Option<GatewayCredentials>,
    /// Booking rules
    pub policy: BookingPolicy,
}

// ============================================================================
// Reducer
// ============================================================================

type Effects = SmallVec<[Effect<BookingAction>; 4]>;

/// Reducer for the booking lifecycle
#[derive(Clone, Debug, Default)]
pub struct BookingReducer;

impl BookingReducer {
    /// Creates the reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn reply(request_id: RequestId, result: Result<Booking, BookingError>) -> Effect<BookingAction> {
        emit!(BookingAction::Resolved { request_id, result })
    }

    fn refuse(state: &mut BookingState, request_id: RequestId, error: BookingError) -> Effects {
        tracing::debug!(%request_id, %error, "Booking command refused");
        state.last_error = Some(error.clone());
        smallvec![Self::reply(request_id, Err(error))]
    }

    #[allow(clippy::too_many_arguments)]
    fn request_booking(
        state: &mut BookingState,
        env: &BookingEnvironment,
        request_id: RequestId,
        booking_id: BookingId,
        farmer_id: FarmerId,
        plant: &PlantSnapshot,
        quantity: Option<i64>,
        advance_percent: Option<i64>,
    ) -> Effects {
        if state.bookings.contains_key(&booking_id) {
            return Self::refuse(
                state,
                request_id,
                BookingError::Validation(format!("booking {booking_id} already exists")),
            );
        }
        if !plant.active {
            return Self::refuse(state, request_id, BookingError::plant_not_found(plant.plant_id));
        }

        let quote = match compute_booking(
            plant.unit_price,
            quantity,
            plant.min_order_qty,
            advance_percent,
            env.policy.advance_floor_percent,
        ) {
            Ok(quote) => quote,
            Err(error) => return Self::refuse(state, request_id, error),
        };

        // Advisory only; approval re-checks atomically.
        if quote.quantity > plant.stock_available {
            return Self::refuse(
                state,
                request_id,
                BookingError::InsufficientStock {
                    plant_id: plant.plant_id,
                    requested: quote.quantity,
                    available: plant.stock_available,
                },
            );
        }

        let now = env.clock.now();
        let booking = Booking {
            id: booking_id,
            farmer_id,
            center_id: plant.center_id,
            plant_id: plant.plant_id,
            quantity: quote.quantity,
            unit_price: plant.unit_price,
            amount_total: quote.amount_total,
            amount_advance: quote.amount_advance,
            amount_balance: quote.amount_balance,
            advance_percent: quote.advance_percent,
            status: BookingStatus::Pending,
            payment: PaymentRecord::default(),
            reserved_stock: 0,
            reservation_expires_at: None,
            decision_notes: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.bookings.insert(booking_id, booking.clone());

        metrics::counter!("nursery.bookings.created").increment(1);
        tracing::info!(
            %booking_id,
            %farmer_id,
            plant_id = %plant.plant_id,
            quantity = quote.quantity,
            total = %quote.amount_total,
            advance = %quote.amount_advance,
            "Booking requested"
        );
        smallvec![Self::reply(request_id, Ok(booking))]
    }

    fn create_advance_intent(
        state: &mut BookingState,
        env: &BookingEnvironment,
        request_id: RequestId,
        booking_id: BookingId,
    ) -> Effects {
        let Some(booking) = state.bookings.get(&booking_id) else {
            return Self::refuse(state, request_id, BookingError::booking_not_found(booking_id));
        };
        if env.credentials.is_none() {
            return Self::refuse(state, request_id, BookingError::GatewayNotConfigured);
        }
        if booking.status != BookingStatus::Pending {
            let status = booking.status;
            return Self::refuse(
                state,
                request_id,
                BookingError::InvalidStateTransition {
                    status,
                    operation: "collect advance for",
                },
            );
        }
        if booking.payment.advance_paid {
            return Self::refuse(
                state,
                request_id,
                BookingError::Validation("advance already paid".to_string()),
            );
        }
        let amount_minor = match advance_in_minor_units(booking.amount_advance) {
            Ok(amount) => amount,
            Err(error) => return Self::refuse(state, request_id, error),
        };

        let gateway = Arc::clone(&env.gateway);
        let currency = env.policy.currency.clone();
        let receipt = format!("booking_{booking_id}");
        let notes = BTreeMap::from([
            ("booking_id".to_string(), booking_id.to_string()),
            ("farmer_id".to_string(), booking.farmer_id.to_string()),
            ("plant_id".to_string(), booking.plant_id.to_string()),
        ]);

        smallvec![async_effect! {
            match gateway.create_intent(amount_minor, &currency, &receipt, notes).await {
                Ok(intent) => Some(BookingAction::AdvanceIntentCreated {
                    request_id,
                    booking_id,
                    intent,
                }),
                Err(error) => Some(BookingAction::AdvanceIntentFailed {
                    request_id,
                    booking_id,
                    error: error.into(),
                }),
            }
        }]
    }

    fn advance_intent_created(
        state: &mut BookingState,
        env: &BookingEnvironment,
        request_id: RequestId,
        booking_id: BookingId,
        intent: PaymentIntent,
    ) -> Effects {
        let Some(booking) = state.bookings.get_mut(&booking_id) else {
            return Self::refuse(state, request_id, BookingError::booking_not_found(booking_id));
        };

        // A newer intent replaces the stored one; earlier intents can no longer verify.
        if !booking.payment.advance_paid {
            booking.payment.advance_intent_id = Some(intent.intent_id.clone());
            booking.updated_at = env.clock.now();
        }

        tracing::info!(%booking_id, intent_id = %intent.intent_id, amount_minor = intent.amount, "Advance intent recorded");
        smallvec![Self::reply(request_id, Ok(booking.clone()))]
    }

    fn verify_advance_payment(
        state: &mut BookingState,
        env: &BookingEnvironment,
        request_id: RequestId,
        booking_id: BookingId,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Effects {
        if !state.bookings.contains_key(&booking_id) {
            return Self::refuse(state, request_id, BookingError::booking_not_found(booking_id));
        }
        let Some(credentials) = env.credentials.as_ref() else {
            return Self::refuse(state, request_id, BookingError::GatewayNotConfigured);
        };
        if let Err(error) =
            verify_payment_signature(&credentials.key_secret, order_id, payment_id, signature)
        {
            metrics::counter!("nursery.payments.signature_mismatch").increment(1);
            tracing::warn!(%booking_id, order_id, "Payment signature rejected");
            return Self::refuse(state, request_id, error);
        }

        let Some(booking) = state.bookings.get_mut(&booking_id) else {
            return Self::refuse(state, request_id, BookingError::booking_not_found(booking_id));
        };

        if booking.payment.advance_intent_id.as_deref() != Some(order_id) {
            return Self::refuse(
                state,
                request_id,
                BookingError::Validation(format!(
                    "order {order_id} is not the payment intent of booking {booking_id}"
                )),
            );
        }

        if booking.payment.advance_paid {
            tracing::debug!(%booking_id, "Advance already verified");
            return smallvec![Self::reply(request_id, Ok(booking.clone()))];
        }

        if booking.status != BookingStatus::Pending {
            let status = booking.status;
            return Self::refuse(
                state,
                request_id,
                BookingError::InvalidStateTransition {
                    status,
                    operation: "record advance for",
                },
            );
        }

        booking.payment.advance_paid = true;
        booking.payment.advance_transaction_id = Some(payment_id.to_string());
        booking.payment.advance_signature = Some(signature.trim().to_string());
        booking.updated_at = env.clock.now();

        tracing::info!(%booking_id, payment_id, "Advance payment verified");
        smallvec![Self::reply(request_id, Ok(booking.clone()))]
    }

    fn approve_booking(
        state: &mut BookingState,
        env: &BookingEnvironment,
        request_id: RequestId,
        booking_id: BookingId,
        notes: Option<String>,
    ) -> Effects {
        let Some(booking) = state.bookings.get(&booking_id) else {
            return Self::refuse(state, request_id, BookingError::booking_not_found(booking_id));
        };
        if booking.status != BookingStatus::Pending {
            let status = booking.status;
            return Self::refuse(
                state,
                request_id,
                BookingError::InvalidStateTransition {
                    status,
                    operation: "approve",
                },
            );
        }
        if state.approvals_in_flight.contains(&booking_id) {
            return Self::refuse(
                state,
                request_id,
                BookingError::Validation(format!("approval of booking {booking_id} already in progress")),
            );
        }
        if !booking.payment.advance_paid {
            return Self::refuse(state, request_id, BookingError::AdvanceNotPaid(booking_id));
        }

        let plant_id = booking.plant_id;
        let quantity = booking.quantity;
        state.approvals_in_flight.insert(booking_id);

        let ledger = Arc::clone(&env.ledger);
        smallvec![async_effect! {
            match ledger.decrement_stock(plant_id, quantity).await {
                Ok(remaining) => Some(BookingAction::StockReserved {
                    request_id,
                    booking_id,
                    notes,
                    remaining,
                }),
                Err(error) => Some(BookingAction::ApprovalFailed {
                    request_id,
                    booking_id,
                    error,
                }),
            }
        }]
    }

    fn stock_reserved(
        state: &mut BookingState,
        env: &BookingEnvironment,
        request_id: RequestId,
        booking_id: BookingId,
        notes: Option<String>,
        remaining: u32,
    ) -> Effects {
        state.approvals_in_flight.remove(&booking_id);

        let Some(booking) = state
            .bookings
            .get_mut(&booking_id)
            .filter(|booking| booking.status == BookingStatus::Pending)
        else {
            // Nothing to attach the reservation to; give the stock back.
            let taken = state
                .bookings
                .get(&booking_id)
                .map(|booking| (booking.plant_id, booking.quantity));
            let error = BookingError::InvalidStateTransition {
                status: state
                    .bookings
                    .get(&booking_id)
                    .map_or(BookingStatus::Cancelled, |booking| booking.status),
                operation: "approve",
            };
            let mut effects = Self::refuse(state, request_id, error);
            if let Some((plant_id, quantity)) = taken {
                effects.push(Self::release_stock(env, booking_id, plant_id, quantity));
            }
            return effects;
        };

        let now = env.clock.now();
        let window = env.policy.reservation_window;
        booking.status = BookingStatus::Approved;
        booking.reserved_stock = booking.quantity;
        booking.reservation_expires_at = Some(now + window);
        booking.decision_notes = notes;
        booking.updated_at = now;

        metrics::counter!("nursery.bookings.approved").increment(1);
        tracing::info!(
            %booking_id,
            reserved = booking.reserved_stock,
            remaining,
            expires_at = ?booking.reservation_expires_at,
            "Booking approved"
        );

        smallvec![
            Self::reply(request_id, Ok(booking.clone())),
            delay! {
                duration: window.to_std().unwrap_or_default(),
                action: BookingAction::ExpireReservation { booking_id }
            },
        ]
    }

    fn reject_booking(
        state: &mut BookingState,
        env: &BookingEnvironment,
        request_id: RequestId,
        booking_id: BookingId,
        notes: Option<String>,
    ) -> Effects {
        let in_flight = state.approvals_in_flight.contains(&booking_id);
        let Some(booking) = state.bookings.get_mut(&booking_id) else {
            return Self::refuse(state, request_id, BookingError::booking_not_found(booking_id));
        };
        if booking.status != BookingStatus::Pending {
            let status = booking.status;
            return Self::refuse(
                state,
                request_id,
                BookingError::InvalidStateTransition {
                    status,
                    operation: "reject",
                },
            );
        }
        if in_flight {
            return Self::refuse(
                state,
                request_id,
                BookingError::Validation(format!("approval of booking {booking_id} already in progress")),
            );
        }

        booking.status = BookingStatus::Rejected;
        booking.decision_notes = notes;
        booking.updated_at = env.clock.now();

        metrics::counter!("nursery.bookings.rejected").increment(1);
        tracing::info!(%booking_id, "Booking rejected");
        smallvec![Self::reply(request_id, Ok(booking.clone()))]
    }

    fn complete_booking(
        state: &mut BookingState,
        env: &BookingEnvironment,
        request_id: RequestId,
        booking_id: BookingId,
        balance_transaction_id: Option<String>,
    ) -> Effects {
        let Some(booking) = state.bookings.get_mut(&booking_id) else {
            return Self::refuse(state, request_id, BookingError::booking_not_found(booking_id));
        };
        if booking.status != BookingStatus::Approved {
            let status = booking.status;
            return Self::refuse(
                state,
                request_id,
                BookingError::InvalidStateTransition {
                    status,
                    operation: "complete",
                },
            );
        }
        // The expiry sweep owns a lapsed reservation's stock
        if booking.reservation_lapsed(env.clock.now()) {
            return Self::refuse(state, request_id, BookingError::ReservationExpired(booking_id));
        }

        booking.status = BookingStatus::Completed;
        booking.payment.balance_paid = true;
        booking.payment.balance_transaction_id = balance_transaction_id;
        booking.reserved_stock = 0;
        booking.reservation_expires_at = None;
        booking.updated_at = env.clock.now();

        tracing::info!(%booking_id, "Booking completed");
        smallvec![Self::reply(request_id, Ok(booking.clone()))]
    }

    fn cancel_booking(
        state: &mut BookingState,
        env: &BookingEnvironment,
        request_id: RequestId,
        booking_id: BookingId,
        reason: Option<String>,
    ) -> Effects {
        let Some(booking) = state.bookings.get_mut(&booking_id) else {
            return Self::refuse(state, request_id, BookingError::booking_not_found(booking_id));
        };
        if booking.status != BookingStatus::Approved {
            let status = booking.status;
            return Self::refuse(
                state,
                request_id,
                BookingError::InvalidStateTransition {
                    status,
                    operation: "cancel",
                },
            );
        }

        let release = Self::release(booking, env, reason);
        tracing::info!(%booking_id, "Booking cancelled");

        // Reply once the stock is back so callers observe the restored count.
        smallvec![Effect::chain(vec![
            release,
            Self::reply(request_id, Ok(booking.clone())),
        ])]
    }

    fn expire_reservation(
        state: &mut BookingState,
        env: &BookingEnvironment,
        booking_id: BookingId,
    ) -> Effects {
        let now = env.clock.now();
        match state.bookings.get_mut(&booking_id) {
            Some(booking) if booking.reservation_lapsed(now) => {
                metrics::counter!("nursery.reservations.expired").increment(1);
                tracing::info!(%booking_id, "Reservation expired");
                smallvec![Self::release(
                    booking,
                    env,
                    Some("reservation expired".to_string())
                )]
            },
            _ => SmallVec::new(),
        }
    }

    fn sweep_expired(state: &mut BookingState, env: &BookingEnvironment) -> Effects {
        let lapsed = state.lapsed_reservations(env.clock.now());
        if lapsed.is_empty() {
            return SmallVec::new();
        }

        tracing::info!(count = lapsed.len(), "Sweeping expired reservations");
        let releases = lapsed
            .into_iter()
            .flat_map(|booking_id| Self::expire_reservation(state, env, booking_id))
            .collect();
        smallvec![Effect::merge(releases)]
    }

    /// `Approved → Cancelled`, returning the effect that gives the stock back
    fn release(
        booking: &mut Booking,
        env: &BookingEnvironment,
        reason: Option<String>,
    ) -> Effect<BookingAction> {
        let effect = Self::release_stock(env, booking.id, booking.plant_id, booking.reserved_stock);
        booking.status = BookingStatus::Cancelled;
        booking.reserved_stock = 0;
        booking.reservation_expires_at = None;
        booking.cancellation_reason = reason;
        booking.updated_at = env.clock.now();
        effect
    }

    fn release_stock(
        env: &BookingEnvironment,
        booking_id: BookingId,
        plant_id: PlantId,
        quantity: u32,
    ) -> Effect<BookingAction> {
        let ledger = Arc::clone(&env.ledger);

        async_effect! {
            match ledger.increment_stock(plant_id, quantity).await {
                Ok(stock) => Some(BookingAction::StockReleased { booking_id, stock }),
                Err(error) => Some(BookingAction::StockReleaseFailed { booking_id, error }),
            }
        }
    }
}

impl Reducer for BookingReducer {
    type State = BookingState;
    type Action = BookingAction;
    type Environment = BookingEnvironment;

    #[allow(clippy::too_many_lines)] // One arm per action
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            BookingAction::RequestBooking {
                request_id,
                booking_id,
                farmer_id,
                plant,
                quantity,
                advance_percent,
            } => Self::request_booking(
                state,
                env,
                request_id,
                booking_id,
                farmer_id,
                &plant,
                quantity,
                advance_percent,
            ),

            BookingAction::CreateAdvanceIntent {
                request_id,
                booking_id,
            } => Self::create_advance_intent(state, env, request_id, booking_id),

            BookingAction::AdvanceIntentCreated {
                request_id,
                booking_id,
                intent,
            } => Self::advance_intent_created(state, env, request_id, booking_id, intent),

            BookingAction::AdvanceIntentFailed {
                request_id,
                booking_id,
                error,
            } => {
                tracing::warn!(%booking_id, %error, "Advance intent creation failed");
                Self::refuse(state, request_id, error)
            },

            BookingAction::VerifyAdvancePayment {
                request_id,
                booking_id,
                order_id,
                payment_id,
                signature,
            } => Self::verify_advance_payment(
                state,
                env,
                request_id,
                booking_id,
                &order_id,
                &payment_id,
                &signature,
            ),

            BookingAction::ApproveBooking {
                request_id,
                booking_id,
                notes,
            } => Self::approve_booking(state, env, request_id, booking_id, notes),

            BookingAction::StockReserved {
                request_id,
                booking_id,
                notes,
                remaining,
            } => Self::stock_reserved(state, env, request_id, booking_id, notes, remaining),

            BookingAction::ApprovalFailed {
                request_id,
                booking_id,
                error,
            } => {
                state.approvals_in_flight.remove(&booking_id);
                tracing::info!(%booking_id, %error, "Approval failed; booking stays pending");
                Self::refuse(state, request_id, error)
            },

            BookingAction::RejectBooking {
                request_id,
                booking_id,
                notes,
            } => Self::reject_booking(state, env, request_id, booking_id, notes),

            BookingAction::CompleteBooking {
                request_id,
                booking_id,
                balance_transaction_id,
            } => Self::complete_booking(state, env, request_id, booking_id, balance_transaction_id),

            BookingAction::CancelBooking {
                request_id,
                booking_id,
                reason,
            } => Self::cancel_booking(state, env, request_id, booking_id, reason),

            BookingAction::ExpireReservation { booking_id } => {
                Self::expire_reservation(state, env, booking_id)
            },

            BookingAction::SweepExpiredReservations => Self::sweep_expired(state, env),

            BookingAction::StockReleased { booking_id, stock } => {
                tracing::debug!(%booking_id, stock, "Reserved stock released");
                SmallVec::new()
            },

            BookingAction::StockReleaseFailed { booking_id, error } => {
                tracing::error!(%booking_id, %error, "Failed to release reserved stock");
                state.last_error = Some(error);
                SmallVec::new()
            },

            BookingAction::Resolved { .. } => SmallVec::new(),
        }
    }
}
