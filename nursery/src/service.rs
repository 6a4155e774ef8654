//! Caller-facing operations.
//!
//! [`NurseryService`] is what an HTTP layer would bind to. Plant administration
//! goes straight to the [`InventoryLedger`]; everything that touches a booking
//! is sent to the booking [`Store`] and answered through the reply action for
//! its request id.
//!
//! Authorization is decided here from the caller's [`Actor`]: deciding and
//! completing bookings needs admin or staff capability, plant administration
//! needs admin, and a farmer may cancel only their own booking.

use crate::booking::{
    BookingAction, BookingEnvironment, BookingPolicy, BookingReducer, BookingState,
};
use crate::catalog::{CenterAssignment, CenterDirectory, VarietyCatalog};
use crate::config::Config;
use crate::error::{BookingError, BookingResult};
use crate::inventory::{InventoryLedger, PlantRepository};
use crate::payment::{advance_in_minor_units, GatewayCredentials, PaymentGateway, PaymentIntent};
use crate::types::{
    Actor, Booking, BookingId, CenterId, FarmerId, Money, NewPlant, Plant, PlantId, RequestId,
};
use nursery_core::environment::Clock;
use nursery_runtime::{Store, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// The booking store type
pub type BookingStore = Store<BookingState, BookingAction, BookingEnvironment, BookingReducer>;

/// Administrative decision on a pending booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Reserve stock and approve
    Approve,
    /// Reject without touching stock
    Reject,
}

/// Checkout details for an advance payment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceCheckout {
    /// Booking with the new intent id recorded
    pub booking: Booking,
    /// Intent the farmer pays against
    pub intent: PaymentIntent,
    /// Public gateway key for the client checkout
    pub key_id: String,
}

/// Caller-facing booking and inventory operations
pub struct NurseryService {
    store: BookingStore,
    ledger: Arc<InventoryLedger>,
    catalog: Arc<VarietyCatalog>,
    centers: Arc<CenterDirectory>,
    clock: Arc<dyn Clock>,
    credentials: Option<GatewayCredentials>,
    currency: String,
    reply_timeout: Duration,
}

impl NurseryService {
    /// Wires the ledger, gateway and booking store from configuration
    #[must_use]
    pub fn from_config(
        config: &Config,
        catalog: Arc<VarietyCatalog>,
        repository: Arc<dyn PlantRepository>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let centers = Arc::new(config.center_directory());
        let ledger = Arc::new(InventoryLedger::new(
            repository,
            Arc::clone(&catalog),
            Arc::clone(&centers),
            config.booking.variety_policy,
            Arc::clone(&clock),
        ));
        let credentials = config.credentials();
        let policy = BookingPolicy {
            advance_floor_percent: config.booking.advance_floor_percent,
            reservation_window: config.reservation_window(),
            currency: config.payment.currency.clone(),
        };

        let environment = BookingEnvironment {
            clock: Arc::clone(&clock),
            ledger: Arc::clone(&ledger),
            gateway,
            credentials: credentials.clone(),
            policy,
        };
        let store = Store::new(BookingState::new(), BookingReducer::new(), environment);

        tracing::info!(
            centers = centers.len(),
            varieties = catalog.len(),
            policy = ?config.booking.variety_policy,
            gateway_configured = credentials.is_some(),
            "Nursery service ready"
        );

        Self {
            store,
            ledger,
            catalog,
            centers,
            clock,
            credentials,
            currency: config.payment.currency.clone(),
            reply_timeout: config.reply_timeout(),
        }
    }

    /// The underlying booking store
    #[must_use]
    pub const fn store(&self) -> &BookingStore {
        &self.store
    }

    /// The inventory ledger
    #[must_use]
    pub fn ledger(&self) -> &InventoryLedger {
        &self.ledger
    }

    // ========================================================================
    // Varieties and plants
    // ========================================================================

    /// Suggested varieties for a center
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] if the center is unknown.
    pub fn list_variety_assignment(&self, center_id: CenterId) -> BookingResult<CenterAssignment> {
        self.centers.list_variety_assignment(&self.catalog, center_id)
    }

    /// Create a plant (admin only)
    ///
    /// # Errors
    ///
    /// [`BookingError::Unauthorized`] or any ledger validation error.
    pub async fn create_plant(
        &self,
        actor: &Actor,
        center_id: CenterId,
        new_plant: NewPlant,
    ) -> BookingResult<Plant> {
        require_inventory_admin(actor)?;
        self.ledger.create_plant(center_id, new_plant).await
    }

    /// Change a plant's variety (admin only)
    ///
    /// # Errors
    ///
    /// [`BookingError::Unauthorized`] or any ledger validation error.
    pub async fn update_plant_variety(
        &self,
        actor: &Actor,
        plant_id: PlantId,
        variety: Option<String>,
    ) -> BookingResult<Plant> {
        require_inventory_admin(actor)?;
        self.ledger.update_plant_variety(plant_id, variety).await
    }

    /// Change a plant's price or minimum order quantity (admin only)
    ///
    /// # Errors
    ///
    /// [`BookingError::Unauthorized`] or any ledger validation error.
    pub async fn update_plant_pricing(
        &self,
        actor: &Actor,
        plant_id: PlantId,
        unit_price: Option<Money>,
        min_order_qty: Option<u32>,
    ) -> BookingResult<Plant> {
        require_inventory_admin(actor)?;
        self.ledger
            .update_plant_pricing(plant_id, unit_price, min_order_qty)
            .await
    }

    /// Soft-delete a plant (admin only)
    ///
    /// # Errors
    ///
    /// [`BookingError::Unauthorized`] or [`BookingError::NotFound`].
    pub async fn deactivate_plant(&self, actor: &Actor, plant_id: PlantId) -> BookingResult<Plant> {
        require_inventory_admin(actor)?;
        self.ledger.deactivate_plant(plant_id).await
    }

    /// Active plants of a center
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] if the center is unknown.
    pub async fn list_plants(&self, center_id: CenterId) -> BookingResult<Vec<Plant>> {
        if self.centers.get(center_id).is_none() {
            return Err(BookingError::center_not_found(center_id));
        }
        self.ledger.list_plants(center_id, false).await
    }

    // ========================================================================
    // Bookings
    // ========================================================================

    /// Price and record a pending booking
    ///
    /// Nothing is reserved until approval.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for an unknown center or an unknown/inactive plant,
    /// [`BookingError::Validation`] if the plant belongs to another center,
    /// [`BookingError::InsufficientStock`] if more than the visible stock is requested,
    /// or a pricing error.
    #[tracing::instrument(skip(self))]
    pub async fn create_booking(
        &self,
        farmer_id: FarmerId,
        plant_id: PlantId,
        center_id: CenterId,
        quantity: Option<i64>,
        advance_percent: Option<i64>,
    ) -> BookingResult<Booking> {
        if self.centers.get(center_id).is_none() {
            return Err(BookingError::center_not_found(center_id));
        }
        let plant = self.ledger.plant(plant_id).await?;
        if !plant.active {
            return Err(BookingError::plant_not_found(plant_id));
        }
        if plant.center_id != center_id {
            return Err(BookingError::Validation(format!(
                "plant {plant_id} does not belong to center {center_id}"
            )));
        }

        let booking_id = BookingId::new();
        self.dispatch(|request_id| BookingAction::RequestBooking {
            request_id,
            booking_id,
            farmer_id,
            plant: plant.snapshot(),
            quantity,
            advance_percent,
        })
        .await
    }

    /// Create a gateway intent for the booking's advance
    ///
    /// Calling again before payment replaces the stored intent id.
    ///
    /// # Errors
    ///
    /// [`BookingError::GatewayNotConfigured`], [`BookingError::NotFound`],
    /// [`BookingError::InvalidStateTransition`] or a gateway failure.
    #[tracing::instrument(skip(self))]
    pub async fn create_advance_intent(&self, booking_id: BookingId) -> BookingResult<AdvanceCheckout> {
        let key_id = self
            .credentials
            .as_ref()
            .map(|credentials| credentials.key_id.clone())
            .ok_or(BookingError::GatewayNotConfigured)?;

        let booking = self
            .dispatch(|request_id| BookingAction::CreateAdvanceIntent {
                request_id,
                booking_id,
            })
            .await?;

        let intent_id = booking
            .payment
            .advance_intent_id
            .clone()
            .ok_or_else(|| BookingError::Gateway("intent was not recorded".to_string()))?;
        let intent = PaymentIntent {
            intent_id,
            amount: advance_in_minor_units(booking.amount_advance)?,
            currency: self.currency.clone(),
        };

        Ok(AdvanceCheckout {
            booking,
            intent,
            key_id,
        })
    }

    /// Verify the gateway callback and mark the advance as paid
    ///
    /// Repeating a successful verification returns the booking unchanged.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`], [`BookingError::GatewayNotConfigured`],
    /// [`BookingError::SignatureMismatch`] or [`BookingError::Validation`] for an
    /// order id that is not the booking's intent.
    #[tracing::instrument(skip(self, signature))]
    pub async fn verify_advance_payment(
        &self,
        booking_id: BookingId,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> BookingResult<Booking> {
        self.dispatch(|request_id| BookingAction::VerifyAdvancePayment {
            request_id,
            booking_id,
            order_id: order_id.to_string(),
            payment_id: payment_id.to_string(),
            signature: signature.to_string(),
        })
        .await
    }

    /// Approve or reject a pending booking (admin or staff)
    ///
    /// # Errors
    ///
    /// [`BookingError::Unauthorized`], [`BookingError::AdvanceNotPaid`],
    /// [`BookingError::InsufficientStock`] or [`BookingError::InvalidStateTransition`].
    #[tracing::instrument(skip(self, actor, notes), fields(role = ?actor.role))]
    pub async fn decide_booking(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        decision: Decision,
        notes: Option<String>,
    ) -> BookingResult<Booking> {
        if !actor.can_decide_bookings() {
            return Err(BookingError::Unauthorized(
                "only administrators or staff may decide bookings".to_string(),
            ));
        }

        match decision {
            Decision::Approve => {
                self.dispatch(|request_id| BookingAction::ApproveBooking {
                    request_id,
                    booking_id,
                    notes,
                })
                .await
            },
            Decision::Reject => {
                self.dispatch(|request_id| BookingAction::RejectBooking {
                    request_id,
                    booking_id,
                    notes,
                })
                .await
            },
        }
    }

    /// Record the balance payment and complete an approved booking (admin or staff)
    ///
    /// # Errors
    ///
    /// [`BookingError::Unauthorized`], [`BookingError::NotFound`],
    /// [`BookingError::InvalidStateTransition`] or [`BookingError::ReservationExpired`]
    /// once the reservation window has closed.
    pub async fn complete_booking(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        balance_transaction_id: Option<String>,
    ) -> BookingResult<Booking> {
        if !actor.can_decide_bookings() {
            return Err(BookingError::Unauthorized(
                "only administrators or staff may complete bookings".to_string(),
            ));
        }
        self.dispatch(|request_id| BookingAction::CompleteBooking {
            request_id,
            booking_id,
            balance_transaction_id,
        })
        .await
    }

    /// Cancel an approved booking and return its stock
    ///
    /// The owning farmer, an administrator or staff may cancel.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`], [`BookingError::Unauthorized`] or
    /// [`BookingError::InvalidStateTransition`].
    pub async fn cancel_booking(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        reason: Option<String>,
    ) -> BookingResult<Booking> {
        let booking = self.booking(booking_id).await?;
        if !actor.can_decide_bookings() && !actor.is_farmer(booking.farmer_id) {
            return Err(BookingError::Unauthorized(
                "only the booking's farmer, administrators or staff may cancel".to_string(),
            ));
        }
        self.dispatch(|request_id| BookingAction::CancelBooking {
            request_id,
            booking_id,
            reason,
        })
        .await
    }

    /// Load a booking
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] if the booking does not exist.
    pub async fn booking(&self, booking_id: BookingId) -> BookingResult<Booking> {
        self.store
            .state(|state| state.get(booking_id).cloned())
            .await
            .ok_or_else(|| BookingError::booking_not_found(booking_id))
    }

    /// A farmer's bookings, newest first
    pub async fn bookings_for_farmer(&self, farmer_id: FarmerId) -> Vec<Booking> {
        self.store.state(|state| state.for_farmer(farmer_id)).await
    }

    // ========================================================================
    // Reservation expiry
    // ========================================================================

    /// Release approved bookings whose reservation window has closed
    ///
    /// Waits until the ledger has taken back the stock of every booking found
    /// lapsed, then returns their ids. Running it again releases nothing new.
    ///
    /// # Errors
    ///
    /// [`BookingError::Unavailable`] if the store is shutting down.
    pub async fn sweep_expired_reservations(&self) -> BookingResult<Vec<BookingId>> {
        let now = self.clock.now();
        let lapsed = self.store.state(|state| state.lapsed_reservations(now)).await;
        if lapsed.is_empty() {
            return Ok(Vec::new());
        }

        let mut waiting: HashSet<BookingId> = lapsed.iter().copied().collect();
        let mut actions = self.store.subscribe_actions();
        self.store
            .send(BookingAction::SweepExpiredReservations)
            .await
            .map_err(unavailable)?;

        let mut released = Vec::with_capacity(waiting.len());
        let wait = tokio::time::timeout(self.reply_timeout, async {
            while !waiting.is_empty() {
                match actions.recv().await {
                    Ok(
                        BookingAction::StockReleased { booking_id, .. }
                        | BookingAction::StockReleaseFailed { booking_id, .. },
                    ) => {
                        if waiting.remove(&booking_id) {
                            released.push(booking_id);
                        }
                    },
                    Ok(_) | Err(RecvError::Lagged(_)) => {},
                    Err(RecvError::Closed) => break,
                }
            }
        })
        .await;

        if wait.is_err() {
            tracing::warn!(outstanding = waiting.len(), "Expiry sweep timed out waiting for releases");
        }
        tracing::info!(released = released.len(), "Expiry sweep finished");
        Ok(released)
    }

    /// Run [`Self::sweep_expired_reservations`] every `interval` until the store shuts down
    #[must_use]
    pub fn spawn_expiry_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match service.sweep_expired_reservations().await {
                    Ok(_) => {},
                    Err(BookingError::Unavailable(reason)) => {
                        tracing::info!(%reason, "Expiry sweeper stopping");
                        break;
                    },
                    Err(error) => tracing::error!(%error, "Expiry sweep failed"),
                }
            }
        })
    }

    /// Stop accepting commands and wait for running effects
    ///
    /// # Errors
    ///
    /// [`BookingError::Unavailable`] if effects are still running after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> BookingResult<()> {
        self.store.shutdown(timeout).await.map_err(unavailable)
    }

    /// Send a command and wait for its reply
    async fn dispatch<F>(&self, command: F) -> BookingResult<Booking>
    where
        F: FnOnce(RequestId) -> BookingAction,
    {
        let request_id = RequestId::new();
        let reply = self
            .store
            .send_and_wait_for(
                command(request_id),
                |action| action.is_reply_to(request_id),
                self.reply_timeout,
            )
            .await
            .map_err(unavailable)?;

        reply
            .into_result()
            .unwrap_or_else(|| Err(BookingError::Unavailable("reply carried no result".to_string())))
    }
}

fn require_inventory_admin(actor: &Actor) -> BookingResult<()> {
    if actor.can_manage_inventory() {
        Ok(())
    } else {
        Err(BookingError::Unauthorized(
            "only administrators may manage plants".to_string(),
        ))
    }
}

#[allow(clippy::needless_pass_by_value)] // Used with map_err
fn unavailable(error: StoreError) -> BookingError {
    BookingError::Unavailable(error.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::inventory::InMemoryPlantRepository;
    use crate::payment::MockPaymentGateway;
    use nursery_testing::test_clock;

    fn service(config: &Config) -> NurseryService {
        NurseryService::from_config(
            config,
            VarietyCatalog::rubber_clones().shared(),
            Arc::new(InMemoryPlantRepository::new()),
            MockPaymentGateway::shared(),
            Arc::new(test_clock()),
        )
    }

    fn seedlings(stock: u32) -> NewPlant {
        NewPlant {
            name: "GT 1 seedlings".to_string(),
            variety: Some("GT 1".to_string()),
            unit_price: Money::from_units(150),
            stock_available: stock,
            min_order_qty: 1,
        }
    }

    #[tokio::test]
    async fn farmers_cannot_manage_plants_or_decide() {
        let service = service(&Config::default());
        let center = CenterId::from_name("Kottayam");
        let farmer = Actor::farmer(FarmerId::new());

        assert!(matches!(
            service.create_plant(&farmer, center, seedlings(5)).await,
            Err(BookingError::Unauthorized(_))
        ));
        assert!(matches!(
            service.create_plant(&Actor::staff(), center, seedlings(5)).await,
            Err(BookingError::Unauthorized(_))
        ));
        assert!(matches!(
            service
                .decide_booking(&farmer, BookingId::new(), Decision::Approve, None)
                .await,
            Err(BookingError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn booking_checks_center_ownership_and_activity() {
        let service = service(&Config::default());
        let admin = Actor::admin();
        let kottayam = CenterId::from_name("Kottayam");
        let thrissur = CenterId::from_name("Thrissur");
        let plant = service.create_plant(&admin, kottayam, seedlings(5)).await.unwrap();

        let wrong_center = service
            .create_booking(FarmerId::new(), plant.id, thrissur, Some(1), None)
            .await;
        assert!(matches!(wrong_center, Err(BookingError::Validation(_))));

        service.deactivate_plant(&admin, plant.id).await.unwrap();
        let inactive = service
            .create_booking(FarmerId::new(), plant.id, kottayam, Some(1), None)
            .await;
        assert!(matches!(inactive, Err(BookingError::NotFound { entity: "plant", .. })));
    }

    #[tokio::test]
    async fn intent_requires_configured_gateway() {
        let service = service(&Config::default());
        let admin = Actor::admin();
        let center = CenterId::from_name("Kottayam");
        let plant = service.create_plant(&admin, center, seedlings(5)).await.unwrap();
        let booking = service
            .create_booking(FarmerId::new(), plant.id, center, Some(2), None)
            .await
            .unwrap();

        assert_eq!(
            service.create_advance_intent(booking.id).await,
            Err(BookingError::GatewayNotConfigured)
        );
    }

    #[tokio::test]
    async fn only_owner_or_staff_may_cancel() {
        let service = service(&Config::default());
        let admin = Actor::admin();
        let center = CenterId::from_name("Kottayam");
        let plant = service.create_plant(&admin, center, seedlings(5)).await.unwrap();
        let farmer_id = FarmerId::new();
        let booking = service
            .create_booking(farmer_id, plant.id, center, Some(2), None)
            .await
            .unwrap();

        let stranger = Actor::farmer(FarmerId::new());
        assert!(matches!(
            service.cancel_booking(&stranger, booking.id, None).await,
            Err(BookingError::Unauthorized(_))
        ));

        // The owner may try, but a pending booking cannot be cancelled
        let owner = Actor::farmer(farmer_id);
        assert!(matches!(
            service.cancel_booking(&owner, booking.id, None).await,
            Err(BookingError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn variety_assignment_by_center() {
        let service = service(&Config::default());
        let assignment = service
            .list_variety_assignment(CenterId::from_name("Palakkad"))
            .unwrap();
        let ids: Vec<_> = assignment.varieties.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["GT-1", "PB-260"]);
    }
}
