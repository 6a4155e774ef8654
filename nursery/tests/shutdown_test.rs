//! Store shutdown while an approval's stock decrement is still running.
//!
//! Run with: `cargo test --test shutdown_test`

#![allow(clippy::unwrap_used)]

use nursery_booking::inventory::{DecrementOutcome, RepositoryFuture};
use nursery_booking::{
    sign_payment, Actor, BookingStatus, CenterId, Config, Decision, FarmerId,
    InMemoryPlantRepository, MockPaymentGateway, Money, NewPlant, NurseryService, Plant,
    PlantId, PlantRepository, VarietyCatalog,
};
use nursery_testing::test_clock;
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "shutdown_secret";

/// Repository whose conditional decrement takes a while to land
struct SlowDecrementRepository {
    inner: InMemoryPlantRepository,
    delay: Duration,
}

impl PlantRepository for SlowDecrementRepository {
    fn insert(&self, plant: Plant) -> RepositoryFuture<'_, ()> {
        self.inner.insert(plant)
    }

    fn get(&self, plant_id: PlantId) -> RepositoryFuture<'_, Option<Plant>> {
        self.inner.get(plant_id)
    }

    fn list_by_center(
        &self,
        center_id: CenterId,
        active_only: bool,
    ) -> RepositoryFuture<'_, Vec<Plant>> {
        self.inner.list_by_center(center_id, active_only)
    }

    fn update(&self, plant: Plant) -> RepositoryFuture<'_, Plant> {
        self.inner.update(plant)
    }

    fn decrement_if_available(
        &self,
        plant_id: PlantId,
        quantity: u32,
    ) -> RepositoryFuture<'_, DecrementOutcome> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.decrement_if_available(plant_id, quantity).await
        })
    }

    fn increment(&self, plant_id: PlantId, quantity: u32) -> RepositoryFuture<'_, u32> {
        self.inner.increment(plant_id, quantity)
    }
}

#[tokio::test]
async fn test_approval_in_flight_completes_during_shutdown() {
    let mut config = Config::default();
    config.payment.key_id = Some("shutdown_key".to_string());
    config.payment.key_secret = Some(SECRET.to_string());
    let service = Arc::new(NurseryService::from_config(
        &config,
        VarietyCatalog::rubber_clones().shared(),
        Arc::new(SlowDecrementRepository {
            inner: InMemoryPlantRepository::new(),
            delay: Duration::from_millis(200),
        }),
        MockPaymentGateway::shared(),
        Arc::new(test_clock()),
    ));

    let center = CenterId::from_name("Kottayam");
    let plant = service
        .create_plant(
            &Actor::admin(),
            center,
            NewPlant {
                name: "GT 1 stumps".to_string(),
                variety: Some("GT 1".to_string()),
                unit_price: Money::from_units(100),
                stock_available: 5,
                min_order_qty: 1,
            },
        )
        .await
        .unwrap();

    let booking = service
        .create_booking(FarmerId::new(), plant.id, center, Some(3), None)
        .await
        .unwrap();
    let checkout = service.create_advance_intent(booking.id).await.unwrap();
    let signature = sign_payment(SECRET, &checkout.intent.intent_id, "pay").unwrap();
    service
        .verify_advance_payment(booking.id, &checkout.intent.intent_id, "pay", &signature)
        .await
        .unwrap();

    let approval = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .decide_booking(&Actor::admin(), booking.id, Decision::Approve, None)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    service.shutdown(Duration::from_secs(2)).await.unwrap();

    let approved = approval.await.unwrap().unwrap();
    assert_eq!(approved.status, BookingStatus::Approved);
    assert_eq!(approved.reserved_stock, 3);

    // Stock taken by the ledger is held by the booking
    assert_eq!(service.ledger().plant(plant.id).await.unwrap().stock_available, 2);
    let stored = service.booking(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Approved);
    assert!(service
        .store()
        .state(|state| state.approvals_in_flight.is_empty())
        .await);

    // New commands are refused once shut down
    assert!(matches!(
        service.decide_booking(&Actor::admin(), booking.id, Decision::Reject, None).await,
        Err(nursery_booking::BookingError::Unavailable(_))
    ));
}
