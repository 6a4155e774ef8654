//! Concurrency tests: competing approvals on one plant and racing plant
//! creation against the per-center variety cap.
//!
//! Run with: `cargo test --test concurrency_test`

#![allow(clippy::unwrap_used)]

use futures::future::join_all;
use nursery_booking::{
    sign_payment, Actor, Booking, BookingError, BookingStatus, CenterId, Config, Decision,
    FarmerId, InMemoryPlantRepository, MockPaymentGateway, Money, NewPlant, NurseryService,
    VarietyCatalog,
};
use nursery_testing::test_clock;
use std::sync::Arc;

const SECRET: &str = "race_secret";

fn service() -> Arc<NurseryService> {
    let mut config = Config::default();
    config.payment.key_id = Some("race_key".to_string());
    config.payment.key_secret = Some(SECRET.to_string());
    Arc::new(NurseryService::from_config(
        &config,
        VarietyCatalog::rubber_clones().shared(),
        Arc::new(InMemoryPlantRepository::new()),
        MockPaymentGateway::shared(),
        Arc::new(test_clock()),
    ))
}

fn seedlings(variety: &str, stock: u32) -> NewPlant {
    NewPlant {
        name: format!("{variety} seedlings"),
        variety: Some(variety.to_string()),
        unit_price: Money::from_units(100),
        stock_available: stock,
        min_order_qty: 1,
    }
}

async fn paid_booking(
    service: &NurseryService,
    plant_id: nursery_booking::PlantId,
    center: CenterId,
    quantity: i64,
) -> Booking {
    let booking = service
        .create_booking(FarmerId::new(), plant_id, center, Some(quantity), None)
        .await
        .unwrap();
    let checkout = service.create_advance_intent(booking.id).await.unwrap();
    let signature = sign_payment(SECRET, &checkout.intent.intent_id, "pay").unwrap();
    service
        .verify_advance_payment(booking.id, &checkout.intent.intent_id, "pay", &signature)
        .await
        .unwrap()
}

/// Two approvals of 3 units each compete for 5 units: exactly one wins.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_competing_approvals_never_oversell() {
    let service = service();
    let center = CenterId::from_name("Kottayam");
    let plant = service
        .create_plant(&Actor::admin(), center, seedlings("RRII 105", 5))
        .await
        .unwrap();

    let first = paid_booking(&service, plant.id, center, 3).await;
    let second = paid_booking(&service, plant.id, center, 3).await;

    let approvals = [first.id, second.id].map(|booking_id| {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .decide_booking(&Actor::admin(), booking_id, Decision::Approve, None)
                .await
        })
    });
    let results: Vec<_> = join_all(approvals)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let approved = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(BookingError::InsufficientStock { .. })))
        .count();
    assert_eq!(approved, 1);
    assert_eq!(refused, 1);

    assert_eq!(service.ledger().plant(plant.id).await.unwrap().stock_available, 2);

    // The loser stays pending with nothing reserved
    let statuses: Vec<_> = [first.id, second.id]
        .into_iter()
        .map(|id| {
            let service = Arc::clone(&service);
            async move { service.booking(id).await.unwrap() }
        })
        .collect();
    let bookings = join_all(statuses).await;
    assert_eq!(
        bookings.iter().filter(|b| b.status == BookingStatus::Pending).count(),
        1
    );
    assert_eq!(bookings.iter().map(|b| b.reserved_stock).sum::<u32>(), 3);
}

/// Many small approvals against a deep plant: the ledger ends at the exact remainder.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_approvals_account_for_every_unit() {
    let service = service();
    let center = CenterId::from_name("Thrissur");
    let plant = service
        .create_plant(&Actor::admin(), center, seedlings("RRII 430", 20))
        .await
        .unwrap();

    let mut booking_ids = Vec::new();
    for _ in 0..8 {
        booking_ids.push(paid_booking(&service, plant.id, center, 3).await.id);
    }

    let approvals = booking_ids.into_iter().map(|booking_id| {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .decide_booking(&Actor::staff(), booking_id, Decision::Approve, None)
                .await
        })
    });
    let approved = join_all(approvals)
        .await
        .into_iter()
        .map(Result::unwrap)
        .filter(Result::is_ok)
        .count();

    // 20 units cover six bookings of three
    assert_eq!(approved, 6);
    assert_eq!(service.ledger().plant(plant.id).await.unwrap().stock_available, 2);
}

/// Racing creations of distinct varieties at one center respect the cap of two.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_variety_cap_holds_under_concurrent_creation() {
    let service = service();
    let center = CenterId::from_name("Palakkad");
    let varieties = ["RRII 105", "RRII 414", "RRII 430", "RRIM 600", "GT 1", "PB 260"];

    let creations = varieties.map(|variety| {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .create_plant(&Actor::admin(), center, seedlings(variety, 10))
                .await
        })
    });
    let results: Vec<_> = join_all(creations)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, BookingError::VarietyLimitExceeded { limit: 2, .. })));

    let plants = service.list_plants(center).await.unwrap();
    assert_eq!(plants.len(), 2);
}
