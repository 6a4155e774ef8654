//! Nursery booking walkthrough
//!
//! Seeds one center with a plant, then runs a farmer's booking through
//! intent creation, payment verification, approval and cancellation against
//! the mock gateway. Prints the resulting bookings and the Prometheus metrics.
//!
//! ```bash
//! RUST_LOG=debug cargo run --bin nursery-demo
//! ```

use anyhow::Context;
use nursery_booking::{
    sign_payment, Actor, Config, Decision, FarmerId, InMemoryPlantRepository, MockPaymentGateway,
    Money, NewPlant, NurseryService, VarietyCatalog,
};
use nursery_core::environment::SystemClock;
use nursery_runtime::metrics::MetricsRecorder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEMO_KEY_ID: &str = "demo_key";
const DEMO_KEY_SECRET: &str = "demo_secret";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let metrics = MetricsRecorder::install()?;

    let mut config = Config::from_env().context("invalid configuration")?;
    if config.credentials().is_none() {
        tracing::warn!("Payment credentials not set, using demo credentials");
        config.payment.key_id = Some(DEMO_KEY_ID.to_string());
        config.payment.key_secret = Some(DEMO_KEY_SECRET.to_string());
    }
    let secret = config.payment.key_secret.clone().unwrap_or_default();

    let service = Arc::new(NurseryService::from_config(
        &config,
        VarietyCatalog::rubber_clones().shared(),
        Arc::new(InMemoryPlantRepository::new()),
        MockPaymentGateway::shared(),
        Arc::new(SystemClock),
    ));
    let sweeper = service.spawn_expiry_sweeper(config.sweep_interval());

    // Seed the first center with its first suggested variety
    let center = config
        .center_directory()
        .centers()
        .first()
        .cloned()
        .context("no centers configured")?;
    let assignment = service.list_variety_assignment(center.id)?;
    let variety = assignment.varieties.first().map(|v| v.id.clone());
    tracing::info!(
        center = %center.name,
        suggested = ?assignment.varieties.iter().map(|v| v.id.as_str()).collect::<Vec<_>>(),
        "Variety assignment"
    );

    let admin = Actor::admin();
    let plant = service
        .create_plant(
            &admin,
            center.id,
            NewPlant {
                name: "Budded stumps".to_string(),
                variety,
                unit_price: Money::from_units(150),
                stock_available: 500,
                min_order_qty: 10,
            },
        )
        .await?;

    // Farmer books the minimum quantity with the default advance
    let farmer_id = FarmerId::new();
    let booking = service
        .create_booking(farmer_id, plant.id, center.id, None, None)
        .await?;
    println!(
        "Booked {} x {} = {} (advance {}, balance {})",
        booking.quantity,
        booking.unit_price,
        booking.amount_total,
        booking.amount_advance,
        booking.amount_balance
    );

    // Advance payment: the gateway callback carries an HMAC the service checks
    let checkout = service.create_advance_intent(booking.id).await?;
    let payment_id = "pay_demo_0001";
    let signature = sign_payment(&secret, &checkout.intent.intent_id, payment_id)?;
    service
        .verify_advance_payment(booking.id, &checkout.intent.intent_id, payment_id, &signature)
        .await?;

    let approved = service
        .decide_booking(&admin, booking.id, Decision::Approve, Some("stock on hand".to_string()))
        .await?;
    println!("{}", serde_json::to_string_pretty(&approved)?);
    println!(
        "Stock after approval: {}",
        service.ledger().plant(plant.id).await?.stock_available
    );

    let cancelled = service
        .cancel_booking(&Actor::farmer(farmer_id), booking.id, Some("changed plans".to_string()))
        .await?;
    println!("Booking is now {}", cancelled.status);
    println!(
        "Stock after cancellation: {}",
        service.ledger().plant(plant.id).await?.stock_available
    );

    service.shutdown(Duration::from_secs(5)).await?;
    sweeper.abort();

    println!("\n{}", metrics.render());
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,nursery_booking=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
