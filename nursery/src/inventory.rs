//! Inventory ledger: plants, per-center variety cap, atomic stock changes.
//!
//! `stock_available` is the only shared mutable resource in the booking core.
//! It changes only through [`PlantRepository::decrement_if_available`] and
//! [`PlantRepository::increment`], both of which are atomic per plant. The
//! ledger never reads stock, decides, and then writes it back.
//!
//! # Variety cap
//!
//! At most [`VARIETIES_PER_CENTER`] distinct varieties may exist among the
//! active plants of a center. Every write of plant attributes (create, variety,
//! pricing, deactivation) holds the per-center lock, and updates re-read the
//! plant after taking it, so no write is based on a copy another writer has
//! since replaced.

use crate::catalog::{CenterDirectory, VarietyCatalog, VARIETIES_PER_CENTER};
use crate::error::{BookingError, BookingResult};
use crate::types::{CenterId, Money, NewPlant, Plant, PlantId};
use nursery_core::environment::Clock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Boxed future returned by repository operations (keeps the trait object-safe)
pub type RepositoryFuture<'a, T> = Pin<Box<dyn Future<Output = BookingResult<T>> + Send + 'a>>;

/// Result of an atomic conditional decrement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// Stock was reduced
    Applied {
        /// Stock left after the decrement
        remaining: u32,
    },
    /// Stock was left unchanged because it was short
    Insufficient {
        /// Stock seen by the conditional update
        available: u32,
    },
}

/// Persistence boundary for plants
///
/// Implementations must make `decrement_if_available` and `increment` atomic
/// per plant (a row lock or a conditional `UPDATE ... WHERE stock >= qty`).
pub trait PlantRepository: Send + Sync {
    /// Store a new plant
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Persistence`] if the plant cannot be stored.
    fn insert(&self, plant: Plant) -> RepositoryFuture<'_, ()>;

    /// Load a plant
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Persistence`] if the lookup fails.
    fn get(&self, plant_id: PlantId) -> RepositoryFuture<'_, Option<Plant>>;

    /// All plants of a center, optionally only active ones
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Persistence`] if the query fails.
    fn list_by_center(&self, center_id: CenterId, active_only: bool)
    -> RepositoryFuture<'_, Vec<Plant>>;

    /// Persist every attribute of `plant` except `stock_available`
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] if the plant does not exist.
    fn update(&self, plant: Plant) -> RepositoryFuture<'_, Plant>;

    /// Subtract `quantity` only if the result stays non-negative
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] if the plant does not exist.
    fn decrement_if_available(
        &self,
        plant_id: PlantId,
        quantity: u32,
    ) -> RepositoryFuture<'_, DecrementOutcome>;

    /// Add `quantity` back and return the new stock
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] if the plant does not exist.
    fn increment(&self, plant_id: PlantId, quantity: u32) -> RepositoryFuture<'_, u32>;
}

/// In-memory repository with one lock per plant
///
/// Operations on different plants never contend; operations on one plant are
/// serialized by its mutex.
#[derive(Default)]
pub struct InMemoryPlantRepository {
    plants: RwLock<HashMap<PlantId, Arc<Mutex<Plant>>>>,
}

impl InMemoryPlantRepository {
    /// Creates an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, plant_id: PlantId) -> BookingResult<Arc<Mutex<Plant>>> {
        self.plants
            .read()
            .await
            .get(&plant_id)
            .cloned()
            .ok_or_else(|| BookingError::plant_not_found(plant_id))
    }
}

impl PlantRepository for InMemoryPlantRepository {
    fn insert(&self, plant: Plant) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            let mut plants = self.plants.write().await;
            if plants.contains_key(&plant.id) {
                return Err(BookingError::Persistence(format!(
                    "plant {} already exists",
                    plant.id
                )));
            }
            plants.insert(plant.id, Arc::new(Mutex::new(plant)));
            Ok(())
        })
    }

    fn get(&self, plant_id: PlantId) -> RepositoryFuture<'_, Option<Plant>> {
        Box::pin(async move {
            let slot = self.plants.read().await.get(&plant_id).cloned();
            match slot {
                Some(slot) => Ok(Some(slot.lock().await.clone())),
                None => Ok(None),
            }
        })
    }

    fn list_by_center(
        &self,
        center_id: CenterId,
        active_only: bool,
    ) -> RepositoryFuture<'_, Vec<Plant>> {
        Box::pin(async move {
            let slots: Vec<_> = self.plants.read().await.values().cloned().collect();
            let mut plants = Vec::new();
            for slot in slots {
                let plant = slot.lock().await;
                if plant.center_id == center_id && (plant.active || !active_only) {
                    plants.push(plant.clone());
                }
            }
            plants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(plants)
        })
    }

    fn update(&self, plant: Plant) -> RepositoryFuture<'_, Plant> {
        Box::pin(async move {
            let slot = self.slot(plant.id).await?;
            let mut stored = slot.lock().await;
            let stock_available = stored.stock_available;
            *stored = Plant {
                stock_available,
                ..plant
            };
            Ok(stored.clone())
        })
    }

    fn decrement_if_available(
        &self,
        plant_id: PlantId,
        quantity: u32,
    ) -> RepositoryFuture<'_, DecrementOutcome> {
        Box::pin(async move {
            let slot = self.slot(plant_id).await?;
            let mut plant = slot.lock().await;
            match plant.stock_available.checked_sub(quantity) {
                Some(remaining) => {
                    plant.stock_available = remaining;
                    Ok(DecrementOutcome::Applied { remaining })
                },
                None => Ok(DecrementOutcome::Insufficient {
                    available: plant.stock_available,
                }),
            }
        })
    }

    fn increment(&self, plant_id: PlantId, quantity: u32) -> RepositoryFuture<'_, u32> {
        Box::pin(async move {
            let slot = self.slot(plant_id).await?;
            let mut plant = slot.lock().await;
            plant.stock_available = plant.stock_available.saturating_add(quantity);
            Ok(plant.stock_available)
        })
    }
}

/// How strictly plant varieties are tied to the catalog assignment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VarietyPolicy {
    /// Any known variety, as long as the center stays within two distinct ones
    #[default]
    CapOnly,
    /// Additionally require the variety to be one of the center's assigned pair
    StrictAssignment,
}

/// Plant administration and atomic stock changes
pub struct InventoryLedger {
    repository: Arc<dyn PlantRepository>,
    catalog: Arc<VarietyCatalog>,
    centers: Arc<CenterDirectory>,
    policy: VarietyPolicy,
    clock: Arc<dyn Clock>,
    center_locks: Mutex<HashMap<CenterId, Arc<Mutex<()>>>>,
}

impl InventoryLedger {
    /// Creates a ledger over a repository
    #[must_use]
    pub fn new(
        repository: Arc<dyn PlantRepository>,
        catalog: Arc<VarietyCatalog>,
        centers: Arc<CenterDirectory>,
        policy: VarietyPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            catalog,
            centers,
            policy,
            clock,
            center_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The variety catalog the ledger validates against
    #[must_use]
    pub fn catalog(&self) -> &VarietyCatalog {
        &self.catalog
    }

    /// The center directory the ledger validates against
    #[must_use]
    pub fn centers(&self) -> &CenterDirectory {
        &self.centers
    }

    /// Active variety policy
    #[must_use]
    pub const fn policy(&self) -> VarietyPolicy {
        self.policy
    }

    /// Create a plant for a center
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] if the center is unknown
    /// - [`BookingError::InvalidPlantPrice`] / [`BookingError::Validation`] for bad attributes
    /// - [`BookingError::UnknownVariety`], [`BookingError::VarietyLimitExceeded`],
    ///   [`BookingError::VarietyNotAssignedToCenter`] from the variety checks
    #[tracing::instrument(skip(self, new_plant), fields(plant_name = %new_plant.name))]
    pub async fn create_plant(&self, center_id: CenterId, new_plant: NewPlant) -> BookingResult<Plant> {
        if self.centers.get(center_id).is_none() {
            return Err(BookingError::center_not_found(center_id));
        }
        if new_plant.name.trim().is_empty() {
            return Err(BookingError::Validation("plant name is required".to_string()));
        }
        validate_pricing(new_plant.unit_price, new_plant.min_order_qty)?;

        let lock = self.center_lock(center_id).await;
        let _guard = lock.lock().await;

        let variety = self
            .check_variety(center_id, new_plant.variety.as_deref(), None)
            .await?;

        let now = self.clock.now();
        let plant = Plant {
            id: PlantId::new(),
            center_id,
            name: new_plant.name.trim().to_string(),
            variety,
            unit_price: new_plant.unit_price,
            stock_available: new_plant.stock_available,
            min_order_qty: new_plant.min_order_qty,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.repository.insert(plant.clone()).await?;

        tracing::info!(
            plant_id = %plant.id,
            center_id = %center_id,
            variety = plant.variety.as_deref().unwrap_or("-"),
            stock = plant.stock_available,
            "Plant created"
        );
        Ok(plant)
    }

    /// Change a plant's variety, re-running the variety checks without counting the plant itself
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for a missing plant, otherwise the variety check errors.
    #[tracing::instrument(skip(self))]
    pub async fn update_plant_variety(
        &self,
        plant_id: PlantId,
        variety: Option<String>,
    ) -> BookingResult<Plant> {
        let (plant, _guard) = self.lock_plant(plant_id).await?;

        let variety = self
            .check_variety(plant.center_id, variety.as_deref(), Some(plant_id))
            .await?;

        let updated = self
            .repository
            .update(Plant {
                variety,
                updated_at: self.clock.now(),
                ..plant
            })
            .await?;
        tracing::info!(plant_id = %plant_id, variety = ?updated.variety, "Plant variety updated");
        Ok(updated)
    }

    /// Change a plant's unit price and/or minimum order quantity
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`], [`BookingError::InvalidPlantPrice`] or [`BookingError::Validation`].
    pub async fn update_plant_pricing(
        &self,
        plant_id: PlantId,
        unit_price: Option<Money>,
        min_order_qty: Option<u32>,
    ) -> BookingResult<Plant> {
        let (plant, _guard) = self.lock_plant(plant_id).await?;
        let unit_price = unit_price.unwrap_or(plant.unit_price);
        let min_order_qty = min_order_qty.unwrap_or(plant.min_order_qty);
        validate_pricing(unit_price, min_order_qty)?;

        self.repository
            .update(Plant {
                unit_price,
                min_order_qty,
                updated_at: self.clock.now(),
                ..plant
            })
            .await
    }

    /// Soft-delete a plant; it no longer counts toward the variety cap or accepts bookings
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for a missing plant.
    pub async fn deactivate_plant(&self, plant_id: PlantId) -> BookingResult<Plant> {
        let (plant, _guard) = self.lock_plant(plant_id).await?;

        let updated = self
            .repository
            .update(Plant {
                active: false,
                updated_at: self.clock.now(),
                ..plant
            })
            .await?;
        tracing::info!(plant_id = %plant_id, "Plant deactivated");
        Ok(updated)
    }

    /// Load a plant
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] if the plant does not exist.
    pub async fn plant(&self, plant_id: PlantId) -> BookingResult<Plant> {
        self.repository
            .get(plant_id)
            .await?
            .ok_or_else(|| BookingError::plant_not_found(plant_id))
    }

    /// Plants of a center, oldest first
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn list_plants(
        &self,
        center_id: CenterId,
        include_inactive: bool,
    ) -> BookingResult<Vec<Plant>> {
        self.repository.list_by_center(center_id, !include_inactive).await
    }

    /// Atomically take `quantity` units from a plant
    ///
    /// A refused conditional decrement is retried once; a second refusal is
    /// reported as [`BookingError::InsufficientStock`].
    ///
    /// # Errors
    ///
    /// [`BookingError::InsufficientStock`], [`BookingError::NotFound`] or
    /// [`BookingError::Validation`] for a zero quantity.
    pub async fn decrement_stock(&self, plant_id: PlantId, quantity: u32) -> BookingResult<u32> {
        if quantity == 0 {
            return Err(BookingError::Validation("quantity must be positive".to_string()));
        }

        let mut available = 0;
        for attempt in 0..2 {
            match self.repository.decrement_if_available(plant_id, quantity).await? {
                DecrementOutcome::Applied { remaining } => {
                    tracing::debug!(plant_id = %plant_id, quantity, remaining, "Stock decremented");
                    return Ok(remaining);
                },
                DecrementOutcome::Insufficient { available: seen } => {
                    tracing::debug!(plant_id = %plant_id, quantity, available = seen, attempt, "Conditional decrement refused");
                    available = seen;
                },
            }
        }

        metrics::counter!("nursery.stock.insufficient").increment(1);
        tracing::warn!(plant_id = %plant_id, quantity, available, "Insufficient stock");
        Err(BookingError::InsufficientStock {
            plant_id,
            requested: quantity,
            available,
        })
    }

    /// Return `quantity` units to a plant (no upper bound)
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] if the plant does not exist.
    pub async fn increment_stock(&self, plant_id: PlantId, quantity: u32) -> BookingResult<u32> {
        let stock = self.repository.increment(plant_id, quantity).await?;
        tracing::debug!(plant_id = %plant_id, quantity, stock, "Stock restored");
        Ok(stock)
    }

    async fn center_lock(&self, center_id: CenterId) -> Arc<Mutex<()>> {
        let mut locks = self.center_locks.lock().await;
        Arc::clone(locks.entry(center_id).or_default())
    }

    /// Take the plant's center lock and load the plant as it stands under it
    async fn lock_plant(&self, plant_id: PlantId) -> BookingResult<(Plant, OwnedMutexGuard<()>)> {
        let center_id = self.plant(plant_id).await?.center_id;
        let guard = self.center_lock(center_id).await.lock_owned().await;
        let plant = self.plant(plant_id).await?;
        Ok((plant, guard))
    }

    /// Resolve and check a variety for a center; returns the canonical catalog id.
    ///
    /// Blank names mean "no variety" and are not counted toward the cap.
    async fn check_variety(
        &self,
        center_id: CenterId,
        requested: Option<&str>,
        exclude: Option<PlantId>,
    ) -> BookingResult<Option<String>> {
        let Some(requested) = requested.map(str::trim).filter(|name| !name.is_empty()) else {
            return Ok(None);
        };

        let resolved = self.catalog.resolve(requested);

        let existing: BTreeSet<String> = self
            .repository
            .list_by_center(center_id, true)
            .await?
            .into_iter()
            .filter(|plant| Some(plant.id) != exclude)
            .filter_map(|plant| plant.variety)
            .collect();

        // A full center refuses any name outside its pair, known or not.
        let already_present = resolved.is_some_and(|variety| existing.contains(&variety.id));
        if !already_present && existing.len() >= VARIETIES_PER_CENTER {
            return Err(BookingError::VarietyLimitExceeded {
                limit: VARIETIES_PER_CENTER,
                existing: existing.into_iter().collect::<Vec<_>>().join(", "),
                requested: resolved.map_or_else(|| requested.to_string(), |v| v.id.clone()),
            });
        }

        let variety =
            resolved.ok_or_else(|| BookingError::UnknownVariety(requested.to_string()))?;

        if self.policy == VarietyPolicy::StrictAssignment {
            let center_index = self
                .centers
                .index_of(center_id)
                .ok_or_else(|| BookingError::center_not_found(center_id))?;
            let total_centers = self.centers.len();
            if !self
                .catalog
                .is_available_for_center(&variety.id, center_index, total_centers)
            {
                let allowed = self
                    .catalog
                    .assign(center_index, total_centers)
                    .iter()
                    .map(|v| v.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(BookingError::VarietyNotAssignedToCenter {
                    variety: variety.id.clone(),
                    allowed,
                });
            }
        }

        Ok(Some(variety.id.clone()))
    }
}

fn validate_pricing(unit_price: Money, min_order_qty: u32) -> BookingResult<()> {
    if unit_price.is_zero() {
        return Err(BookingError::InvalidPlantPrice);
    }
    if min_order_qty == 0 {
        return Err(BookingError::Validation(
            "minimum order quantity must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use nursery_testing::test_clock;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn ledger(policy: VarietyPolicy) -> (InventoryLedger, CenterId) {
        let centers = CenterDirectory::from_names(["Kottayam", "Thrissur", "Palakkad"]);
        let center_id = centers.centers()[0].id;
        let ledger = InventoryLedger::new(
            Arc::new(InMemoryPlantRepository::new()),
            VarietyCatalog::rubber_clones().shared(),
            Arc::new(centers),
            policy,
            Arc::new(test_clock()),
        );
        (ledger, center_id)
    }

    fn seedlings(variety: &str, stock: u32) -> NewPlant {
        NewPlant {
            name: format!("{variety} seedlings"),
            variety: Some(variety.to_string()),
            unit_price: Money::from_units(150),
            stock_available: stock,
            min_order_qty: 1,
        }
    }

    #[tokio::test]
    async fn third_distinct_variety_is_refused() {
        let (ledger, center) = ledger(VarietyPolicy::CapOnly);
        ledger.create_plant(center, seedlings("RRII 105", 10)).await.unwrap();
        ledger.create_plant(center, seedlings("GT 1", 10)).await.unwrap();

        let result = ledger.create_plant(center, seedlings("PB 260", 10)).await;
        assert!(matches!(result, Err(BookingError::VarietyLimitExceeded { limit: 2, .. })));

        // Same name as an existing variety, different casing
        let plant = ledger.create_plant(center, seedlings("rrii-105", 4)).await.unwrap();
        assert_eq!(plant.variety.as_deref(), Some("RRII-105"));
    }

    #[tokio::test]
    async fn unknown_variety_is_refused() {
        let (ledger, center) = ledger(VarietyPolicy::CapOnly);
        let result = ledger.create_plant(center, seedlings("Tjir 1", 10)).await;
        assert_eq!(result, Err(BookingError::UnknownVariety("Tjir 1".to_string())));
    }

    #[tokio::test]
    async fn unknown_name_at_full_center_hits_the_cap() {
        let (ledger, center) = ledger(VarietyPolicy::CapOnly);
        ledger.create_plant(center, seedlings("RRII 105", 1)).await.unwrap();
        ledger.create_plant(center, seedlings("GT 1", 1)).await.unwrap();

        let result = ledger.create_plant(center, seedlings("Tjir 1", 1)).await;
        assert_eq!(
            result,
            Err(BookingError::VarietyLimitExceeded {
                limit: 2,
                existing: "GT-1, RRII-105".to_string(),
                requested: "Tjir 1".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn blank_variety_is_not_counted() {
        let (ledger, center) = ledger(VarietyPolicy::CapOnly);
        ledger.create_plant(center, seedlings("RRII 105", 1)).await.unwrap();
        ledger.create_plant(center, seedlings("GT 1", 1)).await.unwrap();

        let mut unnamed = seedlings("", 1);
        unnamed.variety = Some("   ".to_string());
        let plant = ledger.create_plant(center, unnamed).await.unwrap();
        assert_eq!(plant.variety, None);
    }

    #[tokio::test]
    async fn strict_policy_requires_assigned_pair() {
        let (ledger, center) = ledger(VarietyPolicy::StrictAssignment);
        // Center 0 of 3 is assigned RRII 105 and RRII 414
        ledger.create_plant(center, seedlings("RRII 414", 1)).await.unwrap();
        let result = ledger.create_plant(center, seedlings("GT 1", 1)).await;
        assert!(matches!(result, Err(BookingError::VarietyNotAssignedToCenter { .. })));
    }

    #[tokio::test]
    async fn variety_update_excludes_the_plant_itself() {
        let (ledger, center) = ledger(VarietyPolicy::CapOnly);
        let first = ledger.create_plant(center, seedlings("RRII 105", 1)).await.unwrap();
        let second = ledger.create_plant(center, seedlings("GT 1", 1)).await.unwrap();

        // Replacing GT 1 on the only GT 1 plant keeps the center at two varieties
        let updated = ledger
            .update_plant_variety(second.id, Some("PB 260".to_string()))
            .await
            .unwrap();
        assert_eq!(updated.variety.as_deref(), Some("PB-260"));

        // A third variety on a plant that does not own one of the two is refused
        let third = ledger.create_plant(center, seedlings("RRII 105", 1)).await.unwrap();
        let result = ledger.update_plant_variety(third.id, Some("GT 1".to_string())).await;
        assert!(matches!(result, Err(BookingError::VarietyLimitExceeded { .. })));
        assert_eq!(ledger.plant(first.id).await.unwrap().variety.as_deref(), Some("RRII-105"));
    }

    #[tokio::test]
    async fn deactivated_plants_free_their_variety() {
        let (ledger, center) = ledger(VarietyPolicy::CapOnly);
        ledger.create_plant(center, seedlings("RRII 105", 1)).await.unwrap();
        let gt = ledger.create_plant(center, seedlings("GT 1", 1)).await.unwrap();

        ledger.deactivate_plant(gt.id).await.unwrap();
        ledger.create_plant(center, seedlings("PB 260", 1)).await.unwrap();

        assert_eq!(ledger.list_plants(center, false).await.unwrap().len(), 2);
        assert_eq!(ledger.list_plants(center, true).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn pricing_update_validates() {
        let (ledger, center) = ledger(VarietyPolicy::CapOnly);
        let plant = ledger.create_plant(center, seedlings("GT 1", 5)).await.unwrap();

        let updated = ledger
            .update_plant_pricing(plant.id, Some(Money::from_units(175)), Some(10))
            .await
            .unwrap();
        assert_eq!(updated.unit_price, Money::from_units(175));
        assert_eq!(updated.min_order_qty, 10);
        assert_eq!(updated.stock_available, 5);

        assert_eq!(
            ledger.update_plant_pricing(plant.id, Some(Money::ZERO), None).await,
            Err(BookingError::InvalidPlantPrice)
        );
        assert!(matches!(
            ledger.update_plant_pricing(plant.id, None, Some(0)).await,
            Err(BookingError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn decrement_refuses_to_go_negative() {
        let (ledger, center) = ledger(VarietyPolicy::CapOnly);
        let plant = ledger.create_plant(center, seedlings("GT 1", 5)).await.unwrap();

        assert_eq!(ledger.decrement_stock(plant.id, 3).await.unwrap(), 2);
        assert_eq!(
            ledger.decrement_stock(plant.id, 3).await,
            Err(BookingError::InsufficientStock {
                plant_id: plant.id,
                requested: 3,
                available: 2,
            })
        );
        assert_eq!(ledger.increment_stock(plant.id, 3).await.unwrap(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_decrements_never_oversell() {
        let (ledger, center) = ledger(VarietyPolicy::CapOnly);
        let ledger = Arc::new(ledger);
        let plant = ledger.create_plant(center, seedlings("GT 1", 10)).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.decrement_stock(plant.id, 3).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 3);
        assert_eq!(ledger.plant(plant.id).await.unwrap().stock_available, 1);
    }

    /// Delegates to the in-memory store; the first `get` after arming stalls
    struct StallingRepository {
        inner: InMemoryPlantRepository,
        stall_next_get: AtomicBool,
    }

    impl PlantRepository for StallingRepository {
        fn insert(&self, plant: Plant) -> RepositoryFuture<'_, ()> {
            self.inner.insert(plant)
        }

        fn get(&self, plant_id: PlantId) -> RepositoryFuture<'_, Option<Plant>> {
            Box::pin(async move {
                if self.stall_next_get.swap(false, Ordering::SeqCst) {
                    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                }
                self.inner.get(plant_id).await
            })
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
            self.inner.decrement_if_available(plant_id, quantity)
        }

        fn increment(&self, plant_id: PlantId, quantity: u32) -> RepositoryFuture<'_, u32> {
            self.inner.increment(plant_id, quantity)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stale_pricing_update_does_not_revive_a_deactivated_plant() {
        let centers = CenterDirectory::from_names(["Kottayam", "Thrissur", "Palakkad"]);
        let center = centers.centers()[0].id;
        let repository = Arc::new(StallingRepository {
            inner: InMemoryPlantRepository::new(),
            stall_next_get: AtomicBool::new(false),
        });
        let ledger = Arc::new(InventoryLedger::new(
            Arc::clone(&repository) as Arc<dyn PlantRepository>,
            VarietyCatalog::rubber_clones().shared(),
            Arc::new(centers),
            VarietyPolicy::CapOnly,
            Arc::new(test_clock()),
        ));

        ledger.create_plant(center, seedlings("RRII 105", 1)).await.unwrap();
        let gt = ledger.create_plant(center, seedlings("GT 1", 1)).await.unwrap().id;

        // The pricing update reads the plant, then stalls while it is deactivated
        repository.stall_next_get.store(true, Ordering::SeqCst);
        let pricing = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                ledger
                    .update_plant_pricing(gt, Some(Money::from_units(175)), None)
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        ledger.deactivate_plant(gt).await.unwrap();
        ledger.create_plant(center, seedlings("PB 260", 1)).await.unwrap();

        let repriced = pricing.await.unwrap().unwrap();
        assert!(!repriced.active);
        assert_eq!(repriced.unit_price, Money::from_units(175));

        let active: BTreeSet<String> = ledger
            .list_plants(center, false)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|plant| plant.variety)
            .collect();
        assert!(active.len() <= VARIETIES_PER_CENTER);
        assert!(!active.contains("GT-1"));
    }

    #[tokio::test]
    async fn unknown_center_and_plant() {
        let (ledger, _) = ledger(VarietyPolicy::CapOnly);
        assert!(matches!(
            ledger.create_plant(CenterId::new(), seedlings("GT 1", 1)).await,
            Err(BookingError::NotFound { entity: "center", .. })
        ));
        assert!(matches!(
            ledger.decrement_stock(PlantId::new(), 1).await,
            Err(BookingError::NotFound { entity: "plant", .. })
        ));
    }
}
