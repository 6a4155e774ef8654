//! Variety catalog and the per-center allocation of varieties.
//!
//! The catalog is loaded once at startup and shared read-only behind an `Arc`.
//! [`VarietyCatalog::assign`] partitions the pool into pairs and hands each
//! center one pair, cycling once centers outnumber the pairs:
//!
//! ```text
//! pool:    [ A B | C D | E F ]
//! center:    0,3   1,4   2,5 ...
//! ```
//!
//! The assignment is a planning aid; the inventory ledger enforces the
//! two-variety cap per center regardless of which pair was suggested.

use crate::error::{BookingError, BookingResult};
use crate::types::{Center, CenterId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Number of varieties each center is assigned (and may stock at once)
pub const VARIETIES_PER_CENTER: usize = 2;

/// Immutable catalog entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarietyDescriptor {
    /// Stable identifier (e.g. `RRII-105`)
    pub id: String,
    /// Display name (e.g. `RRII 105`)
    pub name: String,
    /// Short description
    pub description: String,
    /// Characteristic tags
    pub characteristics: Vec<String>,
}

impl VarietyDescriptor {
    /// Creates a descriptor
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        characteristics: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            characteristics: characteristics.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    /// Case-insensitive match against id or display name
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        let name = name.trim();
        self.id.eq_ignore_ascii_case(name) || self.name.eq_ignore_ascii_case(name)
    }
}

/// The fixed pool of varieties, in allocation order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarietyCatalog {
    pool: Vec<VarietyDescriptor>,
}

impl VarietyCatalog {
    /// Creates a catalog from an ordered pool
    #[must_use]
    pub const fn new(pool: Vec<VarietyDescriptor>) -> Self {
        Self { pool }
    }

    /// Wraps the catalog for sharing across components
    #[must_use]
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Rubber clones stocked by the nursery network
    #[must_use]
    pub fn rubber_clones() -> Self {
        Self::new(vec![
            VarietyDescriptor::new(
                "RRII-105",
                "RRII 105",
                "High-yielding clone suited to traditional rubber-growing regions",
                &["high-yield", "traditional-region"],
            ),
            VarietyDescriptor::new(
                "RRII-414",
                "RRII 414",
                "Fast-growing clone with good early yield",
                &["fast-growth", "early-yield"],
            ),
            VarietyDescriptor::new(
                "RRII-430",
                "RRII 430",
                "Vigorous clone with strong disease tolerance",
                &["vigorous", "disease-tolerant"],
            ),
            VarietyDescriptor::new(
                "RRIM-600",
                "RRIM 600",
                "Widely planted clone with stable latex output",
                &["stable-yield", "widely-adapted"],
            ),
            VarietyDescriptor::new(
                "GT-1",
                "GT 1",
                "Hardy primary clone tolerant of wind damage",
                &["hardy", "wind-tolerant"],
            ),
            VarietyDescriptor::new(
                "PB-260",
                "PB 260",
                "Clone with high latex yield and moderate vigour",
                &["high-latex", "moderate-vigour"],
            ),
        ])
    }

    /// All varieties in allocation order
    #[must_use]
    pub fn varieties(&self) -> &[VarietyDescriptor] {
        &self.pool
    }

    /// Number of varieties in the pool
    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Whether the pool is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Varieties assigned to the center at `center_index`
    ///
    /// Returns exactly `min(2, pool size)` varieties for any index. The slice
    /// depends only on `center_index` and the pool; `total_centers` is accepted
    /// so callers pass the full context, and a zero count yields no varieties.
    #[must_use]
    pub fn assign(&self, center_index: usize, total_centers: usize) -> &[VarietyDescriptor] {
        if self.pool.is_empty() || total_centers == 0 {
            return &[];
        }

        let cycle_length = self.pool.len().div_ceil(VARIETIES_PER_CENTER);
        let start = (center_index % cycle_length) * VARIETIES_PER_CENTER;
        let end = (start + VARIETIES_PER_CENTER).min(self.pool.len());

        // An odd pool leaves a single variety in the last pair; that center gets
        // the last two of the pool so it still receives min(2, pool size).
        if end - start < VARIETIES_PER_CENTER.min(self.pool.len()) {
            return &self.pool[self.pool.len() - VARIETIES_PER_CENTER.min(self.pool.len())..];
        }

        &self.pool[start..end]
    }

    /// Whether `name` matches a catalog id or display name (case-insensitive)
    #[must_use]
    pub fn is_known_variety(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Looks up a variety by id or display name (case-insensitive)
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&VarietyDescriptor> {
        self.pool.iter().find(|variety| variety.matches(name))
    }

    /// Whether `name` is one of the varieties assigned to the center
    #[must_use]
    pub fn is_available_for_center(
        &self,
        name: &str,
        center_index: usize,
        total_centers: usize,
    ) -> bool {
        self.assign(center_index, total_centers)
            .iter()
            .any(|variety| variety.matches(name))
    }
}

impl Default for VarietyCatalog {
    fn default() -> Self {
        Self::rubber_clones()
    }
}

/// A center together with its suggested varieties
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CenterAssignment {
    /// The center
    pub center: Center,
    /// Position of the center in the directory
    pub center_index: usize,
    /// Number of centers the assignment was computed for
    pub total_centers: usize,
    /// Suggested varieties
    pub varieties: Vec<VarietyDescriptor>,
}

/// Ordered list of nursery centers
///
/// A center's position in the directory is its `center_index` for
/// [`VarietyCatalog::assign`]. Adding a center can shift later assignments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CenterDirectory {
    centers: Vec<Center>,
}

impl CenterDirectory {
    /// Creates a directory from centers in allocation order
    #[must_use]
    pub const fn new(centers: Vec<Center>) -> Self {
        Self { centers }
    }

    /// Creates a directory from center names, deriving stable ids
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(Center::named).collect())
    }

    /// All centers in allocation order
    #[must_use]
    pub fn centers(&self) -> &[Center] {
        &self.centers
    }

    /// Number of centers
    #[must_use]
    pub fn len(&self) -> usize {
        self.centers.len()
    }

    /// Whether there are no centers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }

    /// Looks up a center
    #[must_use]
    pub fn get(&self, center_id: CenterId) -> Option<&Center> {
        self.centers.iter().find(|center| center.id == center_id)
    }

    /// Position of a center in the directory
    #[must_use]
    pub fn index_of(&self, center_id: CenterId) -> Option<usize> {
        self.centers.iter().position(|center| center.id == center_id)
    }

    /// Suggested varieties for a center
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] if the center is not in the directory.
    pub fn list_variety_assignment(
        &self,
        catalog: &VarietyCatalog,
        center_id: CenterId,
    ) -> BookingResult<CenterAssignment> {
        let center_index = self
            .index_of(center_id)
            .ok_or_else(|| BookingError::center_not_found(center_id))?;
        let total_centers = self.centers.len();

        Ok(CenterAssignment {
            center: self.centers[center_index].clone(),
            center_index,
            total_centers,
            varieties: catalog.assign(center_index, total_centers).to_vec(),
        })
    }
}
