//! Cached reference ("static") data.
//!
//! Reference tables (gas mixes, tank configurations, currents, ...) are small,
//! shared by every user and effectively immutable. Each kind is loaded from
//! the [`ReferenceSource`] in full on first use and then served from memory
//! for the lifetime of the process, or until [`ReferenceDataCache::invalidate`]
//! is called.
//!
//! Loading is single-flight: concurrent first callers for the same kind wait
//! on one load rather than racing their own, and a published set is never
//! observed half-built.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{debug, info};

use crate::context::RequestContext;
use crate::error::EngineError;
use crate::storage::{ReferenceSort, ReferenceSource};

/// A row as returned by the data source. Every column but `id` may be null.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReferenceRow {
    pub id: i64,
    pub sort: Option<i32>,
    pub is_default: Option<bool>,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Shape shared by every reference table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReferenceDataItem {
    pub id: i64,
    pub sort: i32,
    pub is_default: bool,
    pub name: String,
    pub description: String,
}

impl From<ReferenceRow> for ReferenceDataItem {
    fn from(row: ReferenceRow) -> Self {
        Self {
            id: row.id,
            sort: row.sort.unwrap_or_default(),
            is_default: row.is_default.unwrap_or_default(),
            name: row.name.unwrap_or_default(),
            description: row.description.unwrap_or_default(),
        }
    }
}

impl fmt::Display for ReferenceDataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.name, self.description)
    }
}

/// A typed reference table.
pub trait ReferenceKind: Clone + fmt::Debug + Send + Sync + 'static {
    /// Source table name, also the cache key.
    const TABLE: &'static str;

    fn from_row(row: ReferenceRow) -> Self;

    fn item(&self) -> &ReferenceDataItem;
}

macro_rules! reference_kinds {
    ($($(#[$meta:meta])* $kind:ident => $table:literal,)+) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Debug, PartialEq, Eq, Serialize)]
            #[serde(transparent)]
            pub struct $kind(ReferenceDataItem);

            impl $kind {
                pub fn id(&self) -> i64 {
                    self.0.id
                }

                pub fn name(&self) -> &str {
                    &self.0.name
                }

                pub fn description(&self) -> &str {
                    &self.0.description
                }

                pub fn is_default(&self) -> bool {
                    self.0.is_default
                }
            }

            impl ReferenceKind for $kind {
                const TABLE: &'static str = $table;

                fn from_row(row: ReferenceRow) -> Self {
                    Self(row.into())
                }

                fn item(&self) -> &ReferenceDataItem {
                    &self.0
                }
            }

            impl fmt::Display for $kind {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    self.0.fmt(f)
                }
            }
        )+
    };
}

reference_kinds! {
    /// Diving agency; `name` holds the common name, `description` the full name.
    Agency => "agencies",
    BuddyRole => "buddy_roles",
    Current => "currents",
    DiveProperty => "dive_properties",
    EntryPoint => "entry_points",
    Equipment => "equipment",
    GasMix => "gas_mixes",
    TankConfiguration => "tank_configurations",
    TankMaterial => "tank_materials",
    Waves => "waves",
}

/// Lazily loaded, process-wide cache of one reference kind.
pub struct ReferenceDataCache<K: ReferenceKind> {
    source: Arc<dyn ReferenceSource>,
    slot: RwLock<Arc<OnceCell<Arc<[K]>>>>,
}

impl<K: ReferenceKind> ReferenceDataCache<K> {
    pub fn new(source: Arc<dyn ReferenceSource>) -> Self {
        Self {
            source,
            slot: RwLock::new(Arc::new(OnceCell::new())),
        }
    }

    /// The cached set in `sort` order, loading it on first use.
    fn loaded(&self, ctx: &RequestContext) -> Result<Arc<[K]>, EngineError> {
        // Published sets are immutable, so a poisoned lock still guards valid data.
        let cell = Arc::clone(&*self.slot.read().unwrap_or_else(PoisonError::into_inner));

        cell.get_or_try_init(|| {
            ctx.check("load reference data")?;
            let rows = self
                .source
                .fetch_reference_rows(ctx, K::TABLE, ReferenceSort::Sort)
                .map_err(|e| e.during("load reference data"))?;
            let items: Arc<[K]> = rows.into_iter().map(K::from_row).collect();
            info!(table = K::TABLE, items = items.len(), "reference data cached");
            Ok(items)
        })
        .map(Arc::clone)
    }

    /// All items, ordered by the `sort` column or alphabetically by name.
    pub fn list(&self, ctx: &RequestContext, sort_by_name: bool) -> Result<Vec<K>, EngineError> {
        let items = self.loaded(ctx)?;
        let mut items = items.to_vec();
        if sort_by_name {
            items.sort_by(|a, b| {
                a.item()
                    .name
                    .cmp(&b.item().name)
                    .then(a.item().id.cmp(&b.item().id))
            });
        }
        Ok(items)
    }

    pub fn exists(&self, ctx: &RequestContext, id: i64) -> Result<bool, EngineError> {
        Ok(self.loaded(ctx)?.iter().any(|item| item.item().id == id))
    }

    /// True when every id is present; an empty list trivially passes.
    pub fn all_exist(&self, ctx: &RequestContext, ids: &[i64]) -> Result<bool, EngineError> {
        if ids.is_empty() {
            return Ok(true);
        }
        let items = self.loaded(ctx)?;
        Ok(ids
            .iter()
            .all(|id| items.iter().any(|item| item.item().id == *id)))
    }

    pub fn get_one_by_id(&self, ctx: &RequestContext, id: i64) -> Result<K, EngineError> {
        self.loaded(ctx)?
            .iter()
            .find(|item| item.item().id == id)
            .cloned()
            .ok_or(EngineError::NotFound)
    }

    /// The item flagged as default, first in sort order.
    pub fn default_item(&self, ctx: &RequestContext) -> Result<Option<K>, EngineError> {
        Ok(self
            .loaded(ctx)?
            .iter()
            .find(|item| item.item().is_default)
            .cloned())
    }

    /// Drop the cached set; the next call reloads it.
    pub fn invalidate(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Arc::new(OnceCell::new());
        debug!(table = K::TABLE, "reference data invalidated");
    }
}

impl<K: ReferenceKind> fmt::Debug for ReferenceDataCache<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self
            .slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get()
            .map(|items| items.len());
        f.debug_struct("ReferenceDataCache")
            .field("table", &K::TABLE)
            .field("cached", &cached)
            .finish()
    }
}

/// One cache per reference kind, shared by every request.
#[derive(Debug)]
pub struct ReferenceData {
    pub agencies: ReferenceDataCache<Agency>,
    pub buddy_roles: ReferenceDataCache<BuddyRole>,
    pub currents: ReferenceDataCache<Current>,
    pub dive_properties: ReferenceDataCache<DiveProperty>,
    pub entry_points: ReferenceDataCache<EntryPoint>,
    pub equipment: ReferenceDataCache<Equipment>,
    pub gas_mixes: ReferenceDataCache<GasMix>,
    pub tank_configurations: ReferenceDataCache<TankConfiguration>,
    pub tank_materials: ReferenceDataCache<TankMaterial>,
    pub waves: ReferenceDataCache<Waves>,
}

impl ReferenceData {
    pub fn new(source: Arc<dyn ReferenceSource>) -> Self {
        Self {
            agencies: ReferenceDataCache::new(Arc::clone(&source)),
            buddy_roles: ReferenceDataCache::new(Arc::clone(&source)),
            currents: ReferenceDataCache::new(Arc::clone(&source)),
            dive_properties: ReferenceDataCache::new(Arc::clone(&source)),
            entry_points: ReferenceDataCache::new(Arc::clone(&source)),
            equipment: ReferenceDataCache::new(Arc::clone(&source)),
            gas_mixes: ReferenceDataCache::new(Arc::clone(&source)),
            tank_configurations: ReferenceDataCache::new(Arc::clone(&source)),
            tank_materials: ReferenceDataCache::new(Arc::clone(&source)),
            waves: ReferenceDataCache::new(source),
        }
    }

    pub fn invalidate_all(&self) {
        self.agencies.invalidate();
        self.buddy_roles.invalidate();
        self.currents.invalidate();
        self.dive_properties.invalidate();
        self.entry_points.invalidate();
        self.equipment.invalidate();
        self.gas_mixes.invalidate();
        self.tank_configurations.invalidate();
        self.tank_materials.invalidate();
        self.waves.invalidate();
    }
}
