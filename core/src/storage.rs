//! Boundary to the data-access layer.
//!
//! The engine never talks to a database directly. Everything it reads or
//! writes goes through [`Storage`] and [`ReferenceSource`], each call carrying
//! the request's [`RequestContext`] so an implementation can honour the
//! deadline and cancellation signal.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::context::RequestContext;
use crate::error::SourceError;
use crate::models::{BuddyId, Dive, DiveId, DiveSiteId, TripId, UserId};
use crate::pagination::Pager;
use crate::reference::ReferenceRow;
use crate::sorting::{DiveSort, SortSpec};
use crate::stats::{GroupBy, RollupRow};

/// Order in which reference rows are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSort {
    Sort,
    Name,
}

/// Tables whose rows can be checked for existence by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordTable {
    Dives,
    DiveSites,
    Operators,
    Trips,
    Certifications,
    Buddies,
    Currencies,
}

impl RecordTable {
    pub fn name(self) -> &'static str {
        match self {
            RecordTable::Dives => "dives",
            RecordTable::DiveSites => "dive_sites",
            RecordTable::Operators => "operators",
            RecordTable::Trips => "trips",
            RecordTable::Certifications => "certifications",
            RecordTable::Buddies => "buddies",
            RecordTable::Currencies => "currencies",
        }
    }
}

/// Optional restrictions on a dive listing. All set fields must match.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiveFilter {
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub min_depth_m: Option<f64>,
    pub max_depth_m: Option<f64>,
    pub dive_site: Option<DiveSiteId>,
    pub buddy: Option<BuddyId>,
    pub trip: Option<TripId>,
    pub training_only: bool,
}

impl DiveFilter {
    pub fn matches(&self, dive: &Dive) -> bool {
        self.date_from.map_or(true, |from| dive.date_time_in >= from)
            && self.date_to.map_or(true, |to| dive.date_time_in <= to)
            && self.min_depth_m.map_or(true, |min| dive.max_depth >= min)
            && self.max_depth_m.map_or(true, |max| dive.max_depth <= max)
            && self.dive_site.map_or(true, |site| dive.dive_site.id == site)
            && self
                .buddy
                .map_or(true, |buddy| dive.buddy.as_ref().is_some_and(|b| b.id == buddy))
            && self
                .trip
                .map_or(true, |trip| dive.trip.as_ref().is_some_and(|t| t.id == trip))
            && (!self.training_only || dive.certification.is_some())
    }
}

/// A validated dive ready to be written. Times are already in UTC and every
/// association is an id.
#[derive(Clone, Debug, PartialEq)]
pub struct DiveRecord {
    pub owner_id: UserId,
    pub number: i32,
    pub activity: String,
    pub dive_site_id: i64,
    pub operator_id: Option<i64>,
    pub price: Option<f64>,
    pub currency_id: Option<i64>,
    pub trip_id: Option<i64>,
    pub certification_id: Option<i64>,
    pub date_time_in: DateTime<Utc>,
    pub max_depth: f64,
    pub avg_depth: Option<f64>,
    pub bottom_time: Duration,
    pub safety_stop: Option<Duration>,
    pub water_temp: Option<i32>,
    pub air_temp: Option<i32>,
    pub visibility: Option<f64>,
    pub current_id: Option<i64>,
    pub waves_id: Option<i64>,
    pub buddy_id: Option<i64>,
    pub buddy_role_id: Option<i64>,
    pub weight: Option<f64>,
    pub weight_notes: String,
    pub equipment_ids: Vec<i64>,
    pub equipment_notes: String,
    pub tank_configuration_id: i64,
    pub tank_material_id: i64,
    pub tank_volume: f64,
    pub gas_mix_id: i64,
    pub fo2: f64,
    pub pressure_in: Option<i32>,
    pub pressure_out: Option<i32>,
    pub gas_mix_notes: String,
    pub entry_point_id: i64,
    pub property_ids: Vec<i64>,
    pub rating: Option<i32>,
    pub notes: String,
}

/// Source of reference-table rows. Only the reference cache calls this.
pub trait ReferenceSource: Send + Sync {
    fn fetch_reference_rows(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        sort_by: ReferenceSort,
    ) -> Result<Vec<ReferenceRow>, SourceError>;
}

/// Owner-scoped data access used by the engine.
pub trait Storage: Send + Sync {
    /// One page of the owner's dives plus the total number matching `filter`.
    /// Returned dives carry their surface interval.
    fn fetch_dives_for_owner(
        &self,
        ctx: &RequestContext,
        owner: UserId,
        pager: &Pager,
        filter: &DiveFilter,
        sort: &SortSpec<DiveSort>,
    ) -> Result<(Vec<Dive>, u64), SourceError>;

    fn fetch_dive(&self, ctx: &RequestContext, owner: UserId, id: DiveId)
        -> Result<Dive, SourceError>;

    fn fetch_dive_site_timezone(
        &self,
        ctx: &RequestContext,
        site: DiveSiteId,
    ) -> Result<String, SourceError>;

    /// Aggregates over the owner's dives grouped by `group_by`, ordered by
    /// dive count descending then dimension id (month rollups: most recent
    /// month first), truncated to `limit` rows when given.
    fn fetch_aggregate_rollup(
        &self,
        ctx: &RequestContext,
        owner: UserId,
        group_by: GroupBy,
        limit: Option<usize>,
    ) -> Result<Vec<RollupRow>, SourceError>;

    fn id_exists(&self, ctx: &RequestContext, table: RecordTable, id: i64)
        -> Result<bool, SourceError>;

    fn ids_all_exist(
        &self,
        ctx: &RequestContext,
        table: RecordTable,
        ids: &[i64],
    ) -> Result<bool, SourceError>;

    /// Fails with [`SourceError::Duplicate`] when the owner already has a
    /// dive with the same number.
    fn insert_dive(&self, ctx: &RequestContext, record: &DiveRecord)
        -> Result<(DiveId, i32), SourceError>;

    /// Applies the update only when the stored version equals `version`,
    /// bumping it on success. Returns the number of rows affected.
    fn update_dive(
        &self,
        ctx: &RequestContext,
        id: DiveId,
        version: i32,
        record: &DiveRecord,
    ) -> Result<u64, SourceError>;
}
