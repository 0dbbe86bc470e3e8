//! In-memory data source.
//!
//! Implements [`Storage`] and [`ReferenceSource`] over plain maps behind one
//! lock. Used by the tests and by embedders that keep their logbook in memory.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, trace};

use crate::context::RequestContext;
use crate::error::SourceError;
use crate::metrics::assign_surface_intervals;
use crate::models::{
    Buddy, Certification, Currency, Dive, DiveId, DiveSite, DiveSiteId, Operator, Price,
    Trip, UserId,
};
use crate::pagination::Pager;
use crate::reference::{
    BuddyRole, Current, DiveProperty, EntryPoint, Equipment, GasMix, ReferenceKind, ReferenceRow,
    TankConfiguration, TankMaterial, Waves,
};
use crate::sorting::{DiveSort, SortSpec};
use crate::stats::{rollup, GroupBy, RollupRow};
use crate::storage::{DiveFilter, DiveRecord, RecordTable, ReferenceSort, ReferenceSource, Storage};

#[derive(Debug, Clone)]
struct StoredDive {
    id: DiveId,
    version: i32,
    record: DiveRecord,
}

#[derive(Debug, Default)]
struct State {
    currencies: BTreeMap<i64, Currency>,
    sites: BTreeMap<i64, DiveSite>,
    buddies: BTreeMap<i64, Buddy>,
    operators: BTreeMap<i64, Operator>,
    trips: BTreeMap<i64, Trip>,
    certifications: BTreeMap<i64, Certification>,
    reference: HashMap<&'static str, Vec<ReferenceRow>>,
    dives: BTreeMap<i64, StoredDive>,
    last_dive_id: i64,
}

fn dangling(what: &str, id: i64) -> SourceError {
    SourceError::Unavailable(format!("dive refers to missing {what} {id}"))
}

impl State {
    fn lookup<K: ReferenceKind>(&self, id: i64) -> Option<K> {
        self.reference
            .get(K::TABLE)?
            .iter()
            .find(|row| row.id == id)
            .cloned()
            .map(K::from_row)
    }

    fn required<K: ReferenceKind>(&self, id: i64) -> Result<K, SourceError> {
        self.lookup(id).ok_or_else(|| dangling(K::TABLE, id))
    }

    fn optional<K: ReferenceKind>(&self, id: Option<i64>) -> Result<Option<K>, SourceError> {
        id.map(|id| self.required(id)).transpose()
    }

    fn entity<T: Clone>(
        map: &BTreeMap<i64, T>,
        what: &str,
        id: Option<i64>,
    ) -> Result<Option<T>, SourceError> {
        id.map(|id| map.get(&id).cloned().ok_or_else(|| dangling(what, id)))
            .transpose()
    }

    /// Resolve every association of a stored dive.
    fn hydrate(&self, stored: &StoredDive) -> Result<Dive, SourceError> {
        let r = &stored.record;
        let dive_site = self
            .sites
            .get(&r.dive_site_id)
            .cloned()
            .ok_or_else(|| dangling("dive site", r.dive_site_id))?;
        let price = match (r.price, Self::entity(&self.currencies, "currency", r.currency_id)?) {
            (Some(amount), Some(currency)) => Some(Price { amount, currency }),
            _ => None,
        };

        Ok(Dive {
            id: stored.id,
            version: stored.version,
            owner_id: r.owner_id,
            number: r.number,
            activity: r.activity.clone(),
            dive_site,
            operator: Self::entity(&self.operators, "operator", r.operator_id)?,
            price,
            trip: Self::entity(&self.trips, "trip", r.trip_id)?,
            certification: Self::entity(&self.certifications, "certification", r.certification_id)?,
            date_time_in: r.date_time_in,
            surface_interval: None,
            max_depth: r.max_depth,
            avg_depth: r.avg_depth,
            bottom_time: r.bottom_time,
            safety_stop: r.safety_stop,
            water_temp: r.water_temp,
            air_temp: r.air_temp,
            visibility: r.visibility,
            current: self.optional::<Current>(r.current_id)?,
            waves: self.optional::<Waves>(r.waves_id)?,
            buddy: Self::entity(&self.buddies, "buddy", r.buddy_id)?,
            buddy_role: self.optional::<BuddyRole>(r.buddy_role_id)?,
            weight: r.weight,
            weight_notes: r.weight_notes.clone(),
            equipment: r
                .equipment_ids
                .iter()
                .map(|id| self.required::<Equipment>(*id))
                .collect::<Result<_, _>>()?,
            equipment_notes: r.equipment_notes.clone(),
            tank_configuration: self.required::<TankConfiguration>(r.tank_configuration_id)?,
            tank_material: self.required::<TankMaterial>(r.tank_material_id)?,
            tank_volume: r.tank_volume,
            gas_mix: self.required::<GasMix>(r.gas_mix_id)?,
            fo2: r.fo2,
            pressure_in: r.pressure_in,
            pressure_out: r.pressure_out,
            gas_mix_notes: r.gas_mix_notes.clone(),
            entry_point: self.required::<EntryPoint>(r.entry_point_id)?,
            properties: r
                .property_ids
                .iter()
                .map(|id| self.required::<DiveProperty>(*id))
                .collect::<Result<_, _>>()?,
            rating: r.rating,
            notes: r.notes.clone(),
        })
    }

    /// Every dive of `owner`, hydrated, with surface intervals filled in.
    fn owner_dives(&self, owner: UserId) -> Result<Vec<Dive>, SourceError> {
        let mut dives = self
            .dives
            .values()
            .filter(|d| d.record.owner_id == owner)
            .map(|d| self.hydrate(d))
            .collect::<Result<Vec<_>, _>>()?;
        assign_surface_intervals(&mut dives);
        Ok(dives)
    }

    fn number_taken(&self, record: &DiveRecord, except: Option<DiveId>) -> bool {
        self.dives.values().any(|d| {
            d.record.owner_id == record.owner_id
                && d.record.number == record.number
                && Some(d.id) != except
        })
    }

    fn contains(&self, table: RecordTable, id: i64) -> bool {
        match table {
            RecordTable::Dives => self.dives.contains_key(&id),
            RecordTable::DiveSites => self.sites.contains_key(&id),
            RecordTable::Operators => self.operators.contains_key(&id),
            RecordTable::Trips => self.trips.contains_key(&id),
            RecordTable::Certifications => self.certifications.contains_key(&id),
            RecordTable::Buddies => self.buddies.contains_key(&id),
            RecordTable::Currencies => self.currencies.contains_key(&id),
        }
    }
}

/// Thread-safe in-memory logbook.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, SourceError> {
        self.state
            .read()
            .map_err(|_| SourceError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, SourceError> {
        self.state
            .write()
            .map_err(|_| SourceError::Unavailable("memory store lock poisoned".to_string()))
    }

    pub fn add_currency(&self, currency: Currency) -> Result<(), SourceError> {
        self.write()?.currencies.insert(currency.id.0, currency);
        Ok(())
    }

    pub fn add_dive_site(&self, site: DiveSite) -> Result<(), SourceError> {
        self.write()?.sites.insert(site.id.0, site);
        Ok(())
    }

    pub fn add_buddy(&self, buddy: Buddy) -> Result<(), SourceError> {
        self.write()?.buddies.insert(buddy.id.0, buddy);
        Ok(())
    }

    pub fn add_operator(&self, operator: Operator) -> Result<(), SourceError> {
        self.write()?.operators.insert(operator.id.0, operator);
        Ok(())
    }

    pub fn add_trip(&self, trip: Trip) -> Result<(), SourceError> {
        self.write()?.trips.insert(trip.id.0, trip);
        Ok(())
    }

    pub fn add_certification(&self, certification: Certification) -> Result<(), SourceError> {
        self.write()?
            .certifications
            .insert(certification.id.0, certification);
        Ok(())
    }

    /// Replace the rows of one reference table.
    pub fn set_reference_rows(
        &self,
        table: &'static str,
        rows: Vec<ReferenceRow>,
    ) -> Result<(), SourceError> {
        self.write()?.reference.insert(table, rows);
        Ok(())
    }
}

impl ReferenceSource for MemoryStore {
    fn fetch_reference_rows(
        &self,
        ctx: &RequestContext,
        table: &'static str,
        sort_by: ReferenceSort,
    ) -> Result<Vec<ReferenceRow>, SourceError> {
        ctx.check_source()?;
        let mut rows = self.read()?.reference.get(table).cloned().unwrap_or_default();
        match sort_by {
            ReferenceSort::Sort => rows.sort_by(|a, b| a.sort.cmp(&b.sort).then(a.id.cmp(&b.id))),
            ReferenceSort::Name => rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id))),
        }
        trace!(table, rows = rows.len(), "fetched reference rows");
        Ok(rows)
    }
}

impl Storage for MemoryStore {
    fn fetch_dives_for_owner(
        &self,
        ctx: &RequestContext,
        owner: UserId,
        pager: &Pager,
        filter: &DiveFilter,
        sort: &SortSpec<DiveSort>,
    ) -> Result<(Vec<Dive>, u64), SourceError> {
        ctx.check_source()?;
        let mut dives: Vec<Dive> = self
            .read()?
            .owner_dives(owner)?
            .into_iter()
            .filter(|d| filter.matches(d))
            .collect();
        sort.sort(&mut dives);

        let total = dives.len() as u64;
        let page = dives
            .into_iter()
            .skip(usize::try_from(pager.offset()).unwrap_or(usize::MAX))
            .take(usize::try_from(pager.limit()).unwrap_or(usize::MAX))
            .collect();
        Ok((page, total))
    }

    fn fetch_dive(
        &self,
        ctx: &RequestContext,
        owner: UserId,
        id: DiveId,
    ) -> Result<Dive, SourceError> {
        ctx.check_source()?;
        self.read()?
            .owner_dives(owner)?
            .into_iter()
            .find(|d| d.id == id)
            .ok_or(SourceError::NotFound)
    }

    fn fetch_dive_site_timezone(
        &self,
        ctx: &RequestContext,
        site: DiveSiteId,
    ) -> Result<String, SourceError> {
        ctx.check_source()?;
        self.read()?
            .sites
            .get(&site.0)
            .map(|s| s.timezone.clone())
            .ok_or(SourceError::NotFound)
    }

    fn fetch_aggregate_rollup(
        &self,
        ctx: &RequestContext,
        owner: UserId,
        group_by: GroupBy,
        limit: Option<usize>,
    ) -> Result<Vec<RollupRow>, SourceError> {
        ctx.check_source()?;
        let dives = self.read()?.owner_dives(owner)?;
        Ok(rollup(&dives, group_by, limit))
    }

    fn id_exists(
        &self,
        ctx: &RequestContext,
        table: RecordTable,
        id: i64,
    ) -> Result<bool, SourceError> {
        ctx.check_source()?;
        Ok(self.read()?.contains(table, id))
    }

    fn ids_all_exist(
        &self,
        ctx: &RequestContext,
        table: RecordTable,
        ids: &[i64],
    ) -> Result<bool, SourceError> {
        ctx.check_source()?;
        let state = self.read()?;
        Ok(ids.iter().all(|id| state.contains(table, *id)))
    }

    fn insert_dive(
        &self,
        ctx: &RequestContext,
        record: &DiveRecord,
    ) -> Result<(DiveId, i32), SourceError> {
        ctx.check_source()?;
        let mut state = self.write()?;
        if state.number_taken(record, None) {
            return Err(SourceError::Duplicate { field: "number" });
        }

        state.last_dive_id += 1;
        let id = DiveId(state.last_dive_id);
        state.dives.insert(
            id.0,
            StoredDive {
                id,
                version: 1,
                record: record.clone(),
            },
        );
        debug!(dive_id = id.0, owner = record.owner_id.0, "inserted dive");
        Ok((id, 1))
    }

    fn update_dive(
        &self,
        ctx: &RequestContext,
        id: DiveId,
        version: i32,
        record: &DiveRecord,
    ) -> Result<u64, SourceError> {
        ctx.check_source()?;
        let mut state = self.write()?;
        let matches = state
            .dives
            .get(&id.0)
            .is_some_and(|d| d.record.owner_id == record.owner_id && d.version == version);
        if !matches {
            return Ok(0);
        }
        if state.number_taken(record, Some(id)) {
            return Err(SourceError::Duplicate { field: "number" });
        }

        if let Some(stored) = state.dives.get_mut(&id.0) {
            stored.version += 1;
            stored.record = record.clone();
        }
        Ok(1)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::models::fixtures::{buddy, country, currency, site};
    use crate::models::TripId;
    use crate::reference::{Agency, BuddyRole, Current, DiveProperty, EntryPoint, Waves};
    use crate::validation::forms::fixtures::dive_form;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use std::time::Duration;

    pub const OWNER: UserId = UserId(1);
    pub const OTHER_OWNER: UserId = UserId(2);

    fn rows(names: &[&str]) -> Vec<ReferenceRow> {
        names
            .iter()
            .enumerate()
            .map(|(idx, name)| ReferenceRow {
                id: idx as i64 + 1,
                sort: Some(idx as i32 + 1),
                is_default: Some(idx == 0),
                name: Some(name.to_string()),
                description: Some(String::new()),
            })
            .collect()
    }

    pub fn record(owner: UserId, number: i32, site: i64, at: DateTime<Utc>) -> DiveRecord {
        let mut form = dive_form();
        form.number = number;
        form.dive_site_id = site;
        form.into_record(owner, at)
    }

    /// Two countries, three sites, two buddies, reference data and a short
    /// history of five dives for [`OWNER`] plus one for [`OTHER_OWNER`].
    pub fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        let malta = country(1, "Malta");
        let indonesia = country(2, "Indonesia");
        store.add_currency(currency()).unwrap();

        let mut blue_hole = site(1, malta.clone(), "Europe/Malta", 0);
        blue_hole.name = "Blue Hole".to_string();
        let mut manta_point = site(2, indonesia, "Asia/Makassar", 0);
        manta_point.name = "Manta Point".to_string();
        let mut um_el_faroud = site(3, malta, "Europe/Malta", 0);
        um_el_faroud.name = "Um El Faroud".to_string();
        for s in [blue_hole, manta_point, um_el_faroud] {
            store.add_dive_site(s).unwrap();
        }

        store.add_buddy(buddy(1, "Sam Reyes")).unwrap();
        store.add_buddy(buddy(2, "Alex Kim")).unwrap();
        store
            .add_trip(Trip {
                id: TripId(1),
                owner_id: OWNER,
                name: "Komodo".to_string(),
                start_date: NaiveDate::from_ymd_opt(2024, 5, 9).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2024, 5, 16).unwrap(),
                description: String::new(),
                rating: None,
                operator: None,
                price: None,
                notes: String::new(),
            })
            .unwrap();

        for (table, names) in [
            (Agency::TABLE, &["PADI", "SSI"][..]),
            (BuddyRole::TABLE, &["Buddy", "Instructor"][..]),
            (Current::TABLE, &["None", "Mild", "Strong"][..]),
            (DiveProperty::TABLE, &["Wreck", "Night"][..]),
            (EntryPoint::TABLE, &["Boat", "Shore"][..]),
            (Equipment::TABLE, &["Wetsuit", "Computer"][..]),
            (GasMix::TABLE, &["Air", "Nitrox", "Trimix", "Heliox", "Oxygen"][..]),
            (
                TankConfiguration::TABLE,
                &["Single Tank", "Sidemount", "Twinset", "Rebreather"][..],
            ),
            (TankMaterial::TABLE, &["Aluminium", "Steel"][..]),
            (Waves::TABLE, &["Calm", "Choppy"][..]),
        ] {
            store.set_reference_rows(table, rows(names)).unwrap();
        }

        let ctx = RequestContext::with_timeout(Duration::from_secs(5));
        let at = |m, d, h| Utc.with_ymd_and_hms(2024, m, d, h, 0, 0).unwrap();
        let mut history = vec![
            record(OWNER, 1, 1, at(3, 2, 8)),
            record(OWNER, 2, 1, at(3, 2, 11)),
            record(OWNER, 3, 2, at(5, 10, 1)),
            record(OWNER, 4, 2, at(5, 11, 1)),
            record(OWNER, 5, 3, at(6, 1, 9)),
        ];
        history[0].buddy_id = Some(1);
        history[1].buddy_id = Some(1);
        history[2].buddy_id = Some(2);
        history[2].trip_id = Some(1);
        for r in history {
            store.insert_dive(&ctx, &r).unwrap();
        }
        store
            .insert_dive(&ctx, &record(OTHER_OWNER, 1, 1, at(4, 1, 9)))
            .unwrap();

        store
    }
}
