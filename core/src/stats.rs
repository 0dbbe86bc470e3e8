//! Aggregate statistics over a diver's history.
//!
//! One aggregation formula, [`aggregate`], is applied to every grouping:
//! the whole history, calendar months, countries, dive sites and buddies.
//! [`rollup`] is the grouping primitive a data source can use to answer
//! [`Storage::fetch_aggregate_rollup`]; [`StatsAggregator`] turns those rows
//! into the five result sets shown to the diver.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::debug;

use crate::context::RequestContext;
use crate::error::{DependencyError, EngineError};
use crate::models::{Buddy, Country, Dive, DiveHistory, DiveSite, UserId};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DurationStats {
    pub avg: Duration,
    pub max: Duration,
    pub sum: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DepthStats {
    pub avg: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateDiveStats {
    pub dives: u32,
    pub first_dive: DateTime<Utc>,
    pub last_dive: DateTime<Utc>,
    pub bottom_time: DurationStats,
    /// Over dives that recorded an average depth; zero when none did.
    pub avg_depth: DepthStats,
    pub max_depth: DepthStats,
}

impl AggregateDiveStats {
    pub fn history(&self) -> DiveHistory {
        DiveHistory {
            dives: self.dives,
            first_dive: Some(self.first_dive),
            last_dive: Some(self.last_dive),
        }
    }
}

/// The fields of a dive the aggregation reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiveSummary {
    pub date_time_in: DateTime<Utc>,
    pub bottom_time: Duration,
    pub avg_depth: Option<f64>,
    pub max_depth: f64,
}

impl From<&Dive> for DiveSummary {
    fn from(dive: &Dive) -> Self {
        Self {
            date_time_in: dive.date_time_in,
            bottom_time: dive.bottom_time,
            avg_depth: dive.avg_depth,
            max_depth: dive.max_depth,
        }
    }
}

/// Aggregate a group of dives. `None` for an empty group.
pub fn aggregate<I>(dives: I) -> Option<AggregateDiveStats>
where
    I: IntoIterator<Item = DiveSummary>,
{
    let mut dives = dives.into_iter();
    let first = dives.next()?;

    let mut count: u32 = 1;
    let mut first_dive = first.date_time_in;
    let mut last_dive = first.date_time_in;
    let mut bottom_sum = first.bottom_time;
    let mut bottom_max = first.bottom_time;
    let mut max_depth_sum = first.max_depth;
    let mut max_depth_max = first.max_depth;
    let mut avg_depth_sum = 0.0;
    let mut avg_depth_max: Option<f64> = None;
    let mut avg_depth_count: u32 = 0;

    let mut add_avg_depth = |depth: Option<f64>| {
        if let Some(depth) = depth {
            avg_depth_sum += depth;
            avg_depth_count += 1;
            avg_depth_max = Some(avg_depth_max.map_or(depth, |m: f64| m.max(depth)));
        }
    };
    add_avg_depth(first.avg_depth);

    for dive in dives {
        count += 1;
        first_dive = first_dive.min(dive.date_time_in);
        last_dive = last_dive.max(dive.date_time_in);
        bottom_sum += dive.bottom_time;
        bottom_max = bottom_max.max(dive.bottom_time);
        max_depth_sum += dive.max_depth;
        max_depth_max = max_depth_max.max(dive.max_depth);
        add_avg_depth(dive.avg_depth);
    }

    let avg_depth = if avg_depth_count == 0 {
        DepthStats::default()
    } else {
        DepthStats {
            avg: avg_depth_sum / f64::from(avg_depth_count),
            max: avg_depth_max.unwrap_or_default(),
        }
    };

    Some(AggregateDiveStats {
        dives: count,
        first_dive,
        last_dive,
        bottom_time: DurationStats {
            avg: bottom_sum / count,
            max: bottom_max,
            sum: bottom_sum,
        },
        avg_depth,
        max_depth: DepthStats {
            avg: max_depth_sum / f64::from(count),
            max: max_depth_max,
        },
    })
}

/// Grouping dimension of a rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GroupBy {
    None,
    Month,
    Country,
    DiveSite,
    Buddy,
}

impl GroupBy {
    pub fn name(self) -> &'static str {
        match self {
            GroupBy::None => "general",
            GroupBy::Month => "month",
            GroupBy::Country => "country",
            GroupBy::DiveSite => "dive site",
            GroupBy::Buddy => "buddy",
        }
    }
}

/// The group a rollup row belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RollupDimension {
    All,
    /// First day of a UTC calendar month.
    Month(NaiveDate),
    Country(Country),
    DiveSite(DiveSite),
    Buddy(Buddy),
}

impl RollupDimension {
    fn group_by(&self) -> GroupBy {
        match self {
            RollupDimension::All => GroupBy::None,
            RollupDimension::Month(_) => GroupBy::Month,
            RollupDimension::Country(_) => GroupBy::Country,
            RollupDimension::DiveSite(_) => GroupBy::DiveSite,
            RollupDimension::Buddy(_) => GroupBy::Buddy,
        }
    }

    fn tie_break(&self) -> i64 {
        match self {
            RollupDimension::All | RollupDimension::Month(_) => 0,
            RollupDimension::Country(c) => c.id.0,
            RollupDimension::DiveSite(s) => s.id.0,
            RollupDimension::Buddy(b) => b.id.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollupRow {
    pub dimension: RollupDimension,
    pub stats: AggregateDiveStats,
}

pub fn month_of(instant: DateTime<Utc>) -> NaiveDate {
    instant.date_naive().with_day(1).unwrap_or(instant.date_naive())
}

fn by_rank(a: &RollupRow, b: &RollupRow) -> std::cmp::Ordering {
    b.stats
        .dives
        .cmp(&a.stats.dives)
        .then(a.dimension.tie_break().cmp(&b.dimension.tie_break()))
}

/// Group `dives` and aggregate each group.
///
/// Month rows come most recent first; country, site and buddy rows by dive
/// count descending with ties broken by id. Dives without a buddy are left
/// out of the buddy grouping.
pub fn rollup(dives: &[Dive], group_by: GroupBy, limit: Option<usize>) -> Vec<RollupRow> {
    let mut groups: BTreeMap<(NaiveDate, i64), (RollupDimension, Vec<DiveSummary>)> =
        BTreeMap::new();

    for dive in dives {
        let keyed = match group_by {
            GroupBy::None => Some(((NaiveDate::MIN, 0), RollupDimension::All)),
            GroupBy::Month => {
                let month = month_of(dive.date_time_in);
                Some(((month, 0), RollupDimension::Month(month)))
            }
            GroupBy::Country => Some((
                (NaiveDate::MIN, dive.dive_site.country.id.0),
                RollupDimension::Country(dive.dive_site.country.clone()),
            )),
            GroupBy::DiveSite => Some((
                (NaiveDate::MIN, dive.dive_site.id.0),
                RollupDimension::DiveSite(dive.dive_site.clone()),
            )),
            GroupBy::Buddy => dive.buddy.as_ref().map(|buddy| {
                ((NaiveDate::MIN, buddy.id.0), RollupDimension::Buddy(buddy.clone()))
            }),
        };

        if let Some((key, dimension)) = keyed {
            groups
                .entry(key)
                .or_insert_with(|| (dimension, Vec::new()))
                .1
                .push(DiveSummary::from(dive));
        }
    }

    let mut rows: Vec<RollupRow> = groups
        .into_values()
        .filter_map(|(dimension, summaries)| {
            aggregate(summaries).map(|stats| RollupRow { dimension, stats })
        })
        .collect();

    match group_by {
        GroupBy::Month => rows.reverse(),
        GroupBy::Country | GroupBy::DiveSite | GroupBy::Buddy => rows.sort_by(by_rank),
        GroupBy::None => {}
    }
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    rows
}

/// An aggregate paired with the group it was computed over.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionalStats<D> {
    pub dimension: D,
    pub stats: AggregateDiveStats,
}

pub type MonthStats = DimensionalStats<NaiveDate>;
pub type CountryStats = DimensionalStats<Country>;
pub type DiveSiteStats = DimensionalStats<DiveSite>;
pub type BuddyStats = DimensionalStats<Buddy>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiveStats {
    pub general: AggregateDiveStats,
    pub by_month: Vec<MonthStats>,
    pub by_country: Vec<CountryStats>,
    pub by_dive_site: Vec<DiveSiteStats>,
    pub by_buddy: Vec<BuddyStats>,
}

/// Computes a diver's statistics from storage rollups.
pub struct StatsAggregator {
    storage: Arc<dyn Storage>,
    top_n: usize,
}

impl StatsAggregator {
    pub fn new(storage: Arc<dyn Storage>, top_n: usize) -> Self {
        Self { storage, top_n }
    }

    fn fetch(
        &self,
        ctx: &RequestContext,
        owner: UserId,
        group_by: GroupBy,
        limit: Option<usize>,
    ) -> Result<Vec<RollupRow>, EngineError> {
        let operation = "fetch aggregate rollup";
        ctx.check(operation)?;
        let rows = self
            .storage
            .fetch_aggregate_rollup(ctx, owner, group_by, limit)
            .map_err(|e| e.during(operation))?;

        if let Some(row) = rows.iter().find(|r| r.dimension.group_by() != group_by) {
            return Err(DependencyError::Source {
                operation: operation.to_string(),
                message: format!(
                    "{} rollup returned a {} row",
                    group_by.name(),
                    row.dimension.group_by().name()
                ),
            }
            .into());
        }
        debug!(owner = owner.0, group_by = group_by.name(), rows = rows.len(), "fetched rollup");
        Ok(rows)
    }

    /// Rank rows by dive count and keep the top entries.
    fn ranked(&self, mut rows: Vec<RollupRow>) -> Vec<RollupRow> {
        rows.sort_by(by_rank);
        rows.truncate(self.top_n);
        rows
    }

    /// Totals over every dive. An empty history is [`EngineError::NoData`].
    pub fn general(&self, ctx: &RequestContext, owner: UserId) -> Result<AggregateDiveStats, EngineError> {
        self.fetch(ctx, owner, GroupBy::None, None)?
            .into_iter()
            .next()
            .map(|row| row.stats)
            .filter(|stats| stats.dives > 0)
            .ok_or(EngineError::NoData)
    }

    /// One entry per month with at least one dive, most recent first.
    pub fn by_month(&self, ctx: &RequestContext, owner: UserId) -> Result<Vec<MonthStats>, EngineError> {
        let mut months: Vec<MonthStats> = self
            .fetch(ctx, owner, GroupBy::Month, None)?
            .into_iter()
            .filter_map(|row| match row.dimension {
                RollupDimension::Month(month) => Some(DimensionalStats {
                    dimension: month,
                    stats: row.stats,
                }),
                _ => None,
            })
            .collect();
        months.sort_by(|a, b| b.dimension.cmp(&a.dimension));
        Ok(months)
    }

    pub fn by_country(&self, ctx: &RequestContext, owner: UserId) -> Result<Vec<CountryStats>, EngineError> {
        let rows = self.fetch(ctx, owner, GroupBy::Country, Some(self.top_n))?;
        Ok(self
            .ranked(rows)
            .into_iter()
            .filter_map(|row| match row.dimension {
                RollupDimension::Country(country) => Some(DimensionalStats {
                    dimension: country,
                    stats: row.stats,
                }),
                _ => None,
            })
            .collect())
    }

    /// Top sites, each carrying the owner's history at that site.
    pub fn by_dive_site(
        &self,
        ctx: &RequestContext,
        owner: UserId,
    ) -> Result<Vec<DiveSiteStats>, EngineError> {
        let rows = self.fetch(ctx, owner, GroupBy::DiveSite, Some(self.top_n))?;
        Ok(self
            .ranked(rows)
            .into_iter()
            .filter_map(|row| match row.dimension {
                RollupDimension::DiveSite(mut site) => {
                    site.history = row.stats.history();
                    Some(DimensionalStats {
                        dimension: site,
                        stats: row.stats,
                    })
                }
                _ => None,
            })
            .collect())
    }

    /// Top buddies over dives that recorded one.
    pub fn by_buddy(&self, ctx: &RequestContext, owner: UserId) -> Result<Vec<BuddyStats>, EngineError> {
        let rows = self.fetch(ctx, owner, GroupBy::Buddy, Some(self.top_n))?;
        Ok(self
            .ranked(rows)
            .into_iter()
            .filter_map(|row| match row.dimension {
                RollupDimension::Buddy(mut buddy) => {
                    buddy.history = row.stats.history();
                    Some(DimensionalStats {
                        dimension: buddy,
                        stats: row.stats,
                    })
                }
                _ => None,
            })
            .collect())
    }

    /// All five result sets. Nothing is returned if the request is cancelled
    /// or expires part way through.
    pub fn dive_stats(&self, ctx: &RequestContext, owner: UserId) -> Result<DiveStats, EngineError> {
        let general = self.general(ctx, owner)?;
        let by_month = self.by_month(ctx, owner)?;
        let by_country = self.by_country(ctx, owner)?;
        let by_dive_site = self.by_dive_site(ctx, owner)?;
        let by_buddy = self.by_buddy(ctx, owner)?;
        ctx.check("compute dive stats")?;

        debug!(
            owner = owner.0,
            dives = general.dives,
            months = by_month.len(),
            countries = by_country.len(),
            sites = by_dive_site.len(),
            buddies = by_buddy.len(),
            "computed dive stats"
        );
        Ok(DiveStats {
            general,
            by_month,
            by_country,
            by_dive_site,
            by_buddy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::memory::fixtures::{seeded_store, OWNER};
    use crate::memory::MemoryStore;
    use crate::models::fixtures::*;
    use crate::pagination::Pager;
    use crate::sorting::{DiveSort, SortSpec};
    use crate::storage::DiveFilter;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn ctx() -> RequestContext {
        RequestContext::with_timeout(Duration::from_secs(5))
    }

    fn summary(day: u32, minutes: u64, avg: Option<f64>, max: f64) -> DiveSummary {
        DiveSummary {
            date_time_in: Utc.with_ymd_and_hms(2024, 5, day, 9, 0, 0).unwrap(),
            bottom_time: Duration::from_secs(minutes * 60),
            avg_depth: avg,
            max_depth: max,
        }
    }

    #[test]
    fn test_aggregate_empty() {
        assert_eq!(aggregate(Vec::new()), None);
    }

    #[test]
    fn test_aggregate_values() {
        let stats = aggregate(vec![
            summary(3, 40, Some(10.0), 20.0),
            summary(1, 50, None, 30.0),
            summary(2, 60, Some(14.0), 25.0),
        ])
        .unwrap();

        assert_eq!(stats.dives, 3);
        assert_eq!(stats.first_dive, Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        assert_eq!(stats.last_dive, Utc.with_ymd_and_hms(2024, 5, 3, 9, 0, 0).unwrap());
        assert_eq!(stats.bottom_time.sum, Duration::from_secs(150 * 60));
        assert_eq!(stats.bottom_time.avg, Duration::from_secs(50 * 60));
        assert_eq!(stats.bottom_time.max, Duration::from_secs(60 * 60));
        assert_eq!(stats.avg_depth, DepthStats { avg: 12.0, max: 14.0 });
        assert_eq!(stats.max_depth, DepthStats { avg: 25.0, max: 30.0 });
    }

    #[test]
    fn test_missing_avg_depth_defaults_to_zero() {
        let stats = aggregate(vec![summary(1, 40, None, 20.0)]).unwrap();
        assert_eq!(stats.avg_depth, DepthStats { avg: 0.0, max: 0.0 });
    }

    #[test]
    fn test_general_no_data() {
        let aggregator = StatsAggregator::new(Arc::new(MemoryStore::new()), 10);
        assert_eq!(aggregator.general(&ctx(), OWNER), Err(EngineError::NoData));
        assert_eq!(aggregator.dive_stats(&ctx(), OWNER), Err(EngineError::NoData));
    }

    #[test]
    fn test_dive_stats_over_seeded_history() {
        let store = Arc::new(seeded_store());
        let aggregator = StatsAggregator::new(store.clone(), 10);
        let stats = aggregator.dive_stats(&ctx(), OWNER).unwrap();

        let (dives, total) = store
            .fetch_dives_for_owner(
                &ctx(),
                OWNER,
                &Pager::new(1, 100, 20),
                &DiveFilter::default(),
                &SortSpec::<DiveSort>::default(),
            )
            .unwrap();
        assert_eq!(u64::from(stats.general.dives), total);

        let month_total: u32 = stats.by_month.iter().map(|m| m.stats.dives).sum();
        assert_eq!(month_total, stats.general.dives);
        assert!(stats
            .by_month
            .windows(2)
            .all(|w| w[0].dimension > w[1].dimension));

        let with_buddy = dives.iter().filter(|d| d.buddy.is_some()).count() as u32;
        let buddy_total: u32 = stats.by_buddy.iter().map(|b| b.stats.dives).sum();
        assert_eq!(buddy_total, with_buddy);

        for site in &stats.by_dive_site {
            assert_eq!(site.dimension.history, site.stats.history());
        }
    }

    #[test]
    fn test_top_n_and_tie_break() {
        let country = country(1, "Malta");
        let mut dives = Vec::new();
        for site_id in 1..=12 {
            let s = site(site_id, country.clone(), "Europe/Malta", 0);
            let repeat = if site_id == 7 { 3 } else { 1 };
            for n in 0..repeat {
                dives.push(dive(site_id * 10 + n, (site_id * 10 + n) as i32, s.clone()));
            }
        }

        let rows = rollup(&dives, GroupBy::DiveSite, None);
        let aggregator = StatsAggregator::new(Arc::new(MemoryStore::new()), 10);
        let ranked = aggregator.ranked(rows);

        assert_eq!(ranked.len(), 10);
        let ids: Vec<i64> = ranked.iter().map(|r| r.dimension.tie_break()).collect();
        assert_eq!(ids, [7, 1, 2, 3, 4, 5, 6, 8, 9, 10]);
    }

    #[test]
    fn test_buddy_rollup_skips_solo_dives() {
        let s = site(1, country(1, "Malta"), "Europe/Malta", 0);
        let mut with_buddy = dive(1, 1, s.clone());
        with_buddy.buddy = Some(buddy(5, "Sam"));
        let solo = dive(2, 2, s);

        let rows = rollup(&[with_buddy, solo], GroupBy::Buddy, None);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stats.dives, 1);
    }

    #[test]
    fn test_cancelled_request_returns_nothing() {
        let aggregator = StatsAggregator::new(Arc::new(seeded_store()), 10);
        let ctx = ctx();
        ctx.cancel();
        assert_eq!(aggregator.dive_stats(&ctx, OWNER), Err(EngineError::Cancelled));
        assert_eq!(aggregator.by_buddy(&ctx, OWNER), Err(EngineError::Cancelled));
    }

    #[test]
    fn test_mismatched_rollup_rows_rejected() {
        struct WrongRows;
        impl Storage for WrongRows {
            fn fetch_dives_for_owner(
                &self,
                _: &RequestContext,
                _: UserId,
                _: &Pager,
                _: &DiveFilter,
                _: &SortSpec<DiveSort>,
            ) -> Result<(Vec<Dive>, u64), SourceError> {
                Ok((Vec::new(), 0))
            }
            fn fetch_dive(&self, _: &RequestContext, _: UserId, _: crate::models::DiveId) -> Result<Dive, SourceError> {
                Err(SourceError::NotFound)
            }
            fn fetch_dive_site_timezone(
                &self,
                _: &RequestContext,
                _: crate::models::DiveSiteId,
            ) -> Result<String, SourceError> {
                Err(SourceError::NotFound)
            }
            fn fetch_aggregate_rollup(
                &self,
                _: &RequestContext,
                _: UserId,
                _: GroupBy,
                _: Option<usize>,
            ) -> Result<Vec<RollupRow>, SourceError> {
                let s = site(1, country(1, "Malta"), "Europe/Malta", 0);
                let d = dive(1, 1, s);
                Ok(rollup(&[d], GroupBy::Country, None))
            }
            fn id_exists(&self, _: &RequestContext, _: crate::storage::RecordTable, _: i64) -> Result<bool, SourceError> {
                Ok(false)
            }
            fn ids_all_exist(&self, _: &RequestContext, _: crate::storage::RecordTable, _: &[i64]) -> Result<bool, SourceError> {
                Ok(false)
            }
            fn insert_dive(&self, _: &RequestContext, _: &crate::storage::DiveRecord) -> Result<(crate::models::DiveId, i32), SourceError> {
                Err(SourceError::Unavailable("read only".to_string()))
            }
            fn update_dive(&self, _: &RequestContext, _: crate::models::DiveId, _: i32, _: &crate::storage::DiveRecord) -> Result<u64, SourceError> {
                Ok(0)
            }
        }

        let aggregator = StatsAggregator::new(Arc::new(WrongRows), 10);
        let err = aggregator.by_dive_site(&ctx(), OWNER).unwrap_err();
        assert!(matches!(err, EngineError::Dependency(DependencyError::Source { .. })));
        assert!(aggregator.by_country(&ctx(), OWNER).is_ok());
    }

    proptest! {
        #[test]
        fn ranked_rollups_are_capped_and_ordered(counts in prop::collection::vec(0usize..5, 1..30)) {
            let country = country(1, "Malta");
            let mut dives = Vec::new();
            let mut next_id = 1;
            for (idx, count) in counts.iter().enumerate() {
                let s = site(idx as i64 + 1, country.clone(), "Europe/Malta", 0);
                for _ in 0..*count {
                    dives.push(dive(next_id, next_id as i32, s.clone()));
                    next_id += 1;
                }
            }

            let aggregator = StatsAggregator::new(Arc::new(MemoryStore::new()), 10);
            let first = aggregator.ranked(rollup(&dives, GroupBy::DiveSite, None));
            let again = aggregator.ranked(rollup(&dives, GroupBy::DiveSite, None));

            prop_assert!(first.len() <= 10);
            prop_assert_eq!(&first, &again);
            for pair in first.windows(2) {
                prop_assert!(
                    pair[0].stats.dives > pair[1].stats.dives
                        || (pair[0].stats.dives == pair[1].stats.dives
                            && pair[0].dimension.tie_break() < pair[1].dimension.tie_break())
                );
            }
        }
    }
}
