//! The engine facade used by the web layer.
//!
//! [`DiveEngine`] wires the calculators, validators, time-zone adjustment,
//! statistics and the reference cache to one storage collaborator. It holds no
//! per-request state and is shared across request threads.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::error::{EngineError, SourceError};
use crate::metrics::DiveMetrics;
use crate::models::{Dive, DiveId, DiveSiteId, UserId};
use crate::pagination::{PageData, Pager};
use crate::reference::ReferenceData;
use crate::sorting::{DiveSort, SortSpec};
use crate::stats::{DiveStats, StatsAggregator};
use crate::storage::{DiveFilter, ReferenceSource, Storage};
use crate::timezone::{parse_wall_clock, to_site_local, TimezoneAdjuster};
use crate::validation::forms::DiveForm;
use crate::validation::references::check_dive_references;
use crate::validation::ValidationErrors;

const INVALID_DATE_TIME_MESSAGE: &str = "This field must be a valid date and time";

/// A dive as shown to its owner: the stored record, its start time in the
/// site's zone and the derived metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct DiveView {
    pub dive: Dive,
    pub local_date_time_in: DateTime<Tz>,
    pub metrics: DiveMetrics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DivePage {
    pub dives: Vec<DiveView>,
    pub page: PageData,
}

pub struct DiveEngine {
    config: EngineConfig,
    storage: Arc<dyn Storage>,
    reference: ReferenceData,
    timezones: TimezoneAdjuster,
    stats: StatsAggregator,
}

impl DiveEngine {
    pub fn new(
        config: EngineConfig,
        storage: Arc<dyn Storage>,
        reference_source: Arc<dyn ReferenceSource>,
    ) -> Self {
        let stats = StatsAggregator::new(Arc::clone(&storage), config.stats_top_n);
        Self {
            reference: ReferenceData::new(reference_source),
            timezones: TimezoneAdjuster::new(Arc::clone(&storage)),
            stats,
            storage,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared reference-data caches.
    pub fn reference(&self) -> &ReferenceData {
        &self.reference
    }

    /// A fresh context carrying the configured query deadline.
    pub fn request_context(&self) -> RequestContext {
        RequestContext::with_timeout(self.config.query_timeout())
    }

    /// As [`Self::request_context`], cancelled along with `token`.
    pub fn request_context_with_cancel(&self, token: CancellationToken) -> RequestContext {
        RequestContext::with_cancellation(self.config.query_timeout(), token)
    }

    /// Reference tables are loaded once for every request, so a load gets the
    /// reference deadline rather than whatever the triggering request has left.
    fn reference_context(&self, ctx: &RequestContext) -> RequestContext {
        ctx.child(self.config.reference_timeout())
    }

    pub fn new_pager(&self, page: i64, page_size: i64) -> Pager {
        Pager::new(page, page_size, self.config.default_page_size)
    }

    pub fn build_page_data(&self, total: u64, pager: &Pager) -> PageData {
        PageData::new(total, pager)
    }

    pub fn compute_dive_metrics(&self, dive: &Dive) -> DiveMetrics {
        DiveMetrics::compute(dive)
    }

    /// Every field rule plus existence of every referenced id. An empty result
    /// means the form is valid; collaborator failures are returned as errors.
    pub fn validate_dive(
        &self,
        ctx: &RequestContext,
        form: &DiveForm,
    ) -> Result<ValidationErrors, EngineError> {
        let reference_ctx = self.reference_context(ctx);
        let gas_mix = match self.reference.gas_mixes.get_one_by_id(&reference_ctx, form.gas_mix_id) {
            Ok(gas) => Some(gas),
            Err(EngineError::NotFound) => None,
            Err(e) => return Err(e),
        };

        let mut errors = form.validate(gas_mix.as_ref().map(|g| g.name()));
        if !form.date_time_in.trim().is_empty() && parse_wall_clock(&form.date_time_in).is_none() {
            errors.add_field_error("date_time_in", INVALID_DATE_TIME_MESSAGE);
        }
        errors.extend(check_dive_references(
            ctx,
            &reference_ctx,
            form,
            &self.reference,
            self.storage.as_ref(),
        )?);

        debug!(
            fields = errors.field_errors().len(),
            "validated dive form"
        );
        Ok(errors)
    }

    pub fn adjust_to_site_local_then_utc(
        &self,
        ctx: &RequestContext,
        wall_clock: NaiveDateTime,
        site: DiveSiteId,
    ) -> Result<DateTime<Utc>, EngineError> {
        self.timezones.to_utc(ctx, wall_clock, site)
    }

    pub fn get_dive_stats(&self, ctx: &RequestContext, owner: UserId) -> Result<DiveStats, EngineError> {
        self.stats.dive_stats(ctx, owner)
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    fn view(dive: Dive) -> Result<DiveView, EngineError> {
        Ok(DiveView {
            local_date_time_in: to_site_local(dive.date_time_in, &dive.dive_site)?,
            metrics: DiveMetrics::compute(&dive),
            dive,
        })
    }

    pub fn list_dives(
        &self,
        ctx: &RequestContext,
        owner: UserId,
        pager: &Pager,
        filter: &DiveFilter,
        sort: &SortSpec<DiveSort>,
    ) -> Result<DivePage, EngineError> {
        let operation = "fetch dives";
        ctx.check(operation)?;
        let (dives, total) = self
            .storage
            .fetch_dives_for_owner(ctx, owner, pager, filter, sort)
            .map_err(|e| e.during(operation))?;

        let dives = dives
            .into_iter()
            .map(Self::view)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(owner = owner.0, total, returned = dives.len(), "listed dives");
        Ok(DivePage {
            dives,
            page: PageData::new(total, pager),
        })
    }

    pub fn get_dive(&self, ctx: &RequestContext, owner: UserId, id: DiveId) -> Result<DiveView, EngineError> {
        let dive = self
            .storage
            .fetch_dive(ctx, owner, id)
            .map_err(|e| e.during("fetch dive"))?;
        Self::view(dive)
    }

    /// Validate the form and resolve its wall clock to UTC.
    fn prepare(&self, ctx: &RequestContext, form: &DiveForm) -> Result<DateTime<Utc>, EngineError> {
        self.validate_dive(ctx, form)?.into_result()?;
        let wall = parse_wall_clock(&form.date_time_in).ok_or_else(|| {
            let mut errors = ValidationErrors::default();
            errors.add_field_error("date_time_in", INVALID_DATE_TIME_MESSAGE);
            EngineError::Validation(errors)
        })?;
        self.adjust_to_site_local_then_utc(ctx, wall, DiveSiteId(form.dive_site_id))
    }

    /// Insert a new dive for `owner`, returning its id.
    pub fn insert_dive(
        &self,
        ctx: &RequestContext,
        owner: UserId,
        form: DiveForm,
    ) -> Result<DiveId, EngineError> {
        let date_time_in = self.prepare(ctx, &form)?;
        let record = form.into_record(owner, date_time_in);
        let (id, _) = self
            .storage
            .insert_dive(ctx, &record)
            .map_err(|e| e.during("insert dive"))?;
        info!(owner = owner.0, dive_id = id.0, number = record.number, "dive logged");
        Ok(id)
    }

    /// Update a dive the caller last saw at `version`. Returns the new version.
    pub fn update_dive(
        &self,
        ctx: &RequestContext,
        owner: UserId,
        id: DiveId,
        version: i32,
        form: DiveForm,
    ) -> Result<i32, EngineError> {
        let date_time_in = self.prepare(ctx, &form)?;
        let record = form.into_record(owner, date_time_in);
        let rows = self
            .storage
            .update_dive(ctx, id, version, &record)
            .map_err(|e| e.during("update dive"))?;
        if rows > 0 {
            info!(owner = owner.0, dive_id = id.0, version = version + 1, "dive updated");
            return Ok(version + 1);
        }

        match self.storage.fetch_dive(ctx, owner, id) {
            Ok(current) => {
                warn!(
                    owner = owner.0,
                    dive_id = id.0,
                    expected = version,
                    actual = current.version,
                    "dive update conflict"
                );
                Err(EngineError::UpdateConflict {
                    entity: "dive",
                    id: id.0,
                })
            }
            Err(SourceError::NotFound) => Err(EngineError::NotFound),
            Err(e) => Err(e.during("fetch dive")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DependencyError;
    use crate::memory::fixtures::{seeded_store, OTHER_OWNER, OWNER};
    use crate::memory::MemoryStore;
    use crate::validation::forms::fixtures::dive_form;
    use crate::validation::INVALID_SELECTION_MESSAGE;
    use chrono::{TimeZone, Timelike};
    use std::time::Duration;

    fn engine() -> DiveEngine {
        let store = Arc::new(seeded_store());
        DiveEngine::new(EngineConfig::default(), store.clone(), store)
    }

    fn new_form(number: i32) -> DiveForm {
        DiveForm {
            number,
            dive_site_id: 2,
            date_time_in: "2024-05-12T09:00".to_string(),
            ..dive_form()
        }
    }

    #[test]
    fn test_validate_dive_collects_field_and_reference_errors() {
        let engine = engine();
        let ctx = engine.request_context();
        let form = DiveForm {
            date_time_in: "yesterday".to_string(),
            gas_mix_id: 42,
            fo2: 1.5,
            ..dive_form()
        };

        let errors = engine.validate_dive(&ctx, &form).unwrap();
        assert_eq!(
            errors.message_for("date_time_in"),
            Some(INVALID_DATE_TIME_MESSAGE)
        );
        assert_eq!(errors.message_for("gas_mix_id"), Some(INVALID_SELECTION_MESSAGE));
        assert_eq!(
            errors.message_for("fo2"),
            Some("This field must be between 0.04 and 1 inclusive")
        );
    }

    #[test]
    fn test_validate_dive_uses_gas_category() {
        let engine = engine();
        let ctx = engine.request_context();
        let nitrox = DiveForm {
            gas_mix_id: 2,
            fo2: 0.32,
            ..dive_form()
        };
        assert!(engine.validate_dive(&ctx, &nitrox).unwrap().is_empty());

        let air = DiveForm {
            gas_mix_id: 1,
            ..nitrox
        };
        let errors = engine.validate_dive(&ctx, &air).unwrap();
        assert_eq!(
            errors.message_for("fo2"),
            Some("Air must have an FO2 of exactly 0.21")
        );
    }

    #[test]
    fn test_insert_adjusts_to_site_zone() {
        let engine = engine();
        let ctx = engine.request_context();
        let id = engine.insert_dive(&ctx, OWNER, new_form(6)).unwrap();

        let view = engine.get_dive(&ctx, OWNER, id).unwrap();
        assert_eq!(
            view.dive.date_time_in,
            Utc.with_ymd_and_hms(2024, 5, 12, 1, 0, 0).unwrap()
        );
        assert_eq!(view.local_date_time_in.hour(), 9);
        assert!(view.metrics.gas_used > 0.0);
    }

    #[test]
    fn test_insert_rejects_duplicate_and_invalid() {
        let engine = engine();
        let ctx = engine.request_context();
        assert_eq!(
            engine.insert_dive(&ctx, OWNER, new_form(3)),
            Err(EngineError::DuplicateKey { field: "number" })
        );

        let invalid = DiveForm {
            max_depth: 2.0,
            ..new_form(7)
        };
        assert!(matches!(
            engine.insert_dive(&ctx, OWNER, invalid),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_update_conflict_vs_not_found() {
        let engine = engine();
        let ctx = engine.request_context();

        assert_eq!(engine.update_dive(&ctx, OWNER, DiveId(1), 1, new_form(1)), Ok(2));
        assert_eq!(
            engine.update_dive(&ctx, OWNER, DiveId(1), 1, new_form(1)),
            Err(EngineError::UpdateConflict { entity: "dive", id: 1 })
        );
        assert_eq!(
            engine.update_dive(&ctx, OWNER, DiveId(99), 1, new_form(1)),
            Err(EngineError::NotFound)
        );
        // Another owner's dive is not visible.
        assert_eq!(
            engine.update_dive(&ctx, OTHER_OWNER, DiveId(1), 2, new_form(1)),
            Err(EngineError::NotFound)
        );
    }

    #[test]
    fn test_list_dives_with_page_data() {
        let engine = engine();
        let ctx = engine.request_context();
        let pager = engine.new_pager(2, 2);
        let page = engine
            .list_dives(
                &ctx,
                OWNER,
                &pager,
                &DiveFilter::default(),
                &SortSpec::parse("date").unwrap(),
            )
            .unwrap();

        assert_eq!(page.page.total_records, 5);
        assert_eq!(page.page.last_page, 3);
        assert_eq!(page.page.current_page, 2);
        let numbers: Vec<i32> = page.dives.iter().map(|v| v.dive.number).collect();
        assert_eq!(numbers, [3, 4]);
        // Manta Point is UTC+8.
        assert_eq!(page.dives[0].local_date_time_in.hour(), 9);
    }

    #[test]
    fn test_get_dive_stats() {
        let engine = engine();
        let stats = engine.get_dive_stats(&engine.request_context(), OWNER).unwrap();
        assert_eq!(stats.general.dives, 5);
        assert_eq!(stats.by_country.len(), 2);
        assert_eq!(stats.by_country[0].dimension.name, "Malta");
        assert_eq!(stats.by_buddy[0].dimension.name, "Sam Reyes");
        assert_eq!(stats.by_buddy[0].stats.dives, 2);

        let empty = Arc::new(MemoryStore::new());
        let engine = DiveEngine::new(EngineConfig::default(), empty.clone(), empty);
        assert_eq!(
            engine.get_dive_stats(&engine.request_context(), OWNER),
            Err(EngineError::NoData)
        );
    }

    #[test]
    fn test_cancelled_request() {
        let engine = engine();
        let token = CancellationToken::new();
        let ctx = engine.request_context_with_cancel(token.clone());
        token.cancel();

        assert_eq!(engine.get_dive_stats(&ctx, OWNER), Err(EngineError::Cancelled));
        assert_eq!(
            engine.list_dives(
                &ctx,
                OWNER,
                &engine.new_pager(1, 10),
                &DiveFilter::default(),
                &SortSpec::default()
            ),
            Err(EngineError::Cancelled)
        );
    }

    #[test]
    fn test_adjust_unknown_site() {
        let engine = engine();
        let ctx = engine.request_context();
        let wall = parse_wall_clock("2024-05-10T09:00").unwrap();
        let err = engine
            .adjust_to_site_local_then_utc(&ctx, wall, DiveSiteId(77))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Dependency(DependencyError::TimeZone { site_id: 77, .. })
        ));

        let expired = RequestContext::with_timeout(Duration::ZERO);
        assert!(engine
            .adjust_to_site_local_then_utc(&expired, wall, DiveSiteId(2))
            .unwrap_err()
            .is_retryable());
    }

    #[test]
    fn test_reference_loads_get_their_own_deadline() {
        let engine = engine();
        let ctx = engine.request_context();
        let reference_ctx = engine.reference_context(&ctx);
        assert!(reference_ctx.remaining() > Duration::from_millis(1500));
        assert!(reference_ctx.deadline() > ctx.deadline());

        ctx.cancel();
        assert!(reference_ctx.is_cancelled());
    }

    #[test]
    fn test_pager_uses_configured_default() {
        let engine = engine();
        let pager = engine.new_pager(0, 500);
        assert_eq!(pager.limit(), 20);
        assert_eq!(pager.offset(), 0);
        assert_eq!(engine.build_page_data(0, &pager), PageData::default());
    }
}
