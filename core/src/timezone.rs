//! Conversion between a dive site's wall clock and UTC.
//!
//! Dive times are entered as the local time at the site and stored in UTC.
//! On write the wall clock is interpreted in the site's IANA zone; on read the
//! stored instant is projected back into that zone.

use std::sync::Arc;

use chrono::{
    DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone, Utc,
};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::{DependencyError, EngineError, SourceError};
use crate::models::{DiveSite, DiveSiteId};
use crate::storage::Storage;

/// Accepted date-time layouts, tried in order.
const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Longest clock change searched back over when resolving a skipped local time.
const MAX_GAP_HOURS: i64 = 26;

/// Parse a form date-time with no zone attached. A bare date means midnight.
pub fn parse_wall_clock(input: &str) -> Option<NaiveDateTime> {
    let input = input.trim();
    DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(input, DATE_FORMAT)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

pub fn parse_zone(name: &str) -> Result<Tz, String> {
    name.parse::<Tz>().map_err(|e| e.to_string())
}

/// Interpret `wall` as local time in `tz`.
///
/// A time that occurs twice (clocks going back) resolves to the earlier
/// instant. A time skipped by clocks going forward is read with the offset in
/// force before the change, which lands it the length of the gap later.
pub fn local_to_utc(wall: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&wall) {
        LocalResult::Single(local) => Some(local.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            let offset = (1..=MAX_GAP_HOURS).find_map(|hours| {
                tz.offset_from_local_datetime(&(wall - TimeDelta::hours(hours)))
                    .earliest()
            })?;
            let utc = wall - TimeDelta::seconds(i64::from(offset.fix().local_minus_utc()));
            Some(Utc.from_utc_datetime(&utc))
        }
    }
}

pub fn utc_to_local(instant: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    instant.with_timezone(&tz)
}

fn zone_error(site_id: i64, zone: &str, reason: impl Into<String>) -> EngineError {
    let reason = reason.into();
    warn!(site_id, zone, %reason, "failed to resolve dive site time zone");
    DependencyError::TimeZone {
        site_id,
        zone: zone.to_string(),
        reason,
    }
    .into()
}

/// Site zone of an already-loaded dive site.
pub fn site_zone(site: &DiveSite) -> Result<Tz, EngineError> {
    parse_zone(&site.timezone).map_err(|reason| zone_error(site.id.0, &site.timezone, reason))
}

/// Project a stored instant into the zone of `site`.
pub fn to_site_local(instant: DateTime<Utc>, site: &DiveSite) -> Result<DateTime<Tz>, EngineError> {
    Ok(utc_to_local(instant, site_zone(site)?))
}

/// Resolves site zones through storage and converts wall clocks to UTC.
pub struct TimezoneAdjuster {
    storage: Arc<dyn Storage>,
}

impl TimezoneAdjuster {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn zone_for_site(&self, ctx: &RequestContext, site: DiveSiteId) -> Result<Tz, EngineError> {
        let name = match self.storage.fetch_dive_site_timezone(ctx, site) {
            Ok(name) => name,
            Err(SourceError::NotFound) => {
                return Err(zone_error(site.0, "", "dive site not found"));
            }
            Err(e) => return Err(e.during("fetch dive site time zone")),
        };
        parse_zone(&name).map_err(|reason| zone_error(site.0, &name, reason))
    }

    /// Reinterpret `wall` as local to the site and convert it to UTC.
    pub fn to_utc(
        &self,
        ctx: &RequestContext,
        wall: NaiveDateTime,
        site: DiveSiteId,
    ) -> Result<DateTime<Utc>, EngineError> {
        let tz = self.zone_for_site(ctx, site)?;
        let utc = local_to_utc(wall, tz).ok_or_else(|| {
            zone_error(site.0, tz.name(), format!("local time {wall} cannot be resolved"))
        })?;
        debug!(site_id = site.0, zone = tz.name(), %wall, %utc, "adjusted dive time to UTC");
        Ok(utc)
    }

    pub fn to_local(
        &self,
        ctx: &RequestContext,
        instant: DateTime<Utc>,
        site: DiveSiteId,
    ) -> Result<DateTime<Tz>, EngineError> {
        Ok(utc_to_local(instant, self.zone_for_site(ctx, site)?))
    }
}
