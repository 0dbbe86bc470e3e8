//! Metrics derived from a logged dive.
//!
//! Pure functions over a fully-populated [`Dive`]. Nothing here touches
//! storage, and a value that cannot be computed from the inputs is reported
//! as `0.0` rather than as an error.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::Dive;

/// Sites at or above this altitude (m) always count as altitude dives.
pub const ALTITUDE_THRESHOLD_M: i32 = 300;
/// Lower bound (m) of the band where depth decides altitude classification.
pub const MODERATE_ALTITUDE_M: i32 = 91;
/// Depth (m) from which a dive in the moderate band counts as an altitude dive.
pub const MODERATE_ALTITUDE_DEPTH_M: f64 = 44.0;
/// Dives deeper than this (m) are deep dives.
pub const DEEP_DIVE_M: f64 = 30.0;

/// Number of cylinders implied by a tank configuration name, or `None` when
/// the configuration is not one gas consumption can be computed for.
pub fn tank_factor(configuration: &str) -> Option<f64> {
    match configuration.trim().to_ascii_lowercase().as_str() {
        "single" | "single tank" => Some(1.0),
        "sidemount" | "twinset" => Some(2.0),
        _ => None,
    }
}

pub fn date_time_out(dive: &Dive) -> DateTime<Utc> {
    chrono::Duration::from_std(dive.bottom_time)
        .ok()
        .and_then(|d| dive.date_time_in.checked_add_signed(d))
        .unwrap_or(dive.date_time_in)
}

/// Cylinder pressure drop in bar, or 0 unless both readings are present.
pub fn pressure_delta(dive: &Dive) -> i32 {
    match (dive.pressure_in, dive.pressure_out) {
        (Some(p_in), Some(p_out)) => p_in - p_out,
        _ => 0,
    }
}

/// Gas used in surface litres.
pub fn gas_used(dive: &Dive) -> f64 {
    gas_used_for(
        dive.tank_configuration.name(),
        dive.tank_volume,
        pressure_delta(dive),
    )
}

fn gas_used_for(configuration: &str, tank_volume: f64, delta: i32) -> f64 {
    if delta == 0 {
        return 0.0;
    }
    match tank_factor(configuration) {
        Some(factor) => factor * tank_volume * f64::from(delta),
        None => 0.0,
    }
}

/// Surface air consumption in litres per minute.
pub fn sac_rate(dive: &Dive) -> f64 {
    sac_rate_for(gas_used(dive), dive.avg_depth, dive.bottom_time.as_secs_f64() / 60.0)
}

fn sac_rate_for(gas: f64, avg_depth: Option<f64>, minutes: f64) -> f64 {
    let Some(avg_depth) = avg_depth else {
        return 0.0;
    };
    if gas == 0.0 || minutes <= 0.0 {
        return 0.0;
    }
    let litres_per_minute = gas / minutes;
    let ambient_ata = avg_depth / 10.0 + 1.0;
    litres_per_minute / ambient_ata
}

pub fn is_altitude_dive(dive: &Dive) -> bool {
    is_altitude(dive.dive_site.altitude, dive.max_depth)
}

fn is_altitude(altitude: i32, max_depth: f64) -> bool {
    altitude >= ALTITUDE_THRESHOLD_M
        || ((MODERATE_ALTITUDE_M..ALTITUDE_THRESHOLD_M).contains(&altitude)
            && max_depth >= MODERATE_ALTITUDE_DEPTH_M)
}

pub fn is_deep_dive(dive: &Dive) -> bool {
    dive.max_depth > DEEP_DIVE_M
}

pub fn is_training_dive(dive: &Dive) -> bool {
    dive.certification.is_some()
}

/// Derived values shown alongside a dive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, uniffi::Record)]
pub struct DiveMetrics {
    pub gas_used: f64,
    pub sac_rate: f64,
    pub is_altitude_dive: bool,
    pub is_deep_dive: bool,
    pub is_training_dive: bool,
}

impl DiveMetrics {
    pub fn compute(dive: &Dive) -> Self {
        Self {
            gas_used: gas_used(dive),
            sac_rate: sac_rate(dive),
            is_altitude_dive: is_altitude_dive(dive),
            is_deep_dive: is_deep_dive(dive),
            is_training_dive: is_training_dive(dive),
        }
    }
}

/// The plain values the calculators read, for callers that do not hold a
/// hydrated [`Dive`].
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct MetricInputs {
    pub tank_configuration: String,
    pub tank_volume: f64,
    pub pressure_in: Option<i32>,
    pub pressure_out: Option<i32>,
    pub max_depth: f64,
    pub avg_depth: Option<f64>,
    pub bottom_time_min: f64,
    pub site_altitude: i32,
    pub has_certification: bool,
}

impl From<&Dive> for MetricInputs {
    fn from(dive: &Dive) -> Self {
        Self {
            tank_configuration: dive.tank_configuration.name().to_string(),
            tank_volume: dive.tank_volume,
            pressure_in: dive.pressure_in,
            pressure_out: dive.pressure_out,
            max_depth: dive.max_depth,
            avg_depth: dive.avg_depth,
            bottom_time_min: dive.bottom_time.as_secs_f64() / 60.0,
            site_altitude: dive.dive_site.altitude,
            has_certification: dive.certification.is_some(),
        }
    }
}

impl MetricInputs {
    pub fn compute(&self) -> DiveMetrics {
        let delta = match (self.pressure_in, self.pressure_out) {
            (Some(p_in), Some(p_out)) => p_in - p_out,
            _ => 0,
        };
        let gas_used = gas_used_for(&self.tank_configuration, self.tank_volume, delta);
        DiveMetrics {
            gas_used,
            sac_rate: sac_rate_for(gas_used, self.avg_depth, self.bottom_time_min),
            is_altitude_dive: is_altitude(self.site_altitude, self.max_depth),
            is_deep_dive: self.max_depth > DEEP_DIVE_M,
            is_training_dive: self.has_certification,
        }
    }
}

/// Time on the surface between the end of `previous` and the start of
/// `current`. Overlapping logs have no meaningful interval.
pub fn surface_interval(previous: &Dive, current: &Dive) -> Option<Duration> {
    (current.date_time_in - date_time_out(previous)).to_std().ok()
}

/// Fill in `surface_interval` for one owner's dives. Order of `dives` does not
/// matter; each dive is paired with the owner's latest earlier dive.
pub fn assign_surface_intervals(dives: &mut [Dive]) {
    let mut order: Vec<usize> = (0..dives.len()).collect();
    order.sort_by(|&a, &b| {
        dives[a]
            .date_time_in
            .cmp(&dives[b].date_time_in)
            .then(dives[a].id.cmp(&dives[b].id))
    });

    let mut previous: Option<usize> = None;
    for idx in order {
        let interval = previous.and_then(|p| surface_interval(&dives[p], &dives[idx]));
        dives[idx].surface_interval = interval;
        previous = Some(idx);
    }
}
