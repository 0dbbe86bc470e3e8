//! Field rules for each editable entity.
//!
//! One ruleset per entity, all written against the same [`Validator`] and
//! the bound tables below.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use super::gas::check_gas_mix;
use super::{Bounds, ValidationErrors, Validator};
use crate::models::UserId;
use crate::storage::DiveRecord;

pub const DEPTH_M: Bounds<f64> = Bounds::new(4.0, 350.0);
pub const ALTITUDE_M: Bounds<i32> = Bounds::new(-422, 7000);
pub const LATITUDE: Bounds<f64> = Bounds::new(-90.0, 90.0);
pub const LONGITUDE: Bounds<f64> = Bounds::new(-180.0, 180.0);
pub const BOTTOM_TIME_MIN: Bounds<i32> = Bounds::new(10, 1440);
pub const SAFETY_STOP_MIN: Bounds<i32> = Bounds::new(0, 6);
pub const WATER_TEMP_C: Bounds<i32> = Bounds::new(-3, 50);
pub const AIR_TEMP_C: Bounds<i32> = Bounds::new(-90, 60);
pub const VISIBILITY_M: Bounds<f64> = Bounds::new(0.0, 80.0);
pub const WEIGHT_KG: Bounds<f64> = Bounds::new(0.0, 99.99);
pub const TANK_VOLUME_L: Bounds<f64> = Bounds::new(2.0, 22.0);
pub const PRESSURE_BAR: Bounds<i32> = Bounds::new(0, 1000);
pub const RATING: Bounds<i32> = Bounds::new(0, 10);
pub const PRICE: Bounds<f64> = Bounds::new(0.0, 9_999_999_999.99);

const SHORT_TEXT: usize = 256;
const LONG_TEXT: usize = 65_536;

/// A price and its currency are given together or not at all.
fn check_price(v: &mut Validator, price: Option<f64>, currency_id: Option<i64>) {
    v.opt_in_bounds(price, PRICE, "price");
    match (price, currency_id.filter(|id| *id > 0)) {
        (Some(_), None) => {
            v.check_field(false, "currency_id", "A currency must be selected when a price is given")
        }
        (None, Some(_)) => {
            v.check_field(false, "price", "A price must be given when a currency is selected")
        }
        _ => {}
    }
}

fn check_date_range(v: &mut Validator, start: NaiveDate, end: NaiveDate) {
    v.check_field(
        end >= start,
        "end_date",
        "This field cannot be before the start date",
    );
}

/// A dive as submitted by the owner. Associations are ids, `0` or `None`
/// meaning "not set"; `date_time_in` is the site-local wall clock as typed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiveForm {
    pub number: i32,
    pub activity: String,
    pub dive_site_id: i64,
    pub operator_id: Option<i64>,
    pub price: Option<f64>,
    pub currency_id: Option<i64>,
    pub trip_id: Option<i64>,
    pub certification_id: Option<i64>,
    pub date_time_in: String,
    pub max_depth: f64,
    pub avg_depth: Option<f64>,
    pub bottom_time_min: i32,
    pub safety_stop_min: Option<i32>,
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

impl DiveForm {
    /// Field rules. `gas_mix` is the name of the selected gas mix when it
    /// resolved, which enables the category-specific FO2 check.
    pub fn validate(&self, gas_mix: Option<&str>) -> ValidationErrors {
        let mut v = Validator::new();

        v.check_field(self.number > 0, "number", "This field must be a positive number");
        v.max_chars(&self.activity, SHORT_TEXT, "activity");
        v.selected(self.dive_site_id, "dive_site_id");
        v.not_blank(&self.date_time_in, "date_time_in");

        v.in_bounds(self.max_depth, DEPTH_M, "max_depth");
        v.opt_in_bounds(self.avg_depth, DEPTH_M, "avg_depth");
        if let Some(avg) = self.avg_depth {
            v.check_field(
                self.max_depth > avg,
                "max_depth",
                "Max depth must be greater than average depth",
            );
        }

        v.in_bounds(self.bottom_time_min, BOTTOM_TIME_MIN, "bottom_time");
        v.opt_in_bounds(self.safety_stop_min, SAFETY_STOP_MIN, "safety_stop");
        v.opt_in_bounds(self.water_temp, WATER_TEMP_C, "water_temp");
        v.opt_in_bounds(self.air_temp, AIR_TEMP_C, "air_temp");
        v.opt_in_bounds(self.visibility, VISIBILITY_M, "visibility");
        v.opt_in_bounds(self.weight, WEIGHT_KG, "weight");
        v.max_chars(&self.weight_notes, SHORT_TEXT, "weight_notes");
        v.max_chars(&self.equipment_notes, LONG_TEXT, "equipment_notes");

        v.selected(self.tank_configuration_id, "tank_configuration_id");
        v.selected(self.tank_material_id, "tank_material_id");
        v.in_bounds(self.tank_volume, TANK_VOLUME_L, "tank_volume");
        v.selected(self.gas_mix_id, "gas_mix_id");
        check_gas_mix(&mut v, gas_mix.unwrap_or_default(), self.fo2);

        v.opt_in_bounds(self.pressure_in, PRESSURE_BAR, "pressure_in");
        v.opt_in_bounds(self.pressure_out, PRESSURE_BAR, "pressure_out");
        if let (Some(p_in), Some(p_out)) = (self.pressure_in, self.pressure_out) {
            v.check_field(
                p_in > p_out,
                "pressure_in",
                "Pressure in must be greater than pressure out",
            );
        }
        v.max_chars(&self.gas_mix_notes, LONG_TEXT, "gas_mix_notes");

        v.selected(self.entry_point_id, "entry_point_id");
        v.opt_in_bounds(self.rating, RATING, "rating");
        check_price(&mut v, self.price, self.currency_id);
        v.max_chars(&self.notes, LONG_TEXT, "notes");

        v.finish()
    }

    /// The write shape, once the wall clock has been resolved to UTC.
    pub fn into_record(self, owner_id: UserId, date_time_in: DateTime<Utc>) -> DiveRecord {
        let minutes = |m: i32| Duration::from_secs(u64::from(m.max(0).unsigned_abs()) * 60);
        let set = |id: Option<i64>| id.filter(|id| *id > 0);

        DiveRecord {
            owner_id,
            number: self.number,
            activity: self.activity,
            dive_site_id: self.dive_site_id,
            operator_id: set(self.operator_id),
            price: self.price,
            currency_id: set(self.currency_id),
            trip_id: set(self.trip_id),
            certification_id: set(self.certification_id),
            date_time_in,
            max_depth: self.max_depth,
            avg_depth: self.avg_depth,
            bottom_time: minutes(self.bottom_time_min),
            safety_stop: self.safety_stop_min.map(minutes),
            water_temp: self.water_temp,
            air_temp: self.air_temp,
            visibility: self.visibility,
            current_id: set(self.current_id),
            waves_id: set(self.waves_id),
            buddy_id: set(self.buddy_id),
            buddy_role_id: set(self.buddy_role_id),
            weight: self.weight,
            weight_notes: self.weight_notes,
            equipment_ids: self.equipment_ids,
            equipment_notes: self.equipment_notes,
            tank_configuration_id: self.tank_configuration_id,
            tank_material_id: self.tank_material_id,
            tank_volume: self.tank_volume,
            gas_mix_id: self.gas_mix_id,
            fo2: self.fo2,
            pressure_in: self.pressure_in,
            pressure_out: self.pressure_out,
            gas_mix_notes: self.gas_mix_notes,
            entry_point_id: self.entry_point_id,
            property_ids: self.property_ids,
            rating: self.rating,
            notes: self.notes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiveSiteForm {
    pub name: String,
    pub alt_name: String,
    pub location: String,
    pub region: String,
    pub country_id: i64,
    pub timezone: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub water_body_id: Option<i64>,
    pub water_type_id: Option<i64>,
    pub altitude: i32,
    pub max_depth: Option<f64>,
    pub notes: String,
    pub rating: Option<i32>,
}

impl DiveSiteForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut v = Validator::new();

        v.not_blank(&self.name, "name");
        v.max_chars(&self.name, SHORT_TEXT, "name");
        v.max_chars(&self.alt_name, SHORT_TEXT, "alt_name");
        v.not_blank(&self.location, "location");
        v.max_chars(&self.location, SHORT_TEXT, "location");
        v.max_chars(&self.region, SHORT_TEXT, "region");
        v.selected(self.country_id, "country_id");
        v.check_field(
            self.timezone.parse::<Tz>().is_ok(),
            "timezone",
            "This field must be a valid time zone",
        );
        v.opt_in_bounds(self.latitude, LATITUDE, "latitude");
        v.opt_in_bounds(self.longitude, LONGITUDE, "longitude");
        v.in_bounds(self.altitude, ALTITUDE_M, "altitude");
        v.opt_in_bounds(self.max_depth, DEPTH_M, "max_depth");
        v.max_chars(&self.notes, LONG_TEXT, "notes");
        v.opt_in_bounds(self.rating, RATING, "rating");

        v.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TripForm {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub description: String,
    pub rating: Option<i32>,
    pub operator_id: Option<i64>,
    pub price: Option<f64>,
    pub currency_id: Option<i64>,
    pub notes: String,
}

impl TripForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut v = Validator::new();

        v.not_blank(&self.name, "name");
        v.max_chars(&self.name, SHORT_TEXT, "name");
        check_date_range(&mut v, self.start_date, self.end_date);
        v.max_chars(&self.description, LONG_TEXT, "description");
        v.opt_in_bounds(self.rating, RATING, "rating");
        check_price(&mut v, self.price, self.currency_id);
        v.max_chars(&self.notes, LONG_TEXT, "notes");

        v.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CertificationForm {
    pub course_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub operator_id: Option<i64>,
    pub instructor_id: Option<i64>,
    pub price: Option<f64>,
    pub currency_id: Option<i64>,
    pub rating: Option<i32>,
    pub notes: String,
}

impl CertificationForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut v = Validator::new();

        v.selected(self.course_id, "course_id");
        check_date_range(&mut v, self.start_date, self.end_date);
        v.opt_in_bounds(self.rating, RATING, "rating");
        check_price(&mut v, self.price, self.currency_id);
        v.max_chars(&self.notes, LONG_TEXT, "notes");

        v.finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperatorForm {
    pub operator_type_id: i64,
    pub name: String,
    pub street: String,
    pub suburb: String,
    pub state: String,
    pub postcode: String,
    pub country_id: i64,
    pub website_url: String,
    pub email_address: String,
    pub phone_number: String,
    pub comments: String,
}

impl OperatorForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut v = Validator::new();

        v.not_blank(&self.name, "name");
        v.max_chars(&self.name, SHORT_TEXT, "name");
        v.selected(self.operator_type_id, "operator_type_id");
        v.max_chars(&self.street, SHORT_TEXT, "street");
        v.max_chars(&self.suburb, SHORT_TEXT, "suburb");
        v.max_chars(&self.state, SHORT_TEXT, "state");
        v.max_chars(&self.postcode, 16, "postcode");
        v.selected(self.country_id, "country_id");
        v.http_url(&self.website_url, "website_url");
        v.max_chars(&self.website_url, 2048, "website_url");
        v.max_chars(&self.email_address, 254, "email_address");
        v.email(&self.email_address, "email_address");
        v.max_chars(&self.phone_number, 32, "phone_number");
        v.max_chars(&self.comments, 4096, "comments");

        v.finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuddyForm {
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub agency_id: Option<i64>,
    pub agency_member_num: String,
    pub notes: String,
}

impl BuddyForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut v = Validator::new();

        v.not_blank(&self.name, "name");
        v.max_chars(&self.name, SHORT_TEXT, "name");
        v.max_chars(&self.email, 254, "email");
        v.email(&self.email, "email");
        v.max_chars(&self.phone_number, 32, "phone_number");
        v.max_chars(&self.agency_member_num, 64, "agency_member_num");
        v.check_field(
            self.agency_member_num.is_empty() || self.agency_id.is_some_and(|id| id > 0),
            "agency_id",
            "An agency must be selected when a member number is given",
        );
        v.max_chars(&self.notes, LONG_TEXT, "notes");

        v.finish()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn dive_form() -> DiveForm {
        DiveForm {
            number: 1,
            activity: "Fun dive".to_string(),
            dive_site_id: 1,
            date_time_in: "2024-05-10T09:00".to_string(),
            max_depth: 18.0,
            avg_depth: Some(12.0),
            bottom_time_min: 45,
            safety_stop_min: Some(3),
            water_temp: Some(26),
            air_temp: Some(30),
            visibility: Some(20.0),
            weight: Some(4.0),
            tank_configuration_id: 1,
            tank_material_id: 1,
            tank_volume: 11.1,
            gas_mix_id: 1,
            fo2: 0.21,
            pressure_in: Some(200),
            pressure_out: Some(60),
            entry_point_id: 1,
            rating: Some(8),
            ..DiveForm::default()
        }
    }
}
