use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::reference::{
    Agency, BuddyRole, Current, DiveProperty, EntryPoint, Equipment, GasMix, TankConfiguration,
    TankMaterial, Waves,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct UserId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DiveId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DiveSiteId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BuddyId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TripId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OperatorId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CertificationId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CountryId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CurrencyId(pub i64);

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Currency {
    pub id: CurrencyId,
    pub iso_alpha: String,
    pub iso_number: i32,
    pub name: String,
    pub exponent: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Country {
    pub id: CountryId,
    pub name: String,
    pub iso_number: i32,
    pub iso2_code: String,
    pub iso3_code: String,
    pub dialing_code: String,
    pub capital: String,
    pub continent: String,
    pub currency: Currency,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WaterBody {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WaterType {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub density: f64,
}

/// Dive history of one entity (site or buddy), scoped to the requesting owner.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DiveHistory {
    pub dives: u32,
    pub first_dive: Option<DateTime<Utc>>,
    pub last_dive: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiveSite {
    pub id: DiveSiteId,
    pub version: i32,
    pub owner_id: UserId,
    pub name: String,
    pub alt_name: String,
    pub location: String,
    pub region: String,
    pub country: Country,
    /// IANA zone identifier, e.g. `Asia/Makassar`.
    pub timezone: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub water_body: Option<WaterBody>,
    pub water_type: Option<WaterType>,
    /// Metres above sea level.
    pub altitude: i32,
    pub max_depth: Option<f64>,
    pub notes: String,
    pub rating: Option<i32>,
    /// Derived from the owner's dives, never stored.
    pub history: DiveHistory,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Price {
    pub amount: f64,
    pub currency: Currency,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OperatorType {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Operator {
    pub id: OperatorId,
    pub owner_id: UserId,
    pub operator_type: OperatorType,
    pub name: String,
    pub street: String,
    pub suburb: String,
    pub state: String,
    pub postcode: String,
    pub country: Country,
    pub website_url: String,
    pub email_address: String,
    pub phone_number: String,
    pub comments: String,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.suburb.is_empty() {
            write!(f, "{}, {}", self.name, self.country.iso2_code)
        } else {
            write!(
                f,
                "{}, {}, {}",
                self.name, self.suburb, self.country.iso2_code
            )
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Trip {
    pub id: TripId,
    pub owner_id: UserId,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub description: String,
    pub rating: Option<i32>,
    pub operator: Option<Operator>,
    pub price: Option<Price>,
    pub notes: String,
}

impl Trip {
    pub fn duration(&self) -> chrono::TimeDelta {
        self.end_date - self.start_date
    }
}

impl fmt::Display for Trip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} to {})", self.name, self.start_date, self.end_date)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgencyCourse {
    pub id: i64,
    pub agency: Agency,
    pub name: String,
    pub url: String,
    pub is_specialty_course: bool,
    pub is_tech_course: bool,
    pub is_pro_course: bool,
}

impl fmt::Display for AgencyCourse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.agency.name(), self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Certification {
    pub id: CertificationId,
    pub owner_id: UserId,
    pub course: AgencyCourse,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub operator: Option<Operator>,
    pub instructor: Option<Buddy>,
    pub price: Option<Price>,
    pub rating: Option<i32>,
    pub notes: String,
}

impl Certification {
    pub fn duration(&self) -> chrono::TimeDelta {
        self.end_date - self.start_date
    }
}

impl fmt::Display for Certification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} to {})",
            self.course.name, self.start_date, self.end_date
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Buddy {
    pub id: BuddyId,
    pub version: i32,
    pub owner_id: UserId,
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub agency: Option<Agency>,
    pub agency_member_num: String,
    /// Dives logged with this buddy by the owner.
    pub history: DiveHistory,
    pub notes: String,
}

impl fmt::Display for Buddy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(agency) = &self.agency {
            write!(f, " ({}", agency.name())?;
            if !self.agency_member_num.is_empty() {
                write!(f, " #{}", self.agency_member_num)?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// A logged dive, fully hydrated with its associations.
///
/// `date_time_in` is always held in UTC; see [`crate::timezone`] for the
/// projection back into the site's local time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Dive {
    pub id: DiveId,
    pub version: i32,
    pub owner_id: UserId,
    pub number: i32,
    pub activity: String,
    pub dive_site: DiveSite,
    pub operator: Option<Operator>,
    pub price: Option<Price>,
    pub trip: Option<Trip>,
    pub certification: Option<Certification>,
    pub date_time_in: DateTime<Utc>,
    pub surface_interval: Option<Duration>,
    pub max_depth: f64,
    pub avg_depth: Option<f64>,
    pub bottom_time: Duration,
    pub safety_stop: Option<Duration>,
    pub water_temp: Option<i32>,
    pub air_temp: Option<i32>,
    pub visibility: Option<f64>,
    pub current: Option<Current>,
    pub waves: Option<Waves>,
    pub buddy: Option<Buddy>,
    pub buddy_role: Option<BuddyRole>,
    pub weight: Option<f64>,
    pub weight_notes: String,
    pub equipment: Vec<Equipment>,
    pub equipment_notes: String,
    pub tank_configuration: TankConfiguration,
    pub tank_material: TankMaterial,
    /// Litres (water capacity) per cylinder.
    pub tank_volume: f64,
    pub gas_mix: GasMix,
    pub fo2: f64,
    /// Bar.
    pub pressure_in: Option<i32>,
    pub pressure_out: Option<i32>,
    pub gas_mix_notes: String,
    pub entry_point: EntryPoint,
    pub properties: Vec<DiveProperty>,
    pub rating: Option<i32>,
    pub notes: String,
}
