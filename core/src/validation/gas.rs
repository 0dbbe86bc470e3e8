//! Gas-mix composition rules.
//!
//! A mix is checked against the bounds of its category first and against the
//! universal FO2 range second. Both checks register on the `fo2` field, and
//! since the surfaced message for a field is the last one registered, a
//! universal-range failure is what the user sees when both fail.

use std::fmt;
use std::str::FromStr;

use super::{Bounds, ValidationErrors, Validator};

pub const FO2_FIELD: &str = "fo2";

pub const FO2_AIR: f64 = 0.21;
pub const FO2_OXYGEN: f64 = 1.0;
pub const FO2_UNIVERSAL: Bounds<f64> = Bounds::new(0.04, 1.0);
pub const FO2_NITROX: Bounds<f64> = Bounds::new(0.21, 0.60);
pub const FO2_HELIUM_MIX: Bounds<f64> = Bounds::new(0.04, 0.60);

const EXACT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasCategory {
    Air,
    Oxygen,
    Nitrox,
    Heliox,
    Trimix,
}

impl GasCategory {
    pub fn name(self) -> &'static str {
        match self {
            GasCategory::Air => "Air",
            GasCategory::Oxygen => "Oxygen",
            GasCategory::Nitrox => "Nitrox",
            GasCategory::Heliox => "Heliox",
            GasCategory::Trimix => "Trimix",
        }
    }

    /// The category's own constraint, as a failure message when `fo2` breaks it.
    fn check(self, fo2: f64) -> Option<String> {
        let exact = |expected: f64| {
            ((fo2 - expected).abs() > EXACT_TOLERANCE)
                .then(|| format!("{} must have an FO2 of exactly {expected:.2}", self.name()))
        };
        let ranged = |bounds: Bounds<f64>| {
            (!bounds.contains(fo2)).then(|| {
                format!(
                    "{} must have an FO2 between {:.2} and {:.2} inclusive",
                    self.name(),
                    bounds.min,
                    bounds.max
                )
            })
        };

        match self {
            GasCategory::Air => exact(FO2_AIR),
            GasCategory::Oxygen => exact(FO2_OXYGEN),
            GasCategory::Nitrox => ranged(FO2_NITROX),
            GasCategory::Heliox | GasCategory::Trimix => ranged(FO2_HELIUM_MIX),
        }
    }
}

impl fmt::Display for GasCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownGasCategory;

impl FromStr for GasCategory {
    type Err = UnknownGasCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "air" => Ok(GasCategory::Air),
            "oxygen" => Ok(GasCategory::Oxygen),
            "nitrox" => Ok(GasCategory::Nitrox),
            "heliox" => Ok(GasCategory::Heliox),
            "trimix" => Ok(GasCategory::Trimix),
            _ => Err(UnknownGasCategory),
        }
    }
}

/// Register the gas-mix rules for `fo2` on `v`. An unrecognised category only
/// gets the universal check.
pub fn check_gas_mix(v: &mut Validator, category: &str, fo2: f64) {
    if let Ok(category) = category.parse::<GasCategory>() {
        if let Some(message) = category.check(fo2) {
            v.check_field(false, FO2_FIELD, message);
        }
    }
    v.in_bounds(fo2, FO2_UNIVERSAL, FO2_FIELD);
}

pub fn validate_gas_mix(category: &str, fo2: f64) -> ValidationErrors {
    let mut v = Validator::new();
    check_gas_mix(&mut v, category, fo2);
    v.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_air_exact() {
        assert!(validate_gas_mix("Air", 0.21).is_empty());

        let errors = validate_gas_mix("Air", 0.22);
        let messages: Vec<_> = errors.messages_for(FO2_FIELD).collect();
        assert_eq!(messages, ["Air must have an FO2 of exactly 0.21"]);
        assert!(!messages.contains(&FO2_UNIVERSAL.message().as_str()));
    }

    #[test]
    fn test_universal_failure_wins() {
        for category in ["Air", "Nitrox", "Oxygen", "Trimix", "Heliox", "Argon"] {
            let errors = validate_gas_mix(category, 1.2);
            assert_eq!(
                errors.message_for(FO2_FIELD),
                Some(FO2_UNIVERSAL.message().as_str()),
                "{category}"
            );
        }

        let errors = validate_gas_mix("Nitrox", 1.2);
        assert_eq!(errors.messages_for(FO2_FIELD).count(), 2);
    }

    #[test]
    fn test_category_ranges() {
        assert!(validate_gas_mix("Oxygen", 1.0).is_empty());
        assert!(!validate_gas_mix("Oxygen", 0.99).is_empty());
        assert!(validate_gas_mix("nitrox", 0.32).is_empty());
        assert!(validate_gas_mix("Nitrox", 0.60).is_empty());
        assert!(!validate_gas_mix("Nitrox", 0.20).is_empty());
        assert!(validate_gas_mix("Trimix", 0.04).is_empty());
        assert!(!validate_gas_mix("Heliox", 0.61).is_empty());
    }

    #[test]
    fn test_unknown_category_only_universal() {
        assert!(validate_gas_mix("Argon", 0.5).is_empty());
        assert!(!validate_gas_mix("Argon", 0.03).is_empty());
        assert_eq!("argon".parse::<GasCategory>(), Err(UnknownGasCategory));
    }

    proptest! {
        #[test]
        fn out_of_range_always_reports_universal(fo2 in prop_oneof![0.0f64..0.0399, 1.0001f64..5.0]) {
            for category in ["Air", "Oxygen", "Nitrox", "Heliox", "Trimix", "Other"] {
                let errors = validate_gas_mix(category, fo2);
                prop_assert_eq!(
                    errors.message_for(FO2_FIELD).map(str::to_string),
                    Some(FO2_UNIVERSAL.message())
                );
            }
        }
    }
}
