//! Exported functions for the mobile clients.
//!
//! Only the stateless calculators cross the boundary; anything that needs
//! storage stays on the server side.

use crate::metrics::{DiveMetrics, MetricInputs};
use crate::pagination::{PageData, Pager};
use crate::validation::gas;

#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

/// A clamped page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Record)]
pub struct PageWindow {
    pub page: u64,
    pub page_size: u64,
    pub offset: u64,
}

#[uniffi::export]
pub fn compute_dive_metrics(inputs: MetricInputs) -> DiveMetrics {
    inputs.compute()
}

/// Field issues for an FO2 reading under the named gas category. Empty when
/// the reading is acceptable.
#[uniffi::export]
pub fn validate_gas_mix(category: String, fo2: f64) -> Vec<FieldIssue> {
    let errors = gas::validate_gas_mix(&category, fo2);
    errors
        .field_errors()
        .iter()
        .map(|e| FieldIssue {
            field: e.field.to_string(),
            message: e.message.clone(),
        })
        .collect()
}

#[uniffi::export]
pub fn new_pager(page: i64, page_size: i64, default_page_size: u64) -> PageWindow {
    let pager = Pager::new(page, page_size, default_page_size);
    PageWindow {
        page: pager.page(),
        page_size: pager.limit(),
        offset: pager.offset(),
    }
}

#[uniffi::export]
pub fn build_page_data(total_records: u64, page: i64, page_size: i64, default_page_size: u64) -> PageData {
    PageData::new(total_records, &Pager::new(page, page_size, default_page_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_dive_metrics() {
        let metrics = compute_dive_metrics(MetricInputs {
            tank_configuration: "Sidemount".to_string(),
            tank_volume: 11.2,
            pressure_in: Some(210),
            pressure_out: Some(65),
            max_depth: 18.0,
            avg_depth: Some(12.0),
            bottom_time_min: 45.0,
            site_altitude: 0,
            has_certification: false,
        });
        assert!((metrics.gas_used - 3248.0).abs() < 1e-9);
        assert!((metrics.sac_rate - 32.81).abs() < 0.01);
        assert!(!metrics.is_deep_dive);
    }

    #[test]
    fn test_validate_gas_mix() {
        assert!(validate_gas_mix("Nitrox".to_string(), 0.32).is_empty());

        let issues = validate_gas_mix("oxygen".to_string(), 0.9);
        assert_eq!(
            issues,
            [FieldIssue {
                field: "fo2".to_string(),
                message: "Oxygen must have an FO2 of exactly 1.00".to_string(),
            }]
        );
    }

    #[test]
    fn test_new_pager() {
        assert_eq!(
            new_pager(3, 25, 20),
            PageWindow {
                page: 3,
                page_size: 25,
                offset: 50,
            }
        );
        assert_eq!(new_pager(0, 0, 20).page_size, 20);
        assert_eq!(new_pager(1, 500, 500).page_size, 100);
        assert_eq!(new_pager(10_000_000, 0, u64::MAX / 2).offset, 999_999_900);
    }

    #[test]
    fn test_build_page_data() {
        let page = build_page_data(45, 3, 10, 20);
        assert_eq!(page.last_page, 5);
        assert_eq!(page.current_page, 3);

        let clamped = build_page_data(45, -1, 1000, 20);
        assert_eq!(clamped.current_page, 1);
        assert_eq!(clamped.page_size, 20);
        assert_eq!(clamped.last_page, 3);
    }
}
