//! Page-window math for list views.

use serde::Serialize;

pub const MIN_PAGE: u64 = 1;
pub const MAX_PAGE: u64 = 10_000_000;
pub const MIN_PAGE_SIZE: u64 = 1;
pub const MAX_PAGE_SIZE: u64 = 100;

/// A requested page, clamped to sane bounds.
///
/// Out-of-range values are reset rather than saturated: a page outside
/// `1..=10_000_000` becomes page 1 and a page size outside `1..=100` becomes
/// the caller's default, itself clamped into `1..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pager {
    page: u64,
    page_size: u64,
}

impl Pager {
    pub fn new(page: i64, page_size: i64, default_page_size: u64) -> Self {
        let page = u64::try_from(page)
            .ok()
            .filter(|p| (MIN_PAGE..=MAX_PAGE).contains(p))
            .unwrap_or(MIN_PAGE);
        let page_size = u64::try_from(page_size)
            .ok()
            .filter(|s| (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(s))
            .unwrap_or_else(|| default_page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE));
        Self { page, page_size }
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn limit(&self) -> u64 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

/// Navigation data for a rendered page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, uniffi::Record)]
pub struct PageData {
    pub current_page: u64,
    pub page_size: u64,
    pub first_page: u64,
    pub last_page: u64,
    pub total_records: u64,
}

impl PageData {
    /// All fields are zero when there are no records.
    pub fn new(total_records: u64, pager: &Pager) -> Self {
        if total_records == 0 || pager.page_size == 0 {
            return Self::default();
        }
        Self {
            current_page: pager.page,
            page_size: pager.page_size,
            first_page: 1,
            last_page: total_records.div_ceil(pager.page_size),
            total_records,
        }
    }

    pub fn has_previous(&self) -> bool {
        self.current_page > self.first_page
    }

    pub fn has_next(&self) -> bool {
        self.current_page < self.last_page
    }
}
