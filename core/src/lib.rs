pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod pagination;
pub mod reference;
pub mod sorting;
pub mod stats;
pub mod storage;
pub mod timezone;
pub mod validation;

uniffi::setup_scaffolding!();

pub use config::EngineConfig;
pub use context::RequestContext;
pub use engine::{DiveEngine, DivePage, DiveView};
pub use error::{ConfigError, DependencyError, EngineError, SortParseError, SourceError};
pub use memory::MemoryStore;
pub use metrics::{DiveMetrics, MetricInputs};
pub use models::{
    Buddy, BuddyId, Certification, Country, Currency, Dive, DiveId, DiveSite, DiveSiteId, Operator,
    Trip, UserId,
};
pub use pagination::{PageData, Pager};
pub use reference::{ReferenceData, ReferenceDataCache, ReferenceDataItem, ReferenceKind, ReferenceRow};
pub use sorting::{SortDirection, SortKey, SortSpec};
pub use stats::{AggregateDiveStats, DiveStats, GroupBy, StatsAggregator};
pub use storage::{DiveFilter, DiveRecord, ReferenceSource, Storage};
pub use timezone::TimezoneAdjuster;
pub use validation::{ValidationErrors, Validator};
