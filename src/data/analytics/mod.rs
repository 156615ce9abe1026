//! Analytics over the columnar store
//!
//! - `timeseries` - pushdown window aggregates, trend, anomaly, percentile,
//!   correlation, distribution and top-N executed by the engine
//! - `hybrid` - extraction into a private embedded engine for analytics the
//!   primary store cannot express efficiently

pub mod hybrid;
pub mod timeseries;

pub use hybrid::{CorrelationReport, HybridAnalytics, PercentileReport};
pub use timeseries::{
    AnomalyPoint, HistogramBin, TimeSeriesAnalytics, TrendDirection, TrendResult, WindowGrain,
    WindowPoint,
};
