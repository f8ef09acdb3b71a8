//! Rolling KPI aggregation over the decoded stream.
//!
//! The aggregator is an ordinary bus subscriber (filter = all). Its window
//! keeps counters up to date on every message in and every message out, so
//! a snapshot costs the same whatever the window size.

pub mod task;
pub mod window;

pub use task::{KPI_BATCH_SIZE, KpiAggregator, kpi_task};
pub use window::{KpiSnapshot, KpiWindow};
