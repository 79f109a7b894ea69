//! Windowed log aggregation
//!
//! [`AggregationJob`] turns raw log records into per-(endpoint, status)
//! summaries; [`AggregationScheduler`] runs it on a fixed interval.

pub mod job;
pub mod scheduler;

pub use job::{summarize, AggregationJob, AggregationReport};
pub use scheduler::AggregationScheduler;
