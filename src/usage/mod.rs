//! Usage Module
//!
//! Per-call cost history consumed by dashboards and analytics.

mod recorder;

pub use recorder::{UsageBucket, UsageRecord, UsageRecorder};

/// Default number of usage records retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;
