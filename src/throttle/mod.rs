//! Throttle Module
//!
//! Tracks the API's leaky-bucket quota and makes admission decisions.

mod tracker;

pub use tracker::{Admission, QuotaState, ThrottleTracker, UpdateOutcome};
