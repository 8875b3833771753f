//! Throttle Tracker
//!
//! Leaky-bucket view of the API quota, fed only by server-reported cost data.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::ThrottleStatus;

// == Quota State ==
/// Latest authoritative bucket state.
///
/// `currently_available` always lies in `0..=maximum_available`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaState {
    pub maximum_available: f64,
    pub currently_available: f64,
    /// Points restored per second. `None` until the API has reported one.
    pub restore_rate: Option<f64>,
    /// Unix milliseconds of the observation this state came from
    pub last_updated: u64,
}

// == Admission ==
/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    pub allow: bool,
    pub wait_ms: u64,
}

impl Admission {
    fn allowed() -> Self {
        Self {
            allow: true,
            wait_ms: 0,
        }
    }
}

/// What `update` did with an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// State replaced. `threshold_crossed` is true only on the false -> true edge.
    Applied { threshold_crossed: bool },
    /// Observation older than the current state; ignored.
    Stale,
}

// == Throttle Tracker ==
#[derive(Debug)]
pub struct ThrottleTracker {
    state: QuotaState,
    observed: bool,
    threshold_pct: f64,
    /// Last seen side of each threshold, keyed by the threshold's bit pattern
    above_threshold: HashMap<u64, bool>,
}

impl ThrottleTracker {
    // == Constructor ==
    /// Creates a tracker with an assumed bucket size and no restore rate.
    ///
    /// # Arguments
    /// * `default_maximum_available` - Bucket size assumed until the API reports one
    /// * `threshold_pct` - Consumed fraction at which the approaching-limit edge fires
    pub fn new(default_maximum_available: f64, threshold_pct: f64) -> Self {
        let max = sanitize_points(default_maximum_available);
        Self {
            state: QuotaState {
                maximum_available: max,
                currently_available: max,
                restore_rate: None,
                last_updated: 0,
            },
            observed: false,
            threshold_pct,
            above_threshold: HashMap::new(),
        }
    }

    pub fn state(&self) -> QuotaState {
        self.state
    }

    /// True once at least one server observation has been ingested.
    pub fn has_observation(&self) -> bool {
        self.observed
    }

    // == Update ==
    /// Ingests an authoritative throttle status observed at `observed_at_ms`.
    ///
    /// Observations older than the current state are dropped, so a late response
    /// can never roll the bucket back. Equal timestamps re-apply idempotently.
    pub fn update(&mut self, status: ThrottleStatus, observed_at_ms: u64) -> UpdateOutcome {
        if self.observed && observed_at_ms < self.state.last_updated {
            return UpdateOutcome::Stale;
        }

        let max = sanitize_points(status.maximum_available);
        let current = sanitize_points(status.currently_available).min(max);
        let restore_rate = Some(status.restore_rate).filter(|r| r.is_finite() && *r > 0.0);

        self.state = QuotaState {
            maximum_available: max,
            currently_available: current,
            restore_rate,
            last_updated: observed_at_ms,
        };
        self.observed = true;

        let threshold_crossed = self.approaching_threshold(self.threshold_pct);
        UpdateOutcome::Applied { threshold_crossed }
    }

    // == Admit ==
    /// Decides whether a request of `estimated_cost` may be sent at `now_ms`.
    ///
    /// Availability is projected forward from the last observation at the
    /// restore rate, capped at the bucket size. Without a known restore rate
    /// admission is optimistic.
    pub fn admit(&self, estimated_cost: f64, now_ms: u64) -> Admission {
        let Some(rate) = self.state.restore_rate else {
            return Admission::allowed();
        };

        let available = self.projected_available(now_ms);
        if available >= estimated_cost {
            return Admission::allowed();
        }

        let wait_ms = ((estimated_cost - available) / rate * 1000.0).ceil();
        Admission {
            allow: false,
            wait_ms: wait_ms as u64,
        }
    }

    /// Available points at `now_ms` assuming continuous refill since the last observation.
    pub fn projected_available(&self, now_ms: u64) -> f64 {
        let QuotaState {
            maximum_available,
            currently_available,
            restore_rate,
            last_updated,
        } = self.state;

        match restore_rate {
            Some(rate) => {
                let elapsed_secs = now_ms.saturating_sub(last_updated) as f64 / 1000.0;
                (currently_available + rate * elapsed_secs).min(maximum_available)
            }
            None => currently_available,
        }
    }

    /// True when a known bucket could never hold `estimated_cost`.
    pub fn exceeds_capacity(&self, estimated_cost: f64) -> bool {
        self.observed && estimated_cost > self.state.maximum_available
    }

    /// Fraction of the bucket currently consumed, in `0.0..=1.0`.
    pub fn used_fraction(&self) -> f64 {
        if self.state.maximum_available <= 0.0 {
            return 0.0;
        }
        1.0 - self.state.currently_available / self.state.maximum_available
    }

    // == Approaching Threshold ==
    /// Edge-triggered check: true only when consumption moves from below `pct`
    /// to at-or-above it. Stays false while the condition keeps holding.
    ///
    /// Each distinct `pct` keeps its own edge state.
    pub fn approaching_threshold(&mut self, pct: f64) -> bool {
        let above = self.observed && self.used_fraction() >= pct;
        let was_above = self.above_threshold.insert(pct.to_bits(), above).unwrap_or(false);
        above && !was_above
    }
}

fn sanitize_points(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn status(max: f64, current: f64, rate: f64) -> ThrottleStatus {
        ThrottleStatus {
            maximum_available: max,
            currently_available: current,
            restore_rate: rate,
        }
    }

    #[test]
    fn test_admission_is_optimistic_before_observation() {
        let tracker = ThrottleTracker::new(1000.0, 0.8);
        assert_eq!(tracker.admit(5000.0, 0), Admission::allowed());
        assert!(!tracker.has_observation());
        assert!(!tracker.exceeds_capacity(5000.0));
    }

    #[test]
    fn test_admit_refuses_with_wait() {
        let mut tracker = ThrottleTracker::new(1000.0, 0.8);
        tracker.update(status(1000.0, 50.0, 10.0), 10_000);

        let admission = tracker.admit(100.0, 10_000);
        assert!(!admission.allow);
        assert_eq!(admission.wait_ms, 5000);
    }

    #[test]
    fn test_admit_accounts_for_refill() {
        let mut tracker = ThrottleTracker::new(1000.0, 0.8);
        tracker.update(status(1000.0, 50.0, 10.0), 10_000);

        // Two seconds later 20 points have been restored.
        let admission = tracker.admit(100.0, 12_000);
        assert_eq!(admission.wait_ms, 3000);

        // After the full wait the request fits.
        assert!(tracker.admit(100.0, 15_000).allow);
    }

    #[test]
    fn test_projection_capped_at_maximum() {
        let mut tracker = ThrottleTracker::new(1000.0, 0.8);
        tracker.update(status(1000.0, 900.0, 50.0), 0);
        assert_eq!(tracker.projected_available(3_600_000), 1000.0);
    }

    #[test]
    fn test_stale_update_ignored() {
        let mut tracker = ThrottleTracker::new(1000.0, 0.8);
        tracker.update(status(1000.0, 400.0, 50.0), 2_000);

        let outcome = tracker.update(status(1000.0, 900.0, 50.0), 1_000);
        assert_eq!(outcome, UpdateOutcome::Stale);
        assert_eq!(tracker.state().currently_available, 400.0);
        assert_eq!(tracker.state().last_updated, 2_000);
    }

    #[test]
    fn test_update_clamps_into_bucket() {
        let mut tracker = ThrottleTracker::new(1000.0, 0.8);
        tracker.update(status(500.0, 750.0, 50.0), 1);
        assert_eq!(tracker.state().currently_available, 500.0);

        tracker.update(status(500.0, -20.0, 50.0), 2);
        assert_eq!(tracker.state().currently_available, 0.0);

        tracker.update(status(f64::NAN, 10.0, 0.0), 3);
        assert_eq!(tracker.state().maximum_available, 0.0);
        assert_eq!(tracker.state().currently_available, 0.0);
        assert_eq!(tracker.state().restore_rate, None);
    }

    #[test]
    fn test_threshold_is_edge_triggered() {
        let mut tracker = ThrottleTracker::new(1000.0, 0.8);

        let below = tracker.update(status(1000.0, 500.0, 50.0), 1);
        assert_eq!(below, UpdateOutcome::Applied { threshold_crossed: false });

        let crossed = tracker.update(status(1000.0, 150.0, 50.0), 2);
        assert_eq!(crossed, UpdateOutcome::Applied { threshold_crossed: true });

        // Still above: no repeat.
        let still = tracker.update(status(1000.0, 100.0, 50.0), 3);
        assert_eq!(still, UpdateOutcome::Applied { threshold_crossed: false });

        // Recover, then cross again.
        tracker.update(status(1000.0, 900.0, 50.0), 4);
        let again = tracker.update(status(1000.0, 10.0, 50.0), 5);
        assert_eq!(again, UpdateOutcome::Applied { threshold_crossed: true });
    }

    #[test]
    fn test_thresholds_keep_separate_edges() {
        let mut tracker = ThrottleTracker::new(1000.0, 0.95);
        tracker.update(status(1000.0, 300.0, 50.0), 1);

        assert!(tracker.approaching_threshold(0.5));
        assert!(!tracker.approaching_threshold(0.5));

        // 0.6 was never checked before, so its first crossing still fires.
        assert!(tracker.approaching_threshold(0.6));
        assert!(!tracker.approaching_threshold(0.6));

        // A higher threshold that is not reached stays quiet.
        assert!(!tracker.approaching_threshold(0.9));
    }

    #[test]
    fn test_exceeds_capacity_after_observation() {
        let mut tracker = ThrottleTracker::new(1000.0, 0.8);
        tracker.update(status(1000.0, 1000.0, 50.0), 1);
        assert!(tracker.exceeds_capacity(1001.0));
        assert!(!tracker.exceeds_capacity(1000.0));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Update(f64, f64, f64, u64),
        Admit(f64, u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (-100.0..5000.0f64, -500.0..6000.0f64, -10.0..200.0f64, 0u64..100_000)
                .prop_map(|(m, c, r, t)| Op::Update(m, c, r, t)),
            (0.0..3000.0f64, 0u64..200_000).prop_map(|(c, t)| Op::Admit(c, t)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        // For any update/admit sequence the reported availability stays inside the bucket.
        #[test]
        fn prop_available_stays_in_bucket(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let mut tracker = ThrottleTracker::new(1000.0, 0.8);
            for op in ops {
                match op {
                    Op::Update(m, c, r, t) => {
                        tracker.update(status(m, c, r), t);
                    }
                    Op::Admit(cost, t) => {
                        let admission = tracker.admit(cost, t);
                        prop_assert!(admission.allow || admission.wait_ms > 0);
                        let projected = tracker.projected_available(t);
                        prop_assert!(projected >= 0.0);
                        prop_assert!(projected <= tracker.state().maximum_available);
                    }
                }
                let state = tracker.state();
                prop_assert!(state.currently_available >= 0.0);
                prop_assert!(state.currently_available <= state.maximum_available);
            }
        }

        // The wait returned on refusal is exactly enough to admit the request.
        #[test]
        fn prop_wait_is_sufficient(current in 0.0..1000.0f64, cost in 0.0..1000.0f64, rate in 1.0..100.0f64) {
            let mut tracker = ThrottleTracker::new(1000.0, 0.8);
            tracker.update(status(1000.0, current, rate), 1_000);
            let admission = tracker.admit(cost, 1_000);
            if !admission.allow {
                let later = tracker.projected_available(1_000 + admission.wait_ms);
                prop_assert!(later + 1e-6 >= cost);
            }
        }
    }
}
