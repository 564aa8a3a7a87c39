//! Policy — tunable parameters and collaborator callbacks.
//!
//! A `Policy` is a plain data holder. Construction does no validation;
//! zero durations are replaced by defaults when the policy is installed
//! into a controller, not when it is built.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

/// Sampling period used when a policy's `interval` is zero.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Scale-down cooldown used when a policy's `cool_down` is zero.
pub const DEFAULT_COOL_DOWN: Duration = Duration::from_secs(10);

/// Returns the current load metric. Called once per tick.
pub type SampleFn = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Receives the new desired capacity whenever a decision changes it.
pub type SetCapacityFn = Arc<dyn Fn(i64) + Send + Sync>;

/// Health/readiness query.
///
/// Accepted for interface compatibility; the decision step never calls it.
pub type StatusFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Scaling parameters plus the callbacks that connect the controller to
/// the outside world.
#[derive(Clone)]
pub struct Policy {
    /// Inclusive lower bound on desired capacity.
    pub min: i64,
    /// Inclusive upper bound on desired capacity (see the crate docs for
    /// the one-unit overshoot).
    pub max: i64,
    /// Load strictly above this value triggers a scale-up.
    pub scale_up_threshold: i64,
    /// Load strictly below this value triggers a scale-down.
    pub scale_down_threshold: i64,
    /// Sampling period. Zero means `DEFAULT_INTERVAL`.
    pub interval: Duration,
    /// Minimum spacing between the last change and a scale-down.
    /// Zero means `DEFAULT_COOL_DOWN`.
    pub cool_down: Duration,
    pub sample_fn: SampleFn,
    pub set_capacity_fn: SetCapacityFn,
    /// Currently inert.
    pub status_fn: StatusFn,
}

impl Policy {
    /// Create a policy with the given bounds and thresholds.
    ///
    /// Durations start at zero (resolved to defaults on install) and the
    /// status query always reports healthy.
    pub fn new(
        min: i64,
        max: i64,
        scale_up_threshold: i64,
        scale_down_threshold: i64,
        sample_fn: SampleFn,
        set_capacity_fn: SetCapacityFn,
    ) -> Self {
        Self {
            min,
            max,
            scale_up_threshold,
            scale_down_threshold,
            interval: Duration::ZERO,
            cool_down: Duration::ZERO,
            sample_fn,
            set_capacity_fn,
            status_fn: Arc::new(|| true),
        }
    }

    /// Builder method: set the sampling interval.
    pub fn with_interval(self, interval: Duration) -> Self {
        Self { interval, ..self }
    }

    /// Builder method: set the scale-down cooldown.
    pub fn with_cool_down(self, cool_down: Duration) -> Self {
        Self { cool_down, ..self }
    }

    /// Builder method: set the status query.
    pub fn with_status_fn(self, status_fn: StatusFn) -> Self {
        Self { status_fn, ..self }
    }

    /// Copy of this policy as the controller installs it: zero durations
    /// replaced by their defaults.
    ///
    /// Bounds are not rejected. With `min > max` the scale-down branch can
    /// only fire while `desired > min`, which an increment capped at
    /// `max + 1` never reaches, so the controller only ever grows.
    pub(crate) fn installed(&self) -> Policy {
        let mut policy = self.clone();
        if policy.interval.is_zero() {
            policy.interval = DEFAULT_INTERVAL;
        }
        if policy.cool_down.is_zero() {
            policy.cool_down = DEFAULT_COOL_DOWN;
        }
        if policy.min > policy.max {
            warn!(
                min = policy.min,
                max = policy.max,
                "installed policy has min above max"
            );
        }
        policy
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("min", &self.min)
            .field("max", &self.max)
            .field("scale_up_threshold", &self.scale_up_threshold)
            .field("scale_down_threshold", &self.scale_down_threshold)
            .field("interval", &self.interval)
            .field("cool_down", &self.cool_down)
            .finish_non_exhaustive()
    }
}
