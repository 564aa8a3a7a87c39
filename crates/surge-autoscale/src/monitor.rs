//! Monitor loop — the background task that samples load and decides.
//!
//! The loop owns the periodic timer and the decision state (`desired`,
//! last activity). It reads the installed policy once per tick from a
//! `watch` channel, so a concurrent reload is seen either entirely or
//! not at all for a given evaluation.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::controller::ControllerState;
use crate::error::{ControllerError, ControllerResult};
use crate::policy::Policy;

/// Outcome of evaluating one sampled load value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Desired capacity changed to the given value.
    ScaleTo(i64),
    /// A scale-down was warranted but the cooldown has not elapsed.
    CoolingDown { remaining: Duration },
    /// No change needed.
    NoChange,
}

/// Decision state owned by the monitor loop.
#[derive(Debug, Default)]
pub struct Decider {
    desired: i64,
    /// Time of the most recent change in either direction.
    last_activity: Option<Instant>,
}

impl Decider {
    /// Create a decider with `desired = 0` and no recorded activity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current desired capacity.
    pub fn desired(&self) -> i64 {
        self.desired
    }

    /// Time of the most recent change, if any.
    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    /// Evaluate one load sample against `policy` at time `now`.
    ///
    /// At most one unit of change in at most one direction. Scale-up is
    /// never held back by the cooldown.
    pub fn evaluate(&mut self, policy: &Policy, load: i64, now: Instant) -> ScaleDecision {
        // Bound checked on the pre-increment value: permits max + 1.
        if load > policy.scale_up_threshold && self.desired <= policy.max {
            let from = self.desired;
            self.desired += 1;
            self.last_activity = Some(now);
            debug!(
                from,
                to = self.desired,
                load,
                threshold = policy.scale_up_threshold,
                "scaling up"
            );
            return ScaleDecision::ScaleTo(self.desired);
        }

        if self.desired > 0 && load < policy.scale_down_threshold && self.desired > policy.min {
            if let Some(last) = self.last_activity {
                // A cooldown past the clock's range never elapses.
                let remaining = match last.checked_add(policy.cool_down) {
                    Some(ready_at) => ready_at.saturating_duration_since(now),
                    None => Duration::MAX,
                };
                if !remaining.is_zero() {
                    debug!(
                        desired = self.desired,
                        load,
                        ?remaining,
                        "scale-down suppressed by cooldown"
                    );
                    return ScaleDecision::CoolingDown { remaining };
                }
            }

            let from = self.desired;
            self.desired -= 1;
            self.last_activity = Some(now);
            debug!(
                from,
                to = self.desired,
                load,
                threshold = policy.scale_down_threshold,
                "scaling down"
            );
            return ScaleDecision::ScaleTo(self.desired);
        }

        ScaleDecision::NoChange
    }
}

/// Longest timer period the loop arms. Longer intervals are clamped so
/// deadline arithmetic stays inside the clock's range.
const MAX_PERIOD: Duration = Duration::from_secs(86_400 * 365 * 30);

/// State the loop publishes for readers on other threads.
#[derive(Debug)]
pub(crate) struct Published {
    desired: AtomicI64,
    state: Mutex<ControllerState>,
}

impl Published {
    pub(crate) fn new() -> Self {
        Self {
            desired: AtomicI64::new(0),
            state: Mutex::new(ControllerState::Created),
        }
    }

    pub(crate) fn desired(&self) -> i64 {
        self.desired.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> ControllerState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: ControllerState) {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }
}

/// Marks the controller `Failed` if the loop task ends without reaching
/// one of its own exit paths, e.g. a panic outside a tick.
struct ExitGuard<'a>(&'a Published);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let mut state = self
            .0
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if matches!(*state, ControllerState::Created | ControllerState::Running) {
            error!("monitor loop exited unexpectedly");
            *state = ControllerState::Failed;
        }
    }
}

/// Run the monitor loop until shutdown is signalled, the controller is
/// dropped, or a policy callback panics.
pub(crate) async fn run_monitor_loop(
    mut policy_rx: watch::Receiver<Arc<Policy>>,
    mut shutdown: watch::Receiver<bool>,
    published: Arc<Published>,
) -> ControllerResult<()> {
    let _guard = ExitGuard(&published);
    let mut decider = Decider::new();
    let mut ticker = new_ticker(policy_rx.borrow_and_update().interval);
    published.set_state(ControllerState::Running);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                debug!("monitor loop received stop");
                break;
            }
            changed = policy_rx.changed() => {
                if changed.is_err() {
                    debug!("controller dropped, monitor loop exiting");
                    break;
                }
                // The old timer and any tick it had pending are discarded.
                let interval = policy_rx.borrow_and_update().interval;
                ticker = new_ticker(interval);
                debug!(?interval, "monitor timer reset");
            }
            _ = ticker.tick() => {
                let policy = Arc::clone(&policy_rx.borrow());
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    evaluate_tick(&policy, &mut decider, &published)
                }));

                if let Err(payload) = outcome {
                    let message = panic_message(payload.as_ref());
                    error!(error = %message, "policy callback panicked, monitor loop terminated");
                    published.set_state(ControllerState::Failed);
                    return Err(ControllerError::MonitorPanicked(message));
                }
            }
        }
    }

    drop(ticker);
    published.set_state(ControllerState::Stopped);
    info!(desired = decider.desired(), "monitor loop stopped");
    Ok(())
}

/// Sample, decide, and actuate for one tick.
///
/// A new desired value is published before `set_capacity_fn` runs, so
/// `desired()` matches the decision even if the callback panics.
fn evaluate_tick(policy: &Policy, decider: &mut Decider, published: &Published) -> ScaleDecision {
    let load = (policy.sample_fn)();
    let decision = decider.evaluate(policy, load, Instant::now());
    if let ScaleDecision::ScaleTo(desired) = decision {
        published.desired.store(desired, Ordering::Release);
        (policy.set_capacity_fn)(desired);
    }
    decision
}

/// A ticker whose first tick fires one full period from now.
fn new_ticker(period: Duration) -> Interval {
    let period = period.min(MAX_PERIOD);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_policy(cool_down: Duration) -> Policy {
        Policy::new(0, 3, 10, 2, Arc::new(|| 0_i64), Arc::new(|_: i64| {}))
            .with_cool_down(cool_down)
            .installed()
    }

    #[test]
    fn scale_up_above_threshold() {
        let policy = test_policy(Duration::from_secs(10));
        let mut decider = Decider::new();

        let decision = decider.evaluate(&policy, 15, Instant::now());
        assert_eq!(decision, ScaleDecision::ScaleTo(1));
        assert_eq!(decider.desired(), 1);
        assert!(decider.last_activity().is_some());
    }

    #[test]
    fn load_at_threshold_is_not_a_scale_up() {
        let policy = test_policy(Duration::from_secs(10));
        let mut decider = Decider::new();

        assert_eq!(decider.evaluate(&policy, 10, Instant::now()), ScaleDecision::NoChange);
        assert_eq!(decider.desired(), 0);
    }

    #[test]
    fn scale_up_ignores_cooldown() {
        let policy = test_policy(Duration::from_secs(3600));
        let mut decider = Decider::new();
        let now = Instant::now();

        assert_eq!(decider.evaluate(&policy, 15, now), ScaleDecision::ScaleTo(1));
        assert_eq!(decider.evaluate(&policy, 15, now), ScaleDecision::ScaleTo(2));
        assert_eq!(decider.evaluate(&policy, 15, now), ScaleDecision::ScaleTo(3));
    }

    #[test]
    fn upper_bound_allows_one_unit_overshoot() {
        let policy = test_policy(Duration::from_secs(10));
        let mut decider = Decider::new();
        let now = Instant::now();

        for _ in 0..10 {
            decider.evaluate(&policy, 100, now);
        }
        assert_eq!(decider.desired(), policy.max + 1);
        assert_eq!(decider.evaluate(&policy, 100, now), ScaleDecision::NoChange);
    }

    #[test]
    fn scale_down_after_cooldown_elapsed() {
        let policy = test_policy(Duration::from_secs(10));
        let mut decider = Decider::new();
        let start = Instant::now();

        decider.evaluate(&policy, 15, start);
        let decision = decider.evaluate(&policy, 1, start + Duration::from_secs(11));
        assert_eq!(decision, ScaleDecision::ScaleTo(0));
    }

    #[test]
    fn scale_down_at_exact_cooldown_boundary() {
        let policy = test_policy(Duration::from_secs(10));
        let mut decider = Decider::new();
        let start = Instant::now();

        decider.evaluate(&policy, 15, start);
        let decision = decider.evaluate(&policy, 1, start + Duration::from_secs(10));
        assert_eq!(decision, ScaleDecision::ScaleTo(0));
    }

    #[test]
    fn scale_down_suppressed_within_cooldown() {
        let policy = test_policy(Duration::from_secs(10));
        let mut decider = Decider::new();
        let start = Instant::now();

        decider.evaluate(&policy, 15, start);
        let decision = decider.evaluate(&policy, 1, start + Duration::from_secs(4));
        assert_eq!(
            decision,
            ScaleDecision::CoolingDown {
                remaining: Duration::from_secs(6)
            }
        );
        assert_eq!(decider.desired(), 1);
        // A suppressed attempt does not move the cooldown window.
        assert_eq!(decider.last_activity(), Some(start));
    }

    #[test]
    fn scale_down_respects_min() {
        let mut policy = test_policy(Duration::from_secs(1));
        policy.min = 2;
        let mut decider = Decider::new();
        let mut now = Instant::now();

        for _ in 0..3 {
            decider.evaluate(&policy, 15, now);
        }
        assert_eq!(decider.desired(), 3);

        for _ in 0..5 {
            now += Duration::from_secs(2);
            decider.evaluate(&policy, 0, now);
        }
        assert_eq!(decider.desired(), 2);
    }

    #[test]
    fn never_scales_below_zero() {
        let mut policy = test_policy(Duration::from_secs(1));
        policy.min = -5;
        let mut decider = Decider::new();

        let decision = decider.evaluate(&policy, 0, Instant::now());
        assert_eq!(decision, ScaleDecision::NoChange);
        assert_eq!(decider.desired(), 0);
    }

    #[test]
    fn load_between_thresholds_is_no_change() {
        let policy = test_policy(Duration::from_secs(1));
        let mut decider = Decider::new();
        let now = Instant::now();

        decider.evaluate(&policy, 15, now);
        let decision = decider.evaluate(&policy, 5, now + Duration::from_secs(5));
        assert_eq!(decision, ScaleDecision::NoChange);
        assert_eq!(decider.desired(), 1);
    }

    #[test]
    fn scale_up_wins_when_thresholds_overlap() {
        // Load satisfies both conditions; the branches are exclusive.
        let mut policy = test_policy(Duration::from_secs(1));
        policy.scale_up_threshold = 1;
        policy.scale_down_threshold = 100;
        let mut decider = Decider::new();
        let now = Instant::now();

        decider.evaluate(&policy, 50, now);
        let decision = decider.evaluate(&policy, 50, now + Duration::from_secs(5));
        assert_eq!(decision, ScaleDecision::ScaleTo(2));
    }

    #[test]
    fn inverted_bounds_only_grow() {
        let mut policy = test_policy(Duration::from_secs(1));
        policy.min = 5;
        policy.max = 1;
        let mut decider = Decider::new();
        let mut now = Instant::now();

        for _ in 0..5 {
            decider.evaluate(&policy, 15, now);
        }
        assert_eq!(decider.desired(), 2);

        now += Duration::from_secs(10);
        assert_eq!(decider.evaluate(&policy, 0, now), ScaleDecision::NoChange);
    }

    #[test]
    fn cooldown_beyond_clock_range_never_elapses() {
        let policy = test_policy(Duration::MAX);
        let mut decider = Decider::new();
        let start = Instant::now();

        decider.evaluate(&policy, 15, start);
        let decision = decider.evaluate(&policy, 1, start + Duration::from_secs(3600));
        assert_eq!(
            decision,
            ScaleDecision::CoolingDown {
                remaining: Duration::MAX
            }
        );
        assert_eq!(decider.desired(), 1);
    }

    #[tokio::test]
    async fn ticker_clamps_huge_period() {
        let ticker = new_ticker(Duration::MAX);
        assert_eq!(ticker.period(), MAX_PERIOD);
    }

    #[test]
    fn exit_guard_marks_unexpected_exit_failed() {
        let published = Published::new();
        published.set_state(ControllerState::Running);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = ExitGuard(&published);
            panic!("timer setup failed");
        }));

        assert!(result.is_err());
        assert_eq!(published.state(), ControllerState::Failed);
    }

    #[test]
    fn exit_guard_keeps_orderly_stop() {
        let published = Published::new();
        {
            let _guard = ExitGuard(&published);
            published.set_state(ControllerState::Stopped);
        }
        assert_eq!(published.state(), ControllerState::Stopped);
    }

    #[test]
    fn panic_message_extracts_strings() {
        let static_payload: Box<dyn Any + Send> = Box::new("boom");
        let owned_payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other_payload: Box<dyn Any + Send> = Box::new(42_u32);

        assert_eq!(panic_message(static_payload.as_ref()), "boom");
        assert_eq!(panic_message(owned_payload.as_ref()), "bang");
        assert_eq!(panic_message(other_payload.as_ref()), "unknown panic payload");
    }
}
