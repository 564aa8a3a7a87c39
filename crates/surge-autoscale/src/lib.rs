//! surge-autoscale — reactive desired-capacity controller.
//!
//! Samples a load metric on a fixed interval and nudges a desired
//! capacity one unit at a time within `[min, max]`. The metric source
//! and the scaling mechanism are supplied by the caller as callbacks.
//!
//! # Scaling Algorithm
//!
//! ```text
//! load = sample()
//!
//! if load > scale_up_threshold and desired <= max:
//!     desired += 1                      // never cooldown-gated
//!     set_capacity(desired)
//!
//! else if desired > 0 and load < scale_down_threshold and desired > min:
//!     if last_activity + cool_down <= now:
//!         desired -= 1
//!         set_capacity(desired)
//! ```
//!
//! The upper bound is checked before the increment, so `desired` can
//! settle at `max + 1`. Scale-down waits out `cool_down` measured from
//! the last change in either direction; scale-up reacts immediately.
//!
//! # Lifecycle
//!
//! ```text
//! Controller::start(policy)   Created → Running, spawns the monitor loop
//! Controller::reload(policy)  swaps the policy snapshot, restarts the timer
//! Controller::stop()          one-shot cancellation, loop exits → Stopped
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod monitor;
pub mod policy;

pub use config::{parse_duration, PolicyFile};
pub use controller::{Controller, ControllerState};
pub use error::{ConfigError, ConfigResult, ControllerError, ControllerResult};
pub use monitor::{Decider, ScaleDecision};
pub use policy::{Policy, SampleFn, SetCapacityFn, StatusFn, DEFAULT_COOL_DOWN, DEFAULT_INTERVAL};
