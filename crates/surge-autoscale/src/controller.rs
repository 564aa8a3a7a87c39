//! Controller — lifecycle of one autoscaling monitor loop.
//!
//! `Controller::start` installs a policy and spawns the monitor loop.
//! `reload` swaps the policy snapshot without stopping the loop, and
//! `stop` delivers a one-shot cancellation the loop observes on its
//! next wake. A stopped controller cannot be restarted.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{ControllerError, ControllerResult};
use crate::monitor::{run_monitor_loop, Published};
use crate::policy::Policy;

/// Lifecycle phase of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Constructed; the monitor loop has not run yet.
    Created,
    /// The monitor loop is processing ticks.
    Running,
    /// The monitor loop observed a stop and exited.
    Stopped,
    /// The monitor loop ended abnormally, e.g. a policy callback panicked.
    Failed,
}

/// Handle to a running autoscaling controller.
pub struct Controller {
    /// Installed policy snapshot, read once per tick by the loop.
    policy_tx: watch::Sender<Arc<Policy>>,
    /// Cancellation signal for the monitor loop.
    shutdown_tx: watch::Sender<bool>,
    published: Arc<Published>,
    handle: Mutex<Option<JoinHandle<ControllerResult<()>>>>,
}

impl Controller {
    /// Install `policy` and start the monitor loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(policy: &Policy) -> Self {
        let installed = policy.installed();
        info!(
            min = installed.min,
            max = installed.max,
            interval = ?installed.interval,
            cool_down = ?installed.cool_down,
            "autoscaling controller starting"
        );

        let (policy_tx, policy_rx) = watch::channel(Arc::new(installed));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let published = Arc::new(Published::new());

        let handle = tokio::spawn(run_monitor_loop(
            policy_rx,
            shutdown_rx,
            Arc::clone(&published),
        ));

        Self {
            policy_tx,
            shutdown_tx,
            published,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Replace the installed policy.
    ///
    /// Defaults are applied to the copy, and the loop restarts its timer
    /// at the new interval. `desired` and the cooldown window carry over.
    /// After `stop` the policy is still installed but nothing observes it.
    pub fn reload(&self, policy: &Policy) {
        let installed = policy.installed();
        info!(
            min = installed.min,
            max = installed.max,
            interval = ?installed.interval,
            cool_down = ?installed.cool_down,
            "autoscaling policy reloaded"
        );
        self.policy_tx.send_replace(Arc::new(installed));
    }

    /// Request the monitor loop to stop. Never blocks; repeated calls are
    /// harmless.
    pub fn stop(&self) {
        // Fails only once the loop has exited and dropped its receiver.
        if self.shutdown_tx.send(true).is_err() {
            debug!("stop requested after monitor loop exited");
        } else {
            info!("autoscaling controller stop requested");
        }
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// Returns the loop's failure if a policy callback panicked. A second
    /// call returns `Ok(())` without waiting.
    pub async fn shutdown(&self) -> ControllerResult<()> {
        self.stop();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| ControllerError::Join(e.to_string()))?,
            None => Ok(()),
        }
    }

    /// The most recent desired capacity decided by the loop.
    pub fn desired(&self) -> i64 {
        self.published.desired()
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> ControllerState {
        self.published.state()
    }

    /// The installed policy, with defaults applied.
    pub fn policy(&self) -> Arc<Policy> {
        Arc::clone(&self.policy_tx.borrow())
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("desired", &self.desired())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
