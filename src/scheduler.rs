//! Periodic key rotation.
//!
//! The first tick fires as soon as the scheduler starts, then one tick per
//! rotation interval. Ticks run one after another on a single task, so two
//! rotations never overlap. Stopping prevents further ticks but lets a tick
//! that already started run to completion.

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::manager::KeyLifecycleManager;

/// Handle to the background rotation task.
///
/// Dropping the handle cancels future ticks as well; call [`stop`](Self::stop)
/// to also wait for an in-flight tick to finish.
#[derive(Debug)]
pub struct RotationScheduler {
    cancellation_token: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl RotationScheduler {
    /// Spawns the rotation loop on the current tokio runtime.
    pub fn start(manager: Arc<KeyLifecycleManager>) -> Self {
        let period = manager.options().key_rotation_interval;
        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();

        info!(
            interval_secs = period.as_secs(),
            "starting key rotation scheduler"
        );
        let task_handle = tokio::spawn(async move {
            Self::rotation_loop(manager, period, token).await;
        });

        Self {
            cancellation_token,
            task_handle: Some(task_handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancels future ticks and waits for the loop to exit.
    pub async fn stop(mut self) {
        self.cancellation_token.cancel();
        if let Some(handle) = self.task_handle.take() {
            match handle.await {
                Ok(()) => info!("key rotation scheduler stopped"),
                Err(e) => error!("key rotation task ended abnormally: {}", e),
            }
        }
    }

    async fn rotation_loop(
        manager: Arc<KeyLifecycleManager>,
        period: Duration,
        cancellation_token: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(period);
        // A tick that overruns pushes the schedule back instead of bunching up.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => {
                    debug!("rotation loop cancelled");
                    break;
                }
                _ = interval.tick() => {}
            }

            match manager.rotate().await {
                Ok(outcome) => debug!(
                    key_id = %outcome.key_id,
                    persisted = outcome.persisted,
                    evicted = outcome.evicted.len(),
                    "rotation tick complete"
                ),
                Err(e) => error!(error = %e, "rotation tick failed, retrying next interval"),
            }
        }
    }
}

impl Drop for RotationScheduler {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
