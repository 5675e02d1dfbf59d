//! Hot restart coordinator
//! Health-gated replacement of a process's instances without a fully
//! stopped window.

use crate::constants::hot_restart::{
    HEALTH_MAX_ATTEMPTS, HEALTH_POLL_INTERVAL, MIN_DUAL_INSTANCE_WINDOW, RETIRE_TIMEOUT,
};
use crate::domain::entities::InstanceSnapshot;
use crate::domain::error::{DomainError, Result};
use crate::domain::services::ProcessManager;
use crate::domain::value_objects::InstanceStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct HotRestartCoordinator {
    manager: Arc<ProcessManager>,
    poll_interval: Duration,
    max_attempts: u32,
    min_dual_window: Duration,
    retire_timeout: Duration,
}

impl HotRestartCoordinator {
    pub fn new(manager: Arc<ProcessManager>) -> Self {
        Self {
            manager,
            poll_interval: HEALTH_POLL_INTERVAL,
            max_attempts: HEALTH_MAX_ATTEMPTS,
            min_dual_window: MIN_DUAL_INSTANCE_WINDOW,
            retire_timeout: RETIRE_TIMEOUT,
        }
    }

    /// Override gate timings (used by tests)
    pub fn with_timings(
        mut self,
        poll_interval: Duration,
        min_dual_window: Duration,
        retire_timeout: Duration,
    ) -> Self {
        self.poll_interval = poll_interval;
        self.min_dual_window = min_dual_window;
        self.retire_timeout = retire_timeout;
        self
    }

    /// Replace the instances of `name`: provision replacements, gate on
    /// their health, then retire the old set. When `instance_id` targets a
    /// single instance, exactly one replacement is provisioned and only
    /// that instance is retired.
    pub async fn restart(
        &self,
        name: &str,
        instance_id: Option<&str>,
    ) -> Result<Vec<InstanceSnapshot>> {
        // Snapshot the old set
        let old_instances = self.manager.status(name)?;
        if old_instances.is_empty() {
            return Err(DomainError::RestartFailed(format!(
                "no instances found for process {name}"
            )));
        }
        let replacements = match instance_id {
            Some(_) => 1,
            None => old_instances.len(),
        };
        info!(
            process = %name,
            old = old_instances.len(),
            replacements = replacements,
            "starting hot restart"
        );

        // Provision the new set; roll back on any failure
        let mut new_ids: Vec<String> = Vec::with_capacity(replacements);
        for i in 0..replacements {
            match self.manager.start(name).await {
                Ok(snapshot) => {
                    info!(
                        process = %name,
                        instance = %snapshot.id,
                        pid = snapshot.pid,
                        "started replacement {}/{}",
                        i + 1,
                        replacements
                    );
                    new_ids.push(snapshot.id);
                }
                Err(e) => {
                    self.stop_new(name, &new_ids).await;
                    return Err(DomainError::RestartFailed(format!(
                        "failed to start replacement {}: {e}",
                        i + 1
                    )));
                }
            }
        }

        // Health gate: every replacement must be simultaneously running in
        // the same snapshot, and the dual-instance state must be observable
        // for at least the minimum window.
        let gate_started = Instant::now();
        let mut healthy = false;
        for attempt in 0..self.max_attempts {
            tokio::time::sleep(self.poll_interval).await;

            let snapshot = match self.manager.status(name) {
                Ok(s) => s,
                Err(e) => {
                    warn!(process = %name, attempt = attempt + 1, error = %e, "health poll failed");
                    continue;
                }
            };
            if all_healthy(&new_ids, &snapshot) {
                let elapsed = gate_started.elapsed();
                if elapsed < self.min_dual_window {
                    tokio::time::sleep(self.min_dual_window - elapsed).await;
                }
                info!(
                    process = %name,
                    attempts = attempt + 1,
                    elapsed = ?gate_started.elapsed(),
                    "replacements healthy"
                );
                healthy = true;
                break;
            }
        }
        if !healthy {
            warn!(process = %name, "health gate timed out, rolling back");
            self.stop_new(name, &new_ids).await;
            return Err(DomainError::RestartFailed(format!(
                "new instances failed to become healthy after {} attempts",
                self.max_attempts
            )));
        }

        // Retire the old set. Failures are logged but do not fail the
        // restart: the replacements are already serving.
        for old in &old_instances {
            if new_ids.iter().any(|id| *id == old.id) {
                continue;
            }
            if let Some(requested) = instance_id {
                if old.id != requested {
                    continue;
                }
            }
            info!(process = %name, instance = %old.id, pid = old.pid, "retiring old instance");
            if let Err(e) = self
                .manager
                .stop_gracefully(name, &old.id, self.retire_timeout)
                .await
            {
                warn!(process = %name, instance = %old.id, error = %e, "failed to retire old instance");
            }
        }

        info!(process = %name, "hot restart completed");
        self.manager.status(name)
    }

    async fn stop_new(&self, name: &str, ids: &[String]) {
        for id in ids {
            if let Err(e) = self.manager.stop(name, id).await {
                warn!(process = %name, instance = %id, error = %e, "rollback stop failed");
            }
        }
    }
}

/// An id is healthy iff present in the snapshot with a valid pid and
/// status=running
fn all_healthy(ids: &[String], snapshot: &[InstanceSnapshot]) -> bool {
    ids.iter().all(|id| {
        snapshot
            .iter()
            .any(|s| s.id == *id && s.pid > 0 && s.status == InstanceStatus::Running)
    })
}
