//! Release poller
//! Periodically checks the release source for newer tags and triggers
//! automatic updates.

use crate::constants::release::POLL_REQUEST_TIMEOUT;
use crate::domain::services::UpdateManager;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One (name, repository) pair to poll
#[derive(Debug, Clone)]
pub struct PollTarget {
    pub name: String,
    pub repository: String,
}

pub struct ReleasePoller {
    interval: Duration,
    update_manager: Arc<UpdateManager>,
    targets: Vec<PollTarget>,
}

impl ReleasePoller {
    pub fn new(
        interval: Duration,
        update_manager: Arc<UpdateManager>,
        targets: Vec<PollTarget>,
    ) -> Self {
        Self {
            interval,
            update_manager,
            targets,
        }
    }

    /// Run until the token is cancelled. Polls once immediately, then on
    /// every tick.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval = ?self.interval, targets = self.targets.len(), "release poller started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("release poller stopped");
                    return;
                }
                _ = ticker.tick() => self.poll_all().await,
            }
        }
    }

    async fn poll_all(&self) {
        for target in &self.targets {
            if let Err(e) = self.poll_target(target).await {
                warn!(process = %target.name, error = %e, "poll failed");
            }
        }
    }

    async fn poll_target(&self, target: &PollTarget) -> crate::domain::error::Result<()> {
        if target.repository.is_empty() {
            return Ok(());
        }

        // Skip while an update is in flight
        if let Some(status) = self.update_manager.status(&target.name) {
            if !status.completed {
                debug!(process = %target.name, "update in progress, skipping poll");
                return Ok(());
            }
        }

        let info = tokio::time::timeout(
            POLL_REQUEST_TIMEOUT,
            self.update_manager
                .check_for_updates(&target.name, &target.repository),
        )
        .await
        .map_err(|_| {
            crate::domain::error::DomainError::ReleaseSource(format!(
                "poll of {} timed out",
                target.repository
            ))
        })??;

        if info.update_available {
            if let Some(latest) = &info.latest_version {
                info!(
                    process = %target.name,
                    current = info.current_version.as_ref().map(|v| v.tag.as_str()).unwrap_or("none"),
                    latest = %latest.tag,
                    "update available, triggering auto-update"
                );
                self.update_manager.update(&target.name, &latest.tag, false)?;
            }
        } else if let Some(current) = &info.current_version {
            debug!(process = %target.name, tag = %current.tag, "up to date");
        }
        Ok(())
    }
}
