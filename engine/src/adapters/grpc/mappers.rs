//! Domain <-> proto conversions and status mapping

use crate::domain::entities::InstanceSnapshot;
use crate::domain::error::DomainError;
use crate::domain::value_objects::{UpdateStatus, Version, VersionInfo};
use crate::proto::winproc as pb;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tonic::Status;

pub fn status_from_domain(err: DomainError) -> Status {
    match &err {
        DomainError::ProcessNotFound(_) | DomainError::InstanceNotFound(_) => {
            Status::not_found(err.to_string())
        }
        DomainError::MaxInstancesReached { .. } | DomainError::PortExhausted { .. } => {
            Status::resource_exhausted(err.to_string())
        }
        DomainError::UpdateInProgress(_)
        | DomainError::NoCurrentVersion(_)
        | DomainError::NoPreviousVersion(_)
        | DomainError::RestartFailed(_) => Status::failed_precondition(err.to_string()),
        DomainError::InvalidConfiguration(_)
        | DomainError::RepositoryNotConfigured(_)
        | DomainError::VersionNotInHistory { .. } => Status::invalid_argument(err.to_string()),
        _ => Status::internal(err.to_string()),
    }
}

pub fn instance_to_proto(
    snapshot: &InstanceSnapshot,
    metrics: Option<pb::ProcessMetrics>,
) -> pb::ProcessInstance {
    pb::ProcessInstance {
        id: snapshot.id.clone(),
        process_name: snapshot.process_name.clone(),
        pid: snapshot.pid as i32,
        status: snapshot.status.to_string(),
        start_time: snapshot.start_time.timestamp(),
        port: i32::from(snapshot.port),
        env_file_path: snapshot.env_file_path.clone(),
        metrics,
    }
}

pub fn version_to_proto(version: &Version) -> pb::VersionRecord {
    pb::VersionRecord {
        tag: version.tag.clone(),
        asset_url: version.asset_url.clone(),
        asset_name: version.asset_name.clone(),
        size: version.size as i64,
        published_at: version.published_at.map(|t| t.timestamp()).unwrap_or(0),
        is_prerelease: version.is_prerelease,
    }
}

pub fn version_info_to_proto(info: &VersionInfo) -> pb::VersionInfo {
    pb::VersionInfo {
        process_name: info.process_name.clone(),
        current_version: info.current_version.as_ref().map(version_to_proto),
        latest_version: info.latest_version.as_ref().map(version_to_proto),
        update_available: info.update_available,
        history: info.history.iter().map(version_to_proto).collect(),
    }
}

pub fn update_status_to_proto(status: &UpdateStatus) -> pb::UpdateStatus {
    pb::UpdateStatus {
        process_name: status.process_name.clone(),
        update_id: status.update_id.clone(),
        stage: status.stage.to_string(),
        progress: status.progress,
        message: status.message.clone(),
        error: status.error.clone().unwrap_or_default(),
        completed: status.completed,
    }
}

/// Sample CPU/RSS for a set of live instances. Two refreshes bracket a short
/// window so the CPU figure is a rate, not a zero.
pub async fn collect_metrics(
    instances: &[InstanceSnapshot],
) -> HashMap<String, pb::ProcessMetrics> {
    let mut sys = System::new();
    for inst in instances {
        sys.refresh_process(Pid::from_u32(inst.pid));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut out = HashMap::new();
    let now = Utc::now();
    for inst in instances {
        let pid = Pid::from_u32(inst.pid);
        if !sys.refresh_process(pid) {
            continue;
        }
        if let Some(process) = sys.process(pid) {
            out.insert(
                inst.id.clone(),
                pb::ProcessMetrics {
                    instance_id: inst.id.clone(),
                    cpu_usage: f64::from(process.cpu_usage()),
                    memory_usage: process.memory(),
                    uptime: (now - inst.start_time).num_seconds(),
                },
            );
        }
    }
    out
}
