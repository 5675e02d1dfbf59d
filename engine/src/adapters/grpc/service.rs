//! gRPC ProcessManager service implementation
//! Driving adapter exposing the supervision services through tonic

use crate::constants::server::SCALE_DOWN_TIMEOUT;
use crate::domain::services::{
    HotRestartCoordinator, ProcessManager, UpdateManager, VersionManager,
};
use crate::proto::winproc::process_manager_server::ProcessManager as ProcessManagerApi;
use crate::proto::winproc::{
    Empty, GetMetricsRequest, GetProcessRequest, GetVersionRequest, ListProcessesRequest,
    ListProcessesResponse, ListRepositoriesRequest, ListRepositoriesResponse, ListUpdatesRequest,
    ListUpdatesResponse, Metrics, ProcessInfo, RestartProcessRequest, RollbackRequest,
    RollbackResponse, ScaleProcessRequest, StartProcessRequest, StopProcessRequest,
    UpdateAvailable, UpdateProcessRequest, UpdateResponse, VersionInfo, WatchUpdateRequest,
};
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use super::mappers::{
    collect_metrics, instance_to_proto, status_from_domain, update_status_to_proto,
    version_info_to_proto,
};

pub struct ProcessManagerService {
    manager: Arc<ProcessManager>,
    update_manager: Arc<UpdateManager>,
    version_manager: Arc<VersionManager>,
    hot_restart: Arc<HotRestartCoordinator>,
    repositories: Vec<String>,
}

impl ProcessManagerService {
    pub fn new(
        manager: Arc<ProcessManager>,
        update_manager: Arc<UpdateManager>,
        version_manager: Arc<VersionManager>,
        hot_restart: Arc<HotRestartCoordinator>,
        repositories: Vec<String>,
    ) -> Self {
        Self {
            manager,
            update_manager,
            version_manager,
            hot_restart,
            repositories,
        }
    }

    async fn process_info(&self, name: &str) -> Result<ProcessInfo, Status> {
        let instances = self.manager.status(name).map_err(status_from_domain)?;
        let metrics = collect_metrics(&instances).await;

        let spec = self.manager.spec_of(name);
        let proto_instances: Vec<_> = instances
            .iter()
            .map(|snapshot| instance_to_proto(snapshot, metrics.get(&snapshot.id).cloned()))
            .collect();

        Ok(ProcessInfo {
            name: name.to_string(),
            instance_count: proto_instances.len() as i32,
            instances: proto_instances,
            repository: spec.as_ref().map(|s| s.repository.clone()).unwrap_or_default(),
            max_instances: spec.as_ref().map(|s| s.max_instances as i32).unwrap_or(0),
            auto_restart: spec.map(|s| s.auto_restart).unwrap_or(false),
        })
    }
}

fn required_name(name: &str) -> Result<(), Status> {
    if name.is_empty() {
        return Err(Status::invalid_argument("process_name is required"));
    }
    Ok(())
}

#[tonic::async_trait]
impl ProcessManagerApi for ProcessManagerService {
    async fn list_processes(
        &self,
        _request: Request<ListProcessesRequest>,
    ) -> Result<Response<ListProcessesResponse>, Status> {
        let names = self.manager.list();
        Ok(Response::new(ListProcessesResponse {
            count: names.len() as i32,
            process_names: names,
        }))
    }

    async fn get_process(
        &self,
        request: Request<GetProcessRequest>,
    ) -> Result<Response<ProcessInfo>, Status> {
        let req = request.into_inner();
        required_name(&req.process_name)?;
        debug!(process = %req.process_name, "gRPC GetProcess");
        Ok(Response::new(self.process_info(&req.process_name).await?))
    }

    async fn start_process(
        &self,
        request: Request<StartProcessRequest>,
    ) -> Result<Response<ProcessInfo>, Status> {
        let req = request.into_inner();
        required_name(&req.process_name)?;
        info!(process = %req.process_name, "gRPC StartProcess");

        self.manager
            .start(&req.process_name)
            .await
            .map_err(status_from_domain)?;
        Ok(Response::new(self.process_info(&req.process_name).await?))
    }

    async fn stop_process(
        &self,
        request: Request<StopProcessRequest>,
    ) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        required_name(&req.process_name)?;
        info!(process = %req.process_name, instance = %req.instance_id, all = req.all, "gRPC StopProcess");

        if req.all || req.instance_id.is_empty() {
            self.manager
                .stop_all(&req.process_name)
                .await
                .map_err(status_from_domain)?;
        } else {
            self.manager
                .stop(&req.process_name, &req.instance_id)
                .await
                .map_err(status_from_domain)?;
        }
        Ok(Response::new(Empty {}))
    }

    async fn restart_process(
        &self,
        request: Request<RestartProcessRequest>,
    ) -> Result<Response<ProcessInfo>, Status> {
        let req = request.into_inner();
        required_name(&req.process_name)?;
        info!(process = %req.process_name, instance = %req.instance_id, "gRPC RestartProcess");

        let instance_id = (!req.instance_id.is_empty()).then_some(req.instance_id.as_str());
        self.hot_restart
            .restart(&req.process_name, instance_id)
            .await
            .map_err(status_from_domain)?;
        Ok(Response::new(self.process_info(&req.process_name).await?))
    }

    async fn scale_process(
        &self,
        request: Request<ScaleProcessRequest>,
    ) -> Result<Response<ProcessInfo>, Status> {
        let req = request.into_inner();
        required_name(&req.process_name)?;
        if req.target_instances < 0 {
            return Err(Status::invalid_argument("target_instances must be >= 0"));
        }
        let target = req.target_instances as usize;
        info!(process = %req.process_name, target = target, "gRPC ScaleProcess");

        let current = self
            .manager
            .status(&req.process_name)
            .map_err(status_from_domain)?
            .len();

        if target > current {
            for _ in 0..(target - current) {
                self.manager
                    .start(&req.process_name)
                    .await
                    .map_err(status_from_domain)?;
            }
        } else if target < current {
            // Shrink newest-last: retire from the tail of the list
            loop {
                let instances = self
                    .manager
                    .status(&req.process_name)
                    .map_err(status_from_domain)?;
                if instances.len() <= target {
                    break;
                }
                let last = &instances[instances.len() - 1];
                self.manager
                    .stop_gracefully(&req.process_name, &last.id, SCALE_DOWN_TIMEOUT)
                    .await
                    .map_err(status_from_domain)?;
            }
        }

        Ok(Response::new(self.process_info(&req.process_name).await?))
    }

    async fn get_metrics(
        &self,
        request: Request<GetMetricsRequest>,
    ) -> Result<Response<Metrics>, Status> {
        let req = request.into_inner();
        required_name(&req.process_name)?;

        let mut instances = self
            .manager
            .status(&req.process_name)
            .map_err(status_from_domain)?;
        if !req.instance_id.is_empty() {
            instances.retain(|i| i.id == req.instance_id);
        }

        let metrics = collect_metrics(&instances).await;
        let mut per_instance = Vec::new();
        let mut total_cpu = 0.0;
        let mut total_memory = 0u64;
        for inst in &instances {
            if let Some(m) = metrics.get(&inst.id) {
                total_cpu += m.cpu_usage;
                total_memory = total_memory.saturating_add(m.memory_usage);
                per_instance.push(m.clone());
            }
        }

        Ok(Response::new(Metrics {
            process_name: req.process_name,
            aggregated: Some(crate::proto::winproc::AggregatedMetrics {
                total_cpu_usage: total_cpu,
                total_memory_usage: total_memory,
                instance_count: per_instance.len() as i32,
            }),
            instances: per_instance,
        }))
    }

    async fn update_process(
        &self,
        request: Request<UpdateProcessRequest>,
    ) -> Result<Response<UpdateResponse>, Status> {
        let req = request.into_inner();
        required_name(&req.process_name)?;
        info!(process = %req.process_name, version = %req.version, force = req.force, "gRPC UpdateProcess");

        match self
            .update_manager
            .update(&req.process_name, &req.version, req.force)
        {
            Ok(update_id) => Ok(Response::new(UpdateResponse {
                success: true,
                message: "Update started successfully".to_string(),
                update_id,
            })),
            Err(e) => Ok(Response::new(UpdateResponse {
                success: false,
                message: e.to_string(),
                update_id: String::new(),
            })),
        }
    }

    async fn rollback_process(
        &self,
        request: Request<RollbackRequest>,
    ) -> Result<Response<RollbackResponse>, Status> {
        let req = request.into_inner();
        required_name(&req.process_name)?;
        info!(process = %req.process_name, version = %req.version, "gRPC RollbackProcess");

        let rollback_id = self
            .update_manager
            .rollback(&req.process_name, &req.version)
            .await
            .map_err(status_from_domain)?;

        Ok(Response::new(RollbackResponse {
            success: true,
            process_name: req.process_name,
            rollback_id,
        }))
    }

    async fn get_process_version(
        &self,
        request: Request<GetVersionRequest>,
    ) -> Result<Response<VersionInfo>, Status> {
        let req = request.into_inner();
        required_name(&req.process_name)?;

        let info = self
            .version_manager
            .load_info(&req.process_name)
            .await
            .map_err(status_from_domain)?;
        Ok(Response::new(version_info_to_proto(&info)))
    }

    async fn list_available_updates(
        &self,
        _request: Request<ListUpdatesRequest>,
    ) -> Result<Response<ListUpdatesResponse>, Status> {
        let mut updates = Vec::new();
        for name in self.manager.list() {
            let Some(repository) = self.manager.repository_of(&name) else {
                continue;
            };
            match self.update_manager.check_for_updates(&name, &repository).await {
                Ok(info) if info.update_available => {
                    updates.push(UpdateAvailable {
                        process_name: name,
                        repository,
                        current_version: info
                            .current_version
                            .map(|v| v.tag)
                            .unwrap_or_default(),
                        latest_version: info.latest_version.map(|v| v.tag).unwrap_or_default(),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(process = %name, error = %e, "update check failed");
                }
            }
        }
        Ok(Response::new(ListUpdatesResponse { updates }))
    }

    async fn list_repositories(
        &self,
        _request: Request<ListRepositoriesRequest>,
    ) -> Result<Response<ListRepositoriesResponse>, Status> {
        Ok(Response::new(ListRepositoriesResponse {
            count: self.repositories.len() as i32,
            repositories: self.repositories.clone(),
        }))
    }

    type WatchUpdateStream =
        Pin<Box<dyn Stream<Item = Result<crate::proto::winproc::UpdateStatus, Status>> + Send>>;

    async fn watch_update(
        &self,
        request: Request<WatchUpdateRequest>,
    ) -> Result<Response<Self::WatchUpdateStream>, Status> {
        let req = request.into_inner();
        if req.update_id.is_empty() {
            return Err(Status::invalid_argument("update_id is required"));
        }
        debug!(update_id = %req.update_id, "gRPC WatchUpdate");

        let mut updates = self.update_manager.subscribe(&req.update_id);
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        tokio::spawn(async move {
            while let Some(frame) = updates.recv().await {
                let terminal = frame.completed;
                if tx.send(Ok(update_status_to_proto(&frame))).await.is_err() {
                    return;
                }
                // Completed or failed closes the stream
                if terminal {
                    return;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

impl std::fmt::Debug for ProcessManagerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManagerService").finish()
    }
}
