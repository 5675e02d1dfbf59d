//! Command implementations over the management gRPC client

use crate::formatters::{
    print_instance, print_process_info, print_update_status, print_version_info,
};
use crate::winproc::process_manager_client::ProcessManagerClient;
use crate::winproc::{
    GetMetricsRequest, GetProcessRequest, GetVersionRequest, ListProcessesRequest,
    ListRepositoriesRequest, ListUpdatesRequest, RestartProcessRequest, RollbackRequest,
    ScaleProcessRequest, StartProcessRequest, StopProcessRequest, UpdateProcessRequest,
    WatchUpdateRequest,
};
use anyhow::bail;
use colored::Colorize;
use tonic::transport::Channel;

type Client = ProcessManagerClient<Channel>;

pub async fn list(client: &mut Client) -> anyhow::Result<()> {
    let response = client
        .list_processes(ListProcessesRequest {})
        .await?
        .into_inner();
    println!("{} managed process(es)", response.count);
    for name in response.process_names {
        let info = client
            .get_process(GetProcessRequest { process_name: name })
            .await?
            .into_inner();
        print_process_info(&info);
    }
    Ok(())
}

pub async fn status(client: &mut Client, name: String) -> anyhow::Result<()> {
    let info = client
        .get_process(GetProcessRequest { process_name: name })
        .await?
        .into_inner();
    print_process_info(&info);
    Ok(())
}

pub async fn start(client: &mut Client, name: String) -> anyhow::Result<()> {
    let info = client
        .start_process(StartProcessRequest { process_name: name })
        .await?
        .into_inner();
    println!("{}", "started".green());
    print_process_info(&info);
    Ok(())
}

pub async fn stop(
    client: &mut Client,
    name: String,
    instance: Option<String>,
    all: bool,
) -> anyhow::Result<()> {
    client
        .stop_process(StopProcessRequest {
            process_name: name.clone(),
            instance_id: instance.unwrap_or_default(),
            all,
        })
        .await?;
    println!("{} {}", "stopped".green(), name);
    Ok(())
}

pub async fn restart(
    client: &mut Client,
    name: String,
    instance: Option<String>,
) -> anyhow::Result<()> {
    let info = client
        .restart_process(RestartProcessRequest {
            process_name: name,
            instance_id: instance.unwrap_or_default(),
        })
        .await?
        .into_inner();
    println!("{}", "hot restart completed".green());
    print_process_info(&info);
    Ok(())
}

pub async fn scale(client: &mut Client, name: String, instances: i32) -> anyhow::Result<()> {
    let info = client
        .scale_process(ScaleProcessRequest {
            process_name: name,
            target_instances: instances,
        })
        .await?
        .into_inner();
    println!("scaled to {} instance(s)", info.instance_count);
    for instance in &info.instances {
        print_instance(instance);
    }
    Ok(())
}

pub async fn metrics(
    client: &mut Client,
    name: String,
    instance: Option<String>,
) -> anyhow::Result<()> {
    let response = client
        .get_metrics(GetMetricsRequest {
            process_name: name.clone(),
            instance_id: instance.unwrap_or_default(),
        })
        .await?
        .into_inner();
    println!("{}", name.bold());
    for m in &response.instances {
        println!(
            "  {}  cpu={:.1}%  rss={:.1} MB  uptime={}s",
            m.instance_id.dimmed(),
            m.cpu_usage,
            m.memory_usage as f64 / 1024.0 / 1024.0,
            m.uptime,
        );
    }
    if let Some(total) = response.aggregated {
        println!(
            "  total: cpu={:.1}%  rss={:.1} MB across {} instance(s)",
            total.total_cpu_usage,
            total.total_memory_usage as f64 / 1024.0 / 1024.0,
            total.instance_count,
        );
    }
    Ok(())
}

pub async fn update(
    client: &mut Client,
    name: String,
    version: Option<String>,
    force: bool,
    watch_progress: bool,
) -> anyhow::Result<()> {
    let response = client
        .update_process(UpdateProcessRequest {
            process_name: name,
            version: version.unwrap_or_default(),
            force,
        })
        .await?
        .into_inner();

    if !response.success {
        bail!("update rejected: {}", response.message);
    }
    println!("{} (id: {})", response.message, response.update_id);

    if watch_progress {
        watch(client, response.update_id).await?;
    }
    Ok(())
}

pub async fn rollback(
    client: &mut Client,
    name: String,
    version: Option<String>,
) -> anyhow::Result<()> {
    let response = client
        .rollback_process(RollbackRequest {
            process_name: name,
            version: version.unwrap_or_default(),
        })
        .await?
        .into_inner();
    println!(
        "rollback started for {} (id: {})",
        response.process_name, response.rollback_id
    );
    Ok(())
}

pub async fn version(client: &mut Client, name: String) -> anyhow::Result<()> {
    let info = client
        .get_process_version(GetVersionRequest { process_name: name })
        .await?
        .into_inner();
    print_version_info(&info);
    Ok(())
}

pub async fn updates(client: &mut Client) -> anyhow::Result<()> {
    let response = client
        .list_available_updates(ListUpdatesRequest {})
        .await?
        .into_inner();
    if response.updates.is_empty() {
        println!("all processes are up to date");
        return Ok(());
    }
    for update in response.updates {
        println!(
            "{}  {} -> {}  ({})",
            update.process_name.bold(),
            update.current_version,
            update.latest_version.green(),
            update.repository,
        );
    }
    Ok(())
}

pub async fn repos(client: &mut Client) -> anyhow::Result<()> {
    let response = client
        .list_repositories(ListRepositoriesRequest {})
        .await?
        .into_inner();
    println!("{} repositories", response.count);
    for repo in response.repositories {
        println!("  {repo}");
    }
    Ok(())
}

pub async fn watch(client: &mut Client, update_id: String) -> anyhow::Result<()> {
    let mut stream = client
        .watch_update(WatchUpdateRequest { update_id })
        .await?
        .into_inner();
    while let Some(status) = stream.message().await? {
        print_update_status(&status);
        if status.completed {
            if status.stage == "failed" {
                bail!("update failed");
            }
            break;
        }
    }
    Ok(())
}
