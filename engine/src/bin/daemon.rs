//! winproc daemon
//!
//! Supervises a fleet of gRPC server executables: provisions binaries,
//! launches and monitors instances, performs hot restarts and hot deploys,
//! and fronts the fleet with REST + gRPC + gRPC-Web management surfaces and
//! the configured load balancers.

use clap::Parser;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use wp_engine::adapters::grpc::{serve_native, ProcessManagerService};
use wp_engine::adapters::grpcweb::{serve_shared, GrpcWebProxy, HttpGateway};
use wp_engine::adapters::loadbalancer::LoadBalancerManager;
use wp_engine::adapters::rest::{build_router, HttpState, RegistryState};
use wp_engine::domain::services::{
    repo_basename, HotRestartCoordinator, PollTarget, ProcessManager, ReleasePoller,
    UpdateManager, VersionManager,
};
use wp_engine::infrastructure::{
    env_file, load_config, GithubReleaseSource, PidTracker, SingletonGuard,
    TokioProcessExecutor,
};

#[derive(Parser, Debug)]
#[command(name = "winprocd", about = "Supervisor for managed gRPC server executables")]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Directory for certificates (provisioned externally)
    #[arg(long, default_value = "certs")]
    certs: PathBuf,

    /// Directory for private keys (provisioned externally)
    #[arg(long, default_value = "keys")]
    keys: PathBuf,

    /// Directory for data files (.env, version documents)
    #[arg(long, default_value = "data")]
    data: PathBuf,

    /// Directory for versioned binary artifacts
    #[arg(long, default_value = "binaries")]
    binaries: PathBuf,

    /// GitHub personal access token (or set GITHUB_TOKEN)
    #[arg(long)]
    github_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Console plus daily-rolling file logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_appender = tracing_appender::rolling::daily(".", "winproc.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false),
        )
        .init();

    info!("winproc starting");

    // At most one supervisor: displace a stale holder, then sweep orphans
    let singleton = SingletonGuard::acquire()?;

    let config = load_config(&args.config)?;

    let mut images: Vec<String> = config
        .processes
        .iter()
        .filter_map(|p| repo_basename(&p.repository).map(|base| format!("{base}.exe")))
        .collect();
    images.push("winprocd.exe".to_string());
    wp_engine::infrastructure::sweep_orphans_by_name(&images);

    let pid_tracker = Arc::new(PidTracker::new(args.data.join("pids.txt")));
    if let Err(e) = pid_tracker.cleanup_orphans() {
        warn!(error = %e, "orphan pid cleanup failed");
    }

    for dir in [&args.certs, &args.keys, &args.data, &args.binaries] {
        std::fs::create_dir_all(dir)?;
    }

    let token = args
        .github_token
        .clone()
        .or_else(|| std::env::var("GITHUB_TOKEN").ok())
        .filter(|t| !t.is_empty());
    if token.is_some() {
        info!("release source authentication enabled");
    } else {
        warn!("no GitHub token configured, unauthenticated rate limits apply");
    }

    // Core services
    let cancel = CancellationToken::new();
    let source = Arc::new(GithubReleaseSource::new(token));
    let version_manager = Arc::new(VersionManager::new(&args.data, source)?);
    let executor = Arc::new(TokioProcessExecutor::with_pid_tracker(Some(
        pid_tracker.clone(),
    )));
    let specs = config.processes.iter().map(|p| p.to_spec()).collect();
    let manager = Arc::new(ProcessManager::new(
        specs,
        executor,
        &args.data,
        &args.binaries,
        cancel.clone(),
    ));
    manager.set_version_manager(version_manager.clone());

    // Environment files are written before any launch
    for process in &config.processes {
        let path = env_file::env_file_path(&args.data, &process.name);
        if config.secrets.override_env || !path.exists() {
            env_file::generate(&path, &process.name, &process.env, process.port)?;
        }
    }

    manager.initialize().await?;
    info!(processes = config.processes.len(), "process manager initialized");

    let update_manager = Arc::new(UpdateManager::new(
        manager.clone(),
        version_manager.clone(),
        &args.binaries,
    )?);
    let hot_restart = Arc::new(HotRestartCoordinator::new(manager.clone()));

    // Autostart one instance of every configured process
    for process in &config.processes {
        match manager.start(&process.name).await {
            Ok(instance) => {
                info!(process = %process.name, port = instance.port, "process started")
            }
            Err(e) => warn!(process = %process.name, error = %e, "failed to start process"),
        }
    }

    // Load balancers
    let _lb_manager = if config.load_balancers.is_empty() {
        None
    } else {
        let lb_manager = LoadBalancerManager::new(&config.load_balancers, manager.clone())?;
        lb_manager.start_all(&cancel);
        Some(lb_manager)
    };

    // Optional release poller
    if let Some(polling) = &config.github.update_mode.polling {
        if polling.enabled {
            let targets: Vec<PollTarget> = config
                .processes
                .iter()
                .filter(|p| !p.repository.is_empty())
                .map(|p| PollTarget {
                    name: p.name.clone(),
                    repository: p.repository.clone(),
                })
                .collect();
            let poller = ReleasePoller::new(
                Duration::from_secs(polling.interval_secs),
                update_manager.clone(),
                targets,
            );
            let poller_cancel = cancel.clone();
            tokio::spawn(async move { poller.run(poller_cancel).await });
        }
    }

    let repositories: Vec<String> = config
        .processes
        .iter()
        .map(|p| p.repository.clone())
        .filter(|r| !r.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    // Native gRPC listener, probing forward when the configured port is busy
    let grpc_service = ProcessManagerService::new(
        manager.clone(),
        update_manager.clone(),
        version_manager.clone(),
        hot_restart.clone(),
        repositories.clone(),
    );
    let grpc_port = serve_native(
        &config.server.host,
        config.server.grpc_port,
        grpc_service,
        cancel.clone(),
    )
    .await?;

    // Shared HTTP listener: REST + gRPC-Web + dynamic proxy
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel(1);
    let registry = Arc::new(RegistryState::new(
        manager.clone(),
        format!("http://{}:{}", config.server.host, config.server.port),
        config.registry.skip_services.clone(),
        config.registry.skip_messages.clone(),
    ));
    let state = Arc::new(HttpState {
        manager: manager.clone(),
        update_manager: update_manager.clone(),
        registry,
        shutdown: shutdown_tx,
    });
    let router = build_router(state);
    let management = ProcessManagerService::new(
        manager.clone(),
        update_manager.clone(),
        version_manager.clone(),
        hot_restart.clone(),
        repositories,
    );
    let gateway = Arc::new(HttpGateway::new(
        router,
        management,
        GrpcWebProxy::new(manager.clone()),
    ));
    let http_host = config.server.host.clone();
    let http_port = config.server.port;
    let http_cancel = cancel.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = serve_shared(&http_host, http_port, gateway, http_cancel).await {
            error!(error = %e, "HTTP server failed");
        }
    });

    info!(
        http_port = http_port,
        grpc_port = grpc_port,
        "winproc ready"
    );

    // Graceful overall shutdown: OS signal or the HTTP shutdown endpoint
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received interrupt signal"),
        _ = shutdown_rx.recv() => info!("received shutdown request"),
    }

    info!("shutting down gracefully");
    cancel.cancel();
    manager.shutdown().await;
    let _ = http_task.await;
    singleton.release();
    info!("shutdown complete");
    Ok(())
}
