mod commands;
mod formatters;
mod options;

pub mod winproc {
    tonic::include_proto!("winproc.v1");
}

use clap::{Parser, Subcommand};
use winproc::process_manager_client::ProcessManagerClient;

#[derive(Parser)]
#[command(name = "winproc", about = "Client for the winproc supervisor")]
struct Cli {
    /// Daemon address (also WINPROC_GRPC_ADDR)
    #[arg(long, global = true)]
    addr: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List managed processes and their instances
    List,
    /// Show one process's instances
    Status { name: String },
    /// Start a new instance
    Start { name: String },
    /// Stop instances
    Stop {
        name: String,
        /// Stop one specific instance
        #[arg(long)]
        instance: Option<String>,
        /// Stop every instance
        #[arg(long)]
        all: bool,
    },
    /// Hot restart (new instances first, old ones retired after)
    Restart {
        name: String,
        /// Restart one specific instance
        #[arg(long)]
        instance: Option<String>,
    },
    /// Scale to a target instance count
    Scale { name: String, instances: i32 },
    /// Live CPU/memory metrics
    Metrics {
        name: String,
        #[arg(long)]
        instance: Option<String>,
    },
    /// Hot deploy to a version (latest when omitted)
    Update {
        name: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        force: bool,
        /// Stream progress until completion
        #[arg(long)]
        watch: bool,
    },
    /// Roll back to the previous (or a specific) version
    Rollback {
        name: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// Version tracking for a process
    Version { name: String },
    /// Processes with a newer release available
    Updates,
    /// Monitored repositories
    Repos,
    /// Stream the progress of a running update
    Watch { update_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let addr = options::resolve_addr(cli.addr.clone());
    let channel = options::connect(&addr).await?;
    let mut client = ProcessManagerClient::new(channel);

    match cli.command {
        Command::List => commands::list(&mut client).await,
        Command::Status { name } => commands::status(&mut client, name).await,
        Command::Start { name } => commands::start(&mut client, name).await,
        Command::Stop {
            name,
            instance,
            all,
        } => commands::stop(&mut client, name, instance, all).await,
        Command::Restart { name, instance } => {
            commands::restart(&mut client, name, instance).await
        }
        Command::Scale { name, instances } => commands::scale(&mut client, name, instances).await,
        Command::Metrics { name, instance } => {
            commands::metrics(&mut client, name, instance).await
        }
        Command::Update {
            name,
            version,
            force,
            watch,
        } => commands::update(&mut client, name, version, force, watch).await,
        Command::Rollback { name, version } => {
            commands::rollback(&mut client, name, version).await
        }
        Command::Version { name } => commands::version(&mut client, name).await,
        Command::Updates => commands::updates(&mut client).await,
        Command::Repos => commands::repos(&mut client).await,
        Command::Watch { update_id } => commands::watch(&mut client, update_id).await,
    }
}
