//! Human-readable output formatting

use crate::winproc::{ProcessInfo, ProcessInstance, UpdateStatus, VersionInfo};
use chrono::{DateTime, Utc};
use colored::Colorize;

fn colorize_status(status: &str) -> String {
    match status {
        "running" => status.green().to_string(),
        "starting" | "stopping" | "updating" => status.yellow().to_string(),
        "failed" => status.red().to_string(),
        _ => status.dimmed().to_string(),
    }
}

fn format_start_time(unix: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn print_instance(instance: &ProcessInstance) {
    println!(
        "  {}  pid={}  port={}  status={}  started={}",
        instance.id.dimmed(),
        instance.pid,
        instance.port,
        colorize_status(&instance.status),
        format_start_time(instance.start_time),
    );
}

pub fn print_process_info(info: &ProcessInfo) {
    println!(
        "{}  ({} instance(s), max {}, auto_restart={})",
        info.name.bold(),
        info.instance_count,
        info.max_instances,
        info.auto_restart,
    );
    if !info.repository.is_empty() {
        println!("  repository: {}", info.repository);
    }
    for instance in &info.instances {
        print_instance(instance);
    }
}

pub fn print_update_status(status: &UpdateStatus) {
    let stage = match status.stage.as_str() {
        "completed" => status.stage.green().to_string(),
        "failed" => status.stage.red().to_string(),
        other => other.cyan().to_string(),
    };
    print!(
        "[{:>5.1}%] {} {}",
        status.progress,
        stage,
        status.message
    );
    if !status.error.is_empty() {
        print!("  {}", status.error.red());
    }
    println!();
}

pub fn print_version_info(info: &VersionInfo) {
    let current = info
        .current_version
        .as_ref()
        .map(|v| v.tag.as_str())
        .unwrap_or("none");
    let latest = info
        .latest_version
        .as_ref()
        .map(|v| v.tag.as_str())
        .unwrap_or("unknown");
    println!("{}", info.process_name.bold());
    println!("  current: {}", current.green());
    println!("  latest:  {latest}");
    if info.update_available {
        println!("  {}", "update available".yellow());
    }
    if !info.history.is_empty() {
        println!("  history:");
        for version in &info.history {
            println!("    {}", version.tag);
        }
    }
}
