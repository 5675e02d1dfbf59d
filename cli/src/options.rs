//! Connection options

use anyhow::Context;
use std::time::Duration;
use tonic::transport::Channel;

const DEFAULT_ADDR: &str = "http://127.0.0.1:9090";

/// Resolve the daemon address: `--addr` flag, then `WINPROC_GRPC_ADDR`,
/// then the default local port.
pub fn resolve_addr(flag: Option<String>) -> String {
    flag.or_else(|| std::env::var("WINPROC_GRPC_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string())
}

pub async fn connect(addr: &str) -> anyhow::Result<Channel> {
    Channel::from_shared(addr.to_string())
        .with_context(|| format!("invalid daemon address: {addr}"))?
        .tcp_nodelay(true)
        .timeout(Duration::from_secs(30))
        .connect()
        .await
        .with_context(|| format!("failed to connect to {addr}"))
}
