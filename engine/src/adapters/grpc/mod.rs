//! Native gRPC Driving Adapter

pub mod mappers;
pub mod service;

pub use service::ProcessManagerService;

use crate::constants::server::GRPC_PORT_PROBE_RANGE;
use crate::domain::error::{DomainError, Result};
use crate::proto::winproc::process_manager_server::ProcessManagerServer;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server as TonicServer;
use tracing::{error, info};

/// Bind the native gRPC listener, probing forward from the configured port
/// when it is busy, and serve in the background until cancellation.
/// Returns the bound port.
pub async fn serve_native(
    host: &str,
    preferred_port: u16,
    service: ProcessManagerService,
    cancel: CancellationToken,
) -> Result<u16> {
    let (listener, port) = bind_with_probe(host, preferred_port, GRPC_PORT_PROBE_RANGE).await?;

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<ProcessManagerServer<ProcessManagerService>>()
        .await;

    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(crate::proto::winproc::FILE_DESCRIPTOR_SET)
        .build()
        .map_err(|e| DomainError::Internal(format!("reflection registry: {e}")))?;

    info!(host = %host, port = port, "gRPC server listening");

    tokio::spawn(async move {
        let result = TonicServer::builder()
            .add_service(health_service)
            .add_service(reflection_service)
            .add_service(ProcessManagerServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                cancel.cancelled().await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "gRPC server terminated");
        }
    });

    Ok(port)
}

async fn bind_with_probe(host: &str, preferred: u16, range: u16) -> Result<(TcpListener, u16)> {
    for offset in 0..range {
        let port = preferred + offset;
        if let Ok(listener) = TcpListener::bind((host, port)).await {
            if port != preferred {
                info!(preferred = preferred, port = port, "configured gRPC port busy, probed forward");
            }
            return Ok((listener, port));
        }
    }
    Err(DomainError::PortExhausted {
        start: preferred,
        attempts: range,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_with_probe_skips_busy_port() {
        let held = TcpListener::bind(("127.0.0.1", 47321)).await.unwrap();
        let (listener, port) = bind_with_probe("127.0.0.1", 47321, 10).await.unwrap();
        assert_eq!(port, 47322);
        drop(listener);
        drop(held);
    }
}
