//! gRPC reflection harvest client
//! Walks the v1alpha Server Reflection protocol against a running instance
//! and records a schema-level catalog of its services and messages.

use crate::constants::registry::HARVEST_TIMEOUT;
use crate::domain::error::{DomainError, Result};
use crate::domain::value_objects::{
    FieldSchema, MessageSchema, MethodSchema, ServiceCatalog, ServiceSchema,
};
use crate::proto::reflection::server_reflection_client::ServerReflectionClient;
use crate::proto::reflection::server_reflection_request::MessageRequest;
use crate::proto::reflection::server_reflection_response::MessageResponse;
use crate::proto::reflection::ServerReflectionRequest;
use prost::Message;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::FieldDescriptorProto;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tracing::debug;

const REFLECTION_SERVICE: &str = "grpc.reflection.v1alpha.ServerReflection";

pub struct ReflectionClient {
    timeout: Duration,
}

impl ReflectionClient {
    pub fn new() -> Self {
        Self {
            timeout: HARVEST_TIMEOUT,
        }
    }

    /// Harvest the full catalog from `address` (`host:port`) under the
    /// harvest deadline.
    pub async fn service_catalog(&self, address: &str) -> Result<ServiceCatalog> {
        tokio::time::timeout(self.timeout, self.harvest(address))
            .await
            .map_err(|_| {
                DomainError::Internal(format!("reflection harvest of {address} timed out"))
            })?
    }

    async fn harvest(&self, address: &str) -> Result<ServiceCatalog> {
        let channel = Channel::from_shared(format!("http://{address}"))
            .map_err(|e| DomainError::Internal(e.to_string()))?
            .connect()
            .await
            .map_err(|e| DomainError::Internal(format!("connect {address}: {e}")))?;
        let mut client = ServerReflectionClient::new(channel);

        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let mut inbound = client
            .server_reflection_info(ReceiverStream::new(rx))
            .await
            .map_err(|e| DomainError::Internal(format!("reflection stream: {e}")))?
            .into_inner();

        // List the exposed services
        tx.send(ServerReflectionRequest {
            host: String::new(),
            message_request: Some(MessageRequest::ListServices(String::new())),
        })
        .await
        .map_err(|e| DomainError::Internal(e.to_string()))?;

        let response = inbound
            .message()
            .await
            .map_err(|e| DomainError::Internal(format!("reflection recv: {e}")))?
            .ok_or_else(|| DomainError::Internal("reflection stream closed".to_string()))?;
        let Some(MessageResponse::ListServicesResponse(listing)) = response.message_response
        else {
            return Err(DomainError::Internal(
                "unexpected reflection response type".to_string(),
            ));
        };

        let mut harvest = Harvest::default();
        for service in listing.service {
            let service_name = service.name;
            if service_name == REFLECTION_SERVICE {
                continue;
            }

            // Pull the file descriptors that define this service
            if tx
                .send(ServerReflectionRequest {
                    host: String::new(),
                    message_request: Some(MessageRequest::FileContainingSymbol(
                        service_name.clone(),
                    )),
                })
                .await
                .is_err()
            {
                break;
            }
            let Ok(Some(response)) = inbound.message().await else {
                continue;
            };
            let Some(MessageResponse::FileDescriptorResponse(files)) = response.message_response
            else {
                continue;
            };

            harvest.register_service(&service_name);
            for raw in files.file_descriptor_proto {
                match prost_types::FileDescriptorProto::decode(raw.as_slice()) {
                    Ok(fd) => harvest.absorb_file(&fd, &service_name),
                    Err(e) => debug!(error = %e, "skipping undecodable descriptor"),
                }
            }
        }

        Ok(harvest.into_catalog())
    }
}

impl Default for ReflectionClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates methods and message schemas across file-descriptor responses,
/// deduplicating files that define multiple requested services.
#[derive(Default)]
struct Harvest {
    methods: HashMap<String, Vec<MethodSchema>>,
    service_order: Vec<String>,
    messages: HashMap<String, MessageSchema>,
    processed_files: HashSet<String>,
}

impl Harvest {
    fn register_service(&mut self, service_name: &str) {
        if !self.methods.contains_key(service_name) {
            self.methods.insert(service_name.to_string(), Vec::new());
            self.service_order.push(service_name.to_string());
        }
    }

    fn absorb_file(&mut self, fd: &prost_types::FileDescriptorProto, service_name: &str) {
        // Methods for the requested service are recorded even from files
        // seen before; message schemas only once per file
        let package = fd.package();
        for svc in &fd.service {
            let full_name = format!("{package}.{}", svc.name());
            if full_name != service_name {
                continue;
            }
            let methods = self.methods.entry(service_name.to_string()).or_default();
            for method in &svc.method {
                methods.push(MethodSchema {
                    name: method.name().to_string(),
                    input_type: method.input_type().to_string(),
                    output_type: method.output_type().to_string(),
                });
            }
        }

        let file_name = fd.name().to_string();
        if !self.processed_files.insert(file_name) {
            return;
        }
        for message in &fd.message_type {
            let full_name = format!(".{package}.{}", message.name());
            let fields = message
                .field
                .iter()
                .map(|field| FieldSchema {
                    name: field.name().to_string(),
                    type_name: field_type_name(field),
                    repeated: field.label() == Label::Repeated,
                    number: field.number(),
                    optional: field.label() == Label::Optional,
                })
                .collect();
            self.messages.insert(
                full_name.clone(),
                MessageSchema {
                    name: full_name,
                    fields,
                },
            );
        }
    }

    fn into_catalog(mut self) -> ServiceCatalog {
        let services = self
            .service_order
            .into_iter()
            .map(|name| ServiceSchema {
                methods: self.methods.remove(&name).unwrap_or_default(),
                name,
            })
            .collect();
        ServiceCatalog {
            services,
            messages: self.messages,
        }
    }
}

/// Human-readable field type: scalar keyword, or the fully-qualified type
/// name for messages and enums
fn field_type_name(field: &FieldDescriptorProto) -> String {
    match field.r#type() {
        Type::Double => "double".to_string(),
        Type::Float => "float".to_string(),
        Type::Int64 => "int64".to_string(),
        Type::Uint64 => "uint64".to_string(),
        Type::Int32 => "int32".to_string(),
        Type::Fixed64 => "fixed64".to_string(),
        Type::Fixed32 => "fixed32".to_string(),
        Type::Bool => "bool".to_string(),
        Type::String => "string".to_string(),
        Type::Bytes => "bytes".to_string(),
        Type::Uint32 => "uint32".to_string(),
        Type::Sfixed32 => "sfixed32".to_string(),
        Type::Sfixed64 => "sfixed64".to_string(),
        Type::Sint32 => "sint32".to_string(),
        Type::Sint64 => "sint64".to_string(),
        Type::Message | Type::Enum => field.type_name().to_string(),
        Type::Group => "group".to_string(),
    }
}
