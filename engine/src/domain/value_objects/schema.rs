//! Reflection-derived schema catalog records
//!
//! These are semantic data harvested through the gRPC Server Reflection
//! protocol: plain records, no generated types on the supervisor side.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A field of a protobuf message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub repeated: bool,
    pub number: i32,
    pub optional: bool,
}

/// A protobuf message with its fields, keyed by fully-qualified name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

/// A gRPC method with input/output type names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodSchema {
    pub name: String,
    pub input_type: String,
    pub output_type: String,
}

/// A gRPC service and its methods
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSchema {
    pub name: String,
    pub methods: Vec<MethodSchema>,
}

/// The full catalog harvested from one running instance
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    pub services: Vec<ServiceSchema>,
    pub messages: HashMap<String, MessageSchema>,
}
