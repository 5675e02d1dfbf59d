pub mod entities;
pub mod error;
pub mod ports;
pub mod services;
pub mod value_objects;

pub use entities::{Instance, InstanceSnapshot, ManagedProcess, ProcessSpec};
pub use error::{DomainError, Result};
pub use value_objects::{
    extract_tag_from_filename, InstanceStatus, RouteConfig, ServiceCatalog, Strategy, UpdateStage,
    UpdateStatus, Version, VersionInfo,
};
