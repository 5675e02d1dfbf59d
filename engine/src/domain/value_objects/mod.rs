pub mod instance_status;
pub mod route;
pub mod schema;
pub mod update_status;
pub mod version;

pub use instance_status::InstanceStatus;
pub use route::{RouteConfig, Strategy};
pub use schema::{FieldSchema, MessageSchema, MethodSchema, ServiceCatalog, ServiceSchema};
pub use update_status::{UpdateStage, UpdateStatus};
pub use version::{extract_tag_from_filename, Version, VersionInfo};
