//! REST Driving Adapter
//! JSON management surface served on the shared HTTP listener

pub mod handlers;
pub mod registry;
pub mod router;
pub mod webhook;

pub use handlers::{AppState, HttpState};
pub use registry::RegistryState;
pub use router::build_router;
