pub mod instance;
pub mod managed_process;

pub use instance::{Instance, InstanceSnapshot};
pub use managed_process::{ManagedProcess, ProcessSpec};
