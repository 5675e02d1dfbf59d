pub mod hot_restart;
pub mod process_manager;
pub mod release_poller;
pub mod update_manager;
pub mod version_manager;

pub use hot_restart::HotRestartCoordinator;
pub use process_manager::{repo_basename, versioned_binary_path, ProcessManager};
pub use release_poller::{PollTarget, ReleasePoller};
pub use update_manager::UpdateManager;
pub use version_manager::VersionManager;
