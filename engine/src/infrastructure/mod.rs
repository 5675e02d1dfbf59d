//! Infrastructure Layer (Driven Adapters)
//! Concrete implementations wired in by the daemon

pub mod config;
pub mod env_file;
pub mod github;
pub mod kill;
pub mod pid_tracker;
pub mod reflection;
pub mod singleton;
pub mod tokio_executor;

pub use config::{load_config, Config};
pub use github::GithubReleaseSource;
pub use pid_tracker::PidTracker;
pub use reflection::ReflectionClient;
pub use singleton::{sweep_orphans_by_name, SingletonGuard};
pub use tokio_executor::TokioProcessExecutor;
