#[cfg(test)]
pub mod mocks;
pub mod process_executor;
pub mod release_source;

pub use process_executor::{ExitHandle, ProcessExecutor, SpawnConfig, SpawnHandle, StderrBuffer};
pub use release_source::{ProgressFn, ReleaseSource};
