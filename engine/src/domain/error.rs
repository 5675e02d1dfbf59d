//! Domain-level errors
//! These represent supervision failures, not transport failures

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum DomainError {
    // Registry errors
    #[error("process '{0}' not found")]
    ProcessNotFound(String),

    #[error("instance '{0}' not found")]
    InstanceNotFound(String),

    // Resource exhaustion
    #[error("maximum instances ({max}) already running for '{name}'")]
    MaxInstancesReached { name: String, max: usize },

    #[error("no available port after {attempts} attempts starting from {start}")]
    PortExhausted { start: u16, attempts: u16 },

    // Launch errors
    #[error("no versioned binary found for '{0}'")]
    BinaryNotFound(String),

    #[error("environment file missing: {0}")]
    EnvFileMissing(String),

    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    // Update pipeline errors
    #[error("update already in progress for '{0}'")]
    UpdateInProgress(String),

    #[error("no repository configured for '{0}'")]
    RepositoryNotConfigured(String),

    #[error("hot restart failed: {0}")]
    RestartFailed(String),

    // Artifact errors
    #[error("release source error: {0}")]
    ReleaseSource(String),

    #[error("no artifact available for version {0}")]
    ArtifactUnavailable(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    // Version store errors
    #[error("no current version recorded for '{0}'")]
    NoCurrentVersion(String),

    #[error("no previous version available for '{0}'")]
    NoPreviousVersion(String),

    #[error("version '{tag}' not found in history for '{name}'")]
    VersionNotInHistory { name: String, tag: String },

    #[error("version store error: {0}")]
    VersionStore(String),

    // Configuration errors
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
