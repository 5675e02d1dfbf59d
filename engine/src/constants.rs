//! Application-wide constants and default values

/// Process manager defaults
pub mod process {
    use std::time::Duration;

    /// First port the allocation cursor starts from
    pub const BASE_PORT: u16 = 5001;

    /// Consecutive candidates probed before giving up on allocation
    pub const PORT_PROBE_ATTEMPTS: u16 = 10;

    /// Delay before an auto-restart after a failed exit
    pub const RESTART_DELAY: Duration = Duration::from_secs(5);

    /// Timeout for the HTTP shutdown request sent during graceful stop
    pub const SHUTDOWN_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Hot restart coordinator
pub mod hot_restart {
    use std::time::Duration;

    /// Interval between health-gate polls
    pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

    /// Maximum health-gate polls before rolling back
    pub const HEALTH_MAX_ATTEMPTS: u32 = 10;

    /// Minimum wall-clock between provisioning and declaring the new set
    /// healthy, so observers can witness the dual-instance transition
    pub const MIN_DUAL_INSTANCE_WINDOW: Duration = Duration::from_secs(1);

    /// Graceful timeout used when retiring old instances
    pub const RETIRE_TIMEOUT: Duration = Duration::from_secs(3);
}

/// Update pipeline
pub mod update {
    use std::time::Duration;

    /// Fixed warm-up after starting the new instance
    pub const WARMUP: Duration = Duration::from_secs(5);

    /// Graceful timeout used when retiring old instances during an update
    pub const RETIRE_TIMEOUT: Duration = Duration::from_secs(30);

    /// Capacity of each per-watcher update channel; full channels drop frames
    pub const WATCHER_CHANNEL_CAPACITY: usize = 10;

    /// Bounded history kept per process in the version store
    pub const MAX_VERSION_HISTORY: usize = 10;
}

/// Reflection registry
pub mod registry {
    use std::time::Duration;

    /// Catalog cache lifetime
    pub const CACHE_TTL: Duration = Duration::from_secs(300);

    /// Deadline for a single reflection harvest
    pub const HARVEST_TIMEOUT: Duration = Duration::from_secs(3);

    /// Deadline for a dynamic invocation
    pub const INVOKE_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Release source
pub mod release {
    use std::time::Duration;

    /// Deadline for release metadata and artifact requests
    pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

    /// Per-request deadline used by the background poller
    pub const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Management surface
pub mod server {
    use std::time::Duration;

    /// Ports probed past the configured native gRPC port when it is busy
    pub const GRPC_PORT_PROBE_RANGE: u16 = 100;

    /// Delay between answering `POST /shutdown` and firing the signal
    pub const SHUTDOWN_RESPONSE_GRACE: Duration = Duration::from_millis(500);

    /// Graceful timeout used by ScaleProcess when shrinking
    pub const SCALE_DOWN_TIMEOUT: Duration = Duration::from_secs(10);
}
